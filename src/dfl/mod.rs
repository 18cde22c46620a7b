//! DFL, the default filter expression language.
//!
//! Syntax:
//!   @key                         - attribute value (null when missing)
//!   'text', "text", 42, -1.5     - literals, plus true, false, null
//!   [a, b, c]                    - array literal
//!   a == b, a = b, a != b        - equality (numeric when both sides are numbers)
//!   a < b, <=, >, >=             - ordering
//!   a like 'x%', a ilike 'x%'    - wildcard match, `%` matches any run
//!   a in [..], 'sub' in a        - membership / substring
//!   and, &&, or, ||, not, !      - boolean operators
//!   len(a), lower(a), upper(a)   - functions
//!   (expr)                       - grouping

mod ast;
mod eval;
mod lexer;
mod parser;

use std::collections::HashMap;
use thiserror::Error;

pub use ast::{Expr, Value};
pub use eval::evaluate;
pub use parser::parse_expression;

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("cannot apply {operation} to {left} and {right}")]
    TypeMismatch {
        operation: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("{function}() does not accept {found}")]
    InvalidArgument {
        function: &'static str,
        found: &'static str,
    },
}

/// A parsed DFL expression together with the attributes it reads.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Expr,
    attributes: Vec<String>,
}

impl Expression {
    pub fn compile(source: &str) -> Result<Self, ExpressionError> {
        let ast = parse_expression(source).map_err(ExpressionError::Syntax)?;
        let attributes = ast.attributes().into_iter().collect();
        Ok(Self {
            source: source.to_string(),
            ast,
            attributes,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Sorted attribute names referenced by the expression.
    pub fn attributes(&self) -> &[String] {
        &self.attributes
    }

    pub fn evaluate(&self, attributes: &HashMap<String, String>) -> Result<Value, ExpressionError> {
        evaluate(&self.ast, attributes)
    }
}
