//! Evaluator for DFL expressions.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::ExpressionError;
use super::ast::{CompareOp, Expr, Function, Value};
use crate::utils::like_match;

/// Evaluate `expr` against string attributes. Missing attributes evaluate to `null`.
pub fn evaluate(expr: &Expr, attributes: &HashMap<String, String>) -> Result<Value, ExpressionError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),

        Expr::Attribute(name) => Ok(attributes
            .get(name)
            .map(|v| Value::String(v.clone()))
            .unwrap_or(Value::Null)),

        Expr::Array(items) => items
            .iter()
            .map(|item| evaluate(item, attributes))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),

        Expr::Not(inner) => Ok(Value::Bool(!evaluate(inner, attributes)?.truthy())),

        Expr::And(left, right) => {
            if !evaluate(left, attributes)?.truthy() {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(evaluate(right, attributes)?.truthy()))
        }

        Expr::Or(left, right) => {
            if evaluate(left, attributes)?.truthy() {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(evaluate(right, attributes)?.truthy()))
        }

        Expr::Compare { op, left, right } => {
            let left = evaluate(left, attributes)?;
            let right = evaluate(right, attributes)?;
            compare(*op, &left, &right).map(Value::Bool)
        }

        Expr::Like {
            value,
            pattern,
            case_insensitive,
        } => {
            let value = evaluate(value, attributes)?;
            let pattern = evaluate(pattern, attributes)?;
            like(&value, &pattern, *case_insensitive).map(Value::Bool)
        }

        Expr::In { needle, haystack } => {
            let needle = evaluate(needle, attributes)?;
            let haystack = evaluate(haystack, attributes)?;
            contains(&haystack, &needle).map(Value::Bool)
        }

        Expr::Call { function, argument } => {
            let argument = evaluate(argument, attributes)?;
            call(*function, argument)
        }
    }
}

fn equals(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) if a == b => true,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| equals(x, y))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, ExpressionError> {
    match op {
        CompareOp::Eq => return Ok(equals(left, right)),
        CompareOp::Ne => return Ok(!equals(left, right)),
        _ => {}
    }

    if matches!(left, Value::Null) || matches!(right, Value::Null) {
        return Ok(false);
    }

    let ordering = match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => {
                return Err(ExpressionError::TypeMismatch {
                    operation: "comparison",
                    left: left.type_name(),
                    right: right.type_name(),
                });
            }
        },
    };

    Ok(match ordering {
        Some(Ordering::Less) => matches!(op, CompareOp::Lt | CompareOp::Le),
        Some(Ordering::Equal) => matches!(op, CompareOp::Le | CompareOp::Ge),
        Some(Ordering::Greater) => matches!(op, CompareOp::Gt | CompareOp::Ge),
        None => false,
    })
}

fn like(value: &Value, pattern: &Value, case_insensitive: bool) -> Result<bool, ExpressionError> {
    let text = match value {
        Value::Null => return Ok(false),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ExpressionError::TypeMismatch {
                operation: "like",
                left: other.type_name(),
                right: pattern.type_name(),
            });
        }
    };
    let Value::String(pattern) = pattern else {
        return Err(ExpressionError::TypeMismatch {
            operation: "like",
            left: value.type_name(),
            right: pattern.type_name(),
        });
    };

    if case_insensitive {
        Ok(like_match(&pattern.to_lowercase(), &text.to_lowercase()))
    } else {
        Ok(like_match(pattern, &text))
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExpressionError> {
    match (haystack, needle) {
        (Value::Null, _) | (_, Value::Null) => Ok(false),
        (Value::Array(items), _) => Ok(items.iter().any(|item| equals(item, needle))),
        (Value::String(text), Value::String(part)) => Ok(text.contains(part.as_str())),
        _ => Err(ExpressionError::TypeMismatch {
            operation: "in",
            left: needle.type_name(),
            right: haystack.type_name(),
        }),
    }
}

fn call(function: Function, argument: Value) -> Result<Value, ExpressionError> {
    match (function, argument) {
        (_, Value::Null) if function != Function::Len => Ok(Value::Null),
        (Function::Len, Value::Null) => Ok(Value::Number(0.0)),
        (Function::Len, Value::String(s)) => Ok(Value::Number(s.chars().count() as f64)),
        (Function::Len, Value::Array(items)) => Ok(Value::Number(items.len() as f64)),
        (Function::Lower, Value::String(s)) => Ok(Value::String(s.to_lowercase())),
        (Function::Upper, Value::String(s)) => Ok(Value::String(s.to_uppercase())),
        (function, other) => Err(ExpressionError::InvalidArgument {
            function: function.name(),
            found: other.type_name(),
        }),
    }
}
