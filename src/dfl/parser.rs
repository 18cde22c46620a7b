//! Parser for DFL expressions.
//!
//! Grammar (in rough EBNF):
//!
//! expr       = or_expr
//! or_expr    = and_expr (("or" | "||") and_expr)*
//! and_expr   = unary_expr (("and" | "&&") unary_expr)*
//! unary_expr = ("not" | "!") unary_expr | comparison
//! comparison = operand (compare_op operand | "like" operand | "ilike" operand | "in" operand)?
//! compare_op = "==" | "=" | "!=" | "<" | "<=" | ">" | ">="
//! operand    = "(" expr ")" | "[" (expr ("," expr)*)? "]" | IDENT "(" expr ")"
//!            | ATTRIBUTE | STRING | NUMBER | "true" | "false" | "null"

use super::ast::{CompareOp, Expr, Function, Value};
use super::lexer::{Token, tokenize};

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: Token) -> Result<(), String> {
        let tok = self.advance();
        if tok == expected {
            Ok(())
        } else {
            Err(format!("expected {:?}, got {:?}", expected, tok))
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_or_expr()
    }

    fn parse_or_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_and_expr()?;
        while matches!(self.peek(), Token::Or) {
            self.advance();
            let right = self.parse_and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and_expr(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_unary_expr()?;
        while matches!(self.peek(), Token::And) {
            self.advance();
            let right = self.parse_unary_expr()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary_expr(&mut self) -> Result<Expr, String> {
        if matches!(self.peek(), Token::Not) {
            self.advance();
            let inner = self.parse_unary_expr()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, String> {
        let left = self.parse_operand()?;

        let op = match self.peek() {
            Token::Eq => Some(CompareOp::Eq),
            Token::Ne => Some(CompareOp::Ne),
            Token::Lt => Some(CompareOp::Lt),
            Token::Le => Some(CompareOp::Le),
            Token::Gt => Some(CompareOp::Gt),
            Token::Ge => Some(CompareOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let right = self.parse_operand()?;
            return Ok(Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        match self.peek() {
            Token::Like | Token::ILike => {
                let case_insensitive = matches!(self.advance(), Token::ILike);
                let pattern = self.parse_operand()?;
                Ok(Expr::Like {
                    value: Box::new(left),
                    pattern: Box::new(pattern),
                    case_insensitive,
                })
            }
            Token::In => {
                self.advance();
                let haystack = self.parse_operand()?;
                Ok(Expr::In {
                    needle: Box::new(left),
                    haystack: Box::new(haystack),
                })
            }
            _ => Ok(left),
        }
    }

    fn parse_operand(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.parse_array(),
            Token::Ident(name) => {
                let function =
                    Function::from_name(&name).ok_or_else(|| format!("unknown function {:?}", name))?;
                self.expect(Token::LParen)?;
                let argument = self.parse_expr()?;
                self.expect(Token::RParen)?;
                Ok(Expr::Call {
                    function,
                    argument: Box::new(argument),
                })
            }
            Token::Attribute(name) => Ok(Expr::Attribute(name)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            other => Err(format!("unexpected token: {:?}", other)),
        }
    }

    fn parse_array(&mut self) -> Result<Expr, String> {
        let mut items = Vec::new();
        if matches!(self.peek(), Token::RBracket) {
            self.advance();
            return Ok(Expr::Array(items));
        }
        loop {
            items.push(self.parse_expr()?);
            match self.advance() {
                Token::Comma => continue,
                Token::RBracket => break,
                other => return Err(format!("expected ',' or ']', got {:?}", other)),
            }
        }
        Ok(Expr::Array(items))
    }
}

/// Parse a DFL expression into an AST.
pub fn parse_expression(input: &str) -> Result<Expr, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty expression".to_string());
    }

    let tokens = tokenize(input)?;
    let mut parser = Parser::new(tokens);
    let ast = parser.parse_expr()?;

    if !matches!(parser.peek(), Token::Eof) {
        return Err(format!(
            "unexpected token after expression: {:?}",
            parser.peek()
        ));
    }

    Ok(ast)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(name: &str) -> Box<Expr> {
        Box::new(Expr::Attribute(name.into()))
    }

    fn string(s: &str) -> Box<Expr> {
        Box::new(Expr::Literal(Value::String(s.into())))
    }

    #[test]
    fn simple_equality() {
        let ast = parse_expression("@amenity == 'cafe'").unwrap();
        assert_eq!(
            ast,
            Expr::Compare {
                op: CompareOp::Eq,
                left: attr("amenity"),
                right: string("cafe"),
            }
        );
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let ast = parse_expression("@a == 1 or @b == 2 and @c == 3").unwrap();
        let Expr::Or(_, right) = ast else {
            panic!("expected or at the root");
        };
        assert!(matches!(*right, Expr::And(_, _)));
    }

    #[test]
    fn not_applies_to_the_comparison() {
        let ast = parse_expression("not @shop == 'bakery'").unwrap();
        let Expr::Not(inner) = ast else {
            panic!("expected not at the root");
        };
        assert!(matches!(*inner, Expr::Compare { op: CompareOp::Eq, .. }));
    }

    #[test]
    fn like_ilike_and_in() {
        assert!(matches!(
            parse_expression("@name ilike '%taco%'").unwrap(),
            Expr::Like { case_insensitive: true, .. }
        ));
        let ast = parse_expression("@highway in ['primary', 'secondary']").unwrap();
        let Expr::In { haystack, .. } = ast else {
            panic!("expected in");
        };
        assert_eq!(
            *haystack,
            Expr::Array(vec![*string("primary"), *string("secondary")])
        );
    }

    #[test]
    fn function_call() {
        let ast = parse_expression("len(@name) > 3").unwrap();
        let Expr::Compare { left, .. } = ast else {
            panic!("expected comparison");
        };
        assert_eq!(
            *left,
            Expr::Call {
                function: Function::Len,
                argument: attr("name"),
            }
        );
    }

    #[test]
    fn rejects_unknown_functions_and_trailing_tokens() {
        assert!(parse_expression("reverse(@name) == 'x'").is_err());
        assert!(parse_expression("@a == 1 @b").is_err());
        assert!(parse_expression("   ").is_err());
        assert!(parse_expression("(@a == 1").is_err());
    }
}
