//! Tokenizer for DFL expressions.

use winnow::ascii::space0;
use winnow::combinator::{alt, delimited};
use winnow::prelude::*;
use winnow::token::{take_till, take_while};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Attribute(String), // @name
    Ident(String),     // function name
    Str(String),
    Number(f64),

    True,
    False,
    Null,

    Eq, // == or =
    Ne, // !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
    Like,
    ILike,
    In,

    And, // and, &&
    Or,  // or, ||
    Not, // not, !

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,

    Eof,
}

type PResult<T> = Result<T, winnow::error::ErrMode<winnow::error::ContextError>>;

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == ':' || c == '-' || c == '.'
}

fn lex_attribute(input: &mut &str) -> PResult<Token> {
    '@'.parse_next(input)?;
    let name = take_while(1.., is_name_char).parse_next(input)?;
    Ok(Token::Attribute(name.to_string()))
}

/// Keywords are case-insensitive; anything else is a function name.
fn lex_word(input: &mut &str) -> PResult<Token> {
    let first = take_while(1.., |c: char| c.is_alphabetic() || c == '_').parse_next(input)?;
    let rest = take_while(0.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)?;
    let word = format!("{}{}", first, rest);

    Ok(match word.to_ascii_lowercase().as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        "like" => Token::Like,
        "ilike" => Token::ILike,
        "in" => Token::In,
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Ident(word),
    })
}

fn lex_string(input: &mut &str) -> PResult<Token> {
    let text = alt((
        delimited('\'', take_till(0.., '\''), '\''),
        delimited('"', take_till(0.., '"'), '"'),
    ))
    .parse_next(input)?;
    Ok(Token::Str(text.to_string()))
}

fn lex_number(input: &mut &str) -> PResult<Token> {
    let neg = winnow::combinator::opt('-').parse_next(input)?;
    let num_str = take_while(1.., |c: char| c.is_ascii_digit() || c == '.').parse_next(input)?;
    let full = if neg.is_some() {
        format!("-{}", num_str)
    } else {
        num_str.to_string()
    };
    let n: f64 = full
        .parse()
        .map_err(|_| winnow::error::ErrMode::Backtrack(winnow::error::ContextError::default()))?;
    Ok(Token::Number(n))
}

fn lex_operator(input: &mut &str) -> PResult<Token> {
    alt((
        "==".value(Token::Eq),
        "!=".value(Token::Ne),
        "<=".value(Token::Le),
        ">=".value(Token::Ge),
        "&&".value(Token::And),
        "||".value(Token::Or),
        "=".value(Token::Eq),
        "<".value(Token::Lt),
        ">".value(Token::Gt),
        "!".value(Token::Not),
    ))
    .parse_next(input)
}

fn lex_punctuation(input: &mut &str) -> PResult<Token> {
    alt((
        "(".value(Token::LParen),
        ")".value(Token::RParen),
        "[".value(Token::LBracket),
        "]".value(Token::RBracket),
        ",".value(Token::Comma),
    ))
    .parse_next(input)
}

fn lex_token(input: &mut &str) -> PResult<Token> {
    space0.parse_next(input)?;

    if input.is_empty() {
        return Ok(Token::Eof);
    }

    alt((
        lex_operator,
        lex_punctuation,
        lex_string,
        lex_number,
        lex_attribute,
        lex_word,
    ))
    .parse_next(input)
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut remaining = input;
    let mut tokens = Vec::new();

    loop {
        match lex_token(&mut remaining) {
            Ok(Token::Eof) => break,
            Ok(tok) => tokens.push(tok),
            Err(_) => return Err(format!("unexpected input at '{}'", remaining)),
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}
