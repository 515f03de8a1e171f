//! Recursive-descent parser for the device group selection-rule grammar (§4.6)
//!
//! ```text
//! Start   := Or
//! Or      := And ( "OR" And )*
//! And     := Atom ( "AND" Atom )*
//! Atom    := "(" Or ")" | ThingLiteral
//! ThingLiteral := "thingName:" QuotedString
//! ```

use crate::error::{CdaError, Result};

/// The compiled selection-rule AST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// True if any child is true.
    Or(Vec<Expr>),
    /// True if every child is true.
    And(Vec<Expr>),
    /// `thingName:"<value>"`, matched exactly, or as a prefix when `value`
    /// ends in `*`.
    ThingLiteral(String),
}

impl Expr {
    /// Evaluate against a session's `ThingName` attribute, short-circuiting.
    pub fn evaluate(&self, thing_name: Option<&str>) -> bool {
        match self {
            Expr::Or(children) => children.iter().any(|c| c.evaluate(thing_name)),
            Expr::And(children) => children.iter().all(|c| c.evaluate(thing_name)),
            Expr::ThingLiteral(expected) => match thing_name {
                Some(actual) => match expected.strip_suffix('*') {
                    Some(prefix) => actual.starts_with(prefix),
                    None => actual == expected,
                },
                None => false,
            },
        }
    }
}

/// Parse a selection rule into an [`Expr`], failing with
/// `CdaError::InvalidConfiguration` on any grammar violation.
pub fn parse(rule: &str) -> Result<Expr> {
    let tokens = tokenize(rule)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != parser.tokens.len() {
        return Err(CdaError::InvalidConfiguration(format!(
            "trailing tokens in selection rule: {rule:?}"
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Or,
    And,
    LParen,
    RParen,
    ThingLiteral(String),
}

fn tokenize(rule: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = rule.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            _ => {
                if rule[byte_offset(&chars, i)..].starts_with("thingName:") {
                    i += "thingName:".chars().count();
                    if i >= chars.len() || chars[i] != '"' {
                        return Err(CdaError::InvalidConfiguration(format!(
                            "expected quoted string after thingName: in {rule:?}"
                        )));
                    }
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '"' {
                        i += 1;
                    }
                    if i >= chars.len() {
                        return Err(CdaError::InvalidConfiguration(format!(
                            "unterminated quoted string in {rule:?}"
                        )));
                    }
                    let value: String = chars[start..i].iter().collect();
                    tokens.push(Token::ThingLiteral(value));
                    i += 1;
                } else {
                    let start = i;
                    while i < chars.len() && !chars[i].is_whitespace() && chars[i] != '(' && chars[i] != ')' {
                        i += 1;
                    }
                    let word: String = chars[start..i].iter().collect();
                    match word.as_str() {
                        "OR" => tokens.push(Token::Or),
                        "AND" => tokens.push(Token::And),
                        other => {
                            return Err(CdaError::InvalidConfiguration(format!(
                                "unexpected token {other:?} in selection rule {rule:?}"
                            )))
                        }
                    }
                }
            }
        }
    }
    Ok(tokens)
}

fn byte_offset(chars: &[char], char_index: usize) -> usize {
    chars[..char_index].iter().map(|c| c.len_utf8()).sum()
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut children = vec![self.parse_and()?];
        while matches!(self.peek(), Some(Token::Or)) {
            self.pos += 1;
            children.push(self.parse_and()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expr::Or(children)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut children = vec![self.parse_atom()?];
        while matches!(self.peek(), Some(Token::And)) {
            self.pos += 1;
            children.push(self.parse_atom()?);
        }
        Ok(if children.len() == 1 {
            children.remove(0)
        } else {
            Expr::And(children)
        })
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_or()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(CdaError::InvalidConfiguration(
                        "expected closing parenthesis in selection rule".into(),
                    )),
                }
            }
            Some(Token::ThingLiteral(value)) => {
                let value = value.clone();
                self.pos += 1;
                Ok(Expr::ThingLiteral(value))
            }
            other => Err(CdaError::InvalidConfiguration(format!(
                "expected thingName literal or '(', found {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_literal() {
        let expr = parse(r#"thingName:"edge-1""#).unwrap();
        assert!(expr.evaluate(Some("edge-1")));
        assert!(!expr.evaluate(Some("edge-2")));
    }

    #[test]
    fn parses_and_or_with_parens() {
        let expr = parse(r#"thingName:"a" OR (thingName:"b" AND thingName:"b")"#).unwrap();
        assert!(expr.evaluate(Some("a")));
        assert!(expr.evaluate(Some("b")));
        assert!(!expr.evaluate(Some("c")));
    }

    #[test]
    fn wildcard_suffix_matches_prefix() {
        let expr = parse(r#"thingName:"camera-*""#).unwrap();
        assert!(expr.evaluate(Some("camera-01")));
        assert!(!expr.evaluate(Some("sensor-01")));
    }

    #[test]
    fn rejects_malformed_rule() {
        assert!(parse("thingName:\"unterminated").is_err());
        assert!(parse("thingName:\"a\" OR").is_err());
        assert!(parse("garbage").is_err());
    }
}
