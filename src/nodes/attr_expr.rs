//! Boolean expressions over node attributes.
//!
//! Jobs may restrict placement with an expression such as
//! `big and not (slow or old)`. Literals are attribute names and evaluate to
//! true when the node carries that attribute.
//!
//! Grammar (lowest precedence first):
//!
//! ```text
//! expr    := term ("or" term)*
//! term    := factor ("and" factor)*
//! factor  := "not" factor | "(" expr ")" | literal
//! ```

use std::collections::BTreeSet;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttrExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),

    #[error("unbalanced parenthesis")]
    Unbalanced,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    And,
    Or,
    Not,
    Open,
    Close,
    Literal(String),
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Open => write!(f, "("),
            Token::Close => write!(f, ")"),
            Token::Literal(name) => write!(f, "{}", name),
        }
    }
}

/// A parsed attribute expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrExpr {
    /// Empty expression, matches every node.
    Any,
    Attr(String),
    Not(Box<AttrExpr>),
    And(Box<AttrExpr>, Box<AttrExpr>),
    Or(Box<AttrExpr>, Box<AttrExpr>),
}

impl AttrExpr {
    /// Parse the token list sent by a master. Parentheses may be glued to
    /// literals (`["(big", "or", "fast)"]`).
    pub fn parse<S: AsRef<str>>(words: &[S]) -> Result<Self, AttrExprError> {
        let tokens = tokenize(words);
        if tokens.is_empty() {
            return Ok(AttrExpr::Any);
        }

        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(Token::Close) => Err(AttrExprError::Unbalanced),
            Some(tok) => Err(AttrExprError::UnexpectedToken(tok.to_string())),
        }
    }

    pub fn matches(&self, attributes: &BTreeSet<String>) -> bool {
        match self {
            AttrExpr::Any => true,
            AttrExpr::Attr(name) => attributes.contains(name),
            AttrExpr::Not(inner) => !inner.matches(attributes),
            AttrExpr::And(lhs, rhs) => lhs.matches(attributes) && rhs.matches(attributes),
            AttrExpr::Or(lhs, rhs) => lhs.matches(attributes) || rhs.matches(attributes),
        }
    }
}

fn tokenize<S: AsRef<str>>(words: &[S]) -> Vec<Token> {
    let mut tokens = Vec::new();
    for word in words {
        let mut literal = String::new();
        for ch in word.as_ref().chars() {
            match ch {
                '(' | ')' => {
                    flush_literal(&mut literal, &mut tokens);
                    tokens.push(if ch == '(' { Token::Open } else { Token::Close });
                }
                c if c.is_whitespace() => flush_literal(&mut literal, &mut tokens),
                c => literal.push(c),
            }
        }
        flush_literal(&mut literal, &mut tokens);
    }
    tokens
}

fn flush_literal(literal: &mut String, tokens: &mut Vec<Token>) {
    if literal.is_empty() {
        return;
    }
    let word = std::mem::take(literal);
    tokens.push(match word.as_str() {
        "and" => Token::And,
        "or" => Token::Or,
        "not" => Token::Not,
        _ => Token::Literal(word),
    });
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<AttrExpr, AttrExprError> {
        let mut lhs = self.term()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = AttrExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<AttrExpr, AttrExprError> {
        let mut lhs = self.factor()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = AttrExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<AttrExpr, AttrExprError> {
        match self.next() {
            None => Err(AttrExprError::UnexpectedEnd),
            Some(Token::Not) => Ok(AttrExpr::Not(Box::new(self.factor()?))),
            Some(Token::Open) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(AttrExprError::Unbalanced),
                }
            }
            Some(Token::Literal(name)) => Ok(AttrExpr::Attr(name)),
            Some(tok) => Err(AttrExprError::UnexpectedToken(tok.to_string())),
        }
    }
}
