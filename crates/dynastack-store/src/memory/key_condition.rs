//! Lexer and recursive-descent parser for key condition expressions.
//!
//! Grammar (keywords and `begins_with` are case-insensitive):
//!
//! ```text
//! condition := term (AND term)*
//! term      := path op value
//!            | path BETWEEN value AND value
//!            | begins_with ( path , value )
//!            | ( condition )
//! op        := = | < | <= | > | >=
//! path      := #name | identifier
//! value     := :name
//! ```
//!
//! Placeholders are resolved against the request's name and value maps while
//! parsing, so the result refers to real attribute names and values.

use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use dynastack_model::AttributeValue;

use super::storage::{SortableAttributeValue, StorageError};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced while parsing a key condition.
#[derive(Debug, thiserror::Error)]
pub enum KeyConditionError {
    /// An unexpected token was encountered.
    #[error("Unexpected token: expected {expected}, found {found}")]
    UnexpectedToken {
        /// What was expected.
        expected: String,
        /// What was found.
        found: String,
    },
    /// An expression attribute name placeholder could not be resolved.
    #[error("Unresolved expression attribute name: #{name}")]
    UnresolvedName {
        /// The unresolved name reference.
        name: String,
    },
    /// An expression attribute value placeholder could not be resolved.
    #[error("Unresolved expression attribute value: :{name}")]
    UnresolvedValue {
        /// The unresolved value reference.
        name: String,
    },
    /// A value is not usable as key material.
    #[error(transparent)]
    Key(#[from] StorageError),
}

// ---------------------------------------------------------------------------
// Parsed form
// ---------------------------------------------------------------------------

/// Condition on the sort key of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKeyCondition {
    /// `sk = :v`
    Eq(SortableAttributeValue),
    /// `sk < :v`
    Lt(SortableAttributeValue),
    /// `sk <= :v`
    Le(SortableAttributeValue),
    /// `sk > :v`
    Gt(SortableAttributeValue),
    /// `sk >= :v`
    Ge(SortableAttributeValue),
    /// `sk BETWEEN :lo AND :hi`, inclusive on both ends.
    Between(SortableAttributeValue, SortableAttributeValue),
    /// `begins_with(sk, :prefix)`
    BeginsWith(SortableAttributeValue),
}

impl SortKeyCondition {
    /// Returns `true` if `value` satisfies this condition.
    #[must_use]
    pub fn matches(&self, value: &SortableAttributeValue) -> bool {
        match self {
            Self::Eq(v) => value == v,
            Self::Lt(v) => value < v,
            Self::Le(v) => value <= v,
            Self::Gt(v) => value > v,
            Self::Ge(v) => value >= v,
            Self::Between(lo, hi) => value >= lo && value <= hi,
            Self::BeginsWith(prefix) => match (value, prefix) {
                (SortableAttributeValue::S(s), SortableAttributeValue::S(p)) => s.starts_with(p.as_str()),
                (SortableAttributeValue::B(b), SortableAttributeValue::B(p)) => b.starts_with(p),
                _ => false,
            },
        }
    }

    /// Returns every operand value of the condition.
    #[must_use]
    pub fn operands(&self) -> Vec<&SortableAttributeValue> {
        match self {
            Self::Eq(v)
            | Self::Lt(v)
            | Self::Le(v)
            | Self::Gt(v)
            | Self::Ge(v)
            | Self::BeginsWith(v) => vec![v],
            Self::Between(lo, hi) => vec![lo, hi],
        }
    }
}

/// A single resolved key condition term.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyTerm {
    /// The real attribute name the term constrains.
    pub attribute: String,
    /// The raw attribute value of the first operand.
    pub value: AttributeValue,
    /// The condition over the attribute.
    pub condition: SortKeyCondition,
}

/// A parsed key condition: the conjunction of its terms, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KeyCondition {
    /// Terms joined by `AND`.
    pub terms: Vec<KeyTerm>,
}

/// Parses a key condition expression, resolving `#name` and `:value`
/// placeholders against the supplied maps.
///
/// # Errors
///
/// Returns a [`KeyConditionError`] on malformed input or unresolved
/// placeholders.
#[allow(clippy::implicit_hasher)]
pub fn parse_key_condition(
    input: &str,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<KeyCondition, KeyConditionError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        names,
        values,
    };
    let mut condition = KeyCondition::default();
    parser.parse_conjunction(&mut condition)?;
    parser.expect(&Token::Eof)?;
    Ok(condition)
}

// ---------------------------------------------------------------------------
// Token type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Identifier(String),
    ExprAttrName(String),
    ExprAttrValue(String),
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Comma,
    LParen,
    RParen,
    And,
    Between,
    BeginsWith,
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier(s) => write!(f, "identifier '{s}'"),
            Self::ExprAttrName(s) => write!(f, "#{s}"),
            Self::ExprAttrValue(s) => write!(f, ":{s}"),
            Self::Eq => write!(f, "'='"),
            Self::Lt => write!(f, "'<'"),
            Self::Le => write!(f, "'<='"),
            Self::Gt => write!(f, "'>'"),
            Self::Ge => write!(f, "'>='"),
            Self::Comma => write!(f, "','"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::And => write!(f, "AND"),
            Self::Between => write!(f, "BETWEEN"),
            Self::BeginsWith => write!(f, "begins_with"),
            Self::Eof => write!(f, "EOF"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

struct Lexer<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<Token>, KeyConditionError> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            let done = tok == Token::Eof;
            tokens.push(tok);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, KeyConditionError> {
        while self.chars.peek().is_some_and(char::is_ascii_whitespace) {
            self.chars.next();
        }

        let Some(&ch) = self.chars.peek() else {
            return Ok(Token::Eof);
        };

        match ch {
            '#' => {
                self.chars.next();
                self.read_placeholder("attribute name after '#'")
                    .map(Token::ExprAttrName)
            }
            ':' => {
                self.chars.next();
                self.read_placeholder("value name after ':'")
                    .map(Token::ExprAttrValue)
            }
            '=' => Ok(self.single(Token::Eq)),
            ',' => Ok(self.single(Token::Comma)),
            '(' => Ok(self.single(Token::LParen)),
            ')' => Ok(self.single(Token::RParen)),
            '<' => {
                self.chars.next();
                if self.chars.next_if_eq(&'=').is_some() {
                    Ok(Token::Le)
                } else {
                    Ok(Token::Lt)
                }
            }
            '>' => {
                self.chars.next();
                if self.chars.next_if_eq(&'=').is_some() {
                    Ok(Token::Ge)
                } else {
                    Ok(Token::Gt)
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let ident = self.read_ident_chars();
                Ok(match ident.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "between" => Token::Between,
                    "begins_with" => Token::BeginsWith,
                    _ => Token::Identifier(ident),
                })
            }
            _ => Err(KeyConditionError::UnexpectedToken {
                expected: "valid token".to_owned(),
                found: format!("'{ch}'"),
            }),
        }
    }

    fn single(&mut self, tok: Token) -> Token {
        self.chars.next();
        tok
    }

    fn read_placeholder(&mut self, expected: &str) -> Result<String, KeyConditionError> {
        let name = self.read_ident_chars();
        if name.is_empty() {
            return Err(KeyConditionError::UnexpectedToken {
                expected: expected.to_owned(),
                found: "empty".to_owned(),
            });
        }
        Ok(name)
    }

    fn read_ident_chars(&mut self) -> String {
        let mut s = String::new();
        while let Some(c) = self
            .chars
            .next_if(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            s.push(c);
        }
        s
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser<'m> {
    tokens: Vec<Token>,
    pos: usize,
    names: &'m HashMap<String, String>,
    values: &'m HashMap<String, AttributeValue>,
}

impl Parser<'_> {
    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<(), KeyConditionError> {
        let tok = self.advance();
        if &tok == expected {
            Ok(())
        } else {
            Err(KeyConditionError::UnexpectedToken {
                expected: expected.to_string(),
                found: tok.to_string(),
            })
        }
    }

    fn parse_conjunction(&mut self, out: &mut KeyCondition) -> Result<(), KeyConditionError> {
        self.parse_term(out)?;
        while self.peek() == &Token::And {
            self.advance();
            self.parse_term(out)?;
        }
        Ok(())
    }

    fn parse_term(&mut self, out: &mut KeyCondition) -> Result<(), KeyConditionError> {
        match self.peek() {
            Token::LParen => {
                self.advance();
                self.parse_conjunction(out)?;
                self.expect(&Token::RParen)
            }
            Token::BeginsWith => {
                self.advance();
                self.expect(&Token::LParen)?;
                let attribute = self.parse_path()?;
                self.expect(&Token::Comma)?;
                let (value, sortable) = self.parse_value(&attribute)?;
                self.expect(&Token::RParen)?;
                out.terms.push(KeyTerm {
                    attribute,
                    value,
                    condition: SortKeyCondition::BeginsWith(sortable),
                });
                Ok(())
            }
            _ => {
                let attribute = self.parse_path()?;
                let op = self.advance();
                let (value, first) = self.parse_value(&attribute)?;
                let condition = match op {
                    Token::Eq => SortKeyCondition::Eq(first),
                    Token::Lt => SortKeyCondition::Lt(first),
                    Token::Le => SortKeyCondition::Le(first),
                    Token::Gt => SortKeyCondition::Gt(first),
                    Token::Ge => SortKeyCondition::Ge(first),
                    Token::Between => {
                        self.expect(&Token::And)?;
                        let (_, second) = self.parse_value(&attribute)?;
                        SortKeyCondition::Between(first, second)
                    }
                    other => {
                        return Err(KeyConditionError::UnexpectedToken {
                            expected: "comparison operator".to_owned(),
                            found: other.to_string(),
                        });
                    }
                };
                out.terms.push(KeyTerm {
                    attribute,
                    value,
                    condition,
                });
                Ok(())
            }
        }
    }

    fn parse_path(&mut self) -> Result<String, KeyConditionError> {
        match self.advance() {
            Token::Identifier(name) => Ok(name),
            Token::ExprAttrName(alias) => self
                .names
                .get(&format!("#{alias}"))
                .cloned()
                .ok_or(KeyConditionError::UnresolvedName { name: alias }),
            other => Err(KeyConditionError::UnexpectedToken {
                expected: "attribute name".to_owned(),
                found: other.to_string(),
            }),
        }
    }

    fn parse_value(
        &mut self,
        attribute: &str,
    ) -> Result<(AttributeValue, SortableAttributeValue), KeyConditionError> {
        match self.advance() {
            Token::ExprAttrValue(name) => {
                let value = self
                    .values
                    .get(&format!(":{name}"))
                    .cloned()
                    .ok_or(KeyConditionError::UnresolvedValue { name })?;
                let sortable = SortableAttributeValue::from_attribute_value(attribute, &value)?;
                Ok((value, sortable))
            }
            other => Err(KeyConditionError::UnexpectedToken {
                expected: "expression attribute value".to_owned(),
                found: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
