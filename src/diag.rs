//! Line-tagged error types, one per interpreter phase.

use std::error::Error;
use std::fmt;

/// Line number (starting at one).
pub type Position = u32;

/// Error raised while turning source text into tokens.
#[derive(Debug, PartialEq, Eq)]
pub struct LexError {
    pub pos: Position,
    pub kind: LexErrorKind,
}

#[derive(Debug, PartialEq, Eq)]
pub enum LexErrorKind {
    UnexpectedChar(char),
    LoneAmpersand,
    UnterminatedString,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lexer Error [line {}]: ", self.pos)?;
        match &self.kind {
            LexErrorKind::UnexpectedChar(ch) => write!(f, "Unexpected character: '{}'", ch),
            LexErrorKind::LoneAmpersand => {
                write!(f, "Unexpected character '&'. Did you mean '&&'?")
            }
            LexErrorKind::UnterminatedString => write!(f, "Unterminated string literal"),
        }
    }
}

impl Error for LexError {}

/// Error raised when the statement or expression dispatcher cannot consume
/// the token shape in front of it.
#[derive(Debug, PartialEq, Eq)]
pub struct ParseError {
    pub pos: Position,
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>, pos: Position) -> ParseError {
        ParseError {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Parse Error [line {}]: {}", self.pos, self.message)
    }
}

impl Error for ParseError {}

/// Error raised during evaluation: type or arity mismatches, bad indexing,
/// unknown names, failed I/O, uncaught thrown values.
#[derive(Debug, PartialEq, Eq)]
pub struct RuntimeError {
    pub pos: Position,
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, pos: Position) -> RuntimeError {
        RuntimeError {
            pos,
            message: message.into(),
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime Error [line {}]: {}", self.pos, self.message)
    }
}

impl Error for RuntimeError {}
