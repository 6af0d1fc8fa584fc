//! Error types of the logic crate

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogicError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogicError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { message: String, offset: usize },

    #[error("Unexpected end of input: expected {expected}")]
    UnexpectedEof { expected: String },

    #[error("Unterminated string literal starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("Invalid module address: {message}")]
    InvalidAddress { message: String },

    #[error("Document error: {message}")]
    Document { message: String },
}

impl LogicError {
    pub fn syntax(message: impl Into<String>, offset: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            offset,
        }
    }

    pub fn unexpected_eof(expected: impl Into<String>) -> Self {
        Self::UnexpectedEof {
            expected: expected.into(),
        }
    }

    pub fn invalid_address(message: impl Into<String>) -> Self {
        Self::InvalidAddress {
            message: message.into(),
        }
    }

    pub fn document(message: impl Into<String>) -> Self {
        Self::Document {
            message: message.into(),
        }
    }

    /// Input offset the error points at, if any
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Syntax { offset, .. } | Self::UnterminatedString { offset } => Some(*offset),
            _ => None,
        }
    }
}
