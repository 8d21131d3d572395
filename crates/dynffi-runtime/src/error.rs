//! Error taxonomy for the FFI engine
//!
//! Every fallible operation returns [`FfiResult`]. Errors are reported
//! synchronously and never leave partially constructed state visible.

use thiserror::Error;

/// Errors produced by parsing, marshaling, calling and loading
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FfiError {
    /// Malformed declaration, duplicate or undeclared symbol
    #[error("{line}:{message}")]
    Parse { line: u32, message: String },

    /// Impossible conversion, bad indexing, non-callable value, unsupported type
    #[error("{0}")]
    Type(String),

    /// Wrong argument count on a call
    #[error("wrong number of arguments for function call")]
    Arity {
        expected: usize,
        got: usize,
        variadic: bool,
    },

    /// Module open, symbol resolution or allocation failure
    #[error("{0}")]
    Resource(String),
}

impl FfiError {
    pub(crate) fn parse(line: u32, message: impl Into<String>) -> Self {
        FfiError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn type_error(message: impl Into<String>) -> Self {
        FfiError::Type(message.into())
    }

    pub(crate) fn resource(message: impl Into<String>) -> Self {
        FfiError::Resource(message.into())
    }

    /// `cannot convert 'from' to 'to'`
    pub(crate) fn convert(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        FfiError::Type(format!("cannot convert '{}' to '{}'", from, to))
    }
}

/// Result alias used throughout the crate
pub type FfiResult<T> = Result<T, FfiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_line() {
        let err = FfiError::parse(3, "identifier expected");
        assert_eq!(err.to_string(), "3:identifier expected");
    }

    #[test]
    fn test_arity_message() {
        let err = FfiError::Arity {
            expected: 2,
            got: 1,
            variadic: false,
        };
        assert_eq!(err.to_string(), "wrong number of arguments for function call");
    }

    #[test]
    fn test_convert_message() {
        let err = FfiError::convert("table", "int *");
        assert_eq!(err.to_string(), "cannot convert 'table' to 'int *'");
    }
}
