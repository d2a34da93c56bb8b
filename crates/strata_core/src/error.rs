//! Core error types for STRATA.

use crate::key::ViewKey;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A view key or table reference is malformed
    #[error("Invalid view key: {reason}")]
    InvalidKey {
        /// What is wrong with the key
        reason: String,
    },

    /// A view's source could not be parsed
    #[error("Parse error in {location}: {message}")]
    ParseError {
        /// View and file the error was found in
        location: String,
        /// Parser message
        message: String,
    },

    /// The dependency graph contains a cycle
    #[error("Cycle detected: {}", format_cycle(.path))]
    Cycle {
        /// Keys along the cycle; the first key is repeated at the end
        path: Vec<ViewKey>,
    },

    /// Validation error
    #[error("Validation failed for {field}: {reason}")]
    Validation {
        /// Offending setting
        field: String,
        /// Why it was rejected
        reason: String,
    },

    /// Not found
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of the missing item
        kind: String,
        /// Identifier that was looked up
        id: String,
    },

    /// Already exists
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Kind of the duplicated item
        kind: String,
        /// Identifier seen twice
        id: String,
    },

    /// Invalid encoding
    #[error("Invalid encoding: {reason}")]
    InvalidEncoding {
        /// Decoder message
        reason: String,
    },

    /// Filesystem failure
    #[error("IO error: {reason}")]
    Io {
        /// Underlying IO error
        reason: String,
    },

    /// Failure reported by a storage backend
    #[error("Backend error: {reason}")]
    Backend {
        /// Backend message
        reason: String,
    },

    /// Internal error (for unexpected errors)
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

fn format_cycle(path: &[ViewKey]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<postcard::Error> for CoreError {
    fn from(err: postcard::Error) -> Self {
        Self::InvalidEncoding {
            reason: err.to_string(),
        }
    }
}
