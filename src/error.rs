use std::fmt::Display;

use thiserror::Error;

/// Opaque error produced by a query function or the execution engine.
///
/// This layer never inspects error contents. Errors flow up to the nearest
/// [`Catch`](crate::Catch) boundary, or back to the caller when surfacing is
/// suppressed for an invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
}

impl QueryError {
    /// An error from any displayable message.
    pub fn new(message: impl Display) -> Self {
        QueryError {
            message: message.to_string(),
        }
    }

    /// The carried message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for QueryError {
    fn from(message: String) -> Self {
        QueryError { message }
    }
}

impl From<&str> for QueryError {
    fn from(message: &str) -> Self {
        QueryError {
            message: message.to_string(),
        }
    }
}
