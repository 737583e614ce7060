//! Error types for hearth-agent

use thiserror::Error;

/// Result type alias using hearth-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during agent operations
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the streaming wire layer
    #[error(transparent)]
    Stream(#[from] hearth_stream::Error),

    /// An error from the retrieval worker
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// A generic agent error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if this error represents a user-initiated cancellation
    pub fn is_aborted(&self) -> bool {
        matches!(self, Error::Stream(hearth_stream::Error::Aborted))
    }
}
