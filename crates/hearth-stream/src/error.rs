//! Error types for hearth-stream

use thiserror::Error;

/// Result type alias using hearth-stream Error
pub type Result<T> = std::result::Result<T, Error>;

/// User-facing error category, distinct from the raw error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level failure (refused, reset, DNS)
    Network,
    /// The server took too long to respond
    Timeout,
    /// The request was cancelled
    Aborted,
    /// Malformed or unexpected wire data
    Protocol,
}

impl ErrorKind {
    /// Stable, generic message suitable for display
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorKind::Network => "Unable to connect to server - please check if the server is running",
            ErrorKind::Timeout => "Request timed out - the server took too long to respond",
            ErrorKind::Aborted => "Request cancelled",
            ErrorKind::Protocol => "The server returned an unexpected response",
        }
    }
}

/// Errors that can occur on the streaming wire layer
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned an error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The JSON accumulation buffer exceeded its safety bound
    #[error("Stream buffer exceeded safety limit of {limit} bytes; possible malformed or extremely large payload")]
    BufferOverflow { limit: usize },

    /// Malformed stream framing
    #[error("Decode error: {0}")]
    Decode(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Request was cancelled; a normal terminal state, not a failure
    #[error("Request aborted")]
    Aborted,

    /// The stream ended without producing any content or tool calls
    #[error("No response received from server")]
    EmptyResponse,
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into its user-facing category
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Aborted => ErrorKind::Aborted,
            Error::Timeout => ErrorKind::Timeout,
            Error::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    ErrorKind::Network
                } else {
                    ErrorKind::Protocol
                }
            }
            Error::Api { status, .. } if *status >= 500 => ErrorKind::Network,
            _ => ErrorKind::Protocol,
        }
    }

    /// Check if this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Timeout => true,
            Error::Api { status, message } => {
                if matches!(status, 429 | 500 | 502 | 503 | 504) {
                    return true;
                }
                let msg = message.to_lowercase();
                msg.contains("rate limit") || msg.contains("overloaded")
            }
            _ => false,
        }
    }
}
