use serde::Serialize;
use thiserror::Error;

/// Stable error codes for UI mapping. Keep these stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidUrl,
    Request,
    Network,
    JobFailed,
    Protocol,
    Busy,
    OutputWriteFailed,
}

/// Every failure the controller can surface. None of them is fatal: the
/// controller always returns to an interactive state and the user may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// Local input check; never reaches the network.
    #[error("{0}")]
    Validation(String),

    /// Non-success HTTP status. `message` is the server's `error` text or a fallback.
    #[error("{message}")]
    Request { status: u16, message: String },

    /// Transport failure (connection refused, reset, timeout).
    #[error("{0}")]
    Network(String),

    /// The server reported `status = "error"` for the job.
    #[error("{0}")]
    Job(String),

    /// Malformed or unexpected response shape.
    #[error("{0}")]
    Protocol(String),

    #[error("A download is already in progress")]
    Busy,

    /// Writing a retrieved file to disk failed.
    #[error("{0}")]
    Io(String),
}

impl ClientError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn job(msg: impl Into<String>) -> Self {
        Self::Job(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            ClientError::Validation(_) => ErrorCode::InvalidUrl,
            ClientError::Request { .. } => ErrorCode::Request,
            ClientError::Network(_) => ErrorCode::Network,
            ClientError::Job(_) => ErrorCode::JobFailed,
            ClientError::Protocol(_) => ErrorCode::Protocol,
            ClientError::Busy => ErrorCode::Busy,
            ClientError::Io(_) => ErrorCode::OutputWriteFailed,
        }
    }

    /// Text shown in the error notification.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Protocol(format!("Unexpected response from server: {}", e))
        } else if e.is_timeout() {
            ClientError::Network(format!("Request timed out: {}", e))
        } else {
            ClientError::Network(format!("Network error: {}", e))
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(format!("Failed to write file: {}", e))
    }
}
