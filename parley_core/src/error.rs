use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failures surfaced by a conversation call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    #[error("API key is missing; set `apiKey` in the configuration")]
    MissingApiKey,

    #[error("Server returned a response without a usable HTTP status")]
    InvalidResponse,

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Server responded with status {status_code}: {message}")]
    BadResponse { status_code: u16, message: String },

    #[error("Request was cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Stream failed: {0}")]
    Stream(String),
}

impl Error {
    /// Status code of an HTTP failure, if this is one.
    #[must_use]
    pub const fn status_code(&self) -> Option<u16> {
        match self {
            Self::BadResponse { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
