//! Error types for the psyas client

use thiserror::Error;

/// The main error type for psyas client operations
#[derive(Error, Debug)]
pub enum Error {
    /// No response received (connect failure, timeout, DNS)
    #[error("Network error: {0}")]
    Network(String),

    /// The backend rejected the bearer token (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Login rejected: wrong username or password
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Registration conflict: username or email already taken
    #[error("Duplicate user: {0}")]
    DuplicateUser(String),

    /// Client-side form validation, checked before any request is issued
    #[error("Validation error: {0}")]
    Validation(String),

    /// Other 4xx responses, with the backend-supplied code and message
    #[error("API error {code}: {message}")]
    Api { code: u16, message: String },

    /// 5xx responses
    #[error("Server error: {0}")]
    Server(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// A specialized Result type for psyas client operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the failure means the stored token is no longer usable
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        // Anything that never produced a response counts as a network
        // failure; status-coded errors are classified by the caller.
        Error::Network(e.to_string())
    }
}
