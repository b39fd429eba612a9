//! Error types for Dropsearch

use thiserror::Error;

/// Result type for Dropsearch operations
pub type Result<T> = std::result::Result<T, DropsearchError>;

/// Errors that can occur in Dropsearch
#[derive(Error, Debug)]
pub enum DropsearchError {
    /// The token refresh exchange failed, or a refreshed token was rejected again.
    #[error("Credential error: {0}")]
    Credential(String),

    /// The provider answered 401 for the current access token.
    #[error("Access token rejected: {0}")]
    AuthRejected(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote error ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Index write error: {0}")]
    IndexWrite(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("A sync pass is already running")]
    PassInProgress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl DropsearchError {
    /// Whether the error only concerns the file being processed.
    ///
    /// Credential failures end the pass: every later file would hit the same
    /// refresh failure.
    pub fn is_per_file(&self) -> bool {
        !matches!(
            self,
            DropsearchError::Credential(_)
                | DropsearchError::Config(_)
                | DropsearchError::PassInProgress
        )
    }
}

impl From<reqwest::Error> for DropsearchError {
    fn from(err: reqwest::Error) -> Self {
        DropsearchError::Transport(err.to_string())
    }
}

impl From<anyhow::Error> for DropsearchError {
    fn from(err: anyhow::Error) -> Self {
        DropsearchError::Other(err.to_string())
    }
}
