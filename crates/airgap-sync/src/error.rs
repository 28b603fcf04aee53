//! Error types for sync operations

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote history source failed
    #[error("Network error: {0}")]
    Network(String),

    /// History page or raw transaction could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local chain state could not be read or rolled back
    #[error("Chain error: {0}")]
    Chain(String),

    /// No unsigned transaction is cached for the address
    #[error("No pending transaction for {0}")]
    NotPending(String),

    /// Wallet core error
    #[error(transparent)]
    Core(#[from] airgap_core::Error),

    /// Malformed JSON
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether a later pass may succeed without intervention
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Network(_))
    }
}
