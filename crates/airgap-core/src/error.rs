//! Error types for the wallet core
//!
//! Expected rejections (duplicates, double spends, illegal lifecycle moves)
//! are reported as `Ok(false)` by the operations themselves. The variants
//! here cover persistence failures, key handling and malformed input.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid address format or checksum
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid key material
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Encryption or decryption failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Wrong password for encrypted key material
    #[error("Wrong password")]
    WrongPassword,

    /// Invalid transaction
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Transport payload could not be built or parsed
    #[error("Transport error: {0}")]
    Transport(String),

    /// Persistence collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Keychain collaborator failed
    #[error("Keychain error: {0}")]
    Keychain(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidAddress(_) | Error::WrongPassword | Error::Transport(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InvalidAddress(_) => {
                "The address is invalid. Please check and try again.".to_string()
            }
            Error::WrongPassword => "The password is incorrect.".to_string(),
            Error::Transport(_) => {
                "The QR code could not be read. Please scan it again.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidAddress(_) | Error::InvalidTransaction(_) => ErrorCategory::Rejected,
            Error::Transport(_) => ErrorCategory::Protocol,
            Error::InvalidKey(_)
            | Error::Encryption(_)
            | Error::WrongPassword
            | Error::Keychain(_) => ErrorCategory::Keys,
            Error::Persistence(_) | Error::Io(_) => ErrorCategory::Persistence,
            Error::Serialization(_) | Error::Other(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Input failed validation
    Rejected,
    /// Key or record writes failed
    Persistence,
    /// Transport payload malformed
    Protocol,
    /// Key material or keychain problems
    Keys,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Rejected => write!(f, "Rejected"),
            ErrorCategory::Persistence => write!(f, "Persistence"),
            ErrorCategory::Protocol => write!(f, "Protocol"),
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
