//! Network parameters and tunables for the air-gapped wallet core
//!
//! This crate provides address version bytes per network, the fixed
//! thresholds used by transaction admission and sync, and the
//! configuration layer shared by the other crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod network;

pub use config::WalletConfig;
pub use network::{Network, NetworkType};

/// Transactions with more outputs than this are candidates for output pruning.
pub const COMPRESS_OUT_NUM: usize = 5;

/// Maximum gap (in blocks) between the local tip and the remote tip that is
/// treated as a reorg and rolled back.
pub const ROLLBACK_WINDOW: u32 = 100;

/// Default number of unsigned transactions kept while waiting for a cold signature.
pub const PENDING_SIGNATURE_CAPACITY: usize = 32;

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid network specified
    #[error("Invalid network: {0}")]
    InvalidNetwork(String),

    /// Invalid configuration value
    #[error("Invalid config value for {key}: {value}")]
    InvalidValue {
        /// Configuration key
        key: String,
        /// Offending value
        value: String,
    },

    /// Configuration could not be parsed
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
