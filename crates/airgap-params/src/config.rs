//! Wallet configuration
//!
//! Values come from defaults, a JSON document, or `AIRGAP_*` environment
//! variables. Unset variables keep their defaults.

use crate::network::{Network, NetworkType};
use crate::{Error, Result, COMPRESS_OUT_NUM, PENDING_SIGNATURE_CAPACITY, ROLLBACK_WINDOW};
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

/// Environment variable selecting the network
pub const ENV_NETWORK: &str = "AIRGAP_NETWORK";
/// Environment variable overriding the output-pruning threshold
pub const ENV_COMPRESS_OUT_NUM: &str = "AIRGAP_COMPRESS_OUT_NUM";
/// Environment variable overriding the reorg rollback window
pub const ENV_ROLLBACK_WINDOW: &str = "AIRGAP_ROLLBACK_WINDOW";
/// Environment variable overriding the pending-signature cache size
pub const ENV_PENDING_CAPACITY: &str = "AIRGAP_PENDING_CAPACITY";

/// Tunables shared by admission and sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Network the wallet operates on
    pub network: NetworkType,
    /// Output count above which foreign transactions are pruned
    pub compress_out_threshold: usize,
    /// Tip gap (blocks) below which a lagging remote tip triggers rollback
    pub rollback_window: u32,
    /// Maximum number of unsigned transactions awaiting a cold signature
    pub pending_capacity: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            network: NetworkType::Mainnet,
            compress_out_threshold: COMPRESS_OUT_NUM,
            rollback_window: ROLLBACK_WINDOW,
            pending_capacity: PENDING_SIGNATURE_CAPACITY,
        }
    }
}

impl WalletConfig {
    /// Parse a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from `AIRGAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (environment, settings store, ...)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(network) = value(ENV_NETWORK) {
            config.network = network.parse()?;
        }
        if let Some(raw) = value(ENV_COMPRESS_OUT_NUM) {
            config.compress_out_threshold = parse_number(ENV_COMPRESS_OUT_NUM, &raw)?;
        }
        if let Some(raw) = value(ENV_ROLLBACK_WINDOW) {
            config.rollback_window = parse_number(ENV_ROLLBACK_WINDOW, &raw)?;
        }
        if let Some(raw) = value(ENV_PENDING_CAPACITY) {
            config.pending_capacity = parse_number(ENV_PENDING_CAPACITY, &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Network parameters for the configured network
    pub fn network(&self) -> Network {
        Network::from_type(self.network)
    }

    fn validate(&self) -> Result<()> {
        if self.pending_capacity == 0 {
            return Err(Error::InvalidValue {
                key: "pending_capacity".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| Error::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
