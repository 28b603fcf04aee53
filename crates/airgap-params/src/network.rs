//! Network definitions

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Network type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Mainnet
    Mainnet,
    /// Testnet
    Testnet,
}

impl FromStr for NetworkType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mainnet" | "main" => Ok(NetworkType::Mainnet),
            "testnet" | "test" => Ok(NetworkType::Testnet),
            other => Err(crate::Error::InvalidNetwork(other.to_string())),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Network type
    pub network_type: NetworkType,
    /// Human-readable name
    pub name: &'static str,
    /// Version byte prepended to pay-to-pubkey-hash addresses
    pub p2pkh_version: u8,
    /// Version byte prepended to pay-to-script-hash addresses
    pub p2sh_version: u8,
}

impl Network {
    /// Get mainnet parameters
    pub const fn mainnet() -> Self {
        Self {
            network_type: NetworkType::Mainnet,
            name: "mainnet",
            p2pkh_version: 0x00,
            p2sh_version: 0x05,
        }
    }

    /// Get testnet parameters
    pub const fn testnet() -> Self {
        Self {
            network_type: NetworkType::Testnet,
            name: "testnet",
            p2pkh_version: 0x6f,
            p2sh_version: 0xc4,
        }
    }

    /// Get network by type
    pub const fn from_type(network_type: NetworkType) -> Self {
        match network_type {
            NetworkType::Mainnet => Self::mainnet(),
            NetworkType::Testnet => Self::testnet(),
        }
    }

    /// Whether `version` is an address version byte of this network
    pub const fn accepts_version(&self, version: u8) -> bool {
        version == self.p2pkh_version || version == self.p2sh_version
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::mainnet()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mainnet_params() {
        let net = Network::mainnet();
        assert_eq!(net.network_type, NetworkType::Mainnet);
        assert_eq!(net.p2pkh_version, 0x00);
        assert!(net.accepts_version(0x05));
        assert!(!net.accepts_version(0x6f));
    }

    #[test]
    fn test_network_from_type() {
        let net = Network::from_type(NetworkType::Testnet);
        assert_eq!(net.network_type, NetworkType::Testnet);
        assert_eq!(net.p2pkh_version, 0x6f);
    }

    #[test]
    fn test_network_type_parse() {
        assert_eq!("MAINNET".parse::<NetworkType>().unwrap(), NetworkType::Mainnet);
        assert_eq!("test".parse::<NetworkType>().unwrap(), NetworkType::Testnet);
        assert!("regtest".parse::<NetworkType>().is_err());
    }
}
