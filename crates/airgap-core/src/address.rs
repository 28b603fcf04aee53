//! Addresses known to the wallet and their base58check encoding

use crate::keys::EncryptedPrivateKey;
use crate::{Error, Result};
use airgap_params::Network;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a public-key or script hash
pub const HASH160_LEN: usize = 20;

const CHECKSUM_LEN: usize = 4;

/// An address tracked by the registry
///
/// Equality and hashing consider only the address string; flags and key
/// material change over the address's lifetime.
#[derive(Clone)]
pub struct Address {
    /// Network-encoded public-key hash
    pub address: String,
    /// Raw public key bytes
    pub pub_key: Vec<u8>,
    /// Encrypted private key, if this address carries one
    pub encrypted_priv_key: Option<EncryptedPrivateKey>,
    /// Insertion-order sort key (milliseconds, strictly increasing per list)
    pub sort_time: i64,
    /// Whether the wallet can sign for this address
    pub has_private_key: bool,
    /// Derived by the HD keychain
    pub is_hd: bool,
    /// Moved to trash
    pub is_trashed: bool,
    /// Key generated from an external entropy source
    pub is_from_xrandom: bool,
    /// Transaction history fully downloaded
    pub is_sync_complete: bool,
}

impl Address {
    /// Key-bearing address
    pub fn with_private_key(
        address: impl Into<String>,
        pub_key: Vec<u8>,
        encrypted_priv_key: EncryptedPrivateKey,
    ) -> Self {
        Self {
            encrypted_priv_key: Some(encrypted_priv_key),
            has_private_key: true,
            ..Self::watch_only(address, pub_key)
        }
    }

    /// Watch-only address
    pub fn watch_only(address: impl Into<String>, pub_key: Vec<u8>) -> Self {
        Self {
            address: address.into(),
            pub_key,
            encrypted_priv_key: None,
            sort_time: 0,
            has_private_key: false,
            is_hd: false,
            is_trashed: false,
            is_from_xrandom: false,
            is_sync_complete: false,
        }
    }

    /// Address derived by an HD keychain
    pub fn hd(address: impl Into<String>, pub_key: Vec<u8>) -> Self {
        Self {
            is_hd: true,
            ..Self::watch_only(address, pub_key)
        }
    }

    /// Mark the key as coming from an external entropy source
    pub fn from_xrandom(mut self) -> Self {
        self.is_from_xrandom = true;
        self
    }

    /// Set the initial sort key
    pub fn with_sort_time(mut self, sort_time: i64) -> Self {
        self.sort_time = sort_time;
        self
    }

    /// Replace the sealed private key
    pub fn with_encrypted_key(mut self, key: EncryptedPrivateKey) -> Self {
        self.encrypted_priv_key = Some(key);
        self
    }

    /// Watch-only: neither key-bearing nor HD-derived
    pub fn is_watch_only(&self) -> bool {
        !self.has_private_key && !self.is_hd
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Address {}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

// Key material stays out of logs.
impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Address")
            .field("address", &self.address)
            .field("sort_time", &self.sort_time)
            .field("has_private_key", &self.has_private_key)
            .field("is_hd", &self.is_hd)
            .field("is_trashed", &self.is_trashed)
            .field("is_sync_complete", &self.is_sync_complete)
            .finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

/// RIPEMD-160(SHA-256(data))
pub fn hash160(data: &[u8]) -> [u8; HASH160_LEN] {
    let digest = Ripemd160::digest(Sha256::digest(data));
    let mut out = [0u8; HASH160_LEN];
    out.copy_from_slice(&digest);
    out
}

/// Base58check-encode a version byte and hash
pub fn encode_address(hash: &[u8; HASH160_LEN], version: u8) -> String {
    let mut payload = Vec::with_capacity(1 + HASH160_LEN + CHECKSUM_LEN);
    payload.push(version);
    payload.extend_from_slice(hash);
    let check = checksum(&payload);
    payload.extend_from_slice(&check);
    bs58::encode(payload).into_string()
}

/// Decode a base58check address into its version byte and hash
pub fn decode_address(address: &str) -> Result<(u8, [u8; HASH160_LEN])> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;

    if decoded.len() != 1 + HASH160_LEN + CHECKSUM_LEN {
        return Err(Error::InvalidAddress(format!(
            "{}: decoded length {}",
            address,
            decoded.len()
        )));
    }

    let (payload, check) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if checksum(payload).as_slice() != check {
        return Err(Error::InvalidAddress(format!("{}: bad checksum", address)));
    }

    let mut hash = [0u8; HASH160_LEN];
    hash.copy_from_slice(&payload[1..]);
    Ok((payload[0], hash))
}

/// Whether `address` is a well-formed address of `network`
pub fn is_valid_address(address: &str, network: &Network) -> bool {
    matches!(decode_address(address), Ok((version, _)) if network.accepts_version(version))
}

/// Compact transport form: the hash without version byte, as uppercase hex
pub fn address_to_compact_hex(address: &str) -> Result<String> {
    let (_, hash) = decode_address(address)?;
    Ok(hex::encode_upper(hash))
}

/// Inverse of [`address_to_compact_hex`]; the hash is re-encoded as P2PKH
pub fn compact_hex_to_address(compact: &str, network: &Network) -> Result<String> {
    if compact.len() != HASH160_LEN * 2 {
        return Err(Error::InvalidAddress(format!(
            "compact address has {} hex chars",
            compact.len()
        )));
    }
    let bytes = hex::decode(compact)
        .map_err(|e| Error::InvalidAddress(format!("compact address: {}", e)))?;
    let mut hash = [0u8; HASH160_LEN];
    hash.copy_from_slice(&bytes);
    Ok(encode_address(&hash, network.p2pkh_version))
}

/// P2PKH address for a public key
pub fn address_from_public_key(pub_key: &[u8], network: &Network) -> String {
    encode_address(&hash160(pub_key), network.p2pkh_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let hash = [7u8; HASH160_LEN];
        let addr = encode_address(&hash, 0x00);
        assert!(addr.starts_with('1'));
        assert_eq!(decode_address(&addr).unwrap(), (0x00, hash));
        assert!(is_valid_address(&addr, &Network::mainnet()));
        assert!(!is_valid_address(&addr, &Network::testnet()));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let addr = encode_address(&[1u8; HASH160_LEN], 0x00);
        let mut chars: Vec<char> = addr.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '2' { '3' } else { '2' };
        let tampered: String = chars.into_iter().collect();
        assert!(decode_address(&tampered).is_err());
    }

    #[test]
    fn test_compact_hex() {
        let network = Network::mainnet();
        let addr = encode_address(&[0xab; HASH160_LEN], network.p2pkh_version);
        let compact = address_to_compact_hex(&addr).unwrap();
        assert_eq!(compact, "AB".repeat(HASH160_LEN));
        assert_eq!(compact_hex_to_address(&compact, &network).unwrap(), addr);
        assert!(compact_hex_to_address("2710", &network).is_err());
        assert!(compact_hex_to_address(&"zz".repeat(HASH160_LEN), &network).is_err());
    }

    #[test]
    fn test_hash160_known_vector() {
        // HASH160 of the empty string
        assert_eq!(
            hex::encode(hash160(b"")),
            "b472a266d0bd89c13706a4132ccfb16f7c3b9fcb"
        );
    }

    #[test]
    fn test_address_kinds() {
        let watch = Address::watch_only("a", vec![]);
        assert!(watch.is_watch_only());
        let hd = Address::hd("b", vec![]);
        assert!(!hd.is_watch_only());
        assert_eq!(watch, Address::hd("a", vec![1]));
    }
}
