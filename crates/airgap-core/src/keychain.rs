//! HD keychain collaborator
//!
//! Derivation internals live outside this crate. The registry only needs
//! the derived addresses, a way to hear about new derivations, and access
//! to the keychain's encrypted seed for password changes.

use crate::{Address, EncryptedPrivateKey, Result};
use std::sync::Arc;

/// Receives newly derived addresses
pub trait AddressSink: Send + Sync {
    /// Called once per derived address
    fn address_added(&self, address: &str);
}

/// Deterministic address generator attached to the registry
///
/// Implementations must not hold their own locks while calling the sink,
/// and must not call it from inside [`Keychain::set_address_sink`].
pub trait Keychain: Send + Sync {
    /// Identifier of the seed this keychain derives from
    fn seed_id(&self) -> u32;

    /// Addresses derived so far, in derivation order
    fn addresses(&self) -> Vec<Address>;

    /// Register the observer for future derivations
    fn set_address_sink(&self, sink: Arc<dyn AddressSink>);

    /// Encrypted seed material, if the keychain holds any
    fn encrypted_seed(&self) -> Option<EncryptedPrivateKey>;

    /// Replace the persisted encrypted seed
    fn store_encrypted_seed(&self, seed: EncryptedPrivateKey) -> Result<()>;

    /// Persist the sync-complete flag of a derived address
    fn update_sync_complete(&self, address: &str) -> Result<()>;
}
