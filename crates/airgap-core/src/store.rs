//! Persistence collaborators
//!
//! Every method is keyed by address string or transaction hash. Writes
//! either complete or return an error; the registry and admission layers
//! only touch in-memory state after a write has succeeded.

use crate::{Address, Result, Transaction, TxHash, TxInput};

/// Address and key storage
pub trait AddressStore: Send + Sync {
    /// Write the encrypted private key of an active address
    fn store_private_key(&self, address: &Address) -> Result<()>;

    /// Write the public record (public key, flags, sort key)
    fn store_public_record(&self, address: &Address, sort_time: i64) -> Result<()>;

    /// Stop tracking a watch-only address
    fn remove_watch_only(&self, address: &Address) -> Result<()>;

    /// Move an address's key material to the trash
    fn trash_private_key(&self, address: &Address) -> Result<()>;

    /// Move key material back out of the trash
    fn restore_private_key(&self, address: &Address) -> Result<()>;

    /// Write the encrypted private key of a trashed address
    fn store_trash_key(&self, address: &Address) -> Result<()>;

    /// Persist the sync-complete flag
    fn update_sync_complete(&self, address: &Address) -> Result<()>;

    /// Key-bearing addresses, any order
    fn load_private_key_addresses(&self) -> Result<Vec<Address>>;

    /// Watch-only addresses, any order
    fn load_watch_only_addresses(&self) -> Result<Vec<Address>>;

    /// Trashed addresses, any order
    fn load_trash_addresses(&self) -> Result<Vec<Address>>;
}

/// Balance source; the registry never caches balances
pub trait BalanceLedger: Send + Sync {
    /// Confirmed plus pending balance of `address`
    fn balance(&self, address: &str) -> Result<u64>;
}

/// Transaction storage
///
/// Implementations must be safe for concurrent callers. `add` must be
/// idempotent per hash.
pub trait TxStore: Send + Sync {
    /// Whether a transaction with this hash is stored
    fn tx_exists(&self, hash: &TxHash) -> Result<bool>;

    /// Whether `tx` spends an output already spent by a different confirmed transaction
    fn is_double_spend_with_confirmed(&self, tx: &Transaction) -> Result<bool>;

    /// Address that owned the output spent by `input`, if known
    fn input_address(&self, input: &TxInput) -> Result<Option<String>>;

    /// Whether `input` spends an output of a transaction we sent
    fn is_sent_by_me(&self, input: &TxInput) -> Result<bool>;

    /// Store a transaction; returns false if the hash was already present
    fn add(&self, tx: &Transaction) -> Result<bool>;

    /// Replace the stored history of `address` with `txs`
    fn init_address_txs(&self, address: &str, txs: &[Transaction]) -> Result<()>;
}
