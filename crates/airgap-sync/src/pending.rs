//! Unsigned transactions waiting for a cold-device signature

use crate::error::{Error, Result};
use airgap_core::{decode_signatures, Transaction, UnsignedTransaction};
use airgap_params::PENDING_SIGNATURE_CAPACITY;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::{debug, info};

/// Bounded cache of unsigned transactions, one per sending address
///
/// Guarded by its own lock; never held together with the registry lock.
pub struct PendingSignatureCache {
    entries: Mutex<VecDeque<UnsignedTransaction>>,
    capacity: usize,
}

impl Default for PendingSignatureCache {
    fn default() -> Self {
        Self::new(PENDING_SIGNATURE_CAPACITY)
    }
}

impl PendingSignatureCache {
    /// Cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cache `tx`, replacing any entry for the same sender
    ///
    /// Returns the entry that was replaced or evicted to make room.
    pub fn add_unsigned_tx(&self, tx: UnsignedTransaction) -> Option<UnsignedTransaction> {
        let mut entries = self.entries.lock();
        let replaced = entries
            .iter()
            .position(|e| e.from_address == tx.from_address)
            .and_then(|i| entries.remove(i));

        let evicted = if replaced.is_none() && entries.len() >= self.capacity {
            entries.pop_front()
        } else {
            None
        };
        if let Some(old) = &evicted {
            debug!(address = %old.from_address, "evicted pending transaction");
        }

        entries.push_back(tx);
        replaced.or(evicted)
    }

    /// Cached transaction for `address`
    pub fn get_unsigned_tx(&self, address: &str) -> Option<UnsignedTransaction> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.from_address == address)
            .cloned()
    }

    /// Drop the entry for `address`; returns whether one existed
    pub fn remove_signed_tx(&self, address: &str) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.from_address == address) {
            Some(i) => {
                entries.remove(i);
                true
            }
            None => false,
        }
    }

    /// Apply a cold-device signature payload to the transaction cached for `address`
    ///
    /// On success the entry is removed and the signed transaction returned. A
    /// malformed payload or a signature count that does not match the inputs
    /// leaves the entry cached so the user can re-scan.
    pub fn apply_signatures(&self, address: &str, payload: &str) -> Result<Transaction> {
        let signatures = decode_signatures(payload)
            .ok_or_else(|| Error::Decode("unreadable signature payload".to_string()))?;

        let mut entries = self.entries.lock();
        let index = entries
            .iter()
            .position(|e| e.from_address == address)
            .ok_or_else(|| Error::NotPending(address.to_string()))?;

        let mut tx = entries[index].tx.clone();
        tx.sign_with_signatures(&signatures)?;
        entries.remove(index);

        info!(address, tx = %tx.hash, inputs = tx.inputs.len(), "signed pending transaction");
        Ok(tx)
    }

    /// Number of cached entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
