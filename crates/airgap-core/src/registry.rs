//! Address registry
//!
//! Owns the private-key, watch-only and trash lists plus the membership
//! index. All four live in one struct behind one lock so that readers never
//! observe an address in two lists or an index entry without its list entry.
//!
//! Lists are kept newest-first. Each insertion at the head gets the sort key
//! `max(now, head.sort_time + len)`, which stays strictly increasing even
//! when the clock stalls or steps backwards.

use crate::keychain::{AddressSink, Keychain};
use crate::store::{AddressStore, BalanceLedger};
use crate::{Address, EncryptedPrivateKey, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

/// Millisecond time source for sort keys
pub trait Clock: Send + Sync {
    /// Current time in milliseconds
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[derive(Default)]
struct RegistryState {
    private_keys: Vec<Address>,
    watch_only: Vec<Address>,
    trash: Vec<Address>,
    index: HashSet<String>,
    keychain: Option<Arc<dyn Keychain>>,
}

impl RegistryState {
    fn in_trash(&self, address: &str) -> bool {
        self.trash.iter().any(|a| a.address == address)
    }

    fn hd_addresses(&self) -> Vec<Address> {
        match &self.keychain {
            Some(keychain) => keychain
                .addresses()
                .into_iter()
                .filter(|a| !self.in_trash(&a.address))
                .collect(),
            None => Vec::new(),
        }
    }

    fn all_addresses(&self) -> Vec<Address> {
        let mut all = Vec::with_capacity(self.private_keys.len() + self.watch_only.len());
        all.extend(self.private_keys.iter().cloned());
        all.extend(self.watch_only.iter().cloned());
        all.extend(self.hd_addresses());
        all
    }
}

fn position(list: &[Address], address: &str) -> Option<usize> {
    list.iter().position(|a| a.address == address)
}

fn next_sort_time(list: &[Address], now: i64) -> i64 {
    match list.first() {
        Some(head) => now.max(head.sort_time + list.len() as i64),
        None => now,
    }
}

fn logged<T>(result: Result<T>, op: &'static str, address: &str) -> Result<T> {
    result.inspect_err(|e| warn!(address, op, error = %e, "persistence failed"))
}

fn reencrypt_all<'a>(
    addresses: impl Iterator<Item = &'a Address>,
    old_password: &str,
    new_password: &str,
) -> Option<Vec<EncryptedPrivateKey>> {
    addresses
        .map(|a| {
            let Some(key) = a.encrypted_priv_key.as_ref() else {
                debug!(address = %a, "no key material loaded");
                return None;
            };
            key.change_password(old_password, new_password)
                .inspect_err(|e| debug!(address = %a, error = %e, "re-encryption failed"))
                .ok()
        })
        .collect()
}

/// Feeds keychain derivations into the membership index
struct IndexSink {
    state: Weak<Mutex<RegistryState>>,
}

impl AddressSink for IndexSink {
    fn address_added(&self, address: &str) {
        if let Some(state) = self.state.upgrade() {
            state.lock().index.insert(address.to_string());
            debug!(address, "indexed derived address");
        }
    }
}

/// Registry of every address the wallet knows about
pub struct AddressRegistry {
    state: Arc<Mutex<RegistryState>>,
    store: Arc<dyn AddressStore>,
    ledger: Arc<dyn BalanceLedger>,
    clock: Arc<dyn Clock>,
}

impl AddressRegistry {
    /// Empty registry
    pub fn new(store: Arc<dyn AddressStore>, ledger: Arc<dyn BalanceLedger>) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            store,
            ledger,
            clock: Arc::new(SystemClock),
        }
    }

    /// Rebuild the lists from persisted records, newest first
    pub fn load(store: Arc<dyn AddressStore>, ledger: Arc<dyn BalanceLedger>) -> Result<Self> {
        let mut private_keys = store.load_private_key_addresses()?;
        let mut watch_only = store.load_watch_only_addresses()?;
        let mut trash = store.load_trash_addresses()?;

        for list in [&mut private_keys, &mut watch_only, &mut trash] {
            list.sort_by(|a, b| b.sort_time.cmp(&a.sort_time));
        }
        for address in &mut trash {
            address.is_trashed = true;
        }

        let index = private_keys
            .iter()
            .chain(watch_only.iter())
            .map(|a| a.address.clone())
            .collect();

        info!(
            private_keys = private_keys.len(),
            watch_only = watch_only.len(),
            trash = trash.len(),
            "address registry loaded"
        );

        Ok(Self {
            state: Arc::new(Mutex::new(RegistryState {
                private_keys,
                watch_only,
                trash,
                index,
                keychain: None,
            })),
            store,
            ledger,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the sort-key time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Register a key-bearing or watch-only address
    ///
    /// Returns `Ok(false)` if the address is already registered or is HD-derived.
    /// A key-bearing address found in the trash is restored instead of
    /// written fresh. Nothing changes in memory unless every write succeeds.
    pub fn add_address(&self, mut address: Address) -> Result<bool> {
        let mut state = self.state.lock();

        if address.is_hd {
            debug!(address = %address, "derived addresses belong to the keychain");
            return Ok(false);
        }
        if state.index.contains(&address.address) {
            debug!(address = %address, "address already registered");
            return Ok(false);
        }

        let now = self.clock.now_millis();
        if address.has_private_key {
            let sort_time = next_sort_time(&state.private_keys, now);
            address.sort_time = sort_time;
            address.is_trashed = false;

            match position(&state.trash, &address.address) {
                Some(pos) if state.trash[pos].is_hd => {
                    debug!(address = %address, "trashed derived address belongs to the keychain");
                    return Ok(false);
                }
                Some(pos) => {
                    if address.encrypted_priv_key.is_none() {
                        address.encrypted_priv_key = state.trash[pos].encrypted_priv_key.clone();
                    }
                    logged(
                        self.store.restore_private_key(&address),
                        "restore_private_key",
                        &address.address,
                    )?;
                    if let Err(e) = logged(
                        self.store.store_public_record(&address, sort_time),
                        "store_public_record",
                        &address.address,
                    ) {
                        self.undo_restore(&state.trash[pos]);
                        return Err(e);
                    }
                    state.trash.remove(pos);
                    info!(address = %address, sort_time, "restored trashed address");
                }
                None => {
                    logged(
                        self.store.store_private_key(&address),
                        "store_private_key",
                        &address.address,
                    )?;
                    logged(
                        self.store.store_public_record(&address, sort_time),
                        "store_public_record",
                        &address.address,
                    )?;
                    info!(address = %address, sort_time, "added private key address");
                }
            }

            state.index.insert(address.address.clone());
            state.private_keys.insert(0, address);
        } else {
            let sort_time = next_sort_time(&state.watch_only, now);
            address.sort_time = sort_time;
            logged(
                self.store.store_public_record(&address, sort_time),
                "store_public_record",
                &address.address,
            )?;
            info!(address = %address, sort_time, "added watch-only address");

            state.index.insert(address.address.clone());
            state.watch_only.insert(0, address);
        }

        Ok(true)
    }

    /// Stop monitoring a watch-only address
    pub fn stop_monitor(&self, address: &str) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(pos) = position(&state.watch_only, address) else {
            debug!(address, "not a watch-only address");
            return Ok(false);
        };

        logged(
            self.store.remove_watch_only(&state.watch_only[pos]),
            "remove_watch_only",
            address,
        )?;
        state.watch_only.remove(pos);
        state.index.remove(address);
        info!(address, "stopped monitoring");
        Ok(true)
    }

    /// Move a zero-balance key-bearing or HD address to the trash
    pub fn trash_private_key(&self, address: &str) -> Result<bool> {
        let mut state = self.state.lock();

        let (pos, mut target) = match position(&state.private_keys, address) {
            Some(pos) => (Some(pos), state.private_keys[pos].clone()),
            None => match state.hd_addresses().into_iter().find(|a| a.address == address) {
                Some(hd) => (None, hd),
                None => {
                    debug!(address, "only key-bearing or derived addresses can be trashed");
                    return Ok(false);
                }
            },
        };

        let balance = self.ledger.balance(address)?;
        if balance != 0 {
            debug!(address, balance, "refusing to trash a funded address");
            return Ok(false);
        }

        logged(
            self.store.trash_private_key(&target),
            "trash_private_key",
            address,
        )?;

        if let Some(pos) = pos {
            state.private_keys.remove(pos);
        }
        target.is_trashed = true;
        state.index.remove(address);
        state.trash.push(target);
        info!(address, "address trashed");
        Ok(true)
    }

    /// Bring an address back from the trash
    ///
    /// Fails with the store's error if the key material cannot be recovered.
    pub fn restore_private_key(&self, address: &str) -> Result<bool> {
        let mut state = self.state.lock();

        let Some(pos) = position(&state.trash, address) else {
            debug!(address, "address is not in the trash");
            return Ok(false);
        };
        let mut target = state.trash[pos].clone();
        if !target.has_private_key && !target.is_hd {
            return Ok(false);
        }

        logged(
            self.store.restore_private_key(&target),
            "restore_private_key",
            address,
        )?;
        target.is_trashed = false;

        if target.has_private_key && !target.is_hd {
            let sort_time = next_sort_time(&state.private_keys, self.clock.now_millis());
            target.sort_time = sort_time;
            if let Err(e) = logged(
                self.store.store_public_record(&target, sort_time),
                "store_public_record",
                address,
            ) {
                self.undo_restore(&state.trash[pos]);
                return Err(e);
            }
            state.trash.remove(pos);
            state.private_keys.insert(0, target);
        } else {
            state.trash.remove(pos);
        }

        state.index.insert(address.to_string());
        info!(address, "address restored");
        Ok(true)
    }

    /// Private-key list, then watch-only list, then keychain addresses
    pub fn get_all_addresses(&self) -> Vec<Address> {
        self.state.lock().all_addresses()
    }

    /// Attach the HD keychain
    ///
    /// # Panics
    ///
    /// Panics if a keychain with a different seed is already attached.
    pub fn set_keychain(&self, keychain: Arc<dyn Keychain>) {
        let mut state = self.state.lock();

        if let Some(current) = &state.keychain {
            if current.seed_id() != keychain.seed_id() {
                panic!(
                    "cannot attach keychain {} while keychain {} is attached",
                    keychain.seed_id(),
                    current.seed_id()
                );
            }
            return;
        }

        let derived = keychain.addresses();
        for address in &derived {
            if !state.in_trash(&address.address) {
                state.index.insert(address.address.clone());
            }
        }
        keychain.set_address_sink(Arc::new(IndexSink {
            state: Arc::downgrade(&self.state),
        }));

        info!(
            seed_id = keychain.seed_id(),
            addresses = derived.len(),
            "keychain attached"
        );
        state.keychain = Some(keychain);
    }

    /// Re-encrypt every stored key under a new password
    ///
    /// All re-encryptions are computed before anything is written; if any of
    /// them fails the call returns `Ok(false)` and no stored ciphertext changes.
    /// If a write fails, keys already written are put back under the old
    /// password and the store error is returned with memory untouched.
    ///
    /// # Panics
    ///
    /// Panics if the number of re-encrypted keys does not match the lists.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<bool> {
        let mut state = self.state.lock();

        if state.private_keys.is_empty() && state.trash.is_empty() && state.keychain.is_none() {
            return Ok(true);
        }

        let Some(private_keys) =
            reencrypt_all(state.private_keys.iter(), old_password, new_password)
        else {
            return Ok(false);
        };
        let Some(trash) = reencrypt_all(
            state.trash.iter().filter(|a| !a.is_hd),
            old_password,
            new_password,
        ) else {
            return Ok(false);
        };
        let seed = match state.keychain.as_ref().and_then(|k| k.encrypted_seed()) {
            Some(seed) => match seed.change_password(old_password, new_password) {
                Ok(seed) => Some(seed),
                Err(e) => {
                    debug!(error = %e, "keychain seed re-encryption failed");
                    return Ok(false);
                }
            },
            None => None,
        };

        assert_eq!(
            private_keys.len(),
            state.private_keys.len(),
            "re-encrypted key count does not match private key list"
        );
        assert_eq!(
            trash.len(),
            state.trash.iter().filter(|a| !a.is_hd).count(),
            "re-encrypted key count does not match trash list"
        );

        let updated_keys: Vec<Address> = state
            .private_keys
            .iter()
            .zip(private_keys)
            .map(|(a, key)| a.clone().with_encrypted_key(key))
            .collect();
        let updated_trash: Vec<Address> = state
            .trash
            .iter()
            .filter(|a| !a.is_hd)
            .zip(trash)
            .map(|(a, key)| a.clone().with_encrypted_key(key))
            .collect();

        self.commit_password_change(&state, &updated_keys, &updated_trash, seed)?;

        state.private_keys = updated_keys;
        let mut updated_trash = updated_trash.into_iter();
        for slot in state.trash.iter_mut().filter(|a| !a.is_hd) {
            if let Some(updated) = updated_trash.next() {
                *slot = updated;
            }
        }

        info!("password changed");
        Ok(true)
    }

    /// Write re-encrypted keys and seed; on failure, put back what was written
    fn commit_password_change(
        &self,
        state: &RegistryState,
        keys: &[Address],
        trash: &[Address],
        seed: Option<EncryptedPrivateKey>,
    ) -> Result<()> {
        let old_trash: Vec<&Address> = state.trash.iter().filter(|a| !a.is_hd).collect();

        for (i, updated) in keys.iter().enumerate() {
            let written = self.store.store_private_key(updated);
            if let Err(e) = logged(written, "store_private_key", &updated.address) {
                self.revert_keys(&state.private_keys[..i], &[]);
                return Err(e);
            }
        }
        for (i, updated) in trash.iter().enumerate() {
            let written = self.store.store_trash_key(updated);
            if let Err(e) = logged(written, "store_trash_key", &updated.address) {
                self.revert_keys(&state.private_keys, &old_trash[..i]);
                return Err(e);
            }
        }
        if let (Some(keychain), Some(seed)) = (&state.keychain, seed) {
            if let Err(e) = keychain.store_encrypted_seed(seed) {
                warn!(error = %e, "storing re-encrypted seed failed");
                self.revert_keys(&state.private_keys, &old_trash);
                return Err(e);
            }
        }
        Ok(())
    }

    fn revert_keys(&self, keys: &[Address], trash: &[&Address]) {
        for old in keys {
            if let Err(e) = self.store.store_private_key(old) {
                error!(address = %old, error = %e, "could not restore previous key");
            }
        }
        for old in trash {
            if let Err(e) = self.store.store_trash_key(old) {
                error!(address = %old, error = %e, "could not restore previous trash key");
            }
        }
    }

    /// Put a restored key back in the trash after a later write failed
    fn undo_restore(&self, trashed: &Address) {
        if let Err(e) = self.store.trash_private_key(trashed) {
            error!(address = %trashed, error = %e, "could not return key to trash");
        }
    }

    /// Whether every registered address has finished its history sync
    pub fn address_is_sync_complete(&self) -> bool {
        self.state
            .lock()
            .all_addresses()
            .iter()
            .all(|a| a.is_sync_complete)
    }

    /// Mark an address's history as fully downloaded
    pub fn complete_sync(&self, address: &str) -> Result<bool> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for list in [&mut state.private_keys, &mut state.watch_only] {
            if let Some(slot) = list.iter_mut().find(|a| a.address == address) {
                let mut updated = slot.clone();
                updated.is_sync_complete = true;
                logged(
                    self.store.update_sync_complete(&updated),
                    "update_sync_complete",
                    address,
                )?;
                *slot = updated;
                return Ok(true);
            }
        }

        if let Some(keychain) = &state.keychain {
            if keychain.addresses().iter().any(|a| a.address == address) {
                keychain.update_sync_complete(address)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Key-bearing addresses, newest first
    pub fn private_key_addresses(&self) -> Vec<Address> {
        self.state.lock().private_keys.clone()
    }

    /// Watch-only addresses, newest first
    pub fn watch_only_addresses(&self) -> Vec<Address> {
        self.state.lock().watch_only.clone()
    }

    /// Trashed addresses
    pub fn trash_addresses(&self) -> Vec<Address> {
        self.state.lock().trash.clone()
    }

    /// Snapshot of the membership index
    pub fn address_set(&self) -> HashSet<String> {
        self.state.lock().index.clone()
    }

    /// Whether `address` is in the membership index
    pub fn contains(&self, address: &str) -> bool {
        self.state.lock().index.contains(address)
    }

    /// Run `f` against the membership index under the registry lock
    pub fn with_index<R>(&self, f: impl FnOnce(&HashSet<String>) -> R) -> R {
        f(&self.state.lock().index)
    }

    /// Whether a keychain is attached
    pub fn has_keychain(&self) -> bool {
        self.state.lock().keychain.is_some()
    }

    /// The attached keychain
    pub fn keychain(&self) -> Option<Arc<dyn Keychain>> {
        self.state.lock().keychain.clone()
    }
}
