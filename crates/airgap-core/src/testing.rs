//! In-memory collaborators for tests
//!
//! Enabled for this crate's own tests and, through the `test-helpers`
//! feature, for downstream crates.

use crate::keychain::{AddressSink, Keychain};
use crate::registry::Clock;
use crate::store::{AddressStore, BalanceLedger, TxStore};
use crate::{
    encode_address, Address, EncryptedPrivateKey, Error, KdfParams, NotificationKind, Result,
    Transaction, TxHash, TxInput, TxNotifier,
};
use airgap_params::Network;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Mainnet P2PKH address whose hash is `seed` repeated
pub fn sample_address(seed: u8) -> String {
    encode_address(&[seed; 20], Network::mainnet().p2pkh_version)
}

/// Transaction hash of `seed` repeated
pub fn sample_tx_hash(seed: u8) -> TxHash {
    TxHash([seed; 32])
}

/// Watch-only address for `seed`
pub fn watch_address(seed: u8) -> Address {
    Address::watch_only(sample_address(seed), vec![seed; 33])
}

/// Key-bearing address for `seed`, sealed under `password` with light KDF costs
pub fn key_address(seed: u8, password: &str) -> Address {
    let key = EncryptedPrivateKey::encrypt(&[seed; 32], password, KdfParams::light())
        .expect("encrypt test key");
    Address::with_private_key(sample_address(seed), vec![seed; 33], key)
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    /// Clock stopped at `millis`
    pub fn new(millis: i64) -> Self {
        Self(AtomicI64::new(millis))
    }

    /// Move the clock
    pub fn set(&self, millis: i64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct AddressTables {
    private_keys: BTreeMap<String, Address>,
    watch_only: BTreeMap<String, Address>,
    trash: BTreeMap<String, Address>,
}

/// Address store backed by maps
#[derive(Default)]
pub struct MemoryAddressStore {
    tables: Mutex<AddressTables>,
    fail_writes: AtomicBool,
    fail_at: Mutex<Option<usize>>,
    attempts: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryAddressStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only the `n`th write attempt from now fail (1-based)
    pub fn fail_nth_write(&self, n: usize) {
        let attempts = self.attempts.load(Ordering::SeqCst);
        *self.fail_at.lock() = Some(attempts + n);
    }

    /// Number of successful writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Persisted key of an active or trashed address
    pub fn stored_key(&self, address: &str) -> Option<EncryptedPrivateKey> {
        let tables = self.tables.lock();
        tables
            .private_keys
            .get(address)
            .or_else(|| tables.trash.get(address))
            .and_then(|a| a.encrypted_priv_key.clone())
    }

    /// Persisted record of an address in any table
    pub fn record(&self, address: &str) -> Option<Address> {
        let tables = self.tables.lock();
        tables
            .private_keys
            .get(address)
            .or_else(|| tables.watch_only.get(address))
            .or_else(|| tables.trash.get(address))
            .cloned()
    }

    /// Seed a record directly, bypassing the registry
    pub fn insert(&self, address: Address) {
        let mut tables = self.tables.lock();
        let table = if address.is_trashed {
            &mut tables.trash
        } else if address.has_private_key {
            &mut tables.private_keys
        } else {
            &mut tables.watch_only
        };
        table.insert(address.address.clone(), address);
    }

    fn write<T>(&self, f: impl FnOnce(&mut AddressTables) -> Result<T>) -> Result<T> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Persistence("injected write failure".to_string()));
        }
        {
            let mut fail_at = self.fail_at.lock();
            if *fail_at == Some(attempt) {
                *fail_at = None;
                return Err(Error::Persistence("disk full".to_string()));
            }
        }
        let result = f(&mut self.tables.lock())?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(result)
    }
}

impl AddressStore for MemoryAddressStore {
    fn store_private_key(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            t.private_keys
                .entry(address.address.clone())
                .or_insert_with(|| address.clone())
                .encrypted_priv_key = address.encrypted_priv_key.clone();
            Ok(())
        })
    }

    fn store_public_record(&self, address: &Address, sort_time: i64) -> Result<()> {
        self.write(|t| {
            let table = if address.has_private_key {
                &mut t.private_keys
            } else {
                &mut t.watch_only
            };
            let record = address.clone().with_sort_time(sort_time);
            table.insert(address.address.clone(), record);
            Ok(())
        })
    }

    fn remove_watch_only(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            t.watch_only.remove(&address.address);
            Ok(())
        })
    }

    fn trash_private_key(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            let mut record = t
                .private_keys
                .remove(&address.address)
                .unwrap_or_else(|| address.clone());
            record.is_trashed = true;
            t.trash.insert(address.address.clone(), record);
            Ok(())
        })
    }

    fn restore_private_key(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            let mut record = t.trash.remove(&address.address).ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no trashed key for {}", address.address),
                ))
            })?;
            record.is_trashed = false;
            if record.has_private_key {
                t.private_keys.insert(address.address.clone(), record);
            }
            Ok(())
        })
    }

    fn store_trash_key(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            t.trash
                .entry(address.address.clone())
                .or_insert_with(|| address.clone())
                .encrypted_priv_key = address.encrypted_priv_key.clone();
            Ok(())
        })
    }

    fn update_sync_complete(&self, address: &Address) -> Result<()> {
        self.write(|t| {
            for table in [&mut t.private_keys, &mut t.watch_only] {
                if let Some(record) = table.get_mut(&address.address) {
                    record.is_sync_complete = address.is_sync_complete;
                }
            }
            Ok(())
        })
    }

    fn load_private_key_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.tables.lock().private_keys.values().cloned().collect())
    }

    fn load_watch_only_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.tables.lock().watch_only.values().cloned().collect())
    }

    fn load_trash_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.tables.lock().trash.values().cloned().collect())
    }
}

/// Balance ledger backed by a map; unknown addresses hold nothing
#[derive(Default)]
pub struct MemoryLedger {
    balances: Mutex<HashMap<String, u64>>,
}

impl MemoryLedger {
    /// Empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the balance of `address`
    pub fn set_balance(&self, address: &str, balance: u64) {
        self.balances.lock().insert(address.to_string(), balance);
    }
}

impl BalanceLedger for MemoryLedger {
    fn balance(&self, address: &str) -> Result<u64> {
        Ok(self.balances.lock().get(address).copied().unwrap_or(0))
    }
}

/// Transaction store backed by maps
#[derive(Default)]
pub struct MemoryTxStore {
    txs: Mutex<HashMap<TxHash, Transaction>>,
    input_addresses: Mutex<HashMap<(TxHash, u32), String>>,
    sent: Mutex<HashSet<TxHash>>,
    histories: Mutex<HashMap<String, Vec<Transaction>>>,
    adds: AtomicUsize,
    fail_init: AtomicBool,
}

impl MemoryTxStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record which address owned the output `(hash, index)`
    pub fn set_input_address(&self, hash: TxHash, index: u32, address: &str) {
        self.input_addresses
            .lock()
            .insert((hash, index), address.to_string());
    }

    /// Mark `hash` as a transaction this wallet sent
    pub fn mark_sent(&self, hash: TxHash) {
        self.sent.lock().insert(hash);
    }

    /// Store a transaction directly
    pub fn insert(&self, tx: Transaction) {
        self.txs.lock().insert(tx.hash, tx);
    }

    /// Stored copy of a transaction
    pub fn get(&self, hash: &TxHash) -> Option<Transaction> {
        self.txs.lock().get(hash).cloned()
    }

    /// Number of successful `add` calls that inserted a transaction
    pub fn adds(&self) -> usize {
        self.adds.load(Ordering::SeqCst)
    }

    /// History written by `init_address_txs`
    pub fn history(&self, address: &str) -> Option<Vec<Transaction>> {
        self.histories.lock().get(address).cloned()
    }

    /// Make `init_address_txs` fail
    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }
}

impl TxStore for MemoryTxStore {
    fn tx_exists(&self, hash: &TxHash) -> Result<bool> {
        Ok(self.txs.lock().contains_key(hash))
    }

    fn is_double_spend_with_confirmed(&self, tx: &Transaction) -> Result<bool> {
        let spent: HashSet<(TxHash, u32)> = tx
            .inputs
            .iter()
            .map(|i| (i.prev_tx_hash, i.prev_out_index))
            .collect();
        Ok(self.txs.lock().values().any(|stored| {
            stored.hash != tx.hash
                && stored.is_confirmed()
                && stored
                    .inputs
                    .iter()
                    .any(|i| spent.contains(&(i.prev_tx_hash, i.prev_out_index)))
        }))
    }

    fn input_address(&self, input: &TxInput) -> Result<Option<String>> {
        Ok(self
            .input_addresses
            .lock()
            .get(&(input.prev_tx_hash, input.prev_out_index))
            .cloned())
    }

    fn is_sent_by_me(&self, input: &TxInput) -> Result<bool> {
        Ok(self.sent.lock().contains(&input.prev_tx_hash))
    }

    fn add(&self, tx: &Transaction) -> Result<bool> {
        let mut txs = self.txs.lock();
        if txs.contains_key(&tx.hash) {
            return Ok(false);
        }
        txs.insert(tx.hash, tx.clone());
        self.adds.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    fn init_address_txs(&self, address: &str, txs: &[Transaction]) -> Result<()> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(Error::Persistence("injected init failure".to_string()));
        }
        self.histories
            .lock()
            .insert(address.to_string(), txs.to_vec());
        let mut stored = self.txs.lock();
        for tx in txs {
            stored.entry(tx.hash).or_insert_with(|| tx.clone());
        }
        Ok(())
    }
}

/// Keychain whose derivations are driven by the test
pub struct StaticKeychain {
    seed_id: u32,
    addresses: Mutex<Vec<Address>>,
    sink: Mutex<Option<Arc<dyn AddressSink>>>,
    seed: Mutex<Option<EncryptedPrivateKey>>,
    fail_seed_writes: AtomicBool,
}

impl StaticKeychain {
    /// Keychain with no derived addresses and no seed material
    pub fn new(seed_id: u32) -> Self {
        Self {
            seed_id,
            addresses: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            seed: Mutex::new(None),
            fail_seed_writes: AtomicBool::new(false),
        }
    }

    /// Make `store_encrypted_seed` fail
    pub fn set_fail_seed_writes(&self, fail: bool) {
        self.fail_seed_writes.store(fail, Ordering::SeqCst);
    }

    /// Attach encrypted seed material
    pub fn with_seed(self, seed: EncryptedPrivateKey) -> Self {
        *self.seed.lock() = Some(seed);
        self
    }

    /// Derive `address` and tell the sink, if any
    pub fn derive(&self, address: &str) {
        self.addresses
            .lock()
            .push(Address::hd(address, Vec::new()));
        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            sink.address_added(address);
        }
    }

    /// Currently stored seed material
    pub fn seed(&self) -> Option<EncryptedPrivateKey> {
        self.seed.lock().clone()
    }
}

impl Keychain for StaticKeychain {
    fn seed_id(&self) -> u32 {
        self.seed_id
    }

    fn addresses(&self) -> Vec<Address> {
        self.addresses.lock().clone()
    }

    fn set_address_sink(&self, sink: Arc<dyn AddressSink>) {
        *self.sink.lock() = Some(sink);
    }

    fn encrypted_seed(&self) -> Option<EncryptedPrivateKey> {
        self.seed()
    }

    fn store_encrypted_seed(&self, seed: EncryptedPrivateKey) -> Result<()> {
        if self.fail_seed_writes.load(Ordering::SeqCst) {
            return Err(Error::Keychain("seed write failed".to_string()));
        }
        *self.seed.lock() = Some(seed);
        Ok(())
    }

    fn update_sync_complete(&self, address: &str) -> Result<()> {
        for a in self.addresses.lock().iter_mut() {
            if a.address == address {
                a.is_sync_complete = true;
            }
        }
        Ok(())
    }
}

/// Notifier that records every call
#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(String, TxHash, NotificationKind)>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded `(address, tx, kind)` triples
    pub fn calls(&self) -> Vec<(String, TxHash, NotificationKind)> {
        self.calls.lock().clone()
    }
}

impl TxNotifier for RecordingNotifier {
    fn notify_tx(&self, address: &Address, tx: &Transaction, kind: NotificationKind) {
        self.calls
            .lock()
            .push((address.address.clone(), tx.hash, kind));
    }
}
