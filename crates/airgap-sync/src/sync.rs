//! Paginated history sync for registered addresses
//!
//! Each pass walks every address that has not finished its initial
//! download, pulls its history page by page, stamps block times from the
//! local chain, prunes oversized foreign transactions and hands the ordered
//! result to the transaction store in one call. Network I/O never happens
//! while the registry lock is held; the registry is only touched to list
//! addresses and to flip the sync-complete flag at the end.
//!
//! History rows arrive without input signatures; those are fetched
//! afterwards, block range by block range, until the store reports no
//! input left to fill.

use crate::error::Result;
use crate::history::{
    block_time, parse_input_signatures, ChainState, HistorySource, InSignatureSource,
    InputSignatureStore, TxDecoder,
};
use crate::pending::PendingSignatureCache;
use airgap_core::{sort_history, Transaction, TransactionAdmission, UnsignedTransaction};
use airgap_params::{WalletConfig, PENDING_SIGNATURE_CAPACITY, ROLLBACK_WINDOW};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// A remote tip trailing the local tip by fewer blocks than this is
    /// treated as a reorg and rolled back to
    pub rollback_window: u32,
    /// Capacity of the pending-signature cache
    pub pending_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            rollback_window: ROLLBACK_WINDOW,
            pending_capacity: PENDING_SIGNATURE_CAPACITY,
        }
    }
}

impl From<&WalletConfig> for SyncConfig {
    fn from(config: &WalletConfig) -> Self {
        Self {
            rollback_window: config.rollback_window,
            pending_capacity: config.pending_capacity,
        }
    }
}

/// Outcome of syncing one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSync {
    /// Address synced
    pub address: String,
    /// Transactions handed to the store
    pub transactions: usize,
    /// Pages fetched
    pub pages: u32,
    /// Last remote chain height reported
    pub remote_height: Option<u32>,
    /// Height local chain state was rolled back to, if any
    pub rolled_back_to: Option<u32>,
}

/// Address whose sync failed during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Address
    pub address: String,
    /// Rendered error
    pub error: String,
}

/// Summary of one `sync_all` pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Addresses now sync-complete
    pub synced: Vec<AddressSync>,
    /// Addresses left incomplete for the next pass
    pub failed: Vec<SyncFailure>,
}

impl SyncReport {
    /// Whether every attempted address synced
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Lowest height local chain state was rolled back to during the pass
    pub fn rolled_back_to(&self) -> Option<u32> {
        self.synced.iter().filter_map(|s| s.rolled_back_to).min()
    }
}

/// Outcome of filling in input signatures for one address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputCompletion {
    /// Requests made to the signature source
    pub requests: u32,
    /// Signatures handed to the store
    pub signatures: usize,
    /// Height still missing signatures when the loop stopped early
    pub remaining_from: Option<u32>,
}

impl InputCompletion {
    /// Whether every stored input now has its signature
    pub fn is_complete(&self) -> bool {
        self.remaining_from.is_none()
    }
}

/// Local chain view captured at the start of a pass
struct ChainTip {
    height: u32,
    block_times: BTreeMap<u32, i64>,
}

impl ChainTip {
    fn load(chain: &dyn ChainState) -> Result<Self> {
        Ok(Self {
            height: chain.current_height()?,
            block_times: chain.block_times()?,
        })
    }
}

/// Downloads address history and keeps unsigned transactions for the cold signer
pub struct SyncCoordinator {
    admission: Arc<TransactionAdmission>,
    history: Arc<dyn HistorySource>,
    decoder: Arc<dyn TxDecoder>,
    chain: Arc<dyn ChainState>,
    pending: PendingSignatureCache,
    config: SyncConfig,
}

impl SyncCoordinator {
    /// Coordinator with default configuration
    pub fn new(
        admission: Arc<TransactionAdmission>,
        history: Arc<dyn HistorySource>,
        decoder: Arc<dyn TxDecoder>,
        chain: Arc<dyn ChainState>,
    ) -> Self {
        Self::with_config(admission, history, decoder, chain, SyncConfig::default())
    }

    /// Coordinator with explicit configuration
    pub fn with_config(
        admission: Arc<TransactionAdmission>,
        history: Arc<dyn HistorySource>,
        decoder: Arc<dyn TxDecoder>,
        chain: Arc<dyn ChainState>,
        config: SyncConfig,
    ) -> Self {
        Self {
            admission,
            history,
            decoder,
            chain,
            pending: PendingSignatureCache::new(config.pending_capacity),
            config,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Unsigned transactions awaiting signatures
    pub fn pending(&self) -> &PendingSignatureCache {
        &self.pending
    }

    /// Cache an unsigned transaction, replacing any for the same sender
    pub fn add_unsigned_tx(&self, tx: UnsignedTransaction) -> Option<UnsignedTransaction> {
        self.pending.add_unsigned_tx(tx)
    }

    /// Cached unsigned transaction for `address`
    pub fn get_unsigned_tx(&self, address: &str) -> Option<UnsignedTransaction> {
        self.pending.get_unsigned_tx(address)
    }

    /// Forget the cached transaction for `address`
    pub fn remove_signed_tx(&self, address: &str) -> bool {
        self.pending.remove_signed_tx(address)
    }

    /// Whether a remote tip of `remote` warrants rolling back a local tip of `local`
    pub fn needs_rollback(&self, local: u32, remote: u32) -> bool {
        remote < local && local - remote < self.config.rollback_window
    }

    /// Sync every address that has not completed its initial download
    ///
    /// Fails only if the local chain cannot be read; per-address failures are
    /// collected in the report and leave that address incomplete.
    pub async fn sync_all(&self) -> Result<SyncReport> {
        let mut tip = ChainTip::load(self.chain.as_ref())?;
        let pending: Vec<String> = self
            .admission
            .registry()
            .get_all_addresses()
            .into_iter()
            .filter(|a| !a.is_sync_complete)
            .map(|a| a.address)
            .collect();

        info!(
            addresses = pending.len(),
            local_height = tip.height,
            "starting history sync"
        );

        let mut report = SyncReport::default();
        for address in pending {
            match self.sync_with_tip(&address, &mut tip).await {
                Ok(synced) => report.synced.push(synced),
                Err(e) => {
                    warn!(address = %address, error = %e, "history sync failed");
                    report.failed.push(SyncFailure {
                        address,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            synced = report.synced.len(),
            failed = report.failed.len(),
            "history sync finished"
        );
        Ok(report)
    }

    /// Sync a single address against the current local chain
    pub async fn sync_address(&self, address: &str) -> Result<AddressSync> {
        let mut tip = ChainTip::load(self.chain.as_ref())?;
        self.sync_with_tip(address, &mut tip).await
    }

    /// Fill in input signatures for `address`'s stored transactions
    ///
    /// Requests signatures from the lowest incomplete height until the store
    /// reports nothing missing. Stops early when the source answers with no
    /// signatures or when the store still needs the height just requested,
    /// since repeating the request could not make progress.
    pub async fn complete_input_signatures(
        &self,
        address: &str,
        source: &dyn InSignatureSource,
        store: &dyn InputSignatureStore,
    ) -> Result<InputCompletion> {
        let mut completion = InputCompletion::default();
        let mut from = store.needs_in_signature(address)?;

        while let Some(height) = from {
            let text = source.fetch_in_signatures(address, height).await?;
            completion.requests += 1;
            let signatures = parse_input_signatures(&text)?;
            if signatures.is_empty() {
                warn!(address, from_height = height, "no input signatures returned");
                break;
            }

            store.complete_in_signatures(address, &signatures)?;
            completion.signatures += signatures.len();
            debug!(
                address,
                from_height = height,
                signatures = signatures.len(),
                "input signatures stored"
            );

            let next = store.needs_in_signature(address)?;
            let stalled = next == Some(height);
            from = next;
            if stalled {
                warn!(address, from_height = height, "input signatures made no progress");
                break;
            }
        }

        completion.remaining_from = from;
        info!(
            address,
            requests = completion.requests,
            signatures = completion.signatures,
            complete = completion.is_complete(),
            "input signature completion finished"
        );
        Ok(completion)
    }

    async fn sync_with_tip(&self, address: &str, tip: &mut ChainTip) -> Result<AddressSync> {
        let (txs, pages, remote_height) = self.fetch_history(address, tip).await?;

        let mut rolled_back_to = None;
        if let Some(remote) = remote_height {
            if self.needs_rollback(tip.height, remote) {
                warn!(
                    address,
                    local_height = tip.height,
                    remote_height = remote,
                    "remote tip behind local tip, rolling back"
                );
                self.chain.rollback_to(remote)?;
                *tip = ChainTip::load(self.chain.as_ref())?;
                rolled_back_to = Some(remote);
            }
        }

        let mut txs = self.admission.compress_txs_for_api(txs, address);
        sort_history(&mut txs);
        self.admission.store().init_address_txs(address, &txs)?;

        if !self.admission.registry().complete_sync(address)? {
            debug!(address, "address left the registry during sync");
        }
        info!(address, transactions = txs.len(), pages, "address synced");

        Ok(AddressSync {
            address: address.to_string(),
            transactions: txs.len(),
            pages,
            remote_height,
            rolled_back_to,
        })
    }

    /// Pull pages until the reported total is reached or a page comes back empty
    async fn fetch_history(
        &self,
        address: &str,
        tip: &ChainTip,
    ) -> Result<(Vec<Transaction>, u32, Option<u32>)> {
        let mut txs = Vec::new();
        let mut received: u64 = 0;
        let mut remote_height = None;
        let mut page: u32 = 1;

        loop {
            let history = self.history.fetch_page(address, page).await?;
            if history.block_count.is_some() {
                remote_height = history.block_count;
            }

            let rows = history.records.len();
            received += rows as u64;

            for record in history.records {
                if tip.height > 0 && record.height > tip.height {
                    continue;
                }
                let mut tx = self.decoder.decode(&record.raw)?;
                tx.block_height = record.height;
                if let Some(time) = block_time(&tip.block_times, record.height) {
                    tx.time = time;
                }
                txs.push(tx);
            }

            debug!(address, page, rows, received, total = history.tx_cnt, "history page");

            if rows == 0 || received >= history.tx_cnt {
                return Ok((txs, page, remote_height));
            }
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoryPage, JsonTxDecoder};
    use airgap_core::testing::{MemoryAddressStore, MemoryLedger, MemoryTxStore, RecordingNotifier};
    use airgap_core::AddressRegistry;
    use async_trait::async_trait;

    struct NoHistory;

    #[async_trait]
    impl HistorySource for NoHistory {
        async fn fetch_page(&self, _address: &str, _page: u32) -> Result<HistoryPage> {
            Ok(HistoryPage::default())
        }
    }

    struct FlatChain;

    impl ChainState for FlatChain {
        fn current_height(&self) -> Result<u32> {
            Ok(0)
        }

        fn block_times(&self) -> Result<BTreeMap<u32, i64>> {
            Ok(BTreeMap::new())
        }

        fn rollback_to(&self, _height: u32) -> Result<()> {
            Ok(())
        }
    }

    fn coordinator(config: SyncConfig) -> SyncCoordinator {
        let registry = Arc::new(AddressRegistry::new(
            Arc::new(MemoryAddressStore::new()),
            Arc::new(MemoryLedger::new()),
        ));
        let admission = Arc::new(TransactionAdmission::new(
            registry,
            Arc::new(MemoryTxStore::new()),
            Arc::new(RecordingNotifier::new()),
        ));
        SyncCoordinator::with_config(
            admission,
            Arc::new(NoHistory),
            Arc::new(JsonTxDecoder),
            Arc::new(FlatChain),
            config,
        )
    }

    #[test]
    fn test_rollback_window() {
        let sync = coordinator(SyncConfig::default());
        assert!(sync.needs_rollback(500_000, 499_950));
        assert!(sync.needs_rollback(500_000, 499_901));
        assert!(!sync.needs_rollback(500_000, 499_900));
        assert!(!sync.needs_rollback(500_000, 400_000));
        assert!(!sync.needs_rollback(500_000, 500_000));
        assert!(!sync.needs_rollback(500_000, 500_010));
    }

    #[test]
    fn test_config_from_wallet_config() {
        let wallet = WalletConfig {
            rollback_window: 10,
            pending_capacity: 3,
            ..WalletConfig::default()
        };
        let sync = coordinator(SyncConfig::from(&wallet));
        assert!(!sync.needs_rollback(500_000, 499_950));
        assert_eq!(sync.pending().capacity(), 3);
    }

    #[tokio::test]
    async fn test_empty_registry_pass() {
        let sync = coordinator(SyncConfig::default());
        let report = sync.sync_all().await.unwrap();
        assert!(report.is_clean());
        assert!(report.synced.is_empty());
        assert_eq!(report.rolled_back_to(), None);
    }
}
