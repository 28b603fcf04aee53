//! Transaction admission and output pruning
//!
//! Decides whether an incoming transaction touches one of our addresses,
//! rejects double spends of confirmed transactions, prunes foreign outputs
//! from large fan-out transactions we did not send, and notifies the
//! affected addresses.

use crate::registry::AddressRegistry;
use crate::store::TxStore;
use crate::{Address, NotificationKind, Result, Transaction, TxHash};
use airgap_params::{WalletConfig, COMPRESS_OUT_NUM};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Receives per-address transaction notifications
pub trait TxNotifier: Send + Sync {
    /// `tx` touched `address`
    fn notify_tx(&self, address: &Address, tx: &Transaction, kind: NotificationKind);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingNotifier;

impl TxNotifier for LoggingNotifier {
    fn notify_tx(&self, address: &Address, tx: &Transaction, kind: NotificationKind) {
        info!(address = %address, tx = %tx.hash, %kind, "transaction notification");
    }
}

/// Prune a freshly fetched history page for `address`
///
/// A transaction counts as sent by us when one of its inputs spends another
/// transaction of the same page. Transactions not sent by us with more than
/// `threshold` outputs keep only the outputs paying `address`.
pub fn compress_txs_for_api(
    mut txs: Vec<Transaction>,
    address: &str,
    threshold: usize,
) -> Vec<Transaction> {
    let known: HashSet<TxHash> = txs.iter().map(|tx| tx.hash).collect();

    for tx in &mut txs {
        let sent_by_me = tx
            .inputs
            .iter()
            .any(|input| known.contains(&input.prev_tx_hash));
        if !sent_by_me && tx.outputs.len() > threshold {
            tx.outputs
                .retain(|out| out.address.as_deref() == Some(address));
        }
    }
    txs
}

/// Admission gate in front of the transaction store
pub struct TransactionAdmission {
    registry: Arc<AddressRegistry>,
    store: Arc<dyn TxStore>,
    notifier: Arc<dyn TxNotifier>,
    compress_out_threshold: usize,
}

impl TransactionAdmission {
    /// Create with the default pruning threshold
    pub fn new(
        registry: Arc<AddressRegistry>,
        store: Arc<dyn TxStore>,
        notifier: Arc<dyn TxNotifier>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            compress_out_threshold: COMPRESS_OUT_NUM,
        }
    }

    /// Create with the pruning threshold from wallet configuration
    pub fn from_config(
        registry: Arc<AddressRegistry>,
        store: Arc<dyn TxStore>,
        notifier: Arc<dyn TxNotifier>,
        config: &WalletConfig,
    ) -> Self {
        Self::new(registry, store, notifier).with_compress_threshold(config.compress_out_threshold)
    }

    /// Override the output count above which pruning applies
    pub fn with_compress_threshold(mut self, threshold: usize) -> Self {
        self.compress_out_threshold = threshold;
        self
    }

    /// Output count above which pruning applies
    pub fn compress_threshold(&self) -> usize {
        self.compress_out_threshold
    }

    /// Registry this gate admits for
    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.registry
    }

    /// Store transactions are admitted into
    pub fn store(&self) -> &Arc<dyn TxStore> {
        &self.store
    }

    /// Record `tx` if it touches one of our addresses
    ///
    /// Returns `Ok(true)` when the transaction is relevant (or already
    /// stored) and `Ok(false)` when it is unrelated or double-spends a
    /// confirmed transaction.
    pub fn register_tx(&self, tx: Transaction, kind: NotificationKind) -> Result<bool> {
        if self.store.tx_exists(&tx.hash)? {
            debug!(tx = %tx.hash, "transaction already stored");
            return Ok(true);
        }

        if self.store.is_double_spend_with_confirmed(&tx)? {
            debug!(tx = %tx.hash, "double spend of a confirmed transaction");
            return Ok(false);
        }

        let affected = self.affected_addresses(&tx)?;
        if affected.is_empty() {
            return Ok(false);
        }

        let tx = self.compress_tx(tx)?;
        if self.store.add(&tx)? {
            info!(tx = %tx.hash, outputs = tx.outputs.len(), "transaction stored");
        } else {
            debug!(tx = %tx.hash, "transaction stored concurrently");
        }

        for address in self.registry.get_all_addresses() {
            if affected.contains(&address.address) {
                self.notifier.notify_tx(&address, &tx, kind);
            }
        }
        Ok(true)
    }

    /// Prune foreign outputs from a large transaction we did not send
    pub fn compress_tx(&self, mut tx: Transaction) -> Result<Transaction> {
        if tx.outputs.len() <= self.compress_out_threshold || self.is_sent_by_me(&tx)? {
            return Ok(tx);
        }

        let before = tx.outputs.len();
        self.registry.with_index(|index| {
            tx.outputs.retain(|out| {
                out.address
                    .as_deref()
                    .is_some_and(|address| index.contains(address))
            })
        });
        debug!(tx = %tx.hash, before, after = tx.outputs.len(), "pruned outputs");
        Ok(tx)
    }

    /// Prune a freshly fetched history page using this gate's threshold
    pub fn compress_txs_for_api(&self, txs: Vec<Transaction>, address: &str) -> Vec<Transaction> {
        compress_txs_for_api(txs, address, self.compress_out_threshold)
    }

    /// Whether any output or spent input of `tx` belongs to a registered address
    pub fn is_tx_related(&self, tx: &Transaction) -> Result<bool> {
        Ok(!self.affected_addresses(tx)?.is_empty())
    }

    fn is_sent_by_me(&self, tx: &Transaction) -> Result<bool> {
        for input in &tx.inputs {
            if self.store.is_sent_by_me(input)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn affected_addresses(&self, tx: &Transaction) -> Result<HashSet<String>> {
        // Store lookups happen before the registry lock is taken.
        let mut in_addresses = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            if let Some(address) = self.store.input_address(input)? {
                in_addresses.push(address);
            }
        }

        Ok(self.registry.with_index(|index| {
            tx.out_addresses()
                .map(str::to_string)
                .chain(in_addresses)
                .filter(|address| index.contains(address))
                .collect()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_tx_hash;
    use crate::{TxInput, TxOutput};

    fn fan_out(hash: u8, inputs: Vec<TxInput>, outputs: usize, ours: &str) -> Transaction {
        let mut outs: Vec<TxOutput> = (0..outputs)
            .map(|i| TxOutput::pay_to(format!("other-{}", i), 1))
            .collect();
        outs[1] = TxOutput::pay_to(ours, 50);
        Transaction::new(sample_tx_hash(hash), inputs, outs)
    }

    #[test]
    fn test_batch_compression_keeps_page_senders() {
        let received = fan_out(1, vec![TxInput::new(sample_tx_hash(99), 0)], 10, "mine");
        let sent = fan_out(2, vec![TxInput::new(sample_tx_hash(1), 1)], 10, "mine");
        let small = fan_out(3, vec![], 3, "mine");

        let page = compress_txs_for_api(vec![received, sent, small], "mine", COMPRESS_OUT_NUM);
        assert_eq!(page[0].outputs.len(), 1);
        assert_eq!(page[0].outputs[0].amount, 50);
        assert_eq!(page[1].outputs.len(), 10);
        assert_eq!(page[2].outputs.len(), 3);
    }

    #[test]
    fn test_batch_compression_at_threshold_is_noop() {
        let tx = fan_out(1, vec![], COMPRESS_OUT_NUM, "mine");
        let page = compress_txs_for_api(vec![tx], "mine", COMPRESS_OUT_NUM);
        assert_eq!(page[0].outputs.len(), COMPRESS_OUT_NUM);
    }
}
