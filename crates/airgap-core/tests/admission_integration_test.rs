//! Integration tests for transaction admission and output pruning

use airgap_core::testing::{
    key_address, sample_address, sample_tx_hash, watch_address, MemoryAddressStore, MemoryLedger,
    MemoryTxStore, RecordingNotifier,
};
use airgap_core::{
    AddressRegistry, NotificationKind, Transaction, TransactionAdmission, TxInput, TxOutput,
};
use airgap_params::WalletConfig;
use std::sync::Arc;
use std::thread;

struct Fixture {
    admission: TransactionAdmission,
    registry: Arc<AddressRegistry>,
    txs: Arc<MemoryTxStore>,
    notifier: Arc<RecordingNotifier>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(AddressRegistry::new(
        Arc::new(MemoryAddressStore::new()),
        Arc::new(MemoryLedger::new()),
    ));
    registry.add_address(key_address(1, "pw")).unwrap();
    registry.add_address(watch_address(2)).unwrap();
    registry.add_address(watch_address(3)).unwrap();

    let txs = Arc::new(MemoryTxStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let admission = TransactionAdmission::new(registry.clone(), txs.clone(), notifier.clone());
    Fixture {
        admission,
        registry,
        txs,
        notifier,
    }
}

fn payment(hash: u8, input_from: u8, to: &str, amount: u64) -> Transaction {
    Transaction::new(
        sample_tx_hash(hash),
        vec![TxInput::new(sample_tx_hash(input_from), 0)],
        vec![TxOutput::pay_to(to, amount)],
    )
}

/// 600 outputs, three of which pay our addresses
fn fan_out(hash: u8, input_from: u8) -> Transaction {
    let mut outputs: Vec<TxOutput> = (0..600u32)
        .map(|i| TxOutput::pay_to(format!("foreign-{}", i), 1_000 + u64::from(i)))
        .collect();
    outputs[10] = TxOutput::pay_to(sample_address(1), 11);
    outputs[250] = TxOutput::pay_to(sample_address(2), 22);
    outputs[599] = TxOutput::pay_to(sample_address(3), 33);
    Transaction::new(
        sample_tx_hash(hash),
        vec![TxInput::new(sample_tx_hash(input_from), 0)],
        outputs,
    )
}

#[test]
fn test_register_relevant_tx_persists_and_notifies() {
    let f = fixture();
    let tx = payment(1, 200, &sample_address(2), 5_000);

    assert!(f.admission.register_tx(tx, NotificationKind::Receive).unwrap());
    assert_eq!(f.txs.adds(), 1);
    assert_eq!(
        f.notifier.calls(),
        vec![(sample_address(2), sample_tx_hash(1), NotificationKind::Receive)]
    );
}

#[test]
fn test_register_twice_persists_once() {
    let f = fixture();
    let tx = payment(1, 200, &sample_address(1), 5_000);

    assert!(f
        .admission
        .register_tx(tx.clone(), NotificationKind::Receive)
        .unwrap());
    assert!(f.admission.register_tx(tx, NotificationKind::Receive).unwrap());
    assert_eq!(f.txs.adds(), 1);
    assert_eq!(f.notifier.calls().len(), 1);
}

#[test]
fn test_unrelated_tx_is_not_persisted() {
    let f = fixture();
    let tx = payment(1, 200, "someone-else", 5_000);
    assert!(!f.admission.register_tx(tx, NotificationKind::Receive).unwrap());
    assert_eq!(f.txs.adds(), 0);
    assert!(f.notifier.calls().is_empty());
}

#[test]
fn test_double_spend_of_confirmed_tx_rejected() {
    let f = fixture();
    let mut confirmed = payment(1, 200, "someone-else", 5_000);
    confirmed.block_height = 100;
    f.txs.insert(confirmed);

    // Spends the same output, pays us
    let conflicting = payment(2, 200, &sample_address(1), 5_000);
    assert!(!f
        .admission
        .register_tx(conflicting, NotificationKind::Receive)
        .unwrap());
    assert!(f.txs.get(&sample_tx_hash(2)).is_none());
    assert!(f.notifier.calls().is_empty());
}

#[test]
fn test_double_spend_of_unconfirmed_tx_admitted() {
    let f = fixture();
    f.txs.insert(payment(1, 200, "someone-else", 5_000));
    let replacement = payment(2, 200, &sample_address(1), 5_000);
    assert!(f
        .admission
        .register_tx(replacement, NotificationKind::Receive)
        .unwrap());
}

#[test]
fn test_input_side_relevance() {
    let f = fixture();
    f.txs.set_input_address(sample_tx_hash(50), 0, &sample_address(3));
    let spend = payment(7, 50, "merchant", 900);

    assert!(f.admission.is_tx_related(&spend).unwrap());
    assert!(f.admission.register_tx(spend, NotificationKind::Send).unwrap());
    assert_eq!(
        f.notifier.calls(),
        vec![(sample_address(3), sample_tx_hash(7), NotificationKind::Send)]
    );
}

#[test]
fn test_is_tx_related_ignores_stopped_addresses() {
    let f = fixture();
    let tx = payment(1, 200, &sample_address(2), 1);
    assert!(f.admission.is_tx_related(&tx).unwrap());

    f.registry.stop_monitor(&sample_address(2)).unwrap();
    assert!(!f.admission.is_tx_related(&tx).unwrap());
}

#[test]
fn test_large_foreign_tx_keeps_only_our_outputs() {
    let f = fixture();
    assert!(f
        .admission
        .register_tx(fan_out(1, 200), NotificationKind::Receive)
        .unwrap());

    let stored = f.txs.get(&sample_tx_hash(1)).unwrap();
    let amounts: Vec<u64> = stored.outputs.iter().map(|o| o.amount).collect();
    assert_eq!(amounts, vec![11, 22, 33]);
    assert_eq!(stored.inputs.len(), 1);
    assert_eq!(f.notifier.calls().len(), 3);
}

#[test]
fn test_large_tx_sent_by_us_keeps_all_outputs() {
    let f = fixture();
    f.txs.mark_sent(sample_tx_hash(200));
    assert!(f
        .admission
        .register_tx(fan_out(1, 200), NotificationKind::Send)
        .unwrap());

    let stored = f.txs.get(&sample_tx_hash(1)).unwrap();
    assert_eq!(stored.outputs.len(), 600);
}

#[test]
fn test_small_tx_is_never_pruned() {
    let f = fixture();
    let mut tx = payment(1, 200, &sample_address(1), 10);
    for i in 0..4 {
        tx.outputs.push(TxOutput::pay_to(format!("foreign-{}", i), 1));
    }
    assert_eq!(tx.outputs.len(), 5);
    let compressed = f.admission.compress_tx(tx).unwrap();
    assert_eq!(compressed.outputs.len(), 5);
}

#[test]
fn test_custom_threshold() {
    let f = fixture();
    let admission = TransactionAdmission::new(
        f.registry.clone(),
        f.txs.clone(),
        f.notifier.clone(),
    )
    .with_compress_threshold(1);
    let mut tx = payment(1, 200, &sample_address(1), 10);
    tx.outputs.push(TxOutput::pay_to("foreign", 1));

    let compressed = admission.compress_tx(tx).unwrap();
    assert_eq!(compressed.outputs.len(), 1);
    assert_eq!(admission.compress_threshold(), 1);
}

#[test]
fn test_batch_compression_uses_page_hashes_not_store() {
    let f = fixture();
    // The store says we sent tx 200, but the page does not contain it
    f.txs.mark_sent(sample_tx_hash(200));
    let page = f
        .admission
        .compress_txs_for_api(vec![fan_out(1, 200)], &sample_address(2));
    assert_eq!(page[0].outputs.len(), 1);
    assert_eq!(page[0].outputs[0].amount, 22);
}

#[test]
fn test_configured_threshold_controls_pruning() {
    let f = fixture();
    let config = WalletConfig::from_json(r#"{"compress_out_threshold": 1000}"#).unwrap();
    let admission = TransactionAdmission::from_config(
        f.registry.clone(),
        f.txs.clone(),
        f.notifier.clone(),
        &config,
    );
    assert_eq!(admission.compress_threshold(), 1000);

    assert!(admission
        .register_tx(fan_out(1, 200), NotificationKind::Receive)
        .unwrap());
    assert_eq!(f.txs.get(&sample_tx_hash(1)).unwrap().outputs.len(), 600);

    let defaults = TransactionAdmission::from_config(
        f.registry.clone(),
        f.txs.clone(),
        f.notifier.clone(),
        &WalletConfig::default(),
    );
    let pruned = defaults.compress_tx(fan_out(2, 201)).unwrap();
    assert_eq!(pruned.outputs.len(), 3);
}

#[test]
fn test_concurrent_register_persists_once() {
    let f = fixture();
    let admission = Arc::new(f.admission);
    let tx = payment(1, 200, &sample_address(2), 5_000);

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let admission = admission.clone();
            let tx = tx.clone();
            thread::spawn(move || admission.register_tx(tx, NotificationKind::Receive))
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap().unwrap());
    }
    assert_eq!(f.txs.adds(), 1);
    assert_eq!(f.txs.get(&sample_tx_hash(1)).unwrap(), tx);
}
