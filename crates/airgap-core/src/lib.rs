//! Trust core of a split hot/cold wallet
//!
//! This crate implements the address registry, transaction admission and
//! output pruning, and the QR transport codec used to move unsigned
//! transactions to an offline signer and signatures back.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod address;
pub mod admission;
pub mod error;
pub mod keychain;
pub mod keys;
pub mod registry;
pub mod store;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod transport;
pub mod tx;

pub use address::{
    address_from_public_key, address_to_compact_hex, compact_hex_to_address, decode_address,
    encode_address, hash160, is_valid_address, Address,
};
pub use admission::{compress_txs_for_api, LoggingNotifier, TransactionAdmission, TxNotifier};
pub use error::{Error, ErrorCategory, Result};
pub use keychain::{AddressSink, Keychain};
pub use keys::{EncryptedPrivateKey, KdfParams};
pub use registry::{AddressRegistry, Clock, SystemClock};
pub use store::{AddressStore, BalanceLedger, TxStore};
pub use transport::{
    decode_public_keys, decode_signatures, decode_transport, detect_transport, encode_legacy,
    encode_public_keys, encode_signatures, encode_transport, escape_qr_text, unescape_qr_text,
    TransportFormat, TxTransport, LEGACY_SEPARATOR, SEPARATOR, XRANDOM_FLAG,
};
pub use tx::{
    sort_history, NotificationKind, Transaction, TxHash, TxInput, TxOutput, UnsignedTransaction,
};
