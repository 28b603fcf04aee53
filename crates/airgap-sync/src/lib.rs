//! History sync and signature hand-off for the hot device
//!
//! Downloads paginated address history into the wallet core, rolls local
//! chain state back when the remote tip shows a short reorg, and keeps
//! unsigned transactions until the cold device returns signatures.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod history;
pub mod logging;
pub mod pending;
pub mod sync;

pub use error::{Error, Result};
pub use history::{
    block_time, parse_input_signatures, ChainState, HistoryPage, HistoryRecord, HistorySource,
    InSignatureSource, InputSignature, InputSignatureStore, JsonTxDecoder, TxDecoder,
};
pub use logging::{init_json_logging, init_logging};
pub use pending::PendingSignatureCache;
pub use sync::{
    AddressSync, InputCompletion, SyncConfig, SyncCoordinator, SyncFailure, SyncReport,
};
