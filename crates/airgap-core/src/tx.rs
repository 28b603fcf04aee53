//! Transaction model
//!
//! Raw transaction and script parsing live outside this crate; the types
//! here carry only what admission, compression and the transport codec
//! need: input references, output destinations and amounts, and the block
//! height and time used to order history.

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Length of a transaction hash
pub const TX_HASH_LEN: usize = 32;

/// Transaction hash (double SHA-256 digest)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TxHash(pub [u8; TX_HASH_LEN]);

impl TxHash {
    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; TX_HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; TX_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

impl FromStr for TxHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes =
            hex::decode(s).map_err(|e| Error::InvalidTransaction(format!("tx hash: {}", e)))?;
        let bytes: [u8; TX_HASH_LEN] = bytes
            .try_into()
            .map_err(|_| Error::InvalidTransaction("tx hash: wrong length".to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a previous output, with its signature once signed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Hash of the transaction holding the spent output
    pub prev_tx_hash: TxHash,
    /// Index of the spent output
    pub prev_out_index: u32,
    /// Input signature, absent until signed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Vec<u8>>,
}

impl TxInput {
    /// Unsigned input
    pub fn new(prev_tx_hash: TxHash, prev_out_index: u32) -> Self {
        Self {
            prev_tx_hash,
            prev_out_index,
            signature: None,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Destination address, if the script is a recognised address form
    pub address: Option<String>,
    /// Amount in the smallest unit
    pub amount: u64,
    /// Raw output script
    #[serde(default)]
    pub script: Vec<u8>,
}

impl TxOutput {
    /// Output paying `amount` to `address`
    pub fn pay_to(address: impl Into<String>, amount: u64) -> Self {
        Self {
            address: Some(address.into()),
            amount,
            script: Vec::new(),
        }
    }
}

/// Transaction as seen by the wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction hash
    pub hash: TxHash,
    /// Inputs in signing order
    pub inputs: Vec<TxInput>,
    /// Outputs; may be pruned to our own outputs once stored
    pub outputs: Vec<TxOutput>,
    /// Block height, 0 while unconfirmed
    #[serde(default)]
    pub block_height: u32,
    /// Observed time in seconds
    #[serde(default)]
    pub time: i64,
}

impl Transaction {
    /// Unconfirmed transaction with the given inputs and outputs
    pub fn new(hash: TxHash, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        Self {
            hash,
            inputs,
            outputs,
            block_height: 0,
            time: 0,
        }
    }

    /// Whether the transaction is in a block
    pub fn is_confirmed(&self) -> bool {
        self.block_height > 0
    }

    /// Total of the outputs paying `address`
    pub fn amount_sent_to(&self, address: &str) -> u64 {
        self.outputs
            .iter()
            .filter(|out| out.address.as_deref() == Some(address))
            .map(|out| out.amount)
            .sum()
    }

    /// Destination of the first output that has a parseable address
    pub fn first_out_address(&self) -> Option<&str> {
        self.outputs.iter().find_map(|out| out.address.as_deref())
    }

    /// Destination addresses of all outputs
    pub fn out_addresses(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().filter_map(|out| out.address.as_deref())
    }

    /// Attach one signature per input, in input order
    ///
    /// The transaction is left untouched when the count does not match.
    pub fn sign_with_signatures(&mut self, signatures: &[Vec<u8>]) -> Result<()> {
        if signatures.len() != self.inputs.len() {
            return Err(Error::InvalidTransaction(format!(
                "{} signatures for {} inputs",
                signatures.len(),
                self.inputs.len()
            )));
        }
        for (input, signature) in self.inputs.iter_mut().zip(signatures) {
            input.signature = Some(signature.clone());
        }
        Ok(())
    }

    /// Whether every input carries a signature
    pub fn is_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|input| input.signature.is_some())
    }
}

/// Why an address is being told about a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Arrived from a peer or mempool
    Receive,
    /// Sent by this wallet
    Send,
    /// Conflicts with a stored transaction
    DoubleSpend,
    /// Downloaded from the history API
    FromApi,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotificationKind::Receive => write!(f, "receive"),
            NotificationKind::Send => write!(f, "send"),
            NotificationKind::DoubleSpend => write!(f, "double_spend"),
            NotificationKind::FromApi => write!(f, "from_api"),
        }
    }
}

/// Unsigned transaction prepared by the hot device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// Address funding the transaction
    pub from_address: String,
    /// Payment destination
    pub to_address: String,
    /// Fee paid
    pub fee: u64,
    /// The transaction itself
    pub tx: Transaction,
    /// Pre-signature hash of each input, in input order
    pub input_hashes: Vec<Vec<u8>>,
}

impl UnsignedTransaction {
    /// Pair a transaction with its per-input signing hashes
    pub fn new(
        from_address: impl Into<String>,
        to_address: impl Into<String>,
        fee: u64,
        tx: Transaction,
        input_hashes: Vec<Vec<u8>>,
    ) -> Result<Self> {
        if input_hashes.len() != tx.inputs.len() {
            return Err(Error::InvalidTransaction(format!(
                "{} input hashes for {} inputs",
                input_hashes.len(),
                tx.inputs.len()
            )));
        }
        Ok(Self {
            from_address: from_address.into(),
            to_address: to_address.into(),
            fee,
            tx,
            input_hashes,
        })
    }

    /// Amount paid to the destination
    pub fn to_amount(&self) -> u64 {
        self.tx.amount_sent_to(&self.to_address)
    }
}

/// Order history by ascending block height, then time
///
/// Unconfirmed transactions (height 0) sort first; the sort is stable.
pub fn sort_history(txs: &mut [Transaction]) {
    txs.sort_by_key(|tx| (tx.block_height, tx.time));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> TxHash {
        TxHash([n; TX_HASH_LEN])
    }

    fn sample() -> Transaction {
        Transaction::new(
            hash(1),
            vec![TxInput::new(hash(9), 0), TxInput::new(hash(9), 1)],
            vec![
                TxOutput {
                    address: None,
                    amount: 5,
                    script: vec![0x6a],
                },
                TxOutput::pay_to("alice", 700),
                TxOutput::pay_to("bob", 30),
                TxOutput::pay_to("alice", 1),
            ],
        )
    }

    #[test]
    fn test_amounts_and_first_out() {
        let tx = sample();
        assert_eq!(tx.amount_sent_to("alice"), 701);
        assert_eq!(tx.amount_sent_to("carol"), 0);
        assert_eq!(tx.first_out_address(), Some("alice"));
        assert!(!tx.is_confirmed());
    }

    #[test]
    fn test_sign_with_signatures() {
        let mut tx = sample();
        assert!(tx.sign_with_signatures(&[vec![1]]).is_err());
        assert!(!tx.is_signed());

        tx.sign_with_signatures(&[vec![1], vec![2]]).unwrap();
        assert!(tx.is_signed());
        assert_eq!(tx.inputs[1].signature.as_deref(), Some(&[2u8][..]));
    }

    #[test]
    fn test_unsigned_requires_matching_hashes() {
        assert!(UnsignedTransaction::new("a", "alice", 10, sample(), vec![vec![0]]).is_err());
        let unsigned =
            UnsignedTransaction::new("a", "alice", 10, sample(), vec![vec![0], vec![1]]).unwrap();
        assert_eq!(unsigned.to_amount(), 701);
    }

    #[test]
    fn test_sort_history() {
        let mut txs: Vec<Transaction> = [(10, 5), (0, 9), (10, 1), (3, 100)]
            .into_iter()
            .enumerate()
            .map(|(i, (height, time))| {
                let mut tx = Transaction::new(hash(i as u8), vec![], vec![]);
                tx.block_height = height;
                tx.time = time;
                tx
            })
            .collect();
        sort_history(&mut txs);
        let order: Vec<(u32, i64)> = txs.iter().map(|t| (t.block_height, t.time)).collect();
        assert_eq!(order, vec![(0, 9), (3, 100), (10, 1), (10, 5)]);
    }

    #[test]
    fn test_hash_serde_as_hex() {
        let json = serde_json::to_string(&hash(0xab)).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(TX_HASH_LEN)));
        let back: TxHash = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hash(0xab));
        assert!("abcd".parse::<TxHash>().is_err());
    }
}
