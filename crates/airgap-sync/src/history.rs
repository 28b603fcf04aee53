//! Remote history pages and the collaborators sync reads from

use crate::error::{Error, Result};
use airgap_core::tx::TX_HASH_LEN;
use airgap_core::{Transaction, TxHash};
use async_trait::async_trait;
use base64::alphabet::URL_SAFE;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// One `[height, raw]` row of a history page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    /// Block height reported by the server, 0 while unconfirmed
    pub height: u32,
    /// Serialized transaction
    pub raw: Vec<u8>,
}

/// One page of an address's remote history
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryPage {
    /// Rows on this page
    pub records: Vec<HistoryRecord>,
    /// Remote chain height, when reported
    pub block_count: Option<u32>,
    /// Total number of rows across all pages
    pub tx_cnt: u64,
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    tx: Option<Vec<Vec<Value>>>,
    #[serde(default)]
    block_count: Option<u32>,
    #[serde(default)]
    tx_cnt: u64,
}

impl HistoryPage {
    /// Parse the JSON page served by the history API
    ///
    /// Rows with fewer than two elements are skipped. A row whose height is not
    /// an integer or whose payload is not base64 fails the whole page.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawPage = serde_json::from_str(json)?;
        let mut records = Vec::new();

        for row in raw.tx.unwrap_or_default() {
            if row.len() < 2 {
                continue;
            }
            let height = row[0]
                .as_u64()
                .and_then(|h| u32::try_from(h).ok())
                .ok_or_else(|| Error::Decode(format!("bad height {}", row[0])))?;
            let encoded = row[1]
                .as_str()
                .ok_or_else(|| Error::Decode(format!("bad payload at height {}", height)))?;
            let raw = STANDARD
                .decode(encoded.trim())
                .map_err(|e| Error::Decode(format!("height {}: {}", height, e)))?;
            records.push(HistoryRecord { height, raw });
        }

        Ok(Self {
            records,
            block_count: raw.block_count,
            tx_cnt: raw.tx_cnt,
        })
    }

    /// Whether the page carries no rows
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Paginated history API
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Fetch page `page` (1-based) of `address`'s history
    async fn fetch_page(&self, address: &str, page: u32) -> Result<HistoryPage>;
}

/// Turns raw transaction bytes into the wallet's model
pub trait TxDecoder: Send + Sync {
    /// Decode one serialized transaction
    fn decode(&self, raw: &[u8]) -> Result<Transaction>;
}

/// Decoder for transactions serialized as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonTxDecoder;

impl TxDecoder for JsonTxDecoder {
    fn decode(&self, raw: &[u8]) -> Result<Transaction> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Signature of one input of an already stored transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSignature {
    /// Transaction holding the input
    pub tx_hash: TxHash,
    /// Position of the input in that transaction
    pub input_index: u32,
    /// Signature script bytes
    pub signature: Vec<u8>,
}

const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Parse an input-signature response
///
/// The text is `hash:index,sig:index,sig;hash:...` where the hash is the
/// URL-safe base64 of the digest in wire (reversed) byte order and each
/// signature is URL-safe base64. Empty text yields no signatures; any
/// malformed entry fails the whole response.
pub fn parse_input_signatures(text: &str) -> Result<Vec<InputSignature>> {
    let mut signatures = Vec::new();

    for entry in text.trim().split(';').filter(|e| !e.is_empty()) {
        let mut parts = entry.split(':');
        let encoded_hash = parts.next().unwrap_or_default();
        let tx_hash = decode_wire_hash(encoded_hash)?;

        for input in parts {
            let (index, signature) = input
                .split_once(',')
                .ok_or_else(|| Error::Decode(format!("{}: input without signature", tx_hash)))?;
            let input_index = index
                .trim()
                .parse::<u32>()
                .map_err(|e| Error::Decode(format!("{}: input index {:?}: {}", tx_hash, index, e)))?;
            let signature = URL_SAFE_LENIENT
                .decode(signature.trim())
                .map_err(|e| Error::Decode(format!("{}:{}: {}", tx_hash, input_index, e)))?;
            signatures.push(InputSignature {
                tx_hash,
                input_index,
                signature,
            });
        }
    }

    Ok(signatures)
}

fn decode_wire_hash(encoded: &str) -> Result<TxHash> {
    let mut bytes: [u8; TX_HASH_LEN] = URL_SAFE_LENIENT
        .decode(encoded.trim())
        .map_err(|e| Error::Decode(format!("tx hash {:?}: {}", encoded, e)))?
        .try_into()
        .map_err(|_| Error::Decode(format!("tx hash {:?}: wrong length", encoded)))?;
    bytes.reverse();
    Ok(TxHash::from_bytes(bytes))
}

/// Server that returns input signatures for an address's stored transactions
#[async_trait]
pub trait InSignatureSource: Send + Sync {
    /// Raw signature response for `address`, starting at block `from_height`
    async fn fetch_in_signatures(&self, address: &str, from_height: u32) -> Result<String>;
}

/// Stored transactions whose input signatures were not downloaded with them
pub trait InputSignatureStore: Send + Sync {
    /// Lowest block height with inputs still missing signatures, if any
    fn needs_in_signature(&self, address: &str) -> Result<Option<u32>>;

    /// Attach downloaded signatures to stored inputs
    fn complete_in_signatures(&self, address: &str, signatures: &[InputSignature]) -> Result<()>;
}

/// Locally stored chain state
pub trait ChainState: Send + Sync {
    /// Height of the local tip, 0 when nothing is stored
    fn current_height(&self) -> Result<u32>;

    /// Known block times in seconds, keyed by height
    fn block_times(&self) -> Result<BTreeMap<u32, i64>>;

    /// Drop every block above `height`
    fn rollback_to(&self, height: u32) -> Result<()>;
}

/// Time to stamp on a transaction at `height`
///
/// Heights at or below the earliest known block (including unconfirmed
/// transactions at height 0) take that block's time.
pub fn block_time(times: &BTreeMap<u32, i64>, height: u32) -> Option<i64> {
    let (&earliest, &earliest_time) = times.iter().next()?;
    if height <= earliest {
        Some(earliest_time)
    } else {
        times.get(&height).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page() {
        let page = HistoryPage::from_json(
            r#"{"tx": [[100, "AQID"], [0, "BAU="]], "block_count": 500, "tx_cnt": 7}"#,
        )
        .unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].height, 100);
        assert_eq!(page.records[0].raw, vec![1, 2, 3]);
        assert_eq!(page.records[1].raw, vec![4, 5]);
        assert_eq!(page.block_count, Some(500));
        assert_eq!(page.tx_cnt, 7);
    }

    #[test]
    fn test_short_rows_skipped() {
        let page =
            HistoryPage::from_json(r#"{"tx": [[100], [], [5, "AA=="]], "tx_cnt": 3}"#).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].height, 5);
        assert_eq!(page.block_count, None);
    }

    #[test]
    fn test_missing_rows() {
        let page = HistoryPage::from_json(r#"{"tx": null, "tx_cnt": 0}"#).unwrap();
        assert!(page.is_empty());
        let page = HistoryPage::from_json(r#"{}"#).unwrap();
        assert!(page.is_empty());
        assert_eq!(page.tx_cnt, 0);
    }

    #[test]
    fn test_bad_rows_fail() {
        assert!(matches!(
            HistoryPage::from_json(r#"{"tx": [["x", "AA=="]], "tx_cnt": 1}"#),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            HistoryPage::from_json(r#"{"tx": [[1, "!!"]], "tx_cnt": 1}"#),
            Err(Error::Decode(_))
        ));
        assert!(matches!(
            HistoryPage::from_json("not json"),
            Err(Error::Serialization(_))
        ));
    }

    fn wire_hash(hash: &TxHash) -> String {
        let mut bytes = *hash.as_bytes();
        bytes.reverse();
        URL_SAFE_LENIENT.encode(bytes)
    }

    #[test]
    fn test_parse_input_signatures() {
        let first = TxHash::from_bytes([0xfb; TX_HASH_LEN]);
        let mut second_bytes = [0u8; TX_HASH_LEN];
        second_bytes[0] = 1;
        let second = TxHash::from_bytes(second_bytes);

        let text = format!(
            "{}:0,AQI:3,-_8=;{}:1,BA==",
            wire_hash(&first),
            wire_hash(&second)
        );
        let parsed = parse_input_signatures(&text).unwrap();
        assert_eq!(
            parsed,
            vec![
                InputSignature {
                    tx_hash: first,
                    input_index: 0,
                    signature: vec![1, 2]
                },
                InputSignature {
                    tx_hash: first,
                    input_index: 3,
                    signature: vec![0xfb, 0xff]
                },
                InputSignature {
                    tx_hash: second,
                    input_index: 1,
                    signature: vec![4]
                },
            ]
        );
    }

    #[test]
    fn test_hash_is_byte_reversed() {
        let mut wire = [0u8; TX_HASH_LEN];
        wire[0] = 0xaa;
        let text = format!("{}:0,AA", URL_SAFE_LENIENT.encode(wire));
        let parsed = parse_input_signatures(&text).unwrap();
        assert_eq!(parsed[0].tx_hash.as_bytes()[TX_HASH_LEN - 1], 0xaa);
        assert_eq!(parsed[0].tx_hash.as_bytes()[0], 0);
    }

    #[test]
    fn test_empty_signature_response() {
        assert!(parse_input_signatures("").unwrap().is_empty());
        assert!(parse_input_signatures("  \n").unwrap().is_empty());
        // A hash with no inputs contributes nothing
        let hash = TxHash::from_bytes([3; TX_HASH_LEN]);
        assert!(parse_input_signatures(&wire_hash(&hash)).unwrap().is_empty());
    }

    #[test]
    fn test_malformed_signature_response() {
        let hash = wire_hash(&TxHash::from_bytes([3; TX_HASH_LEN]));
        for text in [
            "AQID:0,AA".to_string(),
            format!("{}:0", hash),
            format!("{}:x,AA", hash),
            format!("{}:-1,AA", hash),
            format!("{}:0,!!", hash),
            "!!:0,AA".to_string(),
        ] {
            assert!(
                matches!(parse_input_signatures(&text), Err(Error::Decode(_))),
                "{} should not parse",
                text
            );
        }
    }

    #[test]
    fn test_block_time_pins_to_earliest() {
        let times: BTreeMap<u32, i64> = [(1_000, 50), (1_001, 60), (1_005, 90)].into();
        assert_eq!(block_time(&times, 0), Some(50));
        assert_eq!(block_time(&times, 900), Some(50));
        assert_eq!(block_time(&times, 1_000), Some(50));
        assert_eq!(block_time(&times, 1_001), Some(60));
        assert_eq!(block_time(&times, 1_003), None);
        assert_eq!(block_time(&BTreeMap::new(), 0), None);
    }
}
