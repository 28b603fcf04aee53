//! QR transport codec for air-gapped signing
//!
//! The hot device sends an unsigned transaction summary to the cold device
//! as a separator-joined text payload; the cold device answers with the
//! input signatures. Three request layouts are understood:
//!
//! | format    | separator | fields                                                        |
//! |-----------|-----------|---------------------------------------------------------------|
//! | legacy    | `:`       | `sender:fee:to:amount[:hash...]` with plain addresses          |
//! | no-change | `/`       | `sender/fee/to/amount[/hash...]` with compact-hex addresses    |
//! | change    | `/`       | `sender/change/change_amount/fee/to/amount[/hash...]`, compact |
//!
//! Amounts are unprefixed lowercase hex. Compact-hex addresses are the
//! uppercase hex of the 20-byte hash without its version byte. Only the
//! change layout is written (the change pair is omitted when there is no
//! change, which reads back through the no-change path).

use crate::address::{
    address_from_public_key, address_to_compact_hex, compact_hex_to_address, decode_address,
    is_valid_address,
};
use crate::{Address, Error, Result, UnsignedTransaction};
use airgap_params::Network;
use serde::{Serialize, Serializer};
use tracing::debug;

/// Field separator of the current formats
pub const SEPARATOR: char = '/';
/// Field separator of the legacy format
pub const LEGACY_SEPARATOR: char = ':';
/// Marks a public key generated from an external entropy source
pub const XRANDOM_FLAG: char = '+';

const QR_LETTER_ESCAPE: char = '*';

const CHANGE_FIELDS: usize = 6;
const NO_CHANGE_FIELDS: usize = 4;

/// Transaction summary carried between hot and cold devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxTransport {
    /// Sending address
    pub my_address: String,
    /// Change address, present only with a non-zero change amount
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_address: Option<String>,
    /// Change amount
    pub change_amount: u64,
    /// Fee
    pub fee: u64,
    /// Destination address
    pub to_address: String,
    /// Amount paid to the destination
    pub to_amount: u64,
    /// Per-input signing hashes (or signatures), in input order
    #[serde(serialize_with = "serialize_hex_list")]
    pub hashes: Vec<Vec<u8>>,
}

fn serialize_hex_list<S: Serializer>(
    hashes: &[Vec<u8>],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(hashes.iter().map(hex::encode_upper))
}

impl TxTransport {
    /// Summary of an unsigned transaction
    ///
    /// The change pair is kept only when `change_address` receives a
    /// non-zero amount.
    pub fn from_unsigned(unsigned: &UnsignedTransaction, change_address: Option<&str>) -> Self {
        let change = change_address
            .map(|address| (address, unsigned.tx.amount_sent_to(address)))
            .filter(|(_, amount)| *amount != 0);

        Self {
            my_address: unsigned.from_address.clone(),
            change_address: change.map(|(address, _)| address.to_string()),
            change_amount: change.map_or(0, |(_, amount)| amount),
            fee: unsigned.fee,
            to_address: unsigned.to_address.clone(),
            to_amount: unsigned.to_amount(),
            hashes: unsigned.input_hashes.clone(),
        }
    }

    /// Whether the payload carries a change output
    pub fn has_change(&self) -> bool {
        self.change_address.is_some() && self.change_amount != 0
    }
}

/// Request payload layouts, in decode precedence order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFormat {
    /// Six compact-hex fields including the change pair
    Change,
    /// Four compact-hex fields
    NoChange,
    /// Four plain-text fields
    Legacy,
}

impl TransportFormat {
    /// Decode precedence
    pub const DECODE_ORDER: [TransportFormat; 3] = [
        TransportFormat::Change,
        TransportFormat::NoChange,
        TransportFormat::Legacy,
    ];

    /// Whether this layout claims the payload
    ///
    /// The first claiming layout decides the outcome; a claimed payload
    /// that then fails to parse yields nothing rather than falling through.
    fn claims(self, fields: &[&str], network: &Network) -> bool {
        match self {
            TransportFormat::Change => {
                fields.len() >= CHANGE_FIELDS && is_compact_address(fields[1], network)
            }
            TransportFormat::NoChange => {
                !fields.is_empty() && !is_valid_address(fields[0], network)
            }
            TransportFormat::Legacy => true,
        }
    }

    fn parse(self, fields: &[&str], network: &Network) -> Option<TxTransport> {
        match self {
            TransportFormat::Change => {
                if fields.len() < CHANGE_FIELDS {
                    return None;
                }
                Some(TxTransport {
                    my_address: compact_address(fields[0], network)?,
                    change_address: Some(compact_address(fields[1], network)?),
                    change_amount: parse_hex_amount(fields[2])?,
                    fee: parse_hex_amount(fields[3])?,
                    to_address: compact_address(fields[4], network)?,
                    to_amount: parse_hex_amount(fields[5])?,
                    hashes: parse_hashes(&fields[CHANGE_FIELDS..])?,
                })
            }
            TransportFormat::NoChange => {
                if fields.len() < NO_CHANGE_FIELDS {
                    return None;
                }
                Some(TxTransport {
                    my_address: compact_address(fields[0], network)?,
                    change_address: None,
                    change_amount: 0,
                    fee: parse_hex_amount(fields[1])?,
                    to_address: compact_address(fields[2], network)?,
                    to_amount: parse_hex_amount(fields[3])?,
                    hashes: parse_hashes(&fields[NO_CHANGE_FIELDS..])?,
                })
            }
            TransportFormat::Legacy => {
                if fields.len() < NO_CHANGE_FIELDS {
                    return None;
                }
                Some(TxTransport {
                    my_address: plain_address(fields[0], network)?,
                    change_address: None,
                    change_amount: 0,
                    fee: parse_hex_amount(fields[1])?,
                    to_address: plain_address(fields[2], network)?,
                    to_amount: parse_hex_amount(fields[3])?,
                    hashes: parse_hashes(&fields[NO_CHANGE_FIELDS..])?,
                })
            }
        }
    }
}

fn is_compact_address(field: &str, network: &Network) -> bool {
    compact_address(field, network).is_some()
}

fn compact_address(field: &str, network: &Network) -> Option<String> {
    let address = compact_hex_to_address(field, network).ok()?;
    is_valid_address(&address, network).then_some(address)
}

fn plain_address(field: &str, network: &Network) -> Option<String> {
    is_valid_address(field, network).then(|| field.to_string())
}

fn parse_hex_amount(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(field, 16).ok()
}

fn parse_hashes(fields: &[&str]) -> Option<Vec<Vec<u8>>> {
    fields
        .iter()
        .filter(|field| !field.is_empty())
        .map(|field| hex::decode(field).ok())
        .collect()
}

/// Compact hex drops the version byte and decodes as P2PKH, so only
/// P2PKH addresses survive the trip.
fn to_compact(address: &str) -> Result<String> {
    let (version, _) = decode_address(address)
        .map_err(|e| Error::Transport(format!("cannot encode {}: {}", address, e)))?;
    let p2pkh = [Network::mainnet(), Network::testnet()]
        .iter()
        .any(|network| network.p2pkh_version == version);
    if !p2pkh {
        return Err(Error::Transport(format!(
            "cannot encode {}: version {:#04x} is not pay-to-pubkey-hash",
            address, version
        )));
    }
    address_to_compact_hex(address)
        .map_err(|e| Error::Transport(format!("cannot encode {}: {}", address, e)))
}

fn join_fields(fields: Vec<String>, hashes: &[Vec<u8>], separator: char) -> String {
    fields
        .into_iter()
        .chain(hashes.iter().map(hex::encode_upper))
        .collect::<Vec<_>>()
        .join(&separator.to_string())
}

/// Encode a request payload in the current format
pub fn encode_transport(transport: &TxTransport) -> Result<String> {
    let mut fields = vec![to_compact(&transport.my_address)?];
    if let Some(change_address) = transport
        .change_address
        .as_deref()
        .filter(|_| transport.change_amount != 0)
    {
        fields.push(to_compact(change_address)?);
        fields.push(format!("{:x}", transport.change_amount));
    }
    fields.push(format!("{:x}", transport.fee));
    fields.push(to_compact(&transport.to_address)?);
    fields.push(format!("{:x}", transport.to_amount));

    Ok(join_fields(fields, &transport.hashes, SEPARATOR))
}

/// Encode a request payload in the legacy format understood by old cold devices
///
/// The legacy layout has no change pair; change fields are dropped.
pub fn encode_legacy(transport: &TxTransport) -> String {
    let fields = vec![
        transport.my_address.clone(),
        format!("{:x}", transport.fee),
        transport.to_address.clone(),
        format!("{:x}", transport.to_amount),
    ];
    join_fields(fields, &transport.hashes, LEGACY_SEPARATOR)
}

/// Decode a request payload and report which layout matched
pub fn detect_transport(payload: &str, network: &Network) -> Option<(TransportFormat, TxTransport)> {
    let payload = payload.trim();
    for separator in [SEPARATOR, LEGACY_SEPARATOR] {
        let fields: Vec<&str> = payload.split(separator).collect();
        let Some(format) = TransportFormat::DECODE_ORDER
            .into_iter()
            .find(|format| format.claims(&fields, network))
        else {
            continue;
        };
        match format.parse(&fields, network) {
            Some(transport) => return Some((format, transport)),
            None => debug!(?format, %separator, "payload claimed but not parsed"),
        }
    }
    None
}

/// Decode a request payload in any supported layout
pub fn decode_transport(payload: &str, network: &Network) -> Option<TxTransport> {
    detect_transport(payload, network).map(|(_, transport)| transport)
}

/// Encode the cold device's signatures for the trip back
pub fn encode_signatures(signatures: &[Vec<u8>]) -> String {
    join_fields(Vec::new(), signatures, SEPARATOR)
}

/// Decode a signature payload; any non-hex field rejects the whole payload
pub fn decode_signatures(payload: &str) -> Option<Vec<Vec<u8>>> {
    let fields: Vec<&str> = payload
        .trim()
        .split([SEPARATOR, LEGACY_SEPARATOR])
        .collect();
    parse_hashes(&fields)
}

/// Make text safe for the QR alphanumeric mode
///
/// Every uppercase letter is prefixed with `*`, then the whole text is
/// uppercased.
pub fn escape_qr_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        if c.is_ascii_uppercase() {
            escaped.push(QR_LETTER_ESCAPE);
        }
        escaped.push(c.to_ascii_uppercase());
    }
    escaped
}

/// Reverse [`escape_qr_text`]
pub fn unescape_qr_text(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            QR_LETTER_ESCAPE if chars.peek().is_some_and(|n| n.is_ascii_alphabetic()) => {
                if let Some(letter) = chars.next() {
                    plain.push(letter.to_ascii_uppercase());
                }
            }
            c => plain.push(c.to_ascii_lowercase()),
        }
    }
    plain
}

/// Export the public keys of key-bearing addresses for a watch-only import
pub fn encode_public_keys(addresses: &[Address]) -> String {
    addresses
        .iter()
        .filter(|a| a.has_private_key)
        .map(|a| {
            let key = hex::encode_upper(&a.pub_key);
            if a.is_from_xrandom {
                format!("{}{}", XRANDOM_FLAG, key)
            } else {
                key
            }
        })
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

/// Import an exported public key list as watch-only addresses
pub fn decode_public_keys(payload: &str, network: &Network) -> Option<Vec<Address>> {
    payload
        .trim()
        .split(SEPARATOR)
        .filter(|field| !field.is_empty())
        .map(|field| {
            let (xrandom, key) = match field.strip_prefix(XRANDOM_FLAG) {
                Some(key) => (true, key),
                None => (false, field),
            };
            let pub_key = hex::decode(key).ok().filter(|k| !k.is_empty())?;
            let address = address_from_public_key(&pub_key, network);
            let address = Address::watch_only(address, pub_key);
            Some(if xrandom { address.from_xrandom() } else { address })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_address;

    fn addr(seed: u8) -> String {
        encode_address(&[seed; 20], Network::mainnet().p2pkh_version)
    }

    #[test]
    fn test_hex_amounts() {
        assert_eq!(parse_hex_amount("2710"), Some(10_000));
        assert_eq!(parse_hex_amount("+10"), None);
        assert_eq!(parse_hex_amount(""), None);
        assert_eq!(parse_hex_amount("ffffffffffffffffff"), None);
    }

    #[test]
    fn test_change_claim_requires_address_shaped_second_field() {
        let network = Network::mainnet();
        let compact = address_to_compact_hex(&addr(1)).unwrap();
        let fields = [compact.as_str(), "2710", compact.as_str(), "64"];
        assert!(!TransportFormat::Change.claims(&fields, &network));
        assert!(TransportFormat::NoChange.claims(&fields, &network));
    }

    #[test]
    fn test_claimed_payload_with_bad_address_is_rejected() {
        let network = Network::mainnet();
        let compact = address_to_compact_hex(&addr(1)).unwrap();
        // no-change layout whose destination is not address-shaped
        let payload = format!("{}/2710/ABCD/64/00FF", compact);
        assert_eq!(decode_transport(&payload, &network), None);
    }

    #[test]
    fn test_script_hash_addresses_cannot_be_compacted() {
        let network = Network::mainnet();
        let p2sh = encode_address(&[7; 20], network.p2sh_version);
        let transport = TxTransport {
            my_address: addr(1),
            change_address: Some(addr(3)),
            change_amount: 5,
            fee: 10,
            to_address: p2sh.clone(),
            to_amount: 100,
            hashes: vec![vec![1; 32]],
        };
        assert!(matches!(encode_transport(&transport), Err(Error::Transport(_))));

        let p2sh_change = TxTransport {
            to_address: addr(2),
            change_address: Some(p2sh.clone()),
            ..transport.clone()
        };
        assert!(encode_transport(&p2sh_change).is_err());

        let p2sh_sender = TxTransport {
            to_address: addr(2),
            my_address: p2sh,
            ..transport
        };
        assert!(encode_transport(&p2sh_sender).is_err());

        let testnet = encode_address(&[7; 20], Network::testnet().p2pkh_version);
        assert!(to_compact(&testnet).is_ok());
    }

    #[test]
    fn test_escape_examples() {
        assert_eq!(escape_qr_text("aB1c"), "A*B1C");
        assert_eq!(unescape_qr_text("A*B1C"), "aB1c");
    }

    #[test]
    fn test_signatures() {
        let sigs = vec![vec![0x30, 0x45], vec![0xab]];
        let payload = encode_signatures(&sigs);
        assert_eq!(payload, "3045/AB");
        assert_eq!(decode_signatures(&payload), Some(sigs));
        assert_eq!(decode_signatures("3045/XYZ"), None);
        assert_eq!(decode_signatures("3045//AB/"), Some(vec![vec![0x30, 0x45], vec![0xab]]));
    }
}
