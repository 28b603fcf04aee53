//! Operator tool for inspecting QR payloads
//!
//! Decodes what the hot and cold devices exchange so a failed scan can be
//! diagnosed without either device:
//! - Unsigned transaction requests (all three layouts)
//! - Signature replies
//! - Public-key exports
//! - Saved history API pages

use airgap_core::{
    decode_public_keys, decode_signatures, detect_transport, escape_qr_text, unescape_qr_text,
};
use airgap_params::{Network, NetworkType, WalletConfig};
use airgap_sync::HistoryPage;
use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::debug;

const RESCAN: &str = "please re-scan the QR code";

#[derive(Parser)]
#[command(name = "airgap-qr")]
#[command(about = "Inspect payloads exchanged with the offline signer", long_about = None)]
struct Cli {
    /// Network (mainnet or testnet); defaults to AIRGAP_NETWORK, then mainnet
    #[arg(short, long, global = true)]
    network: Option<NetworkType>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an unsigned transaction request
    Decode {
        /// Payload text
        payload: String,

        /// Payload is QR-escaped
        #[arg(short, long)]
        escaped: bool,
    },

    /// Escape text for the QR alphanumeric mode
    Escape {
        /// Text to escape
        text: String,
    },

    /// Reverse QR escaping
    Unescape {
        /// Escaped text
        text: String,
    },

    /// Decode a signature reply
    Signatures {
        /// Payload text
        payload: String,
    },

    /// Decode a public-key export into watch-only addresses
    Pubkeys {
        /// Payload text
        payload: String,
    },

    /// Summarize a saved history API page
    History {
        /// JSON file
        file: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    airgap_sync::init_logging();

    let cli = Cli::parse();
    let network = match cli.network {
        Some(network) => Network::from_type(network),
        None => WalletConfig::from_env()
            .context("reading AIRGAP_* configuration")?
            .network(),
    };
    debug!(network = ?network.network_type, "network selected");

    let output = match cli.command {
        Commands::Decode { payload, escaped } => {
            let payload = if escaped {
                unescape_qr_text(&payload)
            } else {
                payload
            };
            let Some((format, transport)) = detect_transport(&payload, &network) else {
                bail!("unrecognized transaction request, {}", RESCAN);
            };
            json!({ "format": format, "transport": transport })
        }
        Commands::Escape { text } => json!(escape_qr_text(&text)),
        Commands::Unescape { text } => json!(unescape_qr_text(&text)),
        Commands::Signatures { payload } => {
            let Some(signatures) = decode_signatures(&payload) else {
                bail!("unreadable signature reply, {}", RESCAN);
            };
            json!(signatures
                .iter()
                .map(hex::encode_upper)
                .collect::<Vec<_>>())
        }
        Commands::Pubkeys { payload } => {
            let Some(addresses) = decode_public_keys(&payload, &network) else {
                bail!("unreadable public-key export, {}", RESCAN);
            };
            json!(addresses
                .iter()
                .map(|a| json!({
                    "address": a.address,
                    "pub_key": hex::encode_upper(&a.pub_key),
                    "xrandom": a.is_from_xrandom,
                }))
                .collect::<Vec<_>>())
        }
        Commands::History { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let page = HistoryPage::from_json(&text)?;
            json!({
                "rows": page.records.len(),
                "heights": page.records.iter().map(|r| r.height).collect::<Vec<_>>(),
                "block_count": page.block_count,
                "tx_cnt": page.tx_cnt,
            })
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
