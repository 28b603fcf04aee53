//! Tracing subscriber setup for hosts and background runs

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or invalid
const DEFAULT_FILTER: &str = "info";

fn default_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter())
}

/// Human-readable logs filtered by `RUST_LOG` (default `info`)
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .try_init()
        .is_ok()
}

/// JSON logs with thread and source location, filtered by `RUST_LOG` (default `info`)
pub fn init_json_logging() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .json()
        .try_init()
        .is_ok()
}
