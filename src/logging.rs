//! Logging setup and identifier formatting.
//!
//! Log lines carry shortened identifiers only: peer ids and replay nonces are
//! cut to their first seven characters, so a log line can be correlated with
//! a device without echoing full values.

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

const LOG_ID_TRUNCATE_LEN: usize = 7;

fn truncate_id(id: &str) -> &str {
    let end = id
        .char_indices()
        .nth(LOG_ID_TRUNCATE_LEN)
        .map(|(i, _)| i)
        .unwrap_or(id.len());
    &id[..end]
}

/// Format a peer id, e.g. `p-laptop1`.
pub fn peer_id(id: &str) -> String {
    format!("p-{}", truncate_id(id))
}

/// Format a metadata nonce, e.g. `n-0011223`.
pub fn nonce_id(nonce: &str) -> String {
    format!("n-{}", truncate_id(nonce))
}
