//! Command-line and environment configuration for the binaries.
//!
//! CLI arguments take precedence over environment variables, which take
//! precedence over built-in defaults.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::protocol::ContentType;
use crate::relay::RelayConfig;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_RELAY_URL: &str = "http://127.0.0.1:8000";

/// Blind relay for end-to-end encrypted clipboard bundles.
///
/// Holds at most one pending bundle per recipient and hands it out once.
#[derive(Parser, Debug, Default)]
#[command(name = "cliprelay-relay", version, about)]
pub struct RelayCli {
    /// HTTP bind address [env: CLIPRELAY_BIND] [default: 127.0.0.1:8000]
    #[arg(long, short = 'b')]
    pub bind: Option<String>,

    /// Seconds between expiry sweeps, 0 disables [env: CLIPRELAY_SWEEP_SECS] [default: 60]
    #[arg(long)]
    pub sweep_secs: Option<u64>,

    /// Largest accepted upload body in bytes [env: CLIPRELAY_MAX_BODY_BYTES] [default: 1048576]
    #[arg(long)]
    pub max_body_bytes: Option<usize>,

    /// Nonces remembered per sender [env: CLIPRELAY_REPLAY_WINDOW] [default: 100]
    #[arg(long)]
    pub replay_window: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RelayServerConfig {
    pub bind_addr: String,
    pub relay: RelayConfig,
}

impl RelayServerConfig {
    pub fn from_cli_and_env(cli: RelayCli) -> Self {
        Self::from_cli_with(cli, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary variable lookup. Unparseable values fall
    /// back to the default.
    pub fn from_cli_with(cli: RelayCli, var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = RelayConfig::default();
        let parsed = |key: &str| var(key).and_then(|value| value.trim().parse::<u64>().ok());

        let bind_addr = cli
            .bind
            .or_else(|| var("CLIPRELAY_BIND"))
            .unwrap_or_else(|| DEFAULT_BIND.to_string());

        let sweep_interval = cli
            .sweep_secs
            .or_else(|| parsed("CLIPRELAY_SWEEP_SECS"))
            .map(Duration::from_secs)
            .unwrap_or(defaults.sweep_interval);

        let max_body_bytes = cli
            .max_body_bytes
            .or_else(|| parsed("CLIPRELAY_MAX_BODY_BYTES").map(|v| v as usize))
            .unwrap_or(defaults.max_body_bytes);

        let replay_window = cli
            .replay_window
            .or_else(|| parsed("CLIPRELAY_REPLAY_WINDOW").map(|v| v as usize))
            .unwrap_or(defaults.replay_window);

        Self {
            bind_addr,
            relay: RelayConfig {
                sweep_interval,
                max_body_bytes,
                replay_window,
                ..defaults
            },
        }
    }
}

/// Send and receive clipboard content through a relay.
#[derive(Parser, Debug)]
#[command(name = "clip", version, about)]
pub struct ClipCli {
    /// Relay base URL [env: CLIPRELAY_URL] [default: http://127.0.0.1:8000]
    #[arg(long, short = 'r', global = true)]
    pub relay_url: Option<String>,

    /// Key store directory [env: CLIPRELAY_HOME] [default: ~/.cliprelay]
    #[arg(long, short = 'd', global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: ClipCommand,
}

#[derive(Subcommand, Debug)]
pub enum ClipCommand {
    /// Generate this device's keys
    Init {
        /// Device id peers will know this device by
        device_id: String,
    },
    /// Print this device's public bundle as JSON
    Export,
    /// Import a peer's public bundle from a file, or stdin when omitted
    Import { path: Option<PathBuf> },
    /// List paired peers
    Peers,
    /// Encrypt text for a peer and upload it
    Send {
        recipient_id: String,
        /// text, url, password or file
        #[arg(long, short = 't', default_value = "text")]
        content_type: ContentType,
        /// Content to send; read from stdin when omitted
        content: Option<String>,
    },
    /// Fetch and decrypt the bundle waiting for this device
    Receive,
    /// Ask the relay to drop expired bundles
    Cleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipConfig {
    pub relay_url: String,
    pub home: PathBuf,
}

impl ClipConfig {
    pub fn from_cli_and_env(relay_url: Option<String>, home: Option<PathBuf>) -> Self {
        Self::from_cli_with(relay_url, home, |key| std::env::var(key).ok())
    }

    pub fn from_cli_with(
        relay_url: Option<String>,
        home: Option<PathBuf>,
        var: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let relay_url = relay_url
            .or_else(|| var("CLIPRELAY_URL"))
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());

        let home = home
            .or_else(|| var("CLIPRELAY_HOME").map(PathBuf::from))
            .unwrap_or_else(|| {
                var("HOME")
                    .map(|h| PathBuf::from(h).join(".cliprelay"))
                    .unwrap_or_else(|| PathBuf::from(".cliprelay"))
            });

        Self { relay_url, home }
    }
}
