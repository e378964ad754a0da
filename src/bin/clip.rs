use std::fs;
use std::io::{self, Read, Write};

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};

use cliprelay::config::{ClipCli, ClipCommand, ClipConfig};
use cliprelay::keys::{
    decrypt_from_peer, encrypt_for_peer, ExchangeError, FileKeyStore, PublicBundle,
};
use cliprelay::logging;
use cliprelay::relay_transport;

fn read_stdin() -> anyhow::Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read stdin")?;
    Ok(buffer)
}

fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = ClipCli::parse();
    let config = ClipConfig::from_cli_and_env(cli.relay_url, cli.home);
    let store = FileKeyStore::open(&config.home);

    match cli.command {
        ClipCommand::Init { device_id } => {
            if device_id.is_empty() {
                bail!("device id must not be empty");
            }
            store.generate(&device_id)?;
            println!("keys for {device_id} written to {}", store.path().display());
        }
        ClipCommand::Export => {
            let bundle = store.export_public_bundle()?;
            println!("{}", serde_json::to_string_pretty(&bundle)?);
        }
        ClipCommand::Import { path } => {
            let raw = match path {
                Some(path) => fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => read_stdin()?,
            };
            let bundle: PublicBundle =
                serde_json::from_str(&raw).context("not a public key bundle")?;
            let peer_id = store.import_public_bundle(&bundle)?;
            println!("paired with {peer_id}");
        }
        ClipCommand::Peers => {
            for peer in store.list_peers()? {
                println!("{peer}");
            }
        }
        ClipCommand::Send {
            recipient_id,
            content_type,
            content,
        } => {
            let content = match content {
                Some(content) => content,
                None => read_stdin()?,
            };
            let bundle = encrypt_for_peer(&store, content.as_bytes(), content_type, &recipient_id)?;
            relay_transport::upload_bundle(&config.relay_url, &recipient_id, &bundle)?;
            info!(
                recipient = %logging::peer_id(&recipient_id),
                content_type = %content_type,
                "clip: sent"
            );
        }
        ClipCommand::Receive => {
            let Some(device_id) = store.device_id()? else {
                bail!("no device keys; run `clip init <device-id>` first");
            };
            let Some(bundle) = relay_transport::fetch_bundle(&config.relay_url, &device_id)? else {
                info!("clip: nothing pending");
                return Ok(());
            };
            match decrypt_from_peer(&store, &bundle) {
                Ok(plaintext) => {
                    let mut stdout = io::stdout().lock();
                    stdout.write_all(&plaintext)?;
                    stdout.flush()?;
                }
                Err(ExchangeError::Bundle(err)) => {
                    warn!(
                        sender = %logging::peer_id(&bundle.metadata.sender_id),
                        "clip: {err}"
                    );
                    bail!(err);
                }
                Err(err) => return Err(err.into()),
            }
        }
        ClipCommand::Cleanup => {
            let removed = relay_transport::request_cleanup(&config.relay_url)?;
            println!("removed {removed} expired bundle(s)");
        }
    }
    Ok(())
}
