use anyhow::Context;
use clap::Parser;
use tokio::sync::oneshot;
use tracing::info;

use cliprelay::config::{RelayCli, RelayServerConfig};
use cliprelay::logging;
use cliprelay::relay::{app, RelayState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let config = RelayServerConfig::from_cli_and_env(RelayCli::parse());

    let state = RelayState::new(config.relay.clone());
    let (sweep_tx, sweep_rx) = oneshot::channel();
    state.start_sweep_task(sweep_rx);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(
        addr = %config.bind_addr,
        sweep_secs = config.relay.sweep_interval.as_secs(),
        max_body_bytes = config.relay.max_body_bytes,
        replay_window = config.relay.replay_window,
        "relay: listening"
    );

    axum::serve(listener, app(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("relay: shutting down");
        })
        .await
        .context("server error")?;

    let _ = sweep_tx.send(());
    Ok(())
}
