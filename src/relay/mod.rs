//! Blind relay for clipboard bundles.
//!
//! The relay never holds a private key. It reads `sender_id`, `nonce` and
//! `content_type` out of an uploaded bundle and otherwise stores the JSON
//! verbatim until the recipient fetches it once or its storage TTL lapses.

mod replay;
mod shard;
mod store;

pub use replay::{ReplayGuard, DEFAULT_REPLAY_WINDOW};
pub use shard::{ShardedMap, DEFAULT_SHARDS};
pub use store::{RelayStore, StorageTtlPolicy, TakeOutcome};

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::logging;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub storage_ttl: StorageTtlPolicy,
    pub replay_window: usize,
    pub shards: usize,
    /// Zero disables the background sweep.
    pub sweep_interval: Duration,
    pub max_body_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            storage_ttl: StorageTtlPolicy::default(),
            replay_window: DEFAULT_REPLAY_WINDOW,
            shards: DEFAULT_SHARDS,
            sweep_interval: Duration::from_secs(60),
            max_body_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Replay detected")]
    ReplayDetected,
    #[error("No bundle for this recipient")]
    NotFound,
    #[error("Bundle expired")]
    Gone,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::ReplayDetected => StatusCode::CONFLICT,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Gone => StatusCode::GONE,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub status: &'static str,
    pub stored_for: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub status: &'static str,
    pub removed: usize,
}

/// Relay service state, cloned into every handler.
#[derive(Clone)]
pub struct RelayState {
    config: RelayConfig,
    store: Arc<RelayStore>,
    replay: Arc<ReplayGuard>,
}

pub fn app(state: RelayState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(healthcheck))
        .route("/upload/:recipient_id", post(upload_handler))
        .route("/fetch/:recipient_id", get(fetch_handler))
        .route("/cleanup", post(cleanup_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .with_state(state)
}

impl RelayState {
    pub fn new(config: RelayConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RelayConfig, clock: SharedClock) -> Self {
        let store = RelayStore::new(config.storage_ttl.clone(), config.shards, clock);
        let replay = ReplayGuard::new(config.replay_window, config.shards);
        Self {
            config,
            store: Arc::new(store),
            replay: Arc::new(replay),
        }
    }

    /// Accept a bundle for `recipient_id`.
    ///
    /// A rejected upload leaves both the replay record and the store as
    /// they were.
    pub fn upload(&self, recipient_id: &str, bundle: Value) -> Result<UploadReceipt, RelayError> {
        if !bundle.is_object() {
            return Err(RelayError::BadRequest(
                "bundle must be a JSON object".to_string(),
            ));
        }
        let (Some(sender_id), Some(nonce)) = (sender_id_from(&bundle), nonce_from(&bundle)) else {
            return Err(RelayError::BadRequest(
                "metadata.sender_id and metadata.nonce are required".to_string(),
            ));
        };
        let (sender_id, nonce) = (sender_id.to_string(), nonce.to_string());

        if !self.replay.check_and_record(&sender_id, &nonce) {
            warn!(
                sender = %logging::peer_id(&sender_id),
                nonce = %logging::nonce_id(&nonce),
                "relay: replay rejected"
            );
            return Err(RelayError::ReplayDetected);
        }

        let overwritten = self.store.put(recipient_id, bundle);
        info!(
            sender = %logging::peer_id(&sender_id),
            recipient = %logging::peer_id(recipient_id),
            nonce = %logging::nonce_id(&nonce),
            overwritten,
            "relay: bundle stored"
        );
        Ok(UploadReceipt {
            status: "ok",
            stored_for: recipient_id.to_string(),
        })
    }

    /// One-time delivery of the pending bundle for `recipient_id`.
    pub fn fetch(&self, recipient_id: &str) -> Result<Value, RelayError> {
        match self.store.take(recipient_id) {
            TakeOutcome::Found(bundle) => {
                info!(recipient = %logging::peer_id(recipient_id), "relay: bundle delivered");
                Ok(bundle)
            }
            TakeOutcome::Expired => {
                info!(
                    recipient = %logging::peer_id(recipient_id),
                    "relay: bundle expired before fetch"
                );
                Err(RelayError::Gone)
            }
            TakeOutcome::NotFound => {
                debug!(recipient = %logging::peer_id(recipient_id), "relay: nothing pending");
                Err(RelayError::NotFound)
            }
        }
    }

    pub fn cleanup(&self) -> CleanupReport {
        let removed = self.store.sweep_expired();
        if removed > 0 {
            info!(removed, "relay: swept expired bundles");
        }
        CleanupReport {
            status: "cleanup_done",
            removed,
        }
    }

    pub fn pending(&self) -> usize {
        self.store.pending()
    }

    pub fn start_sweep_task(&self, mut shutdown_rx: tokio::sync::oneshot::Receiver<()>) {
        if self.config.sweep_interval.is_zero() {
            return;
        }
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(state.config.sweep_interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        state.cleanup();
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }
        });
    }
}

async fn healthcheck() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn upload_handler(
    State(state): State<RelayState>,
    Path(recipient_id): Path<String>,
    body: Bytes,
) -> Result<Json<UploadReceipt>, RelayError> {
    let bundle: Value = serde_json::from_slice(&body)
        .map_err(|err| RelayError::BadRequest(format!("invalid JSON body: {err}")))?;
    state.upload(&recipient_id, bundle).map(Json)
}

async fn fetch_handler(
    State(state): State<RelayState>,
    Path(recipient_id): Path<String>,
) -> Result<Json<Value>, RelayError> {
    state.fetch(&recipient_id).map(Json)
}

async fn cleanup_handler(State(state): State<RelayState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.cleanup()))
}

fn non_empty_str<'a>(bundle: &'a Value, pointers: [&str; 2]) -> Option<&'a str> {
    pointers
        .into_iter()
        .filter_map(|pointer| bundle.pointer(pointer).and_then(Value::as_str))
        .find(|value| !value.is_empty())
}

fn sender_id_from(bundle: &Value) -> Option<&str> {
    non_empty_str(bundle, ["/metadata/sender_id", "/sender_id"])
}

fn nonce_from(bundle: &Value) -> Option<&str> {
    non_empty_str(bundle, ["/metadata/nonce", "/nonce"])
}
