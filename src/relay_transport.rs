//! Client-side relay transport helpers.
//!
//! Blocking HTTP calls for the two operations a clipboard client needs:
//! uploading a bundle for a peer and collecting the one pending for itself.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::Bundle;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("relay returned {status}: {detail}")]
    Status { status: u16, detail: String },
    #[error("relay request failed: {0}")]
    Transport(String),
    #[error("invalid relay response: {0}")]
    Decode(String),
}

fn agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build()
}

fn status_error(response: ureq::Response) -> TransportError {
    let status = response.status();
    let detail = response
        .into_json::<serde_json::Value>()
        .ok()
        .and_then(|body| body.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or_default();
    TransportError::Status { status, detail }
}

/// Post a bundle to the relay's `/upload/{recipient_id}` endpoint.
pub fn upload_bundle(
    relay_url: &str,
    recipient_id: &str,
    bundle: &Bundle,
) -> Result<(), TransportError> {
    let url = format!("{}/upload/{}", relay_url.trim_end_matches('/'), recipient_id);
    let body = bundle
        .to_value()
        .map_err(|e| TransportError::Decode(format!("serialize bundle: {e}")))?;
    match agent().post(&url).send_json(body) {
        Ok(_) => Ok(()),
        Err(ureq::Error::Status(_, response)) => Err(status_error(response)),
        Err(e) => Err(TransportError::Transport(e.to_string())),
    }
}

/// Fetch the pending bundle for `recipient_id`.
///
/// The relay deletes the bundle as it returns it. Nothing pending (404) and
/// an expired slot (410) both come back as `Ok(None)`.
pub fn fetch_bundle(relay_url: &str, recipient_id: &str) -> Result<Option<Bundle>, TransportError> {
    let url = format!("{}/fetch/{}", relay_url.trim_end_matches('/'), recipient_id);
    match agent().get(&url).call() {
        Ok(response) => response
            .into_json::<Bundle>()
            .map(Some)
            .map_err(|e| TransportError::Decode(e.to_string())),
        Err(ureq::Error::Status(404 | 410, _)) => Ok(None),
        Err(ureq::Error::Status(_, response)) => Err(status_error(response)),
        Err(e) => Err(TransportError::Transport(e.to_string())),
    }
}

/// Ask the relay to sweep expired slots; returns the removed count.
pub fn request_cleanup(relay_url: &str) -> Result<usize, TransportError> {
    let url = format!("{}/cleanup", relay_url.trim_end_matches('/'));
    let response = match agent().post(&url).call() {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => return Err(status_error(response)),
        Err(e) => return Err(TransportError::Transport(e.to_string())),
    };
    let body: serde_json::Value = response
        .into_json()
        .map_err(|e| TransportError::Decode(e.to_string()))?;
    body.get("removed")
        .and_then(|removed| removed.as_u64())
        .map(|removed| removed as usize)
        .ok_or_else(|| TransportError::Decode("missing removed count".to_string()))
}
