//! Clipboard bundle wire types.
//!
//! ## Wire summary
//! - A [`Bundle`] carries AES-GCM ciphertext, its nonce and tag, the sender's
//!   ephemeral X25519 public key, signed [`Metadata`] and the Ed25519
//!   signature. Byte fields are standard base64 with padding.
//! - The signature covers the canonical metadata bytes: compact JSON with
//!   keys in ascending order (`content_type`, `nonce`, `security_level`,
//!   `sender_id`, `timestamp`, `ttl`). Signer and verifier must produce the
//!   same bytes, so both go through [`Metadata::canonical_signing_bytes`].
//! - `ttl` in metadata is the freshness window checked by the recipient. It is
//!   unrelated to how long a relay keeps an unclaimed bundle.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{self, SIGNATURE_SIZE};

pub const METADATA_NONCE_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Url,
    Password,
    File,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Url => "url",
            ContentType::Password => "password",
            ContentType::File => "file",
        }
    }

    pub fn security_level(self) -> SecurityLevel {
        match self {
            ContentType::Password => SecurityLevel::High,
            _ => SecurityLevel::Medium,
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown content type: {0}")]
pub struct UnknownContentType(pub String);

impl FromStr for ContentType {
    type Err = UnknownContentType;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(ContentType::Text),
            "url" => Ok(ContentType::Url),
            "password" => Ok(ContentType::Password),
            "file" => Ok(ContentType::File),
            _ => Err(UnknownContentType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SecurityLevel {
    High,
    Medium,
}

/// Freshness windows stamped into metadata by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub high: Duration,
    pub medium: Duration,
    /// How far a signed timestamp may sit in the recipient's future.
    pub max_future_skew: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            high: Duration::from_secs(30),
            medium: Duration::from_secs(300),
            max_future_skew: Duration::from_secs(60),
        }
    }
}

impl FreshnessPolicy {
    pub fn ttl_for(&self, level: SecurityLevel) -> Duration {
        match level {
            SecurityLevel::High => self.high,
            SecurityLevel::Medium => self.medium,
        }
    }
}

/// Signed message metadata. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub timestamp: f64,
    pub ttl: u64,
    pub nonce: String,
    pub sender_id: String,
    pub content_type: ContentType,
    pub security_level: SecurityLevel,
}

// Field order is the canonical key order; do not reorder.
#[derive(Serialize)]
struct CanonicalMetadata<'a> {
    content_type: ContentType,
    nonce: &'a str,
    security_level: SecurityLevel,
    sender_id: &'a str,
    timestamp: f64,
    ttl: u64,
}

impl Metadata {
    /// Build metadata stamped at `timestamp` (unix seconds) with a fresh
    /// 16-byte replay nonce.
    pub fn build(
        sender_id: impl Into<String>,
        content_type: ContentType,
        policy: &FreshnessPolicy,
        timestamp: f64,
    ) -> Self {
        let mut nonce = [0u8; METADATA_NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);
        let security_level = content_type.security_level();
        Self {
            timestamp,
            ttl: policy.ttl_for(security_level).as_secs(),
            nonce: hex::encode(nonce),
            sender_id: sender_id.into(),
            content_type,
            security_level,
        }
    }

    /// Canonical bytes for signing (compact JSON, sorted keys).
    pub fn canonical_signing_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        let canonical = CanonicalMetadata {
            content_type: self.content_type,
            nonce: &self.nonce,
            security_level: self.security_level,
            sender_id: &self.sender_id,
            timestamp: self.timestamp,
            ttl: self.ttl,
        };
        serde_json::to_vec(&canonical)
    }

    pub fn sign(
        &self,
        signing_key: &SigningKey,
    ) -> Result<[u8; SIGNATURE_SIZE], serde_json::Error> {
        let bytes = self.canonical_signing_bytes()?;
        Ok(crypto::sign(&bytes, signing_key))
    }

    /// Fails closed: any encoding problem or mismatch is `false`.
    pub fn verify(&self, signature: &[u8], signing_public_key: &[u8]) -> bool {
        match self.canonical_signing_bytes() {
            Ok(bytes) => crypto::verify(&bytes, signature, signing_public_key).is_ok(),
            Err(_) => false,
        }
    }

    /// Whether `now` (unix seconds) is inside the freshness window.
    pub fn is_fresh(&self, now: f64, max_future_skew: Duration) -> bool {
        let age = now - self.timestamp;
        if !age.is_finite() {
            return false;
        }
        age <= self.ttl as f64 && -age <= max_future_skew.as_secs_f64()
    }
}

/// The wire envelope exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
    pub ephemeral_pubkey: String,
    pub metadata: Metadata,
    pub signature: String,
}

impl Bundle {
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

pub fn b64e(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}

pub fn b64d(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(value.as_bytes())
}
