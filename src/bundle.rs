//! Sealing and opening clipboard bundles.
//!
//! Sending: fresh ephemeral X25519 key against the recipient's static key,
//! HKDF to an AES-256-GCM key, encrypt, then build and sign metadata.
//!
//! Receiving runs the checks in a fixed order and stops at the first failure:
//! key agreement, metadata signature, freshness, AEAD. A forged bundle is
//! never decrypted, and a stale bundle is never decrypted either.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use thiserror::Error;
use tracing::debug;
use x25519_dalek::StaticSecret;

use crate::clock::{SharedClock, SystemClock};
use crate::crypto::{self, CryptoError};
use crate::logging;
use crate::protocol::{b64d, b64e, Bundle, ContentType, FreshnessPolicy, Metadata};

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle rejected")]
    SignatureInvalid,
    #[error("bundle rejected")]
    AuthenticationFailure,
    #[error("bundle rejected")]
    KeyAgreementInvalid,
    #[error("message expired")]
    MessageExpired,
    #[error("metadata encoding failed: {0}")]
    Serde(#[from] serde_json::Error),
}

impl BundleError {
    /// True for the cryptographic rejections that share one external signal.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BundleError::SignatureInvalid
                | BundleError::AuthenticationFailure
                | BundleError::KeyAgreementInvalid
        )
    }
}

impl From<CryptoError> for BundleError {
    fn from(error: CryptoError) -> Self {
        match error {
            CryptoError::SignatureInvalid => BundleError::SignatureInvalid,
            CryptoError::AuthenticationFailure => BundleError::AuthenticationFailure,
            CryptoError::KeyAgreementInvalid | CryptoError::KeyDerivation => {
                BundleError::KeyAgreementInvalid
            }
        }
    }
}

/// Bundle codec with an explicit freshness policy and clock.
#[derive(Clone)]
pub struct BundleCodec {
    policy: FreshnessPolicy,
    clock: SharedClock,
}

impl Default for BundleCodec {
    fn default() -> Self {
        Self::new(FreshnessPolicy::default(), Arc::new(SystemClock))
    }
}

impl BundleCodec {
    pub fn new(policy: FreshnessPolicy, clock: SharedClock) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    pub fn encrypt(
        &self,
        content: &[u8],
        sender_signing_private: &SigningKey,
        recipient_agreement_public: &[u8],
        sender_id: &str,
        content_type: ContentType,
    ) -> Result<Bundle, BundleError> {
        let (ephemeral, ephemeral_public) = crypto::generate_ephemeral_keypair();
        let shared = crypto::agree_ephemeral(ephemeral, recipient_agreement_public)?;
        let key = crypto::derive_key(&shared)?;

        let sealed = crypto::encrypt(content, &key)?;

        let metadata = Metadata::build(
            sender_id,
            content_type,
            &self.policy,
            self.clock.unix_seconds(),
        );
        let signature = metadata.sign(sender_signing_private)?;

        Ok(Bundle {
            ciphertext: b64e(&sealed.ciphertext),
            nonce: b64e(sealed.nonce),
            tag: b64e(sealed.tag),
            ephemeral_pubkey: b64e(ephemeral_public.as_bytes()),
            metadata,
            signature: b64e(signature),
        })
    }

    pub fn decrypt(
        &self,
        bundle: &Bundle,
        recipient_agreement_private: &StaticSecret,
        sender_signing_public: &[u8],
    ) -> Result<Vec<u8>, BundleError> {
        let ephemeral_public =
            b64d(&bundle.ephemeral_pubkey).map_err(|_| BundleError::KeyAgreementInvalid)?;
        let shared = crypto::agree(recipient_agreement_private, &ephemeral_public)?;
        let key = crypto::derive_key(&shared)?;

        let signature = b64d(&bundle.signature).map_err(|_| BundleError::SignatureInvalid)?;
        if !bundle.metadata.verify(&signature, sender_signing_public) {
            debug!(
                sender = %logging::peer_id(&bundle.metadata.sender_id),
                "bundle: signature rejected"
            );
            return Err(BundleError::SignatureInvalid);
        }

        let now = self.clock.unix_seconds();
        if !bundle.metadata.is_fresh(now, self.policy.max_future_skew) {
            debug!(
                sender = %logging::peer_id(&bundle.metadata.sender_id),
                age_secs = now - bundle.metadata.timestamp,
                ttl_secs = bundle.metadata.ttl,
                "bundle: expired"
            );
            return Err(BundleError::MessageExpired);
        }

        let ciphertext =
            b64d(&bundle.ciphertext).map_err(|_| BundleError::AuthenticationFailure)?;
        let tag = b64d(&bundle.tag).map_err(|_| BundleError::AuthenticationFailure)?;
        let nonce = b64d(&bundle.nonce).map_err(|_| BundleError::AuthenticationFailure)?;
        Ok(crypto::decrypt(&ciphertext, &tag, &nonce, &key)?)
    }
}

/// Seal `content` for one recipient using the system clock and default policy.
pub fn encrypt_bundle(
    content: &[u8],
    sender_signing_private: &SigningKey,
    recipient_agreement_public: &[u8],
    sender_id: &str,
    content_type: ContentType,
) -> Result<Bundle, BundleError> {
    BundleCodec::default().encrypt(
        content,
        sender_signing_private,
        recipient_agreement_public,
        sender_id,
        content_type,
    )
}

/// Open a bundle using the system clock.
pub fn decrypt_bundle(
    bundle: &Bundle,
    recipient_agreement_private: &StaticSecret,
    sender_signing_public: &[u8],
) -> Result<Vec<u8>, BundleError> {
    BundleCodec::default().decrypt(bundle, recipient_agreement_private, sender_signing_public)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;

    struct Parties {
        sender_signing: SigningKey,
        recipient_secret: StaticSecret,
        recipient_public: [u8; 32],
    }

    fn parties() -> Parties {
        let (recipient_secret, recipient_public) = crypto::generate_agreement_keypair();
        Parties {
            sender_signing: crypto::generate_signing_key(),
            recipient_secret,
            recipient_public: recipient_public.to_bytes(),
        }
    }

    fn text_bundle(p: &Parties) -> Bundle {
        encrypt_bundle(
            b"text",
            &p.sender_signing,
            &p.recipient_public,
            "alice",
            ContentType::Text,
        )
        .unwrap()
    }

    fn manual_codec() -> (BundleCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        (
            BundleCodec::new(FreshnessPolicy::default(), clock.clone()),
            clock,
        )
    }

    #[test]
    fn round_trips() {
        let p = parties();
        let bundle = encrypt_bundle(
            "HELLO 🔐".as_bytes(),
            &p.sender_signing,
            &p.recipient_public,
            "alice",
            ContentType::Text,
        )
        .unwrap();

        let plaintext = decrypt_bundle(
            &bundle,
            &p.recipient_secret,
            p.sender_signing.verifying_key().as_bytes(),
        )
        .unwrap();
        assert_eq!(plaintext, "HELLO 🔐".as_bytes());
    }

    #[test]
    fn wire_fields_have_expected_sizes() {
        let p = parties();
        let bundle = encrypt_bundle(
            b"x",
            &p.sender_signing,
            &p.recipient_public,
            "alice",
            ContentType::Url,
        )
        .unwrap();

        assert_eq!(b64d(&bundle.nonce).unwrap().len(), 12);
        assert_eq!(b64d(&bundle.tag).unwrap().len(), 16);
        assert_eq!(b64d(&bundle.ephemeral_pubkey).unwrap().len(), 32);
        assert_eq!(b64d(&bundle.signature).unwrap().len(), 64);
    }

    #[test]
    fn each_bundle_uses_a_fresh_ephemeral_key() {
        let p = parties();
        let seal = || {
            encrypt_bundle(b"a", &p.sender_signing, &p.recipient_public, "a", ContentType::Text)
                .unwrap()
        };
        let (first, second) = (seal(), seal());
        assert_ne!(first.ephemeral_pubkey, second.ephemeral_pubkey);
        assert_ne!(first.metadata.nonce, second.metadata.nonce);
    }

    #[test]
    fn password_expires_after_thirty_seconds() {
        let p = parties();
        let (codec, clock) = manual_codec();
        let bundle = codec
            .encrypt(
                b"hunter2",
                &p.sender_signing,
                &p.recipient_public,
                "alice",
                ContentType::Password,
            )
            .unwrap();
        let sender_public = p.sender_signing.verifying_key().to_bytes();

        assert_eq!(codec.policy().high, Duration::from_secs(30));
        clock.advance(codec.policy().high);
        assert_eq!(
            codec
                .decrypt(&bundle, &p.recipient_secret, &sender_public)
                .unwrap(),
            b"hunter2"
        );

        clock.advance(Duration::from_secs(1));
        assert!(matches!(
            codec.decrypt(&bundle, &p.recipient_secret, &sender_public),
            Err(BundleError::MessageExpired)
        ));
    }

    #[test]
    fn signature_is_checked_before_freshness() {
        let p = parties();
        let (codec, clock) = manual_codec();
        let bundle = codec
            .encrypt(b"text", &p.sender_signing, &p.recipient_public, "alice", ContentType::Text)
            .unwrap();
        let impostor = crypto::generate_signing_key();

        clock.advance(Duration::from_secs(3_600));
        assert!(matches!(
            codec.decrypt(
                &bundle,
                &p.recipient_secret,
                impostor.verifying_key().as_bytes()
            ),
            Err(BundleError::SignatureInvalid)
        ));
    }

    #[test]
    fn wrong_recipient_key_fails_authentication() {
        let p = parties();
        let (other_secret, _) = crypto::generate_agreement_keypair();
        let bundle = text_bundle(&p);

        let error = decrypt_bundle(
            &bundle,
            &other_secret,
            p.sender_signing.verifying_key().as_bytes(),
        )
        .unwrap_err();
        assert!(matches!(error, BundleError::AuthenticationFailure));
        assert_eq!(error.to_string(), "bundle rejected");
    }

    #[test]
    fn low_order_ephemeral_key_is_rejected() {
        let p = parties();
        let mut bundle = text_bundle(&p);
        bundle.ephemeral_pubkey = b64e([0u8; 32]);

        assert!(matches!(
            decrypt_bundle(
                &bundle,
                &p.recipient_secret,
                p.sender_signing.verifying_key().as_bytes()
            ),
            Err(BundleError::KeyAgreementInvalid)
        ));
    }

    #[test]
    fn encrypting_to_low_order_recipient_key_fails() {
        let p = parties();
        let result =
            encrypt_bundle(b"text", &p.sender_signing, &[0u8; 32], "alice", ContentType::Text);
        assert!(matches!(result, Err(BundleError::KeyAgreementInvalid)));
    }

    #[test]
    fn signed_timestamp_far_in_future_is_rejected() {
        let p = parties();
        let (codec, clock) = manual_codec();
        let bundle = codec
            .encrypt(b"text", &p.sender_signing, &p.recipient_public, "alice", ContentType::Text)
            .unwrap();
        let sender_public = p.sender_signing.verifying_key().to_bytes();

        clock.set(std::time::UNIX_EPOCH + Duration::from_secs(1_700_000_000 - 120));
        assert!(matches!(
            codec.decrypt(&bundle, &p.recipient_secret, &sender_public),
            Err(BundleError::MessageExpired)
        ));
    }
}
