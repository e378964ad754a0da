//! Cryptographic primitives for clipboard bundles.
//!
//! - Key agreement: X25519, with explicit rejection of all-zero and
//!   small-order public keys.
//! - Key derivation: HKDF-SHA256, no salt, fixed `clipboard-sync` label.
//! - AEAD: AES-256-GCM with a random 12-byte nonce and a detached 16-byte tag.
//! - Signatures: Ed25519 (strict verification).
//!
//! Every verification failure is reported without detail about its cause.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

pub const KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const NONCE_SIZE: usize = 12;
pub const TAG_SIZE: usize = 16;
pub const SIGNATURE_SIZE: usize = 64;

/// HKDF info label. Changing it breaks compatibility with every deployed peer.
pub const KDF_INFO: &[u8] = b"clipboard-sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("key agreement rejected")]
    KeyAgreementInvalid,
    #[error("authentication failed")]
    AuthenticationFailure,
    #[error("signature invalid")]
    SignatureInvalid,
    #[error("key derivation failed")]
    KeyDerivation,
}

/// Output of [`encrypt`]: ciphertext with its nonce and detached tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub tag: [u8; TAG_SIZE],
}

pub fn generate_agreement_keypair() -> (StaticSecret, PublicKey) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

pub fn generate_ephemeral_keypair() -> (EphemeralSecret, PublicKey) {
    let secret = EphemeralSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (secret, public)
}

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Parse a raw 32-byte X25519 public key, rejecting the all-zero encoding.
///
/// Other small-order points are caught after the exchange by the
/// contributory check in [`agree`].
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    let raw: [u8; PUBLIC_KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::KeyAgreementInvalid)?;
    if raw.iter().all(|byte| *byte == 0) {
        return Err(CryptoError::KeyAgreementInvalid);
    }
    Ok(PublicKey::from(raw))
}

/// X25519 with a static local key (receiving side).
pub fn agree(local: &StaticSecret, remote_public: &[u8]) -> Result<SharedSecret, CryptoError> {
    let remote = parse_public_key(remote_public)?;
    contributory(local.diffie_hellman(&remote))
}

/// X25519 with a single-use local key (sending side). Consumes the secret.
pub fn agree_ephemeral(
    local: EphemeralSecret,
    remote_public: &[u8],
) -> Result<SharedSecret, CryptoError> {
    let remote = parse_public_key(remote_public)?;
    contributory(local.diffie_hellman(&remote))
}

// A non-contributory result means the peer key had small order.
fn contributory(shared: SharedSecret) -> Result<SharedSecret, CryptoError> {
    if shared.was_contributory() {
        Ok(shared)
    } else {
        Err(CryptoError::KeyAgreementInvalid)
    }
}

pub fn derive_key(shared: &SharedSecret) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    derive_key_from_bytes(shared.as_bytes())
}

pub fn derive_key_from_bytes(ikm: &[u8]) -> Result<Zeroizing<[u8; KEY_SIZE]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = Zeroizing::new([0u8; KEY_SIZE]);
    hk.expand(KDF_INFO, &mut okm[..])
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(okm)
}

/// Encrypt under a fresh random nonce. No associated data.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<SealedPayload, CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(plaintext, key, nonce)
}

/// Encrypt with a caller-chosen nonce. Only for fixtures; a nonce must never
/// be reused under the same key.
pub fn encrypt_with_nonce(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
) -> Result<SealedPayload, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::KeyDerivation)?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    Ok(SealedPayload {
        ciphertext: buffer,
        nonce,
        tag: tag.into(),
    })
}

/// Decrypt and authenticate. Any malformed input or tag mismatch yields the
/// same [`CryptoError::AuthenticationFailure`] and no plaintext.
pub fn decrypt(
    ciphertext: &[u8],
    tag: &[u8],
    nonce: &[u8],
    key: &[u8; KEY_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    if tag.len() != TAG_SIZE || nonce.len() != NONCE_SIZE {
        return Err(CryptoError::AuthenticationFailure);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::AuthenticationFailure)?;
    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailure)?;
    Ok(buffer)
}

pub fn sign(message: &[u8], signing_key: &SigningKey) -> [u8; SIGNATURE_SIZE] {
    signing_key.sign(message).to_bytes()
}

/// Strict Ed25519 verification; malformed keys or signatures fail closed.
pub fn verify(message: &[u8], signature: &[u8], public_key: &[u8]) -> Result<(), CryptoError> {
    let public: [u8; PUBLIC_KEY_SIZE] = public_key
        .try_into()
        .map_err(|_| CryptoError::SignatureInvalid)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public).map_err(|_| CryptoError::SignatureInvalid)?;
    let signature =
        Signature::from_slice(signature).map_err(|_| CryptoError::SignatureInvalid)?;
    verifying_key
        .verify_strict(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}
