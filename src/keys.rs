//! Device and peer key material.
//!
//! Pairing is out of scope here: a device has its own agreement and signing
//! keys plus the public keys of peers it already trusts. [`FileKeyStore`]
//! keeps them in a `keys.json` file:
//!
//! ```text
//! {"me":    {"my_id", "x25519_private", "x25519_public", "ed25519_private", "ed25519_public"},
//!  "peers": {"<id>": {"x25519_public", "ed25519_public"}}}
//! ```
//!
//! All key fields are standard base64 of the raw 32-byte keys.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::bundle::{BundleCodec, BundleError};
use crate::crypto::{self, KEY_SIZE, PUBLIC_KEY_SIZE};
use crate::logging;
use crate::protocol::{b64d, b64e, Bundle, ContentType};

pub const KEYS_FILE: &str = "keys.json";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("keys not initialised or peer not paired")]
    KeysUnavailable,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("key file error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
}

/// Failure of a keyed send or receive.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error(transparent)]
    Keys(#[from] KeyStoreError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
}

/// This device's identity keys.
#[derive(Clone)]
pub struct DeviceKeys {
    pub device_id: String,
    pub agreement: StaticSecret,
    pub signing: SigningKey,
}

impl DeviceKeys {
    pub fn generate(device_id: impl Into<String>) -> Self {
        let (agreement, _) = crypto::generate_agreement_keypair();
        Self {
            device_id: device_id.into(),
            agreement,
            signing: crypto::generate_signing_key(),
        }
    }

    pub fn agreement_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        PublicKey::from(&self.agreement).to_bytes()
    }

    pub fn signing_public(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.signing.verifying_key().to_bytes()
    }

    /// What a peer needs in order to send to and verify this device.
    pub fn peer_keys(&self) -> PeerKeys {
        PeerKeys {
            agreement_public: self.agreement_public(),
            signing_public: self.signing_public(),
        }
    }

    pub fn public_bundle(&self) -> PublicBundle {
        PublicBundle {
            my_id: self.device_id.clone(),
            x25519_public: b64e(self.agreement_public()),
            ed25519_public: b64e(self.signing_public()),
        }
    }
}

impl std::fmt::Debug for DeviceKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKeys")
            .field("device_id", &self.device_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerKeys {
    pub agreement_public: [u8; PUBLIC_KEY_SIZE],
    pub signing_public: [u8; PUBLIC_KEY_SIZE],
}

impl PeerKeys {
    /// Validate raw peer keys before trusting them.
    pub fn from_slices(
        agreement_public: &[u8],
        signing_public: &[u8],
    ) -> Result<Self, KeyStoreError> {
        let agreement = crypto::parse_public_key(agreement_public)
            .map_err(|_| KeyStoreError::InvalidKey("x25519 public key".to_string()))?;
        let signing: [u8; PUBLIC_KEY_SIZE] = signing_public
            .try_into()
            .map_err(|_| KeyStoreError::InvalidKey("ed25519 public key length".to_string()))?;
        VerifyingKey::from_bytes(&signing)
            .map_err(|_| KeyStoreError::InvalidKey("ed25519 public key".to_string()))?;
        Ok(Self {
            agreement_public: agreement.to_bytes(),
            signing_public: signing,
        })
    }
}

/// Public half of a device identity, exchanged out of band during pairing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicBundle {
    pub my_id: String,
    pub x25519_public: String,
    pub ed25519_public: String,
}

impl PublicBundle {
    pub fn peer_keys(&self) -> Result<PeerKeys, KeyStoreError> {
        let agreement = b64d(&self.x25519_public)
            .map_err(|_| KeyStoreError::InvalidKey("x25519 public key encoding".to_string()))?;
        let signing = b64d(&self.ed25519_public)
            .map_err(|_| KeyStoreError::InvalidKey("ed25519 public key encoding".to_string()))?;
        PeerKeys::from_slices(&agreement, &signing)
    }
}

/// Read-only access to key material.
pub trait KeyStore {
    /// Fails with [`KeyStoreError::KeysUnavailable`] when no device keys exist.
    fn load_my_keys(&self) -> Result<DeviceKeys, KeyStoreError>;

    fn load_peer(&self, peer_id: &str) -> Result<Option<PeerKeys>, KeyStoreError>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryKeyStore {
    me: Option<DeviceKeys>,
    peers: HashMap<String, PeerKeys>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(device: DeviceKeys) -> Self {
        Self {
            me: Some(device),
            peers: HashMap::new(),
        }
    }

    pub fn add_peer(&mut self, peer_id: impl Into<String>, keys: PeerKeys) {
        self.peers.insert(peer_id.into(), keys);
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_my_keys(&self) -> Result<DeviceKeys, KeyStoreError> {
        self.me.clone().ok_or(KeyStoreError::KeysUnavailable)
    }

    fn load_peer(&self, peer_id: &str) -> Result<Option<PeerKeys>, KeyStoreError> {
        Ok(self.peers.get(peer_id).copied())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeysFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    me: Option<StoredDevice>,
    #[serde(default)]
    peers: BTreeMap<String, StoredPeer>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredDevice {
    my_id: String,
    x25519_private: String,
    x25519_public: String,
    ed25519_private: String,
    ed25519_public: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredPeer {
    x25519_public: String,
    ed25519_public: String,
}

fn decode_secret(value: &str, what: &str) -> Result<Zeroizing<[u8; KEY_SIZE]>, KeyStoreError> {
    let bytes = Zeroizing::new(
        b64d(value).map_err(|_| KeyStoreError::InvalidKey(format!("{what} encoding")))?,
    );
    let mut out = Zeroizing::new([0u8; KEY_SIZE]);
    if bytes.len() != KEY_SIZE {
        return Err(KeyStoreError::InvalidKey(format!("{what} length")));
    }
    out.copy_from_slice(&bytes);
    Ok(out)
}

impl StoredDevice {
    fn from_keys(keys: &DeviceKeys) -> Self {
        Self {
            my_id: keys.device_id.clone(),
            x25519_private: b64e(keys.agreement.to_bytes()),
            x25519_public: b64e(keys.agreement_public()),
            ed25519_private: b64e(keys.signing.to_bytes()),
            ed25519_public: b64e(keys.signing_public()),
        }
    }

    /// Public keys are re-derived from the private halves.
    fn to_keys(&self) -> Result<DeviceKeys, KeyStoreError> {
        let agreement = decode_secret(&self.x25519_private, "x25519 private key")?;
        let signing = decode_secret(&self.ed25519_private, "ed25519 private key")?;
        Ok(DeviceKeys {
            device_id: self.my_id.clone(),
            agreement: StaticSecret::from(*agreement),
            signing: SigningKey::from_bytes(&signing),
        })
    }
}

/// Key store persisted as JSON in a directory.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn open(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(KEYS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<KeysFile, KeyStoreError> {
        if !self.path.exists() {
            return Ok(KeysFile::default());
        }
        let contents = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    fn write(&self, data: &KeysFile) -> Result<(), KeyStoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = Zeroizing::new(serde_json::to_string_pretty(data)?);

        // Private keys never touch a file readable by others; the rename
        // replaces keys.json in one step.
        let tmp = self.path.with_extension("json.tmp");
        match fs::remove_file(&tmp) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Create and persist fresh device keys, replacing any existing ones.
    /// Paired peers are kept.
    pub fn generate(&self, device_id: &str) -> Result<DeviceKeys, KeyStoreError> {
        let keys = DeviceKeys::generate(device_id);
        let mut data = self.read()?;
        data.me = Some(StoredDevice::from_keys(&keys));
        self.write(&data)?;
        info!(
            device = %logging::peer_id(device_id),
            path = %self.path.display(),
            "keys: generated device keys"
        );
        Ok(keys)
    }

    pub fn device_id(&self) -> Result<Option<String>, KeyStoreError> {
        Ok(self.read()?.me.map(|me| me.my_id))
    }

    pub fn save_peer(&self, peer_id: &str, keys: &PeerKeys) -> Result<(), KeyStoreError> {
        let mut data = self.read()?;
        data.peers.insert(
            peer_id.to_string(),
            StoredPeer {
                x25519_public: b64e(keys.agreement_public),
                ed25519_public: b64e(keys.signing_public),
            },
        );
        self.write(&data)
    }

    /// Peer ids in sorted order.
    pub fn list_peers(&self) -> Result<Vec<String>, KeyStoreError> {
        Ok(self.read()?.peers.into_keys().collect())
    }

    pub fn export_public_bundle(&self) -> Result<PublicBundle, KeyStoreError> {
        let me = self.read()?.me.ok_or(KeyStoreError::KeysUnavailable)?;
        Ok(PublicBundle {
            my_id: me.my_id,
            x25519_public: me.x25519_public,
            ed25519_public: me.ed25519_public,
        })
    }

    /// Validate and store a peer's public bundle. Returns the peer id.
    pub fn import_public_bundle(&self, bundle: &PublicBundle) -> Result<String, KeyStoreError> {
        if bundle.my_id.is_empty() {
            return Err(KeyStoreError::InvalidKey("empty peer id".to_string()));
        }
        let keys = bundle.peer_keys()?;
        self.save_peer(&bundle.my_id, &keys)?;
        info!(peer = %logging::peer_id(&bundle.my_id), "keys: peer imported");
        Ok(bundle.my_id.clone())
    }
}

impl KeyStore for FileKeyStore {
    fn load_my_keys(&self) -> Result<DeviceKeys, KeyStoreError> {
        match self.read()?.me {
            Some(me) => me.to_keys(),
            None => Err(KeyStoreError::KeysUnavailable),
        }
    }

    fn load_peer(&self, peer_id: &str) -> Result<Option<PeerKeys>, KeyStoreError> {
        let data = self.read()?;
        let Some(peer) = data.peers.get(peer_id) else {
            return Ok(None);
        };
        let agreement = b64d(&peer.x25519_public)
            .map_err(|_| KeyStoreError::InvalidKey("x25519 public key encoding".to_string()))?;
        let signing = b64d(&peer.ed25519_public)
            .map_err(|_| KeyStoreError::InvalidKey("ed25519 public key encoding".to_string()))?;
        PeerKeys::from_slices(&agreement, &signing).map(Some)
    }
}

/// Seal `plaintext` for a paired peer, signed as this device.
pub fn encrypt_for_peer<S: KeyStore + ?Sized>(
    store: &S,
    plaintext: &[u8],
    content_type: ContentType,
    recipient_id: &str,
) -> Result<Bundle, ExchangeError> {
    encrypt_for_peer_with(&BundleCodec::default(), store, plaintext, content_type, recipient_id)
}

pub fn encrypt_for_peer_with<S: KeyStore + ?Sized>(
    codec: &BundleCodec,
    store: &S,
    plaintext: &[u8],
    content_type: ContentType,
    recipient_id: &str,
) -> Result<Bundle, ExchangeError> {
    let me = store.load_my_keys()?;
    let peer = store
        .load_peer(recipient_id)?
        .ok_or(KeyStoreError::KeysUnavailable)?;
    Ok(codec.encrypt(
        plaintext,
        &me.signing,
        &peer.agreement_public,
        &me.device_id,
        content_type,
    )?)
}

/// Open a bundle from a paired peer, looked up by `metadata.sender_id`.
pub fn decrypt_from_peer<S: KeyStore + ?Sized>(
    store: &S,
    bundle: &Bundle,
) -> Result<Vec<u8>, ExchangeError> {
    decrypt_from_peer_with(&BundleCodec::default(), store, bundle)
}

pub fn decrypt_from_peer_with<S: KeyStore + ?Sized>(
    codec: &BundleCodec,
    store: &S,
    bundle: &Bundle,
) -> Result<Vec<u8>, ExchangeError> {
    let me = store.load_my_keys()?;
    let sender = store
        .load_peer(&bundle.metadata.sender_id)?
        .ok_or(KeyStoreError::KeysUnavailable)?;
    Ok(codec.decrypt(bundle, &me.agreement, &sender.signing_public)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired() -> (MemoryKeyStore, MemoryKeyStore) {
        let alice = DeviceKeys::generate("alice");
        let bob = DeviceKeys::generate("bob");
        let mut alice_store = MemoryKeyStore::with_device(alice.clone());
        let mut bob_store = MemoryKeyStore::with_device(bob.clone());
        alice_store.add_peer("bob", bob.peer_keys());
        bob_store.add_peer("alice", alice.peer_keys());
        (alice_store, bob_store)
    }

    #[test]
    fn paired_devices_exchange_bundles() {
        let (alice, bob) = paired();
        let bundle =
            encrypt_for_peer(&alice, b"https://example.org", ContentType::Url, "bob").unwrap();
        assert_eq!(bundle.metadata.sender_id, "alice");
        assert_eq!(decrypt_from_peer(&bob, &bundle).unwrap(), b"https://example.org");
    }

    #[test]
    fn missing_keys_are_unavailable() {
        let (alice, _) = paired();
        let empty = MemoryKeyStore::new();

        let err = encrypt_for_peer(&alice, b"x", ContentType::Text, "carol").unwrap_err();
        assert!(matches!(err, ExchangeError::Keys(KeyStoreError::KeysUnavailable)));

        let err = encrypt_for_peer(&empty, b"x", ContentType::Text, "bob").unwrap_err();
        assert!(matches!(err, ExchangeError::Keys(KeyStoreError::KeysUnavailable)));
    }

    #[test]
    fn unknown_sender_is_unavailable() {
        let (_, bob) = paired();
        let carol = DeviceKeys::generate("carol");
        let mut carol_store = MemoryKeyStore::with_device(carol);
        carol_store.add_peer("bob", bob.load_my_keys().unwrap().peer_keys());

        let bundle = encrypt_for_peer(&carol_store, b"x", ContentType::Text, "bob").unwrap();
        let err = decrypt_from_peer(&bob, &bundle).unwrap_err();
        assert!(matches!(err, ExchangeError::Keys(KeyStoreError::KeysUnavailable)));
    }

    #[test]
    fn public_bundle_rejects_zero_agreement_key() {
        let bundle = PublicBundle {
            my_id: "mallory".to_string(),
            x25519_public: b64e([0u8; 32]),
            ed25519_public: b64e(crypto::generate_signing_key().verifying_key().to_bytes()),
        };
        assert!(matches!(bundle.peer_keys(), Err(KeyStoreError::InvalidKey(_))));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let keys = DeviceKeys::generate("alice");
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("agreement"));
    }
}
