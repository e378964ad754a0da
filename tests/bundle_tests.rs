use std::sync::Arc;
use std::time::Duration;

use ed25519_dalek::SigningKey;
use proptest::prelude::*;
use proptest::sample::Index;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use x25519_dalek::{PublicKey, StaticSecret};

use cliprelay::bundle::{decrypt_bundle, encrypt_bundle, BundleCodec, BundleError};
use cliprelay::clock::ManualClock;
use cliprelay::protocol::{b64d, b64e, Bundle, ContentType, FreshnessPolicy};

struct Pair {
    sender: SigningKey,
    recipient: StaticSecret,
}

impl Pair {
    fn seeded(seed: u8) -> Self {
        let mut rng = ChaCha20Rng::from_seed([seed; 32]);
        Self {
            sender: SigningKey::generate(&mut rng),
            recipient: StaticSecret::random_from_rng(&mut rng),
        }
    }

    fn recipient_public(&self) -> [u8; 32] {
        PublicKey::from(&self.recipient).to_bytes()
    }

    fn sender_public(&self) -> [u8; 32] {
        self.sender.verifying_key().to_bytes()
    }

    fn seal(&self, content: &[u8], content_type: ContentType) -> Bundle {
        encrypt_bundle(
            content,
            &self.sender,
            &self.recipient_public(),
            "laptop",
            content_type,
        )
        .expect("encrypt bundle")
    }

    fn open(&self, bundle: &Bundle) -> Result<Vec<u8>, BundleError> {
        decrypt_bundle(bundle, &self.recipient, &self.sender_public())
    }
}

fn flip_bit(field: &str, pick: impl FnOnce(usize) -> usize, bit: u8) -> String {
    let mut bytes = b64d(field).expect("base64 field");
    let at = pick(bytes.len());
    bytes[at] ^= 1 << bit;
    b64e(bytes)
}

fn content_type_strategy() -> impl Strategy<Value = ContentType> {
    prop_oneof![
        Just(ContentType::Text),
        Just(ContentType::Url),
        Just(ContentType::Password),
        Just(ContentType::File),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn bundles_round_trip(
        content in proptest::collection::vec(any::<u8>(), 0..2048),
        content_type in content_type_strategy(),
        seed in any::<u8>(),
    ) {
        let pair = Pair::seeded(seed);
        let bundle = pair.seal(&content, content_type);
        prop_assert_eq!(bundle.metadata.content_type, content_type);
        prop_assert_eq!(pair.open(&bundle).expect("decrypt bundle"), content);
    }

    #[test]
    fn ciphertext_and_tag_tampering_is_rejected(
        content in proptest::collection::vec(any::<u8>(), 1..512),
        index in any::<Index>(),
        bit in 0u8..8,
        target_tag in any::<bool>(),
    ) {
        let pair = Pair::seeded(11);
        let mut bundle = pair.seal(&content, ContentType::Text);
        if target_tag {
            bundle.tag = flip_bit(&bundle.tag, |len| index.index(len), bit);
        } else {
            bundle.ciphertext = flip_bit(&bundle.ciphertext, |len| index.index(len), bit);
        }
        let err = pair.open(&bundle).expect_err("tampered bundle must not decrypt");
        prop_assert!(matches!(err, BundleError::AuthenticationFailure));
        prop_assert!(err.is_rejection());
    }

    #[test]
    fn metadata_tampering_breaks_the_signature(
        field in 0usize..5,
        delta in 1u64..10_000,
    ) {
        let pair = Pair::seeded(23);
        let mut bundle = pair.seal(b"hello", ContentType::Url);
        match field {
            0 => bundle.metadata.sender_id.push('x'),
            1 => bundle.metadata.nonce = format!("{:032x}", delta),
            2 => bundle.metadata.ttl += delta,
            3 => bundle.metadata.timestamp -= delta as f64,
            _ => bundle.metadata.content_type = ContentType::Password,
        }
        let err = pair.open(&bundle).expect_err("tampered metadata must not verify");
        prop_assert!(matches!(err, BundleError::SignatureInvalid));
    }
}

#[test]
fn signature_bit_flip_is_rejected() {
    let pair = Pair::seeded(1);
    let mut bundle = pair.seal(b"hello", ContentType::Text);
    bundle.signature = flip_bit(&bundle.signature, |_| 0, 0);
    assert!(matches!(pair.open(&bundle), Err(BundleError::SignatureInvalid)));
}

#[test]
fn bundle_from_another_sender_is_rejected() {
    let pair = Pair::seeded(2);
    let impostor = Pair::seeded(3);
    let forged = encrypt_bundle(
        b"pay mallory",
        &impostor.sender,
        &pair.recipient_public(),
        "laptop",
        ContentType::Text,
    )
    .expect("encrypt bundle");
    assert!(matches!(pair.open(&forged), Err(BundleError::SignatureInvalid)));
}

#[test]
fn expired_bundle_is_rejected_even_when_valid() {
    let pair = Pair::seeded(4);
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let codec = BundleCodec::new(FreshnessPolicy::default(), clock.clone());
    let bundle = codec
        .encrypt(
            b"https://example.org",
            &pair.sender,
            &pair.recipient_public(),
            "laptop",
            ContentType::Url,
        )
        .expect("encrypt bundle");
    assert_eq!(bundle.metadata.ttl, 300);

    clock.advance(Duration::from_secs(300));
    assert!(codec
        .decrypt(&bundle, &pair.recipient, &pair.sender_public())
        .is_ok());

    clock.advance(Duration::from_millis(500));
    let err = codec
        .decrypt(&bundle, &pair.recipient, &pair.sender_public())
        .expect_err("stale bundle");
    assert!(matches!(err, BundleError::MessageExpired));
    assert!(!err.is_rejection());
}

#[test]
fn custom_freshness_policy_is_stamped_into_metadata() {
    let pair = Pair::seeded(5);
    let policy = FreshnessPolicy {
        high: Duration::from_secs(5),
        medium: Duration::from_secs(60),
        ..FreshnessPolicy::default()
    };
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let codec = BundleCodec::new(policy, clock.clone());
    let bundle = codec
        .encrypt(
            b"hunter2",
            &pair.sender,
            &pair.recipient_public(),
            "laptop",
            ContentType::Password,
        )
        .expect("encrypt bundle");
    assert_eq!(bundle.metadata.ttl, 5);

    clock.advance(Duration::from_secs(6));
    assert!(matches!(
        codec.decrypt(&bundle, &pair.recipient, &pair.sender_public()),
        Err(BundleError::MessageExpired)
    ));
}

#[test]
fn bundle_survives_json_transport() {
    let pair = Pair::seeded(6);
    let bundle = pair.seal("emoji 📋 and text".as_bytes(), ContentType::Text);
    let wire = serde_json::to_string(&bundle).expect("serialize bundle");
    let parsed: Bundle = serde_json::from_str(&wire).expect("parse bundle");
    assert_eq!(
        pair.open(&parsed).expect("decrypt bundle"),
        "emoji 📋 and text".as_bytes()
    );
}
