//! Single-slot pending bundle storage, one slot per recipient.

use std::time::{Duration, SystemTime};

use serde_json::Value;

use super::shard::ShardedMap;
use crate::clock::SharedClock;
use crate::protocol::ContentType;

/// How long the relay keeps an unclaimed bundle, by content type.
///
/// Separate from the freshness window carried in signed metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTtlPolicy {
    pub password: Duration,
    pub text: Duration,
    pub url: Duration,
    pub file: Duration,
}

impl Default for StorageTtlPolicy {
    fn default() -> Self {
        Self {
            password: Duration::from_secs(5 * 60),
            text: Duration::from_secs(30 * 60),
            url: Duration::from_secs(30 * 60),
            file: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl StorageTtlPolicy {
    pub fn ttl_for(&self, content_type: ContentType) -> Duration {
        match content_type {
            ContentType::Password => self.password,
            ContentType::Text => self.text,
            ContentType::Url => self.url,
            ContentType::File => self.file,
        }
    }

    /// Unknown or missing content types get the text TTL.
    pub fn ttl_for_bundle(&self, bundle: &Value) -> Duration {
        content_type_from(bundle)
            .and_then(|value| value.parse::<ContentType>().ok())
            .map(|content_type| self.ttl_for(content_type))
            .unwrap_or(self.text)
    }
}

fn content_type_from(bundle: &Value) -> Option<&str> {
    bundle
        .pointer("/metadata/content_type")
        .and_then(Value::as_str)
        .or_else(|| bundle.pointer("/content_type").and_then(Value::as_str))
}

struct StoredEnvelope {
    bundle: Value,
    stored_at: SystemTime,
    ttl: Duration,
}

impl StoredEnvelope {
    fn is_expired(&self, now: SystemTime) -> bool {
        match now.duration_since(self.stored_at) {
            Ok(age) => age > self.ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TakeOutcome {
    Found(Value),
    NotFound,
    Expired,
}

pub struct RelayStore {
    slots: ShardedMap<String, StoredEnvelope>,
    policy: StorageTtlPolicy,
    clock: SharedClock,
}

impl RelayStore {
    pub fn new(policy: StorageTtlPolicy, shards: usize, clock: SharedClock) -> Self {
        Self {
            slots: ShardedMap::new(shards),
            policy,
            clock,
        }
    }

    /// Store `bundle` for `recipient_id`, replacing any pending one.
    /// Returns true when an unclaimed bundle was overwritten.
    pub fn put(&self, recipient_id: &str, bundle: Value) -> bool {
        let ttl = self.policy.ttl_for_bundle(&bundle);
        let stored = StoredEnvelope {
            bundle,
            stored_at: self.clock.now(),
            ttl,
        };
        self.slots.insert(recipient_id.to_string(), stored).is_some()
    }

    /// Destructive read. Whoever removes the slot owns the outcome, so
    /// concurrent callers see the bundle at most once.
    pub fn take(&self, recipient_id: &str) -> TakeOutcome {
        let Some(stored) = self.slots.remove(recipient_id) else {
            return TakeOutcome::NotFound;
        };
        if stored.is_expired(self.clock.now()) {
            TakeOutcome::Expired
        } else {
            TakeOutcome::Found(stored.bundle)
        }
    }

    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        self.slots.retain(|_, stored| !stored.is_expired(now))
    }

    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn policy(&self) -> &StorageTtlPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (RelayStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
        (
            RelayStore::new(StorageTtlPolicy::default(), 4, clock.clone()),
            clock,
        )
    }

    fn bundle(content_type: &str, marker: u32) -> Value {
        json!({"metadata": {"content_type": content_type}, "ciphertext": marker})
    }

    #[test]
    fn take_is_destructive() {
        let (store, _) = store();
        store.put("bob", bundle("text", 1));
        assert_eq!(store.take("bob"), TakeOutcome::Found(bundle("text", 1)));
        assert_eq!(store.take("bob"), TakeOutcome::NotFound);
    }

    #[test]
    fn newer_upload_overwrites() {
        let (store, _) = store();
        assert!(!store.put("bob", bundle("text", 1)));
        assert!(store.put("bob", bundle("text", 2)));
        assert_eq!(store.take("bob"), TakeOutcome::Found(bundle("text", 2)));
    }

    #[test]
    fn password_slot_expires_after_five_minutes() {
        let (store, clock) = store();
        store.put("bob", bundle("password", 1));
        assert_eq!(store.policy().password, Duration::from_secs(300));
        clock.advance(store.policy().password);
        assert_eq!(store.pending(), 1);
        assert_eq!(store.sweep_expired(), 0);

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.take("bob"), TakeOutcome::Expired);
        assert_eq!(store.take("bob"), TakeOutcome::NotFound);
    }

    #[test]
    fn sweep_only_removes_elapsed_slots() {
        let (store, clock) = store();
        store.put("a", bundle("password", 1));
        store.put("b", bundle("url", 2));
        store.put("c", bundle("file", 3));

        clock.advance(Duration::from_secs(31 * 60));
        assert_eq!(store.sweep_expired(), 2);
        assert_eq!(store.take("c"), TakeOutcome::Found(bundle("file", 3)));
    }

    #[test]
    fn unknown_content_type_uses_text_ttl() {
        let policy = StorageTtlPolicy::default();
        assert_eq!(policy.ttl_for_bundle(&bundle("image", 0)), policy.text);
        assert_eq!(policy.ttl_for_bundle(&json!({})), policy.text);
        assert_eq!(
            policy.ttl_for_bundle(&json!({"content_type": "PASSWORD"})),
            policy.password
        );
    }
}
