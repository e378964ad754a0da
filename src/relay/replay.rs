use std::collections::{HashSet, VecDeque};

use super::shard::ShardedMap;

pub const DEFAULT_REPLAY_WINDOW: usize = 100;

/// The last `window` nonces seen from one sender, oldest first.
#[derive(Default)]
struct NonceWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl NonceWindow {
    fn contains(&self, nonce: &str) -> bool {
        self.seen.contains(nonce)
    }

    fn record(&mut self, nonce: &str, window: usize) {
        if self.seen.contains(nonce) {
            return;
        }
        while self.order.len() >= window {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(nonce.to_string());
        self.seen.insert(nonce.to_string());
    }
}

/// Per-sender bounded record of upload nonces.
pub struct ReplayGuard {
    senders: ShardedMap<String, NonceWindow>,
    window: usize,
}

impl ReplayGuard {
    pub fn new(window: usize, shards: usize) -> Self {
        Self {
            senders: ShardedMap::new(shards),
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn is_replay(&self, sender_id: &str, nonce: &str) -> bool {
        self.senders.with_shard(sender_id, |senders| {
            senders
                .get(sender_id)
                .is_some_and(|window| window.contains(nonce))
        })
    }

    pub fn record_nonce(&self, sender_id: &str, nonce: &str) {
        let window = self.window;
        self.senders.with_shard(sender_id, |senders| {
            senders
                .entry(sender_id.to_string())
                .or_default()
                .record(nonce, window);
        });
    }

    /// Check and record under one shard lock. Returns false for a replay,
    /// in which case nothing is recorded.
    pub fn check_and_record(&self, sender_id: &str, nonce: &str) -> bool {
        let window = self.window;
        self.senders.with_shard(sender_id, |senders| {
            let entry = senders.entry(sender_id.to_string()).or_default();
            if entry.contains(nonce) {
                return false;
            }
            entry.record(nonce, window);
            true
        })
    }

    pub fn tracked_senders(&self) -> usize {
        self.senders.len()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_REPLAY_WINDOW, super::shard::DEFAULT_SHARDS)
    }
}
