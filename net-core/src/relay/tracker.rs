//! Seen-message dedup window, keyed by type + payload hash (spec §4.8).

use std::collections::HashMap;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::TrackerConfig;
use crate::protocol::{now_unix, Message};

const CLEANUP_INTERVAL_SECS: i64 = 60;

fn tracker_key(msg: &Message) -> String {
    let mut hasher = Sha256::new();
    hasher.update(msg.payload());
    let digest = hasher.finalize();
    format!("{:02x}{}", msg.message_type().as_byte(), hex::encode(digest))
}

struct Inner {
    seen: HashMap<String, i64>,
    last_cleanup: i64,
}

/// Tracks recently-seen messages so the relay engine can filter
/// duplicates. Entries expire after `message_lifetime` and the map is
/// capped at `max_tracked`.
pub struct MessageTracker {
    inner: Mutex<Inner>,
    config: TrackerConfig,
}

impl MessageTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                seen: HashMap::new(),
                last_cleanup: now_unix(),
            }),
            config,
        }
    }

    /// Record `msg` as seen and report whether it was new. A duplicate
    /// whose prior sighting is older than `message_lifetime` counts as
    /// new again (spec S3).
    pub async fn mark_and_check_if_new(&self, msg: &Message) -> bool {
        let key = tracker_key(msg);
        let now = now_unix();
        let lifetime = self.config.message_lifetime.as_secs() as i64;

        let mut inner = self.inner.lock().await;
        let is_new = match inner.seen.get(&key) {
            None => true,
            Some(&ts) => now - ts > lifetime,
        };
        if is_new {
            inner.seen.insert(key, now);
        }

        if inner.seen.len() > self.config.max_tracked || now - inner.last_cleanup > CLEANUP_INTERVAL_SECS {
            cleanup(&mut inner, lifetime, self.config.max_tracked, now);
        }
        is_new
    }

    /// Non-mutating lookup subject to the same lifetime window.
    pub async fn has_seen(&self, msg: &Message) -> bool {
        let key = tracker_key(msg);
        let now = now_unix();
        let lifetime = self.config.message_lifetime.as_secs() as i64;
        match self.inner.lock().await.seen.get(&key) {
            Some(&ts) => now - ts <= lifetime,
            None => false,
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.seen.len()
    }
}

fn cleanup(inner: &mut Inner, lifetime: i64, max_tracked: usize, now: i64) {
    inner.seen.retain(|_, ts| now - *ts <= lifetime);
    if inner.seen.len() > max_tracked {
        let mut by_age: Vec<(String, i64)> = inner.seen.drain().collect();
        by_age.sort_by_key(|(_, ts)| *ts);
        let keep_from = by_age.len().saturating_sub(max_tracked);
        inner.seen = by_age.into_iter().skip(keep_from).collect();
    }
    inner.last_cleanup = now;
}
