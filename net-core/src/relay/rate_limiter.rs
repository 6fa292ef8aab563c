//! Per-peer token bucket (spec §4.9), shared by the relay engine and (with
//! its own instance and config) `PeerExchange`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::RateLimiterConfig;

struct Bucket {
    tokens: i32,
    last_refill: Instant,
}

/// Classic token bucket, one per peer id, created lazily at max capacity.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    fn refill(bucket: &mut Bucket, config: &RateLimiterConfig, now: Instant) {
        let elapsed = now.duration_since(bucket.last_refill);
        let interval = config.refill_interval;
        if interval.is_zero() {
            return;
        }
        let periods = (elapsed.as_secs_f64() / interval.as_secs_f64()).floor() as i64;
        if periods > 0 {
            let gained = periods.saturating_mul(config.refill_amount as i64);
            bucket.tokens = (bucket.tokens as i64 + gained).min(config.max_tokens as i64) as i32;
            bucket.last_refill += interval * periods as u32;
        }
    }

    /// Refill, then attempt to consume `tokens`. `tokens == 0` is a
    /// non-destructive probe for "are any tokens available".
    pub async fn try_consume(&self, peer: &str, tokens: i32) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(peer.to_string()).or_insert_with(|| Bucket {
            tokens: self.config.max_tokens,
            last_refill: now,
        });
        Self::refill(bucket, &self.config, now);
        if bucket.tokens >= tokens {
            bucket.tokens -= tokens;
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, peer: &str) {
        self.buckets.lock().await.remove(peer);
    }
}
