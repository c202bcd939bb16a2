//! Token-bucket rate limiter keyed by logical service name
//!
//! Buckets live in process memory and are refilled lazily when checked.
//! Capacity and window come from the service's entry in the config; a
//! service with no entry is unlimited. A bucket left idle for a full window
//! is indistinguishable from a fresh one and gets evicted once the map grows.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{RateLimitConfig, RateLimitsConfig};

/// Outbound calls to the upstream webhook provider
pub const PROVIDER_SERVICE: &str = "provider";
/// Inbound deliveries, keyed per webhook
pub const DELIVERY_SERVICE: &str = "webhook-delivery";

/// Interval `wait_for_token` polls at
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Bucket count below which idle buckets are never swept
const MIN_SWEEP_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    window: Duration,
}

impl Bucket {
    /// A full window has passed, so the next check refills it to capacity
    fn is_idle(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_refill) >= self.window
    }
}

#[derive(Debug)]
struct Buckets {
    map: HashMap<String, Bucket>,
    sweep_at: usize,
}

impl Buckets {
    fn sweep(&mut self, now: Instant) {
        let before = self.map.len();
        self.map.retain(|_, bucket| !bucket.is_idle(now));
        self.sweep_at = (self.map.len() * 2).max(MIN_SWEEP_SIZE);
        debug!(before, after = self.map.len(), "Swept idle rate limit buckets");
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    limits: HashMap<String, RateLimitConfig>,
    buckets: Mutex<Buckets>,
}

impl RateLimiter {
    pub fn new(limits: &RateLimitsConfig) -> Self {
        Self {
            limits: limits.0.clone(),
            buckets: Mutex::new(Buckets {
                map: HashMap::new(),
                sweep_at: MIN_SWEEP_SIZE,
            }),
        }
    }

    #[cfg(test)]
    async fn bucket_count(&self) -> usize {
        self.buckets.lock().await.map.len()
    }

    pub fn limit_for(&self, service: &str) -> Option<RateLimitConfig> {
        self.limits.get(service).copied()
    }

    /// Take one token for `key` under `service` if one is available
    pub async fn check_limit(&self, service: &str, key: &str) -> bool {
        self.check_limit_at(service, key, Instant::now()).await
    }

    pub(crate) async fn check_limit_at(&self, service: &str, key: &str, now: Instant) -> bool {
        let Some(limit) = self.limit_for(service) else {
            return true;
        };

        let capacity = f64::from(limit.capacity);
        let window = limit.window();
        let bucket_key = format!("{}:{}", service, key);

        let mut buckets = self.buckets.lock().await;
        if !buckets.map.contains_key(&bucket_key) && buckets.map.len() >= buckets.sweep_at {
            buckets.sweep(now);
        }
        let bucket = buckets.map.entry(bucket_key).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
            window,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !window.is_zero() {
            let periods = u32::try_from(elapsed.as_millis() / window.as_millis()).unwrap_or(u32::MAX);
            if periods > 0 {
                bucket.tokens = (bucket.tokens + f64::from(periods) * capacity).min(capacity);
                bucket.last_refill += window * periods;
            }
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            debug!(service, key, "Rate limit exhausted");
            false
        }
    }

    /// Poll for a token until `max_wait` elapses
    ///
    /// Only for callers that can afford to block briefly; inbound deliveries
    /// must use `check_limit` and fail fast.
    pub async fn wait_for_token(&self, service: &str, key: &str, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.check_limit(service, key).await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(capacity: u32, window_ms: u64) -> RateLimiter {
        let mut limits = HashMap::new();
        limits.insert("svc".to_string(), RateLimitConfig { capacity, window_ms });
        RateLimiter::new(&RateLimitsConfig(limits))
    }

    #[tokio::test]
    async fn eleventh_call_in_window_is_rejected() {
        let limiter = limiter(10, 1000);
        let start = Instant::now();

        for i in 0..10 {
            let at = start + Duration::from_millis(i * 10);
            assert!(limiter.check_limit_at("svc", "k", at).await, "call {} should pass", i);
        }
        assert!(!limiter.check_limit_at("svc", "k", start + Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn refills_to_capacity_after_window() {
        let limiter = limiter(10, 1000);
        let start = Instant::now();

        for _ in 0..10 {
            assert!(limiter.check_limit_at("svc", "k", start).await);
        }
        assert!(!limiter.check_limit_at("svc", "k", start).await);

        // Several windows later the bucket is capped at capacity, not overfilled
        let later = start + Duration::from_millis(3500);
        for _ in 0..10 {
            assert!(limiter.check_limit_at("svc", "k", later).await);
        }
        assert!(!limiter.check_limit_at("svc", "k", later).await);
    }

    #[tokio::test]
    async fn partial_window_does_not_refill() {
        let limiter = limiter(2, 1000);
        let start = Instant::now();
        assert!(limiter.check_limit_at("svc", "k", start).await);
        assert!(limiter.check_limit_at("svc", "k", start).await);
        assert!(!limiter.check_limit_at("svc", "k", start + Duration::from_millis(999)).await);
        assert!(limiter.check_limit_at("svc", "k", start + Duration::from_millis(1000)).await);
    }

    #[tokio::test]
    async fn keys_are_isolated_and_unknown_services_unlimited() {
        let limiter = limiter(1, 1000);
        let now = Instant::now();
        assert!(limiter.check_limit_at("svc", "a", now).await);
        assert!(!limiter.check_limit_at("svc", "a", now).await);
        assert!(limiter.check_limit_at("svc", "b", now).await);

        for _ in 0..1000 {
            assert!(limiter.check_limit_at("unregistered", "a", now).await);
        }
        assert!(limiter.limit_for("unregistered").is_none());
    }

    #[tokio::test]
    async fn idle_buckets_are_evicted_as_the_map_grows() {
        let limiter = limiter(5, 1000);
        let start = Instant::now();

        for i in 0..MIN_SWEEP_SIZE {
            assert!(limiter.check_limit_at("svc", &format!("key-{}", i), start).await);
        }
        assert_eq!(limiter.bucket_count().await, MIN_SWEEP_SIZE);

        // Within the window nothing is idle yet, so the map keeps every bucket
        let soon = start + Duration::from_millis(500);
        assert!(limiter.check_limit_at("svc", "fresh-1", soon).await);
        assert_eq!(limiter.bucket_count().await, MIN_SWEEP_SIZE + 1);

        // A window later the old buckets are full again and swept on the next new key
        let later = start + Duration::from_millis(1500);
        for i in 0..MIN_SWEEP_SIZE {
            assert!(limiter.check_limit_at("svc", &format!("other-{}", i), later).await);
        }
        assert!(limiter.bucket_count().await <= MIN_SWEEP_SIZE + 1);
    }

    #[tokio::test]
    async fn eviction_does_not_reset_a_drained_bucket() {
        let limiter = limiter(1, 60_000);
        let start = Instant::now();
        assert!(limiter.check_limit_at("svc", "hot", start).await);

        for i in 0..MIN_SWEEP_SIZE * 2 {
            limiter.check_limit_at("svc", &format!("k-{}", i), start).await;
        }
        assert!(!limiter.check_limit_at("svc", "hot", start).await);
    }

    #[tokio::test]
    async fn wait_for_token_times_out_then_succeeds_after_refill() {
        let limiter = limiter(1, 300);
        assert!(limiter.check_limit("svc", "k").await);

        assert!(!limiter.wait_for_token("svc", "k", Duration::from_millis(50)).await);
        assert!(limiter.wait_for_token("svc", "k", Duration::from_millis(1000)).await);
    }
}
