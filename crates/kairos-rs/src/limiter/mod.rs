//! Per-route token bucket rate limiting.
//!
//! One bucket per `(route, key)`. Idle buckets are reclaimed by a background
//! sweeper so memory stays bounded regardless of how many distinct keys a
//! route has seen (per-IP or per-principal keying is a future extension of
//! `extract_key`; today the default key is the route path itself).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::models::route::RateLimitPolicy;

struct Bucket {
    tokens: f64,
    last_update: Instant,
    last_seen: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Admit,
    Reject,
}

const IDLE_RECLAIM: Duration = Duration::from_secs(600);

/// Extracts the limiter key for a request. Per the spec's default, the key
/// is the route path; `require_auth` is accepted so future extensions can
/// key by principal without changing the call site.
pub fn extract_key(path: &str, _require_auth: bool) -> String {
    path.to_string()
}

/// Token bucket limiter, one instance shared across all routes; buckets are
/// namespaced internally by `(route_path, key)`.
pub struct TokenBucketLimiter {
    buckets: RwLock<HashMap<String, Bucket>>,
    last_sweep: RwLock<Instant>,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            last_sweep: RwLock::new(Instant::now()),
        }
    }
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_id(route_path: &str, key: &str) -> String {
        format!("{route_path}\u{0}{key}")
    }

    /// `allow` never fails: an in-memory limiter crashing is not a real
    /// failure mode, but any unexpected poisoned lock fails open rather than
    /// blocking a request, per the limiter's contract.
    pub fn allow(&self, route_path: &str, key: &str, policy: &RateLimitPolicy) -> Decision {
        self.maybe_sweep();

        let id = Self::bucket_id(route_path, key);
        let now = Instant::now();

        let buckets = match self.buckets.read() {
            Ok(g) => g,
            Err(_) => return Decision::Admit,
        };
        if let Some(bucket) = buckets.get(&id) {
            // Fast path requires a write to mutate tokens; re-acquire below.
            drop(buckets);
            return self.admit_existing(&id, now, policy);
        }
        drop(buckets);

        let mut write_guard = match self.buckets.write() {
            Ok(g) => g,
            Err(_) => return Decision::Admit,
        };
        let bucket = write_guard.entry(id).or_insert_with(|| Bucket {
            tokens: policy.burst,
            last_update: now,
            last_seen: now,
        });
        bucket.last_seen = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Admit
        } else {
            Decision::Reject
        }
    }

    fn admit_existing(&self, id: &str, now: Instant, policy: &RateLimitPolicy) -> Decision {
        let mut write_guard = match self.buckets.write() {
            Ok(g) => g,
            Err(_) => return Decision::Admit,
        };
        let Some(bucket) = write_guard.get_mut(id) else {
            return Decision::Admit;
        };
        let elapsed = now.duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * policy.qps).min(policy.burst);
        bucket.last_update = now;
        bucket.last_seen = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Decision::Admit
        } else {
            Decision::Reject
        }
    }

    fn maybe_sweep(&self) {
        {
            let last = match self.last_sweep.read() {
                Ok(g) => g,
                Err(_) => return,
            };
            if last.elapsed() < Duration::from_secs(60) {
                return;
            }
        }
        let mut last = match self.last_sweep.write() {
            Ok(g) => g,
            Err(_) => return,
        };
        if last.elapsed() < Duration::from_secs(60) {
            return;
        }
        *last = Instant::now();
        if let Ok(mut buckets) = self.buckets.write() {
            buckets.retain(|_, b| b.last_seen.elapsed() < IDLE_RECLAIM);
        }
    }
}

pub type SharedLimiter = Arc<TokenBucketLimiter>;

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(qps: f64, burst: f64) -> RateLimitPolicy {
        RateLimitPolicy { qps, burst }
    }

    #[test]
    fn admits_up_to_burst_then_rejects() {
        let limiter = TokenBucketLimiter::new();
        let p = policy(1.0, 2.0);
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Admit);
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Admit);
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Reject);
    }

    #[test]
    fn refills_over_time() {
        let limiter = TokenBucketLimiter::new();
        let p = policy(1000.0, 1.0);
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Admit);
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Reject);
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(limiter.allow("/r", "k", &p), Decision::Admit);
    }

    #[test]
    fn distinct_keys_have_independent_buckets() {
        let limiter = TokenBucketLimiter::new();
        let p = policy(1.0, 1.0);
        assert_eq!(limiter.allow("/r", "a", &p), Decision::Admit);
        assert_eq!(limiter.allow("/r", "b", &p), Decision::Admit);
    }

    #[test]
    fn extract_key_defaults_to_path() {
        assert_eq!(extract_key("/api/v1/heavy", false), "/api/v1/heavy");
        assert_eq!(extract_key("/api/v1/heavy", true), "/api/v1/heavy");
    }
}
