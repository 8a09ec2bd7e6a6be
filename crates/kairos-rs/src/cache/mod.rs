//! Response cache: fingerprints eligible requests and stores 2xx responses.
//!
//! The cache is never on the critical path for correctness: an unreachable
//! backend is treated as a miss on read and a no-op on write. Two
//! implementations are in scope — an in-memory LRU with size/item caps, and
//! a trait boundary for an external key-value store (exercised in tests by
//! a fake, no concrete network-backed implementation is required here).

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::models::route::CachePolicy;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unreachable: {0}")]
    Unreachable(String),
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub status_code: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub cached_at: Instant,
}

impl CacheEntry {
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

struct StoredEntry {
    entry: CacheEntry,
    ttl: Duration,
    size: usize,
}

/// In-memory LRU cache bounded by item count and total byte size.
pub struct InMemoryCache {
    inner: Mutex<Inner>,
    max_items: usize,
    max_bytes: usize,
}

struct Inner {
    map: HashMap<String, StoredEntry>,
    order: VecDeque<String>,
    bytes: usize,
}

impl InMemoryCache {
    pub fn new(max_items: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: VecDeque::new(),
                bytes: 0,
            }),
            max_items,
            max_bytes,
        }
    }

    fn touch(inner: &mut Inner, key: &str) {
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        inner.order.push_back(key.to_string());
    }

    fn evict_if_needed(inner: &mut Inner, max_items: usize, max_bytes: usize) {
        while inner.map.len() > max_items || inner.bytes > max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(removed) = inner.map.remove(&oldest) {
                inner.bytes = inner.bytes.saturating_sub(removed.size);
            }
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(stored) = inner.map.get(key) else {
            return Ok(None);
        };
        if stored.entry.is_expired(stored.ttl) {
            let size = stored.size;
            inner.map.remove(key);
            inner.bytes = inner.bytes.saturating_sub(size);
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
            return Ok(None);
        }
        let entry = stored.entry.clone();
        Self::touch(&mut inner, key);
        Ok(Some(entry))
    }

    async fn set(&self, key: &str, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let size = entry.body.len()
            + entry
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>();
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.map.insert(key.to_string(), StoredEntry { entry, ttl, size }) {
            inner.bytes = inner.bytes.saturating_sub(old.size);
        }
        inner.bytes += size;
        Self::touch(&mut inner, key);
        Self::evict_if_needed(&mut inner, self.max_items, self.max_bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(removed) = inner.map.remove(key) {
            inner.bytes = inner.bytes.saturating_sub(removed.size);
        }
        if let Some(pos) = inner.order.iter().position(|k| k == key) {
            inner.order.remove(pos);
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.inner.lock().unwrap().map.contains_key(key))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Whether `path`/`method` are eligible for caching under `policy`.
pub fn is_eligible(policy: &CachePolicy, method: &str, path: &str) -> bool {
    if !policy.enabled {
        return false;
    }
    if !policy.methods.iter().any(|m| m.eq_ignore_ascii_case(method)) {
        return false;
    }
    let included = policy.include_paths.is_empty()
        || policy.include_paths.iter().any(|p| matches_path(p, path));
    let excluded = policy.exclude_paths.iter().any(|p| matches_path(p, path));
    included && !excluded
}

fn matches_path(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    false
}

/// Deterministic fingerprint: `method | path | [sorted query] | [selected headers]`,
/// hashed and hex-encoded, prefixed for namespacing.
pub fn fingerprint(
    prefix: &str,
    method: &str,
    path: &str,
    query: Option<&str>,
    headers: &[(String, String)],
    policy: &CachePolicy,
) -> String {
    let mut parts = vec![method.to_ascii_uppercase(), path.to_string()];

    if policy.include_query {
        if let Some(q) = query {
            let mut pairs: Vec<&str> = q.split('&').filter(|s| !s.is_empty()).collect();
            pairs.sort_unstable();
            parts.push(pairs.join("&"));
        } else {
            parts.push(String::new());
        }
    }

    if !policy.include_headers.is_empty() {
        for name in &policy.include_headers {
            let value = headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str())
                .unwrap_or("");
            parts.push(format!("{name}={value}"));
        }
    }

    let joined = parts.join("|");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    let digest = hasher.finalize();
    format!("{prefix}:{}", hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CachePolicy {
        CachePolicy {
            enabled: true,
            ttl_s: 60,
            methods: vec!["GET".to_string()],
            include_paths: vec![],
            exclude_paths: vec![],
            include_query: true,
            include_headers: vec![],
        }
    }

    #[tokio::test]
    async fn round_trips_a_2xx_entry() {
        let cache = InMemoryCache::new(100, 1_000_000);
        let entry = CacheEntry {
            status_code: 200,
            headers: vec![],
            body: b"hello".to_vec(),
            cached_at: Instant::now(),
        };
        cache.set("k1", entry, Duration::from_secs(60)).await.unwrap();
        let got = cache.get("k1").await.unwrap().unwrap();
        assert_eq!(got.body, b"hello");
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let cache = InMemoryCache::new(100, 1_000_000);
        let entry = CacheEntry {
            status_code: 200,
            headers: vec![],
            body: b"hello".to_vec(),
            cached_at: Instant::now() - Duration::from_secs(120),
        };
        cache.set("k1", entry, Duration::from_secs(60)).await.unwrap();
        assert!(cache.get("k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evicts_oldest_when_item_cap_exceeded() {
        let cache = InMemoryCache::new(1, 1_000_000);
        let make = |b: &[u8]| CacheEntry {
            status_code: 200,
            headers: vec![],
            body: b.to_vec(),
            cached_at: Instant::now(),
        };
        cache.set("a", make(b"1"), Duration::from_secs(60)).await.unwrap();
        cache.set("b", make(b"2"), Duration::from_secs(60)).await.unwrap();
        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
    }

    #[test]
    fn fingerprint_is_stable_under_query_reordering() {
        let p = policy();
        let a = fingerprint("route", "GET", "/x", Some("b=2&a=1"), &[], &p);
        let b = fingerprint("route", "GET", "/x", Some("a=1&b=2"), &[], &p);
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_by_path() {
        let p = policy();
        let a = fingerprint("route", "GET", "/x", None, &[], &p);
        let b = fingerprint("route", "GET", "/y", None, &[], &p);
        assert_ne!(a, b);
    }

    #[test]
    fn eligibility_respects_method_and_path_filters() {
        let mut p = policy();
        p.include_paths = vec!["/api/*".to_string()];
        p.exclude_paths = vec!["/api/private".to_string()];
        assert!(is_eligible(&p, "GET", "/api/users"));
        assert!(!is_eligible(&p, "GET", "/api/private"));
        assert!(!is_eligible(&p, "POST", "/api/users"));
        assert!(!is_eligible(&p, "GET", "/other"));
    }
}
