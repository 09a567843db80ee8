//! Response cache: fingerprint -> response memo with TTL
//! and a size bound, LRU-evicted.
//!
//! Fingerprint normalization (recorded as an open decision in
//! `DESIGN.md`): the prompt is trimmed and its line endings normalized
//! to `\n` (no full Unicode NFC); attachments contribute their content
//! hash; `preferred_backend` is excluded since it is a hint, not part of
//! the semantic request.

use lru::LruCache;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::{Request, Response};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_size_bytes: usize,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_size_bytes: 64 * 1024 * 1024,
            max_entries: 10_000,
        }
    }
}

struct Entry {
    response: Response,
    inserted_at: Instant,
    ttl: Duration,
    size_bytes: usize,
    hit_count: u64,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }
}

pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

struct CacheInner {
    entries: LruCache<String, Entry>,
    total_bytes: usize,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).unwrap();
        Self {
            config,
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(capacity),
                total_bytes: 0,
            }),
        }
    }

    /// Lookup by fingerprint. Returns a response with `cache_hit=true` and
    /// the adapter field preserved from the original insert, or `None` on
    /// miss/expiry (an expired entry is evicted on read).
    pub fn get(&self, fingerprint: &str) -> Option<Response> {
        let mut inner = self.inner.lock().unwrap();
        let expired = matches!(inner.entries.peek(fingerprint), Some(e) if e.is_expired());
        if expired {
            if let Some(entry) = inner.entries.pop(fingerprint) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
            return None;
        }
        let entry = inner.entries.get_mut(fingerprint)?;
        entry.hit_count += 1;
        let mut response = entry.response.clone();
        response.cache_hit = true;
        Some(response)
    }

    /// Insert on a successful router result, unless the caller asked to
    /// bypass the cache. Size bound is enforced via LRU eviction.
    pub fn put(&self, fingerprint: String, response: Response) {
        let size_bytes = estimate_size(&response);
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.entries.put(
            fingerprint,
            Entry {
                response,
                inserted_at: Instant::now(),
                ttl: self.config.ttl,
                size_bytes,
                hit_count: 0,
            },
        ) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.size_bytes);
        }
        inner.total_bytes += size_bytes;

        while inner.total_bytes > self.config.max_size_bytes {
            match inner.entries.pop_lru() {
                Some((_, evicted)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(evicted.size_bytes);
                }
                None => break,
            }
        }
    }

    /// Periodic TTL sweep; removes all currently-expired entries.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let expired_keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        let count = expired_keys.len();
        for key in expired_keys {
            if let Some(entry) = inner.entries.pop(&key) {
                inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.total_bytes = 0;
    }
}

fn estimate_size(response: &Response) -> usize {
    response.content.len() + 128
}

/// Derives the cache key for a request. Semantic options that affect the
/// response (none currently carry semantic weight beyond prompt/attachments)
/// would be folded in here; `preferred_backend` never is.
pub fn fingerprint(request: &Request) -> String {
    let normalized_prompt = normalize_prompt(&request.prompt);
    let mut hasher = DefaultHasher::new();
    normalized_prompt.hash(&mut hasher);
    for attachment in &request.attachments {
        hash_bytes(attachment).hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}

fn normalize_prompt(prompt: &str) -> String {
    prompt.trim().replace("\r\n", "\n").replace('\r', "\n")
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_bytes: usize,
}

impl ResponseCache {
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().unwrap();
        CacheStats {
            entries: inner.entries.len(),
            total_bytes: inner.total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn response(content: &str) -> Response {
        Response {
            content: content.to_string(),
            backend_used: "A".to_string(),
            input_tokens: 1,
            output_tokens: 1,
            cost_usd: 0.0,
            latency_ms: 1,
            cache_hit: false,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn fingerprint_ignores_preferred_backend() {
        let mut r1 = Request::new("hello world");
        let mut r2 = Request::new("hello world");
        r1.options.preferred_backend = Some("A".to_string());
        r2.options.preferred_backend = Some("B".to_string());
        assert_eq!(fingerprint(&r1), fingerprint(&r2));
    }

    #[test]
    fn fingerprint_normalizes_whitespace_and_line_endings() {
        let r1 = Request::new("  hello world  ");
        let r2 = Request::new("hello world");
        assert_eq!(fingerprint(&r1), fingerprint(&r2));

        let r3 = Request::new("hello\r\nworld");
        let r4 = Request::new("hello\nworld");
        assert_eq!(fingerprint(&r3), fingerprint(&r4));
    }

    #[test]
    fn hit_then_miss_after_expiry() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_millis(20),
            ..CacheConfig::default()
        });
        cache.put("key".to_string(), response("pong"));
        assert!(cache.get("key").unwrap().cache_hit);
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("key").is_none());
    }

    #[test]
    fn eviction_respects_size_bound() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_secs(60),
            max_size_bytes: 300,
            max_entries: 100,
        });
        for i in 0..10 {
            cache.put(format!("k{i}"), response(&"x".repeat(50)));
        }
        assert!(cache.stats().total_bytes <= 300);
    }
}
