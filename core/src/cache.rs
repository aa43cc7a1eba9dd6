//! Response cache.
//!
//! # Design
//! The executor only talks to the `CacheStore` trait, so callers can inject
//! their own store. `MemoryCache` is the provided implementation: a byte
//! bounded map that drops the oldest entries first once it is full. Which
//! responses are stored and for how long is decided from `Cache-Control`
//! (see `freshness`), not by the store.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// Default capacity of the shared client's store: 4 MiB of bodies.
pub const DEFAULT_CAPACITY: usize = 4 * 1024 * 1024;

/// A stored response and how long it stays fresh.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: u16,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    pub stored_at: Instant,
    pub max_age: Duration,
}

impl CachedResponse {
    pub fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.max_age
    }
}

/// Storage behind the client's cache. Implementations must be thread safe;
/// consistency between concurrent calls for one key is whatever the store
/// provides.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<CachedResponse>;
    fn put(&self, key: &str, response: CachedResponse);
    fn remove(&self, key: &str);
    fn clear(&self);
}

/// In-memory store bounded by total body size.
#[derive(Debug)]
pub struct MemoryCache {
    capacity: usize,
    inner: Mutex<Entries>,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, CachedResponse>,
    order: VecDeque<String>,
    size: usize,
}

impl Entries {
    fn take(&mut self, key: &str) -> Option<CachedResponse> {
        let removed = self.map.remove(key)?;
        self.size -= removed.body.len();
        self.order.retain(|k| k != key);
        Some(removed)
    }
}

impl MemoryCache {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Entries::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, key: &str) -> Option<CachedResponse> {
        self.lock().map.get(key).cloned()
    }

    fn put(&self, key: &str, response: CachedResponse) {
        if response.body.len() > self.capacity {
            return;
        }
        let mut entries = self.lock();
        entries.take(key);
        entries.size += response.body.len();
        entries.map.insert(key.to_string(), response);
        entries.order.push_back(key.to_string());
        while entries.size > self.capacity {
            let Some(oldest) = entries.order.pop_front() else {
                break;
            };
            if let Some(evicted) = entries.map.remove(&oldest) {
                entries.size -= evicted.body.len();
            }
        }
    }

    fn remove(&self, key: &str) {
        self.lock().take(key);
    }

    fn clear(&self) {
        *self.lock() = Entries::default();
    }
}

/// How long a response with these headers may be served from cache.
///
/// `None` when the response must not be stored: no `max-age`, a zero
/// `max-age`, or a `no-store`/`no-cache` directive.
pub fn freshness(headers: &[(String, String)]) -> Option<Duration> {
    let mut max_age = None;
    let directives = headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("cache-control"))
        .flat_map(|(_, value)| value.split(','));
    for directive in directives {
        let directive = directive.trim().to_ascii_lowercase();
        match directive.split_once('=') {
            Some(("max-age", secs)) => {
                max_age = secs.trim_matches('"').parse::<u64>().ok();
            }
            None if directive == "no-store" || directive == "no-cache" => return None,
            _ => {}
        }
    }
    max_age
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
