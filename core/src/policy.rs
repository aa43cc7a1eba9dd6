//! Transport configuration: timeout, cache store and pinning table.
//!
//! # Design
//! A `TransportPolicy` is a plain value. The client keeps one and builds its
//! session from it lazily; replacing any part of the policy drops the current
//! session so the next call rebuilds it. Requests already in flight keep the
//! session they started with.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheStore, MemoryCache};

/// Whether responses are cached, and where.
#[derive(Clone, Default)]
pub enum CacheSetting {
    #[default]
    Disabled,
    Store(Arc<dyn CacheStore>),
}

impl CacheSetting {
    /// An in-memory store holding up to `capacity` bytes of bodies.
    pub fn memory(capacity: usize) -> Self {
        CacheSetting::Store(Arc::new(MemoryCache::with_capacity(capacity)))
    }

    pub fn store(&self) -> Option<&Arc<dyn CacheStore>> {
        match self {
            CacheSetting::Disabled => None,
            CacheSetting::Store(store) => Some(store),
        }
    }
}

impl fmt::Debug for CacheSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheSetting::Disabled => f.write_str("Disabled"),
            CacheSetting::Store(_) => f.write_str("Store(..)"),
        }
    }
}

impl PartialEq for CacheSetting {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CacheSetting::Disabled, CacheSetting::Disabled) => true,
            (CacheSetting::Store(a), CacheSetting::Store(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Everything the session is built from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportPolicy {
    pub timeout: Option<Duration>,
    pub cache: CacheSetting,
    pub pinning: PinningTable,
}

impl TransportPolicy {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cache(mut self, cache: CacheSetting) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_pinning(mut self, pinning: PinningTable) -> Self {
        self.pinning = pinning;
        self
    }
}

/// One or several accepted hashes, as written in configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PinSpec {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for PinSpec {
    fn from(hash: &str) -> Self {
        PinSpec::One(hash.to_string())
    }
}

impl From<String> for PinSpec {
    fn from(hash: String) -> Self {
        PinSpec::One(hash)
    }
}

impl From<Vec<String>> for PinSpec {
    fn from(hashes: Vec<String>) -> Self {
        PinSpec::Many(hashes)
    }
}

impl From<Vec<&str>> for PinSpec {
    fn from(hashes: Vec<&str>) -> Self {
        PinSpec::Many(hashes.into_iter().map(str::to_string).collect())
    }
}

/// Host suffix to accepted base64 SHA-256 public-key hashes.
///
/// `*.` prefixes are stripped on insertion, so `*.example.com` and
/// `example.com` name the same entry and both cover `example.com` and every
/// subdomain of it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "BTreeMap<String, PinSpec>")]
pub struct PinningTable {
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl PinningTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table from JSON: `{"*.example.com": "hash" | ["h1", "h2"]}`.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Add hashes for `pattern`, merging with hashes already present.
    pub fn insert(&mut self, pattern: &str, pins: impl Into<PinSpec>) {
        let key = normalize_pattern(pattern);
        let set = self.entries.entry(key).or_default();
        match pins.into() {
            PinSpec::One(hash) => {
                set.insert(hash);
            }
            PinSpec::Many(hashes) => set.extend(hashes),
        }
    }

    pub fn with(mut self, pattern: &str, pins: impl Into<PinSpec>) -> Self {
        self.insert(pattern, pins);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The longest entry whose key is a suffix of `host`. Matching is on the
    /// raw string, so `example.com` also covers `badexample.com`.
    pub fn lookup(&self, host: &str) -> Option<(&str, &BTreeSet<String>)> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.entries
            .iter()
            .filter(|(key, _)| covers(key, &host))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, pins)| (key.as_str(), pins))
    }
}

impl From<BTreeMap<String, PinSpec>> for PinningTable {
    fn from(raw: BTreeMap<String, PinSpec>) -> Self {
        let mut table = PinningTable::new();
        for (pattern, pins) in raw {
            table.insert(&pattern, pins);
        }
        table
    }
}

fn normalize_pattern(pattern: &str) -> String {
    let pattern = pattern.trim();
    let pattern = pattern.strip_prefix("*.").unwrap_or(pattern);
    pattern.trim_end_matches('.').to_ascii_lowercase()
}

fn covers(key: &str, host: &str) -> bool {
    host.ends_with(key)
}
