//! In-memory TTL cache for proxied static assets.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use sha2::{Digest, Sha256};
use tokio::{sync::OwnedMutexGuard, task::JoinHandle};
use tracing::debug;

/// File extensions that mark a path as a cacheable static asset.
const STATIC_EXTENSIONS: &[&str] = &[
    "js", "mjs", "css", "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "avif", "woff",
    "woff2", "ttf", "otf", "eot", "map",
];

/// Path segments that only ever serve static assets.
const STATIC_SEGMENTS: &[&str] = &["/static/", "/_next/static/", "/assets/"];

/// Cache key: SHA-256 over the inbound path and the client's
/// `Accept-Encoding`, so differently encoded variants never collide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(path_and_query: &str, accept_encoding: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path_and_query.as_bytes());
        hasher.update(b"\n");
        hasher.update(accept_encoding.unwrap_or_default().trim().as_bytes());
        Self(hex(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12])
    }
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub etag: String,
    pub created_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    /// Snapshot of a response. Uses the upstream `ETag` when there is one,
    /// otherwise derives a weak tag from the body.
    pub fn new(status: StatusCode, mut headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
        let etag = headers
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| weak_etag(&body));
        if let Ok(value) = HeaderValue::from_str(&etag) {
            headers.insert(header::ETAG, value);
        }
        Self {
            status,
            headers,
            body,
            etag,
            created_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }

    /// Whether an `If-None-Match` value matches this entry.
    pub fn matches(&self, if_none_match: &str) -> bool {
        let ours = strip_weak(&self.etag);
        if_none_match
            .split(',')
            .map(str::trim)
            .any(|tag| tag == "*" || strip_weak(tag) == ours)
    }
}

/// Process-wide asset cache. Lookups never hold the lock across an await.
pub struct AssetCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    inflight: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
}

impl AssetCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a live entry; expired entries are dropped on the way.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entries = self.entries.lock().ok()?;
        let entry = entries.get(key)?;
        if !entry.is_expired() {
            return Some(entry.clone());
        }
        entries.remove(key);
        debug!(%key, "cache entry expired");
        None
    }

    pub fn put(&self, key: CacheKey, entry: CacheEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry and returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired_at(now));
        before - entries.len()
    }

    /// Serialises fetches for one key. Concurrent misses wait here and should
    /// re-check [`AssetCache::get`] once they hold the guard.
    pub async fn lock_key(&self, key: &CacheKey) -> InflightGuard<'_> {
        let lock = match self.inflight.lock() {
            Ok(mut inflight) => inflight.entry(key.clone()).or_default().clone(),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        };
        let guard = lock.lock_owned().await;
        InflightGuard {
            cache: self,
            key: key.clone(),
            guard: Some(guard),
        }
    }

    /// Runs [`AssetCache::evict_expired`] on a fixed interval.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    debug!(evicted, remaining = cache.len(), "evicted expired cache entries");
                }
            }
        })
    }
}

/// Held while a key is being fetched; the lock table entry is released once
/// nobody else is waiting on it.
pub struct InflightGuard<'a> {
    cache: &'a AssetCache,
    key: CacheKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        if let Ok(mut inflight) = self.cache.inflight.lock()
            && let Some(lock) = inflight.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            inflight.remove(&self.key);
        }
    }
}

/// Only GET requests for static-looking target paths are cached.
pub fn is_cacheable(method: &Method, target_path: &str) -> bool {
    if method != Method::GET {
        return false;
    }
    let path = target_path.to_ascii_lowercase();
    if STATIC_SEGMENTS.iter().any(|segment| path.contains(segment)) {
        return true;
    }
    let file = path.rsplit('/').next().unwrap_or_default();
    match file.rsplit_once('.') {
        Some((stem, ext)) => !stem.is_empty() && STATIC_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn weak_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("W/\"{}\"", &hex(&digest)[..32])
}

fn strip_weak(tag: &str) -> &str {
    tag.strip_prefix("W/").unwrap_or(tag)
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
