//! Local frame cache.
//!
//! An in-process LRU cache holding whole frames and level windows. It is the
//! first tier of [`TieredCache`](super::TieredCache).
//!
//! # Cache Key
//!
//! Entries are keyed by frame identity plus an optional level window:
//!
//! ```text
//! datastore/{d}/imageset/{s}/imageframe/{f}                    whole frame
//! datastore/{d}/imageset/{s}/imageframe/{f}/start/1/end/3      levels 1..=3
//! datastore/{d}/imageset/{s}/imageframe/{f}/start/2/end/all    level 2 onwards
//! ```
//!
//! # Eviction
//!
//! The cache tracks the total size of cached frames in bytes and evicts
//! least-recently-used entries when the capacity is exceeded. Each entry
//! also carries an expiry; expired entries are dropped when read.

use std::fmt;
use std::num::NonZeroUsize;
use std::time::Duration;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::Instant;

use super::extract::LevelWindow;
use crate::io::FrameId;

/// Default cache capacity: 512MB
pub const DEFAULT_FRAME_CACHE_CAPACITY: usize = 512 * 1024 * 1024;

/// Default entry lifetime: one week
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(604_800);

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Cache Key
// =============================================================================

/// Cache key for a whole frame or a window of its levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameCacheKey {
    pub frame: FrameId,

    /// `None` for the whole frame as fetched
    pub window: Option<LevelWindow>,
}

impl FrameCacheKey {
    /// Key of the whole frame.
    pub fn whole(frame: FrameId) -> Self {
        Self {
            frame,
            window: None,
        }
    }

    /// Key of a level window.
    pub fn window(frame: FrameId, window: LevelWindow) -> Self {
        Self {
            frame,
            window: Some(window),
        }
    }
}

impl fmt::Display for FrameCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "datastore/{}/imageset/{}/imageframe/{}",
            self.frame.datastore_id, self.frame.frame_set_id, self.frame.frame_id
        )?;
        if let Some(window) = &self.window {
            write!(f, "/start/{}/end/", window.start)?;
            match window.end {
                Some(end) => write!(f, "{}", end)?,
                None => f.write_str("all")?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Local Frame Cache
// =============================================================================

struct Entry {
    data: Bytes,
    expires_at: Instant,
}

struct Inner {
    lru: LruCache<FrameCacheKey, Entry>,
    current_size: usize,
}

impl Inner {
    fn remove(&mut self, key: &FrameCacheKey) -> Option<Bytes> {
        let entry = self.lru.pop(key)?;
        self.current_size = self.current_size.saturating_sub(entry.data.len());
        Some(entry.data)
    }
}

/// LRU cache for frame bytes with size-based capacity and expiry.
///
/// The cache is thread-safe and can be shared across async tasks via `Arc`.
pub struct LocalFrameCache {
    inner: RwLock<Inner>,

    /// Maximum total size in bytes
    max_size: usize,

    ttl: Duration,
}

impl LocalFrameCache {
    /// Create a cache with default capacity and lifetime.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_FRAME_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }

    /// Create a cache holding up to `max_size` bytes for `ttl` each.
    pub fn with_capacity(max_size: usize, ttl: Duration) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES, ttl)
    }

    /// Create a cache with an explicit entry limit.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize, ttl: Duration) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: RwLock::new(Inner {
                lru: LruCache::new(max_entries),
                current_size: 0,
            }),
            max_size,
            ttl,
        }
    }

    /// Get an entry, marking it as recently used.
    ///
    /// Expired entries are removed and reported as a miss.
    pub async fn get(&self, key: &FrameCacheKey) -> Option<Bytes> {
        let mut inner = self.inner.write().await;
        let expired = match inner.lru.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => return Some(entry.data.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.remove(key);
        }
        None
    }

    /// Check if an unexpired entry exists without updating LRU order.
    pub async fn contains(&self, key: &FrameCacheKey) -> bool {
        let inner = self.inner.read().await;
        inner
            .lru
            .peek(key)
            .is_some_and(|entry| entry.expires_at > Instant::now())
    }

    /// Store an entry, evicting least-recently-used entries when over
    /// capacity. Values larger than the whole cache are not stored.
    pub async fn put(&self, key: FrameCacheKey, data: Bytes) {
        let data_size = data.len();
        if data_size > self.max_size {
            return;
        }

        let mut inner = self.inner.write().await;
        inner.remove(&key);

        let entry = Entry {
            data,
            expires_at: Instant::now() + self.ttl,
        };
        if let Some((_, evicted)) = inner.lru.push(key, entry) {
            // Entry-count eviction
            inner.current_size = inner.current_size.saturating_sub(evicted.data.len());
        }
        inner.current_size += data_size;

        while inner.current_size > self.max_size {
            match inner.lru.pop_lru() {
                Some((_, evicted)) => {
                    inner.current_size = inner.current_size.saturating_sub(evicted.data.len());
                }
                None => break,
            }
        }
    }

    pub async fn remove(&self, key: &FrameCacheKey) -> Option<Bytes> {
        self.inner.write().await.remove(key)
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.lru.clear();
        inner.current_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.lru.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.lru.is_empty()
    }

    /// Current total size of cached entries in bytes.
    pub async fn size(&self) -> usize {
        self.inner.read().await.current_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl Default for LocalFrameCache {
    fn default() -> Self {
        Self::new()
    }
}
