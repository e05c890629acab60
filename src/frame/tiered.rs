//! Two-tier frame cache.
//!
//! ```text
//!   get:  local ──miss──> distributed ──hit──> promote into local
//!   put:  local + distributed
//! ```
//!
//! Either tier may be disabled. The distributed tier is best-effort: its
//! failures are logged and read as a miss, and never reach the client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use super::cache::{FrameCacheKey, LocalFrameCache, DEFAULT_CACHE_TTL};
use crate::error::CacheError;

/// A shared cache reachable by every proxy instance.
#[async_trait]
pub trait DistributedCache: Send + Sync {
    /// Fetch a value. `Ok(None)` is a miss.
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError>;

    /// Store a value for `ttl`.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError>;
}

/// Local cache in front of an optional distributed cache.
pub struct TieredCache {
    local: Option<LocalFrameCache>,
    remote: Option<Arc<dyn DistributedCache>>,
    ttl: Duration,

    /// Prefix applied to keys in the distributed tier
    namespace: String,
}

impl TieredCache {
    pub fn new(local: Option<LocalFrameCache>, remote: Option<Arc<dyn DistributedCache>>) -> Self {
        let ttl = local.as_ref().map_or(DEFAULT_CACHE_TTL, LocalFrameCache::ttl);
        Self {
            local,
            remote,
            ttl,
            namespace: String::new(),
        }
    }

    /// A cache with both tiers disabled.
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    /// Lifetime of entries written to the distributed tier.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn local(&self) -> Option<&LocalFrameCache> {
        self.local.as_ref()
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// Key as stored in the distributed tier.
    pub fn remote_key(&self, key: &FrameCacheKey) -> String {
        format!("{}{}", self.namespace, key)
    }

    pub async fn get(&self, key: &FrameCacheKey) -> Option<Bytes> {
        if let Some(local) = &self.local {
            if let Some(data) = local.get(key).await {
                debug!(key = %key, "Local cache hit");
                return Some(data);
            }
        }

        let remote = self.remote.as_ref()?;
        let remote_key = self.remote_key(key);
        match remote.get(&remote_key).await {
            Ok(Some(data)) => {
                debug!(key = %remote_key, "Distributed cache hit");
                if let Some(local) = &self.local {
                    local.put(key.clone(), data.clone()).await;
                }
                Some(data)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %remote_key, error = %e, "Distributed cache get failed");
                None
            }
        }
    }

    pub async fn put(&self, key: FrameCacheKey, data: Bytes) {
        if let Some(remote) = &self.remote {
            let remote_key = self.remote_key(&key);
            if let Err(e) = remote.set(&remote_key, data.clone(), self.ttl).await {
                warn!(key = %remote_key, error = %e, "Distributed cache set failed");
            }
        }
        if let Some(local) = &self.local {
            local.put(key, data).await;
        }
    }
}
