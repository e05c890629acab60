//! Frame serving: level extraction, caching and the proxy controller.
//!
//! - [`extract`] - byte ranges of resolution levels
//! - [`cache`] - in-process LRU tier
//! - [`tiered`] and [`memcached`] - the two-tier cache and its distributed tier
//! - [`service`] - [`FrameService`], which ties the pieces together

pub mod cache;
pub mod extract;
pub mod memcached;
pub mod service;
pub mod tiered;

pub use cache::{FrameCacheKey, LocalFrameCache, DEFAULT_CACHE_TTL, DEFAULT_FRAME_CACHE_CAPACITY};
pub use extract::{
    byte_range, end_offset, extract_levels, extract_range, start_offset, LevelCollector,
    LevelWindow,
};
pub use memcached::{MemcachedClient, DEFAULT_MAX_VALUE_SIZE, DEFAULT_MEMCACHED_TIMEOUT};
pub use service::{run_parser, FrameRequest, FrameResponse, FrameService};
pub use tiered::{DistributedCache, TieredCache};
