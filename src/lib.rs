//! # TLM Proxy
//!
//! Serves HTJ2K (High-Throughput JPEG 2000) image frames one resolution
//! level at a time.
//!
//! Frames are stored whole in S3-compatible object storage. When a frame is
//! encoded with one tile-part per resolution level, the first tile-part
//! (plus the main header) is a decodable thumbnail and each following
//! tile-part refines it. This crate parses the codestream incrementally as it
//! streams in, indexes the tile-parts and returns any window of levels
//! without decoding a pixel.
//!
//! ## Features
//!
//! - **Incremental parsing**: tile-parts are indexed as soon as their bytes
//!   arrive, and the download stops once the requested levels are in
//! - **Container support**: raw codestreams and JP2 boxed files
//! - **Two-tier caching**: in-process LRU plus an optional memcached tier
//! - **Progressive reply**: a level 0 request is answered before the rest of
//!   the frame has been read, while the remaining levels are cached
//!
//! ## Architecture
//!
//! - [`io`] - byte cursor and frame sources (S3, in-memory)
//! - [`mod@format`] - container detection, marker segments and the parser
//! - [`frame`] - level extraction, caches and the frame service
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use tlm_proxy::{create_router, create_s3_client, FrameService, LocalFrameCache,
//!     RouterConfig, S3FrameSource, TieredCache};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = create_s3_client(None, "us-east-1").await;
//!     let source = S3FrameSource::new(client, "frames".to_string(), None, Duration::from_secs(30));
//!     let cache = TieredCache::new(Some(LocalFrameCache::new()), None);
//!     let router = create_router(FrameService::new(source, cache), RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, router).await.unwrap();
//! }
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod frame;
pub mod io;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use error::{CacheError, CodestreamError, FrameError, IoError};
pub use format::{
    detect_format, CodestreamHeader, FileFormat, Marker, ParseObserver, ParsedFrame, Parser,
    ParserState, Segment, TilePart,
};
pub use frame::{
    extract_levels, extract_range, DistributedCache, FrameCacheKey, FrameRequest, FrameResponse,
    FrameService, LevelCollector, LevelWindow, LocalFrameCache, MemcachedClient, TieredCache,
};
pub use io::{
    create_s3_client, ByteCursor, FrameId, FrameSource, FrameStream, MemoryFrameStream,
    S3FrameSource,
};
pub use server::{create_router, create_shared_router, AppState, RouterConfig};
