//! Test utilities for integration tests.
//!
//! This module provides codestream builders, a mock frame source that counts
//! fetches and served bytes, and distributed cache doubles.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use tlm_proxy::error::{CacheError, IoError};
use tlm_proxy::frame::{DistributedCache, FrameService, LocalFrameCache, TieredCache};
use tlm_proxy::io::{FrameId, FrameSource, FrameStream, MemoryFrameStream};

// =============================================================================
// Codestream Builders
// =============================================================================

/// Size of the main header produced by [`main_header`].
pub const HEADER_LENGTH: usize = 100;

/// Size of SOT segment plus SOD marker.
pub const TILE_PART_OVERHEAD: usize = 14;

/// SIZ for one 256x256 tile, 8-bit single component.
fn siz() -> Vec<u8> {
    let mut v = vec![0xFF, 0x51, 0x00, 41];
    v.extend_from_slice(&0x4000u16.to_be_bytes());
    v.extend_from_slice(&256u32.to_be_bytes());
    v.extend_from_slice(&256u32.to_be_bytes());
    v.extend_from_slice(&[0; 8]);
    v.extend_from_slice(&256u32.to_be_bytes());
    v.extend_from_slice(&256u32.to_be_bytes());
    v.extend_from_slice(&[0; 8]);
    v.extend_from_slice(&1u16.to_be_bytes());
    v.extend_from_slice(&[0x07, 1, 1]);
    v
}

/// COD: RPCL, one layer, five decomposition levels, 64x64 code-blocks, 5/3.
fn cod() -> Vec<u8> {
    vec![0xFF, 0x52, 0x00, 12, 0, 2, 0, 1, 0, 5, 4, 4, 0x40, 1]
}

/// QCD: no quantization, five decomposition levels.
fn qcd() -> Vec<u8> {
    let mut v = vec![0xFF, 0x5C, 0x00, 19, 0x40];
    v.extend(std::iter::repeat(0x48).take(16));
    v
}

/// Latin-1 comment of 20 bytes.
fn com() -> Vec<u8> {
    let mut v = vec![0xFF, 0x64, 0x00, 18, 0x00, 0x01];
    v.extend_from_slice(b"tlm-proxy test");
    v
}

/// SOC, SIZ, COD, QCD, COM: [`HEADER_LENGTH`] bytes.
pub fn main_header() -> Vec<u8> {
    let mut v = vec![0xFF, 0x4F];
    v.extend(siz());
    v.extend(cod());
    v.extend(qcd());
    v.extend(com());
    assert_eq!(v.len(), HEADER_LENGTH);
    v
}

/// A tile-part of tile 0 whose Psot is `length`.
pub fn tile_part(part: u8, parts: u8, length: usize) -> Vec<u8> {
    assert!(length >= TILE_PART_OVERHEAD);
    let mut v = vec![0xFF, 0x90, 0x00, 10, 0x00, 0x00];
    v.extend_from_slice(&(length as u32).to_be_bytes());
    v.push(part);
    v.push(parts);
    v.extend_from_slice(&[0xFF, 0x93]);
    v.extend((0..length - TILE_PART_OVERHEAD).map(|i| (i * 7 % 251) as u8));
    v
}

/// A raw codestream with one tile-part per resolution level.
///
/// `lengths` are the tile-part lengths (Psot), so tile-part `i` starts at
/// `HEADER_LENGTH + sum(lengths[..i])`.
pub fn codestream(lengths: &[usize]) -> Vec<u8> {
    let mut v = main_header();
    let parts = lengths.len() as u8;
    for (i, &length) in lengths.iter().enumerate() {
        v.extend(tile_part(i as u8, parts, length));
    }
    v.extend_from_slice(&[0xFF, 0xD9]);
    v
}

/// Wrap a codestream in a minimal JP2 container.
///
/// With `explicit_length` false the jp2c box runs to the end of the file.
pub fn boxed(codestream: &[u8], explicit_length: bool) -> Vec<u8> {
    let mut v = vec![
        0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
    ];
    v.extend_from_slice(&[0, 0, 0, 20]);
    v.extend_from_slice(b"ftypjp2 ");
    v.extend_from_slice(&[0, 0, 0, 0]);
    v.extend_from_slice(b"jp2 ");
    let length = if explicit_length {
        codestream.len() as u32 + 8
    } else {
        0
    };
    v.extend_from_slice(&length.to_be_bytes());
    v.extend_from_slice(b"jp2c");
    v.extend_from_slice(codestream);
    v
}

/// The layout used across tests: tile-parts at 100, 4100 and 6100.
pub fn scenario_codestream() -> Vec<u8> {
    codestream(&[4000, 2000, 1000])
}

// =============================================================================
// Mock Frame Source
// =============================================================================

/// In-memory frame source that counts fetches and bytes handed out.
#[derive(Clone)]
pub struct MockFrameSource {
    frames: HashMap<FrameId, Bytes>,
    chunk_size: usize,
    fetches: Arc<AtomicUsize>,
    bytes_served: Arc<AtomicUsize>,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self {
            frames: HashMap::new(),
            chunk_size: 512,
            fetches: Arc::new(AtomicUsize::new(0)),
            bytes_served: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_frame(mut self, id: FrameId, data: Vec<u8>) -> Self {
        self.frames.insert(id, Bytes::from(data));
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn bytes_served(&self) -> usize {
        self.bytes_served.load(Ordering::SeqCst)
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

struct CountingStream {
    inner: MemoryFrameStream,
    bytes_served: Arc<AtomicUsize>,
}

#[async_trait]
impl FrameStream for CountingStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, IoError> {
        let chunk = self.inner.next_chunk().await?;
        if let Some(chunk) = &chunk {
            self.bytes_served.fetch_add(chunk.len(), Ordering::SeqCst);
        }
        Ok(chunk)
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn open_frame(&self, id: &FrameId) -> Result<Box<dyn FrameStream>, IoError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let data = self
            .frames
            .get(id)
            .cloned()
            .ok_or_else(|| IoError::NotFound(id.to_string()))?;
        Ok(Box::new(CountingStream {
            inner: MemoryFrameStream::with_chunk_size(data, self.chunk_size),
            bytes_served: Arc::clone(&self.bytes_served),
        }))
    }
}

// =============================================================================
// Distributed Cache Doubles
// =============================================================================

/// Shared in-memory stand-in for memcached.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistributedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// A distributed cache that is always down.
pub struct FailingCache;

#[async_trait]
impl DistributedCache for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<Bytes>, CacheError> {
        Err(CacheError::Connection("connection refused".to_string()))
    }

    async fn set(&self, _key: &str, _value: Bytes, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Timeout(100))
    }
}

// =============================================================================
// Helpers
// =============================================================================

pub fn frame_id() -> FrameId {
    FrameId::new("datastore-1", "imageset-1", "frame-1")
}

/// A local-only cache.
pub fn local_cache() -> TieredCache {
    TieredCache::new(Some(LocalFrameCache::new()), None)
}

/// A service over the scenario frame with a local-only cache.
pub fn scenario_service() -> FrameService<MockFrameSource> {
    let source = MockFrameSource::new().with_frame(frame_id(), scenario_codestream());
    FrameService::new(source, local_cache())
}
