//! Frame service: the proxy controller.
//!
//! The FrameService is the entry point for level-window requests. It
//! decides, per request, whether to answer from cache, replay a cached whole
//! frame through the parser, or stream the frame from the backing store.
//!
//! # Request flow
//!
//! ```text
//!                        ┌──────────────────────┐
//!   request ───────────> │ exact key in cache?  │──yes──> reply
//!                        └──────────┬───────────┘
//!                                   │ no
//!          ┌────────────────────────┼──────────────────────────┐
//!          ▼                        ▼                          ▼
//!     [0, 0]                   [0, all]                   any other window
//!     fetch + background       whole frame cached?        whole frame cached?
//!     parse of every level,    else fetch + parse,        replay it, else fetch;
//!     reply once level 0 is    cache every level,         parse until the last
//!     indexed, cache every     reply with the frame       level, cache the
//!     level and the frame                                 exact key, reply
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::cache::FrameCacheKey;
use super::extract::{extract_levels, extract_range, LevelCollector, LevelWindow};
use super::tiered::TieredCache;
use crate::error::FrameError;
use crate::format::{ParseObserver, ParsedFrame, Parser};
use crate::io::{FrameId, FrameSource, FrameStream, MemoryFrameStream, DEFAULT_CHUNK_SIZE};

// =============================================================================
// Frame Request
// =============================================================================

/// A request for a window of resolution levels of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRequest {
    pub frame: FrameId,
    pub window: LevelWindow,
}

impl FrameRequest {
    pub fn new(frame: FrameId, window: LevelWindow) -> Self {
        Self { frame, window }
    }

    /// Build a request from optional parts, as they arrive from a client.
    ///
    /// A missing start level means 0; a missing end level means "through the
    /// last level".
    pub fn from_parts(
        datastore_id: Option<String>,
        frame_set_id: Option<String>,
        frame_id: Option<String>,
        start_level: Option<u32>,
        end_level: Option<u32>,
    ) -> Result<Self, FrameError> {
        let non_empty = |id: Option<String>| id.filter(|s| !s.trim().is_empty());
        match (
            non_empty(datastore_id),
            non_empty(frame_set_id),
            non_empty(frame_id),
        ) {
            (Some(datastore_id), Some(frame_set_id), Some(frame_id)) => Ok(Self::new(
                FrameId::new(datastore_id, frame_set_id, frame_id),
                LevelWindow::new(start_level.unwrap_or(0), end_level),
            )),
            _ => Err(FrameError::InvalidRequest(
                "Missing argument. Required: datastore ID, imageset ID, image frame ID."
                    .to_string(),
            )),
        }
    }
}

// =============================================================================
// Frame Response
// =============================================================================

#[derive(Debug, Clone)]
pub struct FrameResponse {
    pub data: Bytes,

    /// True when the backing store was not contacted
    pub cache_hit: bool,
}

// =============================================================================
// Frame Service
// =============================================================================

/// Serves level windows of frames from cache or from a [`FrameSource`].
///
/// # Type Parameters
///
/// * `F` - The frame source (S3 in production, a mock in tests)
pub struct FrameService<F: FrameSource> {
    source: Arc<F>,
    cache: Arc<TieredCache>,

    /// Chunk size used when replaying a cached whole frame
    chunk_size: usize,

    /// Background parses started by first-level requests
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl<F: FrameSource> FrameService<F> {
    pub fn new(source: F, cache: TieredCache) -> Self {
        Self {
            source: Arc::new(source),
            cache: Arc::new(cache),
            chunk_size: DEFAULT_CHUNK_SIZE,
            background: Mutex::new(Vec::new()),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn source(&self) -> &F {
        &self.source
    }

    pub fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Serve a window of levels.
    pub async fn request_range(&self, request: &FrameRequest) -> Result<FrameResponse, FrameError> {
        let started = Instant::now();
        let frame = &request.frame;
        let window = request.window;
        info!(frame = %frame, levels = %window, "Requesting frame");

        let key = FrameCacheKey::window(frame.clone(), window);
        if let Some(data) = self.cache.get(&key).await {
            info!(frame = %frame, size = data.len(), "Returning frame from cache");
            return Ok(FrameResponse {
                data,
                cache_hit: true,
            });
        }

        let response = match (window.start, window.end) {
            (0, Some(0)) => self.serve_first_level(frame).await?,
            (0, None) => self.serve_whole_frame(frame, key).await?,
            _ => self.serve_window(frame, window, key).await?,
        };

        debug!(
            frame = %frame,
            levels = %window,
            size = response.data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Served levels"
        );
        info!(frame = %frame, size = response.data.len(), "Returning frame");
        Ok(response)
    }

    /// Wait until every background parse has finished caching.
    pub async fn wait_for_background(&self) {
        let handles = std::mem::take(
            &mut *self
                .background
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background parse task failed");
            }
        }
    }

    /// Number of background parses still running.
    pub fn background_tasks(&self) -> usize {
        let mut tasks = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|handle| !handle.is_finished());
        tasks.len()
    }

    // ===== Strategies =====

    /// Reply with level 0 as soon as it is indexed, and keep parsing in the
    /// background to seed the cache with every level and the whole frame.
    async fn serve_first_level(&self, frame: &FrameId) -> Result<FrameResponse, FrameError> {
        let mut stream = self.source.open_frame(frame).await?;

        let (tx, rx) = oneshot::channel();
        let mut parser = Parser::with_observer(LevelCollector::all_levels().with_first_level(tx));
        let cache = self.cache.clone();
        let frame_id = frame.clone();

        let handle = tokio::spawn(async move {
            let outcome = run_parser(&mut parser, stream.as_mut()).await;
            drop(stream);

            match outcome {
                Ok(()) => {
                    let (parsed, mut collector) = parser.into_parsed();
                    if let Some(tx) = collector.take_first_level_sender() {
                        let level = extract_range(
                            &parsed.codestream,
                            &parsed.tile_parts,
                            LevelWindow::single(0),
                        );
                        let _ = tx.send(Ok(level));
                    }
                    cache_frame(&cache, &frame_id, &parsed).await;
                }
                Err(e) => match parser.observer_mut().take_first_level_sender() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => {
                        warn!(
                            frame = %frame_id,
                            error = %e,
                            "Background parse failed after first level"
                        );
                    }
                },
            }
        });
        self.track(handle);

        let data = rx.await.map_err(|_| {
            FrameError::Background("parser stopped before producing the first level".to_string())
        })??;
        Ok(FrameResponse {
            data,
            cache_hit: false,
        })
    }

    /// Reply with the whole codestream, caching every level on the way.
    async fn serve_whole_frame(
        &self,
        frame: &FrameId,
        key: FrameCacheKey,
    ) -> Result<FrameResponse, FrameError> {
        if let Some(data) = self.cache.get(&FrameCacheKey::whole(frame.clone())).await {
            debug!(frame = %frame, size = data.len(), "Whole frame found in cache");
            return Ok(FrameResponse {
                data,
                cache_hit: true,
            });
        }

        let mut stream = self.source.open_frame(frame).await?;
        let mut parser = Parser::with_observer(LevelCollector::all_levels());
        run_parser(&mut parser, stream.as_mut()).await?;
        drop(stream);

        let (parsed, _) = parser.into_parsed();
        cache_frame(&self.cache, frame, &parsed).await;
        self.cache.put(key, parsed.codestream.clone()).await;

        Ok(FrameResponse {
            data: parsed.codestream,
            cache_hit: false,
        })
    }

    /// Parse only as far as the window's last level, from the cached whole
    /// frame when there is one.
    async fn serve_window(
        &self,
        frame: &FrameId,
        window: LevelWindow,
        key: FrameCacheKey,
    ) -> Result<FrameResponse, FrameError> {
        let cached = self.cache.get(&FrameCacheKey::whole(frame.clone())).await;
        let cache_hit = cached.is_some();

        let mut stream: Box<dyn FrameStream> = match cached {
            Some(data) => {
                debug!(frame = %frame, size = data.len(), "Replaying whole frame from cache");
                Box::new(MemoryFrameStream::with_chunk_size(data, self.chunk_size))
            }
            None => self.source.open_frame(frame).await?,
        };

        let mut parser = Parser::with_observer(LevelCollector::new(window));
        run_parser(&mut parser, stream.as_mut()).await?;
        drop(stream);

        let (parsed, _) = parser.into_parsed();
        let data = extract_range(&parsed.codestream, &parsed.tile_parts, window);
        self.cache.put(key, data.clone()).await;

        Ok(FrameResponse { data, cache_hit })
    }

    fn track(&self, handle: JoinHandle<()>) {
        let mut tasks = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|handle| !handle.is_finished());
        tasks.push(handle);
    }
}

/// Feed a frame stream into a parser until it completes or the stream ends.
///
/// Dropping out as soon as the parser completes leaves the rest of the
/// stream unread.
pub async fn run_parser<O: ParseObserver>(
    parser: &mut Parser<O>,
    stream: &mut dyn FrameStream,
) -> Result<(), FrameError> {
    while !parser.is_complete() {
        match stream.next_chunk().await? {
            Some(chunk) => {
                parser.write(&chunk)?;
            }
            None => {
                parser.finish()?;
                break;
            }
        }
    }
    Ok(())
}

/// Cache every level `[i, i]` and the whole codestream.
async fn cache_frame(cache: &TieredCache, frame: &FrameId, parsed: &ParsedFrame) {
    let levels = extract_levels(&parsed.codestream, &parsed.tile_parts);
    debug!(frame = %frame, levels = levels.len(), "Caching frame levels");
    for (level, data) in levels.into_iter().enumerate() {
        let key = FrameCacheKey::window(frame.clone(), LevelWindow::single(level as u32));
        cache.put(key, data).await;
    }
    cache
        .put(FrameCacheKey::whole(frame.clone()), parsed.codestream.clone())
        .await;
}
