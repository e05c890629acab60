use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::IoError;

/// Default chunk size used when replaying an in-memory frame.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Identity of one image frame in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameId {
    pub datastore_id: String,
    pub frame_set_id: String,
    pub frame_id: String,
}

impl FrameId {
    pub fn new(
        datastore_id: impl Into<String>,
        frame_set_id: impl Into<String>,
        frame_id: impl Into<String>,
    ) -> Self {
        Self {
            datastore_id: datastore_id.into(),
            frame_set_id: frame_set_id.into(),
            frame_id: frame_id.into(),
        }
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.datastore_id, self.frame_set_id, self.frame_id
        )
    }
}

/// A stream of frame bytes, delivered in arbitrary-sized chunks.
///
/// `Ok(None)` marks the end of the frame. Dropping the stream aborts the
/// transfer, which is how the service stops fetching once it has the
/// levels it needs.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, IoError>;
}

/// Source of compressed image frames.
///
/// Implementations must be thread-safe; one source is shared by every
/// request the service handles.
#[async_trait]
pub trait FrameSource: Send + Sync + 'static {
    /// Open a byte stream for the given frame.
    ///
    /// Returns [`IoError::NotFound`] when the frame does not exist.
    async fn open_frame(&self, id: &FrameId) -> Result<Box<dyn FrameStream>, IoError>;
}

/// Replays an in-memory buffer as a chunked stream.
///
/// Used to re-parse a whole frame found in the cache without touching the
/// backing store. Slicing `Bytes` is zero-copy.
#[derive(Debug, Clone)]
pub struct MemoryFrameStream {
    data: Bytes,
    offset: usize,
    chunk_size: usize,
}

impl MemoryFrameStream {
    pub fn new(data: Bytes) -> Self {
        Self::with_chunk_size(data, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(data: Bytes, chunk_size: usize) -> Self {
        Self {
            data,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl FrameStream for MemoryFrameStream {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, IoError> {
        if self.offset >= self.data.len() {
            return Ok(None);
        }
        let end = (self.offset + self.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.offset..end);
        self.offset = end;
        Ok(Some(chunk))
    }
}
