//! Resolution-range extraction.
//!
//! A level window `[start, end]` maps onto the tile-part index as follows:
//!
//! ```text
//!   codestream: | main header | tp 0 | tp 1 | tp 2 | ... | EOC |
//!   [0, 0]      |<---------------->|
//!   [1, 2]                         |<----------->|
//!   [2, all]                              |<---------------->|
//! ```
//!
//! Level 0 always carries the main header so it can be decoded on its own.
//! Higher levels are the raw tile-part bytes, which a client appends to what
//! it already has.

use std::fmt;
use std::ops::{ControlFlow, Range};

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::FrameError;
use crate::format::{ParseObserver, TilePart};

// =============================================================================
// LevelWindow
// =============================================================================

/// Inclusive range of resolution levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelWindow {
    pub start: u32,

    /// Last level, or `None` for "through the last level"
    pub end: Option<u32>,
}

impl LevelWindow {
    pub fn new(start: u32, end: Option<u32>) -> Self {
        Self { start, end }
    }

    /// A single level.
    pub fn single(level: u32) -> Self {
        Self {
            start: level,
            end: Some(level),
        }
    }

    /// Every level, main header included.
    pub fn all() -> Self {
        Self {
            start: 0,
            end: None,
        }
    }

    pub fn is_all(&self) -> bool {
        self.start == 0 && self.end.is_none()
    }
}

impl Default for LevelWindow {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for LevelWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.end {
            Some(end) => write!(f, "{}-{}", self.start, end),
            None => write!(f, "{}-all", self.start),
        }
    }
}

// =============================================================================
// Offsets
// =============================================================================

/// First byte of level `start`.
///
/// Level 0 starts at the beginning of the codestream. A level that has not
/// been indexed starts at the end of the codestream.
pub fn start_offset(index: &[TilePart], start: u32, codestream_len: usize) -> usize {
    let start = start as usize;
    if start == 0 {
        0
    } else if start >= index.len() {
        codestream_len
    } else {
        index[start].position.min(codestream_len)
    }
}

/// One past the last byte of level `end`.
pub fn end_offset(index: &[TilePart], end: Option<u32>, codestream_len: usize) -> usize {
    match end.map(|e| e as usize) {
        Some(end) if end < index.len() => index[end].end().min(codestream_len),
        _ => codestream_len,
    }
}

/// Byte range for a window. Empty when the window selects nothing.
pub fn byte_range(index: &[TilePart], window: LevelWindow, codestream_len: usize) -> Range<usize> {
    let start = start_offset(index, window.start, codestream_len);
    let end = end_offset(index, window.end, codestream_len);
    if start >= end {
        start..start
    } else {
        start..end
    }
}

/// Slice the bytes for a window out of the codestream (zero-copy).
pub fn extract_range(codestream: &Bytes, index: &[TilePart], window: LevelWindow) -> Bytes {
    let range = byte_range(index, window, codestream.len());
    if range.is_empty() {
        return Bytes::new();
    }
    codestream.slice(range)
}

/// One slice per indexed level; level `i` is the window `[i, i]`.
pub fn extract_levels(codestream: &Bytes, index: &[TilePart]) -> Vec<Bytes> {
    (0..index.len() as u32)
        .map(|level| extract_range(codestream, index, LevelWindow::single(level)))
        .collect()
}

// =============================================================================
// LevelCollector
// =============================================================================

/// Parser observer used by the frame service.
///
/// Stops the parser as soon as the last requested level is indexed, and can
/// hand level 0 to a waiting request the moment it is available.
#[derive(Debug)]
pub struct LevelCollector {
    stop_after: Option<u32>,
    first_level: Option<oneshot::Sender<Result<Bytes, FrameError>>>,
}

impl LevelCollector {
    /// Collect up to the window's last level.
    pub fn new(window: LevelWindow) -> Self {
        Self {
            stop_after: window.end,
            first_level: None,
        }
    }

    /// Collect every level.
    pub fn all_levels() -> Self {
        Self {
            stop_after: None,
            first_level: None,
        }
    }

    /// Send level 0 through `sender` as soon as it is indexed.
    pub fn with_first_level(mut self, sender: oneshot::Sender<Result<Bytes, FrameError>>) -> Self {
        self.first_level = Some(sender);
        self
    }

    /// Take back the sender if level 0 was never produced, so the caller
    /// can report the failure instead.
    pub fn take_first_level_sender(
        &mut self,
    ) -> Option<oneshot::Sender<Result<Bytes, FrameError>>> {
        self.first_level.take()
    }
}

impl ParseObserver for LevelCollector {
    fn on_tile_part(
        &mut self,
        tile_part: &TilePart,
        index: &[TilePart],
        codestream: &[u8],
    ) -> ControlFlow<()> {
        if index.len() == 1 {
            if let Some(sender) = self.first_level.take() {
                let level = Bytes::copy_from_slice(&codestream[..tile_part.end()]);
                // The requester may have gone away; parsing continues for the cache
                let _ = sender.send(Ok(level));
            }
        }

        match self.stop_after {
            Some(end) if index.len() > end as usize => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    }
}
