//! Incremental HTJ2K codestream parser.
//!
//! The parser is fed arbitrary chunks with [`Parser::write`] and indexes
//! tile-parts as soon as each one is fully buffered. It never decodes
//! entropy-coded data: after SOD it jumps straight to the end of the
//! tile-part using the SOT length.
//!
//! # State machine
//!
//! ```text
//!              write()                 need more bytes
//!   Waiting ─────────────▶ Live ─────────────────────────▶ Waiting
//!      ▲                    │  │
//!      │ resume()           │  │ EOC / cancel() / observer Break / error
//!      │                    │  ▼
//!   Suspended ◀─ suspend() ─┘  Cancelled (terminal)
//! ```
//!
//! Where to continue is kept in an explicit `ParserStage`, so every step
//! either commits a whole unit (box, segment, tile-part) or leaves the read
//! position untouched and waits for more input.
//!
//! All positions reported by the parser are relative to the first byte of
//! the codestream (SOC), so a boxed and a raw frame yield the same index.

use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace};

use super::boxes::{BoxHeader, BoxType};
use super::detect::{detect_format, FileFormat, JP2_MAGIC, SNIFF_BYTES};
use super::header::{CodestreamHeader, HeaderBuilder};
use super::marker::Marker;
use super::segment::{Segment, SegmentBody, SotSegment, MIN_TILE_PART_LENGTH};
use crate::error::CodestreamError;
use crate::io::ByteCursor;

// =============================================================================
// Public types
// =============================================================================

/// Lifecycle state of a parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Actively parsing buffered bytes
    Live,

    /// Out of buffered bytes; the next `write` resumes parsing
    Waiting,

    /// Paused by the consumer; writes are buffered but not parsed
    Suspended,

    /// Finished, cancelled or failed; no further parsing happens
    Cancelled,
}

/// One entry of the tile-part index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePart {
    /// Offset of the SOT marker relative to the start of the codestream
    pub position: usize,

    /// Psot: bytes from the SOT marker to the end of the tile-part
    pub length: usize,

    pub tile_index: u16,
    pub part_index: u8,
    pub part_count: u8,
}

impl TilePart {
    /// Offset one past the last byte of the tile-part.
    pub fn end(&self) -> usize {
        self.position + self.length
    }
}

/// Hooks invoked while parsing.
///
/// Returning [`ControlFlow::Break`] cancels the parser before another byte
/// is examined, so nothing after that point can raise an error.
pub trait ParseObserver {
    fn on_box(&mut self, _header: &BoxHeader) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    fn on_segment(&mut self, _segment: &Segment) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }

    /// Called once a tile-part is fully buffered and appended to `index`.
    ///
    /// `codestream` holds the codestream from SOC up to the end of this
    /// tile-part.
    fn on_tile_part(
        &mut self,
        _tile_part: &TilePart,
        _index: &[TilePart],
        _codestream: &[u8],
    ) -> ControlFlow<()> {
        ControlFlow::Continue(())
    }
}

impl ParseObserver for () {}

/// Everything the parser learned about a frame.
#[derive(Debug, Clone)]
pub struct ParsedFrame {
    /// Codestream bytes (SOC onwards) that were buffered
    pub codestream: Bytes,

    pub tile_parts: Vec<TilePart>,

    pub header: Option<CodestreamHeader>,

    /// True when EOC was reached
    pub complete: bool,
}

// =============================================================================
// Parser
// =============================================================================

/// Where parsing continues on the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserStage {
    Sniff,
    Box,
    Soc,
    Siz,
    MainHeader,
    TilePartHeader(TilePart),
    TilePayload(TilePart),
    /// Between tile-parts: expecting SOT or EOC
    Body,
    Done,
}

impl ParserStage {
    fn describe(&self) -> &'static str {
        match self {
            ParserStage::Sniff => "signature",
            ParserStage::Box => "box header",
            ParserStage::Soc | ParserStage::Siz | ParserStage::MainHeader => "main header",
            ParserStage::TilePartHeader(_) => "tile-part header",
            ParserStage::TilePayload(_) => "tile-part data",
            ParserStage::Body | ParserStage::Done => "codestream before EOC",
        }
    }
}

enum Step {
    NeedMore,
    Advanced,
    Finished,
}

/// Incremental parser over an append-only buffer.
#[derive(Debug)]
pub struct Parser<O: ParseObserver = ()> {
    observer: O,
    buffer: BytesMut,
    pos: usize,
    state: ParserState,
    stage: ParserStage,
    format: Option<FileFormat>,

    // Codestream bounds within the buffer
    cs_base: usize,
    cs_end: Option<usize>,

    builder: HeaderBuilder,
    header: Option<CodestreamHeader>,
    segments: Vec<Segment>,
    tile_parts: Vec<TilePart>,
    error: Option<CodestreamError>,
    reached_eoc: bool,
}

impl Default for Parser<()> {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser<()> {
    pub fn new() -> Self {
        Self::with_observer(())
    }

    /// Parse a complete buffer in one go.
    pub fn parse_all(data: &[u8]) -> Result<Self, CodestreamError> {
        let mut parser = Self::new();
        parser.write(data)?;
        parser.finish()?;
        Ok(parser)
    }
}

impl<O: ParseObserver> Parser<O> {
    pub fn with_observer(observer: O) -> Self {
        Self {
            observer,
            buffer: BytesMut::new(),
            pos: 0,
            state: ParserState::Waiting,
            stage: ParserStage::Sniff,
            format: None,
            cs_base: 0,
            cs_end: None,
            builder: HeaderBuilder::default(),
            header: None,
            segments: Vec::new(),
            tile_parts: Vec::new(),
            error: None,
            reached_eoc: false,
        }
    }

    // ===== Consumer API =====

    /// Append a chunk and parse as far as the buffered bytes allow.
    ///
    /// Returns the state after parsing. Writing to a cancelled parser fails
    /// with [`CodestreamError::WriteAfterCancel`], telling the producer to
    /// stop sending data.
    pub fn write(&mut self, chunk: &[u8]) -> Result<ParserState, CodestreamError> {
        if self.state == ParserState::Cancelled {
            return Err(CodestreamError::WriteAfterCancel);
        }
        self.buffer.extend_from_slice(chunk);
        if self.state == ParserState::Waiting {
            self.state = ParserState::Live;
            self.drive()?;
        }
        Ok(self.state)
    }

    /// Pause parsing. Later writes are buffered until [`Parser::resume`].
    pub fn suspend(&mut self) {
        if self.state != ParserState::Cancelled {
            debug!("Parser suspended");
            self.state = ParserState::Suspended;
        }
    }

    /// Continue parsing after [`Parser::suspend`].
    pub fn resume(&mut self) -> Result<ParserState, CodestreamError> {
        if matches!(self.state, ParserState::Suspended | ParserState::Waiting) {
            self.state = ParserState::Live;
            self.drive()?;
        }
        Ok(self.state)
    }

    /// Stop parsing. Buffered but unparsed bytes are ignored from now on.
    pub fn cancel(&mut self) {
        if self.state != ParserState::Cancelled {
            debug!(tile_parts = self.tile_parts.len(), "Parser cancelled");
            self.state = ParserState::Cancelled;
        }
    }

    /// Signal the end of input.
    ///
    /// A parser that has not reached a terminal state by now was fed a
    /// truncated frame.
    pub fn finish(&mut self) -> Result<(), CodestreamError> {
        if self.state == ParserState::Suspended {
            self.resume()?;
        }
        if self.state == ParserState::Cancelled {
            return Ok(());
        }

        let err = self.truncation_error();
        self.fail(err.clone());
        Err(err)
    }

    // ===== Inspection =====

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// True once the parser reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.state == ParserState::Cancelled
    }

    /// True when EOC was parsed.
    pub fn reached_eoc(&self) -> bool {
        self.reached_eoc
    }

    pub fn format(&self) -> Option<FileFormat> {
        self.format
    }

    pub fn header(&self) -> Option<&CodestreamHeader> {
        self.header.as_ref()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn tile_parts(&self) -> &[TilePart] {
        &self.tile_parts
    }

    /// The error that stopped the parser, if any.
    pub fn error(&self) -> Option<&CodestreamError> {
        self.error.as_ref()
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Codestream bytes buffered so far.
    pub fn codestream(&self) -> &[u8] {
        let (start, end) = self.codestream_bounds();
        &self.buffer[start..end]
    }

    /// Consume the parser, keeping the codestream and index.
    pub fn into_parsed(self) -> (ParsedFrame, O) {
        let (start, end) = self.codestream_bounds();
        let mut buffer = self.buffer;
        buffer.truncate(end);
        let codestream = buffer.split_off(start).freeze();
        (
            ParsedFrame {
                codestream,
                tile_parts: self.tile_parts,
                header: self.header,
                complete: self.reached_eoc,
            },
            self.observer,
        )
    }

    // ===== Driver =====

    fn codestream_bounds(&self) -> (usize, usize) {
        if self.format.is_none() || self.stage == ParserStage::Box {
            return (0, 0);
        }
        let len = self.buffer.len();
        let end = self.cs_end.map_or(len, |e| e.min(len));
        (self.cs_base.min(end), end)
    }

    fn drive(&mut self) -> Result<(), CodestreamError> {
        while self.state == ParserState::Live {
            match self.step() {
                Ok(Step::Advanced) => {}
                Ok(Step::NeedMore) => self.state = ParserState::Waiting,
                Ok(Step::Finished) => {
                    debug!(
                        tile_parts = self.tile_parts.len(),
                        bytes = self.pos - self.cs_base,
                        "Codestream complete"
                    );
                    self.state = ParserState::Cancelled;
                }
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn fail(&mut self, err: CodestreamError) {
        debug!(error = %err, "Parser failed");
        self.error = Some(err);
        self.state = ParserState::Cancelled;
    }

    fn apply(&mut self, flow: ControlFlow<()>) {
        if flow.is_break() {
            self.cancel();
        }
    }

    fn step(&mut self) -> Result<Step, CodestreamError> {
        let stage = self.stage;
        match stage {
            ParserStage::Sniff => self.step_sniff(),
            ParserStage::Box => self.step_box(),
            ParserStage::TilePayload(tile_part) => self.step_tile_payload(tile_part),
            ParserStage::Done => Ok(Step::Finished),
            _ => self.step_marker(),
        }
    }

    // ===== Container =====

    fn step_sniff(&mut self) -> Result<Step, CodestreamError> {
        let prefix = &self.buffer[..self.buffer.len().min(SNIFF_BYTES)];
        let Some(format) = detect_format(prefix)? else {
            return Ok(Step::NeedMore);
        };

        debug!(format = format.name(), "Detected frame format");
        self.format = Some(format);
        self.stage = match format {
            FileFormat::RawCodestream => {
                self.cs_base = 0;
                ParserStage::Soc
            }
            FileFormat::BoxedCodestream => {
                // Bare magic without the signature box header
                if self.buffer.starts_with(&JP2_MAGIC) {
                    self.pos = JP2_MAGIC.len();
                }
                ParserStage::Box
            }
        };
        Ok(Step::Advanced)
    }

    fn step_box(&mut self) -> Result<Step, CodestreamError> {
        let mut cursor = ByteCursor::at(&self.buffer, self.pos);
        let Some(header) = BoxHeader::read(&mut cursor)? else {
            return Ok(Step::NeedMore);
        };

        if header.box_type == BoxType::CODESTREAM {
            debug!(length = ?header.length, "Found codestream box");
            self.cs_base = header.payload_start();
            self.cs_end = header.end();
            self.pos = self.cs_base;
            self.stage = ParserStage::Soc;
        } else {
            let Some(end) = header.end() else {
                return Err(CodestreamError::MissingCodestreamBox);
            };
            if end > self.buffer.len() {
                return Ok(Step::NeedMore);
            }
            debug!(
                box_type = %header.box_type,
                description = header.box_type.description().unwrap_or("unknown"),
                length = end - header.position,
                "Skipping box"
            );
            self.pos = end;
        }

        let flow = self.observer.on_box(&header);
        self.apply(flow);
        Ok(Step::Advanced)
    }

    // ===== Codestream =====

    /// Read the marker segment at the current position without consuming it.
    fn read_segment(&self) -> Result<Option<Segment>, CodestreamError> {
        let position = self.pos - self.cs_base;
        let limit = self.cs_end.unwrap_or(usize::MAX);
        let out_of_bounds = |what: &'static str, end: usize| CodestreamError::OutOfBounds {
            what,
            position,
            end: end - self.cs_base,
            limit: limit - self.cs_base,
        };

        if self.pos + 2 > limit {
            return Err(out_of_bounds("marker", self.pos + 2));
        }

        let mut c = ByteCursor::at(&self.buffer, self.pos);
        let Ok(prefix) = c.read_u8() else {
            return Ok(None);
        };
        if prefix != Marker::PREFIX {
            return Err(CodestreamError::InvalidMarkerPrefix {
                position,
                found: prefix,
            });
        }
        let Ok(code) = c.read_u8() else {
            return Ok(None);
        };
        let marker =
            Marker::from_code(code).ok_or(CodestreamError::UnknownMarker { position, code })?;

        if !marker.has_length() {
            return Ok(Some(Segment::delimiter(marker, position)));
        }

        let Ok(length) = c.read_u16() else {
            return Ok(None);
        };
        let end = self.pos + 2 + length as usize;
        if end > limit {
            return Err(out_of_bounds(marker.name(), end));
        }
        let Ok(payload) = c.read_bytes((length as usize).saturating_sub(2)) else {
            return Ok(None);
        };

        Segment::parse(marker, position, length, payload).map(Some)
    }

    fn step_marker(&mut self) -> Result<Step, CodestreamError> {
        let Some(segment) = self.read_segment()? else {
            return Ok(Step::NeedMore);
        };
        trace!("{}", segment);

        let unexpected = |context: &'static str| CodestreamError::UnexpectedMarker {
            position: segment.position,
            marker: segment.marker.name(),
            context,
        };

        let mut step = Step::Advanced;
        let stage = self.stage;
        match stage {
            ParserStage::Soc => {
                if segment.marker != Marker::Soc {
                    return Err(unexpected("codestream must start with SOC"));
                }
                self.stage = ParserStage::Siz;
            }
            ParserStage::Siz => {
                if segment.marker != Marker::Siz {
                    return Err(unexpected("SIZ must follow SOC"));
                }
                self.builder.record(&segment)?;
                self.stage = ParserStage::MainHeader;
            }
            ParserStage::MainHeader => match segment.marker {
                Marker::Sot => {
                    let header = self.builder.finish(segment.position)?;
                    debug!(
                        width = header.width(),
                        height = header.height(),
                        components = header.component_count(),
                        levels = header.decomposition_levels(),
                        header_bytes = header.length,
                        "Parsed main header"
                    );
                    self.header = Some(header);
                    self.begin_tile_part(&segment)?;
                }
                Marker::Eoc => return Err(CodestreamError::NoTileParts),
                Marker::Soc | Marker::Sod | Marker::Sop | Marker::Eph => {
                    return Err(unexpected("in main header"))
                }
                _ => self.builder.record(&segment)?,
            },
            ParserStage::TilePartHeader(tile_part) => {
                if segment.end() > tile_part.end() {
                    return Err(CodestreamError::OutOfBounds {
                        what: "tile-part header",
                        position: segment.position,
                        end: segment.end(),
                        limit: tile_part.end(),
                    });
                }
                match segment.marker {
                    Marker::Sod => self.stage = ParserStage::TilePayload(tile_part),
                    Marker::Cod
                    | Marker::Coc
                    | Marker::Qcd
                    | Marker::Qcc
                    | Marker::Rgn
                    | Marker::Poc
                    | Marker::Ppt
                    | Marker::Plt
                    | Marker::Com => {}
                    _ => return Err(unexpected("in tile-part header")),
                }
            }
            ParserStage::Body => match segment.marker {
                Marker::Sot => self.begin_tile_part(&segment)?,
                Marker::Eoc => {
                    // Bytes past EOC are not part of the codestream
                    self.cs_end = Some(self.cs_base + segment.position + 2);
                    self.reached_eoc = true;
                    self.stage = ParserStage::Done;
                    step = Step::Finished;
                }
                _ => return Err(unexpected("expected SOT or EOC")),
            },
            ParserStage::Sniff
            | ParserStage::Box
            | ParserStage::TilePayload(_)
            | ParserStage::Done => unreachable!("not a marker stage"),
        }

        self.pos += segment.total_size();
        let flow = self.observer.on_segment(&segment);
        self.segments.push(segment);
        self.apply(flow);
        Ok(step)
    }

    fn begin_tile_part(&mut self, segment: &Segment) -> Result<(), CodestreamError> {
        let SegmentBody::Sot(sot) = &segment.body else {
            return Err(CodestreamError::UnexpectedMarker {
                position: segment.position,
                marker: segment.marker.name(),
                context: "expected SOT",
            });
        };
        self.validate_sot(sot)?;

        let tile_part = TilePart {
            position: segment.position,
            length: sot.tile_part_length as usize,
            tile_index: sot.tile_index,
            part_index: sot.tile_part_index,
            part_count: sot.tile_part_count,
        };

        if let Some(cs_end) = self.cs_end {
            let limit = cs_end - self.cs_base;
            if tile_part.end() > limit {
                return Err(CodestreamError::OutOfBounds {
                    what: "tile-part",
                    position: tile_part.position,
                    end: tile_part.end(),
                    limit,
                });
            }
        }

        self.stage = ParserStage::TilePartHeader(tile_part);
        Ok(())
    }

    fn validate_sot(&self, sot: &SotSegment) -> Result<(), CodestreamError> {
        let invalid = |reason: String| CodestreamError::InvalidSegment {
            marker: Marker::Sot.name(),
            reason,
        };

        if sot.tile_part_length == 0 {
            return Err(CodestreamError::UnboundedTilePart {
                tile_index: sot.tile_index,
            });
        }
        if sot.tile_part_length < MIN_TILE_PART_LENGTH {
            return Err(invalid(format!(
                "tile-part length {} is below the minimum of {}",
                sot.tile_part_length, MIN_TILE_PART_LENGTH
            )));
        }
        if let Some(header) = &self.header {
            if sot.tile_index as u64 >= header.tile_count() {
                return Err(invalid(format!(
                    "tile index {} out of range (image has {} tiles)",
                    sot.tile_index,
                    header.tile_count()
                )));
            }
        }
        if sot.tile_part_count != 0 && sot.tile_part_index >= sot.tile_part_count {
            return Err(invalid(format!(
                "tile-part index {} not below tile-part count {}",
                sot.tile_part_index, sot.tile_part_count
            )));
        }
        Ok(())
    }

    fn step_tile_payload(&mut self, tile_part: TilePart) -> Result<Step, CodestreamError> {
        let end = self.cs_base + tile_part.end();
        if self.buffer.len() < end {
            return Ok(Step::NeedMore);
        }

        self.pos = end;
        self.tile_parts.push(tile_part);
        self.stage = ParserStage::Body;
        trace!(
            index = self.tile_parts.len() - 1,
            position = tile_part.position,
            length = tile_part.length,
            "Indexed tile-part"
        );

        let flow = self.observer.on_tile_part(
            &tile_part,
            &self.tile_parts,
            &self.buffer[self.cs_base..end],
        );
        self.apply(flow);
        Ok(Step::Advanced)
    }

    fn truncation_error(&self) -> CodestreamError {
        if self.stage == ParserStage::Box {
            let mut cursor = ByteCursor::at(&self.buffer, self.pos);
            return match BoxHeader::read(&mut cursor) {
                Ok(Some(header)) => CodestreamError::BoxOutOfBounds {
                    box_type: header.box_type.to_string(),
                    end: header.end().unwrap_or(self.buffer.len()),
                    available: self.buffer.len(),
                },
                Ok(None) if self.pos >= self.buffer.len() => CodestreamError::MissingCodestreamBox,
                Ok(None) => CodestreamError::Truncated(self.stage.describe()),
                Err(e) => e,
            };
        }
        CodestreamError::Truncated(self.stage.describe())
    }
}
