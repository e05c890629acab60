//! HTJ2K container and codestream parsing.
//!
//! This module turns a stream of frame bytes into an index of tile-parts
//! without decoding any pixels.
//!
//! # Layout
//!
//! ```text
//! ┌──────────────────────── JP2 container (optional) ───────────────────────┐
//! │ jP  │ ftyp │ jp2h ... │ jp2c ┌──────────── codestream ────────────────┐ │
//! │     │      │          │      │ SOC SIZ [CAP] COD QCD ... │ SOT..SOD.. │ │
//! │     │      │          │      │        main header        │ tile-parts │ │
//! │     │      │          │      └────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - [`detect`] - container sniffing
//! - [`boxes`] - JP2 box headers
//! - [`marker`] and [`segment`] - marker codes and segment validation
//! - [`header`] - main header summary
//! - [`parser`] - the incremental parser

pub mod boxes;
pub mod detect;
pub mod header;
pub mod marker;
pub mod parser;
pub mod segment;

pub use boxes::{BoxHeader, BoxType};
pub use detect::{detect_format, is_codestream_header, is_jp2_header, FileFormat};
pub use header::CodestreamHeader;
pub use marker::Marker;
pub use parser::{ParseObserver, ParsedFrame, Parser, ParserState, TilePart};
pub use segment::{
    CapSegment, CodSegment, ComSegment, ComponentInfo, ProgressionOrder, QcdSegment, Segment,
    SegmentBody, SizSegment, SotSegment,
};
