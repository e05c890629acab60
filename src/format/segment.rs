//! Marker segment model and payload validation.
//!
//! A segment is parsed once its whole payload is buffered. Structural rules
//! that depend only on the segment itself live here; rules that depend on
//! earlier segments (ordering, tile counts) are enforced by the parser.

use std::fmt;

use bytes::Bytes;

use super::marker::Marker;
use crate::error::CodestreamError;
use crate::io::ByteCursor;

/// Maximum number of image components.
pub const MAX_COMPONENTS: u16 = 1 << 14;

/// Maximum number of wavelet decomposition levels.
pub const MAX_DECOMPOSITION_LEVELS: u8 = 32;

/// Fixed SOT segment length (Lsot).
pub const SOT_LENGTH: u16 = 10;

/// Bytes from the SOT marker to the first byte after SOD in a minimal
/// tile-part (SOT marker + segment + SOD marker).
pub const MIN_TILE_PART_LENGTH: u32 = 14;

fn invalid(marker: Marker, reason: impl Into<String>) -> CodestreamError {
    CodestreamError::InvalidSegment {
        marker: marker.name(),
        reason: reason.into(),
    }
}

// =============================================================================
// Segment
// =============================================================================

/// A marker segment found in the codestream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub marker: Marker,

    /// Offset of the 0xFF byte relative to the start of the codestream
    pub position: usize,

    /// Declared Lxx value (0 for delimiting markers)
    pub length: u16,

    pub body: SegmentBody,
}

/// Decoded payload of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentBody {
    Siz(SizSegment),
    Cap(CapSegment),
    Cod(CodSegment),
    Qcd(QcdSegment),
    Com(ComSegment),
    Sot(SotSegment),

    /// Segment kept as opaque payload bytes
    Raw(Bytes),

    /// Marker without a length field (SOC, SOD, EOC)
    Delimiter,
}

impl Segment {
    /// Build a segment for a marker without a length field.
    pub fn delimiter(marker: Marker, position: usize) -> Self {
        Self {
            marker,
            position,
            length: 0,
            body: SegmentBody::Delimiter,
        }
    }

    /// Parse a segment whose payload (the `length - 2` bytes after the
    /// length field) is fully available.
    pub fn parse(
        marker: Marker,
        position: usize,
        length: u16,
        payload: &[u8],
    ) -> Result<Self, CodestreamError> {
        if length < 2 {
            return Err(invalid(marker, format!("length {} is too small", length)));
        }
        let body = match marker {
            Marker::Siz => SegmentBody::Siz(SizSegment::parse(length, payload)?),
            Marker::Cap => SegmentBody::Cap(CapSegment::parse(length, payload)?),
            Marker::Cod => SegmentBody::Cod(CodSegment::parse(length, payload)?),
            Marker::Qcd => SegmentBody::Qcd(QcdSegment::parse(length, payload)?),
            Marker::Com => SegmentBody::Com(ComSegment::parse(length, payload)?),
            Marker::Sot => SegmentBody::Sot(SotSegment::parse(length, payload)?),
            _ => SegmentBody::Raw(Bytes::copy_from_slice(payload)),
        };
        Ok(Self {
            marker,
            position,
            length,
            body,
        })
    }

    /// Number of bytes the segment occupies in the codestream, marker included.
    pub fn total_size(&self) -> usize {
        if self.marker.has_length() {
            2 + self.length as usize
        } else {
            2
        }
    }

    pub fn end(&self) -> usize {
        self.position + self.total_size()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Segment [Marker: {}, Position: {} (0x{:x}), Length: {}]",
            self.marker.name(),
            self.position,
            self.position,
            self.total_size()
        )?;
        match &self.body {
            SegmentBody::Siz(siz) => write!(
                f,
                " [Width: {}, Height: {}, Bit depth: {}, Signed: {}, Components: {}]",
                siz.component_width(0).unwrap_or(0),
                siz.component_height(0).unwrap_or(0),
                siz.bit_depth(0).unwrap_or(0),
                siz.is_signed(0).unwrap_or(false),
                siz.component_count()
            ),
            SegmentBody::Cap(cap) => write!(f, " [Capabilities: {:b}]", cap.pcap),
            SegmentBody::Cod(cod) => write!(
                f,
                " [Progression order: {}, Decomposition levels: {}, Reversible: {}]",
                cod.progression_order.name(),
                cod.decomposition_levels,
                cod.is_reversible()
            ),
            SegmentBody::Qcd(qcd) => write!(
                f,
                " [Decomposition levels: {}, Quantization style: 0x{:x}]",
                qcd.decomposition_levels(),
                qcd.style
            ),
            SegmentBody::Com(com) => write!(
                f,
                " [Registration: {}, Comment: {}]",
                com.registration,
                com.text.as_deref().unwrap_or("")
            ),
            SegmentBody::Sot(sot) => write!(
                f,
                " [Tile index: {}, Tile part length: {}, Tile part index: {}, Tile part count: {}]",
                sot.tile_index, sot.tile_part_length, sot.tile_part_index, sot.tile_part_count
            ),
            SegmentBody::Raw(_) | SegmentBody::Delimiter => Ok(()),
        }
    }
}

// =============================================================================
// SIZ
// =============================================================================

/// Per-component precision and sub-sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComponentInfo {
    /// Raw Ssiz byte: bit 7 is signedness, bits 0-6 are depth minus one
    pub precision: u8,
    pub subsampling_x: u8,
    pub subsampling_y: u8,
}

/// Image and tile size (SIZ).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizSegment {
    pub profile: u16,
    pub grid_width: u32,
    pub grid_height: u32,
    pub image_offset_x: u32,
    pub image_offset_y: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_offset_x: u32,
    pub tile_offset_y: u32,
    pub components: Vec<ComponentInfo>,
}

impl SizSegment {
    /// Rsiz bit that marks an HTJ2K codestream.
    pub const HTJ2K_PROFILE_BIT: u16 = 0x4000;

    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        let mut c = ByteCursor::new(payload);

        let profile = c.read_u16()?;
        if profile & Self::HTJ2K_PROFILE_BIT == 0 {
            return Err(invalid(
                Marker::Siz,
                "profile bit 14 not set (not an HTJ2K codestream)",
            ));
        }

        let grid_width = c.read_u32()?;
        let grid_height = c.read_u32()?;
        if grid_width == 0 || grid_height == 0 {
            return Err(invalid(
                Marker::Siz,
                "reference grid width and height must be above zero",
            ));
        }

        let image_offset_x = c.read_u32()?;
        let image_offset_y = c.read_u32()?;
        if image_offset_x >= grid_width || image_offset_y >= grid_height {
            return Err(invalid(
                Marker::Siz,
                "image offset must lie inside the reference grid",
            ));
        }

        let tile_width = c.read_u32()?;
        let tile_height = c.read_u32()?;
        if tile_width == 0 || tile_height == 0 {
            return Err(invalid(
                Marker::Siz,
                "reference tile width and height must be above zero",
            ));
        }

        let tile_offset_x = c.read_u32()?;
        let tile_offset_y = c.read_u32()?;
        if tile_offset_x == u32::MAX || tile_offset_y == u32::MAX {
            return Err(invalid(
                Marker::Siz,
                "tile offset must be below the maximal value for the tile size",
            ));
        }

        let count = c.read_u16()?;
        if count == 0 || count > MAX_COMPONENTS {
            return Err(invalid(
                Marker::Siz,
                format!("component count out of valid range [{}]", count),
            ));
        }
        let expected = 38 + 3 * count as u32;
        if length as u32 != expected {
            return Err(invalid(
                Marker::Siz,
                format!(
                    "length {} does not match component count {} (expected {})",
                    length, count, expected
                ),
            ));
        }

        let mut components = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let component = ComponentInfo {
                precision: c.read_u8()?,
                subsampling_x: c.read_u8()?,
                subsampling_y: c.read_u8()?,
            };
            if component.subsampling_x == 0 || component.subsampling_y == 0 {
                return Err(invalid(Marker::Siz, "sub-sampling must be strictly positive"));
            }
            components.push(component);
        }

        Ok(Self {
            profile,
            grid_width,
            grid_height,
            image_offset_x,
            image_offset_y,
            tile_width,
            tile_height,
            tile_offset_x,
            tile_offset_y,
            components,
        })
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }

    pub fn bit_depth(&self, component: usize) -> Option<u8> {
        self.components
            .get(component)
            .map(|c| (c.precision & 0x7F) + 1)
    }

    pub fn is_signed(&self, component: usize) -> Option<bool> {
        self.components
            .get(component)
            .map(|c| c.precision & 0x80 != 0)
    }

    pub fn component_width(&self, component: usize) -> Option<u32> {
        self.components.get(component).map(|c| {
            let ds = c.subsampling_x as u32;
            self.grid_width.div_ceil(ds) - self.image_offset_x.div_ceil(ds)
        })
    }

    pub fn component_height(&self, component: usize) -> Option<u32> {
        self.components.get(component).map(|c| {
            let ds = c.subsampling_y as u32;
            self.grid_height.div_ceil(ds) - self.image_offset_y.div_ceil(ds)
        })
    }

    /// Number of tiles across and down.
    pub fn tile_grid(&self) -> (u32, u32) {
        (
            self.grid_width
                .saturating_sub(self.tile_offset_x)
                .div_ceil(self.tile_width),
            self.grid_height
                .saturating_sub(self.tile_offset_y)
                .div_ceil(self.tile_height),
        )
    }

    pub fn tile_count(&self) -> u64 {
        let (x, y) = self.tile_grid();
        x as u64 * y as u64
    }
}

// =============================================================================
// CAP
// =============================================================================

/// Extended capabilities (CAP).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapSegment {
    pub pcap: u32,
    pub ccap: Vec<u16>,
}

impl CapSegment {
    /// Pcap bit for Part 15 (HTJ2K).
    pub const PART15_BIT: u32 = 0x0002_0000;

    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        let mut c = ByteCursor::new(payload);

        let pcap = c.read_u32()?;
        if pcap & !Self::PART15_BIT != 0 {
            return Err(invalid(Marker::Cap, "options other than Part 15 are not supported"));
        }
        if pcap & Self::PART15_BIT == 0 {
            return Err(invalid(
                Marker::Cap,
                "Part 15 capability bit not set (not an HTJ2K codestream)",
            ));
        }

        let count = pcap.count_ones();
        let expected = 6 + 2 * count;
        if length as u32 != expected {
            return Err(invalid(
                Marker::Cap,
                format!(
                    "length {} does not match capability count {} (expected {})",
                    length, count, expected
                ),
            ));
        }

        let mut ccap = Vec::with_capacity(count as usize);
        for _ in 0..count {
            ccap.push(c.read_u16()?);
        }

        Ok(Self { pcap, ccap })
    }
}

// =============================================================================
// COD
// =============================================================================

/// Packet progression order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressionOrder {
    Lrcp,
    Rlcp,
    Rpcl,
    Pcrl,
    Cprl,
}

impl ProgressionOrder {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ProgressionOrder::Lrcp,
            1 => ProgressionOrder::Rlcp,
            2 => ProgressionOrder::Rpcl,
            3 => ProgressionOrder::Pcrl,
            4 => ProgressionOrder::Cprl,
            _ => return None,
        })
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ProgressionOrder::Lrcp => "LRCP",
            ProgressionOrder::Rlcp => "RLCP",
            ProgressionOrder::Rpcl => "RPCL",
            ProgressionOrder::Pcrl => "PCRL",
            ProgressionOrder::Cprl => "CPRL",
        }
    }
}

/// Precinct size exponents for one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecinctSize {
    pub exp_x: u8,
    pub exp_y: u8,
}

/// Coding style default (COD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodSegment {
    pub coding_style: u8,
    pub progression_order: ProgressionOrder,
    pub layers: u16,
    pub multiple_component_transform: u8,
    pub decomposition_levels: u8,
    pub codeblock_exp_x: u8,
    pub codeblock_exp_y: u8,
    pub codeblock_style: u8,
    pub wavelet: u8,

    /// One entry per resolution (decomposition levels + 1)
    pub precincts: Vec<PrecinctSize>,
}

impl CodSegment {
    pub const USE_PRECINCTS: u8 = 0x01;
    pub const USE_SOP: u8 = 0x02;
    pub const USE_EPH: u8 = 0x04;

    /// Wavelet filter value for the reversible 5/3 transform.
    pub const REVERSIBLE_5_3: u8 = 1;

    /// Fixed COD length without explicit precincts.
    pub const BASE_LENGTH: u16 = 12;

    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        let mut c = ByteCursor::new(payload);

        let coding_style = c.read_u8()?;
        if coding_style > (Self::USE_PRECINCTS | Self::USE_SOP | Self::USE_EPH) {
            return Err(invalid(Marker::Cod, format!("invalid coding style 0x{:x}", coding_style)));
        }

        let order = c.read_u8()?;
        let progression_order = ProgressionOrder::from_u8(order)
            .ok_or_else(|| invalid(Marker::Cod, format!("invalid progression order {}", order)))?;

        let layers = c.read_u16()?;
        if layers == 0 {
            return Err(invalid(Marker::Cod, "quality layers must be positive"));
        }

        let multiple_component_transform = c.read_u8()?;
        if multiple_component_transform > 1 {
            return Err(invalid(Marker::Cod, "multiple component transform must be 0 or 1"));
        }

        let decomposition_levels = c.read_u8()?;
        if decomposition_levels > MAX_DECOMPOSITION_LEVELS {
            return Err(invalid(Marker::Cod, "decomposition levels must be 32 or less"));
        }

        let codeblock_exp_x = c.read_u8()?;
        let codeblock_exp_y = c.read_u8()?;
        if codeblock_exp_x > 8 || codeblock_exp_y > 8 || codeblock_exp_x + codeblock_exp_y > 8 {
            return Err(invalid(
                Marker::Cod,
                "code-block width and height must be at most 1K samples and the area at most 4K samples",
            ));
        }

        let codeblock_style = c.read_u8()?;
        let wavelet = c.read_u8()?;
        if wavelet > 1 {
            return Err(invalid(Marker::Cod, format!("invalid wavelet transform {}", wavelet)));
        }

        let resolutions = decomposition_levels as usize + 1;
        let uses_precincts = coding_style & Self::USE_PRECINCTS != 0;
        let expected = if uses_precincts {
            Self::BASE_LENGTH as usize + resolutions
        } else {
            Self::BASE_LENGTH as usize
        };
        if length as usize != expected {
            return Err(invalid(
                Marker::Cod,
                format!("length {} does not match expected {}", length, expected),
            ));
        }

        let mut precincts = Vec::with_capacity(resolutions);
        for _ in 0..resolutions {
            if uses_precincts {
                let value = c.read_u8()?;
                precincts.push(PrecinctSize {
                    exp_x: value & 0x0F,
                    exp_y: value >> 4,
                });
            } else {
                precincts.push(PrecinctSize {
                    exp_x: 0x0F,
                    exp_y: 0x0F,
                });
            }
        }

        Ok(Self {
            coding_style,
            progression_order,
            layers,
            multiple_component_transform,
            decomposition_levels,
            codeblock_exp_x,
            codeblock_exp_y,
            codeblock_style,
            wavelet,
            precincts,
        })
    }

    pub fn uses_precincts(&self) -> bool {
        self.coding_style & Self::USE_PRECINCTS != 0
    }

    pub fn uses_sop(&self) -> bool {
        self.coding_style & Self::USE_SOP != 0
    }

    pub fn uses_eph(&self) -> bool {
        self.coding_style & Self::USE_EPH != 0
    }

    pub fn uses_color_transform(&self) -> bool {
        self.multiple_component_transform == 1
    }

    /// Code-block size in samples.
    pub fn codeblock_size(&self) -> (u32, u32) {
        (
            1 << (self.codeblock_exp_x + 2),
            1 << (self.codeblock_exp_y + 2),
        )
    }

    pub fn is_reversible(&self) -> bool {
        self.wavelet == Self::REVERSIBLE_5_3
    }
}

// =============================================================================
// QCD
// =============================================================================

/// Quantization default (QCD).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcdSegment {
    /// Raw Sqcd byte
    pub style: u8,

    /// Exponent/mantissa values, one byte each for style 0
    pub step_sizes: Vec<u16>,
}

impl QcdSegment {
    pub const NO_QUANTIZATION: u8 = 0;
    pub const SCALAR_DERIVED: u8 = 1;
    pub const SCALAR_EXPOUNDED: u8 = 2;

    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        let mut c = ByteCursor::new(payload);
        let style = c.read_u8()?;
        let length = length as usize;

        let step_sizes = match style & 0x1F {
            Self::NO_QUANTIZATION => {
                if length < 4 || (length - 4) % 3 != 0 {
                    return Err(invalid(Marker::Qcd, format!("invalid length {}", length)));
                }
                let levels = (length - 4) / 3;
                let mut steps = Vec::with_capacity(1 + 3 * levels);
                for _ in 0..1 + 3 * levels {
                    steps.push(c.read_u8()? as u16);
                }
                steps
            }
            Self::SCALAR_DERIVED => {
                if length != 5 {
                    return Err(invalid(Marker::Qcd, format!("invalid length {}", length)));
                }
                vec![c.read_u16()?]
            }
            Self::SCALAR_EXPOUNDED => {
                if length < 5 || (length - 5) % 6 != 0 {
                    return Err(invalid(Marker::Qcd, format!("invalid length {}", length)));
                }
                let levels = (length - 5) / 6;
                let mut steps = Vec::with_capacity(1 + 3 * levels);
                for _ in 0..1 + 3 * levels {
                    steps.push(c.read_u16()?);
                }
                steps
            }
            other => {
                return Err(invalid(
                    Marker::Qcd,
                    format!("invalid quantization style {}", other),
                ))
            }
        };

        Ok(Self { style, step_sizes })
    }

    pub fn quantization_style(&self) -> u8 {
        self.style & 0x1F
    }

    pub fn guard_bits(&self) -> u8 {
        self.style >> 5
    }

    /// Decomposition levels implied by the number of step sizes.
    pub fn decomposition_levels(&self) -> usize {
        match self.quantization_style() {
            Self::SCALAR_DERIVED => 0,
            _ => self.step_sizes.len().saturating_sub(1) / 3,
        }
    }
}

// =============================================================================
// COM
// =============================================================================

/// Comment (COM).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComSegment {
    pub registration: u16,

    /// Comment text, present for Latin-1 registration
    pub text: Option<String>,
}

impl ComSegment {
    pub const BINARY: u16 = 0;
    pub const LATIN1: u16 = 1;

    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        let mut c = ByteCursor::new(payload);
        let registration = c.read_u16()?;
        let text = if registration == Self::LATIN1 {
            Some(c.read_ascii_string((length as usize).saturating_sub(4))?)
        } else {
            None
        };
        Ok(Self { registration, text })
    }
}

// =============================================================================
// SOT
// =============================================================================

/// Start of tile-part (SOT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SotSegment {
    pub tile_index: u16,

    /// Psot: bytes from the SOT marker to the end of the tile-part
    pub tile_part_length: u32,
    pub tile_part_index: u8,

    /// TNsot: 0 when the count is not known
    pub tile_part_count: u8,
}

impl SotSegment {
    fn parse(length: u16, payload: &[u8]) -> Result<Self, CodestreamError> {
        if length != SOT_LENGTH {
            return Err(invalid(Marker::Sot, format!("invalid length {}", length)));
        }
        let mut c = ByteCursor::new(payload);
        Ok(Self {
            tile_index: c.read_u16()?,
            tile_part_length: c.read_u32()?,
            tile_part_index: c.read_u8()?,
            tile_part_count: c.read_u8()?,
        })
    }

    /// Bytes after the SOD marker.
    pub fn payload_length(&self) -> u32 {
        self.tile_part_length.saturating_sub(MIN_TILE_PART_LENGTH)
    }
}
