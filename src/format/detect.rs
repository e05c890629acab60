//! Container detection for HTJ2K frames.
//!
//! A frame is either a bare codestream (starting with SOC followed by SIZ)
//! or a JP2 family file whose first box is the 12-byte signature box.
//! Anything else is rejected before any tile parsing happens.

use crate::error::CodestreamError;

// =============================================================================
// FileFormat
// =============================================================================

/// Detected container format of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Bare J2K/J2C codestream (SOC + SIZ at offset 0)
    RawCodestream,

    /// JP2/JPH box container with a `jp2c` codestream box
    BoxedCodestream,
}

impl FileFormat {
    /// Get a human-readable name for the format.
    pub const fn name(&self) -> &'static str {
        match self {
            FileFormat::RawCodestream => "Raw codestream",
            FileFormat::BoxedCodestream => "JP2 container",
        }
    }
}

// =============================================================================
// Magic Bytes
// =============================================================================

/// Full JP2 signature box (RFC 3745): length 12, type `jP  `, content `\r\n\x87\n`.
pub const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];

/// Bare JP2 magic seen by some writers at offset 0.
pub const JP2_MAGIC: [u8; 4] = [0x0D, 0x0A, 0x87, 0x0A];

/// SOC immediately followed by SIZ.
pub const J2K_MAGIC: [u8; 4] = [0xFF, 0x4F, 0xFF, 0x51];

/// Number of bytes needed to decide the format in every case.
pub const SNIFF_BYTES: usize = JP2_SIGNATURE.len();

// =============================================================================
// Detection
// =============================================================================

/// Check for a raw codestream prefix.
pub fn is_codestream_header(bytes: &[u8]) -> bool {
    bytes.len() >= J2K_MAGIC.len() && bytes[..J2K_MAGIC.len()] == J2K_MAGIC
}

/// Check for a JP2 signature box or the bare JP2 magic.
pub fn is_jp2_header(bytes: &[u8]) -> bool {
    (bytes.len() >= JP2_SIGNATURE.len() && bytes[..JP2_SIGNATURE.len()] == JP2_SIGNATURE)
        || (bytes.len() >= JP2_MAGIC.len() && bytes[..JP2_MAGIC.len()] == JP2_MAGIC)
}

/// Detect the container format from the first bytes of a frame.
///
/// # Returns
/// * `Ok(Some(format))` - format recognised
/// * `Ok(None)` - not enough bytes to decide yet
/// * `Err(CodestreamError::NotHtj2k)` - the prefix matches no known signature
///
/// A prefix that could still become a valid signature is answered with
/// `Ok(None)`, so callers feeding tiny chunks never get a false rejection.
pub fn detect_format(bytes: &[u8]) -> Result<Option<FileFormat>, CodestreamError> {
    if is_codestream_header(bytes) {
        return Ok(Some(FileFormat::RawCodestream));
    }
    if is_jp2_header(bytes) {
        return Ok(Some(FileFormat::BoxedCodestream));
    }

    let could_be = |magic: &[u8]| {
        bytes.len() < magic.len() && magic[..bytes.len()] == *bytes
    };
    if could_be(&J2K_MAGIC) || could_be(&JP2_MAGIC) || could_be(&JP2_SIGNATURE) {
        return Ok(None);
    }

    Err(CodestreamError::NotHtj2k)
}
