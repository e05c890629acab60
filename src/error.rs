use thiserror::Error;

/// I/O errors that can occur when reading frames from remote storage
#[derive(Debug, Clone, Error)]
pub enum IoError {
    /// Error from S3 or S3-compatible storage
    #[error("S3 error: {0}")]
    S3(String),

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// The store did not answer within the configured fetch timeout
    #[error("Timed out after {0} ms")]
    Timeout(u64),
}

/// Structural errors raised while unwrapping or parsing an HTJ2K codestream.
///
/// Positions are byte offsets relative to the start of the codestream
/// (the first byte of SOC), except for box errors which refer to the
/// container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodestreamError {
    /// Neither a JP2 signature box nor a raw SOC+SIZ prefix
    #[error("Not an HTJ2K file: unrecognized signature")]
    NotHtj2k,

    /// Box with a 64-bit extended length field
    #[error("Extended length boxes are not supported")]
    ExtendedLengthBox,

    /// Box length that cannot even hold its own header
    #[error("Invalid box length {length} for box '{box_type}'")]
    InvalidBoxLength { box_type: String, length: u32 },

    /// Box length points past the end of the input
    #[error("Box '{box_type}' ends at {end} but input has {available} bytes")]
    BoxOutOfBounds {
        box_type: String,
        end: usize,
        available: usize,
    },

    /// Container ended without a contiguous codestream box
    #[error("No codestream box found in container")]
    MissingCodestreamBox,

    /// Marker position does not start with 0xFF
    #[error("Expected marker prefix 0xFF at {position}, found 0x{found:02X}")]
    InvalidMarkerPrefix { position: usize, found: u8 },

    /// Marker code outside the JPEG 2000 Part 1 / Part 15 set
    #[error("Unknown marker 0xFF{code:02X} at {position}")]
    UnknownMarker { position: usize, code: u8 },

    /// Known marker in a place where it is not allowed
    #[error("Unexpected {marker} marker at {position} ({context})")]
    UnexpectedMarker {
        position: usize,
        marker: &'static str,
        context: &'static str,
    },

    /// Mandatory main header segment was not seen before the first SOT
    #[error("Missing mandatory {0} segment")]
    MissingSegment(&'static str),

    /// Mandatory main header segment appeared more than once
    #[error("Duplicate {0} segment")]
    DuplicateSegment(&'static str),

    /// Segment fields violate the marker's rules
    #[error("Invalid {marker} segment: {reason}")]
    InvalidSegment {
        marker: &'static str,
        reason: String,
    },

    /// Tile-part with Psot = 0 (length implied by EOC)
    #[error("Tile-part of tile {tile_index} has no explicit length")]
    UnboundedTilePart { tile_index: u16 },

    /// Segment or tile-part extends past the end of the codestream box
    #[error("{what} at {position} ends at {end}, past codestream end {limit}")]
    OutOfBounds {
        what: &'static str,
        position: usize,
        end: usize,
        limit: usize,
    },

    /// EOC reached before any tile-part
    #[error("End of codestream before the first tile-part")]
    NoTileParts,

    /// Input ended while the parser still expected data
    #[error("Truncated input while parsing {0}")]
    Truncated(&'static str),

    /// A read ran past the buffered data while decoding a segment payload
    #[error("Insufficient data: needed {needed} bytes, {available} available")]
    InsufficientData { needed: usize, available: usize },

    /// Data written to a parser that has already been cancelled
    #[error("Parser has been cancelled")]
    WriteAfterCancel,
}

/// Errors from a cache tier.
///
/// These never reach a client: the cache layer logs them and degrades to a miss.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Could not connect to or talk with the cache server
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// The cache server sent something we could not interpret
    #[error("Cache protocol error: {0}")]
    Protocol(String),

    /// The cache server did not answer in time
    #[error("Cache operation timed out after {0} ms")]
    Timeout(u64),

    /// Key is too long or contains whitespace/control characters
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Value exceeds the distributed tier's item limit
    #[error("Value of {size} bytes exceeds cache limit of {max} bytes")]
    ValueTooLarge { size: usize, max: usize },
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Connection(err.to_string())
    }
}

/// Errors surfaced by the frame service.
///
/// These are mapped to HTTP responses in the server layer.
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// Request is missing identifiers or has malformed level parameters
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Fetching the frame from the backing store failed
    #[error("Upstream error: {0}")]
    Upstream(#[from] IoError),

    /// The fetched bytes are not a well-formed HTJ2K codestream
    #[error("Invalid image frame: {0}")]
    InvalidFrame(#[from] CodestreamError),

    /// A background parse task ended without producing a result
    #[error("Background task failed: {0}")]
    Background(String),
}
