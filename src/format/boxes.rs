//! JP2 box headers.
//!
//! Each box is a 4-byte big-endian length, a 4-byte type and a payload.
//! A length of 0 means the box runs to the end of the input. A length of 1
//! announces a 64-bit extended length, which frames served by the proxy
//! never use and which is rejected.

use std::fmt;

use crate::error::CodestreamError;
use crate::io::ByteCursor;

/// Size of a box header without extended length.
pub const BOX_HEADER_SIZE: usize = 8;

/// Four-character box type code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoxType(pub u32);

impl BoxType {
    pub const SIGNATURE: BoxType = BoxType(0x6a50_2020); // 'jP  '
    pub const FILE_TYPE: BoxType = BoxType(0x6674_7970); // 'ftyp'
    pub const HEADER: BoxType = BoxType(0x6a70_3268); // 'jp2h'
    pub const IMAGE_HEADER: BoxType = BoxType(0x6968_6472); // 'ihdr'
    pub const BITS_PER_COMPONENT: BoxType = BoxType(0x6270_6363); // 'bpcc'
    pub const COLOUR_SPEC: BoxType = BoxType(0x636f_6c72); // 'colr'
    pub const PALETTE: BoxType = BoxType(0x7063_6c72); // 'pclr'
    pub const COMPONENT_MAPPING: BoxType = BoxType(0x636d_6170); // 'cmap'
    pub const CHANNEL_DEFINITION: BoxType = BoxType(0x6364_6566); // 'cdef'
    pub const RESOLUTION: BoxType = BoxType(0x7265_7320); // 'res '
    pub const CAPTURE_RESOLUTION: BoxType = BoxType(0x7265_7363); // 'resc'
    pub const DISPLAY_RESOLUTION: BoxType = BoxType(0x7265_7364); // 'resd'
    pub const CODESTREAM: BoxType = BoxType(0x6a70_3263); // 'jp2c'
    pub const INTELLECTUAL_PROPERTY: BoxType = BoxType(0x6a70_3269); // 'jp2i'
    pub const XML: BoxType = BoxType(0x786d_6c20); // 'xml '
    pub const UUID: BoxType = BoxType(0x7575_6964); // 'uuid'
    pub const UUID_INFO: BoxType = BoxType(0x7569_6e66); // 'uinf'
    pub const UUID_LIST: BoxType = BoxType(0x756c_7374); // 'ulst'
    pub const URL: BoxType = BoxType(0x7572_6c20); // 'url '

    /// Descriptive name for known box types.
    pub fn description(&self) -> Option<&'static str> {
        Some(match *self {
            BoxType::SIGNATURE => "JPEG 2000 signature",
            BoxType::FILE_TYPE => "File type",
            BoxType::HEADER => "JP2 header",
            BoxType::IMAGE_HEADER => "Image header",
            BoxType::BITS_PER_COMPONENT => "Bits per component",
            BoxType::COLOUR_SPEC => "Colour specification",
            BoxType::PALETTE => "Palette",
            BoxType::COMPONENT_MAPPING => "Component mapping",
            BoxType::CHANNEL_DEFINITION => "Channel definition",
            BoxType::RESOLUTION => "Resolution",
            BoxType::CAPTURE_RESOLUTION => "Capture resolution",
            BoxType::DISPLAY_RESOLUTION => "Default display resolution",
            BoxType::CODESTREAM => "Contiguous codestream",
            BoxType::INTELLECTUAL_PROPERTY => "Intellectual property",
            BoxType::XML => "XML",
            BoxType::UUID => "UUID",
            BoxType::UUID_INFO => "UUID info",
            BoxType::UUID_LIST => "UUID list",
            BoxType::URL => "Data entry URL",
            _ => return None,
        })
    }
}

impl fmt::Display for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_be_bytes() {
            let c = if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}

impl fmt::Debug for BoxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxType('{}')", self)
    }
}

/// A parsed box header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Offset of the length field in the container
    pub position: usize,

    pub box_type: BoxType,

    /// Total box length including the header, or `None` when the box runs
    /// to the end of the input
    pub length: Option<u32>,
}

impl BoxHeader {
    /// Read a box header at the cursor position.
    ///
    /// Returns `Ok(None)` when fewer than 8 bytes are buffered; the cursor is
    /// left untouched in that case.
    pub fn read(cursor: &mut ByteCursor<'_>) -> Result<Option<Self>, CodestreamError> {
        if cursor.remaining() < BOX_HEADER_SIZE {
            return Ok(None);
        }
        let position = cursor.position();
        let length = cursor.read_u32()?;
        let box_type = BoxType(cursor.read_u32()?);

        let length = match length {
            0 => None,
            1 => return Err(CodestreamError::ExtendedLengthBox),
            n if (n as usize) < BOX_HEADER_SIZE => {
                return Err(CodestreamError::InvalidBoxLength {
                    box_type: box_type.to_string(),
                    length: n,
                })
            }
            n => Some(n),
        };

        Ok(Some(Self {
            position,
            box_type,
            length,
        }))
    }

    /// Offset of the first payload byte.
    pub fn payload_start(&self) -> usize {
        self.position + BOX_HEADER_SIZE
    }

    /// Offset one past the last byte, when the length is explicit.
    pub fn end(&self) -> Option<usize> {
        self.length.map(|len| self.position + len as usize)
    }
}
