//! Codestream marker codes.
//!
//! Every marker is `0xFF` followed by a code byte. All markers except the
//! delimiters (SOC, SOD, EOC) and the in-bitstream packet markers (EPH)
//! carry a 2-byte length that counts itself and the payload.

/// Codestream marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// Start of codestream
    Soc,
    /// Extended capabilities (Part 15)
    Cap,
    /// Image and tile size
    Siz,
    /// Coding style default
    Cod,
    /// Coding style component
    Coc,
    /// Tile-part lengths
    Tlm,
    /// Profile
    Prf,
    /// Packet length, main header
    Plm,
    /// Packet length, tile-part header
    Plt,
    /// Corresponding profile
    Cpf,
    /// Quantization default
    Qcd,
    /// Quantization component
    Qcc,
    /// Region of interest
    Rgn,
    /// Progression order change
    Poc,
    /// Packed packet headers, main header
    Ppm,
    /// Packed packet headers, tile-part header
    Ppt,
    /// Component registration
    Crg,
    /// Comment
    Com,
    /// Start of tile-part
    Sot,
    /// Start of packet
    Sop,
    /// End of packet header
    Eph,
    /// Start of data
    Sod,
    /// End of codestream
    Eoc,
}

impl Marker {
    /// Marker prefix byte.
    pub const PREFIX: u8 = 0xFF;

    /// Look up a marker by its code byte.
    pub fn from_code(code: u8) -> Option<Marker> {
        Some(match code {
            0x4F => Marker::Soc,
            0x50 => Marker::Cap,
            0x51 => Marker::Siz,
            0x52 => Marker::Cod,
            0x53 => Marker::Coc,
            0x55 => Marker::Tlm,
            0x56 => Marker::Prf,
            0x57 => Marker::Plm,
            0x58 => Marker::Plt,
            0x59 => Marker::Cpf,
            0x5C => Marker::Qcd,
            0x5D => Marker::Qcc,
            0x5E => Marker::Rgn,
            0x5F => Marker::Poc,
            0x60 => Marker::Ppm,
            0x61 => Marker::Ppt,
            0x63 => Marker::Crg,
            0x64 => Marker::Com,
            0x90 => Marker::Sot,
            0x91 => Marker::Sop,
            0x92 => Marker::Eph,
            0x93 => Marker::Sod,
            0xD9 => Marker::Eoc,
            _ => return None,
        })
    }

    pub const fn code(&self) -> u8 {
        match self {
            Marker::Soc => 0x4F,
            Marker::Cap => 0x50,
            Marker::Siz => 0x51,
            Marker::Cod => 0x52,
            Marker::Coc => 0x53,
            Marker::Tlm => 0x55,
            Marker::Prf => 0x56,
            Marker::Plm => 0x57,
            Marker::Plt => 0x58,
            Marker::Cpf => 0x59,
            Marker::Qcd => 0x5C,
            Marker::Qcc => 0x5D,
            Marker::Rgn => 0x5E,
            Marker::Poc => 0x5F,
            Marker::Ppm => 0x60,
            Marker::Ppt => 0x61,
            Marker::Crg => 0x63,
            Marker::Com => 0x64,
            Marker::Sot => 0x90,
            Marker::Sop => 0x91,
            Marker::Eph => 0x92,
            Marker::Sod => 0x93,
            Marker::Eoc => 0xD9,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Marker::Soc => "SOC",
            Marker::Cap => "CAP",
            Marker::Siz => "SIZ",
            Marker::Cod => "COD",
            Marker::Coc => "COC",
            Marker::Tlm => "TLM",
            Marker::Prf => "PRF",
            Marker::Plm => "PLM",
            Marker::Plt => "PLT",
            Marker::Cpf => "CPF",
            Marker::Qcd => "QCD",
            Marker::Qcc => "QCC",
            Marker::Rgn => "RGN",
            Marker::Poc => "POC",
            Marker::Ppm => "PPM",
            Marker::Ppt => "PPT",
            Marker::Crg => "CRG",
            Marker::Com => "COM",
            Marker::Sot => "SOT",
            Marker::Sop => "SOP",
            Marker::Eph => "EPH",
            Marker::Sod => "SOD",
            Marker::Eoc => "EOC",
        }
    }

    /// Whether a 2-byte length field follows the marker.
    pub const fn has_length(&self) -> bool {
        !matches!(self, Marker::Soc | Marker::Sod | Marker::Eoc | Marker::Eph)
    }
}
