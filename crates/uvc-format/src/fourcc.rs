//! Four-character pixel format codes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::FormatError;

/// Four-character code identifying a pixel format (e.g. `YUYV`, `MJPG`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FourCc([u8; 4]);

impl FourCc {
    pub const YUYV: FourCc = FourCc(*b"YUYV");
    pub const MJPG: FourCc = FourCc(*b"MJPG");
    pub const NV12: FourCc = FourCc(*b"NV12");
    pub const H264: FourCc = FourCc(*b"H264");

    /// Construct from raw bytes
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// Little-endian u32 encoding, as carried in V4L2 structures
    pub fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<u32> for FourCc {
    fn from(value: u32) -> Self {
        Self(value.to_le_bytes())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

impl FromStr for FourCc {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Non-printable codes are displayed as 0x-prefixed little-endian u32
        if let Some(hex) = s.strip_prefix("0x").filter(|hex| hex.len() == 8) {
            return u32::from_str_radix(hex, 16)
                .map(FourCc::from)
                .map_err(|_| FormatError::InvalidFourCc(s.to_string()));
        }
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| FormatError::InvalidFourCc(s.to_string()))?;
        Ok(FourCc(bytes))
    }
}

impl TryFrom<String> for FourCc {
    type Error = FormatError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FourCc> for String {
    fn from(value: FourCc) -> Self {
        value.to_string()
    }
}
