//! Format, frame and still-image descriptors

use serde::{Deserialize, Serialize};

use crate::{FormatError, FourCc};

/// Colour space advertised by a format's color matching descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorSpace {
    Smpte170m,
    Rec709,
    Jpeg,
    #[default]
    Srgb,
}

impl ColorSpace {
    /// `enum v4l2_colorspace` value
    pub fn v4l2_id(self) -> u32 {
        match self {
            ColorSpace::Smpte170m => 1,
            ColorSpace::Rec709 => 3,
            ColorSpace::Jpeg => 7,
            ColorSpace::Srgb => 8,
        }
    }
}

/// Supported frame intervals of one frame descriptor (100 ns units)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameIntervals {
    /// Ascending list of discrete intervals
    Discrete(Vec<u32>),
    /// Continuous range `[min, max]` in steps of `step`
    Stepwise { min: u32, max: u32, step: u32 },
}

/// One supported resolution of a format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    /// One-based bFrameIndex
    pub index: u8,
    pub width: u16,
    pub height: u16,
    /// dwDefaultFrameInterval
    pub default_interval: u32,
    pub intervals: FrameIntervals,
}

/// Still image size from the still image frame descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillSize {
    pub width: u16,
    pub height: u16,
}

/// One supported pixel format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// One-based bFormatIndex
    pub index: u8,
    pub fourcc: FourCc,
    pub name: String,
    /// Bits per pixel, used for the bytes-per-line computation
    pub bpp: u8,
    #[serde(default)]
    pub colorspace: ColorSpace,
    #[serde(default)]
    pub compressed: bool,
    pub frames: Vec<FrameDescriptor>,
    #[serde(default)]
    pub still_sizes: Vec<StillSize>,
}

impl FormatDescriptor {
    /// Look up a frame by its one-based index
    pub fn frame(&self, index: u8) -> Option<&FrameDescriptor> {
        self.frames.iter().find(|f| f.index == index)
    }

    /// Look up a frame by exact size
    pub fn frame_by_size(&self, width: u32, height: u32) -> Option<&FrameDescriptor> {
        self.frames
            .iter()
            .find(|f| u32::from(f.width) == width && u32::from(f.height) == height)
    }

    /// One-based still frame index of an exact width/height match
    pub fn still_index(&self, width: u32, height: u32) -> Option<u8> {
        self.still_sizes
            .iter()
            .position(|s| u32::from(s.width) == width && u32::from(s.height) == height)
            .and_then(|pos| u8::try_from(pos + 1).ok())
    }

    /// Bytes per line for a frame of the given width
    pub fn bytes_per_line(&self, width: u16) -> u32 {
        u32::from(self.bpp) * u32::from(width) / 8
    }
}

/// Immutable capability set of one streaming interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    formats: Vec<FormatDescriptor>,
}

impl CapabilitySet {
    /// Build a capability set, rejecting zero descriptor indices
    pub fn new(formats: Vec<FormatDescriptor>) -> Result<Self, FormatError> {
        let zero_index = formats
            .iter()
            .any(|f| f.index == 0 || f.frames.iter().any(|fr| fr.index == 0));
        if zero_index {
            return Err(FormatError::ZeroIndex);
        }
        Ok(Self { formats })
    }

    pub fn formats(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// First format advertising the given FourCC
    pub fn find(&self, fourcc: FourCc) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.fourcc == fourcc)
    }

    /// Position of the first format advertising the given FourCC
    pub fn position(&self, fourcc: FourCc) -> Option<usize> {
        self.formats.iter().position(|f| f.fourcc == fourcc)
    }

    pub fn get(&self, position: usize) -> Option<&FormatDescriptor> {
        self.formats.get(position)
    }
}
