//! UVC Format Descriptors
//!
//! Capability model of a USB video streaming interface and the pure
//! matching functions used when a device cannot negotiate on its own:
//! - Format / frame / still-size descriptors discovered at attach time
//! - Closest frame size selection
//! - Closest frame interval selection (discrete and stepwise)
//! - Interval <-> fraction conversion
//! - Frame size / interval enumeration

mod descriptor;
mod enumerate;
mod fourcc;
mod fraction;
mod matcher;

pub use descriptor::{
    CapabilitySet, ColorSpace, FormatDescriptor, FrameDescriptor, FrameIntervals, StillSize,
};
pub use enumerate::IntervalDesc;
pub use fourcc::FourCc;
pub use fraction::{fraction_to_interval, interval_to_fraction, simplify_fraction, Fraction};
pub use matcher::{best_frame_size, best_interval, frame_size_distance};

use thiserror::Error;

/// Frame intervals are expressed in 100 ns units.
pub const INTERVAL_UNITS_PER_SECOND: u32 = 10_000_000;

/// Descriptor errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FormatError {
    /// FourCC strings must be exactly four bytes
    #[error("Invalid FourCC {0:?}: expected four ASCII bytes")]
    InvalidFourCc(String),

    /// Descriptor indices are one-based
    #[error("Descriptor index must be one-based, got 0")]
    ZeroIndex,
}
