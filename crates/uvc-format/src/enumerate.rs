//! Frame size and frame interval enumeration

use crate::{interval_to_fraction, CapabilitySet, FourCc, Fraction, FrameIntervals};

/// One enumerated frame interval entry, expressed as time per frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalDesc {
    Discrete(Fraction),
    Stepwise {
        min: Fraction,
        max: Fraction,
        step: Fraction,
    },
}

impl CapabilitySet {
    /// Size of the `index`-th frame (zero-based) of the given format
    pub fn frame_size_at(&self, fourcc: FourCc, index: usize) -> Option<(u16, u16)> {
        let frame = self.find(fourcc)?.frames.get(index)?;
        Some((frame.width, frame.height))
    }

    /// `index`-th interval (zero-based) of the frame matching `width x height`.
    ///
    /// A stepwise range is a single entry at index 0.
    pub fn frame_interval_at(
        &self,
        fourcc: FourCc,
        width: u32,
        height: u32,
        index: usize,
    ) -> Option<IntervalDesc> {
        let frame = self.find(fourcc)?.frame_by_size(width, height)?;
        match &frame.intervals {
            FrameIntervals::Discrete(intervals) => intervals
                .get(index)
                .map(|&interval| IntervalDesc::Discrete(interval_to_fraction(interval))),
            FrameIntervals::Stepwise { min, max, step } => (index == 0).then(|| {
                IntervalDesc::Stepwise {
                    min: interval_to_fraction(*min),
                    max: interval_to_fraction(*max),
                    step: interval_to_fraction(*step),
                }
            }),
        }
    }
}
