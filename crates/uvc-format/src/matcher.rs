//! Frame size and frame interval matching
//!
//! The device is supposed to pick the closest interval during probe/commit,
//! but some firmware only accepts values it advertises verbatim. These
//! functions map an arbitrary request onto the advertised capabilities.

use tracing::trace;

use crate::{FormatDescriptor, FrameDescriptor, FrameIntervals};

/// Pick the supported interval closest to `requested` (100 ns units).
///
/// Discrete lists are scanned once in ascending order and the scan stops at
/// the first entry that does not get strictly closer, so this returns the
/// first local minimum rather than the global one. Stepwise ranges round to
/// the nearest step above `min` and clamp to `[min, max]`.
pub fn best_interval(frame: &FrameDescriptor, requested: u32) -> u32 {
    match &frame.intervals {
        FrameIntervals::Discrete(intervals) => {
            let mut best: Option<(u32, u32)> = None;
            for &candidate in intervals {
                let dist = requested.abs_diff(candidate);
                match best {
                    Some((best_dist, _)) if dist >= best_dist => break,
                    _ => best = Some((dist, candidate)),
                }
            }
            best.map(|(_, interval)| interval)
                .unwrap_or(frame.default_interval)
        }
        FrameIntervals::Stepwise { min, max, step } => {
            let (min, max, step) = (u64::from(*min), u64::from(*max), u64::from(*step));
            let requested = u64::from(requested);
            let interval = if step == 0 {
                requested.max(min)
            } else {
                let offset = requested.saturating_sub(min);
                min + (offset + step / 2) / step * step
            };
            // max always fits back into u32
            interval.min(max) as u32
        }
    }
}

/// Area of the non-overlapping region between a `w x h` and an `rw x rh`
/// rectangle anchored at the same corner.
pub fn frame_size_distance(w: u32, h: u32, rw: u32, rh: u32) -> u64 {
    let (w, h, rw, rh) = (u64::from(w), u64::from(h), u64::from(rw), u64::from(rh));
    let overlap = w.min(rw) * h.min(rh);
    w * h + rw * rh - 2 * overlap
}

/// Pick the frame of `format` whose size is closest to `width x height`.
///
/// Ties go to the first frame in descriptor order; an exact match ends the
/// search immediately. Returns `None` only for a format without frames.
pub fn best_frame_size(
    format: &FormatDescriptor,
    width: u32,
    height: u32,
) -> Option<&FrameDescriptor> {
    let mut best: Option<(u64, &FrameDescriptor)> = None;

    for frame in &format.frames {
        let d = frame_size_distance(frame.width.into(), frame.height.into(), width, height);
        if best.map_or(true, |(best_d, _)| d < best_d) {
            best = Some((d, frame));
        }
        if d == 0 {
            break;
        }
    }

    if let Some((d, frame)) = best {
        trace!(
            "{}x{} -> frame {} ({}x{}, distance {})",
            width, height, frame.index, frame.width, frame.height, d
        );
    }
    best.map(|(_, frame)| frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ColorSpace, FourCc};
    use proptest::prelude::*;

    fn frame(width: u16, height: u16, intervals: FrameIntervals) -> FrameDescriptor {
        FrameDescriptor {
            index: 1,
            width,
            height,
            default_interval: 333_333,
            intervals,
        }
    }

    fn format(sizes: &[(u16, u16)]) -> FormatDescriptor {
        FormatDescriptor {
            index: 1,
            fourcc: FourCc::YUYV,
            name: "YUYV".into(),
            bpp: 16,
            colorspace: ColorSpace::Srgb,
            compressed: false,
            frames: sizes
                .iter()
                .enumerate()
                .map(|(i, &(w, h))| FrameDescriptor {
                    index: i as u8 + 1,
                    ..frame(w, h, FrameIntervals::Discrete(vec![333_333]))
                })
                .collect(),
            still_sizes: vec![],
        }
    }

    #[test]
    fn test_discrete_exact() {
        let f = frame(640, 480, FrameIntervals::Discrete(vec![333_333, 666_666, 1_000_000]));
        assert_eq!(best_interval(&f, 666_666), 666_666);
    }

    #[test]
    fn test_discrete_rounds_to_nearest() {
        let f = frame(640, 480, FrameIntervals::Discrete(vec![333_333, 666_666, 1_000_000]));
        assert_eq!(best_interval(&f, 400_000), 333_333);
        assert_eq!(best_interval(&f, 900_000), 1_000_000);
        assert_eq!(best_interval(&f, 5_000_000), 1_000_000);
        assert_eq!(best_interval(&f, 1), 333_333);
    }

    #[test]
    fn test_discrete_tie_keeps_earlier_entry() {
        let f = frame(640, 480, FrameIntervals::Discrete(vec![400_000, 600_000]));
        assert_eq!(best_interval(&f, 500_000), 400_000);
    }

    #[test]
    fn test_discrete_stops_at_first_local_minimum() {
        // Not ascending: the scan stops at 500_000 and never sees 210_000.
        let f = frame(640, 480, FrameIntervals::Discrete(vec![300_000, 500_000, 210_000]));
        assert_eq!(best_interval(&f, 200_000), 300_000);
    }

    #[test]
    fn test_discrete_empty_uses_default() {
        let f = frame(640, 480, FrameIntervals::Discrete(vec![]));
        assert_eq!(best_interval(&f, 1), 333_333);
    }

    #[test]
    fn test_stepwise() {
        let f = frame(
            640,
            480,
            FrameIntervals::Stepwise { min: 333_333, max: 1_333_333, step: 100_000 },
        );
        assert_eq!(best_interval(&f, 333_333), 333_333);
        assert_eq!(best_interval(&f, 480_000), 433_333);
        assert_eq!(best_interval(&f, 100), 333_333);
        assert_eq!(best_interval(&f, 9_000_000), 1_333_333);
    }

    #[test]
    fn test_stepwise_zero_step_clamps() {
        let f = frame(640, 480, FrameIntervals::Stepwise { min: 10, max: 20, step: 0 });
        assert_eq!(best_interval(&f, 15), 15);
        assert_eq!(best_interval(&f, 5), 10);
        assert_eq!(best_interval(&f, 50), 20);
    }

    #[test]
    fn test_frame_size_prefers_smaller_non_overlap() {
        // 640x480 against 320x240 (230400) and 1280x720 (614400)
        let fmt = format(&[(320, 240), (1280, 720)]);
        assert_eq!(frame_size_distance(320, 240, 640, 480), 230_400);
        assert_eq!(frame_size_distance(1280, 720, 640, 480), 614_400);
        let chosen = best_frame_size(&fmt, 640, 480).unwrap();
        assert_eq!((chosen.width, chosen.height), (320, 240));
    }

    #[test]
    fn test_frame_size_exact_match() {
        let fmt = format(&[(320, 240), (640, 480), (1280, 720)]);
        let chosen = best_frame_size(&fmt, 640, 480).unwrap();
        assert_eq!(chosen.index, 2);
    }

    #[test]
    fn test_frame_size_tie_first_wins() {
        // Both are 100 pixels away from 10x10
        let fmt = format(&[(10, 20), (20, 10)]);
        assert_eq!(best_frame_size(&fmt, 10, 10).unwrap().index, 1);
    }

    #[test]
    fn test_frame_size_no_frames() {
        assert!(best_frame_size(&format(&[]), 640, 480).is_none());
    }

    proptest! {
        #[test]
        fn prop_discrete_result_is_listed(
            mut list in prop::collection::vec(1u32..20_000_000, 1..12),
            requested in any::<u32>(),
        ) {
            list.sort_unstable();
            let f = frame(640, 480, FrameIntervals::Discrete(list.clone()));
            prop_assert!(list.contains(&best_interval(&f, requested)));
        }

        #[test]
        fn prop_stepwise_in_range_and_aligned(
            min in 1u32..1_000_000,
            step in 1u32..500_000,
            steps in 0u32..40,
            requested in any::<u32>(),
        ) {
            let max = min + step * steps;
            let f = frame(640, 480, FrameIntervals::Stepwise { min, max, step });
            let interval = best_interval(&f, requested);
            prop_assert!(interval >= min && interval <= max);
            prop_assert_eq!((interval - min) % step, 0);
        }

        #[test]
        fn prop_frame_size_is_minimal(
            sizes in prop::collection::vec((1u16..4096, 1u16..4096), 1..10),
            rw in 1u32..8192,
            rh in 1u32..8192,
        ) {
            let fmt = format(&sizes);
            let chosen = best_frame_size(&fmt, rw, rh).unwrap();
            let d = frame_size_distance(chosen.width.into(), chosen.height.into(), rw, rh);
            for f in &fmt.frames {
                prop_assert!(d <= frame_size_distance(f.width.into(), f.height.into(), rw, rh));
            }
        }

        #[test]
        fn prop_frame_size_exact_request_returns_candidate(
            sizes in prop::collection::vec((1u16..4096, 1u16..4096), 1..10),
            pick in any::<prop::sample::Index>(),
        ) {
            let fmt = format(&sizes);
            let (w, h) = sizes[pick.index(sizes.len())];
            let chosen = best_frame_size(&fmt, w.into(), h.into()).unwrap();
            prop_assert_eq!((chosen.width, chosen.height), (w, h));
        }
    }
}
