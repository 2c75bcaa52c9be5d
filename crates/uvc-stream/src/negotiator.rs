//! Format and frame rate negotiation
//!
//! Requests are matched against the capability set first (closest frame
//! size, closest interval), then handed to the device for a probe. Only
//! what the device returns is committed.

use crate::control::{StreamingControl, HINT_FRAME_INTERVAL};
use crate::error::UvcError;
use crate::stream::{Selection, StillSelection, Stream};
use crate::{BufType, STILL_MAGIC};
use tracing::{debug, info};
use uvc_format::{
    best_frame_size, best_interval, fraction_to_interval, interval_to_fraction, ColorSpace,
    FormatDescriptor, FourCc, Fraction,
};

/// Format requested by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatRequest {
    pub buf_type: BufType,
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    /// [`STILL_MAGIC`] selects the still image path for set/get
    pub private: u32,
}

impl FormatRequest {
    pub fn new(buf_type: BufType, fourcc: FourCc, width: u32, height: u32) -> Self {
        Self {
            buf_type,
            fourcc,
            width,
            height,
            private: 0,
        }
    }

    /// Same request, aimed at the still image path
    pub fn still(mut self) -> Self {
        self.private = STILL_MAGIC;
        self
    }

    pub fn is_still(&self) -> bool {
        self.private == STILL_MAGIC
    }
}

/// Field order of a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Field {
    #[default]
    Any,
    /// Progressive
    None,
}

/// Negotiated pixel format, as reported back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixFormat {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    pub field: Field,
    pub bytes_per_line: u32,
    /// Max frame size in bytes, as accepted by the device
    pub size_image: u32,
    pub colorspace: ColorSpace,
    pub private: u32,
}

impl PixFormat {
    fn new(format: &FormatDescriptor, width: u16, height: u16, size_image: u32) -> Self {
        Self {
            fourcc: format.fourcc,
            width: u32::from(width),
            height: u32::from(height),
            field: Field::None,
            bytes_per_line: format.bytes_per_line(width),
            size_image,
            colorspace: format.colorspace,
            private: 0,
        }
    }
}

/// Cropping capabilities: the full frame, with square pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropCap {
    pub bounds: Rect,
    pub default_rect: Rect,
    pub pixel_aspect: Fraction,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Stream {
    /// Probe a format without committing it
    pub fn try_format(&self, request: &FormatRequest) -> Result<PixFormat, UvcError> {
        self.probe_format(request).map(|(_, pix, _)| pix)
    }

    fn probe_format(
        &self,
        request: &FormatRequest,
    ) -> Result<(StreamingControl, PixFormat, Selection), UvcError> {
        self.check_type(request.buf_type)?;
        debug!(
            "Trying format {} ({}x{})",
            request.fourcc, request.width, request.height
        );

        let caps = self.capabilities();
        let position = caps
            .position(request.fourcc)
            .ok_or_else(|| UvcError::Unsupported(format!("pixel format {}", request.fourcc)))?;
        let format = &caps.formats()[position];

        let frame = best_frame_size(format, request.width, request.height).ok_or_else(|| {
            UvcError::Unsupported(format!(
                "no frame size for {}x{}",
                request.width, request.height
            ))
        })?;

        let interval = frame.default_interval;
        debug!(
            "Using default frame interval {}.{} us ({:.1} fps)",
            interval / 10,
            interval % 10,
            10_000_000.0 / f64::from(interval.max(1))
        );

        let mut probe = StreamingControl {
            hint: HINT_FRAME_INTERVAL,
            format_index: format.index,
            frame_index: frame.index,
            frame_interval: best_interval(frame, interval),
            ..Default::default()
        };

        let state = self.state.lock();
        self.profile().apply_probe_quirks(&mut probe, &state.ctrl, frame);
        let negotiated = self.transport().probe_video(&probe)?;
        drop(state);

        let pix = PixFormat::new(
            format,
            frame.width,
            frame.height,
            negotiated.max_video_frame_size,
        );
        let selection = Selection {
            format: position,
            frame_index: frame.index,
        };
        Ok((negotiated, pix, selection))
    }

    /// Probe and commit a main format.
    ///
    /// Fails with `Busy` once main buffers are allocated.
    pub fn set_format(&self, request: &FormatRequest) -> Result<PixFormat, UvcError> {
        self.check_type(request.buf_type)?;
        if self.queue().is_allocated() {
            return Err(UvcError::Busy("buffers allocated".to_string()));
        }

        let (negotiated, pix, selection) = self.probe_format(request)?;

        let mut state = self.state.lock();
        // Buffers may have been allocated while the probe ran
        if self.queue().is_allocated() {
            return Err(UvcError::Busy("buffers allocated".to_string()));
        }
        state.ctrl = negotiated;
        state.current = Some(selection);

        info!(
            "{}: format set to {} {}x{} ({} bytes/frame)",
            self.name(),
            pix.fourcc,
            pix.width,
            pix.height,
            pix.size_image
        );
        Ok(pix)
    }

    /// Currently committed main format
    pub fn get_format(&self, buf_type: BufType) -> Result<PixFormat, UvcError> {
        self.check_type(buf_type)?;

        let state = self.state.lock();
        let (format, frame) = state
            .current_frame(self.capabilities())
            .ok_or_else(|| UvcError::Unsupported("no format negotiated".to_string()))?;
        Ok(PixFormat::new(
            format,
            frame.width,
            frame.height,
            state.ctrl.max_video_frame_size,
        ))
    }

    /// Probe and commit a still image format.
    ///
    /// The still size must match an advertised still size exactly. A
    /// previously allocated still queue is freed before committing.
    pub fn set_still_format(&self, request: &FormatRequest) -> Result<PixFormat, UvcError> {
        self.check_type(request.buf_type)?;
        if self.is_still_decoding() {
            return Err(UvcError::Busy("still image capture in progress".to_string()));
        }

        let caps = self.capabilities();
        let position = caps
            .position(request.fourcc)
            .ok_or_else(|| UvcError::Unsupported(format!("pixel format {}", request.fourcc)))?;
        let format = &caps.formats()[position];
        let image_index = format
            .still_index(request.width, request.height)
            .ok_or_else(|| {
                UvcError::Unsupported(format!(
                    "no still size {}x{} for {}",
                    request.width, request.height, request.fourcc
                ))
            })?;

        let probe = StreamingControl {
            format_index: format.index,
            frame_index: image_index,
            ..Default::default()
        };

        let mut state = self.state.lock();
        let negotiated = self.transport().probe_still(&probe)?;

        if self.still_queue().is_allocated() {
            debug!("{}: releasing previous still buffers", self.name());
            self.still_queue().free()?;
        }
        state.still_ctrl = negotiated;
        state.still = Some(StillSelection {
            format: position,
            image_index,
        });

        let pix = PixFormat {
            private: STILL_MAGIC,
            ..PixFormat::new(
                format,
                request.width as u16,
                request.height as u16,
                state.still_ctrl.max_video_frame_size,
            )
        };
        info!(
            "{}: still format set to {} {}x{}",
            self.name(),
            pix.fourcc,
            pix.width,
            pix.height
        );
        Ok(pix)
    }

    /// Currently committed still format
    pub fn get_still_format(&self, buf_type: BufType) -> Result<PixFormat, UvcError> {
        self.check_type(buf_type)?;

        let state = self.state.lock();
        let (format, still) = state
            .current_still(self.capabilities())
            .ok_or_else(|| UvcError::Unsupported("no still format configured".to_string()))?;
        Ok(PixFormat {
            private: STILL_MAGIC,
            ..PixFormat::new(
                format,
                still.width,
                still.height,
                state.still_ctrl.max_video_frame_size,
            )
        })
    }

    /// Re-probe the committed format with a new frame rate.
    ///
    /// Returns the time per frame the device accepted.
    pub fn set_stream_parm(
        &self,
        buf_type: BufType,
        time_per_frame: Fraction,
    ) -> Result<Fraction, UvcError> {
        self.check_type(buf_type)?;
        let interval = fraction_to_interval(time_per_frame.numerator, time_per_frame.denominator);
        debug!("Setting frame interval to {} ({})", time_per_frame, interval);

        let mut state = self.state.lock();
        if self.queue().is_streaming() {
            return Err(UvcError::Busy("streaming".to_string()));
        }
        let (_, frame) = state
            .current_frame(self.capabilities())
            .ok_or_else(|| UvcError::Unsupported("no format negotiated".to_string()))?;

        let mut probe = state.ctrl.clone();
        probe.frame_interval = best_interval(frame, interval);
        let negotiated = self.transport().probe_video(&probe)?;
        state.ctrl = negotiated;

        let accepted = interval_to_fraction(state.ctrl.frame_interval);
        info!("{}: frame interval set to {}", self.name(), accepted);
        Ok(accepted)
    }

    /// Committed time per frame. No device access.
    pub fn get_stream_parm(&self, buf_type: BufType) -> Result<Fraction, UvcError> {
        self.check_type(buf_type)?;
        Ok(interval_to_fraction(self.state.lock().ctrl.frame_interval))
    }

    /// Crop bounds of the committed frame
    pub fn crop_cap(&self, buf_type: BufType) -> Result<CropCap, UvcError> {
        self.check_type(buf_type)?;

        let state = self.state.lock();
        let (_, frame) = state
            .current_frame(self.capabilities())
            .ok_or_else(|| UvcError::Unsupported("no format negotiated".to_string()))?;
        let bounds = Rect {
            left: 0,
            top: 0,
            width: u32::from(frame.width),
            height: u32::from(frame.height),
        };
        Ok(CropCap {
            bounds,
            default_rect: bounds,
            pixel_aspect: Fraction::new(1, 1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::DeviceProfile;
    use crate::stream::tests::{mock_stream, mock_stream_with};
    use uvc_format::{CapabilitySet, FrameDescriptor, FrameIntervals};

    fn yuyv(width: u32, height: u32) -> FormatRequest {
        FormatRequest::new(BufType::VideoCapture, FourCc::YUYV, width, height)
    }

    #[test]
    fn test_try_format_does_not_commit() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        let pix = stream.try_format(&yuyv(330, 250)).unwrap();
        assert_eq!((pix.width, pix.height), (320, 240));
        assert_eq!(pix.field, Field::None);
        assert_eq!(pix.bytes_per_line, 640);
        assert_eq!(pix.size_image, 320 * 240 * 2);
        assert_eq!(transport.video_probes().len(), 1);
        assert!(stream.get_format(BufType::VideoCapture).is_err());
    }

    #[test]
    fn test_try_format_probe_fields() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        stream.try_format(&yuyv(640, 480)).unwrap();
        let probe = &transport.video_probes()[0];
        assert_eq!(probe.hint, HINT_FRAME_INTERVAL);
        assert_eq!(probe.format_index, 1);
        assert_eq!(probe.frame_index, 1);
        assert_eq!(probe.frame_interval, 333_333);
        assert_eq!(probe.max_video_frame_size, 0);
    }

    #[test]
    fn test_unknown_fourcc_is_unsupported() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        let request = FormatRequest::new(BufType::VideoCapture, FourCc::H264, 640, 480);
        assert!(matches!(stream.try_format(&request), Err(UvcError::Unsupported(_))));
        assert!(transport.video_probes().is_empty());
    }

    #[test]
    fn test_wrong_buffer_type() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        let request = FormatRequest::new(BufType::VideoOutput, FourCc::YUYV, 640, 480);
        assert!(matches!(stream.set_format(&request), Err(UvcError::InvalidArgument(_))));
        assert!(stream.get_stream_parm(BufType::VideoOutput).is_err());
    }

    #[test]
    fn test_set_and_get_format() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        let set = stream.set_format(&yuyv(640, 480)).unwrap();
        let got = stream.get_format(BufType::VideoCapture).unwrap();
        assert_eq!(set, got);
        assert_eq!(got.size_image, 614_400);
        assert_eq!(
            stream.get_stream_parm(BufType::VideoCapture).unwrap(),
            Fraction::new(1, 30)
        );
    }

    #[test]
    fn test_set_format_busy_with_buffers() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        stream.set_format(&yuyv(640, 480)).unwrap();
        stream.allocate_buffers(2).unwrap();

        assert!(matches!(stream.set_format(&yuyv(320, 240)), Err(UvcError::Busy(_))));
        assert_eq!(stream.get_format(BufType::VideoCapture).unwrap().width, 640);

        stream.allocate_buffers(0).unwrap();
        stream.set_format(&yuyv(320, 240)).unwrap();
    }

    #[test]
    fn test_failed_probe_keeps_committed_state() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        stream.set_format(&yuyv(640, 480)).unwrap();
        let before = stream.control();

        transport.fail_next_probe(UvcError::Transfer("stall".into()));
        assert!(stream.set_format(&yuyv(320, 240)).is_err());
        assert_eq!(stream.control(), before);
    }

    #[test]
    fn test_probe_quirks_prefill_previous_size() {
        let profile = DeviceProfile {
            probe_extrafields: true,
            ..Default::default()
        };
        let (stream, transport) = mock_stream(profile);
        stream.set_format(&yuyv(640, 480)).unwrap();
        stream.try_format(&yuyv(320, 240)).unwrap();

        let probes = transport.video_probes();
        assert_eq!(probes[0].max_video_frame_size, 0);
        assert_eq!(probes[1].max_video_frame_size, 614_400);
    }

    #[test]
    fn test_reduce_mem_usage_probe() {
        let (stream, transport) = mock_stream(DeviceProfile::quirky());
        let pix = stream.set_format(&yuyv(640, 480)).unwrap();
        assert_eq!(transport.video_probes()[0].max_video_frame_size, 122_880);
        assert_eq!(pix.size_image, 122_880);
    }

    #[test]
    fn test_stream_parm_snaps_to_supported_interval() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        stream.set_format(&yuyv(640, 480)).unwrap();

        let accepted = stream
            .set_stream_parm(BufType::VideoCapture, Fraction::new(1, 25))
            .unwrap();
        assert_eq!(transport.video_probes().last().unwrap().frame_interval, 333_333);
        assert_eq!(accepted, Fraction::new(1, 30));

        let accepted = stream
            .set_stream_parm(BufType::VideoCapture, Fraction::new(1, 12))
            .unwrap();
        assert_eq!(accepted, Fraction::new(1, 15));
        assert_eq!(
            stream.get_stream_parm(BufType::VideoCapture).unwrap(),
            Fraction::new(1, 15)
        );
    }

    #[test]
    fn test_stream_parm_busy_while_streaming() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        stream.set_format(&yuyv(640, 480)).unwrap();
        stream.stream_on().unwrap();
        assert!(matches!(
            stream.set_stream_parm(BufType::VideoCapture, Fraction::new(1, 15)),
            Err(UvcError::Busy(_))
        ));
        assert_eq!(
            stream.get_stream_parm(BufType::VideoCapture).unwrap(),
            Fraction::new(1, 30)
        );
    }

    #[test]
    fn test_size_match_uses_overlap_distance() {
        let frame = |index, width, height| FrameDescriptor {
            index,
            width,
            height,
            default_interval: 333_333,
            intervals: FrameIntervals::Discrete(vec![333_333]),
        };
        let caps = CapabilitySet::new(vec![FormatDescriptor {
            index: 1,
            fourcc: FourCc::YUYV,
            name: "YUYV".into(),
            bpp: 16,
            colorspace: ColorSpace::Srgb,
            compressed: false,
            frames: vec![frame(1, 320, 240), frame(2, 1280, 720)],
            still_sizes: vec![],
        }])
        .unwrap();
        let (stream, transport) = mock_stream_with(caps, DeviceProfile::default());

        let pix = stream.set_format(&yuyv(640, 480)).unwrap();
        assert_eq!((pix.width, pix.height), (320, 240));
        assert_eq!(transport.video_probes()[0].frame_index, 1);
    }

    #[test]
    fn test_stream_parm_needs_format() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert!(matches!(
            stream.set_stream_parm(BufType::VideoCapture, Fraction::new(1, 15)),
            Err(UvcError::Unsupported(_))
        ));
    }

    #[test]
    fn test_still_format_exact_size() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        let pix = stream.set_still_format(&yuyv(1280, 960).still()).unwrap();
        assert_eq!(pix.private, STILL_MAGIC);
        assert_eq!(pix.size_image, 1280 * 960 * 2);
        assert_eq!(transport.still_probes()[0].frame_index, 2);

        assert!(matches!(
            stream.set_still_format(&yuyv(1280, 961).still()),
            Err(UvcError::Unsupported(_))
        ));
        assert_eq!(
            stream.get_still_format(BufType::VideoCapture).unwrap(),
            pix
        );
    }

    #[test]
    fn test_still_format_busy_while_decoding() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        stream.begin_still_decode();
        assert!(matches!(
            stream.set_still_format(&yuyv(640, 480).still()),
            Err(UvcError::Busy(_))
        ));
        stream.end_still_decode();
        stream.set_still_format(&yuyv(640, 480).still()).unwrap();
    }

    #[test]
    fn test_still_format_replaces_still_queue() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        stream.set_still_format(&yuyv(640, 480).still()).unwrap();
        stream.allocate_still_buffers(1).unwrap();

        stream.set_still_format(&yuyv(1280, 960).still()).unwrap();
        assert!(!stream.still_queue().is_allocated());
        assert_eq!(
            stream.still_control().unwrap().max_video_frame_size,
            1280 * 960 * 2
        );
    }

    #[test]
    fn test_crop_cap() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert!(stream.crop_cap(BufType::VideoCapture).is_err());
        stream.set_format(&yuyv(320, 240)).unwrap();
        let cap = stream.crop_cap(BufType::VideoCapture).unwrap();
        assert_eq!(cap.bounds.width, 320);
        assert_eq!(cap.default_rect, cap.bounds);
        assert_eq!(cap.pixel_aspect, Fraction::new(1, 1));
    }
}
