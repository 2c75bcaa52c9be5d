//! Device transport seam
//!
//! The stream core never talks to USB directly. Probe/commit exchanges,
//! class-specific control requests, still triggers and streaming on/off
//! all go through a [`Transport`].

use crate::control::StreamingControl;
use crate::error::UvcError;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, info};
use uvc_format::{
    best_interval, CapabilitySet, ColorSpace, FormatDescriptor, FormatError, FourCc,
    FrameDescriptor, FrameIntervals, StillSize,
};

/// Class-specific control request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlQuery {
    SetCur,
    GetCur,
    GetMin,
    GetMax,
    GetRes,
    GetLen,
    GetInfo,
    GetDef,
}

impl ControlQuery {
    /// `bRequest` value on the wire
    pub fn code(self) -> u8 {
        match self {
            ControlQuery::SetCur => 0x01,
            ControlQuery::GetCur => 0x81,
            ControlQuery::GetMin => 0x82,
            ControlQuery::GetMax => 0x83,
            ControlQuery::GetRes => 0x84,
            ControlQuery::GetLen => 0x85,
            ControlQuery::GetInfo => 0x86,
            ControlQuery::GetDef => 0x87,
        }
    }
}

/// Device-facing operations used by the stream core
pub trait Transport: Send + Sync {
    /// Run a video probe exchange and return what the device accepted
    fn probe_video(&self, proposed: &StreamingControl) -> Result<StreamingControl, UvcError>;

    /// Run a still image probe exchange
    fn probe_still(&self, proposed: &StreamingControl) -> Result<StreamingControl, UvcError>;

    /// Issue a class-specific control request on `unit`
    fn query_ctrl(
        &self,
        query: ControlQuery,
        unit: u8,
        interface: u8,
        selector: u8,
        data: &mut [u8],
    ) -> Result<(), UvcError>;

    /// Ask the device to capture a still image
    fn trigger_still(&self) -> Result<(), UvcError>;

    /// Commit `control` and start, or stop, the isochronous stream
    fn set_streaming(&self, control: &StreamingControl, enable: bool) -> Result<(), UvcError>;
}

#[derive(Debug, Default)]
struct MockState {
    video_probes: Vec<StreamingControl>,
    still_probes: Vec<StreamingControl>,
    fail_next_probe: Option<UvcError>,
    fail_streaming: bool,
    streaming: bool,
    still_triggers: usize,
    controls: HashMap<(u8, u8), Vec<u8>>,
}

/// In-memory device used by tests and the simulator.
///
/// Negotiates against its own capability set the way a well behaved camera
/// does: unknown format or frame indices stall, intervals snap to the
/// closest supported value, and the max frame size is derived from the
/// frame geometry unless the host asked for less.
#[derive(Debug)]
pub struct MockTransport {
    caps: CapabilitySet,
    state: Mutex<MockState>,
}

/// Max payload transfer size reported by the mock device
pub const MOCK_MAX_PAYLOAD: u32 = 3072;

impl MockTransport {
    pub fn new(caps: CapabilitySet) -> Self {
        info!("Creating mock UVC transport with {} formats", caps.len());
        Self {
            caps,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Mock device with a typical webcam capability set
    pub fn mock() -> Self {
        Self::new(Self::webcam_capabilities().unwrap_or_default())
    }

    /// YUYV 640x480/320x240 with discrete intervals and MJPG 1280x720 with
    /// a stepwise range. YUYV offers two still sizes.
    pub fn webcam_capabilities() -> Result<CapabilitySet, FormatError> {
        let yuyv = FormatDescriptor {
            index: 1,
            fourcc: FourCc::YUYV,
            name: "YUV 4:2:2 (YUYV)".to_string(),
            bpp: 16,
            colorspace: ColorSpace::Srgb,
            compressed: false,
            frames: vec![
                FrameDescriptor {
                    index: 1,
                    width: 640,
                    height: 480,
                    default_interval: 333_333,
                    intervals: FrameIntervals::Discrete(vec![333_333, 666_666, 1_000_000]),
                },
                FrameDescriptor {
                    index: 2,
                    width: 320,
                    height: 240,
                    default_interval: 333_333,
                    intervals: FrameIntervals::Discrete(vec![333_333, 666_666]),
                },
            ],
            still_sizes: vec![
                StillSize { width: 640, height: 480 },
                StillSize { width: 1280, height: 960 },
            ],
        };
        let mjpg = FormatDescriptor {
            index: 2,
            fourcc: FourCc::MJPG,
            name: "Motion-JPEG".to_string(),
            bpp: 0,
            colorspace: ColorSpace::Jpeg,
            compressed: true,
            frames: vec![FrameDescriptor {
                index: 1,
                width: 1280,
                height: 720,
                default_interval: 333_333,
                intervals: FrameIntervals::Stepwise {
                    min: 333_333,
                    max: 2_000_000,
                    step: 333_333,
                },
            }],
            still_sizes: vec![],
        };

        CapabilitySet::new(vec![yuyv, mjpg])
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    /// Make the next probe (video or still) fail with `err`
    pub fn fail_next_probe(&self, err: UvcError) {
        self.state.lock().fail_next_probe = Some(err);
    }

    /// Make streaming start requests fail
    pub fn fail_streaming(&self, fail: bool) {
        self.state.lock().fail_streaming = fail;
    }

    /// Every video probe proposal received, in order
    pub fn video_probes(&self) -> Vec<StreamingControl> {
        self.state.lock().video_probes.clone()
    }

    pub fn still_probes(&self) -> Vec<StreamingControl> {
        self.state.lock().still_probes.clone()
    }

    pub fn still_triggers(&self) -> usize {
        self.state.lock().still_triggers
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().streaming
    }

    /// Preload the current value of a unit control
    pub fn set_control(&self, unit: u8, selector: u8, value: Vec<u8>) {
        self.state.lock().controls.insert((unit, selector), value);
    }

    pub fn control(&self, unit: u8, selector: u8) -> Option<Vec<u8>> {
        self.state.lock().controls.get(&(unit, selector)).cloned()
    }

    fn lookup(&self, format_index: u8) -> Result<&FormatDescriptor, UvcError> {
        self.caps
            .formats()
            .iter()
            .find(|f| f.index == format_index)
            .ok_or_else(|| UvcError::Transfer(format!("probe stalled: format {}", format_index)))
    }

    /// Uncompressed frame size, saturated to the 32-bit control field
    fn frame_bytes(format: &FormatDescriptor, width: u16, height: u16) -> u32 {
        let pixels = u64::from(width) * u64::from(height);
        let bytes = match format.bpp {
            0 => pixels * 2,
            bpp => pixels * u64::from(bpp) / 8,
        };
        u32::try_from(bytes).unwrap_or(u32::MAX)
    }
}

impl Transport for MockTransport {
    fn probe_video(&self, proposed: &StreamingControl) -> Result<StreamingControl, UvcError> {
        let mut state = self.state.lock();
        state.video_probes.push(proposed.clone());
        if let Some(err) = state.fail_next_probe.take() {
            return Err(err);
        }

        let format = self.lookup(proposed.format_index)?;
        let frame = format.frame(proposed.frame_index).ok_or_else(|| {
            UvcError::Transfer(format!("probe stalled: frame {}", proposed.frame_index))
        })?;

        let requested = match proposed.frame_interval {
            0 => frame.default_interval,
            interval => interval,
        };
        let full_size = Self::frame_bytes(format, frame.width, frame.height);
        let max_video_frame_size = match proposed.max_video_frame_size {
            0 => full_size,
            size => size.min(full_size),
        };

        let negotiated = StreamingControl {
            frame_interval: best_interval(frame, requested),
            max_video_frame_size,
            max_payload_transfer_size: MOCK_MAX_PAYLOAD,
            ..proposed.clone()
        };
        debug!("Mock probe negotiated {:?}", negotiated);
        Ok(negotiated)
    }

    fn probe_still(&self, proposed: &StreamingControl) -> Result<StreamingControl, UvcError> {
        let mut state = self.state.lock();
        state.still_probes.push(proposed.clone());
        if let Some(err) = state.fail_next_probe.take() {
            return Err(err);
        }

        let format = self.lookup(proposed.format_index)?;
        let still = usize::from(proposed.frame_index)
            .checked_sub(1)
            .and_then(|i| format.still_sizes.get(i))
            .ok_or_else(|| {
                UvcError::Transfer(format!("still probe stalled: image {}", proposed.frame_index))
            })?;

        Ok(StreamingControl {
            max_video_frame_size: Self::frame_bytes(format, still.width, still.height),
            max_payload_transfer_size: MOCK_MAX_PAYLOAD,
            ..proposed.clone()
        })
    }

    fn query_ctrl(
        &self,
        query: ControlQuery,
        unit: u8,
        _interface: u8,
        selector: u8,
        data: &mut [u8],
    ) -> Result<(), UvcError> {
        let mut state = self.state.lock();
        let key = (unit, selector);
        match query {
            ControlQuery::SetCur => {
                state.controls.insert(key, data.to_vec());
                Ok(())
            }
            ControlQuery::GetCur | ControlQuery::GetDef => {
                let value = state.controls.get(&key).ok_or_else(|| {
                    UvcError::Transfer(format!("unit {} selector {} stalled", unit, selector))
                })?;
                let n = value.len().min(data.len());
                data[..n].copy_from_slice(&value[..n]);
                Ok(())
            }
            ControlQuery::GetLen => {
                let len = state.controls.get(&key).map(Vec::len).ok_or_else(|| {
                    UvcError::Transfer(format!("unit {} selector {} stalled", unit, selector))
                })?;
                if data.len() < 2 {
                    return Err(UvcError::Transfer("GET_LEN needs two bytes".to_string()));
                }
                let len = u16::try_from(len).unwrap_or(u16::MAX);
                data[..2].copy_from_slice(&len.to_le_bytes());
                Ok(())
            }
            ControlQuery::GetInfo => {
                if let Some(byte) = data.first_mut() {
                    // Supports GET and SET
                    *byte = 0x03;
                }
                Ok(())
            }
            ControlQuery::GetMin | ControlQuery::GetMax | ControlQuery::GetRes => Err(
                UvcError::Transfer(format!("{:?} not implemented by mock device", query)),
            ),
        }
    }

    fn trigger_still(&self) -> Result<(), UvcError> {
        self.state.lock().still_triggers += 1;
        Ok(())
    }

    fn set_streaming(&self, control: &StreamingControl, enable: bool) -> Result<(), UvcError> {
        let mut state = self.state.lock();
        if enable && state.fail_streaming {
            return Err(UvcError::Transfer("alternate setting rejected".to_string()));
        }
        debug!(
            "Mock streaming {} (format {}, frame {})",
            if enable { "on" } else { "off" },
            control.format_index,
            control.frame_index
        );
        state.streaming = enable;
        Ok(())
    }
}
