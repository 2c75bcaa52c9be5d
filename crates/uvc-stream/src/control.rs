//! Streaming control block and per-device quirk profile

use serde::{Deserialize, Serialize};
use tracing::debug;
use uvc_format::FrameDescriptor;

/// `bmHint` bit: keep the frame interval fixed during negotiation
pub const HINT_FRAME_INTERVAL: u16 = 0x0001;

/// Probe/commit parameter block exchanged with the device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingControl {
    pub hint: u16,
    /// One-based format index
    pub format_index: u8,
    /// One-based frame index (still image index for still controls)
    pub frame_index: u8,
    /// Frame interval in 100 ns units
    pub frame_interval: u32,
    pub max_video_frame_size: u32,
    pub max_payload_transfer_size: u32,
}

/// Selector unit routing several inputs into the video chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorUnit {
    pub id: u8,
    /// Number of input pins
    pub inputs: u8,
}

/// Device profile: identification and behavioural quirks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Human readable device name
    pub name: String,

    /// Interface number of the video control interface
    pub control_interface: u8,

    /// Device requires the previous max frame size in probe requests
    pub probe_extrafields: bool,

    /// Device over-reports its max frame size; request a reduced one
    pub reduce_mem_usage: bool,

    /// Selector unit is present but must not be addressed
    pub ignore_selector_unit: bool,

    /// Input selector, if the video chain has one
    pub selector: Option<SelectorUnit>,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            name: "UVC Camera".to_string(),
            control_interface: 0,
            probe_extrafields: false,
            reduce_mem_usage: false,
            ignore_selector_unit: false,
            selector: None,
        }
    }
}

impl DeviceProfile {
    /// Profile for devices with broken probe handling
    pub fn quirky() -> Self {
        Self {
            name: "UVC Camera (quirks)".to_string(),
            probe_extrafields: true,
            reduce_mem_usage: true,
            ..Default::default()
        }
    }

    /// Whether input selection goes through a selector unit
    pub fn uses_selector(&self) -> Option<SelectorUnit> {
        if self.ignore_selector_unit {
            None
        } else {
            self.selector
        }
    }

    /// Pre-fill `max_video_frame_size` of a probe request as required by
    /// the device quirks.
    ///
    /// `committed` is the currently committed control; `frame` is the frame
    /// selected for the probe. Reduced memory usage wins when both apply.
    pub fn apply_probe_quirks(
        &self,
        probe: &mut StreamingControl,
        committed: &StreamingControl,
        frame: &FrameDescriptor,
    ) {
        if self.probe_extrafields {
            probe.max_video_frame_size = committed.max_video_frame_size;
        }
        if self.reduce_mem_usage {
            let size = u64::from(frame.width) * u64::from(frame.height) * 2 / 5;
            let size = u32::try_from(size).unwrap_or(u32::MAX);
            debug!("Reducing requested max frame size to {} bytes", size);
            probe.max_video_frame_size = size;
        }
    }
}
