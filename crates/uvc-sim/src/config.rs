//! Simulator configuration

use crate::error::SimError;
use serde::{Deserialize, Serialize};
use tracing::info;
use uvc_format::{CapabilitySet, FormatDescriptor, FourCc};
use uvc_stream::{DeviceProfile, MockTransport};

/// Prefix of environment overrides, e.g. `UVC_SIM_CAPTURE__FRAMES=10`
pub const ENV_PREFIX: &str = "UVC_SIM";

/// Default configuration file, looked up relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/uvc-sim";

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Max tracing level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Simulated device quirks
    pub device: DeviceProfile,

    /// Advertised formats. Empty means a stock webcam.
    pub formats: Vec<FormatDescriptor>,

    pub capture: CaptureConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            device: DeviceProfile::default(),
            formats: Vec::new(),
            capture: CaptureConfig::default(),
        }
    }
}

/// What the capture session asks for
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fourcc: FourCc,
    pub width: u32,
    pub height: u32,
    /// Requested frame rate
    pub fps: u32,
    pub buffers: u32,
    /// Frames to capture before stopping
    pub frames: u32,
    /// Still image to grab after streaming, if any
    pub still: Option<StillConfig>,
    /// Extra sessions that try, and fail, to take over the stream
    pub observers: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fourcc: FourCc::YUYV,
            width: 640,
            height: 480,
            fps: 30,
            buffers: 4,
            frames: 30,
            still: None,
            observers: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillConfig {
    pub width: u32,
    pub height: u32,
}

impl SimConfig {
    /// Load from `path` (or the default file, if present), then apply
    /// `UVC_SIM_*` environment overrides
    pub fn load(path: Option<&str>) -> Result<Self, SimError> {
        let file = match path {
            Some(path) => config::File::with_name(path),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<SimConfig>()?;

        info!(
            "Loaded configuration: device {}, {} formats",
            config.device.name,
            config.formats.len()
        );
        Ok(config)
    }

    /// Capability set of the simulated device
    pub fn capabilities(&self) -> Result<CapabilitySet, SimError> {
        if self.formats.is_empty() {
            return Ok(MockTransport::webcam_capabilities()?);
        }
        Ok(CapabilitySet::new(self.formats.clone())?)
    }
}
