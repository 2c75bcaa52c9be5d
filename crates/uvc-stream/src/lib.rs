//! UVC Streaming Core
//!
//! Stream-side logic of a USB Video Class device:
//! - Format negotiation through probe exchanges with the device
//! - Main and still image buffer queues
//! - Single-owner privilege arbitration between open sessions
//! - Request dispatch for client sessions
//!
//! Device I/O is abstracted behind [`Transport`].

mod arbiter;
mod control;
mod dispatcher;
mod error;
mod negotiator;
mod session;
mod stream;
mod transport;
mod xu;

pub use arbiter::{HandleState, PrivilegeArbiter};
pub use control::{DeviceProfile, SelectorUnit, StreamingControl, HINT_FRAME_INTERVAL};
pub use dispatcher::{
    BufferRequest, BufferSpec, BufferStatus, FormatDesc, LegacyRequest, Request, Response,
    StreamParm, CAP_TIMEPERFRAME,
};
pub use error::UvcError;
pub use negotiator::{CropCap, Field, FormatRequest, PixFormat, Rect};
pub use session::Session;
pub use stream::Stream;
pub use transport::{ControlQuery, MockTransport, Transport, MOCK_MAX_PAYLOAD};
pub use xu::XuQuery;

use serde::{Deserialize, Serialize};

/// Marker routing format and buffer requests to the still image path
pub const STILL_MAGIC: u32 = 0x5354_494C;

/// Buffer type of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufType {
    VideoCapture,
    VideoOutput,
}

/// Buffer memory model requested by the client. Only `Mmap` is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Memory {
    Mmap,
    UserPtr,
    Overlay,
}
