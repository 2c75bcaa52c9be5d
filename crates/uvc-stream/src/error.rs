//! UVC Stream Error Types

use frame_queue::QueueError;
use thiserror::Error;

/// Errors returned by stream, session and dispatcher operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UvcError {
    /// Malformed request, wrong buffer type or memory model, bad index
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested format or size not offered by the device
    #[error("Not supported: {0}")]
    Unsupported(String),

    /// Another handle owns streaming, or the stream is in a conflicting state
    #[error("Device busy: {0}")]
    Busy(String),

    /// Device detached
    #[error("Device disconnected")]
    DeviceGone,

    /// Blocking wait aborted
    #[error("Interrupted while waiting")]
    Interrupted,

    /// Buffer allocation failed
    #[error("Out of memory")]
    OutOfMemory,

    /// Caller-supplied payload could not be read or written
    #[error("Bad address: {0}")]
    Fault(String),

    /// Non-blocking dequeue with nothing ready
    #[error("Resource temporarily unavailable")]
    WouldBlock,

    /// Transport request to the device failed
    #[error("Transfer error: {0}")]
    Transfer(String),
}

impl UvcError {
    /// Positive errno value for callers bridging to a C ABI
    pub fn errno(&self) -> i32 {
        match self {
            UvcError::InvalidArgument(_) | UvcError::Unsupported(_) => libc::EINVAL,
            UvcError::Busy(_) => libc::EBUSY,
            UvcError::DeviceGone => libc::ENODEV,
            UvcError::Interrupted => libc::EINTR,
            UvcError::OutOfMemory => libc::ENOMEM,
            UvcError::Fault(_) => libc::EFAULT,
            UvcError::WouldBlock => libc::EAGAIN,
            UvcError::Transfer(_) => libc::EIO,
        }
    }
}

impl From<QueueError> for UvcError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::InvalidIndex { .. }
            | QueueError::InvalidState { .. }
            | QueueError::Empty
            | QueueError::ZeroSize => UvcError::InvalidArgument(err.to_string()),
            QueueError::Busy(reason) => UvcError::Busy(reason.to_string()),
            QueueError::WouldBlock => UvcError::WouldBlock,
            QueueError::Disconnected => UvcError::DeviceGone,
            QueueError::Interrupted => UvcError::Interrupted,
            QueueError::OutOfMemory { .. } => UvcError::OutOfMemory,
        }
    }
}
