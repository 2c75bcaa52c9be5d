//! Capture Buffer Queue
//!
//! Fixed set of capture buffers shared between a client, the queue and the
//! device transport. Every buffer has exactly one owner at a time; the queue
//! is the only component allowed to move a buffer between owners.

mod buffer;
mod queue;

pub use buffer::{BufferInfo, BufferState, FillSlot};
pub use queue::{FrameQueue, QueueKind};

use thiserror::Error;

/// Maximum number of buffers a queue will allocate
pub const MAX_BUFFERS: usize = 32;

/// Buffer lengths are rounded up to this granularity
pub const PAGE_SIZE: usize = 4096;

/// Errors returned by queue operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueError {
    /// Buffer index outside the allocated range
    #[error("Buffer index {index} out of range (allocated {count})")]
    InvalidIndex { index: usize, count: usize },

    /// Buffer is not in a state that allows the transition
    #[error("Buffer {index} is {state:?}")]
    InvalidState { index: usize, state: BufferState },

    /// Nothing queued, in flight or ready: a dequeue could never complete
    #[error("Empty buffer queue")]
    Empty,

    /// Buffer size of zero requested
    #[error("Buffer size must be non-zero")]
    ZeroSize,

    /// Buffers in use or streaming in progress
    #[error("Queue busy: {0}")]
    Busy(&'static str),

    /// Non-blocking dequeue with nothing ready
    #[error("No buffer ready")]
    WouldBlock,

    /// Device disconnected
    #[error("Queue disconnected")]
    Disconnected,

    /// Wait aborted by an external interruption
    #[error("Wait interrupted")]
    Interrupted,

    /// Not even one buffer could be allocated
    #[error("Out of memory allocating {count} x {size} bytes")]
    OutOfMemory { count: usize, size: usize },
}

/// Round `size` up to a multiple of [`PAGE_SIZE`]
pub fn page_align(size: usize) -> usize {
    size.div_ceil(PAGE_SIZE) * PAGE_SIZE
}
