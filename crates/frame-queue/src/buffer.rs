//! Capture buffer and its ownership state

use crate::QueueKind;

/// Buffer state. The state encodes the current owner:
/// `Idle`, `Queued`, `Done` and `Error` are queue-owned, `Active` is
/// device-owned and `Dequeued` is client-owned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Allocated (or reclaimed by stream off), never handed out
    Idle,
    /// Waiting for the transport to pick it up
    Queued,
    /// Being filled by the transport
    Active,
    /// Filled, in the ready list
    Done,
    /// Completed with an error, in the ready list
    Error,
    /// Handed to the client by a dequeue
    Dequeued,
}

impl BufferState {
    pub fn is_device_owned(self) -> bool {
        self == BufferState::Active
    }

    pub fn is_client_owned(self) -> bool {
        self == BufferState::Dequeued
    }

    /// States a client may enqueue from
    pub fn can_enqueue(self) -> bool {
        matches!(self, BufferState::Idle | BufferState::Dequeued)
    }
}

/// Snapshot of a buffer, as returned by query and dequeue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: usize,
    pub kind: QueueKind,
    /// Allocated length in bytes
    pub length: usize,
    /// Offset of the buffer in the queue's mapping space
    pub offset: u64,
    pub bytes_used: usize,
    pub state: BufferState,
    /// Frame completed with an error (overflow, transport failure)
    pub error: bool,
    pub sequence: u32,
    pub timestamp_ns: u64,
}

/// Buffer handed to the transport by `FrameQueue::start_fill`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillSlot {
    pub index: usize,
    pub capacity: usize,
}

/// One capture slot
#[derive(Debug)]
pub(crate) struct Buffer {
    pub index: usize,
    pub offset: u64,
    pub state: BufferState,
    pub bytes_used: usize,
    pub error: bool,
    pub sequence: u32,
    pub timestamp_ns: u64,
    pub data: Vec<u8>,
}

impl Buffer {
    pub fn new(index: usize, data: Vec<u8>) -> Self {
        Self {
            index,
            offset: (index * data.len()) as u64,
            state: BufferState::Idle,
            bytes_used: 0,
            error: false,
            sequence: 0,
            timestamp_ns: 0,
            data,
        }
    }

    pub fn info(&self, kind: QueueKind) -> BufferInfo {
        BufferInfo {
            index: self.index,
            kind,
            length: self.data.len(),
            offset: self.offset,
            bytes_used: self.bytes_used,
            state: self.state,
            error: self.error,
            sequence: self.sequence,
            timestamp_ns: self.timestamp_ns,
        }
    }

    /// Return to the queue as a fresh, empty buffer
    pub fn reset(&mut self, state: BufferState) {
        self.state = state;
        self.bytes_used = 0;
        self.error = false;
    }
}
