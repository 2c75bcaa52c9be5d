//! Frame queue implementation

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::buffer::Buffer;
use crate::{page_align, BufferInfo, BufferState, FillSlot, QueueError, MAX_BUFFERS};

/// Which pipeline a queue serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// Continuous video stream, filled only while streaming
    Video,
    /// Single-shot still images, filled on demand
    Still,
}

impl QueueKind {
    fn fills_only_while_streaming(self) -> bool {
        self == QueueKind::Video
    }
}

struct QueueInner {
    buffers: Vec<Buffer>,
    /// Queued buffers in submission order
    pending: VecDeque<usize>,
    /// Completed buffers in arrival order
    ready: VecDeque<usize>,
    streaming: bool,
    disconnected: bool,
    /// Bumped by `interrupt()`; waiters compare against the value seen on entry
    interrupt_epoch: u64,
    sequence: u32,
}

impl QueueInner {
    fn buffer_mut(&mut self, index: usize) -> Result<&mut Buffer, QueueError> {
        let count = self.buffers.len();
        self.buffers
            .get_mut(index)
            .ok_or(QueueError::InvalidIndex { index, count })
    }

    fn in_flight(&self) -> bool {
        !self.pending.is_empty()
            || self.buffers.iter().any(|b| b.state.is_device_owned())
    }

    fn release(&mut self) -> Result<(), QueueError> {
        if self.streaming {
            return Err(QueueError::Busy("streaming"));
        }
        if let Some(b) = self
            .buffers
            .iter()
            .find(|b| b.state.is_device_owned() || b.state.is_client_owned())
        {
            debug!("Buffer {} still {:?}, refusing to free", b.index, b.state);
            return Err(QueueError::Busy("buffers in use"));
        }
        self.buffers.clear();
        self.pending.clear();
        self.ready.clear();
        Ok(())
    }

    /// Return every buffer to the queue and forget pending/ready lists
    fn cancel(&mut self) {
        for buffer in &mut self.buffers {
            buffer.reset(BufferState::Idle);
        }
        self.pending.clear();
        self.ready.clear();
    }
}

/// Capture buffer queue.
///
/// One instance per pipeline; a stream owns a `Video` and a `Still` queue.
/// All state transitions happen under the internal lock, blocking dequeues
/// park on the queue's own condition variable.
pub struct FrameQueue {
    kind: QueueKind,
    inner: Mutex<QueueInner>,
    ready_cond: Condvar,
}

impl FrameQueue {
    /// Create an empty, unallocated queue
    pub fn new(kind: QueueKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(QueueInner {
                buffers: Vec::new(),
                pending: VecDeque::new(),
                ready: VecDeque::new(),
                streaming: false,
                disconnected: false,
                interrupt_epoch: 0,
                sequence: 0,
            }),
            ready_cond: Condvar::new(),
        }
    }

    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// Allocate `count` buffers of at least `size` bytes.
    ///
    /// Any previous allocation is freed first. A count of zero only frees.
    /// The count is clamped to [`MAX_BUFFERS`] and reduced further if memory
    /// runs short. Returns the number of buffers actually allocated.
    pub fn allocate(&self, count: usize, size: usize) -> Result<usize, QueueError> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(QueueError::Disconnected);
        }
        inner.release()?;
        // Waiters parked on the old buffer set see an empty queue
        self.ready_cond.notify_all();

        if count == 0 {
            debug!("{:?} queue freed", self.kind);
            return Ok(0);
        }
        if size == 0 {
            return Err(QueueError::ZeroSize);
        }

        let size = page_align(size);
        let requested = count.min(MAX_BUFFERS);

        for n in (1..=requested).rev() {
            if let Some(buffers) = try_allocate(n, size) {
                if n < requested {
                    warn!("{:?} queue: only {} of {} buffers fit in memory", self.kind, n, requested);
                }
                inner.buffers = buffers;
                debug!("{:?} queue: allocated {} x {} bytes", self.kind, n, size);
                return Ok(n);
            }
        }

        Err(QueueError::OutOfMemory { count: requested, size })
    }

    /// Free all buffers. Fails while streaming or while any buffer is
    /// device- or client-owned.
    pub fn free(&self) -> Result<(), QueueError> {
        self.inner.lock().release()?;
        self.ready_cond.notify_all();
        Ok(())
    }

    pub fn is_allocated(&self) -> bool {
        !self.inner.lock().buffers.is_empty()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.lock().streaming
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().disconnected
    }

    /// Number of allocated buffers
    pub fn len(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of completed buffers waiting for a dequeue
    pub fn ready_count(&self) -> usize {
        self.inner.lock().ready.len()
    }

    /// Number of queued buffers not yet picked up by the transport
    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Snapshot of one buffer
    pub fn query(&self, index: usize) -> Result<BufferInfo, QueueError> {
        let mut inner = self.inner.lock();
        let kind = self.kind;
        inner.buffer_mut(index).map(|b| b.info(kind))
    }

    /// Hand a buffer to the queue so the transport can fill it
    pub fn enqueue(&self, index: usize) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if inner.disconnected {
            return Err(QueueError::Disconnected);
        }

        let buffer = inner.buffer_mut(index)?;
        if !buffer.state.can_enqueue() {
            return Err(QueueError::InvalidState { index, state: buffer.state });
        }
        buffer.reset(BufferState::Queued);
        inner.pending.push_back(index);

        trace!("{:?} queue: buffer {} queued", self.kind, index);
        Ok(())
    }

    /// Take the oldest completed buffer, handing it to the client.
    ///
    /// Without `non_blocking` the caller sleeps until a buffer completes,
    /// the queue is disconnected or `interrupt()` is called.
    pub fn dequeue(&self, non_blocking: bool) -> Result<BufferInfo, QueueError> {
        let mut inner = self.inner.lock();
        let epoch = inner.interrupt_epoch;

        loop {
            if inner.disconnected {
                return Err(QueueError::Disconnected);
            }

            if let Some(index) = inner.ready.pop_front() {
                let kind = self.kind;
                let buffer = &mut inner.buffers[index];
                buffer.state = BufferState::Dequeued;
                trace!("{:?} queue: buffer {} dequeued (seq {})", kind, index, buffer.sequence);
                return Ok(buffer.info(kind));
            }

            if !inner.in_flight() {
                return Err(QueueError::Empty);
            }
            if non_blocking {
                return Err(QueueError::WouldBlock);
            }
            if inner.interrupt_epoch != epoch {
                return Err(QueueError::Interrupted);
            }

            self.ready_cond.wait(&mut inner);
        }
    }

    /// Copy of the filled part of a client-owned buffer
    pub fn payload(&self, index: usize) -> Result<Vec<u8>, QueueError> {
        let mut inner = self.inner.lock();
        let buffer = inner.buffer_mut(index)?;
        if !buffer.state.is_client_owned() {
            return Err(QueueError::InvalidState { index, state: buffer.state });
        }
        Ok(buffer.data[..buffer.bytes_used].to_vec())
    }

    /// Start or stop streaming.
    ///
    /// Stopping reclaims every buffer: in-flight, ready and client-owned
    /// buffers all go back to `Idle`.
    pub fn enable(&self, enable: bool) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        if enable {
            if inner.streaming {
                return Err(QueueError::Busy("already streaming"));
            }
            if inner.disconnected {
                return Err(QueueError::Disconnected);
            }
            inner.streaming = true;
            inner.sequence = 0;
        } else {
            inner.streaming = false;
            inner.cancel();
            self.ready_cond.notify_all();
        }
        debug!("{:?} queue streaming: {}", self.kind, enable);
        Ok(())
    }

    /// Wake every waiter with a terminal error. Irreversible.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.disconnected = true;
        inner.streaming = false;
        for buffer in &mut inner.buffers {
            if matches!(buffer.state, BufferState::Queued | BufferState::Active) {
                buffer.state = BufferState::Error;
                buffer.error = true;
            }
        }
        inner.pending.clear();
        inner.ready.clear();
        self.ready_cond.notify_all();
    }

    /// Abort all waits currently parked in `dequeue`. Buffers are untouched.
    pub fn interrupt(&self) {
        let mut inner = self.inner.lock();
        inner.interrupt_epoch = inner.interrupt_epoch.wrapping_add(1);
        self.ready_cond.notify_all();
    }

    // Transport side

    /// Claim the oldest queued buffer for filling (device-owned from now on)
    pub fn start_fill(&self) -> Option<FillSlot> {
        let mut inner = self.inner.lock();
        if inner.disconnected || (self.kind.fills_only_while_streaming() && !inner.streaming) {
            return None;
        }

        let index = inner.pending.pop_front()?;
        let buffer = &mut inner.buffers[index];
        buffer.state = BufferState::Active;
        Some(FillSlot { index, capacity: buffer.data.len() })
    }

    /// Complete a device-owned buffer with `payload` and wake one waiter.
    ///
    /// A payload larger than the buffer is truncated and flagged as an error.
    pub fn complete(&self, index: usize, payload: &[u8], timestamp_ns: u64) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let sequence = inner.sequence;
        let kind = self.kind;
        let buffer = inner.buffer_mut(index)?;
        if !buffer.state.is_device_owned() {
            return Err(QueueError::InvalidState { index, state: buffer.state });
        }

        let used = payload.len().min(buffer.data.len());
        buffer.data[..used].copy_from_slice(&payload[..used]);
        buffer.bytes_used = used;
        buffer.sequence = sequence;
        buffer.timestamp_ns = timestamp_ns;
        if used < payload.len() {
            warn!("{:?} queue: frame overflow ({} > {} bytes)", kind, payload.len(), used);
            buffer.error = true;
            buffer.state = BufferState::Error;
        } else {
            buffer.state = BufferState::Done;
        }

        inner.sequence = sequence.wrapping_add(1);
        inner.ready.push_back(index);
        self.ready_cond.notify_one();
        Ok(())
    }

    /// Complete a device-owned buffer as failed and wake one waiter
    pub fn fail(&self, index: usize, timestamp_ns: u64) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let sequence = inner.sequence;
        let buffer = inner.buffer_mut(index)?;
        if !buffer.state.is_device_owned() {
            return Err(QueueError::InvalidState { index, state: buffer.state });
        }
        buffer.state = BufferState::Error;
        buffer.error = true;
        buffer.bytes_used = 0;
        buffer.sequence = sequence;
        buffer.timestamp_ns = timestamp_ns;

        inner.sequence = sequence.wrapping_add(1);
        inner.ready.push_back(index);
        self.ready_cond.notify_one();
        Ok(())
    }
}

/// Allocate `count` zeroed buffers of `size` bytes, `None` if memory runs out
fn try_allocate(count: usize, size: usize) -> Option<Vec<Buffer>> {
    let mut buffers = Vec::new();
    buffers.try_reserve_exact(count).ok()?;
    for index in 0..count {
        let mut data = Vec::new();
        data.try_reserve_exact(size).ok()?;
        data.resize(size, 0);
        buffers.push(Buffer::new(index, data));
    }
    Some(buffers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn streaming_queue(count: usize) -> FrameQueue {
        let queue = FrameQueue::new(QueueKind::Video);
        assert_eq!(queue.allocate(count, 1000).unwrap(), count);
        queue.enable(true).unwrap();
        queue
    }

    fn fill_next(queue: &FrameQueue, payload: &[u8]) -> usize {
        let slot = queue.start_fill().expect("a queued buffer");
        queue.complete(slot.index, payload, 42).unwrap();
        slot.index
    }

    #[test]
    fn test_allocate_clamps_and_aligns() {
        let queue = FrameQueue::new(QueueKind::Video);
        assert_eq!(queue.allocate(100, 1000).unwrap(), MAX_BUFFERS);
        let info = queue.query(1).unwrap();
        assert_eq!(info.length, 4096);
        assert_eq!(info.offset, 4096);
        assert_eq!(info.state, BufferState::Idle);
    }

    #[test]
    fn test_allocate_zero_frees() {
        let queue = FrameQueue::new(QueueKind::Video);
        queue.allocate(4, 1000).unwrap();
        assert_eq!(queue.allocate(0, 1000).unwrap(), 0);
        assert!(!queue.is_allocated());
    }

    #[test]
    fn test_allocate_zero_size_rejected() {
        let queue = FrameQueue::new(QueueKind::Video);
        assert_eq!(queue.allocate(4, 0), Err(QueueError::ZeroSize));
    }

    #[test]
    fn test_query_out_of_range() {
        let queue = FrameQueue::new(QueueKind::Video);
        queue.allocate(2, 10).unwrap();
        assert_eq!(queue.query(2), Err(QueueError::InvalidIndex { index: 2, count: 2 }));
    }

    #[test]
    fn test_enqueue_twice_rejected() {
        let queue = streaming_queue(2);
        queue.enqueue(0).unwrap();
        assert_eq!(
            queue.enqueue(0),
            Err(QueueError::InvalidState { index: 0, state: BufferState::Queued })
        );
    }

    #[test]
    fn test_fifo_order() {
        let queue = streaming_queue(3);
        for i in [2, 0, 1] {
            queue.enqueue(i).unwrap();
        }
        for payload in [b"a", b"b", b"c"] {
            fill_next(&queue, payload);
        }

        let order: Vec<_> = (0..3).map(|_| queue.dequeue(true).unwrap()).collect();
        assert_eq!(order.iter().map(|b| b.index).collect::<Vec<_>>(), vec![2, 0, 1]);
        assert_eq!(order.iter().map(|b| b.sequence).collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(queue.payload(0).unwrap(), b"b");
    }

    #[test]
    fn test_non_blocking_would_block() {
        let queue = streaming_queue(2);
        queue.enqueue(0).unwrap();
        assert_eq!(queue.dequeue(true), Err(QueueError::WouldBlock));
    }

    #[test]
    fn test_dequeue_empty_queue() {
        let queue = streaming_queue(2);
        assert_eq!(queue.dequeue(false), Err(QueueError::Empty));
    }

    #[test]
    fn test_dequeued_buffer_can_be_requeued() {
        let queue = streaming_queue(1);
        queue.enqueue(0).unwrap();
        fill_next(&queue, b"frame");
        let info = queue.dequeue(true).unwrap();
        assert_eq!(info.state, BufferState::Dequeued);
        assert_eq!(info.bytes_used, 5);
        queue.enqueue(0).unwrap();
        assert_eq!(queue.query(0).unwrap().bytes_used, 0);
    }

    #[test]
    fn test_free_busy_while_client_owned() {
        let queue = FrameQueue::new(QueueKind::Still);
        queue.allocate(2, 100).unwrap();
        queue.enqueue(0).unwrap();
        fill_next(&queue, b"still");
        queue.dequeue(true).unwrap();
        assert_eq!(queue.free(), Err(QueueError::Busy("buffers in use")));

        queue.enqueue(0).unwrap();
        queue.free().unwrap();
        assert!(!queue.is_allocated());
    }

    #[test]
    fn test_free_busy_while_device_owned() {
        let queue = FrameQueue::new(QueueKind::Still);
        queue.allocate(1, 100).unwrap();
        queue.enqueue(0).unwrap();
        queue.start_fill().unwrap();
        assert_eq!(queue.free(), Err(QueueError::Busy("buffers in use")));
    }

    #[test]
    fn test_free_busy_while_streaming() {
        let queue = streaming_queue(2);
        assert_eq!(queue.free(), Err(QueueError::Busy("streaming")));
        assert_eq!(queue.allocate(0, 0), Err(QueueError::Busy("streaming")));
    }

    #[test]
    fn test_stream_off_reclaims_buffers() {
        let queue = streaming_queue(3);
        queue.enqueue(0).unwrap();
        queue.enqueue(1).unwrap();
        fill_next(&queue, b"x");
        queue.dequeue(true).unwrap();
        queue.start_fill().unwrap();

        queue.enable(false).unwrap();
        for i in 0..3 {
            assert_eq!(queue.query(i).unwrap().state, BufferState::Idle);
        }
        queue.free().unwrap();
    }

    #[test]
    fn test_video_queue_fills_only_while_streaming() {
        let queue = FrameQueue::new(QueueKind::Video);
        queue.allocate(1, 100).unwrap();
        queue.enqueue(0).unwrap();
        assert!(queue.start_fill().is_none());
        queue.enable(true).unwrap();
        assert!(queue.start_fill().is_some());
    }

    #[test]
    fn test_overflow_marks_error() {
        let queue = FrameQueue::new(QueueKind::Still);
        queue.allocate(1, 10).unwrap();
        queue.enqueue(0).unwrap();
        fill_next(&queue, &vec![7u8; 5000]);
        let info = queue.dequeue(true).unwrap();
        assert!(info.error);
        assert_eq!(info.bytes_used, 4096);
    }

    #[test]
    fn test_failed_frame_delivered_with_error() {
        let queue = streaming_queue(1);
        queue.enqueue(0).unwrap();
        let slot = queue.start_fill().unwrap();
        queue.fail(slot.index, 0).unwrap();
        let info = queue.dequeue(true).unwrap();
        assert!(info.error);
        assert_eq!(info.bytes_used, 0);
    }

    #[test]
    fn test_complete_requires_device_ownership() {
        let queue = streaming_queue(1);
        queue.enqueue(0).unwrap();
        assert_eq!(
            queue.complete(0, b"x", 0),
            Err(QueueError::InvalidState { index: 0, state: BufferState::Queued })
        );
    }

    #[test]
    fn test_blocking_dequeue_wakes_on_completion() {
        let queue = Arc::new(streaming_queue(1));
        queue.enqueue(0).unwrap();

        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                fill_next(&queue, b"late");
            })
        };

        let info = queue.dequeue(false).unwrap();
        assert_eq!(info.bytes_used, 4);
        producer.join().unwrap();
    }

    #[test]
    fn test_disconnect_wakes_waiters() {
        let queue = Arc::new(streaming_queue(2));
        queue.enqueue(0).unwrap();

        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || queue.dequeue(false))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        queue.disconnect();
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Err(QueueError::Disconnected));
        }
        assert_eq!(queue.enqueue(1), Err(QueueError::Disconnected));
    }

    #[test]
    fn test_interrupt_leaves_buffer_state() {
        let queue = Arc::new(streaming_queue(1));
        queue.enqueue(0).unwrap();

        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.dequeue(false))
        };

        // Keep interrupting until the waiter has parked and observed it.
        while !waiter.is_finished() {
            queue.interrupt();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(waiter.join().unwrap(), Err(QueueError::Interrupted));
        assert_eq!(queue.query(0).unwrap().state, BufferState::Queued);
        assert_eq!(queue.pending_count(), 1);
    }

    fn parked_still_waiter() -> (Arc<FrameQueue>, std::thread::JoinHandle<Result<BufferInfo, QueueError>>) {
        let queue = Arc::new(FrameQueue::new(QueueKind::Still));
        queue.allocate(1, 100).unwrap();
        queue.enqueue(0).unwrap();

        let waiter = {
            let queue = queue.clone();
            std::thread::spawn(move || queue.dequeue(false))
        };
        std::thread::sleep(Duration::from_millis(20));
        (queue, waiter)
    }

    fn join_within(
        waiter: std::thread::JoinHandle<Result<BufferInfo, QueueError>>,
        limit: Duration,
    ) -> Result<BufferInfo, QueueError> {
        let deadline = std::time::Instant::now() + limit;
        while !waiter.is_finished() {
            assert!(std::time::Instant::now() < deadline, "waiter still parked");
            std::thread::sleep(Duration::from_millis(5));
        }
        waiter.join().unwrap()
    }

    #[test]
    fn test_free_wakes_parked_waiter() {
        let (queue, waiter) = parked_still_waiter();
        queue.free().unwrap();
        assert_eq!(join_within(waiter, Duration::from_secs(2)), Err(QueueError::Empty));
    }

    #[test]
    fn test_reallocate_wakes_parked_waiter() {
        let (queue, waiter) = parked_still_waiter();
        assert_eq!(queue.allocate(2, 100).unwrap(), 2);
        assert_eq!(join_within(waiter, Duration::from_secs(2)), Err(QueueError::Empty));
        assert_eq!(queue.query(0).unwrap().state, BufferState::Idle);
    }

    proptest! {
        #[test]
        fn prop_dequeue_follows_submission_order(order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle()) {
            let queue = streaming_queue(8);
            for &i in &order {
                queue.enqueue(i).unwrap();
            }
            for _ in 0..order.len() {
                fill_next(&queue, b"f");
            }
            let dequeued: Vec<_> = order.iter().map(|_| queue.dequeue(true).unwrap().index).collect();
            prop_assert_eq!(dequeued, order);
        }
    }
}
