//! Video stream: negotiated state, buffer queues and streaming control

use crate::arbiter::PrivilegeArbiter;
use crate::control::{DeviceProfile, StreamingControl};
use crate::error::UvcError;
use crate::transport::{ControlQuery, Transport};
use crate::BufType;
use frame_queue::{FrameQueue, QueueKind};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uvc_format::{CapabilitySet, FormatDescriptor, FrameDescriptor, StillSize};

/// Selector unit control: input pin selection
const SU_INPUT_SELECT_CONTROL: u8 = 0x01;

/// Committed main format: format position in the capability set and the
/// one-based frame index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Selection {
    pub format: usize,
    pub frame_index: u8,
}

/// Committed still format: format position and one-based still image index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StillSelection {
    pub format: usize,
    pub image_index: u8,
}

/// Negotiated state, guarded by the stream lock
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    pub ctrl: StreamingControl,
    pub current: Option<Selection>,
    pub still_ctrl: StreamingControl,
    pub still: Option<StillSelection>,
}

impl StreamState {
    pub fn current_frame<'a>(
        &self,
        caps: &'a CapabilitySet,
    ) -> Option<(&'a FormatDescriptor, &'a FrameDescriptor)> {
        let selection = self.current?;
        let format = caps.get(selection.format)?;
        Some((format, format.frame(selection.frame_index)?))
    }

    pub fn current_still<'a>(
        &self,
        caps: &'a CapabilitySet,
    ) -> Option<(&'a FormatDescriptor, &'a StillSize)> {
        let selection = self.still?;
        let format = caps.get(selection.format)?;
        let still = format
            .still_sizes
            .get(usize::from(selection.image_index).checked_sub(1)?)?;
        Some((format, still))
    }
}

/// One video streaming pipeline of a device.
///
/// Shared by every open session through an `Arc`. Lock order is the stream
/// state lock first, then a queue lock.
pub struct Stream {
    name: String,
    buf_type: BufType,
    caps: CapabilitySet,
    profile: DeviceProfile,
    transport: Arc<dyn Transport>,
    pub(crate) state: Mutex<StreamState>,
    queue: FrameQueue,
    still_queue: FrameQueue,
    arbiter: PrivilegeArbiter,
    users: AtomicUsize,
    disconnected: AtomicBool,
    still_waiting: AtomicBool,
    still_decoding: AtomicBool,
}

impl Stream {
    pub fn new(
        name: &str,
        buf_type: BufType,
        caps: CapabilitySet,
        profile: DeviceProfile,
        transport: Arc<dyn Transport>,
    ) -> Self {
        info!(
            "Registering stream {} ({:?}, {} formats, device {})",
            name,
            buf_type,
            caps.len(),
            profile.name
        );
        Self {
            name: name.to_string(),
            buf_type,
            caps,
            profile,
            transport,
            state: Mutex::new(StreamState::default()),
            queue: FrameQueue::new(QueueKind::Video),
            still_queue: FrameQueue::new(QueueKind::Still),
            arbiter: PrivilegeArbiter::new(),
            users: AtomicUsize::new(0),
            disconnected: AtomicBool::new(false),
            still_waiting: AtomicBool::new(false),
            still_decoding: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn buf_type(&self) -> BufType {
        self.buf_type
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Main video queue
    pub fn queue(&self) -> &FrameQueue {
        &self.queue
    }

    pub fn still_queue(&self) -> &FrameQueue {
        &self.still_queue
    }

    pub fn arbiter(&self) -> &PrivilegeArbiter {
        &self.arbiter
    }

    pub(crate) fn check_type(&self, buf_type: BufType) -> Result<(), UvcError> {
        if buf_type != self.buf_type {
            return Err(UvcError::InvalidArgument(format!(
                "buffer type {:?} does not match stream type {:?}",
                buf_type, self.buf_type
            )));
        }
        Ok(())
    }

    // Users

    /// Register a new user of the stream
    pub(crate) fn open_user(&self) -> Result<usize, UvcError> {
        if self.is_disconnected() {
            return Err(UvcError::DeviceGone);
        }
        let users = self.users.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("{}: {} users", self.name, users);
        Ok(users)
    }

    pub(crate) fn close_user(&self) {
        let previous = self.users.fetch_sub(1, Ordering::AcqRel);
        debug!("{}: {} users", self.name, previous.saturating_sub(1));
    }

    pub fn user_count(&self) -> usize {
        self.users.load(Ordering::Acquire)
    }

    /// Mark the device as detached. Wakes every blocked dequeue; new opens
    /// fail with `DeviceGone`.
    pub fn disconnect(&self) {
        warn!("{}: device disconnected", self.name);
        self.disconnected.store(true, Ordering::Release);
        self.queue.disconnect();
        self.still_queue.disconnect();
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    // Buffers

    /// Allocate main queue buffers sized from the committed control
    pub(crate) fn allocate_buffers(&self, count: usize) -> Result<usize, UvcError> {
        let state = self.state.lock();
        let size = state.ctrl.max_video_frame_size as usize;
        Ok(self.queue.allocate(count, size)?)
    }

    /// Allocate still queue buffers sized from the committed still control
    pub(crate) fn allocate_still_buffers(&self, count: usize) -> Result<usize, UvcError> {
        let state = self.state.lock();
        if count > 0 && state.still.is_none() {
            return Err(UvcError::InvalidArgument(
                "still image format not configured".to_string(),
            ));
        }
        let size = state.still_ctrl.max_video_frame_size as usize;
        Ok(self.still_queue.allocate(count, size)?)
    }

    // Streaming

    /// Enable the main queue, then start the device stream. The queue is
    /// rolled back if the device refuses.
    pub fn stream_on(&self) -> Result<(), UvcError> {
        let state = self.state.lock();
        if state.current.is_none() {
            return Err(UvcError::InvalidArgument("no format negotiated".to_string()));
        }

        self.queue.enable(true)?;
        if let Err(err) = self.transport.set_streaming(&state.ctrl, true) {
            warn!("{}: failed to start streaming: {}", self.name, err);
            if let Err(rollback) = self.queue.enable(false) {
                error!("{}: queue rollback failed: {}", self.name, rollback);
            }
            return Err(err);
        }

        info!(
            "{}: streaming on (format {}, frame {}, interval {})",
            self.name, state.ctrl.format_index, state.ctrl.frame_index, state.ctrl.frame_interval
        );
        Ok(())
    }

    /// Stop the device stream and reclaim every main buffer
    pub fn stream_off(&self) -> Result<(), UvcError> {
        if !self.queue.is_streaming() {
            return Ok(());
        }

        let state = self.state.lock();
        let result = self.transport.set_streaming(&state.ctrl, false);
        if let Err(err) = &result {
            warn!("{}: device refused stream off: {}", self.name, err);
        }
        self.queue.enable(false)?;
        info!("{}: streaming off", self.name);
        result
    }

    pub fn is_streaming(&self) -> bool {
        self.queue.is_streaming()
    }

    // Still capture

    /// Trigger a still capture and flag the transport to deliver it
    pub(crate) fn request_still(&self) -> Result<(), UvcError> {
        self.transport.trigger_still()?;
        self.still_waiting.store(true, Ordering::Release);
        debug!("{}: still image requested", self.name);
        Ok(())
    }

    /// Drop a pending still request whose waiter gave up
    pub(crate) fn cancel_still_request(&self) {
        if self.still_waiting.swap(false, Ordering::AcqRel) {
            debug!("{}: still image request dropped", self.name);
        }
    }

    /// Consume a pending still request (transport side)
    pub fn take_still_request(&self) -> bool {
        self.still_waiting.swap(false, Ordering::AcqRel)
    }

    /// Transport started decoding a still image
    pub fn begin_still_decode(&self) {
        self.still_decoding.store(true, Ordering::Release);
    }

    pub fn end_still_decode(&self) {
        self.still_decoding.store(false, Ordering::Release);
    }

    pub fn is_still_decoding(&self) -> bool {
        self.still_decoding.load(Ordering::Acquire)
    }

    /// Committed still control, if a still format is configured
    pub fn still_control(&self) -> Option<StreamingControl> {
        let state = self.state.lock();
        state.still.map(|_| state.still_ctrl.clone())
    }

    /// Committed streaming control, if a format has been negotiated
    pub fn control(&self) -> Option<StreamingControl> {
        let state = self.state.lock();
        state.current.map(|_| state.ctrl.clone())
    }

    // Inputs

    /// Zero-based index of the selected input
    pub fn get_input(&self) -> Result<u32, UvcError> {
        let Some(selector) = self.profile.uses_selector() else {
            return Ok(0);
        };

        let mut data = [0u8; 1];
        self.transport.query_ctrl(
            ControlQuery::GetCur,
            selector.id,
            self.profile.control_interface,
            SU_INPUT_SELECT_CONTROL,
            &mut data,
        )?;
        Ok(u32::from(data[0]).saturating_sub(1))
    }

    /// Select an input by zero-based index
    pub fn set_input(&self, index: u32) -> Result<(), UvcError> {
        let Some(selector) = self.profile.uses_selector() else {
            if index != 0 {
                return Err(UvcError::InvalidArgument(format!("no input {}", index)));
            }
            return Ok(());
        };

        let pin = index
            .checked_add(1)
            .filter(|&pin| pin <= u32::from(selector.inputs))
            .ok_or_else(|| UvcError::InvalidArgument(format!("no input {}", index)))?;

        let mut data = [pin as u8];
        self.transport.query_ctrl(
            ControlQuery::SetCur,
            selector.id,
            self.profile.control_interface,
            SU_INPUT_SELECT_CONTROL,
            &mut data,
        )?;
        info!("{}: selected input {}", self.name, index);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::control::SelectorUnit;
    use crate::transport::MockTransport;

    pub(crate) fn mock_stream(profile: DeviceProfile) -> (Arc<Stream>, Arc<MockTransport>) {
        mock_stream_with(MockTransport::webcam_capabilities().unwrap(), profile)
    }

    pub(crate) fn mock_stream_with(
        caps: CapabilitySet,
        profile: DeviceProfile,
    ) -> (Arc<Stream>, Arc<MockTransport>) {
        let transport = Arc::new(MockTransport::new(caps.clone()));
        let stream = Stream::new(
            "video0",
            BufType::VideoCapture,
            caps,
            profile,
            transport.clone(),
        );
        (Arc::new(stream), transport)
    }

    fn commit_default(stream: &Stream) {
        let mut state = stream.state.lock();
        state.current = Some(Selection { format: 0, frame_index: 1 });
        state.ctrl = StreamingControl {
            format_index: 1,
            frame_index: 1,
            frame_interval: 333_333,
            max_video_frame_size: 614_400,
            ..Default::default()
        };
    }

    #[test]
    fn test_stream_on_requires_format() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert!(matches!(stream.stream_on(), Err(UvcError::InvalidArgument(_))));
    }

    #[test]
    fn test_stream_on_off() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        commit_default(&stream);

        stream.stream_on().unwrap();
        assert!(stream.is_streaming());
        assert!(transport.is_streaming());
        assert!(matches!(stream.stream_on(), Err(UvcError::Busy(_))));

        stream.stream_off().unwrap();
        assert!(!stream.is_streaming());
        assert!(!transport.is_streaming());
        stream.stream_off().unwrap();
    }

    #[test]
    fn test_stream_on_rolls_back_queue() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        commit_default(&stream);
        transport.fail_streaming(true);

        assert!(matches!(stream.stream_on(), Err(UvcError::Transfer(_))));
        assert!(!stream.queue().is_streaming());

        transport.fail_streaming(false);
        stream.stream_on().unwrap();
    }

    #[test]
    fn test_allocation_uses_committed_size() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        commit_default(&stream);
        assert_eq!(stream.allocate_buffers(4).unwrap(), 4);
        assert_eq!(stream.queue().query(0).unwrap().length, 614_400);
    }

    #[test]
    fn test_still_allocation_needs_still_format() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert!(stream.allocate_still_buffers(2).is_err());
        assert_eq!(stream.allocate_still_buffers(0).unwrap(), 0);
    }

    #[test]
    fn test_disconnect_blocks_open() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert_eq!(stream.open_user().unwrap(), 1);
        stream.disconnect();
        assert_eq!(stream.open_user(), Err(UvcError::DeviceGone));
        assert!(stream.queue().is_disconnected());
        assert!(stream.still_queue().is_disconnected());
    }

    #[test]
    fn test_still_request_flag() {
        let (stream, transport) = mock_stream(DeviceProfile::default());
        stream.request_still().unwrap();
        assert_eq!(transport.still_triggers(), 1);
        assert!(stream.take_still_request());
        assert!(!stream.take_still_request());
    }

    #[test]
    fn test_input_without_selector() {
        let (stream, _) = mock_stream(DeviceProfile::default());
        assert_eq!(stream.get_input().unwrap(), 0);
        stream.set_input(0).unwrap();
        assert!(stream.set_input(1).is_err());
    }

    #[test]
    fn test_input_through_selector() {
        let profile = DeviceProfile {
            selector: Some(SelectorUnit { id: 4, inputs: 2 }),
            ..Default::default()
        };
        let (stream, transport) = mock_stream(profile);

        stream.set_input(1).unwrap();
        assert_eq!(transport.control(4, SU_INPUT_SELECT_CONTROL), Some(vec![2]));
        assert_eq!(stream.get_input().unwrap(), 1);

        assert!(stream.set_input(2).is_err());
        assert!(stream.set_input(u32::MAX).is_err());
    }

    #[test]
    fn test_ignored_selector_behaves_as_absent() {
        let profile = DeviceProfile {
            selector: Some(SelectorUnit { id: 4, inputs: 2 }),
            ignore_selector_unit: true,
            ..Default::default()
        };
        let (stream, transport) = mock_stream(profile);
        assert!(stream.set_input(1).is_err());
        assert_eq!(stream.get_input().unwrap(), 0);
        assert_eq!(transport.control(4, SU_INPUT_SELECT_CONTROL), None);
    }
}
