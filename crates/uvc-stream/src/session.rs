//! Client sessions (open handles on a stream)

use crate::arbiter::{HandleState, PrivilegeArbiter};
use crate::error::UvcError;
use crate::stream::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One open handle on a stream.
///
/// Closing (dropping) a privileged session stops streaming, frees both
/// buffer queues and hands the privilege back.
pub struct Session {
    id: u64,
    stream: Arc<Stream>,
    handle: HandleState,
    non_blocking: bool,
}

impl Session {
    /// Open a new handle. Fails with `DeviceGone` once the device is detached.
    pub fn open(stream: Arc<Stream>, non_blocking: bool) -> Result<Self, UvcError> {
        let users = stream.open_user()?;
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        info!(
            "{}: session {} opened ({} users)",
            stream.name(),
            id,
            users
        );
        Ok(Self {
            id,
            stream,
            handle: HandleState::Passive,
            non_blocking,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking
    }

    pub fn set_non_blocking(&mut self, non_blocking: bool) {
        self.non_blocking = non_blocking;
    }

    pub fn has_privilege(&self) -> bool {
        PrivilegeArbiter::has_privilege(self.handle)
    }

    pub(crate) fn acquire_privileges(&mut self) -> Result<(), UvcError> {
        self.stream.arbiter().acquire(&mut self.handle)
    }

    pub(crate) fn dismiss_privileges(&mut self) {
        self.stream.arbiter().dismiss(&mut self.handle);
    }

    pub(crate) fn require_privilege(&self) -> Result<(), UvcError> {
        if !self.has_privilege() {
            return Err(UvcError::Busy(format!(
                "session {} does not own the stream",
                self.id
            )));
        }
        Ok(())
    }

    /// Close the session
    pub fn close(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.has_privilege() {
            if let Err(e) = self.stream.stream_off() {
                warn!("{}: stream off on close failed: {}", self.stream.name(), e);
            }
            if let Err(e) = self.stream.queue().free() {
                warn!("{}: failed to free video buffers: {}", self.stream.name(), e);
            }
            // Reclaim client-owned still buffers before freeing them
            let still = self.stream.still_queue();
            if let Err(e) = still.enable(false).and_then(|_| still.free()) {
                warn!("{}: failed to free still buffers: {}", self.stream.name(), e);
            }
        }

        self.dismiss_privileges();
        self.stream.close_user();
        info!("{}: session {} closed", self.stream.name(), self.id);
    }
}
