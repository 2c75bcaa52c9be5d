//! Streaming privilege arbitration
//!
//! Any number of handles may be open on a stream, but at most one may own
//! the main buffer queue and drive streaming. A handle becomes active the
//! first time it performs an operation that needs ownership.

use crate::error::UvcError;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Per-handle privilege state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HandleState {
    #[default]
    Passive,
    Active,
}

/// Tracks the number of active handles on one stream (0 or 1)
#[derive(Debug, Default)]
pub struct PrivilegeArbiter {
    active: AtomicUsize,
}

impl PrivilegeArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `handle` the active handle.
    ///
    /// Idempotent for an already active handle. Fails with `Busy` when
    /// another handle holds the privilege.
    pub fn acquire(&self, handle: &mut HandleState) -> Result<(), UvcError> {
        if *handle == HandleState::Active {
            return Ok(());
        }

        if self.active.fetch_add(1, Ordering::AcqRel) != 0 {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return Err(UvcError::Busy("stream owned by another handle".to_string()));
        }

        debug!("Streaming privilege acquired");
        *handle = HandleState::Active;
        Ok(())
    }

    /// Release the privilege held by `handle`, if any
    pub fn dismiss(&self, handle: &mut HandleState) {
        if *handle == HandleState::Active {
            self.active.fetch_sub(1, Ordering::AcqRel);
            *handle = HandleState::Passive;
            debug!("Streaming privilege released");
        }
    }

    pub fn has_privilege(handle: HandleState) -> bool {
        handle == HandleState::Active
    }

    /// Number of handles currently active
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}
