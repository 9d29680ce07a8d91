//! No-Wait locking: incompatible requests fail immediately.

use super::{Acquire, Release, is_compatible, lock_failed};
use crate::error::ErrorCode;
use crate::types::AccessMode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::error;

#[derive(Debug, Default)]
struct State {
    mode: AccessMode,
    owners: u32,
}

/// Shared/exclusive lock that never queues.
///
/// The held mode is mirrored in an atomic so an obviously conflicting request
/// fails without touching the latch.
#[derive(Debug, Default)]
pub struct NoWaitLock {
    published: AtomicU32,
    state: Mutex<State>,
}

impl NoWaitLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> AccessMode {
        AccessMode::from_raw(self.published.load(Ordering::Acquire))
    }

    pub fn lock<W>(&self, mode: AccessMode, waiter: W) -> Acquire<W> {
        // early abort
        if !is_compatible(self.mode(), mode) {
            return Acquire::Denied(waiter, lock_failed(mode));
        }

        let mut state = self.state.lock();
        if !is_compatible(state.mode, mode) {
            return Acquire::Denied(waiter, lock_failed(mode));
        }

        state.owners += 1;
        state.mode = mode;
        self.published.store(mode.raw(), Ordering::Release);
        Acquire::Granted(waiter)
    }

    pub fn unlock<W>(&self, mode: AccessMode) -> Release<W> {
        let mut state = self.state.lock();
        if state.mode != mode || state.owners == 0 {
            error!(held = %state.mode, requested = %mode, "unlock with mismatching mode");
            return Release::new(ErrorCode::InvalidAccessMode);
        }

        state.owners -= 1;
        if state.owners == 0 {
            state.mode = AccessMode::INVALID;
            self.published
                .store(AccessMode::INVALID.raw(), Ordering::Release);
        }
        Release::new(ErrorCode::Success)
    }

    pub fn check(&self) -> bool {
        let state = self.state.lock();
        state.mode.is_invalid() && state.owners == 0
    }
}
