//! Row concurrency control.
//!
//! Three lock disciplines share one interface: `lock`, `unlock`, `check`.
//! Each discipline guards its own state with its own latch, so a [`RowLock`]
//! is used through `&self` and can sit inside a shared row.
//!
//! The state machines never touch tuples or the network. A waiter is an
//! opaque payload `W` handed back to the caller when the request is granted
//! or killed, and the caller decides how to notify it.

pub mod no_wait;
pub mod none;
pub mod wait_die;

pub use no_wait::NoWaitLock;
pub use none::NoneLock;
pub use wait_die::{WaitDieLock, WaitDieState};

use crate::error::ErrorCode;
use crate::types::{AccessMode, CcScheme, Timestamp};
use smallvec::SmallVec;

/// A lock request parked in (or released from) a waiter queue.
#[derive(Debug)]
pub struct LockRequest<W> {
    pub ts: Timestamp,
    pub mode: AccessMode,
    pub waiter: W,
}

/// Result of a lock attempt.
#[derive(Debug)]
pub enum Acquire<W> {
    /// Lock held; the waiter is handed back untouched.
    Granted(W),
    /// Request queued; it resolves on a later unlock.
    Queued,
    /// Request refused.
    Denied(W, ErrorCode),
}

impl<W> Acquire<W> {
    pub fn is_granted(&self) -> bool {
        matches!(self, Acquire::Granted(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Acquire::Queued)
    }

    /// `Success` for granted and queued requests, the failure code otherwise.
    pub fn code(&self) -> ErrorCode {
        match self {
            Acquire::Granted(_) | Acquire::Queued => ErrorCode::Success,
            Acquire::Denied(_, code) => *code,
        }
    }
}

/// Result of an unlock: queued requests that now hold the lock, and queued
/// requests that lost their right to wait.
#[derive(Debug)]
pub struct Release<W> {
    pub code: ErrorCode,
    pub granted: SmallVec<[LockRequest<W>; 2]>,
    pub killed: SmallVec<[LockRequest<W>; 2]>,
}

impl<W> Release<W> {
    pub fn new(code: ErrorCode) -> Self {
        Self {
            code,
            granted: SmallVec::new(),
            killed: SmallVec::new(),
        }
    }
}

/// Shared/exclusive compatibility against the currently held mode.
pub fn is_compatible(held: AccessMode, requested: AccessMode) -> bool {
    if held.is_invalid() {
        return true;
    }
    !(held.is_write() || requested.is_write())
}

/// Failure code for a refused request of `mode`.
pub fn lock_failed(mode: AccessMode) -> ErrorCode {
    if mode.is_read() {
        ErrorCode::ReadLockFailed
    } else if mode.is_write() {
        ErrorCode::WriteLockFailed
    } else {
        ErrorCode::InvalidAccessMode
    }
}

/// Per-row lock, one variant per [`CcScheme`].
#[derive(Debug)]
pub enum RowLock<W> {
    None(NoneLock),
    NoWait(NoWaitLock),
    WaitDie(WaitDieLock<W>),
}

impl<W> RowLock<W> {
    pub fn new(scheme: CcScheme) -> Self {
        match scheme {
            CcScheme::None => RowLock::None(NoneLock),
            CcScheme::NoWait => RowLock::NoWait(NoWaitLock::new()),
            CcScheme::WaitDie => RowLock::WaitDie(WaitDieLock::new()),
        }
    }

    pub fn scheme(&self) -> CcScheme {
        match self {
            RowLock::None(_) => CcScheme::None,
            RowLock::NoWait(_) => CcScheme::NoWait,
            RowLock::WaitDie(_) => CcScheme::WaitDie,
        }
    }

    pub fn lock(&self, ts: Timestamp, mode: AccessMode, waiter: W) -> Acquire<W> {
        let mode = mode.clean();
        if mode.is_invalid() {
            return Acquire::Denied(waiter, ErrorCode::InvalidAccessMode);
        }
        match self {
            RowLock::None(lock) => lock.lock(waiter),
            RowLock::NoWait(lock) => lock.lock(mode, waiter),
            RowLock::WaitDie(lock) => lock.lock(ts, mode, waiter),
        }
    }

    pub fn unlock(&self, ts: Timestamp, mode: AccessMode) -> Release<W> {
        let mode = mode.clean();
        match self {
            RowLock::None(lock) => lock.unlock(),
            RowLock::NoWait(lock) => lock.unlock(mode),
            RowLock::WaitDie(lock) => lock.unlock(ts, mode),
        }
    }

    /// True iff nobody holds or waits for the row.
    pub fn check(&self) -> bool {
        match self {
            RowLock::None(_) => true,
            RowLock::NoWait(lock) => lock.check(),
            RowLock::WaitDie(lock) => lock.check(),
        }
    }

    /// Wait-Die ordering audit; trivially true for the other schemes.
    pub fn invariant(&self) -> bool {
        match self {
            RowLock::WaitDie(lock) => lock.invariant(),
            _ => true,
        }
    }

    /// Currently held mode.
    pub fn mode(&self) -> AccessMode {
        match self {
            RowLock::None(_) => AccessMode::INVALID,
            RowLock::NoWait(lock) => lock.mode(),
            RowLock::WaitDie(lock) => lock.mode(),
        }
    }
}
