//! Wait-Die locking.
//!
//! Older transactions (smaller timestamp) may wait for younger owners; younger
//! transactions never wait for older ones and die instead. The state keeps
//!
//! - `owners`: timestamps of the current holders, ascending
//! - `waiters`: queued requests, ascending by timestamp (oldest first)
//!
//! and maintains `waiter.ts <= owner.ts` for every waiter/owner pair.

use super::{Acquire, LockRequest, Release, is_compatible, lock_failed};
use crate::error::ErrorCode;
use crate::types::{AccessMode, Timestamp};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::collections::VecDeque;
use tracing::{debug, error};

/// Pure Wait-Die state machine; callers provide the latch.
#[derive(Debug)]
pub struct WaitDieState<W> {
    mode: AccessMode,
    owners: SmallVec<[Timestamp; 4]>,
    waiters: VecDeque<LockRequest<W>>,
}

impl<W> Default for WaitDieState<W> {
    fn default() -> Self {
        Self {
            mode: AccessMode::INVALID,
            owners: SmallVec::new(),
            waiters: VecDeque::new(),
        }
    }
}

impl<W> WaitDieState<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn owners(&self) -> &[Timestamp] {
        &self.owners
    }

    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }

    pub fn waiter_timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.waiters.iter().map(|w| w.ts)
    }

    pub fn lock(&mut self, ts: Timestamp, mode: AccessMode, waiter: W) -> Acquire<W> {
        // A new owner must not be older than anyone still queued.
        let overtakes = self.waiters.back().is_some_and(|youngest| ts < youngest.ts);

        if is_compatible(self.mode, mode) && !overtakes {
            self.add_owner(ts, mode);
            return Acquire::Granted(waiter);
        }

        // owners[0] is the oldest owner
        let can_wait = self.owners.first().is_some_and(|oldest| oldest.0 > ts.0);
        if !can_wait {
            debug!(%ts, %mode, held = %self.mode, "wait-die: request dies");
            return Acquire::Denied(waiter, lock_failed(mode));
        }

        let pos = self.waiters.partition_point(|w| w.ts <= ts);
        self.waiters.insert(pos, LockRequest { ts, mode, waiter });
        debug!(%ts, %mode, queued = self.waiters.len(), "wait-die: request waits");
        Acquire::Queued
    }

    pub fn unlock(&mut self, ts: Timestamp, mode: AccessMode) -> Release<W> {
        if self.mode != mode {
            error!(held = %self.mode, requested = %mode, %ts, "unlock with mismatching mode");
            return Release::new(ErrorCode::InvalidAccessMode);
        }
        let Some(pos) = self.owners.iter().position(|owner| *owner == ts) else {
            error!(%ts, "unlock by a transaction that holds no lock");
            return Release::new(ErrorCode::InvalidAccessMode);
        };
        self.owners.remove(pos);

        let mut release = Release::new(ErrorCode::Success);
        if !self.owners.is_empty() {
            return release;
        }
        self.mode = AccessMode::INVALID;

        while let Some(head) = self.waiters.front() {
            if !is_compatible(self.mode, head.mode) {
                break;
            }
            if let Some(request) = self.waiters.pop_front() {
                self.add_owner(request.ts, request.mode);
                release.granted.push(request);
            }
        }

        // Whoever is still queued is younger than a fresh owner now.
        if let Some(oldest) = self.owners.first().copied() {
            while self.waiters.back().is_some_and(|w| w.ts > oldest) {
                if let Some(request) = self.waiters.pop_back() {
                    release.killed.push(request);
                }
            }
        }
        release
    }

    pub fn check(&self) -> bool {
        self.waiters.is_empty() && self.owners.is_empty() && self.mode.is_invalid()
    }

    /// Every queued waiter is older than or as old as every owner.
    pub fn invariant(&self) -> bool {
        match self.owners.first() {
            Some(oldest) => self.waiters.iter().all(|w| w.ts <= *oldest),
            None => self.waiters.is_empty(),
        }
    }

    fn add_owner(&mut self, ts: Timestamp, mode: AccessMode) {
        let pos = self.owners.partition_point(|owner| *owner <= ts);
        self.owners.insert(pos, ts);
        self.mode = mode;
    }
}

/// [`WaitDieState`] behind a row latch.
#[derive(Debug)]
pub struct WaitDieLock<W> {
    state: Mutex<WaitDieState<W>>,
}

impl<W> Default for WaitDieLock<W> {
    fn default() -> Self {
        Self {
            state: Mutex::new(WaitDieState::new()),
        }
    }
}

impl<W> WaitDieLock<W> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, ts: Timestamp, mode: AccessMode, waiter: W) -> Acquire<W> {
        self.state.lock().lock(ts, mode, waiter)
    }

    pub fn unlock(&self, ts: Timestamp, mode: AccessMode) -> Release<W> {
        self.state.lock().unlock(ts, mode)
    }

    pub fn check(&self) -> bool {
        self.state.lock().check()
    }

    pub fn invariant(&self) -> bool {
        self.state.lock().invariant()
    }

    pub fn mode(&self) -> AccessMode {
        self.state.lock().mode()
    }
}
