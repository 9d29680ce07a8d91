//! Undo log: every lock a transaction took, released at commit or rollback.
//!
//! Local entries call back into the owning table. Remote entries send a
//! `TuplePutReq` to the owner and are counted by the
//! [`PutResponseTracker`](crate::comm::PutResponseTracker); `clear` only
//! returns once every one of them was acknowledged.

use super::future::HeldLock;
use crate::comm::{Communicator, PutResponseTracker};
use crate::error::{PtxError, PtxResult};
use crate::storage::TableHandle;
use crate::types::{Key, NodeId, Timestamp, WorkerContext};
use std::sync::Arc;
use tracing::{debug, error};

/// One lock to release.
pub enum UndoAction {
    LocalWrite {
        table: Arc<dyn TableHandle>,
        key: Key,
        lock: Arc<dyn HeldLock>,
    },
    LocalRead {
        table: Arc<dyn TableHandle>,
        key: Key,
        lock: Arc<dyn HeldLock>,
    },
    RemoteWrite {
        owner: NodeId,
        lock: Arc<dyn HeldLock>,
    },
    RemoteRead {
        owner: NodeId,
        lock: Arc<dyn HeldLock>,
    },
}

impl UndoAction {
    fn lock(&self) -> &Arc<dyn HeldLock> {
        match self {
            UndoAction::LocalWrite { lock, .. }
            | UndoAction::LocalRead { lock, .. }
            | UndoAction::RemoteWrite { lock, .. }
            | UndoAction::RemoteRead { lock, .. } => lock,
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            UndoAction::RemoteWrite { .. } | UndoAction::RemoteRead { .. }
        )
    }

    /// Release the lock. Requests that were never granted are skipped.
    fn clear(
        self,
        ts: Timestamp,
        ctx: WorkerContext,
        comm: &dyn Communicator,
        tracker: &PutResponseTracker,
    ) -> PtxResult<()> {
        if self.lock().is_failed() {
            return Ok(());
        }

        match self {
            UndoAction::LocalWrite { table, key, lock } | UndoAction::LocalRead { table, key, lock } => {
                let code = table.put(key, lock.mode(), ts)?;
                if !code.is_ok() {
                    return Err(PtxError::UndoFailed(format!(
                        "unlock of {}[{}] returned {:?}",
                        table.name(),
                        key,
                        code
                    )));
                }
                Ok(())
            }
            UndoAction::RemoteWrite { owner, lock } | UndoAction::RemoteRead { owner, lock } => {
                let pkt = lock.unlock_packet(ctx.addr())?;
                tracker.add(ctx.worker)?;
                if let Err(e) = comm.send(owner, pkt) {
                    tracker.cancel(ctx.worker)?;
                    return Err(e);
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for UndoAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UndoAction::LocalWrite { table, key, .. } => {
                write!(f, "LocalWrite({}[{}])", table.name(), key)
            }
            UndoAction::LocalRead { table, key, .. } => {
                write!(f, "LocalRead({}[{}])", table.name(), key)
            }
            UndoAction::RemoteWrite { owner, .. } => write!(f, "RemoteWrite(node {})", owner),
            UndoAction::RemoteRead { owner, .. } => write!(f, "RemoteRead(node {})", owner),
        }
    }
}

/// Bounded, per-transaction list of [`UndoAction`]s.
#[derive(Debug)]
pub struct UndoLog {
    actions: Vec<UndoAction>,
    capacity: usize,
}

impl UndoLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            actions: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, action: UndoAction) -> PtxResult<()> {
        if self.actions.len() >= self.capacity {
            return Err(PtxError::ArenaExhausted {
                arena: "undo",
                capacity: self.capacity,
            });
        }
        self.actions.push(action);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Release everything, then wait for every remote acknowledgement.
    ///
    /// Every action is attempted even after a failure; the first error is
    /// returned. The log is empty afterwards.
    pub fn clear(
        &mut self,
        ts: Timestamp,
        ctx: WorkerContext,
        comm: &dyn Communicator,
        tracker: &PutResponseTracker,
    ) -> PtxResult<()> {
        let actions = std::mem::take(&mut self.actions);
        Self::release(actions.into_iter(), ts, ctx, comm, tracker)
    }

    /// Release only the `n` most recent actions, newest first.
    pub fn clear_last_n(
        &mut self,
        n: usize,
        ts: Timestamp,
        ctx: WorkerContext,
        comm: &dyn Communicator,
        tracker: &PutResponseTracker,
    ) -> PtxResult<()> {
        if n > self.actions.len() {
            return Err(PtxError::UndoFailed(format!(
                "cannot release {} of {} actions",
                n,
                self.actions.len()
            )));
        }
        let split = self.actions.len() - n;
        let tail = self.actions.split_off(split);
        Self::release(tail.into_iter().rev(), ts, ctx, comm, tracker)
    }

    fn release(
        actions: impl Iterator<Item = UndoAction>,
        ts: Timestamp,
        ctx: WorkerContext,
        comm: &dyn Communicator,
        tracker: &PutResponseTracker,
    ) -> PtxResult<()> {
        let mut first_err = None;
        let mut released = 0usize;
        for action in actions {
            let remote = action.is_remote();
            if let Err(e) = action.clear(ts, ctx, comm, tracker) {
                error!(%ts, remote, error = %e, "undo action failed");
                first_err.get_or_insert(e);
            } else {
                released += 1;
            }
        }
        debug!(%ts, released, "undo released");

        tracker.wait(ctx.worker)?;
        first_err.map_or(Ok(()), Err)
    }
}
