//! 트랜잭션 오케스트레이터: 워커당 하나, 트랜잭션 간 재사용
//!
//! `read`/`write`/`insert` resolve the key's location, acquire the lock
//! locally or through a `TupleGetReq`, append an undo action and wait for the
//! future. A `None` result means the lock was refused and the body has to
//! roll back; [`check!`](crate::check) does exactly that.

use super::future::{FutureArena, SwitchFuture, TupleFuture};
use super::switch::{SwitchHandle, SwitchProgram};
use super::timestamp::TimestampFactory;
use super::undo::{UndoAction, UndoLog};
use crate::comm::{Packet, TupleMsgHeader};
use crate::engine::Database;
use crate::error::{PtxError, PtxResult};
use crate::storage::{LocationInfo, Table, Tuple};
use crate::types::{AccessMode, Key, Timestamp, WorkerContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Take the future out of an access result, or roll back and return.
///
/// ```ignore
/// let from = check!(txn, txn.write(&accounts, src));
/// ```
#[macro_export]
macro_rules! check {
    ($txn:expr, $access:expr) => {
        match $access? {
            Some(future) => future,
            None => return $txn.rollback(),
        }
    };
}

/// How a transaction ended.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOutcome {
    Committed,
    RolledBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// No transaction started yet
    Idle,
    Running,
    Committed,
    RolledBack,
}

/// Time spent per phase of the current transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseLatency {
    /// begin to commit, committed transactions only
    pub commit: Duration,
    pub local: Duration,
    pub remote: Duration,
    pub switch: Duration,
}

/// A transaction body for arguments of type `Arg`.
pub trait Workload: Send + Sync {
    type Arg;

    /// Run one transaction; must end in `commit()` or `rollback()`.
    fn run(&self, txn: &mut Transaction, arg: &Self::Arg) -> PtxResult<TxnOutcome>;

    /// Whether `arg` is executed by the switch.
    fn on_switch(&self, _arg: &Self::Arg) -> bool {
        false
    }
}

/// Per-worker transaction context.
pub struct Transaction {
    db: Arc<Database>,
    ctx: WorkerContext,
    ts_factory: TimestampFactory,
    ts: Timestamp,
    state: TxnState,
    undo: UndoLog,
    arena: FutureArena,
    latency: PhaseLatency,
    started: Instant,
}

impl Transaction {
    pub(crate) fn new(db: Arc<Database>, ctx: WorkerContext, ts_factory: TimestampFactory) -> Self {
        let config = db.config();
        let undo = UndoLog::new(config.undo_capacity);
        let arena = FutureArena::new(config.future_capacity);
        Self {
            db,
            ctx,
            ts_factory,
            ts: Timestamp::default(),
            state: TxnState::Idle,
            undo,
            arena,
            latency: PhaseLatency::default(),
            started: Instant::now(),
        }
    }

    pub fn ctx(&self) -> WorkerContext {
        self.ctx
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn latency(&self) -> PhaseLatency {
        self.latency
    }

    /// Undo actions recorded so far.
    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    /// Start a new transaction with a fresh timestamp.
    pub fn begin(&mut self) -> PtxResult<Timestamp> {
        if self.state == TxnState::Running {
            return Err(PtxError::InvalidTxnState(format!(
                "transaction {} is still running",
                self.ts
            )));
        }
        self.ts = self.ts_factory.next();
        self.state = TxnState::Running;
        self.latency = PhaseLatency::default();
        self.started = Instant::now();
        trace!(worker = self.ctx.worker, ts = %self.ts, "begin");
        Ok(self.ts)
    }

    /// Run `workload` for `arg` as one transaction.
    ///
    /// A body that fails or returns without finishing is rolled back so no
    /// lock outlives it.
    pub fn execute<W: Workload>(&mut self, workload: &W, arg: &W::Arg) -> PtxResult<TxnOutcome> {
        self.begin()?;
        let result = workload.run(self, arg);
        if self.state != TxnState::Running {
            return result;
        }

        match (result, self.rollback()) {
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
            (Ok(_), Ok(_)) => Err(PtxError::InvalidTxnState(format!(
                "transaction {} returned without commit or rollback",
                self.ts
            ))),
        }
    }

    fn ensure_running(&self) -> PtxResult<()> {
        if self.state != TxnState::Running {
            return Err(PtxError::InvalidTxnState(format!(
                "access outside a running transaction ({:?})",
                self.state
            )));
        }
        Ok(())
    }

    // ════════════════════════════════════════════
    // Tuple access
    // ════════════════════════════════════════════

    pub fn read<T: Tuple>(
        &mut self,
        table: &Arc<Table<T>>,
        key: Key,
    ) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        self.access(table, key, AccessMode::READ)
    }

    pub fn write<T: Tuple>(
        &mut self,
        table: &Arc<Table<T>>,
        key: Key,
    ) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        self.access(table, key, AccessMode::WRITE)
    }

    /// Claim a new row of the local table and write-lock it.
    ///
    /// The lock is taken before the key becomes visible to other workers.
    pub fn insert<T: Tuple>(&mut self, table: &Arc<Table<T>>) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        self.ensure_running()?;
        let started = Instant::now();
        let ts = self.ts;
        let arena = &mut self.arena;
        let (key, future) = table.append_with(|key, row| {
            let future = arena.allocate(TupleFuture::local(table.clone(), key, AccessMode::WRITE))?;
            match row.local_lock(AccessMode::WRITE, ts, future.clone()) {
                code if code.is_ok() => Ok(future),
                code => Err(PtxError::InvalidAccessMode(format!(
                    "unpublished row {} refused a write lock: {:?}",
                    key, code
                ))),
            }
        })?;
        self.undo.push(UndoAction::LocalWrite {
            table: table.clone(),
            key,
            lock: future.clone(),
        })?;
        self.latency.local += started.elapsed();
        trace!(ts = %self.ts, table = table.name(), %key, "insert");
        Ok(Some(future))
    }

    fn access<T: Tuple>(
        &mut self,
        table: &Arc<Table<T>>,
        key: Key,
        mode: AccessMode,
    ) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        self.ensure_running()?;
        if !table.contains(key) {
            debug!(ts = %self.ts, table = table.name(), %key, "key outside the table");
            return Ok(None);
        }
        let loc = table.location(key);
        if loc.is_local {
            self.local_access(table, key, mode)
        } else {
            self.remote_access(table, key, mode, loc)
        }
    }

    fn local_access<T: Tuple>(
        &mut self,
        table: &Arc<Table<T>>,
        key: Key,
        mode: AccessMode,
    ) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        let started = Instant::now();
        let future = self
            .arena
            .allocate(TupleFuture::local(table.clone(), key, mode))?;

        let code = table.get(key, mode, self.ts, future.clone());
        if !code.is_ok() {
            debug!(ts = %self.ts, table = table.name(), %key, ?code, "local lock refused");
            return Ok(None);
        }

        let action = if mode.is_write() {
            UndoAction::LocalWrite {
                table: table.clone(),
                key,
                lock: future.clone(),
            }
        } else {
            UndoAction::LocalRead {
                table: table.clone(),
                key,
                lock: future.clone(),
            }
        };
        self.undo.push(action)?;

        let granted = future.wait()?;
        self.latency.local += started.elapsed();
        if !granted {
            debug!(ts = %self.ts, table = table.name(), %key, "local lock denied after wait");
        }
        Ok(granted.then_some(future))
    }

    fn remote_access<T: Tuple>(
        &mut self,
        table: &Arc<Table<T>>,
        key: Key,
        mode: AccessMode,
        loc: LocationInfo,
    ) -> PtxResult<Option<Arc<TupleFuture<T>>>> {
        let started = Instant::now();
        let mode = if self.db.config().lock_on_switch && loc.is_hot {
            mode.with_switch_index(loc.abs_hot_index)
        } else {
            mode
        };

        let mut pkt = Packet::tuple_get_req(
            self.ctx.addr(),
            TupleMsgHeader {
                ts: self.ts,
                table: table.id(),
                key,
                mode,
            },
        )?;
        let future = self.arena.allocate(TupleFuture::<T>::remote(mode))?;
        let handler = self.db.handler();
        let id = handler.set_new_id(&mut pkt)?;
        handler.add_future(id, future.clone())?;
        trace!(ts = %self.ts, table = table.name(), %key, target = %loc.target, %mode, "remote get");
        if let Err(e) = self.db.comm().send(loc.target, pkt) {
            handler.cancel_future(id)?;
            return Err(e);
        }

        let action = if mode.is_write() {
            UndoAction::RemoteWrite {
                owner: loc.target,
                lock: future.clone(),
            }
        } else {
            UndoAction::RemoteRead {
                owner: loc.target,
                lock: future.clone(),
            }
        };
        self.undo.push(action)?;

        let granted = future.wait()?;
        self.latency.remote += started.elapsed();
        if !granted {
            debug!(ts = %self.ts, table = table.name(), %key, target = %loc.target, "remote lock refused");
        }
        Ok(granted.then_some(future))
    }

    // ════════════════════════════════════════════
    // Switch offload
    // ════════════════════════════════════════════

    /// Send `arg` to the switch as one `SwitchTxn`. No undo entry is kept.
    pub fn atomic<'p, A, S: SwitchProgram<A>>(
        &mut self,
        program: &'p S,
        arg: &'p A,
    ) -> PtxResult<SwitchHandle<'p, A, S>> {
        self.ensure_running()?;
        let mut pkt = Packet::switch_txn(self.ctx.addr(), |w| program.make_txn(arg, w))?;
        let future = self.arena.allocate(SwitchFuture::new())?;
        let handler = self.db.handler();
        let id = handler.set_new_id(&mut pkt)?;
        handler.add_future(id, future.clone())?;

        let comm = self.db.comm();
        trace!(ts = %self.ts, bytes = pkt.len(), "switch txn");
        if let Err(e) = comm.send(comm.switch_id(), pkt) {
            handler.cancel_future(id)?;
            return Err(e);
        }
        Ok(SwitchHandle::new(future, program, arg))
    }

    /// [`atomic`](Self::atomic) followed by `get`, timed as switch latency.
    pub fn atomic_wait<A, S: SwitchProgram<A>>(&mut self, program: &S, arg: &A) -> PtxResult<S::Output> {
        let started = Instant::now();
        let output = self.atomic(program, arg)?.get();
        self.latency.switch += started.elapsed();
        output
    }

    // ════════════════════════════════════════════
    // Commit / Rollback
    // ════════════════════════════════════════════

    pub fn commit(&mut self) -> PtxResult<TxnOutcome> {
        self.finish(TxnOutcome::Committed)
    }

    pub fn rollback(&mut self) -> PtxResult<TxnOutcome> {
        self.finish(TxnOutcome::RolledBack)
    }

    /// Release the `n` most recent locks, keeping the transaction running.
    pub fn commit_last_n(&mut self, n: usize) -> PtxResult<()> {
        self.release_last_n(n)
    }

    pub fn rollback_last_n(&mut self, n: usize) -> PtxResult<()> {
        self.release_last_n(n)
    }

    fn release_last_n(&mut self, n: usize) -> PtxResult<()> {
        self.ensure_running()?;
        let handler = self.db.handler();
        self.undo.clear_last_n(
            n,
            self.ts,
            self.ctx,
            self.db.comm().as_ref(),
            &handler.put_responses,
        )
    }

    fn finish(&mut self, outcome: TxnOutcome) -> PtxResult<TxnOutcome> {
        self.ensure_running()?;
        let handler = self.db.handler();
        let result = self.undo.clear(
            self.ts,
            self.ctx,
            self.db.comm().as_ref(),
            &handler.put_responses,
        );
        self.arena.reset();

        self.state = match outcome {
            TxnOutcome::Committed => {
                self.latency.commit = self.started.elapsed();
                TxnState::Committed
            }
            TxnOutcome::RolledBack => TxnState::RolledBack,
        };
        trace!(worker = self.ctx.worker, ts = %self.ts, ?outcome, "finished");
        result.map(|()| outcome)
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("ctx", &self.ctx)
            .field("ts", &self.ts)
            .field("state", &self.state)
            .field("undo", &self.undo.len())
            .field("arena", &self.arena)
            .finish()
    }
}
