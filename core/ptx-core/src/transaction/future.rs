//! Tuple and switch futures.
//!
//! A [`TupleFuture`] resolves exactly once: to granted, to failed, or to
//! faulted. Local futures are resolved by the row lock (immediately or by
//! another worker's unlock), remote futures by the dispatch thread delivering
//! the `TupleGetRes`. A faulted future saw a broken response or a dead
//! dispatch thread; waiting on it is an error, not a lock refusal. Waiting is
//! a spin with a pause hint.

use crate::comm::{AbstractFuture, MsgType, Packet};
use crate::error::{PtxError, PtxResult};
use crate::storage::{LockGrant, Row, Table, Tuple};
use crate::types::{AccessMode, Key, NodeAddr};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const PENDING: u8 = 0;
const GRANTED: u8 = 1;
const FAILED: u8 = 2;
const FAULTED: u8 = 3;

/// Spin until `state` leaves `PENDING`; a fault becomes an error.
fn spin(state: &AtomicU8, fault: &Mutex<Option<String>>) -> PtxResult<u8> {
    loop {
        match state.load(Ordering::Acquire) {
            PENDING => std::hint::spin_loop(),
            FAULTED => {
                let reason = fault.lock().clone().unwrap_or_default();
                return Err(PtxError::ProtocolViolation(reason));
            }
            done => return Ok(done),
        }
    }
}

/// A lock an undo action has to release.
pub trait HeldLock: Send + Sync {
    fn mode(&self) -> AccessMode;

    /// Failed requests hold nothing.
    fn is_failed(&self) -> bool;

    /// Turn the held `TupleGetRes` into the `TuplePutReq` that releases it.
    /// Write locks carry the current tuple image back.
    fn unlock_packet(&self, sender: NodeAddr) -> PtxResult<Packet>;
}

struct RemoteCopy<T> {
    tuple: T,
    pkt: Packet,
}

enum Origin<T: Tuple> {
    Local { table: Arc<Table<T>>, key: Key },
    Remote { slot: Mutex<Option<RemoteCopy<T>>> },
}

pub struct TupleFuture<T: Tuple> {
    state: AtomicU8,
    fault: Mutex<Option<String>>,
    mode: AccessMode,
    origin: Origin<T>,
}

impl<T: Tuple> TupleFuture<T> {
    /// Future for a row of a table on this node.
    pub fn local(table: Arc<Table<T>>, key: Key, mode: AccessMode) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            fault: Mutex::new(None),
            mode,
            origin: Origin::Local { table, key },
        }
    }

    /// Future completed by a `TupleGetRes`.
    pub fn remote(mode: AccessMode) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            fault: Mutex::new(None),
            mode,
            origin: Origin::Remote {
                slot: Mutex::new(None),
            },
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.origin, Origin::Remote { .. })
    }

    pub fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    pub fn is_granted(&self) -> bool {
        self.state.load(Ordering::Acquire) == GRANTED
    }

    fn resolve(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Resolve to faulted; the reason is returned by every later wait.
    fn set_fault(&self, reason: String) {
        *self.fault.lock() = Some(reason);
        self.resolve(FAULTED);
    }

    /// Spin until resolved; true if the lock was granted.
    pub fn wait(&self) -> PtxResult<bool> {
        spin(&self.state, &self.fault).map(|state| state == GRANTED)
    }

    /// Wait, then copy the tuple. Requires a granted lock.
    pub fn get(&self) -> PtxResult<T> {
        if !self.wait()? {
            return Err(PtxError::InvalidAccessMode(
                "read through a failed future".to_string(),
            ));
        }
        let tuple = match &self.origin {
            Origin::Local { table, key } => table.row(*key).map(Row::read),
            Origin::Remote { slot } => slot.lock().as_ref().map(|copy| copy.tuple),
        };
        tuple.ok_or_else(|| PtxError::InvalidAccessMode("tuple already released".to_string()))
    }

    /// Overwrite the tuple. Requires a granted write lock.
    pub fn set(&self, value: T) -> PtxResult<()> {
        self.update(|tuple| *tuple = value)
    }

    /// Modify the tuple in place. Requires a granted write lock.
    ///
    /// Local rows are changed directly; a remote copy travels back with the
    /// unlock at commit.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> PtxResult<R> {
        if !self.mode.is_write() {
            return Err(PtxError::InvalidAccessMode(format!(
                "update through a {} future",
                self.mode.clean()
            )));
        }
        if !self.wait()? {
            return Err(PtxError::InvalidAccessMode(
                "update through a failed future".to_string(),
            ));
        }
        match &self.origin {
            Origin::Local { table, key } => table
                .row(*key)
                .map(|row| row.update(f))
                .ok_or_else(|| PtxError::InvalidAccessMode(format!("key {} is not populated", key))),
            Origin::Remote { slot } => slot
                .lock()
                .as_mut()
                .map(|copy| f(&mut copy.tuple))
                .ok_or_else(|| {
                    PtxError::InvalidAccessMode("remote tuple already released".to_string())
                }),
        }
    }

    fn accept(&self, slot: &Mutex<Option<RemoteCopy<T>>>, pkt: Packet) -> PtxResult<()> {
        let header = pkt.tuple_header()?;
        if header.mode.is_invalid() {
            self.resolve(FAILED);
            return Ok(());
        }

        let payload = pkt.tuple_payload();
        if payload.len() != T::SIZE {
            return Err(PtxError::ProtocolViolation(format!(
                "response carries {} tuple bytes, expected {}",
                payload.len(),
                T::SIZE
            )));
        }
        let tuple = T::from_bytes(payload)?;
        *slot.lock() = Some(RemoteCopy { tuple, pkt });
        self.resolve(GRANTED);
        Ok(())
    }
}

impl<T: Tuple> AbstractFuture for TupleFuture<T> {
    fn set_pkt(&self, pkt: Packet) -> PtxResult<()> {
        let Origin::Remote { slot } = &self.origin else {
            return Err(PtxError::ProtocolViolation(
                "response delivered to a local future".to_string(),
            ));
        };
        if self.is_resolved() {
            return Err(PtxError::ProtocolViolation(
                "second response for a resolved future".to_string(),
            ));
        }
        let result = self.accept(slot, pkt);
        if let Err(e) = &result {
            self.set_fault(e.to_string());
        }
        result
    }

    fn abort(&self, reason: &str) {
        self.set_fault(reason.to_string());
    }
}

impl<T: Tuple> LockGrant for TupleFuture<T> {
    fn grant(&self) {
        self.resolve(GRANTED);
    }

    fn deny(&self) {
        self.resolve(FAILED);
    }
}

impl<T: Tuple> HeldLock for TupleFuture<T> {
    fn mode(&self) -> AccessMode {
        self.mode
    }

    fn is_failed(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), FAILED | FAULTED)
    }

    fn unlock_packet(&self, sender: NodeAddr) -> PtxResult<Packet> {
        let Origin::Remote { slot } = &self.origin else {
            return Err(PtxError::UndoFailed(
                "local lock has no unlock packet".to_string(),
            ));
        };
        let RemoteCopy { tuple, mut pkt } = slot
            .lock()
            .take()
            .ok_or_else(|| PtxError::UndoFailed("remote lock released twice".to_string()))?;

        pkt.convert(MsgType::TuplePutReq)?;
        pkt.set_sender(sender)?;
        if self.mode.is_write() {
            pkt.set_tuple_payload(&tuple.to_bytes()?)?;
        } else {
            pkt.strip_tuple_payload()?;
        }
        Ok(pkt)
    }
}

impl<T: Tuple> std::fmt::Debug for TupleFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TupleFuture")
            .field("state", &self.state.load(Ordering::Relaxed))
            .field("mode", &self.mode)
            .field("remote", &self.is_remote())
            .finish()
    }
}

/// Future of an `atomic()` switch transaction.
#[derive(Debug, Default)]
pub struct SwitchFuture {
    pkt: Mutex<Option<Packet>>,
    state: AtomicU8,
    fault: Mutex<Option<String>>,
}

impl SwitchFuture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resolved(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    /// Spin until the switch answered, then take the response.
    pub fn wait_pkt(&self) -> PtxResult<Packet> {
        spin(&self.state, &self.fault)?;
        self.pkt.lock().take().ok_or_else(|| {
            PtxError::ProtocolViolation("switch response already consumed".to_string())
        })
    }
}

impl AbstractFuture for SwitchFuture {
    fn set_pkt(&self, pkt: Packet) -> PtxResult<()> {
        let mut slot = self.pkt.lock();
        if self.is_resolved() {
            return Err(PtxError::ProtocolViolation(
                "second response for a switch transaction".to_string(),
            ));
        }
        *slot = Some(pkt);
        self.state.store(GRANTED, Ordering::Release);
        Ok(())
    }

    fn abort(&self, reason: &str) {
        *self.fault.lock() = Some(reason.to_string());
        let _ = self
            .state
            .compare_exchange(PENDING, FAULTED, Ordering::AcqRel, Ordering::Acquire);
    }
}

/// Per-transaction allocation bound for futures.
///
/// Keeps every future of the running transaction alive until commit or
/// rollback resets it.
pub struct FutureArena {
    live: Vec<Arc<dyn Any + Send + Sync>>,
    capacity: usize,
}

impl FutureArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            live: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn allocate<F: Send + Sync + 'static>(&mut self, future: F) -> PtxResult<Arc<F>> {
        if self.live.len() >= self.capacity {
            return Err(PtxError::ArenaExhausted {
                arena: "future",
                capacity: self.capacity,
            });
        }
        let future = Arc::new(future);
        self.live.push(future.clone());
        Ok(future)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn reset(&mut self) {
        self.live.clear();
    }
}

impl std::fmt::Debug for FutureArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FutureArena")
            .field("len", &self.live.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
