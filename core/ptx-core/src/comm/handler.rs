//! Inbound message dispatch and the small handlers it drives.

use super::packet::{MsgType, Packet};
use super::registry::{AbstractFuture, OpenFutures};
use super::{Communicator, PacketSink};
use crate::config::EngineConfig;
use crate::error::{PtxError, PtxResult};
use crate::storage::Catalog;
use crate::storage::row::reject_remote;
use crate::types::{AccessMode, MsgId, NodeAddr, NodeId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tracing::{debug, error, info, instrument};

const INIT_RETRY: Duration = Duration::from_millis(100);

/// Cluster bring-up: which peers have announced themselves.
#[derive(Debug)]
pub struct InitHandler {
    seen: Box<[AtomicBool]>,
}

impl InitHandler {
    pub fn new(num_nodes: u32) -> Self {
        Self {
            seen: (0..num_nodes).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    pub fn handle(&self, node: NodeId) -> PtxResult<()> {
        match self.seen.get(node.0 as usize) {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                Ok(())
            }
            None => Err(PtxError::ProtocolViolation(format!(
                "init from unknown node {}",
                node
            ))),
        }
    }

    pub fn all_seen(&self) -> bool {
        self.seen.iter().all(|f| f.load(Ordering::Acquire))
    }

    /// Broadcast `Init` every 100 ms until every node was heard from, then
    /// once more so late peers see us too.
    pub fn wait(&self, comm: &dyn Communicator, sender: NodeAddr) -> PtxResult<()> {
        loop {
            let done = self.all_seen();
            for node in 0..comm.num_nodes() {
                comm.send(NodeId(node), Packet::init(sender))?;
            }
            if done {
                break;
            }
            std::thread::sleep(INIT_RETRY);
        }
        info!(node = %comm.node_id(), "init done");
        Ok(())
    }
}

/// Node-wide barrier over all nodes, optionally entered by all local workers.
#[derive(Debug)]
pub struct BarrierHandler {
    num_nodes: u32,
    received: AtomicU32,
    local: AtomicU32,
    workers: Barrier,
}

impl BarrierHandler {
    pub fn new(num_nodes: u32, num_workers: u32) -> Self {
        Self {
            num_nodes,
            received: AtomicU32::new(0),
            local: AtomicU32::new(0),
            workers: Barrier::new(num_workers as usize),
        }
    }

    pub fn handle(&self) {
        self.received.fetch_add(1, Ordering::AcqRel);
    }

    /// Broadcast `Barrier` and wait for one from every node.
    pub fn wait_nodes(&self, comm: &dyn Communicator, sender: NodeAddr) -> PtxResult<()> {
        for node in 0..self.num_nodes {
            comm.send(NodeId(node), Packet::barrier(sender))?;
        }
        while self.received.load(Ordering::Acquire) < self.num_nodes {
            std::hint::spin_loop();
        }
        self.received.fetch_sub(self.num_nodes, Ordering::AcqRel);
        info!(node = %comm.node_id(), "barrier wait done");
        Ok(())
    }

    /// Called by every local worker; exactly one of them runs the node
    /// barrier while the others wait for it.
    pub fn wait_workers(&self, comm: &dyn Communicator, sender: NodeAddr) -> PtxResult<()> {
        let my_turn = self.local.fetch_add(1, Ordering::AcqRel);
        self.workers.wait();
        let result = if my_turn == 0 {
            let result = self.wait_nodes(comm, sender);
            self.local.store(0, Ordering::Release);
            result
        } else {
            Ok(())
        };
        self.workers.wait();
        result
    }
}

/// Outstanding remote unlocks per worker.
///
/// An owner that could not apply an unlock still acknowledges it, with the
/// mode set to `Invalid`; the issuing worker's next [`wait`](Self::wait)
/// reports it.
#[derive(Debug)]
pub struct PutResponseTracker {
    counts: Box<[AtomicU64]>,
    rejected: Box<[AtomicBool]>,
    /// Set once the dispatch thread is gone; nothing will be acknowledged.
    poisoned: AtomicBool,
}

impl PutResponseTracker {
    pub fn new(slots: usize) -> Self {
        Self {
            counts: (0..slots).map(|_| AtomicU64::new(0)).collect(),
            rejected: (0..slots).map(|_| AtomicBool::new(false)).collect(),
            poisoned: AtomicBool::new(false),
        }
    }

    fn slot(&self, worker: u32) -> PtxResult<&AtomicU64> {
        self.counts.get(worker as usize).ok_or_else(|| {
            PtxError::ProtocolViolation(format!("put response for unknown worker {}", worker))
        })
    }

    pub fn add(&self, worker: u32) -> PtxResult<()> {
        self.slot(worker)?.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Undo an `add` whose request never left.
    pub fn cancel(&self, worker: u32) -> PtxResult<()> {
        self.release(worker)
    }

    /// A `TuplePutRes` arrived for the worker packed into `addr`.
    pub fn handle(&self, addr: NodeAddr) -> PtxResult<()> {
        self.release(addr.worker())
    }

    /// A `TuplePutRes` with an invalid mode: acknowledged, but not applied.
    pub fn handle_rejected(&self, addr: NodeAddr) -> PtxResult<()> {
        if let Some(flag) = self.rejected.get(addr.worker() as usize) {
            flag.store(true, Ordering::Release);
        }
        self.release(addr.worker())
    }

    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    fn release(&self, worker: u32) -> PtxResult<()> {
        self.slot(worker)?
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                PtxError::ProtocolViolation(format!("unexpected put response for worker {}", worker))
            })
    }

    pub fn outstanding(&self, worker: u32) -> u64 {
        self.slot(worker)
            .map(|c| c.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Spin until every unlock of `worker` was acknowledged.
    pub fn wait(&self, worker: u32) -> PtxResult<()> {
        let counter = self.slot(worker)?;
        while counter.load(Ordering::Acquire) != 0 {
            if self.poisoned.load(Ordering::Acquire) {
                return Err(PtxError::ProtocolViolation(format!(
                    "dispatch stopped with {} unlocks of worker {} unacknowledged",
                    counter.load(Ordering::Acquire),
                    worker
                )));
            }
            std::hint::spin_loop();
        }
        let rejected = self
            .rejected
            .get(worker as usize)
            .is_some_and(|flag| flag.swap(false, Ordering::AcqRel));
        if rejected {
            return Err(PtxError::UndoFailed(format!(
                "an owner rejected a remote unlock of worker {}",
                worker
            )));
        }
        Ok(())
    }
}

/// Dispatches every inbound packet of one node.
pub struct MessageHandler {
    catalog: Arc<Catalog>,
    comm: Arc<dyn Communicator>,
    /// Worker slot used for packets sent from the dispatch thread.
    worker: u32,
    next_id: AtomicU64,
    open_futures: OpenFutures,
    /// First error that stopped the dispatch thread.
    fatal: Mutex<Option<String>>,
    pub init: InitHandler,
    pub barrier: BarrierHandler,
    pub put_responses: PutResponseTracker,
}

impl MessageHandler {
    pub fn new(
        config: &EngineConfig,
        catalog: Arc<Catalog>,
        comm: Arc<dyn Communicator>,
    ) -> PtxResult<Self> {
        Ok(Self {
            catalog,
            comm,
            worker: config.num_workers,
            next_id: AtomicU64::new(0),
            open_futures: OpenFutures::new(config.registry_buckets, config.registry_slots)?,
            fatal: Mutex::new(None),
            init: InitHandler::new(config.num_nodes),
            barrier: BarrierHandler::new(config.num_nodes, config.num_workers),
            put_responses: PutResponseTracker::new(config.num_workers as usize + 1),
        })
    }

    pub fn dispatch_worker(&self) -> u32 {
        self.worker
    }

    /// Stamp a fresh message id into `pkt`.
    pub fn set_new_id(&self, pkt: &mut Packet) -> PtxResult<MsgId> {
        let id = MsgId(self.next_id.fetch_add(1, Ordering::Relaxed));
        pkt.set_msg_id(id)?;
        Ok(id)
    }

    /// Register the future awaiting the response to `id`.
    ///
    /// Fails once the dispatch thread has stopped, since nothing would ever
    /// complete the future.
    pub fn add_future(&self, id: MsgId, future: Arc<dyn AbstractFuture>) -> PtxResult<()> {
        self.open_futures.insert(id, future)?;
        // a concurrent `fail` drains before or after this insert; check after
        if let Some(err) = self.fatal_error() {
            let _ = self.open_futures.erase(id);
            return Err(err);
        }
        Ok(())
    }

    /// Drop the future of a request that never left.
    pub fn cancel_future(&self, id: MsgId) -> PtxResult<()> {
        self.open_futures.erase(id).map(|_| ())
    }

    /// The error that stopped this node's dispatch thread, if any.
    pub fn fatal_error(&self) -> Option<PtxError> {
        self.fatal
            .lock()
            .as_ref()
            .map(|reason| PtxError::ProtocolViolation(format!("dispatch stopped: {}", reason)))
    }

    /// Futures still waiting for a response.
    pub fn open_futures(&self) -> usize {
        self.open_futures.len()
    }

    fn complete(&self, pkt: Packet) -> PtxResult<()> {
        let id = pkt.msg_id()?;
        let future = self.open_futures.erase(id)?;
        future.set_pkt(pkt)
    }

    /// Apply a `TuplePutReq` and always acknowledge it, so the requester's
    /// commit never waits on a lost answer. A failed put is acknowledged
    /// with an invalid mode and its error returned afterwards.
    fn answer_put(&self, mut pkt: Packet) -> PtxResult<()> {
        let header = pkt.tuple_header()?;
        let applied = self
            .catalog
            .by_id(header.table)
            .and_then(|table| table.remote_put(&pkt));
        if !matches!(applied, Ok(code) if code.is_ok()) {
            error!(table = header.table.0, key = %header.key, ?applied, "remote put failed");
            pkt.set_tuple_mode(header.mode.with_mode(AccessMode::INVALID))?;
        }

        pkt.convert(MsgType::TuplePutRes)?;
        pkt.strip_tuple_payload()?;
        let target = pkt.sender()?.node();
        self.comm.send(target, pkt)?;
        applied.map(|_| ())
    }

    fn answer_get(&self, pkt: Packet) -> PtxResult<()> {
        let header = pkt.tuple_header()?;
        match self.catalog.by_id(header.table) {
            Ok(table) => table.remote_get(pkt),
            Err(e) => {
                error!(table = header.table.0, key = %header.key, "get for unknown table");
                reject_remote(pkt, self.comm.as_ref())?;
                Err(e)
            }
        }
    }
}

impl PacketSink for MessageHandler {
    #[instrument(level = "trace", skip_all, fields(node = %self.comm.node_id()))]
    fn handle(&self, pkt: Packet) -> PtxResult<()> {
        let sender = pkt.sender()?;
        match pkt.msg_type()? {
            MsgType::Init => {
                info!(from = %sender.node(), "received init");
                self.init.handle(sender.node())
            }
            MsgType::Barrier => {
                debug!(from = %sender.node(), "received barrier");
                self.barrier.handle();
                Ok(())
            }
            MsgType::TupleGetReq => self.answer_get(pkt),
            MsgType::TupleGetRes | MsgType::SwitchTxn => self.complete(pkt),
            MsgType::TuplePutReq => self.answer_put(pkt),
            MsgType::TuplePutRes => {
                if pkt.tuple_header()?.mode.is_invalid() {
                    error!(from = %sender.node(), "received put response with invalid access mode");
                    return self.put_responses.handle_rejected(sender);
                }
                self.put_responses.handle(sender)
            }
        }
    }

    /// The dispatch thread stopped on `err`: wake every worker that waits
    /// for a response with that error.
    fn fail(&self, err: &PtxError) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(err.to_string());
            }
        }
        self.put_responses.poison();
        let reason = format!("dispatch stopped: {}", err);
        let pending = self.open_futures.drain();
        if !pending.is_empty() {
            error!(node = %self.comm.node_id(), pending = pending.len(), "aborting open futures");
        }
        for future in pending {
            future.abort(&reason);
        }
    }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("node", &self.comm.node_id())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .field("open_futures", &self.open_futures)
            .finish()
    }
}
