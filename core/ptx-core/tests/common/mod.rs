//! 통합 테스트 공용 헬퍼: in-process cluster and a stub switch

#![allow(dead_code)]

use parking_lot::Mutex;
use ptx_core::comm::{DispatchThread, LocalEndpoint, MsgType};
use ptx_core::{
    CcScheme, Communicator, Database, EngineConfig, LocalNetwork, NodeId, Packet, PacketSink,
    PtxError, PtxResult, TimestampSource,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// `num_nodes` databases on one [`LocalNetwork`], each with its dispatch
/// thread attached.
pub struct Cluster {
    pub net: Arc<LocalNetwork>,
    pub nodes: Vec<Arc<Database>>,
    dispatch: Vec<DispatchThread>,
}

impl Cluster {
    pub fn new(num_nodes: u32, num_workers: u32, scheme: CcScheme) -> PtxResult<Self> {
        Self::with_config(num_nodes, |node| {
            EngineConfig::cluster(node, num_nodes, num_workers, scheme)
        })
    }

    pub fn with_config(num_nodes: u32, config: impl Fn(u32) -> EngineConfig) -> PtxResult<Self> {
        ptx_core::logging::init_test();
        let net = LocalNetwork::new(num_nodes);
        let mut nodes = Vec::new();
        let mut dispatch = Vec::new();
        for node in 0..num_nodes {
            let db = Database::new(config(node), net.endpoint(NodeId(node)))?;
            dispatch.push(net.attach(NodeId(node), db.sink())?);
            nodes.push(db);
        }
        Ok(Self {
            net,
            nodes,
            dispatch,
        })
    }

    pub fn node(&self, id: u32) -> &Arc<Database> {
        &self.nodes[id as usize]
    }

    /// Attach a switch that answers switch transactions and hot-row requests.
    pub fn attach_switch(&mut self, registers: usize) -> PtxResult<Arc<StubSwitch>> {
        let switch = Arc::new(StubSwitch::new(
            self.net.endpoint(self.net.switch_id()),
            registers,
        ));
        self.dispatch
            .push(self.net.attach(self.net.switch_id(), switch.clone())?);
        Ok(switch)
    }

    /// Leaked locks over every node.
    pub fn verify(&self) -> usize {
        self.nodes.iter().map(|db| db.verify()).sum()
    }

    /// Unacknowledged remote unlocks over every node and worker.
    pub fn outstanding(&self) -> u64 {
        self.nodes
            .iter()
            .map(|db| {
                (0..=db.config().num_workers)
                    .map(|w| db.handler().put_responses.outstanding(w))
                    .sum::<u64>()
            })
            .sum()
    }
}

/// Transport that keeps outbound packets instead of delivering them.
pub struct Outbox {
    node: NodeId,
    num_nodes: u32,
    sent: Mutex<Vec<(NodeId, Packet)>>,
    link_down: AtomicBool,
}

impl Outbox {
    pub fn new(node: u32, num_nodes: u32) -> Arc<Self> {
        Arc::new(Self {
            node: NodeId(node),
            num_nodes,
            sent: Mutex::new(Vec::new()),
            link_down: AtomicBool::new(false),
        })
    }

    pub fn take(&self) -> Vec<(NodeId, Packet)> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Every later `send` fails with a transport error.
    pub fn cut(&self) {
        self.link_down.store(true, Ordering::SeqCst);
    }
}

impl Communicator for Outbox {
    fn send(&self, target: NodeId, pkt: Packet) -> PtxResult<()> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(PtxError::Transport(format!("link to node {} is down", target)));
        }
        self.sent.lock().push((target, pkt));
        Ok(())
    }

    fn node_id(&self) -> NodeId {
        self.node
    }

    fn num_nodes(&self) -> u32 {
        self.num_nodes
    }

    fn switch_id(&self) -> NodeId {
        NodeId(self.num_nodes)
    }
}

/// Poll `cond` for up to two seconds.
pub fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Shared logical clock, so timestamps order across nodes deterministically.
pub fn shared_clock() -> TimestampSource {
    TimestampSource::Shared(Arc::new(ptx_core::transaction::SharedClock::new()))
}

/// Switch stand-in.
///
/// `SwitchTxn` bodies are a sequence of `(register: u16, delta: i64)` pairs;
/// every delta is added and the reply lists the new register values as u64.
/// Hot-row requests read and write the register at the carried switch index
/// and are always granted.
pub struct StubSwitch {
    comm: Arc<LocalEndpoint>,
    registers: Mutex<Vec<u64>>,
    pub txns: AtomicU64,
    pub hot_gets: AtomicU64,
    pub hot_puts: AtomicU64,
}

impl StubSwitch {
    fn new(comm: Arc<LocalEndpoint>, registers: usize) -> Self {
        Self {
            comm,
            registers: Mutex::new(vec![0; registers]),
            txns: AtomicU64::new(0),
            hot_gets: AtomicU64::new(0),
            hot_puts: AtomicU64::new(0),
        }
    }

    pub fn register(&self, idx: usize) -> u64 {
        self.registers.lock()[idx]
    }

    pub fn set_register(&self, idx: usize, value: u64) {
        self.registers.lock()[idx] = value;
    }

    fn run_program(&self, pkt: &Packet) -> PtxResult<Packet> {
        let mut reader = ptx_core::comm::BufferReader::new(pkt.switch_data());
        let mut registers = self.registers.lock();
        let mut results = Vec::new();
        while reader.remaining() > 0 {
            let idx = reader.read_u16()? as usize;
            let delta = reader.read_i64()?;
            let reg = registers.get_mut(idx).ok_or_else(|| {
                PtxError::ProtocolViolation(format!("register {} out of range", idx))
            })?;
            *reg = reg.wrapping_add_signed(delta);
            results.push(*reg);
        }

        let mut reply = Packet::switch_txn(pkt.sender()?, |w| {
            results.iter().try_for_each(|v| w.write_u64(*v))
        })?;
        reply.set_msg_id(pkt.msg_id()?)?;
        Ok(reply)
    }

    fn hot_index(&self, pkt: &Packet) -> PtxResult<usize> {
        let mode = pkt.tuple_header()?.mode;
        mode.switch_index()
            .map(usize::from)
            .ok_or_else(|| PtxError::ProtocolViolation("hot request without switch index".into()))
    }
}

impl PacketSink for StubSwitch {
    fn handle(&self, mut pkt: Packet) -> PtxResult<()> {
        let target = pkt.sender()?.node();
        match pkt.msg_type()? {
            MsgType::SwitchTxn => {
                self.txns.fetch_add(1, Ordering::SeqCst);
                let reply = self.run_program(&pkt)?;
                self.comm.send(target, reply)
            }
            MsgType::TupleGetReq => {
                self.hot_gets.fetch_add(1, Ordering::SeqCst);
                let value = self.register(self.hot_index(&pkt)?);
                pkt.convert(MsgType::TupleGetRes)?;
                pkt.set_tuple_payload(&value.to_be_bytes())?;
                self.comm.send(target, pkt)
            }
            MsgType::TuplePutReq => {
                self.hot_puts.fetch_add(1, Ordering::SeqCst);
                let idx = self.hot_index(&pkt)?;
                if pkt.tuple_header()?.mode.is_write() {
                    let bytes: [u8; 8] = pkt.tuple_payload().try_into().map_err(|_| {
                        PtxError::ProtocolViolation("hot rows are 8 bytes wide".into())
                    })?;
                    self.set_register(idx, u64::from_be_bytes(bytes));
                }
                pkt.convert(MsgType::TuplePutRes)?;
                pkt.strip_tuple_payload()?;
                self.comm.send(target, pkt)
            }
            other => Err(PtxError::ProtocolViolation(format!(
                "switch cannot handle {:?}",
                other
            ))),
        }
    }
}
