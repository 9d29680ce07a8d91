//! Core value types shared by every layer: access modes, timestamps, keys,
//! node addresses and message ids.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Requested or held lock mode, optionally annotated with a switch index.
///
/// Layout of the 32-bit value:
///
/// ```text
/// bits 16..32  hot row index (switch register coordinate)
/// bits  8..16  0xAA when the request is redirected to the switch
/// bits  0..8   mode (0 = invalid, 1 = read, 2 = write)
/// ```
///
/// Encoded big-endian on the wire, so the switch sees the hot index in network
/// byte order ahead of the marker and mode bytes. Comparisons only ever look at
/// the low byte ([`AccessMode::clean`]).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessMode(u32);

const MODE_MASK: u32 = 0x0000_00ff;
const SWITCH_MARKER: u32 = 0x0000_aa00;

impl AccessMode {
    pub const INVALID: AccessMode = AccessMode(0);
    pub const READ: AccessMode = AccessMode(1);
    pub const WRITE: AccessMode = AccessMode(2);

    pub const fn from_raw(value: u32) -> Self {
        AccessMode(value)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The mode with every annotation bit stripped.
    pub const fn clean(self) -> AccessMode {
        AccessMode(self.0 & MODE_MASK)
    }

    pub fn is_read(self) -> bool {
        self.clean() == AccessMode::READ
    }

    pub fn is_write(self) -> bool {
        self.clean() == AccessMode::WRITE
    }

    pub fn is_invalid(self) -> bool {
        self.clean() == AccessMode::INVALID
    }

    /// Whether lock management for this request was delegated to the switch.
    pub fn by_switch(self) -> bool {
        (self.0 >> 8) & 0xff != 0
    }

    /// Hot row index carried by a switch-delegated request.
    pub fn switch_index(self) -> Option<u16> {
        self.by_switch().then_some((self.0 >> 16) as u16)
    }

    /// Annotate the mode with the absolute hot index of the target row.
    pub fn with_switch_index(self, idx: u16) -> AccessMode {
        AccessMode(self.clean().0 | SWITCH_MARKER | (u32::from(idx) << 16))
    }

    /// Same annotation bits, different mode.
    pub fn with_mode(self, mode: AccessMode) -> AccessMode {
        AccessMode((self.0 & !MODE_MASK) | mode.clean().0)
    }
}

impl fmt::Debug for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.switch_index() {
            Some(idx) => write!(f, "{}@switch[{}]", self.clean(), idx),
            None => write!(f, "{}", self.clean()),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.clean() {
            AccessMode::READ => f.write_str("READ"),
            AccessMode::WRITE => f.write_str("WRITE"),
            AccessMode::INVALID => f.write_str("INVALID"),
            other => write!(f, "UNKNOWN({:#x})", other.0),
        }
    }
}

/// Transaction timestamp; smaller means older (higher Wait-Die priority).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u64);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row key (primary key within a table).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub u64);

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dense table id, assigned in registration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u64);

/// Cluster node id. The switch is addressed like any other node.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Largest node id a [`NodeAddr`] can carry, switch included.
pub const MAX_NODE_ID: u32 = 0xff;

/// Worker slots a [`NodeAddr`] can carry, dispatch slot included.
pub const MAX_WORKER_SLOTS: u32 = 1 << 24;

/// Sender address: node id in the low byte, worker id above it.
///
/// Unlock acknowledgements are routed back to the issuing worker through the
/// worker part. [`EngineConfig::validate`](crate::config::EngineConfig::validate)
/// keeps both parts in range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeAddr(u32);

impl NodeAddr {
    pub fn new(node: NodeId, worker: u32) -> Self {
        debug_assert!(node.0 <= MAX_NODE_ID, "node id {} does not fit a NodeAddr", node);
        debug_assert!(worker < MAX_WORKER_SLOTS, "worker {} does not fit a NodeAddr", worker);
        NodeAddr((worker << 8) | (node.0 & MAX_NODE_ID))
    }

    pub const fn from_raw(value: u32) -> Self {
        NodeAddr(value)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn node(self) -> NodeId {
        NodeId(self.0 & MAX_NODE_ID)
    }

    pub fn worker(self) -> u32 {
        self.0 >> 8
    }
}

/// Message identifier used to match a response with its open future.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct MsgId(pub u64);

/// Concurrency control discipline, chosen once for the whole database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CcScheme {
    None,
    #[default]
    NoWait,
    WaitDie,
}

impl CcScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            CcScheme::None => "none",
            CcScheme::NoWait => "no_wait",
            CcScheme::WaitDie => "wait_die",
        }
    }

    pub fn parse_scheme(s: &str) -> Option<Self> {
        match s {
            "none" => Some(CcScheme::None),
            "no_wait" => Some(CcScheme::NoWait),
            "wait_die" => Some(CcScheme::WaitDie),
            _ => None,
        }
    }
}

impl fmt::Display for CcScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the thread issuing core calls.
///
/// Passed explicitly into the orchestrator, row operations and the message
/// handler instead of being looked up from thread-local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerContext {
    pub node: NodeId,
    pub worker: u32,
}

impl WorkerContext {
    pub fn new(node: NodeId, worker: u32) -> Self {
        Self { node, worker }
    }

    pub fn addr(&self) -> NodeAddr {
        NodeAddr::new(self.node, self.worker)
    }
}
