//! Messaging layer.
//!
//! The core talks to the network only through [`Communicator`] (outbound)
//! and [`PacketSink`] (inbound, called on the node's dispatch thread).
//! [`local::LocalNetwork`] provides both in-process.

pub mod buffer;
pub mod handler;
pub mod local;
pub mod packet;
pub mod registry;

pub use buffer::{BufferReader, BufferWriter};
pub use handler::{BarrierHandler, InitHandler, MessageHandler, PutResponseTracker};
pub use local::{DispatchThread, LocalEndpoint, LocalNetwork};
pub use packet::{MTU, MsgType, Packet, TupleMsgHeader};
pub use registry::{AbstractFuture, OpenFutures};

use crate::error::{PtxError, PtxResult};
use crate::types::NodeId;

/// Outbound side of the transport.
pub trait Communicator: Send + Sync {
    /// Fresh packet buffer.
    fn make_pkt(&self) -> Packet {
        Packet::new()
    }

    /// Hand `pkt` to the transport for delivery to `target`.
    fn send(&self, target: NodeId, pkt: Packet) -> PtxResult<()>;

    fn node_id(&self) -> NodeId;

    /// Number of database nodes, not counting the switch.
    fn num_nodes(&self) -> u32;

    fn switch_id(&self) -> NodeId;
}

/// Inbound side: consumes every packet addressed to this node.
pub trait PacketSink: Send + Sync {
    fn handle(&self, pkt: Packet) -> PtxResult<()>;

    /// `handle` failed and the dispatch thread is stopping; no packet will
    /// be delivered after this call.
    fn fail(&self, _err: &PtxError) {}
}
