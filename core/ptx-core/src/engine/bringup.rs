//! Cluster bring-up and barriers

use crate::engine::Database;
use crate::error::PtxResult;
use crate::types::NodeAddr;
use tracing::instrument;

impl Database {
    /// Announce this node until every peer was heard from.
    ///
    /// The dispatch thread must already be attached.
    #[instrument(skip(self), fields(node = %self.config.node_id))]
    pub fn init(&self) -> PtxResult<()> {
        let sender = NodeAddr::new(self.config.node_id, 0);
        self.handler.init.wait(self.comm.as_ref(), sender)
    }

    /// Cluster-wide barrier, entered by one thread per node.
    pub fn barrier(&self) -> PtxResult<()> {
        let sender = NodeAddr::new(self.config.node_id, 0);
        self.handler.barrier.wait_nodes(self.comm.as_ref(), sender)
    }

    /// Cluster-wide barrier, entered by every local worker.
    pub fn wait_workers(&self, worker: u32) -> PtxResult<()> {
        let sender = NodeAddr::new(self.config.node_id, worker);
        self.handler.barrier.wait_workers(self.comm.as_ref(), sender)
    }
}
