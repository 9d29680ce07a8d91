//! Database struct definition: one node of the cluster

use crate::comm::{Communicator, MessageHandler, PacketSink};
use crate::config::EngineConfig;
use crate::error::PtxError;
use crate::storage::Catalog;
use crate::types::NodeId;
use std::sync::Arc;
use tracing::{info, warn};

/// PTX 노드 엔진
///
/// Owns the table catalog and the inbound message handler of one node, and
/// hands out one [`Transaction`](crate::Transaction) per worker.
///
/// # 구성
///
/// - **Catalog**: tables by name and by wire id
/// - **MessageHandler**: dispatch of every inbound packet; attach it to the
///   transport with [`Database::sink`]
/// - **Communicator**: outbound side of the transport
///
/// # 예제
///
/// ```rust
/// use ptx_core::{CcScheme, Database, EngineConfig, Key, LocalNetwork, NodeId, PartitionKind};
///
/// # fn main() -> ptx_core::PtxResult<()> {
/// let net = LocalNetwork::new(1);
/// let db = Database::new(EngineConfig::single_node(1, CcScheme::NoWait), net.endpoint(NodeId(0)))?;
/// let accounts = db.make_table::<u64>("accounts", 16, PartitionKind::Replicated)?;
/// accounts.populate(16, |_| 100)?;
///
/// let mut txn = db.transaction(0)?;
/// txn.begin()?;
/// if let Some(acc) = txn.write(&accounts, Key(3))? {
///     acc.update(|balance| *balance += 1)?;
/// }
/// let _ = txn.commit()?;
/// assert_eq!(accounts.peek(Key(3)), Some(101));
/// # Ok(())
/// # }
/// ```
pub struct Database {
    pub(crate) config: EngineConfig,

    /// Outbound transport
    pub(crate) comm: Arc<dyn Communicator>,

    /// Table registry: name → id → table
    pub(crate) catalog: Arc<Catalog>,

    /// Inbound dispatch, shared with the dispatch thread
    pub(crate) handler: Arc<MessageHandler>,
}

impl Database {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    /// 디스패치 스레드를 멈춘 치명적 오류
    pub fn fatal_error(&self) -> Option<PtxError> {
        self.handler.fatal_error()
    }

    /// The handler as a transport sink.
    pub fn sink(&self) -> Arc<dyn PacketSink> {
        self.handler.clone()
    }

    /// Rows still locked or with waiters over all tables.
    pub fn verify(&self) -> usize {
        let leaked = self.catalog.verify();
        if leaked > 0 {
            warn!(node = %self.config.node_id, leaked, "lock verification failed");
        } else {
            info!(node = %self.config.node_id, tables = self.catalog.len(), "lock verification passed");
        }
        leaked
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if self.config.verify {
            let _ = self.verify();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("node", &self.config.node_id)
            .field("scheme", &self.config.cc_scheme)
            .field("catalog", &self.catalog)
            .field("handler", &self.handler)
            .finish()
    }
}
