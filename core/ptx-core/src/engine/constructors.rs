//! Database Constructors: node setup, table creation and per-worker handles

use crate::comm::{Communicator, MessageHandler};
use crate::config::EngineConfig;
use crate::engine::Database;
use crate::error::{PtxError, PtxResult};
use crate::storage::{Catalog, PartitionKind, Partitioner, Table, Tuple};
use crate::transaction::{TimestampFactory, TimestampSource, Transaction};
use crate::types::WorkerContext;
use std::sync::Arc;
use tracing::{info, instrument};

impl Database {
    /// 노드 엔진을 생성합니다.
    ///
    /// The configuration is validated and has to agree with the transport
    /// about this node's id and the cluster size.
    #[instrument(skip_all, fields(node = %config.node_id))]
    pub fn new(config: EngineConfig, comm: Arc<dyn Communicator>) -> PtxResult<Arc<Self>> {
        config.validate()?;
        if comm.node_id() != config.node_id || comm.num_nodes() != config.num_nodes {
            return Err(PtxError::Config(format!(
                "transport is node {} of {}, config says node {} of {}",
                comm.node_id(),
                comm.num_nodes(),
                config.node_id,
                config.num_nodes
            )));
        }
        if comm.switch_id() != config.switch_id {
            return Err(PtxError::Config(format!(
                "transport routes the switch to {}, config says {}",
                comm.switch_id(),
                config.switch_id
            )));
        }

        let catalog = Arc::new(Catalog::new());
        let handler = Arc::new(MessageHandler::new(&config, catalog.clone(), comm.clone())?);
        info!(
            num_nodes = config.num_nodes,
            num_workers = config.num_workers,
            scheme = %config.cc_scheme,
            lock_on_switch = config.lock_on_switch,
            "database created"
        );
        Ok(Arc::new(Self {
            config,
            comm,
            catalog,
            handler,
        }))
    }

    /// 테이블 생성
    ///
    /// Rows are addressed by global key, so every node allocates `capacity`
    /// rows even for range-partitioned tables. With `lock_on_switch`, the hot
    /// prefix of each partition is locked on the switch.
    pub fn make_table<T: Tuple>(
        &self,
        name: &str,
        capacity: u64,
        kind: PartitionKind,
    ) -> PtxResult<Arc<Table<T>>> {
        let partitioner = match kind {
            PartitionKind::Replicated => Partitioner::replicated(),
            PartitionKind::Range => Partitioner::range(
                capacity,
                self.config.node_id,
                self.config.num_nodes,
                self.config.switch_id,
                if self.config.lock_on_switch {
                    self.config.hot_size
                } else {
                    0
                },
            )?,
        };
        let scheme = self.config.cc_scheme;
        let comm = self.comm.clone();
        self.catalog.register(name, |id| {
            Table::new(id, name, capacity, scheme, partitioner, comm)
        })
    }

    /// 이름으로 테이블 조회
    pub fn get_table<T: Tuple>(&self, name: &str) -> PtxResult<Arc<Table<T>>> {
        self.catalog.get(name)
    }

    /// Transaction handle for `worker`, timestamped from the clock.
    pub fn transaction(self: &Arc<Self>, worker: u32) -> PtxResult<Transaction> {
        self.transaction_with(worker, TimestampSource::Clock)
    }

    /// Transaction handle for `worker` drawing timestamps from `source`.
    pub fn transaction_with(
        self: &Arc<Self>,
        worker: u32,
        source: TimestampSource,
    ) -> PtxResult<Transaction> {
        if worker >= self.config.num_workers {
            return Err(PtxError::Config(format!(
                "worker {} out of range for {} workers",
                worker, self.config.num_workers
            )));
        }
        let ctx = WorkerContext::new(self.config.node_id, worker);
        Ok(Transaction::new(
            self.clone(),
            ctx,
            TimestampFactory::new(source, ctx),
        ))
    }
}
