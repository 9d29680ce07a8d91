//! # PTX: Partitioned Transaction eXecutor
//!
//! PTX는 파티션된 OLTP 데이터베이스의 트랜잭션 실행 코어입니다.
//! 노드마다 고정 크기 테이블을 두고, 행 단위 잠금으로 로컬/원격 트랜잭션을 실행하며,
//! 핫 로우에 대한 트랜잭션은 프로그래머블 스위치로 오프로드합니다.
//!
//! ## 주요 특징
//!
//! - **Row Lock**: None / No-Wait / Wait-Die, chosen per database
//! - **Remote access**: `TupleGetReq` → future → `TuplePutReq` with acknowledged unlock
//! - **Undo Log**: commit and rollback release every lock, local or remote
//! - **Switch Bridge**: `atomic()` ships one opaque program to the switch
//! - **LocalNetwork**: the whole protocol in-process, one dispatch thread per node
//!
//! ## 빠른 시작
//!
//! ```rust
//! use ptx_core::{check, CcScheme, Database, EngineConfig, Key, LocalNetwork, NodeId};
//! use ptx_core::{PartitionKind, PtxResult, Table, Transaction, TxnOutcome, Workload};
//! use std::sync::Arc;
//!
//! struct Deposit(Arc<Table<u64>>);
//!
//! impl Workload for Deposit {
//!     type Arg = (Key, u64);
//!
//!     fn run(&self, txn: &mut Transaction, &(key, amount): &(Key, u64)) -> PtxResult<TxnOutcome> {
//!         let account = check!(txn, txn.write(&self.0, key));
//!         account.update(|balance| *balance += amount)?;
//!         txn.commit()
//!     }
//! }
//!
//! # fn main() -> PtxResult<()> {
//! let net = LocalNetwork::new(1);
//! let db = Database::new(EngineConfig::single_node(1, CcScheme::WaitDie), net.endpoint(NodeId(0)))?;
//! let accounts = db.make_table::<u64>("accounts", 4, PartitionKind::Replicated)?;
//! accounts.populate(4, |_| 0)?;
//!
//! let mut txn = db.transaction(0)?;
//! let stats = txn.execute_batch(&Deposit(accounts.clone()), &[(Key(1), 5), (Key(1), 7)])?;
//! assert_eq!(stats.commits, 2);
//! assert_eq!(accounts.peek(Key(1)), Some(12));
//! # Ok(())
//! # }
//! ```
//!
//! ## 모듈 구조
//!
//! - [`engine`]: 노드 엔진 ([`Database`]), bring-up and barriers
//! - [`transaction`]: orchestrator, futures, undo log, switch bridge, batch executor
//! - [`storage`]: tables, rows, partitioning, catalog
//! - [`cc`]: row lock state machines
//! - [`comm`]: wire format, message dispatch, in-process transport
//! - [`config`]: [`EngineConfig`]

pub mod cc;
pub mod comm;
pub mod config;
pub mod engine;
pub mod error;
pub mod storage;
pub mod transaction;
pub mod types;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use comm::{Communicator, LocalNetwork, Packet, PacketSink};
pub use config::EngineConfig;
pub use engine::Database;
pub use error::{ErrorCode, PtxError, PtxResult};
pub use storage::{PartitionKind, Table, Tuple};
pub use transaction::{
    ExecutorStats, SwitchHandle, SwitchProgram, TimestampSource, Transaction, TupleFuture,
    TxnOutcome, Workload,
};
pub use types::{AccessMode, CcScheme, Key, NodeAddr, NodeId, TableId, Timestamp, WorkerContext};
