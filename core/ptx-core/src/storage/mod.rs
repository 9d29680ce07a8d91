//! Storage module: fixed-capacity tables of locked rows.
//!
//! Tables of different tuple types are reached from the message dispatch
//! path and the undo log through the object-safe [`TableHandle`] trait;
//! workloads use the typed [`Table`] directly.

pub mod catalog;
pub mod partition;
pub mod row;
pub mod table;
pub mod tuple;

pub use catalog::Catalog;
pub use partition::{LocationInfo, PartitionKind, Partitioner, RangePartition};
pub use row::{LockGrant, Row, Waiter};
pub use table::Table;
pub use tuple::Tuple;

use crate::comm::Packet;
use crate::error::{ErrorCode, PtxResult};
use crate::types::{AccessMode, Key, TableId, Timestamp};
use std::any::Any;
use std::sync::Arc;

/// Type-erased table interface.
///
/// # Contract
///
/// - `put`: releases a lock held by a local transaction.
/// - `remote_get`: consumes a `TupleGetReq` and answers it, now or on a
///   later unlock.
/// - `remote_put`: applies a `TuplePutReq`; the caller sends the `TuplePutRes`.
/// - `verify`: number of rows still locked or with waiters.
pub trait TableHandle: Send + Sync {
    fn id(&self) -> TableId;

    fn name(&self) -> &str;

    /// Size of the tuple wire image.
    fn tuple_size(&self) -> usize;

    /// Populated rows.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn put(&self, key: Key, mode: AccessMode, ts: Timestamp) -> PtxResult<ErrorCode>;

    fn remote_get(&self, pkt: Packet) -> PtxResult<()>;

    fn remote_put(&self, pkt: &Packet) -> PtxResult<ErrorCode>;

    fn verify(&self) -> usize;

    /// For typed lookups through the catalog.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
