//! Fixed-capacity table of rows.

use super::TableHandle;
use super::partition::{LocationInfo, Partitioner};
use super::row::{LockGrant, Row, reject_remote};
use super::tuple::Tuple;
use crate::comm::{Communicator, Packet};
use crate::error::{ErrorCode, PtxError, PtxResult};
use crate::types::{AccessMode, CcScheme, Key, TableId, Timestamp};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// A table of `capacity` rows of `T`.
///
/// Rows are allocated up front and never move. `len` rows are populated;
/// keys at or above `len` are rejected with [`ErrorCode::InvalidRowId`].
pub struct Table<T: Tuple> {
    id: TableId,
    name: String,
    rows: Box<[Row<T>]>,
    size: AtomicU64,
    /// Serializes appends so a slot is prepared before it becomes visible.
    append: Mutex<()>,
    partitioner: Partitioner,
    comm: Arc<dyn Communicator>,
}

impl<T: Tuple> Table<T> {
    pub fn new(
        id: TableId,
        name: impl Into<String>,
        capacity: u64,
        scheme: CcScheme,
        partitioner: Partitioner,
        comm: Arc<dyn Communicator>,
    ) -> Self {
        let name = name.into();
        info!(
            table = %name,
            id = id.0,
            capacity,
            %scheme,
            bytes = capacity as usize * std::mem::size_of::<Row<T>>(),
            "creating table"
        );
        Self {
            id,
            name,
            rows: (0..capacity).map(|_| Row::new(scheme)).collect(),
            size: AtomicU64::new(0),
            append: Mutex::new(()),
            partitioner,
            comm,
        }
    }

    pub fn id(&self) -> TableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> u64 {
        self.rows.len() as u64
    }

    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    pub fn location(&self, key: Key) -> LocationInfo {
        self.partitioner.location(key)
    }

    /// Whether `key` can name a row of this table on any node.
    pub fn contains(&self, key: Key) -> bool {
        self.partitioner.contains(key) && self.partitioner.translate(key) < self.capacity()
    }

    /// Populated row for `key`.
    pub fn row(&self, key: Key) -> Option<&Row<T>> {
        let idx = self.partitioner.translate(key);
        if idx >= self.len() {
            return None;
        }
        self.rows.get(idx as usize)
    }

    /// Lock `key` for a local worker.
    pub fn get(
        &self,
        key: Key,
        mode: AccessMode,
        ts: Timestamp,
        grant: Arc<dyn LockGrant>,
    ) -> ErrorCode {
        if !self.contains(key) {
            return ErrorCode::InvalidRowId;
        }
        match self.row(key) {
            Some(row) => row.local_lock(mode, ts, grant),
            None => ErrorCode::InvalidRowId,
        }
    }

    /// Release a lock taken by [`get`](Self::get).
    pub fn put(&self, key: Key, mode: AccessMode, ts: Timestamp) -> PtxResult<ErrorCode> {
        match self.row(key) {
            Some(row) => {
                debug!(table = %self.name, key = %key, %mode, "local put");
                row.local_unlock(mode, ts, self.comm.as_ref())
            }
            None => Ok(ErrorCode::InvalidRowId),
        }
    }

    /// Claim the next free slot.
    ///
    /// The slot is not locked; a full table is left unchanged.
    pub fn insert(&self) -> PtxResult<Key> {
        self.append_with(|_, _| Ok(())).map(|(key, ())| key)
    }

    /// Claim the next free slot and run `prepare` on it before any other
    /// worker can reach the key.
    ///
    /// Keys at or above `len` are refused by [`get`](Self::get), so a lock
    /// taken inside `prepare` is held before the key is published. If
    /// `prepare` fails the slot stays free.
    pub fn append_with<R>(
        &self,
        prepare: impl FnOnce(Key, &Row<T>) -> PtxResult<R>,
    ) -> PtxResult<(Key, R)> {
        let _append = self.append.lock();
        let size = self.size.load(Ordering::Acquire);
        let Some(row) = self.rows.get(size as usize) else {
            return Err(PtxError::TableFull {
                table: self.name.clone(),
                capacity: self.capacity(),
            });
        };
        let key = Key(size);
        let out = prepare(key, row)?;
        self.size.store(size + 1, Ordering::Release);
        Ok((key, out))
    }

    /// Append `value` outside any transaction. For bulk loading.
    pub fn load(&self, value: T) -> PtxResult<Key> {
        self.append_with(|_, row| {
            row.store(value);
            Ok(())
        })
        .map(|(key, ())| key)
    }

    /// Load `count` rows produced by `f`.
    pub fn populate(&self, count: u64, mut f: impl FnMut(Key) -> T) -> PtxResult<()> {
        for _ in 0..count {
            self.append_with(|key, row| {
                row.store(f(key));
                Ok(())
            })?;
        }
        Ok(())
    }

    /// Unlocked read, for loaders and verification.
    pub fn peek(&self, key: Key) -> Option<T> {
        self.row(key).map(Row::read)
    }

    /// Answer a `TupleGetReq` for one of our rows.
    pub fn remote_get(&self, pkt: Packet) -> PtxResult<()> {
        let header = pkt.tuple_header()?;
        match self.row(header.key) {
            Some(row) => row.remote_lock(pkt, self.comm.as_ref()),
            None => {
                warn!(table = %self.name, key = %header.key, "remote get on missing row");
                reject_remote(pkt, self.comm.as_ref())
            }
        }
    }

    /// Apply a `TuplePutReq` for one of our rows.
    pub fn remote_put(&self, pkt: &Packet) -> PtxResult<ErrorCode> {
        let header = pkt.tuple_header()?;
        debug!(table = %self.name, key = %header.key, mode = %header.mode, "remote put");
        match self.row(header.key) {
            Some(row) => row.remote_unlock(pkt, self.comm.as_ref()),
            None => Ok(ErrorCode::InvalidRowId),
        }
    }

    /// Count rows that are still locked or have waiters, logging each.
    pub fn verify(&self) -> usize {
        let mut leaked = 0;
        for (idx, row) in self.rows.iter().enumerate() {
            if !row.check() {
                warn!(table = %self.name, row = idx, mode = %row.mode(), "check failed");
                leaked += 1;
            }
        }
        leaked
    }
}

impl<T: Tuple> std::fmt::Debug for Table<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("partitioner", &self.partitioner)
            .finish()
    }
}

impl<T: Tuple> TableHandle for Table<T> {
    fn id(&self) -> TableId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn tuple_size(&self) -> usize {
        T::SIZE
    }

    fn len(&self) -> u64 {
        Table::len(self)
    }

    fn put(&self, key: Key, mode: AccessMode, ts: Timestamp) -> PtxResult<ErrorCode> {
        Table::put(self, key, mode, ts)
    }

    fn remote_get(&self, pkt: Packet) -> PtxResult<()> {
        Table::remote_get(self, pkt)
    }

    fn remote_put(&self, pkt: &Packet) -> PtxResult<ErrorCode> {
        Table::remote_put(self, pkt)
    }

    fn verify(&self) -> usize {
        Table::verify(self)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;
    use std::sync::atomic::AtomicU8;

    struct NullComm;

    impl Communicator for NullComm {
        fn send(&self, target: NodeId, _pkt: Packet) -> PtxResult<()> {
            Err(PtxError::Transport(format!("no route to {}", target)))
        }
        fn node_id(&self) -> NodeId {
            NodeId(0)
        }
        fn num_nodes(&self) -> u32 {
            1
        }
        fn switch_id(&self) -> NodeId {
            NodeId(1)
        }
    }

    #[derive(Default)]
    struct Flag(AtomicU8);

    impl LockGrant for Flag {
        fn grant(&self) {
            self.0.store(1, Ordering::SeqCst);
        }
        fn deny(&self) {
            self.0.store(2, Ordering::SeqCst);
        }
    }

    fn table(capacity: u64, scheme: CcScheme) -> Table<u64> {
        Table::new(
            TableId(0),
            "t",
            capacity,
            scheme,
            Partitioner::replicated(),
            Arc::new(NullComm),
        )
    }

    #[test]
    fn test_insert_until_full() -> PtxResult<()> {
        let t = table(2, CcScheme::NoWait);
        assert_eq!(t.insert()?, Key(0));
        assert_eq!(t.insert()?, Key(1));
        assert!(matches!(t.insert(), Err(PtxError::TableFull { capacity: 2, .. })));
        assert_eq!(t.len(), 2);
        Ok(())
    }

    #[test]
    fn test_append_locks_before_publishing() -> PtxResult<()> {
        let t = table(2, CcScheme::NoWait);
        let owner = Arc::new(Flag::default());
        let (key, code) = t.append_with(|key, row| {
            // 아직 len 밖이라 다른 워커는 이 키를 볼 수 없음
            assert_eq!(t.len(), 0);
            assert!(t.row(key).is_none());
            Ok(row.local_lock(AccessMode::WRITE, Timestamp(5), owner.clone()))
        })?;
        assert!(code.is_ok());
        assert_eq!(owner.0.load(Ordering::SeqCst), 1);

        let late = Arc::new(Flag::default());
        let code = t.get(key, AccessMode::READ, Timestamp(1), late);
        assert_eq!(code, ErrorCode::ReadLockFailed);

        let refused: PtxResult<(Key, ())> =
            t.append_with(|_, _| Err(PtxError::Partition("refused".into())));
        assert!(refused.is_err());
        assert_eq!(t.len(), 1);
        assert!(t.put(key, AccessMode::WRITE, Timestamp(5))?.is_ok());
        assert_eq!(t.verify(), 0);
        Ok(())
    }

    #[test]
    fn test_load_and_peek() -> PtxResult<()> {
        let t = table(4, CcScheme::NoWait);
        t.populate(3, |k| k.0 * 10)?;
        assert_eq!(t.peek(Key(2)), Some(20));
        assert_eq!(t.peek(Key(3)), None);
        assert_eq!(t.load(77)?, Key(3));
        assert_eq!(t.peek(Key(3)), Some(77));
        Ok(())
    }

    #[test]
    fn test_get_out_of_range() {
        let t = table(4, CcScheme::NoWait);
        let code = t.get(Key(0), AccessMode::READ, Timestamp(1), Arc::new(Flag::default()));
        assert_eq!(code, ErrorCode::InvalidRowId);
    }

    #[test]
    fn test_get_put_and_verify() -> PtxResult<()> {
        let t = table(4, CcScheme::NoWait);
        t.populate(4, |_| 0)?;

        let flag = Arc::new(Flag::default());
        assert!(t.get(Key(1), AccessMode::WRITE, Timestamp(1), flag.clone()).is_ok());
        assert_eq!(flag.0.load(Ordering::SeqCst), 1);
        assert_eq!(t.verify(), 1);

        assert!(t.put(Key(1), AccessMode::WRITE, Timestamp(1))?.is_ok());
        assert_eq!(t.verify(), 0);
        Ok(())
    }

    #[test]
    fn test_handle_downcast() {
        let t: Arc<dyn TableHandle> = Arc::new(table(1, CcScheme::None));
        assert_eq!(t.tuple_size(), 8);
        assert!(t.clone().as_any().downcast::<Table<u64>>().is_ok());
        assert!(t.as_any().downcast::<Table<i64>>().is_err());
    }
}
