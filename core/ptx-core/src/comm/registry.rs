//! Open-futures registry: message id → future awaiting the response.
//!
//! Fixed number of buckets, each with its own latch and a bounded number of
//! slots. Workers insert, the dispatch thread erases.

use super::packet::Packet;
use crate::error::{PtxError, PtxResult};
use crate::types::MsgId;
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::sync::Arc;

/// Anything that can be completed by a response packet.
pub trait AbstractFuture: Send + Sync {
    /// Deliver the response. Called at most once, on the dispatch thread.
    fn set_pkt(&self, pkt: Packet) -> PtxResult<()>;

    /// No response will ever come; wake the waiter with `reason` as error.
    fn abort(&self, reason: &str);
}

type Bucket = SmallVec<[(MsgId, Arc<dyn AbstractFuture>); 4]>;

pub struct OpenFutures {
    buckets: Box<[Mutex<Bucket>]>,
    slots: usize,
    mask: u64,
}

impl OpenFutures {
    /// `buckets` must be a power of two.
    pub fn new(buckets: usize, slots: usize) -> PtxResult<Self> {
        if !buckets.is_power_of_two() || slots == 0 {
            return Err(PtxError::Config(format!(
                "registry needs a power-of-two bucket count and at least one slot, got {}x{}",
                buckets, slots
            )));
        }
        Ok(Self {
            buckets: (0..buckets).map(|_| Mutex::new(Bucket::new())).collect(),
            slots,
            mask: buckets as u64 - 1,
        })
    }

    fn bucket_of(&self, id: MsgId) -> usize {
        (id.0 & self.mask) as usize
    }

    pub fn insert(&self, id: MsgId, future: Arc<dyn AbstractFuture>) -> PtxResult<()> {
        let idx = self.bucket_of(id);
        let mut bucket = self.buckets[idx].lock();
        if bucket.len() >= self.slots {
            return Err(PtxError::RegistryFull {
                bucket: idx,
                slots: self.slots,
            });
        }
        bucket.push((id, future));
        Ok(())
    }

    /// Remove and return the future registered under `id`.
    pub fn erase(&self, id: MsgId) -> PtxResult<Arc<dyn AbstractFuture>> {
        let mut bucket = self.buckets[self.bucket_of(id)].lock();
        match bucket.iter().position(|(k, _)| *k == id) {
            Some(pos) => Ok(bucket.swap_remove(pos).1),
            None => Err(PtxError::UnknownMessageId { msg_id: id.0 }),
        }
    }

    /// Remove every registered future.
    pub fn drain(&self) -> Vec<Arc<dyn AbstractFuture>> {
        self.buckets
            .iter()
            .flat_map(|b| b.lock().drain(..).map(|(_, f)| f).collect::<Vec<_>>())
            .collect()
    }

    /// Number of registered futures.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for OpenFutures {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFutures")
            .field("buckets", &self.buckets.len())
            .field("slots", &self.slots)
            .finish()
    }
}
