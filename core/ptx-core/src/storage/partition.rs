//! Key → owner resolution.

use crate::error::{PtxError, PtxResult};
use crate::types::{Key, NodeId};
use serde::{Deserialize, Serialize};

/// Where a key lives, from the point of view of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationInfo {
    pub is_local: bool,
    /// Owner node, or the switch for hot keys.
    pub target: NodeId,
    pub is_hot: bool,
    /// Hot row index across all nodes; only meaningful when `is_hot`.
    pub abs_hot_index: u16,
}

/// Partitioning scheme requested when a table is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Every node holds every key.
    #[default]
    Replicated,
    /// Contiguous equal ranges, one per node.
    Range,
}

/// Contiguous range partitioning with an optional hot prefix per partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePartition {
    total_size: u64,
    partition_size: u64,
    my_id: NodeId,
    switch_id: NodeId,
    hot_size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Partitioner {
    Replicated,
    Range(RangePartition),
}

impl Partitioner {
    pub fn replicated() -> Self {
        Partitioner::Replicated
    }

    /// Range partitioning of `total_size` keys over `num_nodes` nodes.
    ///
    /// With `hot_size > 0` the first `hot_size` keys of every partition are
    /// locked on the switch.
    pub fn range(
        total_size: u64,
        my_id: NodeId,
        num_nodes: u32,
        switch_id: NodeId,
        hot_size: u64,
    ) -> PtxResult<Self> {
        if total_size == 0 {
            return Err(PtxError::Partition("range table needs at least one key".into()));
        }
        if num_nodes == 0 || total_size % u64::from(num_nodes) != 0 {
            return Err(PtxError::Partition(format!(
                "total_size {} is not divisible by num_nodes {}",
                total_size, num_nodes
            )));
        }
        let partition_size = total_size / u64::from(num_nodes);
        if hot_size > partition_size {
            return Err(PtxError::Partition(format!(
                "hot_size {} exceeds partition size {}",
                hot_size, partition_size
            )));
        }
        if hot_size * u64::from(num_nodes) > u64::from(u16::MAX) + 1 {
            return Err(PtxError::Partition(format!(
                "{} hot rows do not fit a 16-bit switch index",
                hot_size * u64::from(num_nodes)
            )));
        }
        Ok(Partitioner::Range(RangePartition {
            total_size,
            partition_size,
            my_id,
            switch_id,
            hot_size,
        }))
    }

    pub fn location(&self, key: Key) -> LocationInfo {
        match self {
            Partitioner::Replicated => LocationInfo {
                is_local: true,
                target: NodeId(0),
                is_hot: false,
                abs_hot_index: 0,
            },
            Partitioner::Range(range) => range.location(key),
        }
    }

    /// Whether `key` belongs to the partitioned key space at all.
    ///
    /// Keys outside it have no owner and must not be routed.
    pub fn contains(&self, key: Key) -> bool {
        match self {
            Partitioner::Replicated => true,
            Partitioner::Range(range) => key.0 < range.total_size,
        }
    }

    /// Key → row index. Rows are addressed by their global key.
    pub fn translate(&self, key: Key) -> u64 {
        key.0
    }
}

impl RangePartition {
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn partition_size(&self) -> u64 {
        self.partition_size
    }

    /// First key owned by this node.
    pub fn offset(&self) -> u64 {
        self.partition_size * u64::from(self.my_id.0)
    }

    /// Caller checks [`Partitioner::contains`] first.
    fn location(&self, key: Key) -> LocationInfo {
        let owner = key.0 / self.partition_size;
        let target = NodeId(owner as u32);
        let local_idx = key.0 - owner * self.partition_size;

        if local_idx < self.hot_size {
            return LocationInfo {
                is_local: false,
                target: self.switch_id,
                is_hot: true,
                abs_hot_index: (local_idx + self.hot_size * owner) as u16,
            };
        }

        LocationInfo {
            is_local: target == self.my_id,
            target,
            is_hot: false,
            abs_hot_index: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replicated_is_always_local() {
        let p = Partitioner::replicated();
        let loc = p.location(Key(123_456));
        assert!(loc.is_local);
        assert!(!loc.is_hot);
    }

    #[test]
    fn test_range_owner() -> PtxResult<()> {
        let p = Partitioner::range(100, NodeId(1), 4, NodeId(4), 0)?;
        assert_eq!(p.location(Key(0)).target, NodeId(0));
        assert!(!p.location(Key(0)).is_local);
        assert_eq!(p.location(Key(25)).target, NodeId(1));
        assert!(p.location(Key(49)).is_local);
        assert_eq!(p.location(Key(99)).target, NodeId(3));
        Ok(())
    }

    #[test]
    fn test_range_rejects_uneven_split() {
        assert!(matches!(
            Partitioner::range(10, NodeId(0), 3, NodeId(3), 0),
            Err(PtxError::Partition(_))
        ));
    }

    #[test]
    fn test_range_rejects_empty_key_space() {
        assert!(matches!(
            Partitioner::range(0, NodeId(0), 2, NodeId(2), 0),
            Err(PtxError::Partition(_))
        ));
    }

    #[test]
    fn test_range_contains() -> PtxResult<()> {
        let p = Partitioner::range(8, NodeId(0), 2, NodeId(2), 0)?;
        assert!(p.contains(Key(7)));
        assert!(!p.contains(Key(8)));
        assert!(Partitioner::replicated().contains(Key(u64::MAX)));
        Ok(())
    }

    #[test]
    fn test_hot_keys_go_to_switch() -> PtxResult<()> {
        let p = Partitioner::range(100, NodeId(0), 2, NodeId(2), 4)?;

        let loc = p.location(Key(52));
        assert!(loc.is_hot);
        assert!(!loc.is_local);
        assert_eq!(loc.target, NodeId(2));
        assert_eq!(loc.abs_hot_index, 2 + 4);

        // hot even on the owning node
        let own = p.location(Key(1));
        assert!(own.is_hot);
        assert!(!own.is_local);
        assert_eq!(own.abs_hot_index, 1);

        let cold = p.location(Key(54));
        assert!(!cold.is_hot);
        assert_eq!(cold.target, NodeId(1));
        Ok(())
    }

    #[test]
    fn test_hot_index_must_fit() {
        assert!(Partitioner::range(1 << 20, NodeId(0), 2, NodeId(2), 1 << 16).is_err());
        assert!(Partitioner::range(1 << 20, NodeId(0), 2, NodeId(2), 1 << 15).is_ok());
    }
}
