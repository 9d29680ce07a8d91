//! Engine configuration: 노드/워커 구성과 동시성 제어 설정
//!
//! Sources, applied in this order by callers:
//! 1. `EngineConfig::default()`
//! 2. `EngineConfig::from_json_file(path)`
//! 3. `EngineConfig::load_from_env()` (`PTX_*` variables override fields)
//!
//! `validate()` must pass before a [`Database`](crate::engine::Database) is
//! built from the config.

use crate::error::{PtxError, PtxResult};
use crate::types::{CcScheme, MAX_NODE_ID, MAX_WORKER_SLOTS, NodeId};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PTX_";

/// Static description of this node and its place in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 이 노드의 ID (0..num_nodes)
    pub node_id: NodeId,

    /// 클러스터 노드 수 (스위치 제외)
    pub num_nodes: u32,

    /// Transaction worker threads on this node
    pub num_workers: u32,

    /// Node id the switch is addressed by
    pub switch_id: NodeId,

    /// Concurrency control discipline for every row
    pub cc_scheme: CcScheme,

    /// Redirect hot rows to the switch for locking
    pub lock_on_switch: bool,

    /// Hot prefix size of each node's partition
    pub hot_size: u64,

    /// Check every row for leaked locks on shutdown
    pub verify: bool,

    /// Open-futures registry buckets (power of two)
    pub registry_buckets: usize,

    /// Slots per registry bucket
    pub registry_slots: usize,

    /// Maximum undo actions per transaction
    pub undo_capacity: usize,

    /// Maximum futures per transaction
    pub future_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId(0),
            num_nodes: 1,
            num_workers: num_cpus::get() as u32,
            switch_id: NodeId(1),
            cc_scheme: CcScheme::NoWait,
            lock_on_switch: false,
            hot_size: 0,
            verify: true,
            registry_buckets: 1024,
            registry_slots: 4,
            undo_capacity: 4096,
            future_capacity: 8192,
        }
    }
}

impl EngineConfig {
    /// Single-node config with `num_workers` workers.
    pub fn single_node(num_workers: u32, cc_scheme: CcScheme) -> Self {
        Self {
            num_workers,
            cc_scheme,
            ..Self::default()
        }
    }

    /// Config for node `node_id` of an `num_nodes` cluster; the switch takes
    /// the first id after the nodes.
    pub fn cluster(node_id: u32, num_nodes: u32, num_workers: u32, cc_scheme: CcScheme) -> Self {
        Self {
            node_id: NodeId(node_id),
            num_nodes,
            num_workers,
            switch_id: NodeId(num_nodes),
            cc_scheme,
            ..Self::default()
        }
    }

    /// 파일에서 로드
    pub fn from_json_file(path: &Path) -> PtxResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&json)?;
        Ok(config)
    }

    /// 파일에 저장
    pub fn save_to_file(&self, path: &Path) -> PtxResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// 환경 변수에서 로드
    pub fn load_from_env(&mut self) -> PtxResult<()> {
        self.load_with(|name| env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable source.
    ///
    /// Unset variables leave the field untouched; unparsable values are errors.
    pub fn load_with<F>(&mut self, lookup: F) -> PtxResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |field: &str| lookup(&format!("{}{}", ENV_PREFIX, field.to_uppercase()));

        if let Some(v) = var("node_id") {
            self.node_id = NodeId(parse_field("node_id", &v)?);
        }
        if let Some(v) = var("num_nodes") {
            self.num_nodes = parse_field("num_nodes", &v)?;
        }
        if let Some(v) = var("num_workers") {
            self.num_workers = parse_field("num_workers", &v)?;
        }
        if let Some(v) = var("switch_id") {
            self.switch_id = NodeId(parse_field("switch_id", &v)?);
        }
        if let Some(v) = var("cc_scheme") {
            self.cc_scheme = CcScheme::parse_scheme(&v.to_lowercase())
                .ok_or_else(|| PtxError::Config(format!("unknown cc_scheme '{}'", v)))?;
        }
        if let Some(v) = var("lock_on_switch") {
            self.lock_on_switch = parse_bool(&v);
        }
        if let Some(v) = var("hot_size") {
            self.hot_size = parse_field("hot_size", &v)?;
        }
        if let Some(v) = var("verify") {
            self.verify = parse_bool(&v);
        }
        if let Some(v) = var("registry_buckets") {
            self.registry_buckets = parse_field("registry_buckets", &v)?;
        }
        if let Some(v) = var("registry_slots") {
            self.registry_slots = parse_field("registry_slots", &v)?;
        }
        if let Some(v) = var("undo_capacity") {
            self.undo_capacity = parse_field("undo_capacity", &v)?;
        }
        if let Some(v) = var("future_capacity") {
            self.future_capacity = parse_field("future_capacity", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> PtxResult<()> {
        // the switch takes the id after the last node
        if self.num_nodes == 0 || self.num_nodes > MAX_NODE_ID {
            return Err(PtxError::Config(format!(
                "num_nodes must be in 1..={}, got {}",
                MAX_NODE_ID,
                self.num_nodes
            )));
        }
        if self.node_id.0 >= self.num_nodes {
            return Err(PtxError::Config(format!(
                "node_id {} out of range for {} nodes",
                self.node_id, self.num_nodes
            )));
        }
        if self.switch_id.0 < self.num_nodes || self.switch_id.0 > MAX_NODE_ID {
            return Err(PtxError::Config(format!(
                "switch_id {} collides with a node id or exceeds 255",
                self.switch_id
            )));
        }
        if self.num_workers == 0 {
            return Err(PtxError::Config("num_workers must be at least 1".into()));
        }
        // one extra slot for the dispatch thread
        if self.num_workers >= MAX_WORKER_SLOTS {
            return Err(PtxError::Config(format!(
                "num_workers {} does not fit a sender address (max {})",
                self.num_workers,
                MAX_WORKER_SLOTS - 1
            )));
        }
        if !self.registry_buckets.is_power_of_two() {
            return Err(PtxError::Config(format!(
                "registry_buckets must be a power of two, got {}",
                self.registry_buckets
            )));
        }
        if self.registry_slots == 0 || self.undo_capacity == 0 || self.future_capacity == 0 {
            return Err(PtxError::Config(
                "registry_slots, undo_capacity and future_capacity must be non-zero".into(),
            ));
        }
        if self.lock_on_switch && self.hot_size * u64::from(self.num_nodes) > 1 << 16 {
            return Err(PtxError::Config(format!(
                "hot_size {} x {} nodes does not fit a 16-bit switch index",
                self.hot_size, self.num_nodes
            )));
        }
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> PtxResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PtxError::Config(format!("invalid value '{}' for {}", value, field)))
}

fn parse_bool(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_cluster_config_places_switch_after_nodes() {
        let config = EngineConfig::cluster(1, 3, 2, CcScheme::WaitDie);
        assert_eq!(config.switch_id, NodeId(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = EngineConfig::cluster(0, 2, 1, CcScheme::NoWait);
        config.node_id = NodeId(2);
        assert!(matches!(config.validate(), Err(PtxError::Config(_))));

        let mut config = EngineConfig::cluster(0, 2, 1, CcScheme::NoWait);
        config.switch_id = NodeId(1);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.registry_buckets = 1000;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::cluster(0, 2, 1, CcScheme::NoWait);
        config.lock_on_switch = true;
        config.hot_size = 1 << 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unaddressable_ids() {
        // 255 nodes leave id 255 for the switch; 256 would wrap in a NodeAddr
        assert!(EngineConfig::cluster(0, 255, 1, CcScheme::NoWait).validate().is_ok());
        let config = EngineConfig::cluster(0, 256, 1, CcScheme::NoWait);
        assert!(matches!(config.validate(), Err(PtxError::Config(_))));

        let mut config = EngineConfig::cluster(0, 2, 1, CcScheme::NoWait);
        config.num_workers = MAX_WORKER_SLOTS;
        assert!(config.validate().is_err());
        config.num_workers = MAX_WORKER_SLOTS - 1;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_with_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PTX_NODE_ID", "1"),
            ("PTX_NUM_NODES", "4"),
            ("PTX_SWITCH_ID", "4"),
            ("PTX_CC_SCHEME", "WAIT_DIE"),
            ("PTX_LOCK_ON_SWITCH", "1"),
            ("PTX_HOT_SIZE", "16"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config
            .load_with(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.node_id, NodeId(1));
        assert_eq!(config.num_nodes, 4);
        assert_eq!(config.cc_scheme, CcScheme::WaitDie);
        assert!(config.lock_on_switch);
        assert_eq!(config.hot_size, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_with_rejects_garbage() {
        let mut config = EngineConfig::default();
        let result = config.load_with(|name| (name == "PTX_NUM_WORKERS").then(|| "many".into()));
        assert!(matches!(result, Err(PtxError::Config(_))));
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");

        let config = EngineConfig::cluster(2, 3, 4, CcScheme::WaitDie);
        config.save_to_file(&path).unwrap();

        let loaded = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"cc_scheme":"none"}"#).unwrap();
        assert_eq!(config.cc_scheme, CcScheme::None);
        assert_eq!(config.registry_buckets, 1024);
    }
}
