//! Table registry, by name and by dense id.

use super::TableHandle;
use super::table::Table;
use super::tuple::Tuple;
use crate::error::{PtxError, PtxResult};
use crate::types::TableId;
use ahash::RandomState;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use std::sync::Arc;

/// 테이블 카탈로그: name → id, id → table
#[derive(Default)]
pub struct Catalog {
    by_name: DashMap<String, TableId, RandomState>,
    tables: RwLock<Vec<Arc<dyn TableHandle>>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table under `name`; `build` receives the assigned id.
    pub fn register<T, F>(&self, name: &str, build: F) -> PtxResult<Arc<Table<T>>>
    where
        T: Tuple,
        F: FnOnce(TableId) -> Table<T>,
    {
        match self.by_name.entry(name.to_string()) {
            Entry::Occupied(_) => Err(PtxError::TableExists(name.to_string())),
            Entry::Vacant(slot) => {
                let mut tables = self.tables.write();
                let id = TableId(tables.len() as u64);
                let table = Arc::new(build(id));
                tables.push(table.clone());
                slot.insert(id);
                Ok(table)
            }
        }
    }

    /// Typed lookup by name.
    pub fn get<T: Tuple>(&self, name: &str) -> PtxResult<Arc<Table<T>>> {
        let id = self
            .id_of(name)
            .ok_or_else(|| PtxError::TableNotFound(name.to_string()))?;
        self.by_id(id)?
            .as_any()
            .downcast::<Table<T>>()
            .map_err(|_| PtxError::TableTypeMismatch(name.to_string()))
    }

    pub fn id_of(&self, name: &str) -> Option<TableId> {
        self.by_name.get(name).map(|entry| *entry.value())
    }

    /// Untyped lookup for the message dispatch path.
    pub fn by_id(&self, id: TableId) -> PtxResult<Arc<dyn TableHandle>> {
        self.tables
            .read()
            .get(id.0 as usize)
            .cloned()
            .ok_or(PtxError::UnknownTable(id.0))
    }

    pub fn len(&self) -> usize {
        self.tables.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Table names in id order.
    pub fn names(&self) -> Vec<String> {
        self.tables
            .read()
            .iter()
            .map(|t| t.name().to_string())
            .collect()
    }

    /// Leaked locks over all tables.
    pub fn verify(&self) -> usize {
        self.tables.read().iter().map(|t| t.verify()).sum()
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("tables", &self.names())
            .finish()
    }
}
