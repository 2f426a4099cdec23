//! The store adapter contract.
//!
//! Everything the core knows about a backend store goes through
//! [`StoreAdapter`]: schema calls during DDL, write plans during DML fan-out,
//! cursors during scans, and the two-phase commit verbs. Adapters are
//! deployed into an [`AdapterRegistry`] and addressed by id; the core never
//! reaches past this trait.

mod mem;

pub use mem::MemAdapter;

use crate::error::{AdapterError, DbError, Result};
use parking_lot::RwLock;
use polystore_algebra::{AlgNodeKind, JoinType, RexNode, TraitSet};
use polystore_catalog::{PhysicalColumn, Snapshot};
use polystore_primitives::{AdapterId, AllocationId, NamespaceId, TxId};
use polystore_types::PolyValue;
use std::sync::Arc;

pub type Row = Vec<PolyValue>;

/// A pull cursor over adapter rows; lazy and finite.
pub type RowStream = Box<dyn Iterator<Item = Result<Row>> + Send>;

#[derive(Debug, Clone)]
pub struct AdapterCaps {
    pub schema_read_only: bool,
    pub supports_index: bool,
    pub supports_sort: bool,
    pub supports_aggregation: bool,
    pub supported_join_types: Vec<JoinType>,
}

/// Rows to append, in physical column order.
#[derive(Debug, Clone)]
pub struct InsertPlan {
    pub rows: Vec<Row>,
}

/// Full replacement rows, matched on the key columns.
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub key_positions: Vec<usize>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub key_positions: Vec<usize>,
    pub keys: Vec<Row>,
}

/// The abstract store. All methods are synchronous from the core's
/// perspective; an adapter is free to be asynchronous internally.
pub trait StoreAdapter: Send + Sync {
    fn id(&self) -> AdapterId;
    fn name(&self) -> &str;

    fn namespace_physical_name(&self, namespace: NamespaceId) -> String;

    fn create_table(&self, snapshot: &Snapshot, allocation: AllocationId) -> Result<()>;
    fn drop_table(&self, allocation: AllocationId) -> Result<()>;
    fn add_column(
        &self,
        snapshot: &Snapshot,
        allocation: AllocationId,
        column: &PhysicalColumn,
    ) -> Result<()>;
    fn drop_column(&self, allocation: AllocationId, column: &PhysicalColumn) -> Result<()>;

    fn insert(&self, txn: TxId, allocation: AllocationId, plan: InsertPlan) -> Result<u64>;
    fn update(&self, txn: TxId, allocation: AllocationId, plan: UpdatePlan) -> Result<u64>;
    fn delete(&self, txn: TxId, allocation: AllocationId, plan: DeletePlan) -> Result<u64>;

    /// Scans one allocation. `columns` are positions in the physical column
    /// list; a pushed-down `predicate` sees the full physical row before
    /// projection.
    fn scan(
        &self,
        txn: TxId,
        allocation: AllocationId,
        columns: &[usize],
        predicate: Option<&RexNode>,
        params: &[PolyValue],
    ) -> Result<RowStream>;

    /// Phase-1 vote: `true` promises a later `commit` will succeed.
    fn prepare(&self, txn: TxId) -> Result<bool>;
    fn commit(&self, txn: TxId) -> Result<()>;
    fn rollback(&self, txn: TxId) -> Result<()>;

    fn can_pushdown(&self, op: &AlgNodeKind, traits: &TraitSet) -> bool;
    fn capabilities(&self) -> AdapterCaps;
}

/// Deployed adapters, addressable by id or name.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<Vec<Arc<dyn StoreAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deploy(&self, adapter: Arc<dyn StoreAdapter>) -> Result<AdapterId> {
        let mut adapters = self.adapters.write();
        if adapters
            .iter()
            .any(|a| a.id() == adapter.id() || a.name() == adapter.name())
        {
            return Err(DbError::Other(anyhow::anyhow!(
                "adapter `{}` (id {}) is already deployed",
                adapter.name(),
                adapter.id()
            )));
        }
        let id = adapter.id();
        log::info!("deployed adapter `{}` as {id}", adapter.name());
        adapters.push(adapter);
        Ok(id)
    }

    pub fn get(&self, id: AdapterId) -> Result<Arc<dyn StoreAdapter>> {
        self.adapters
            .read()
            .iter()
            .find(|a| a.id() == id)
            .cloned()
            .ok_or_else(|| {
                AdapterError {
                    adapter: id,
                    source: anyhow::anyhow!("adapter {id} is not deployed"),
                }
                .into()
            })
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn StoreAdapter>> {
        self.adapters
            .read()
            .iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<dyn StoreAdapter>> {
        self.adapters.read().clone()
    }
}
