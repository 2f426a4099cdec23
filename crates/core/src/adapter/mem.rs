//! The in-memory reference adapter.
//!
//! Writes stage per transaction and apply on phase-2 commit, so a prepare
//! vote really does promise the commit can succeed. Reads merge the
//! committed rows with the transaction's own staged writes. Fault injection
//! flags let tests drive the 2PC failure paths.

use super::{AdapterCaps, DeletePlan, InsertPlan, Row, RowStream, StoreAdapter, UpdatePlan};
use crate::error::{AdapterError, Result};
use parking_lot::Mutex;
use polystore_algebra::{AlgNodeKind, RexNode, TraitSet};
use polystore_catalog::{PhysicalColumn, PhysicalName, Snapshot};
use polystore_primitives::{AdapterId, AllocationId, NamespaceId, TxId};
use polystore_types::PolyValue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone)]
enum StagedWrite {
    Insert { allocation: AllocationId, row: Row },
    Update {
        allocation: AllocationId,
        key_positions: Vec<usize>,
        row: Row,
    },
    Delete {
        allocation: AllocationId,
        key_positions: Vec<usize>,
        key: Row,
    },
}

#[derive(Default)]
struct Store {
    tables: FxHashMap<AllocationId, Vec<Row>>,
    staged: FxHashMap<TxId, Vec<StagedWrite>>,
    prepared: FxHashSet<TxId>,
}

pub struct MemAdapter {
    id: AdapterId,
    name: String,
    store: Mutex<Store>,
    fail_next_prepare: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl MemAdapter {
    pub fn deploy(id: AdapterId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            store: Mutex::new(Store::default()),
            fail_next_prepare: AtomicBool::new(false),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Makes the next phase-1 vote a no.
    pub fn fail_next_prepare(&self) {
        self.fail_next_prepare.store(true, Ordering::SeqCst);
    }

    /// Makes the next phase-2 commit fail after a yes vote.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    pub fn committed_rows(&self, allocation: AllocationId) -> Vec<Row> {
        self.store
            .lock()
            .tables
            .get(&allocation)
            .cloned()
            .unwrap_or_default()
    }

    fn err(&self, msg: impl Into<String>) -> crate::error::DbError {
        AdapterError {
            adapter: self.id,
            source: anyhow::anyhow!(msg.into()),
        }
        .into()
    }

    /// The transaction's view of one allocation: committed rows with the
    /// transaction's staged writes applied in order.
    fn view(store: &Store, txn: TxId, allocation: AllocationId) -> Vec<Row> {
        let mut rows = store.tables.get(&allocation).cloned().unwrap_or_default();
        if let Some(writes) = store.staged.get(&txn) {
            for write in writes {
                apply(&mut rows, write, allocation);
            }
        }
        rows
    }
}

fn key_matches(row: &Row, key_positions: &[usize], key: &Row) -> bool {
    key_positions
        .iter()
        .zip(key)
        .all(|(pos, v)| row.get(*pos) == Some(v))
}

fn apply(rows: &mut Vec<Row>, write: &StagedWrite, allocation: AllocationId) {
    match write {
        StagedWrite::Insert { allocation: a, row } if *a == allocation => rows.push(row.clone()),
        StagedWrite::Update { allocation: a, key_positions, row } if *a == allocation => {
            let key: Row = key_positions.iter().map(|p| row[*p].clone()).collect();
            for existing in rows.iter_mut() {
                if key_matches(existing, key_positions, &key) {
                    *existing = row.clone();
                }
            }
        }
        StagedWrite::Delete { allocation: a, key_positions, key } if *a == allocation => {
            rows.retain(|existing| !key_matches(existing, key_positions, key));
        }
        _ => {}
    }
}

impl StoreAdapter for MemAdapter {
    fn id(&self) -> AdapterId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn namespace_physical_name(&self, namespace: NamespaceId) -> String {
        PhysicalName::schema(namespace.0).to_string()
    }

    fn create_table(&self, _snapshot: &Snapshot, allocation: AllocationId) -> Result<()> {
        self.store.lock().tables.entry(allocation).or_default();
        Ok(())
    }

    fn drop_table(&self, allocation: AllocationId) -> Result<()> {
        self.store.lock().tables.remove(&allocation);
        Ok(())
    }

    fn add_column(
        &self,
        snapshot: &Snapshot,
        allocation: AllocationId,
        column: &PhysicalColumn,
    ) -> Result<()> {
        let default = snapshot
            .allocation(allocation)
            .and_then(|a| snapshot.table(a.logical_id))
            .ok()
            .and_then(|t| t.column(column.logical_id))
            .and_then(|c| c.default.clone())
            .unwrap_or(PolyValue::Null);
        let mut store = self.store.lock();
        if let Some(rows) = store.tables.get_mut(&allocation) {
            for row in rows {
                row.push(default.clone());
            }
        }
        Ok(())
    }

    fn drop_column(&self, allocation: AllocationId, column: &PhysicalColumn) -> Result<()> {
        let position = column.position as usize - 1;
        let mut store = self.store.lock();
        if let Some(rows) = store.tables.get_mut(&allocation) {
            for row in rows {
                if position < row.len() {
                    row.remove(position);
                }
            }
        }
        Ok(())
    }

    fn insert(&self, txn: TxId, allocation: AllocationId, plan: InsertPlan) -> Result<u64> {
        let mut store = self.store.lock();
        let n = plan.rows.len() as u64;
        let staged = store.staged.entry(txn).or_default();
        for row in plan.rows {
            staged.push(StagedWrite::Insert { allocation, row });
        }
        Ok(n)
    }

    fn update(&self, txn: TxId, allocation: AllocationId, plan: UpdatePlan) -> Result<u64> {
        let mut store = self.store.lock();
        let view = Self::view(&store, txn, allocation);
        let mut affected = 0;
        for row in &plan.rows {
            let key: Row = plan.key_positions.iter().map(|p| row[*p].clone()).collect();
            affected += view
                .iter()
                .filter(|r| key_matches(r, &plan.key_positions, &key))
                .count() as u64;
        }
        let staged = store.staged.entry(txn).or_default();
        for row in plan.rows {
            staged.push(StagedWrite::Update {
                allocation,
                key_positions: plan.key_positions.clone(),
                row,
            });
        }
        Ok(affected)
    }

    fn delete(&self, txn: TxId, allocation: AllocationId, plan: DeletePlan) -> Result<u64> {
        let mut store = self.store.lock();
        let view = Self::view(&store, txn, allocation);
        let mut affected = 0;
        for key in &plan.keys {
            affected += view
                .iter()
                .filter(|r| key_matches(r, &plan.key_positions, key))
                .count() as u64;
        }
        let staged = store.staged.entry(txn).or_default();
        for key in plan.keys {
            staged.push(StagedWrite::Delete {
                allocation,
                key_positions: plan.key_positions.clone(),
                key,
            });
        }
        Ok(affected)
    }

    fn scan(
        &self,
        txn: TxId,
        allocation: AllocationId,
        columns: &[usize],
        predicate: Option<&RexNode>,
        params: &[PolyValue],
    ) -> Result<RowStream> {
        let store = self.store.lock();
        let rows = Self::view(&store, txn, allocation);
        drop(store);
        let columns = columns.to_vec();
        let predicate = predicate.cloned();
        let params = params.to_vec();
        let adapter = self.id;
        let iter = rows.into_iter().filter_map(move |row| {
            if let Some(pred) = &predicate {
                match pred.eval(&row, &params) {
                    Ok(v) => {
                        if v.as_bool() != Some(true) {
                            return None;
                        }
                    }
                    Err(e) => {
                        return Some(Err(AdapterError {
                            adapter,
                            source: anyhow::Error::new(e),
                        }
                        .into()))
                    }
                }
            }
            Some(Ok(columns
                .iter()
                .map(|c| row.get(*c).cloned().unwrap_or(PolyValue::Null))
                .collect()))
        });
        Ok(Box::new(iter))
    }

    fn prepare(&self, txn: TxId) -> Result<bool> {
        if self.fail_next_prepare.swap(false, Ordering::SeqCst) {
            log::warn!("adapter {} votes no for tx {txn}", self.name);
            return Ok(false);
        }
        self.store.lock().prepared.insert(txn);
        Ok(true)
    }

    fn commit(&self, txn: TxId) -> Result<()> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(self.err(format!("simulated outage committing tx {txn}")));
        }
        let mut store = self.store.lock();
        store.prepared.remove(&txn);
        let Some(writes) = store.staged.remove(&txn) else { return Ok(()) };
        let allocations: FxHashSet<AllocationId> = writes
            .iter()
            .map(|w| match w {
                StagedWrite::Insert { allocation, .. }
                | StagedWrite::Update { allocation, .. }
                | StagedWrite::Delete { allocation, .. } => *allocation,
            })
            .collect();
        for allocation in allocations {
            let mut rows = store.tables.get(&allocation).cloned().unwrap_or_default();
            for write in &writes {
                apply(&mut rows, write, allocation);
            }
            store.tables.insert(allocation, rows);
        }
        Ok(())
    }

    fn rollback(&self, txn: TxId) -> Result<()> {
        let mut store = self.store.lock();
        store.prepared.remove(&txn);
        store.staged.remove(&txn);
        Ok(())
    }

    fn can_pushdown(&self, op: &AlgNodeKind, _traits: &TraitSet) -> bool {
        matches!(op, AlgNodeKind::Filter { .. } | AlgNodeKind::PhysicalScan { .. })
    }

    fn capabilities(&self) -> AdapterCaps {
        AdapterCaps {
            schema_read_only: false,
            supports_index: false,
            supports_sort: false,
            supports_aggregation: false,
            supported_join_types: Vec::new(),
        }
    }
}
