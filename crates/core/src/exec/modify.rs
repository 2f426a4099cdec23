//! DML fan-out: one logical write becomes one physical write per placement,
//! all inside the surrounding transaction.

use super::{ExecCtx, ExecNode};
use crate::adapter::{DeletePlan, InsertPlan, Row, UpdatePlan};
use crate::error::{DbError, Result};
use polystore_algebra::{ModifyOp, RexNode};
use polystore_catalog::{CatalogError, KeyKind, PartitionKind, Snapshot};
use polystore_primitives::{AllocationId, ColumnId, PlacementId, TableId};
use polystore_types::PolyValue;
use rustc_hash::FxHashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub struct ModifyExec {
    input: Box<dyn ExecNode>,
    table: TableId,
    op: ModifyOp,
    update_columns: Vec<ColumnId>,
    sources: Vec<RexNode>,
    result: Option<i64>,
}

impl ModifyExec {
    pub fn new(
        input: Box<dyn ExecNode>,
        table: TableId,
        op: ModifyOp,
        update_columns: Vec<ColumnId>,
        sources: Vec<RexNode>,
    ) -> Self {
        Self { input, table, op, update_columns, sources, result: None }
    }

    fn run(&mut self, ctx: &ExecCtx) -> Result<i64> {
        let mut rows = Vec::new();
        let mut seen = 0usize;
        while let Some(row) = self.input.next(ctx)? {
            ctx.check_every(&mut seen)?;
            rows.push(row);
        }
        match self.op {
            ModifyOp::Insert => self.insert(ctx, rows),
            ModifyOp::Update => self.update(ctx, rows),
            ModifyOp::Delete => self.delete(ctx, rows),
            ModifyOp::Merge => Err(DbError::Other(anyhow::anyhow!("MERGE is not executable"))),
        }
    }

    fn insert(&self, ctx: &ExecCtx, rows: Vec<Row>) -> Result<i64> {
        let snapshot = &ctx.snapshot;
        self.check_unique(ctx, &rows, None)?;
        let count = rows.len() as i64;
        for placement in snapshot.placements_of(self.table) {
            ctx.txn.enlist(placement.adapter_id);
            let adapter = ctx.adapters.get(placement.adapter_id)?;
            let columns = placement_logical_indices(snapshot, placement.id, self.table)?;
            // Rows bucket by partition before they ship.
            let mut per_alloc: Vec<(AllocationId, Vec<Row>)> = Vec::new();
            for row in &rows {
                let alloc = allocation_for_row(snapshot, placement.id, self.table, row)?;
                let physical: Row = columns.iter().map(|i| row[*i].clone()).collect();
                match per_alloc.iter_mut().find(|(a, _)| *a == alloc) {
                    Some((_, bucket)) => bucket.push(physical),
                    None => per_alloc.push((alloc, vec![physical])),
                }
            }
            for (alloc, bucket) in per_alloc {
                adapter.insert(ctx.txn.id, alloc, InsertPlan { rows: bucket })?;
            }
        }
        Ok(count)
    }

    fn update(&self, ctx: &ExecCtx, rows: Vec<Row>) -> Result<i64> {
        let snapshot = &ctx.snapshot;
        let table = snapshot.table(self.table)?;
        let pk = primary_key(snapshot, self.table)?;

        let mut new_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut updated = row.clone();
            for (i, col) in self.update_columns.iter().enumerate() {
                let pos = table
                    .column_index(*col)
                    .ok_or(CatalogError::UnknownId(col.0, "column"))?;
                updated[pos] = self.sources[i].eval(row, &ctx.params)?;
            }
            new_rows.push(updated);
        }

        // Re-check uniqueness when a key column is being written, excluding
        // the rows being replaced.
        let touches_key = snapshot.keys_of(self.table).any(|k| {
            matches!(k.kind, KeyKind::Primary | KeyKind::Unique)
                && k.column_ids.iter().any(|c| self.update_columns.contains(c))
        });
        if touches_key {
            let exclude: FxHashSet<Vec<PolyValue>> =
                rows.iter().map(|r| key_tuple(table, &pk, r)).collect();
            self.check_unique(ctx, &new_rows, Some(&exclude))?;
        }

        let count = new_rows.len() as i64;
        for placement in snapshot.placements_of(self.table) {
            ctx.txn.enlist(placement.adapter_id);
            let adapter = ctx.adapters.get(placement.adapter_id)?;
            let columns = placement_logical_indices(snapshot, placement.id, self.table)?;
            let key_positions = key_positions_in(&columns, table, &pk)?;
            let physical: Vec<Row> = new_rows
                .iter()
                .map(|row| columns.iter().map(|i| row[*i].clone()).collect())
                .collect();
            for allocation in snapshot.allocations_of_placement(placement.id) {
                adapter.update(
                    ctx.txn.id,
                    allocation.id,
                    UpdatePlan { key_positions: key_positions.clone(), rows: physical.clone() },
                )?;
            }
        }
        Ok(count)
    }

    fn delete(&self, ctx: &ExecCtx, rows: Vec<Row>) -> Result<i64> {
        let snapshot = &ctx.snapshot;
        let table = snapshot.table(self.table)?;
        let pk = primary_key(snapshot, self.table)?;
        let keys: Vec<Row> = rows.iter().map(|r| key_tuple(table, &pk, r)).collect();
        let count = keys.len() as i64;
        for placement in snapshot.placements_of(self.table) {
            ctx.txn.enlist(placement.adapter_id);
            let adapter = ctx.adapters.get(placement.adapter_id)?;
            let columns = placement_logical_indices(snapshot, placement.id, self.table)?;
            let key_positions = key_positions_in(&columns, table, &pk)?;
            for allocation in snapshot.allocations_of_placement(placement.id) {
                adapter.delete(
                    ctx.txn.id,
                    allocation.id,
                    DeletePlan { key_positions: key_positions.clone(), keys: keys.clone() },
                )?;
            }
        }
        Ok(count)
    }

    /// Enforces primary and unique keys before any placement is written:
    /// a violation leaves every store untouched.
    fn check_unique(
        &self,
        ctx: &ExecCtx,
        incoming: &[Row],
        exclude: Option<&FxHashSet<Vec<PolyValue>>>,
    ) -> Result<()> {
        let snapshot = &ctx.snapshot;
        let table = snapshot.table(self.table)?;
        for key in snapshot.keys_of(self.table) {
            if !matches!(key.kind, KeyKind::Primary | KeyKind::Unique) {
                continue;
            }
            let mut existing = match read_key_tuples(ctx, self.table, &key.column_ids)? {
                Some(tuples) => tuples,
                None => {
                    log::warn!(
                        "no placement hosts all columns of key {}; skipping uniqueness check",
                        key.id
                    );
                    continue;
                }
            };
            if let Some(exclude) = exclude {
                existing.retain(|t| !exclude.contains(t));
            }
            let mut batch: FxHashSet<Vec<PolyValue>> = FxHashSet::default();
            for row in incoming {
                let tuple = key_tuple(table, &key.column_ids, row);
                if tuple.iter().any(|v| v.is_null()) {
                    continue;
                }
                if existing.contains(&tuple) || !batch.insert(tuple.clone()) {
                    return Err(CatalogError::invariant(format!(
                        "unique constraint on table `{}` violated by ({})",
                        table.name,
                        tuple.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ")
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl ExecNode for ModifyExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        if self.result.is_some() {
            return Ok(None);
        }
        let count = self.run(ctx)?;
        self.result = Some(count);
        Ok(Some(vec![PolyValue::Int(count)]))
    }

    fn close(&mut self) {
        self.input.close();
    }
}

/// Inserts full logical rows into one placement, bucketing by partition;
/// the DDL data-migration path shares this with the insert fan-out.
pub(crate) fn insert_rows_into_placement(
    snapshot: &Snapshot,
    adapters: &crate::adapter::AdapterRegistry,
    txn: polystore_primitives::TxId,
    table: TableId,
    placement: PlacementId,
    rows: &[Row],
) -> Result<()> {
    let adapter_id = snapshot.placement(placement)?.adapter_id;
    let adapter = adapters.get(adapter_id)?;
    let columns = placement_logical_indices(snapshot, placement, table)?;
    let mut per_alloc: Vec<(AllocationId, Vec<Row>)> = Vec::new();
    for row in rows {
        let alloc = allocation_for_row(snapshot, placement, table, row)?;
        let physical: Row = columns.iter().map(|i| row[*i].clone()).collect();
        match per_alloc.iter_mut().find(|(a, _)| *a == alloc) {
            Some((_, bucket)) => bucket.push(physical),
            None => per_alloc.push((alloc, vec![physical])),
        }
    }
    for (alloc, bucket) in per_alloc {
        adapter.insert(txn, alloc, InsertPlan { rows: bucket })?;
    }
    Ok(())
}

fn primary_key(snapshot: &Snapshot, table: TableId) -> Result<Vec<ColumnId>> {
    let pk = snapshot.primary_key_columns(table);
    if pk.is_empty() {
        return Err(CatalogError::invariant(format!(
            "table {table} has no primary key; writes cannot be fanned out"
        ))
        .into());
    }
    Ok(pk)
}

fn key_tuple(table: &polystore_catalog::LogicalTable, key: &[ColumnId], row: &Row) -> Vec<PolyValue> {
    key.iter()
        .map(|col| {
            table
                .column_index(*col)
                .and_then(|i| row.get(i).cloned())
                .unwrap_or(PolyValue::Null)
        })
        .collect()
}

/// Logical column indices of a placement's physical columns, in physical
/// order.
fn placement_logical_indices(
    snapshot: &Snapshot,
    placement: PlacementId,
    table: TableId,
) -> Result<Vec<usize>> {
    let t = snapshot.table(table)?;
    snapshot
        .placement_columns(placement)
        .iter()
        .map(|c| {
            t.column_index(c.column_id)
                .ok_or_else(|| CatalogError::UnknownId(c.column_id.0, "column").into())
        })
        .collect()
}

fn key_positions_in(
    columns: &[usize],
    table: &polystore_catalog::LogicalTable,
    pk: &[ColumnId],
) -> Result<Vec<usize>> {
    pk.iter()
        .map(|col| {
            let logical = table
                .column_index(*col)
                .ok_or(CatalogError::UnknownId(col.0, "column"))?;
            columns
                .iter()
                .position(|c| *c == logical)
                .ok_or_else(|| CatalogError::invariant("primary key missing from placement").into())
        })
        .collect()
}

/// Reads the current values of a key column set, from any placement hosting
/// all of them. `None` when no placement does.
fn read_key_tuples(
    ctx: &ExecCtx,
    table: TableId,
    key: &[ColumnId],
) -> Result<Option<FxHashSet<Vec<PolyValue>>>> {
    let snapshot = &ctx.snapshot;
    for placement in snapshot.placements_of(table) {
        let cols = snapshot.placement_columns(placement.id);
        let positions: Option<Vec<usize>> = key
            .iter()
            .map(|k| cols.iter().position(|c| c.column_id == *k))
            .collect();
        let Some(positions) = positions else { continue };
        let adapter = ctx.adapters.get(placement.adapter_id)?;
        let mut out = FxHashSet::default();
        for allocation in snapshot.allocations_of_placement(placement.id) {
            let stream = adapter.scan(ctx.txn.id, allocation.id, &positions, None, &[])?;
            for row in stream {
                out.insert(row?);
            }
        }
        return Ok(Some(out));
    }
    Ok(None)
}

/// Picks the allocation of a placement that must receive `row`, by the
/// table's partition layout.
fn allocation_for_row(
    snapshot: &Snapshot,
    placement: PlacementId,
    table: TableId,
    row: &Row,
) -> Result<AllocationId> {
    let allocations = snapshot.allocations_of_placement(placement);
    let [single] = allocations.as_slice() else {
        let t = snapshot.table(table)?;
        for allocation in &allocations {
            let partition = snapshot.partition(allocation.partition_id)?;
            if partition.kind == PartitionKind::None {
                return Ok(allocation.id);
            }
            let Some((col, spec)) = partition.qualifier.split_once(':') else { continue };
            let col: u64 = col.parse().unwrap_or(0);
            let Some(idx) = t.column_index(ColumnId(col)) else { continue };
            let value = &row[idx];
            let matched = match partition.kind {
                PartitionKind::Hash => {
                    let Some((i, n)) = spec.split_once('/') else { continue };
                    let (i, n): (u64, u64) =
                        (i.parse().unwrap_or(0), n.parse().unwrap_or(1).max(1));
                    let mut hasher = DefaultHasher::new();
                    value.hash(&mut hasher);
                    hasher.finish() % n == i
                }
                PartitionKind::List => spec.split(',').any(|v| v.trim() == value.to_string()),
                PartitionKind::Range => {
                    // Qualifiers are ascending upper bounds.
                    match (spec.trim().parse::<i64>(), value.as_int()) {
                        (Ok(bound), Some(v)) => v <= bound,
                        _ => false,
                    }
                }
                PartitionKind::None => true,
            };
            if matched {
                return Ok(allocation.id);
            }
        }
        // Range overflow and unlisted values land in the last partition.
        return Ok(allocations.last().expect("placement has allocations").id);
    };
    Ok(single.id)
}
