//! Physical plan to operator pipeline.

use super::exchange::RecvBatchExec;
use super::modify::ModifyExec;
use super::ops::{
    AdapterScanExec, AggregateExec, FilterExec, JoinExec, ProjectExec, SetOpExec, SortExec,
    ValuesExec,
};
use super::ExecNode;
use crate::adapter::AdapterRegistry;
use crate::error::{DbError, Result};
use polystore_algebra::{AlgArena, AlgNodeKind, NodeId, RexNode};

/// Builds the operator tree for a routed physical plan.
///
/// `Converter`s vanish (they change convention, not rows); a `Filter`
/// directly over a `PhysicalScan` fuses into the adapter cursor when the
/// adapter accepts predicate pushdown.
pub fn build_pipeline(
    arena: &AlgArena,
    node: NodeId,
    adapters: &AdapterRegistry,
) -> Result<Box<dyn ExecNode>> {
    let alg = arena.get(node);
    let input = |i: usize| build_pipeline(arena, alg.inputs[i], adapters);
    Ok(match &alg.kind {
        AlgNodeKind::Values { rows, .. } => Box::new(ValuesExec::new(rows.clone())),
        AlgNodeKind::PhysicalScan { allocation, adapter, columns, .. } => {
            Box::new(AdapterScanExec::new(
                *adapter,
                *allocation,
                columns.iter().map(|c| c.idx()).collect(),
                None,
            ))
        }
        AlgNodeKind::Filter { condition } => {
            if let Some(fused) = fuse_scan_filter(arena, alg.inputs[0], condition, adapters)? {
                return Ok(fused);
            }
            Box::new(FilterExec::new(input(0)?, condition.clone()))
        }
        AlgNodeKind::Project { exprs, .. } => Box::new(ProjectExec::new(input(0)?, exprs.clone())),
        AlgNodeKind::Join { condition, join_type } => {
            let left_arity = arena.row_type(alg.inputs[0]).fields.len();
            let right_arity = arena.row_type(alg.inputs[1]).fields.len();
            Box::new(JoinExec::new(
                input(0)?,
                input(1)?,
                condition.clone(),
                *join_type,
                left_arity,
                right_arity,
            ))
        }
        AlgNodeKind::Aggregate { group, calls } => Box::new(AggregateExec::new(
            input(0)?,
            group.iter().map(|c| c.idx()).collect(),
            calls.clone(),
        )),
        AlgNodeKind::Sort { collation, offset, limit } => {
            Box::new(SortExec::new(input(0)?, collation.clone(), *offset, *limit))
        }
        AlgNodeKind::SetOp { kind, all } => {
            Box::new(SetOpExec::new(input(0)?, input(1)?, *kind, *all))
        }
        AlgNodeKind::Exchange { .. } => Box::new(RecvBatchExec::new(input(0)?)),
        AlgNodeKind::Converter => input(0)?,
        AlgNodeKind::TableModify { table, op, update_columns, sources } => Box::new(
            ModifyExec::new(input(0)?, *table, *op, update_columns.clone(), sources.clone()),
        ),
        AlgNodeKind::Scan { table, .. } => {
            return Err(DbError::Other(anyhow::anyhow!(
                "logical scan of table {table} reached the executor unrouted"
            )))
        }
        other => {
            return Err(DbError::Other(anyhow::anyhow!(
                "operator {} is not executable",
                other.name()
            )))
        }
    })
}

/// `Filter(PhysicalScan)` with adapter pushdown support becomes one adapter
/// cursor. The predicate re-indexes from the scan's output positions to the
/// full physical row the adapter evaluates against.
fn fuse_scan_filter(
    arena: &AlgArena,
    scan_node: NodeId,
    condition: &RexNode,
    adapters: &AdapterRegistry,
) -> Result<Option<Box<dyn ExecNode>>> {
    let scan = arena.get(scan_node);
    let AlgNodeKind::PhysicalScan { allocation, adapter, columns, .. } = &scan.kind else {
        return Ok(None);
    };
    let adapter_impl = adapters.get(*adapter)?;
    let filter_kind = AlgNodeKind::Filter { condition: condition.clone() };
    if !adapter_impl.can_pushdown(&filter_kind, &scan.traits) {
        return Ok(None);
    }
    let positions: Vec<usize> = columns.iter().map(|c| c.idx()).collect();
    let remapped = condition.map_input_refs(&|i| positions.get(i).copied().unwrap_or(i));
    Ok(Some(Box::new(AdapterScanExec::new(
        *adapter,
        *allocation,
        positions,
        Some(remapped),
    ))))
}
