//! The router: logical plans onto concrete allocations.
//!
//! Every `Scan` becomes one or more adapter-bound `PhysicalScan`s (unioned
//! across partitions, joined on the primary key across partial placements),
//! every operator whose children land on different adapters gets an
//! `Exchange` under it, and every adapter the plan touches is enlisted on
//! the transaction for commit.
//!
//! Placement choice prefers, in order: a placement co-located with scans
//! already chosen for this query, the placement moving the least data, and
//! the lowest adapter id. Coverage counts a placement's manually placed
//! columns; the automatically replicated primary-key columns serve as the
//! reconstruction join key, not as data sources.

use crate::adapter::AdapterRegistry;
use crate::error::{DbError, Result, RouteError};
use crate::txn::Transaction;
use polystore_algebra::{
    AlgArena, AlgNodeKind, Distribution, JoinType, NodeId, RexNode, SetOpKind, TraitSet,
};
use polystore_catalog::{PlacementType, Snapshot};
use polystore_primitives::{AdapterId, ColList, ColumnId, PlacementId, TableId};
use polystore_types::{Field, Type};

/// Where a routed subtree runs: wholly on one adapter, or on the
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Home {
    Store(AdapterId),
    Coordinator,
}

struct Routed {
    node: NodeId,
    home: Home,
}

pub struct Router<'a> {
    snapshot: &'a Snapshot,
    adapters: &'a AdapterRegistry,
    txn: &'a Transaction,
    /// Adapters already chosen for scans of this query; later scans prefer
    /// them to minimize exchanges.
    chosen: Vec<AdapterId>,
}

impl<'a> Router<'a> {
    pub fn new(snapshot: &'a Snapshot, adapters: &'a AdapterRegistry, txn: &'a Transaction) -> Self {
        Self { snapshot, adapters, txn, chosen: Vec::new() }
    }

    pub fn route(&mut self, arena: &mut AlgArena, root: NodeId) -> Result<NodeId> {
        let routed = self.route_node(arena, root)?;
        Ok(routed.node)
    }

    fn route_node(&mut self, arena: &mut AlgArena, node: NodeId) -> Result<Routed> {
        let alg = arena.get(node).clone();
        match &alg.kind {
            // No adapter implements windows or correlates and the
            // coordinator has no fallback operator for them.
            AlgNodeKind::Window { .. } => {
                Err(RouteError::UnsupportedCrossStoreOperator { op: "Window" }.into())
            }
            AlgNodeKind::Correlate { .. } => {
                Err(RouteError::UnsupportedCrossStoreOperator { op: "Correlate" }.into())
            }
            AlgNodeKind::Scan { table, .. } => self.route_scan(arena, *table),
            AlgNodeKind::TableModify { table, .. } => {
                let child = self.route_node(arena, alg.inputs[0])?;
                let child = self.materialize(arena, child, Some(&alg.kind))?;
                // Every placement of the target receives the write.
                for placement in self.snapshot.placements_of(*table) {
                    self.txn.enlist(placement.adapter_id);
                }
                let out = arena.add(alg.kind.clone(), [child.node], TraitSet::enumerable())?;
                Ok(Routed { node: out, home: Home::Coordinator })
            }
            _ => {
                let mut children = Vec::with_capacity(alg.inputs.len());
                for input in &alg.inputs {
                    children.push(self.route_node(arena, *input)?);
                }
                let crossing = alg.inputs.len() > 1
                    && children
                        .iter()
                        .any(|c| children.first().is_some_and(|f| c.home != f.home));
                let home = match (children.first(), crossing) {
                    (Some(first), false) => first.home,
                    _ => Home::Coordinator,
                };
                // A multi-input operator over different adapters runs at the
                // coordinator; its store-side children materialize through
                // exchanges unless the pair can be pushed down.
                let inputs: Vec<NodeId> = if crossing {
                    children
                        .into_iter()
                        .map(|c| self.materialize(arena, c, Some(&alg.kind)).map(|r| r.node))
                        .collect::<Result<_>>()?
                } else {
                    children.into_iter().map(|c| c.node).collect()
                };
                let out = arena.add(alg.kind.clone(), inputs, TraitSet::enumerable())?;
                let home = if crossing { Home::Coordinator } else { home };
                Ok(Routed { node: out, home })
            }
        }
    }

    /// Wraps a store-homed fragment in an `Exchange` when the consuming
    /// operator cannot be pushed down to that store.
    fn materialize(
        &self,
        arena: &mut AlgArena,
        routed: Routed,
        consumer: Option<&AlgNodeKind>,
    ) -> Result<Routed> {
        let Home::Store(adapter) = routed.home else { return Ok(routed) };
        if let Some(consumer) = consumer {
            let adapter_impl = self.adapters.get(adapter)?;
            let child_traits = arena.get(routed.node).traits.clone();
            if adapter_impl.can_pushdown(consumer, &child_traits) {
                return Ok(routed);
            }
        }
        let traits = TraitSet::enumerable().with_distribution(Distribution::Singleton);
        let node = arena.add(
            AlgNodeKind::Exchange { distribution: Distribution::Singleton },
            [routed.node],
            traits,
        )?;
        Ok(Routed { node, home: Home::Coordinator })
    }

    // ------------------------------------------------------------- scans

    fn route_scan(&mut self, arena: &mut AlgArena, table: TableId) -> Result<Routed> {
        let t = self.snapshot.table(table)?;
        let needed: Vec<ColumnId> = t.columns.iter().map(|c| c.id).collect();
        let pk = self.snapshot.primary_key_columns(table);

        let placements = self.snapshot.placements_of(table);
        if placements.is_empty() {
            return Err(RouteError::NoPlacementCoversColumns { table }.into());
        }

        // Manually placed columns per placement.
        let manual: Vec<(PlacementId, AdapterId, Vec<ColumnId>)> = placements
            .iter()
            .map(|p| {
                let cols: Vec<ColumnId> = self
                    .snapshot
                    .placement_columns(p.id)
                    .iter()
                    .filter(|c| c.placement_type == PlacementType::Manual)
                    .map(|c| c.column_id)
                    .collect();
                (p.id, p.adapter_id, cols)
            })
            .collect();

        // Preference (i)-(iii): single covering placement.
        let mut covering: Vec<&(PlacementId, AdapterId, Vec<ColumnId>)> = manual
            .iter()
            .filter(|(_, _, cols)| needed.iter().all(|n| cols.contains(n)))
            .collect();
        covering.sort_by_key(|(_, adapter, _)| {
            let colocated = self.chosen.contains(adapter);
            // Transfer estimate degenerates to column count here: a single
            // covering placement always ships `needed` columns.
            (!colocated, *adapter)
        });
        if let Some((placement, adapter, _)) = covering.first() {
            let node = self.scan_placement(arena, table, *placement, *adapter, &needed)?;
            self.chosen.push(*adapter);
            self.txn.enlist(*adapter);
            return Ok(Routed { node, home: Home::Store(*adapter) });
        }

        // Greedy cover over partial placements; each contributes its manual
        // columns plus the primary key for reconstruction.
        if pk.is_empty() {
            return Err(RouteError::NoPlacementCoversColumns { table }.into());
        }
        let mut remaining: Vec<ColumnId> = needed.clone();
        let mut parts: Vec<(PlacementId, AdapterId, Vec<ColumnId>)> = Vec::new();
        while !remaining.is_empty() {
            let best = manual
                .iter()
                .map(|(p, a, cols)| {
                    let gain = cols.iter().filter(|c| remaining.contains(c)).count();
                    (gain, self.chosen.contains(a), *p, *a, cols)
                })
                .filter(|(gain, ..)| *gain > 0)
                // Highest gain, co-located preferred, then lowest adapter id.
                .max_by_key(|(gain, colocated, _, a, _)| (*gain, *colocated, std::cmp::Reverse(*a)));
            let Some((_, _, placement, adapter, cols)) = best else {
                return Err(RouteError::NoPlacementCoversColumns { table }.into());
            };
            let mut produced: Vec<ColumnId> =
                cols.iter().filter(|c| remaining.contains(c)).copied().collect();
            for key in &pk {
                if !produced.contains(key) {
                    produced.push(*key);
                }
            }
            remaining.retain(|c| !cols.contains(c));
            parts.push((placement, adapter, produced));
        }

        // Scan each part, materialize across adapters, and join on the key.
        let mut acc: Option<(NodeId, Vec<ColumnId>)> = None;
        let multi_adapter = parts.windows(2).any(|w| w[0].1 != w[1].1);
        for (placement, adapter, produced) in parts {
            let scan = self.scan_placement(arena, table, placement, adapter, &produced)?;
            self.chosen.push(adapter);
            self.txn.enlist(adapter);
            let scan = if multi_adapter {
                self.materialize(arena, Routed { node: scan, home: Home::Store(adapter) }, None)?
                    .node
            } else {
                scan
            };
            acc = Some(match acc {
                None => (scan, produced),
                Some((left, left_cols)) => {
                    let joined =
                        self.pk_join(arena, table, left, &left_cols, scan, &produced, &pk)?;
                    let mut cols = left_cols;
                    let extra: Vec<_> = produced.iter().filter(|c| !cols.contains(c)).cloned().collect();
                    cols.extend(extra);
                    (joined, cols)
                }
            });
        }
        let (node, cols) = acc.expect("at least one part");

        // Restore the logical column order.
        let exprs: Vec<RexNode> = needed
            .iter()
            .map(|col| {
                let idx = cols.iter().position(|c| c == col).expect("covered above");
                let ty = t.column(*col).expect("column of this table").declared_type();
                RexNode::input(idx, ty)
            })
            .collect();
        let names: Vec<Box<str>> = t.columns.iter().map(|c| c.name.as_str().into()).collect();
        let node = arena.add(
            AlgNodeKind::Project { exprs, names },
            [node],
            TraitSet::enumerable(),
        )?;
        Ok(Routed { node, home: Home::Coordinator })
    }

    /// One placement's scan: per-partition `PhysicalScan`s, unioned.
    fn scan_placement(
        &self,
        arena: &mut AlgArena,
        table: TableId,
        placement: PlacementId,
        adapter: AdapterId,
        columns: &[ColumnId],
    ) -> Result<NodeId> {
        let t = self.snapshot.table(table)?;
        let placement_cols = self.snapshot.placement_columns(placement);
        let mut physical_positions = ColList::new();
        for col in columns {
            let pos = placement_cols
                .iter()
                .position(|c| c.column_id == *col)
                .ok_or(RouteError::NoPlacementCoversColumns { table })?;
            physical_positions.push(polystore_primitives::ColId(pos as u32));
        }
        let fields: Vec<Field> = columns
            .iter()
            .map(|c| {
                let col = t.column(*c).expect("column of this table");
                Field::new(col.name.as_str(), col.declared_type())
            })
            .collect();
        let row = Type::row(fields);

        let allocations = self.snapshot.allocations_of_placement(placement);
        if allocations.is_empty() {
            return Err(RouteError::NoPlacementCoversColumns { table }.into());
        }
        let mut out: Option<NodeId> = None;
        for allocation in allocations {
            let scan = arena.add(
                AlgNodeKind::PhysicalScan {
                    table,
                    allocation: allocation.id,
                    adapter,
                    columns: physical_positions.clone(),
                    row: row.clone(),
                },
                [],
                TraitSet::store(adapter),
            )?;
            out = Some(match out {
                None => scan,
                Some(prev) => arena.add(
                    AlgNodeKind::SetOp { kind: SetOpKind::Union, all: true },
                    [prev, scan],
                    TraitSet::store(adapter),
                )?,
            });
        }
        Ok(out.expect("checked non-empty"))
    }

    /// Joins two partial scans on the table's primary key.
    fn pk_join(
        &self,
        arena: &mut AlgArena,
        table: TableId,
        left: NodeId,
        left_cols: &[ColumnId],
        right: NodeId,
        right_cols: &[ColumnId],
        pk: &[ColumnId],
    ) -> Result<NodeId> {
        let t = self.snapshot.table(table)?;
        let left_arity = left_cols.len();
        let mut condition: Option<RexNode> = None;
        for key in pk {
            let l = left_cols.iter().position(|c| c == key).ok_or_else(|| {
                DbError::Route(RouteError::NoPlacementCoversColumns { table })
            })?;
            let r = right_cols.iter().position(|c| c == key).ok_or_else(|| {
                DbError::Route(RouteError::NoPlacementCoversColumns { table })
            })?;
            let ty = t.column(*key).expect("pk column").declared_type();
            let eq = RexNode::eq(
                RexNode::input(l, ty.clone()),
                RexNode::input(left_arity + r, ty),
            );
            condition = Some(match condition {
                None => eq,
                Some(acc) => RexNode::and(acc, eq),
            });
        }
        let condition = condition.expect("pk is non-empty");
        Ok(arena.add(
            AlgNodeKind::Join { condition, join_type: JoinType::Inner },
            [left, right],
            TraitSet::enumerable(),
        )?)
    }
}
