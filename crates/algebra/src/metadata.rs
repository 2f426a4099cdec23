use crate::{AlgArena, AlgNodeKind, JoinType, NodeId, RexNode, ScalarOp, SetOpKind};
use polystore_primitives::TableId;
use rustc_hash::FxHashMap;
use std::cell::RefCell;

/// Row-count statistics for base tables, provided by whoever holds them (the
/// catalog snapshot, or a fixture in tests).
pub trait StatsSource {
    /// `None` when no statistic is recorded; the default estimate applies.
    fn row_count(&self, table: TableId) -> Option<f64>;
}

impl StatsSource for () {
    fn row_count(&self, _table: TableId) -> Option<f64> {
        None
    }
}

/// Base-table estimate when no statistic is recorded.
pub const DEFAULT_ROW_COUNT: f64 = 100.0;

const FILTER_SELECTIVITY: f64 = 0.25;
const EQ_SELECTIVITY: f64 = 0.15;
const JOIN_SELECTIVITY: f64 = 0.25;

/// Metadata provider: a table of pure per-kind functions, memoized per node.
pub struct Metadata<'a> {
    arena: &'a AlgArena,
    stats: &'a dyn StatsSource,
    row_counts: RefCell<FxHashMap<NodeId, f64>>,
}

impl<'a> Metadata<'a> {
    pub fn new(arena: &'a AlgArena, stats: &'a dyn StatsSource) -> Self {
        Self {
            arena,
            stats,
            row_counts: RefCell::new(FxHashMap::default()),
        }
    }

    /// Estimated output row count of `node`.
    pub fn row_count(&self, node: NodeId) -> f64 {
        if let Some(&n) = self.row_counts.borrow().get(&node) {
            return n;
        }
        let n = self.compute_row_count(node);
        self.row_counts.borrow_mut().insert(node, n);
        n
    }

    fn compute_row_count(&self, node: NodeId) -> f64 {
        let alg = self.arena.get(node);
        let child_rows: Vec<f64> = alg.inputs.iter().map(|i| self.row_count(*i)).collect();
        estimate_rows(&alg.kind, &child_rows, self.stats)
    }
}

/// The per-kind row estimator; shared by the arena-level [`Metadata`] and
/// the optimizer's memo costing.
pub fn estimate_rows(kind: &AlgNodeKind, child_rows: &[f64], stats: &dyn StatsSource) -> f64 {
    let input = |i: usize| child_rows.get(i).copied().unwrap_or(DEFAULT_ROW_COUNT);
    match kind {
        AlgNodeKind::Scan { table, .. } | AlgNodeKind::PhysicalScan { table, .. } => {
            stats.row_count(*table).unwrap_or(DEFAULT_ROW_COUNT)
        }
        AlgNodeKind::Values { rows, .. } => rows.len() as f64,
        AlgNodeKind::Filter { condition } => input(0) * selectivity(condition),
        AlgNodeKind::Project { .. }
        | AlgNodeKind::Exchange { .. }
        | AlgNodeKind::Converter
        | AlgNodeKind::Window { .. } => input(0),
        AlgNodeKind::Sort { limit, offset, .. } => {
            let n = (input(0) - offset.unwrap_or(0) as f64).max(0.0);
            match limit {
                Some(limit) => n.min(*limit as f64),
                None => n,
            }
        }
        AlgNodeKind::Aggregate { group, .. } => {
            if group.is_empty() {
                1.0
            } else {
                // Distinct-group estimate without histograms.
                (input(0) * 0.5).max(1.0)
            }
        }
        AlgNodeKind::Join { condition, join_type } => {
            let (l, r) = (input(0), input(1));
            match join_type {
                JoinType::Semi => l * 0.5,
                JoinType::Anti => l * 0.5,
                _ => (l * r * JOIN_SELECTIVITY * selectivity(condition) / FILTER_SELECTIVITY).max(1.0),
            }
        }
        AlgNodeKind::SetOp { kind, all } => {
            let (l, r) = (input(0), input(1));
            match (kind, all) {
                (SetOpKind::Union, true) => l + r,
                (SetOpKind::Union, false) => (l + r) * 0.7,
                (SetOpKind::Intersect, _) => l.min(r) * 0.5,
                (SetOpKind::Minus, _) => l * 0.5,
            }
        }
        AlgNodeKind::TableModify { .. } => input(0),
        AlgNodeKind::Correlate { join_type, .. } => {
            let l = input(0);
            if join_type.projects_right() {
                l * input(1).max(1.0)
            } else {
                l * 0.5
            }
        }
    }
}

/// Predicate selectivity by shape: conjunctions multiply, equalities select
/// harder than ranges.
fn selectivity(condition: &RexNode) -> f64 {
    match condition {
        RexNode::Literal { value, .. } => match value.as_bool() {
            Some(true) => 1.0,
            Some(false) => 0.0,
            None => FILTER_SELECTIVITY,
        },
        RexNode::Call { op: ScalarOp::And, args } => args.iter().map(selectivity).product(),
        RexNode::Call { op: ScalarOp::Or, args } => {
            args.iter().map(selectivity).fold(0.0, |a, b| (a + b).min(1.0))
        }
        RexNode::Call { op: ScalarOp::Eq, .. } => EQ_SELECTIVITY,
        RexNode::Call { op, .. } if op.is_comparison() => FILTER_SELECTIVITY,
        _ => FILTER_SELECTIVITY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlgArena, TraitSet};
    use polystore_types::{Field, PolyValue, Type};

    struct Fixed(f64);

    impl StatsSource for Fixed {
        fn row_count(&self, _table: TableId) -> Option<f64> {
            Some(self.0)
        }
    }

    #[test]
    fn filter_reduces_and_memoizes() {
        let mut arena = AlgArena::new();
        let row = Type::row(vec![Field::new("a", Type::integer())]);
        let scan = arena
            .add(AlgNodeKind::Scan { table: TableId(1), row }, [], TraitSet::logical())
            .unwrap();
        let filter = arena
            .add(
                AlgNodeKind::Filter {
                    condition: RexNode::call(
                        ScalarOp::Eq,
                        vec![RexNode::input(0, Type::integer()), RexNode::literal(PolyValue::Int(1))],
                    ),
                },
                [scan],
                TraitSet::logical(),
            )
            .unwrap();
        let stats = Fixed(1000.0);
        let md = Metadata::new(&arena, &stats);
        assert_eq!(md.row_count(scan), 1000.0);
        assert_eq!(md.row_count(filter), 150.0);
        // Second query hits the memo.
        assert_eq!(md.row_count(filter), 150.0);
    }
}
