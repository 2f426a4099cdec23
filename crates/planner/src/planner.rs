//! The search engine: top-down rule firing over the memo with memoized
//! costing.

use crate::cost::{Cost, PAGE_SIZE};
use crate::memo::{Memo, MemoExprId, SetId};
use crate::rules::{default_rules, RewriteNode, Rule, RuleKind};
use crate::PlanError;
use polystore_algebra::{
    estimate_rows, AlgArena, AlgNodeKind, Convention, NodeId, StatsSource, TraitSet,
    DEFAULT_ROW_COUNT,
};
use rustc_hash::FxHashSet;
use std::collections::BinaryHeap;

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Maximum number of (rule, expression) firings per optimization.
    pub iteration_budget: usize,
    /// Bound on the bushy join-reordering rules.
    pub join_iterations: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            iteration_budget: 2_000,
            join_iterations: 16,
        }
    }
}

pub struct Planner {
    rules: Vec<Box<dyn Rule>>,
    config: PlannerConfig,
}

impl Planner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { rules: default_rules(), config }
    }

    pub fn with_rules(config: PlannerConfig, rules: Vec<Box<dyn Rule>>) -> Self {
        Self { rules, config }
    }

    /// Optimizes `root` and returns the best physical plan, interned into
    /// the same arena.
    pub fn optimize(
        &self,
        arena: &mut AlgArena,
        root: NodeId,
        stats: &dyn StatsSource,
    ) -> Result<NodeId, PlanError> {
        let mut memo = Memo::new();
        let root_set = memo.register_plan(arena, root);

        self.fire_rules(&mut memo);
        self.compute_costs(&mut memo, stats);

        let root_set = memo.find(root_set);
        let required = TraitSet::enumerable();
        let (best, cost) = memo
            .best_in(root_set, &required)
            .ok_or(PlanError::NoPlanFound)?;
        log::debug!(
            "optimized to {} with cost {cost} over {} memo exprs",
            memo.expr(best).kind.name(),
            memo.num_exprs()
        );
        self.extract(&memo, arena, best)
    }

    /// Fires rules from a priority queue of `(rule, expression)` pairs; each
    /// pair fires at most once. Stops when the queue drains or the budget is
    /// spent, whichever comes first.
    fn fire_rules(&self, memo: &mut Memo) {
        let priority = |kind: RuleKind| -> i32 {
            match kind {
                RuleKind::Transformation => 2,
                RuleKind::Converter => 1,
                RuleKind::Physical => 0,
            }
        };
        let mut queue: BinaryHeap<(i32, usize, u32)> = BinaryHeap::new();
        for expr in 0..memo.num_exprs() {
            for (i, rule) in self.rules.iter().enumerate() {
                queue.push((priority(rule.kind()), i, expr as u32));
            }
        }
        let mut fired: FxHashSet<(usize, u32)> = FxHashSet::default();
        let mut bounded_fires = 0usize;
        let mut pops = 0usize;

        while let Some((_, rule_idx, expr_id)) = queue.pop() {
            pops += 1;
            if pops > self.config.iteration_budget {
                log::debug!("planner budget exhausted after {pops} firings");
                break;
            }
            if !fired.insert((rule_idx, expr_id)) {
                continue;
            }
            let rule = &self.rules[rule_idx];
            if rule.bounded() && bounded_fires >= self.config.join_iterations {
                continue;
            }
            let expr = memo.expr(MemoExprId(expr_id)).clone();
            if !rule.matches(&expr, memo) {
                continue;
            }
            if rule.bounded() {
                bounded_fires += 1;
            }
            let rewrites = rule.apply(&expr, memo);
            let before = memo.num_exprs();
            for rewrite in rewrites {
                register_rewrite(memo, expr.set, rewrite.root);
            }
            for new_expr in before..memo.num_exprs() {
                for (i, rule) in self.rules.iter().enumerate() {
                    queue.push((priority(rule.kind()), i, new_expr as u32));
                }
            }
        }
    }

    /// Relaxation over all physical expressions until no subset best
    /// improves.
    fn compute_costs(&self, memo: &mut Memo, stats: &dyn StatsSource) {
        let rows = self.estimate_set_rows(memo, stats);
        let expr_count = memo.num_exprs();
        // Each pass can only lengthen the chain of settled subsets, so
        // expr_count passes suffice.
        for _ in 0..=expr_count {
            let mut changed = false;
            for i in 0..expr_count {
                let expr = memo.expr(MemoExprId(i as u32)).clone();
                if expr.convention == Convention::Logical {
                    continue;
                }
                let Some(children_cost) = self.children_cost(memo, &expr) else {
                    continue;
                };
                let own = self_cost(&expr.kind, &rows, memo, &expr);
                let total = own.plus(&children_cost);
                let traits = TraitSet::logical().with_convention(expr.convention);
                let subset = memo.subset_mut(expr.set, &traits);
                let better = match subset.best {
                    None => true,
                    Some((best_id, best_cost)) => {
                        Cost::compare(&total, expr.id.0, &best_cost, best_id.0).is_lt()
                    }
                };
                if better {
                    subset.best = Some((expr.id, total));
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn children_cost(&self, memo: &Memo, expr: &crate::memo::MemoExpr) -> Option<Cost> {
        let mut total = Cost::ZERO;
        for child in &expr.children {
            let best = match expr.kind {
                // A converter consumes its own set's store-convention best.
                AlgNodeKind::Converter => best_store(memo, *child)?,
                _ => {
                    let traits = TraitSet::logical().with_convention(expr.convention);
                    memo.best_in(*child, &traits)?
                }
            };
            total = total.plus(&best.1);
        }
        Some(total)
    }

    /// Logical row estimate per set, from each set's first (frontend)
    /// expression.
    fn estimate_set_rows(&self, memo: &Memo, stats: &dyn StatsSource) -> Vec<f64> {
        let mut rows = vec![f64::NAN; memo.num_exprs()];
        // Sets are identified by their representative expr's set id; store
        // per set id instead.
        let mut set_rows: Vec<f64> = Vec::new();
        let mut resolve = |memo: &Memo, set: SetId, set_rows: &mut Vec<f64>| -> f64 {
            fn go(memo: &Memo, set: SetId, set_rows: &mut Vec<f64>, depth: usize) -> f64 {
                let set = memo.find(set);
                if (set.0 as usize) < set_rows.len() && !set_rows[set.0 as usize].is_nan() {
                    return set_rows[set.0 as usize];
                }
                if depth > 256 {
                    return DEFAULT_ROW_COUNT;
                }
                let expr = match memo.exprs_in(set).next() {
                    Some(e) => e.clone(),
                    None => return DEFAULT_ROW_COUNT,
                };
                let child_rows: Vec<f64> = expr
                    .children
                    .iter()
                    .map(|c| go(memo, *c, set_rows, depth + 1))
                    .collect();
                let n = estimate_rows(&expr.kind, &child_rows, &NoStats);
                if set_rows.len() <= set.0 as usize {
                    set_rows.resize(set.0 as usize + 1, f64::NAN);
                }
                set_rows[set.0 as usize] = n;
                n
            }
            struct NoStats;
            impl polystore_algebra::StatsSource for NoStats {
                fn row_count(&self, _t: polystore_primitives::TableId) -> Option<f64> {
                    None
                }
            }
            go(memo, set, set_rows, 0)
        };
        // Seed base sets with real statistics first.
        for i in 0..memo.num_exprs() {
            let expr = memo.expr(MemoExprId(i as u32));
            if let AlgNodeKind::Scan { table, .. } | AlgNodeKind::PhysicalScan { table, .. } =
                &expr.kind
            {
                if let Some(n) = stats.row_count(*table) {
                    let set = memo.find(expr.set);
                    if set_rows.len() <= set.0 as usize {
                        set_rows.resize(set.0 as usize + 1, f64::NAN);
                    }
                    set_rows[set.0 as usize] = n;
                }
            }
        }
        for i in 0..memo.num_exprs() {
            let set = memo.expr(MemoExprId(i as u32)).set;
            rows[i] = resolve(memo, set, &mut set_rows);
        }
        rows
    }

    /// Rebuilds the winning expression tree into the arena.
    fn extract(&self, memo: &Memo, arena: &mut AlgArena, id: MemoExprId) -> Result<NodeId, PlanError> {
        let expr = memo.expr(id).clone();
        let mut children = Vec::with_capacity(expr.children.len());
        for child in &expr.children {
            let best = match expr.kind {
                AlgNodeKind::Converter => best_store(memo, *child).ok_or(PlanError::NoPlanFound)?,
                _ => {
                    let traits = TraitSet::logical().with_convention(expr.convention);
                    memo.best_in(*child, &traits).ok_or(PlanError::NoPlanFound)?
                }
            };
            children.push(self.extract(memo, arena, best.0)?);
        }
        let traits = TraitSet::logical().with_convention(expr.convention);
        Ok(arena.add(expr.kind, children, traits)?)
    }
}

/// The cheapest store-convention best of a set, for converter inputs.
fn best_store(memo: &Memo, set: SetId) -> Option<(MemoExprId, Cost)> {
    memo.set(set)
        .subsets
        .iter()
        .filter(|s| matches!(s.traits.convention, Convention::Store(_)))
        .filter_map(|s| s.best)
        .min_by(|a, b| Cost::compare(&a.1, a.0 .0, &b.1, b.0 .0))
}

fn register_rewrite(memo: &mut Memo, target: SetId, root: RewriteNode) {
    match root {
        RewriteNode::Set(set) => memo.merge(target, set),
        RewriteNode::Expr { kind, children, convention } => {
            let child_sets: Vec<SetId> = children
                .into_iter()
                .map(|c| register_rewrite_node(memo, c))
                .collect();
            memo.intern(kind, child_sets, convention, Some(target));
        }
    }
}

fn register_rewrite_node(memo: &mut Memo, node: RewriteNode) -> SetId {
    match node {
        RewriteNode::Set(set) => memo.find(set),
        RewriteNode::Expr { kind, children, convention } => {
            let child_sets: Vec<SetId> = children
                .into_iter()
                .map(|c| register_rewrite_node(memo, c))
                .collect();
            memo.intern(kind, child_sets, convention, None).1
        }
    }
}

fn self_cost(kind: &AlgNodeKind, rows: &[f64], memo: &Memo, expr: &crate::memo::MemoExpr) -> Cost {
    let out = rows.get(expr.id.0 as usize).copied().unwrap_or(DEFAULT_ROW_COUNT);
    let child = |i: usize| -> f64 {
        expr.children
            .get(i)
            .map(|c| {
                memo.exprs_in(*c)
                    .next()
                    .map(|e| rows.get(e.id.0 as usize).copied().unwrap_or(DEFAULT_ROW_COUNT))
                    .unwrap_or(DEFAULT_ROW_COUNT)
            })
            .unwrap_or(0.0)
    };
    match kind {
        AlgNodeKind::Scan { .. } | AlgNodeKind::PhysicalScan { .. } => Cost::scan(out),
        AlgNodeKind::Values { rows: r, .. } => Cost::new(r.len() as f64, r.len() as f64, 0.0),
        AlgNodeKind::Filter { .. } => Cost::new(out, child(0), 0.0),
        AlgNodeKind::Project { exprs, .. } => {
            Cost::new(out, child(0) * (1.0 + exprs.len() as f64 * 0.01), 0.0)
        }
        AlgNodeKind::Join { .. } => Cost::new(out, child(0) + child(1) + out, 0.0),
        AlgNodeKind::Aggregate { .. } => Cost::new(out, child(0), 0.0),
        AlgNodeKind::Sort { .. } => {
            let n = child(0).max(2.0);
            Cost::new(out, n * n.log2(), 0.0)
        }
        AlgNodeKind::SetOp { .. } => Cost::new(out, child(0) + child(1), 0.0),
        AlgNodeKind::TableModify { .. } => Cost::new(out, child(0), child(0) / PAGE_SIZE),
        AlgNodeKind::Exchange { .. } => Cost::new(out, child(0), child(0) / PAGE_SIZE),
        AlgNodeKind::Converter => Cost::new(out, 0.01, 0.0),
        AlgNodeKind::Window { .. } => Cost::new(out, child(0), 0.0),
        AlgNodeKind::Correlate { .. } => Cost::new(out, child(0) * child(1).max(1.0), 0.0),
    }
}
