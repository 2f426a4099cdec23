//! The rule set.
//!
//! Rules are plain trait objects in a dispatch table; a rule inspects one
//! memo expression (and, through the memo, the expressions of its child
//! sets) and emits rewrites. A rewrite is a tree over existing sets and new
//! expressions; the engine interns it into the fired expression's set.

use crate::memo::{Memo, MemoExpr, SetId};
use polystore_algebra::{
    AggKind, AlgNodeKind, Convention, JoinType, RexNode, ScalarOp,
};
use polystore_primitives::{ColId, ColList};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Transformation,
    Converter,
    Physical,
}

#[derive(Debug, Clone)]
pub enum RewriteNode {
    /// An existing equivalence set, unchanged.
    Set(SetId),
    /// A new expression over rewritten children.
    Expr {
        kind: AlgNodeKind,
        children: Vec<RewriteNode>,
        convention: Convention,
    },
}

impl RewriteNode {
    pub fn expr(kind: AlgNodeKind, children: Vec<RewriteNode>) -> Self {
        RewriteNode::Expr { kind, children, convention: Convention::Logical }
    }
}

#[derive(Debug, Clone)]
pub struct Rewrite {
    pub root: RewriteNode,
}

pub trait Rule: Send + Sync {
    fn name(&self) -> &'static str;
    fn kind(&self) -> RuleKind;
    /// Bounded rules (the join-reordering pair) stop firing after the
    /// configured iteration budget.
    fn bounded(&self) -> bool {
        false
    }
    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool;
    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite>;
}

/// The default rule set, in firing-priority order.
pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![
        Box::new(FoldConstants),
        Box::new(FilterIntoProject),
        Box::new(FilterIntoJoin),
        Box::new(ProjectMerge),
        Box::new(ProjectRemoveIdentity),
        Box::new(MinMaxPushThroughJoin),
        Box::new(DecorrelateEquiSubquery),
        Box::new(JoinCommute),
        Box::new(JoinAssociate),
        Box::new(EnumerableImplementation),
        Box::new(StoreToEnumerableConverter),
    ]
}

fn is_logical(expr: &MemoExpr) -> bool {
    expr.convention == Convention::Logical
}

fn arity_of(memo: &Memo, set: SetId) -> usize {
    memo.row_type(set).fields.len()
}

/// Splits a conjunction into its factors.
fn conjuncts(rex: &RexNode) -> Vec<RexNode> {
    match rex {
        RexNode::Call { op: ScalarOp::And, args } => {
            args.iter().flat_map(conjuncts).collect()
        }
        other => vec![other.clone()],
    }
}

fn conjoin(mut parts: Vec<RexNode>) -> Option<RexNode> {
    let first = parts.pop()?;
    Some(parts.into_iter().fold(first, |acc, p| RexNode::and(p, acc)))
}

// ---------------------------------------------------------------- constant folding

/// Evaluates input-free predicates; `Filter(TRUE)` disappears, a
/// `Filter(FALSE)` collapses to empty `Values`.
pub struct FoldConstants;

impl Rule for FoldConstants {
    fn name(&self) -> &'static str {
        "FoldConstants"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, _memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(&expr.kind, AlgNodeKind::Filter { condition }
                if condition.input_refs().is_empty()
                    && !condition.has_params()
                    && !matches!(condition, RexNode::Literal { .. }))
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Filter { condition } = &expr.kind else { return vec![] };
        let Ok(value) = condition.eval(&[], &[]) else { return vec![] };
        match value.as_bool() {
            Some(true) => vec![Rewrite { root: RewriteNode::Set(expr.children[0]) }],
            Some(false) | None => {
                let row = memo.row_type(expr.children[0]).clone();
                vec![Rewrite {
                    root: RewriteNode::expr(AlgNodeKind::Values { rows: vec![], row }, vec![]),
                }]
            }
        }
    }
}

// ---------------------------------------------------------------- predicate pushdown

/// `Filter(Project(x))` becomes `Project(Filter'(x))` with the predicate
/// rewritten through the projection.
pub struct FilterIntoProject;

impl Rule for FilterIntoProject {
    fn name(&self) -> &'static str {
        "FilterIntoProject"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(expr.kind, AlgNodeKind::Filter { .. })
            && memo
                .exprs_in(expr.children[0])
                .any(|c| is_logical(c) && matches!(c.kind, AlgNodeKind::Project { .. }))
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Filter { condition } = &expr.kind else { return vec![] };
        let mut out = Vec::new();
        for child in memo.exprs_in(expr.children[0]) {
            let AlgNodeKind::Project { exprs, names } = &child.kind else { continue };
            if !is_logical(child) {
                continue;
            }
            // A projection computing from parameters of window calls cannot
            // host the pushed predicate; substitution handles the rest.
            let pushed = condition.substitute(exprs);
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Project { exprs: exprs.clone(), names: names.clone() },
                    vec![RewriteNode::expr(
                        AlgNodeKind::Filter { condition: pushed },
                        vec![RewriteNode::Set(child.children[0])],
                    )],
                ),
            });
        }
        out
    }
}

/// Splits a filter above an inner join by side; single-side conjuncts run
/// below the join, mixed ones merge into the join condition.
pub struct FilterIntoJoin;

impl Rule for FilterIntoJoin {
    fn name(&self) -> &'static str {
        "FilterIntoJoin"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(expr.kind, AlgNodeKind::Filter { .. })
            && memo.exprs_in(expr.children[0]).any(|c| {
                is_logical(c)
                    && matches!(c.kind, AlgNodeKind::Join { join_type: JoinType::Inner, .. })
            })
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Filter { condition } = &expr.kind else { return vec![] };
        let mut out = Vec::new();
        for join in memo.exprs_in(expr.children[0]) {
            let AlgNodeKind::Join { condition: join_cond, join_type: JoinType::Inner } = &join.kind
            else {
                continue;
            };
            if !is_logical(join) {
                continue;
            }
            let left_arity = arity_of(memo, join.children[0]);
            let mut left_parts = Vec::new();
            let mut right_parts = Vec::new();
            let mut mixed = Vec::new();
            for part in conjuncts(condition) {
                let refs = part.input_refs();
                if refs.iter().all(|r| *r < left_arity) && !refs.is_empty() {
                    left_parts.push(part);
                } else if refs.iter().all(|r| *r >= left_arity) && !refs.is_empty() {
                    right_parts.push(part.map_input_refs(&|i| i - left_arity));
                } else {
                    mixed.push(part);
                }
            }
            if left_parts.is_empty() && right_parts.is_empty() {
                continue;
            }
            let left = match conjoin(left_parts) {
                Some(cond) => RewriteNode::expr(
                    AlgNodeKind::Filter { condition: cond },
                    vec![RewriteNode::Set(join.children[0])],
                ),
                None => RewriteNode::Set(join.children[0]),
            };
            let right = match conjoin(right_parts) {
                Some(cond) => RewriteNode::expr(
                    AlgNodeKind::Filter { condition: cond },
                    vec![RewriteNode::Set(join.children[1])],
                ),
                None => RewriteNode::Set(join.children[1]),
            };
            let new_cond = conjoin(
                mixed.into_iter().chain(conjuncts(join_cond)).collect(),
            )
            .expect("join condition survives");
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Join { condition: new_cond, join_type: JoinType::Inner },
                    vec![left, right],
                ),
            });
        }
        out
    }
}

// ---------------------------------------------------------------- projection pruning

/// `Project(Project(x))` composes into one projection.
pub struct ProjectMerge;

impl Rule for ProjectMerge {
    fn name(&self) -> &'static str {
        "ProjectMerge"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(expr.kind, AlgNodeKind::Project { .. })
            && memo
                .exprs_in(expr.children[0])
                .any(|c| is_logical(c) && matches!(c.kind, AlgNodeKind::Project { .. }))
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Project { exprs, names } = &expr.kind else { return vec![] };
        let mut out = Vec::new();
        for inner in memo.exprs_in(expr.children[0]) {
            let AlgNodeKind::Project { exprs: inner_exprs, .. } = &inner.kind else { continue };
            if !is_logical(inner) {
                continue;
            }
            let composed = exprs.iter().map(|e| e.substitute(inner_exprs)).collect();
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Project { exprs: composed, names: names.clone() },
                    vec![RewriteNode::Set(inner.children[0])],
                ),
            });
        }
        out
    }
}

/// Drops a projection that passes every input field through unchanged.
pub struct ProjectRemoveIdentity;

impl Rule for ProjectRemoveIdentity {
    fn name(&self) -> &'static str {
        "ProjectRemoveIdentity"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        if !is_logical(expr) {
            return false;
        }
        let AlgNodeKind::Project { exprs, names } = &expr.kind else { return false };
        let input = memo.row_type(expr.children[0]);
        exprs.len() == input.fields.len()
            && exprs.iter().enumerate().all(|(i, e)| {
                matches!(e, RexNode::InputRef { index, .. } if *index == i)
            })
            && names
                .iter()
                .zip(&input.fields)
                .all(|(n, f)| n.as_ref() == f.name.as_ref())
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo) -> Vec<Rewrite> {
        vec![Rewrite { root: RewriteNode::Set(expr.children[0]) }]
    }
}

// ---------------------------------------------------------------- aggregate pushdown

/// Pre-aggregates MIN/MAX below an inner join.
///
/// Safe because MIN and MAX are duplicate-insensitive: the inner aggregate
/// groups by the query keys plus the join keys, the outer aggregate
/// re-combines. Fires only when every call is MIN or MAX over a left-side
/// column and the group keys are left-side.
pub struct MinMaxPushThroughJoin;

impl Rule for MinMaxPushThroughJoin {
    fn name(&self) -> &'static str {
        "MinMaxPushThroughJoin"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        if !is_logical(expr) {
            return false;
        }
        let AlgNodeKind::Aggregate { calls, .. } = &expr.kind else { return false };
        !calls.is_empty()
            && calls.iter().all(|c| matches!(c.kind, AggKind::Min | AggKind::Max) && !c.distinct)
            && memo.exprs_in(expr.children[0]).any(|c| {
                is_logical(c)
                    && matches!(c.kind, AlgNodeKind::Join { join_type: JoinType::Inner, .. })
            })
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Aggregate { group, calls } = &expr.kind else { return vec![] };
        let mut out = Vec::new();
        for join in memo.exprs_in(expr.children[0]) {
            let AlgNodeKind::Join { condition, join_type: JoinType::Inner } = &join.kind else {
                continue;
            };
            if !is_logical(join) {
                continue;
            }
            let left_arity = arity_of(memo, join.children[0]);
            let all_left = group.iter().all(|c| c.idx() < left_arity)
                && calls
                    .iter()
                    .all(|c| c.arg.is_some_and(|a| a.idx() < left_arity));
            if !all_left {
                continue;
            }
            let join_left_refs: Vec<usize> = condition
                .input_refs()
                .into_iter()
                .filter(|r| *r < left_arity)
                .collect();

            // Inner aggregate on the left: group keys plus join keys.
            let mut inner_group = ColList::from_iter(group.iter());
            for r in &join_left_refs {
                inner_group.push(ColId(*r as u32));
            }
            let inner_arity = inner_group.len() + calls.len();

            // Map a left-side column to its slot in the inner aggregate
            // output.
            let slot = |col: usize| -> Option<usize> {
                inner_group.iter().position(|c| c.idx() == col)
            };

            let remapped_cond = condition.map_input_refs(&|i| {
                if i < left_arity {
                    slot(i).expect("join keys are grouped")
                } else {
                    i - left_arity + inner_arity
                }
            });

            let inner = RewriteNode::expr(
                AlgNodeKind::Aggregate { group: inner_group.clone(), calls: calls.clone() },
                vec![RewriteNode::Set(join.children[0])],
            );
            let new_join = RewriteNode::expr(
                AlgNodeKind::Join { condition: remapped_cond, join_type: JoinType::Inner },
                vec![inner, RewriteNode::Set(join.children[1])],
            );

            // Outer aggregate re-combines over the pre-aggregated slots.
            let outer_group =
                ColList::from_iter(group.iter().map(|c| {
                    ColId(slot(c.idx()).expect("group keys are grouped") as u32)
                }));
            let outer_calls = calls
                .iter()
                .enumerate()
                .map(|(i, c)| polystore_algebra::AggCall {
                    kind: c.kind,
                    arg: Some(ColId((inner_group.len() + i) as u32)),
                    distinct: false,
                })
                .collect();
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Aggregate { group: outer_group, calls: outer_calls },
                    vec![new_join],
                ),
            });
        }
        out
    }
}

// ---------------------------------------------------------------- decorrelation

/// `Correlate(l, Filter(cor.f = x.c, x))` becomes an equi `Join`.
pub struct DecorrelateEquiSubquery;

impl DecorrelateEquiSubquery {
    /// `(left field, inner column)` when the condition is an equi
    /// correlation.
    fn equi_parts(cond: &RexNode, id: polystore_algebra::CorrelationId) -> Option<(usize, usize)> {
        let RexNode::Call { op: ScalarOp::Eq, args } = cond else { return None };
        match (&args[0], &args[1]) {
            (RexNode::CorrelVar { id: cid, field, .. }, RexNode::InputRef { index, .. })
            | (RexNode::InputRef { index, .. }, RexNode::CorrelVar { id: cid, field, .. })
                if *cid == id =>
            {
                Some((*field, *index))
            }
            _ => None,
        }
    }
}

impl Rule for DecorrelateEquiSubquery {
    fn name(&self) -> &'static str {
        "DecorrelateEquiSubquery"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        let AlgNodeKind::Correlate { id, .. } = &expr.kind else { return false };
        is_logical(expr)
            && memo.exprs_in(expr.children[1]).any(|c| {
                matches!(&c.kind, AlgNodeKind::Filter { condition }
                    if Self::equi_parts(condition, *id).is_some())
            })
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Correlate { id, join_type } = &expr.kind else { return vec![] };
        let left_arity = arity_of(memo, expr.children[0]);
        let mut out = Vec::new();
        for filter in memo.exprs_in(expr.children[1]) {
            let AlgNodeKind::Filter { condition } = &filter.kind else { continue };
            let Some((left_field, inner_col)) = Self::equi_parts(condition, *id) else {
                continue;
            };
            let left_ty = memo.row_type(expr.children[0]).fields[left_field].ty.clone();
            let right_ty = memo.row_type(filter.children[0]).fields[inner_col].ty.clone();
            let cond = RexNode::eq(
                RexNode::input(left_field, left_ty),
                RexNode::input(left_arity + inner_col, right_ty),
            );
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Join { condition: cond, join_type: *join_type },
                    vec![
                        RewriteNode::Set(expr.children[0]),
                        RewriteNode::Set(filter.children[0]),
                    ],
                ),
            });
        }
        out
    }
}

// ---------------------------------------------------------------- join reordering

/// `l JOIN r` becomes `Project(r JOIN l)`, bounded.
pub struct JoinCommute;

impl Rule for JoinCommute {
    fn name(&self) -> &'static str {
        "JoinCommute"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn bounded(&self) -> bool {
        true
    }

    fn matches(&self, expr: &MemoExpr, _memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(expr.kind, AlgNodeKind::Join { join_type: JoinType::Inner, .. })
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Join { condition, .. } = &expr.kind else { return vec![] };
        let left_arity = arity_of(memo, expr.children[0]);
        let right_arity = arity_of(memo, expr.children[1]);
        let swapped_cond = condition.map_input_refs(&|i| {
            if i < left_arity {
                i + right_arity
            } else {
                i - left_arity
            }
        });
        let row = memo.row_type(expr.children[0]);
        let right_row = memo.row_type(expr.children[1]);
        let mut exprs = Vec::with_capacity(left_arity + right_arity);
        let mut names = Vec::with_capacity(left_arity + right_arity);
        for (i, f) in row.fields.iter().enumerate() {
            exprs.push(RexNode::input(right_arity + i, f.ty.clone()));
            names.push(f.name.clone());
        }
        for (j, f) in right_row.fields.iter().enumerate() {
            exprs.push(RexNode::input(j, f.ty.clone()));
            names.push(f.name.clone());
        }
        vec![Rewrite {
            root: RewriteNode::expr(
                AlgNodeKind::Project { exprs, names },
                vec![RewriteNode::expr(
                    AlgNodeKind::Join { condition: swapped_cond, join_type: JoinType::Inner },
                    vec![
                        RewriteNode::Set(expr.children[1]),
                        RewriteNode::Set(expr.children[0]),
                    ],
                )],
            ),
        }]
    }
}

/// `(A JOIN B) JOIN C` becomes `A JOIN (B JOIN C)` when the outer condition
/// only touches B and C. Bounded.
pub struct JoinAssociate;

impl Rule for JoinAssociate {
    fn name(&self) -> &'static str {
        "JoinAssociate"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Transformation
    }

    fn bounded(&self) -> bool {
        true
    }

    fn matches(&self, expr: &MemoExpr, memo: &Memo) -> bool {
        is_logical(expr)
            && matches!(expr.kind, AlgNodeKind::Join { join_type: JoinType::Inner, .. })
            && memo.exprs_in(expr.children[0]).any(|c| {
                is_logical(c)
                    && matches!(c.kind, AlgNodeKind::Join { join_type: JoinType::Inner, .. })
            })
    }

    fn apply(&self, expr: &MemoExpr, memo: &Memo) -> Vec<Rewrite> {
        let AlgNodeKind::Join { condition: top_cond, .. } = &expr.kind else { return vec![] };
        let mut out = Vec::new();
        for bottom in memo.exprs_in(expr.children[0]) {
            let AlgNodeKind::Join { condition: bottom_cond, join_type: JoinType::Inner } =
                &bottom.kind
            else {
                continue;
            };
            if !is_logical(bottom) {
                continue;
            }
            let a_arity = arity_of(memo, bottom.children[0]);
            // The flat field order A || B || C is unchanged by the
            // re-association, so only the moving conditions re-index.
            if top_cond.input_refs().iter().any(|r| *r < a_arity) {
                continue;
            }
            let moved = top_cond.map_input_refs(&|i| i - a_arity);
            out.push(Rewrite {
                root: RewriteNode::expr(
                    AlgNodeKind::Join {
                        condition: bottom_cond.clone(),
                        join_type: JoinType::Inner,
                    },
                    vec![
                        RewriteNode::Set(bottom.children[0]),
                        RewriteNode::expr(
                            AlgNodeKind::Join { condition: moved, join_type: JoinType::Inner },
                            vec![
                                RewriteNode::Set(bottom.children[1]),
                                RewriteNode::Set(expr.children[1]),
                            ],
                        ),
                    ],
                ),
            });
        }
        out
    }
}

// ---------------------------------------------------------------- physical

/// Implements any logical operator in the coordinator's `Enumerable`
/// convention.
pub struct EnumerableImplementation;

impl Rule for EnumerableImplementation {
    fn name(&self) -> &'static str {
        "EnumerableImplementation"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Physical
    }

    fn matches(&self, expr: &MemoExpr, _memo: &Memo) -> bool {
        is_logical(expr) && !matches!(expr.kind, AlgNodeKind::Correlate { .. })
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo) -> Vec<Rewrite> {
        vec![Rewrite {
            root: RewriteNode::Expr {
                kind: expr.kind.clone(),
                children: expr.children.iter().map(|c| RewriteNode::Set(*c)).collect(),
                convention: Convention::Enumerable,
            },
        }]
    }
}

/// Lifts a store-convention fragment to the coordinator through a
/// `Converter`; the only operator allowed to change convention.
pub struct StoreToEnumerableConverter;

impl Rule for StoreToEnumerableConverter {
    fn name(&self) -> &'static str {
        "StoreToEnumerableConverter"
    }

    fn kind(&self) -> RuleKind {
        RuleKind::Converter
    }

    fn matches(&self, expr: &MemoExpr, _memo: &Memo) -> bool {
        matches!(expr.convention, Convention::Store(_))
    }

    fn apply(&self, expr: &MemoExpr, _memo: &Memo) -> Vec<Rewrite> {
        vec![Rewrite {
            root: RewriteNode::Expr {
                kind: AlgNodeKind::Converter,
                children: vec![RewriteNode::Set(expr.set)],
                convention: Convention::Enumerable,
            },
        }]
    }
}
