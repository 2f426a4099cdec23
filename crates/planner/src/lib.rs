//! The cost-based optimizer.
//!
//! A Volcano-style search: the logical plan is registered into a [`Memo`] of
//! equivalence sets, rules fire from a priority queue (each `(rule,
//! expression)` pair at most once), physical alternatives are costed
//! bottom-up, and the cheapest expression tree under the required traits is
//! extracted. [`GenerationalCache`] backs the plan and implementation
//! caches.

mod cache;
mod cost;
mod error;
mod memo;
mod planner;
mod rules;

#[cfg(test)]
mod tests;

pub use cache::{CacheKey, GenerationalCache};
pub use cost::{Cost, COST_EPSILON, PAGE_SIZE};
pub use error::PlanError;
pub use memo::{Memo, MemoExpr, MemoExprId, RelSet, RelSubset, SetId};
pub use planner::{Planner, PlannerConfig};
pub use rules::{default_rules, Rewrite, RewriteNode, Rule, RuleKind};
