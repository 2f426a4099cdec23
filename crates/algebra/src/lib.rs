//! The language-neutral relational algebra.
//!
//! Algebra nodes live in an [`AlgArena`] and refer to each other through
//! 32-bit [`NodeId`]s, so plan graphs stay acyclic-by-construction and cheap
//! to copy. Scalar expressions ([`RexNode`]) form their own tree and carry
//! their derived [`polystore_types::Type`]. Each node also carries a
//! [`TraitSet`]: the convention, collation and distribution the fragment is
//! known (or required) to have.
//!
//! Construction goes through [`AlgebraBuilder`], a stack machine whose
//! operations validate input arity, expression bounds and row-type coercion
//! as they go.

mod arena;
mod builder;
mod error;
mod metadata;
mod node;
mod rex;
mod traits;

pub use arena::{AlgArena, NodeId};
pub use builder::{project_collation, AlgebraBuilder};
pub use error::AlgebraError;
pub use metadata::{estimate_rows, Metadata, StatsSource, DEFAULT_ROW_COUNT};
pub use node::{
    derive_row_type, AggCall, AggKind, AlgNode, AlgNodeKind, JoinType, ModifyOp, SetOpKind,
    WindowGroup,
};
pub use rex::{CorrelationId, RexNode, ScalarOp, WindowSpec};
pub use traits::{
    Convention, Direction, Distribution, FieldCollation, NullPlacement, RelCollation, TraitSet,
};
