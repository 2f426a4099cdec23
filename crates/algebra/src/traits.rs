use polystore_primitives::{AdapterId, ColId, ColList};
use core::fmt;

/// The runtime that will execute a plan fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Convention {
    /// Not executable; the frontend produces only logical nodes.
    Logical,
    /// Interpreted row-at-a-time on the coordinator.
    Bindable,
    /// Compiled iterator pipeline on the coordinator.
    Enumerable,
    /// Pushed down into one adapter.
    Store(AdapterId),
}

impl Convention {
    /// A fragment in `self` may substitute for a fragment required in
    /// `required` only when the conventions match; crossing conventions takes
    /// a `Converter` node.
    pub fn satisfies(self, required: Convention) -> bool {
        self == required
    }
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Convention::Logical => write!(f, "LOGICAL"),
            Convention::Bindable => write!(f, "BINDABLE"),
            Convention::Enumerable => write!(f, "ENUMERABLE"),
            Convention::Store(id) => write!(f, "STORE({id})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NullPlacement {
    First,
    Last,
}

/// Ordering on a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldCollation {
    pub field: ColId,
    pub direction: Direction,
    pub nulls: NullPlacement,
}

impl FieldCollation {
    pub fn asc(field: ColId) -> Self {
        Self {
            field,
            direction: Direction::Ascending,
            nulls: NullPlacement::Last,
        }
    }

    pub fn desc(field: ColId) -> Self {
        Self {
            field,
            direction: Direction::Descending,
            nulls: NullPlacement::First,
        }
    }
}

/// An ordering over a row stream; the empty collation is the lattice top
/// (no order required, any order satisfies it).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RelCollation(pub Vec<FieldCollation>);

impl RelCollation {
    pub fn none() -> Self {
        Self(Vec::new())
    }

    pub fn of(fields: impl IntoIterator<Item = FieldCollation>) -> Self {
        Self(fields.into_iter().collect())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// A stream sorted by `(a, b)` is also sorted by `(a)`: prefix rule.
    pub fn satisfies(&self, required: &RelCollation) -> bool {
        self.0.len() >= required.0.len() && self.0[..required.0.len()] == required.0[..]
    }
}

/// How rows are spread across participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Distribution {
    /// Lattice top: any distribution satisfies it.
    Any,
    /// All rows at the coordinator.
    Singleton,
    Hash(ColList),
    Broadcast,
    Random,
}

impl Distribution {
    pub fn satisfies(&self, required: &Distribution) -> bool {
        matches!(required, Distribution::Any) || self == required
    }
}

/// The ordered trait tuple carried by every algebra node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitSet {
    pub convention: Convention,
    pub collation: RelCollation,
    pub distribution: Distribution,
}

impl TraitSet {
    pub fn logical() -> Self {
        Self {
            convention: Convention::Logical,
            collation: RelCollation::none(),
            distribution: Distribution::Any,
        }
    }

    pub fn enumerable() -> Self {
        Self {
            convention: Convention::Enumerable,
            ..Self::logical()
        }
    }

    pub fn store(adapter: AdapterId) -> Self {
        Self {
            convention: Convention::Store(adapter),
            ..Self::logical()
        }
    }

    pub fn with_collation(mut self, collation: RelCollation) -> Self {
        self.collation = collation;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = distribution;
        self
    }

    pub fn with_convention(mut self, convention: Convention) -> Self {
        self.convention = convention;
        self
    }

    /// Whether a fragment with traits `self` can stand where `required` is
    /// demanded, per-lattice.
    pub fn satisfies(&self, required: &TraitSet) -> bool {
        self.convention.satisfies(required.convention)
            && self.collation.satisfies(&required.collation)
            && self.distribution.satisfies(&required.distribution)
    }
}

impl fmt::Display for TraitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.convention)?;
        if !self.collation.is_none() {
            write!(f, ".sorted({})", self.collation.0.len())?;
        }
        if self.distribution != Distribution::Any {
            write!(f, ".{:?}", self.distribution)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collation_prefix_satisfies() {
        let ab = RelCollation::of([FieldCollation::asc(ColId(0)), FieldCollation::asc(ColId(1))]);
        let a = RelCollation::of([FieldCollation::asc(ColId(0))]);
        assert!(ab.satisfies(&a));
        assert!(!a.satisfies(&ab));
        assert!(a.satisfies(&RelCollation::none()));
    }

    #[test]
    fn distribution_any_is_top() {
        assert!(Distribution::Singleton.satisfies(&Distribution::Any));
        assert!(!Distribution::Any.satisfies(&Distribution::Singleton));
    }

    #[test]
    fn conventions_do_not_cross_without_converter() {
        assert!(!Convention::Enumerable.satisfies(Convention::Store(AdapterId(1))));
        assert!(Convention::Store(AdapterId(1)).satisfies(Convention::Store(AdapterId(1))));
    }
}
