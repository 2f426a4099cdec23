//! Entity ids and small shared data types.
//!
//! Every catalog entity carries a stable 64-bit id allocated from a single
//! monotonically increasing counter. The newtypes here exist so that a
//! `TableId` cannot be passed where a `ColumnId` is expected; they deref to
//! nothing and convert explicitly.

use core::fmt;
use smallvec::SmallVec;

macro_rules! entity_id {
    ($(#[doc = $doc:expr] $name:ident),+ $(,)?) => {
        $(
            #[doc = $doc]
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
                derive_more::From, derive_more::Into, derive_more::Display,
            )]
            pub struct $name(pub u64);

            impl $name {
                pub const fn idx(self) -> usize {
                    self.0 as usize
                }
            }
        )+
    };
}

entity_id!(
    #[doc = "Id of a logical namespace (schema)."]
    NamespaceId,
    #[doc = "Id of a logical table."]
    TableId,
    #[doc = "Id of a logical column."]
    ColumnId,
    #[doc = "Id of a key (primary, unique, foreign, index, constraint)."]
    KeyId,
    #[doc = "Id of a deployed store adapter."]
    AdapterId,
    #[doc = "Id of a placement (one adapter's share of one table)."]
    PlacementId,
    #[doc = "Id of a partition of a table."]
    PartitionId,
    #[doc = "Id of an allocation table (placement x partition)."]
    AllocationId,
    #[doc = "Id of a physical (store-local) entity."]
    PhysicalId,
    #[doc = "Id of a transaction."]
    TxId,
);

/// A 0-based column position inside a row type.
///
/// Distinct from [`ColumnId`]: a `ColId` indexes a concrete row layout while a
/// `ColumnId` names a catalog entity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
    derive_more::From, derive_more::Into, derive_more::Display,
)]
pub struct ColId(pub u32);

impl ColId {
    pub const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// An ordered set of column positions, inline up to 4 entries.
///
/// Keeps insertion order and rejects duplicates on push, so it doubles as a
/// projection list and as a key-column list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ColList(SmallVec<[ColId; 4]>);

impl ColList {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_iter(iter: impl IntoIterator<Item = ColId>) -> Self {
        let mut list = Self::new();
        for col in iter {
            list.push(col);
        }
        list
    }

    /// Appends `col` unless it is already present.
    pub fn push(&mut self, col: ColId) {
        if !self.contains(col) {
            self.0.push(col);
        }
    }

    pub fn contains(&self, col: ColId) -> bool {
        self.0.contains(&col)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = ColId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[ColId] {
        &self.0
    }

    /// True when every element of `other` is present in `self`.
    pub fn covers(&self, other: &ColList) -> bool {
        other.iter().all(|c| self.contains(c))
    }
}

impl FromIterator<ColId> for ColList {
    fn from_iter<T: IntoIterator<Item = ColId>>(iter: T) -> Self {
        Self::from_iter(iter)
    }
}

impl From<ColId> for ColList {
    fn from(col: ColId) -> Self {
        Self::from_iter([col])
    }
}

impl fmt::Display for ColList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, col) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{col}")?;
        }
        write!(f, "]")
    }
}

/// Identifies a lockable entity for the transaction manager.
///
/// Ordered, so lock acquisition can be sorted: the schema lock sorts before
/// every table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    /// The global schema lock, taken exclusively while DDL runs.
    Schema,
    Table(TableId),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Schema => write!(f, "schema"),
            EntityId::Table(id) => write!(f, "table {id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn col_list_keeps_order_and_dedups() {
        let mut cols = ColList::new();
        cols.push(ColId(2));
        cols.push(ColId(0));
        cols.push(ColId(2));
        assert_eq!(cols.as_slice(), &[ColId(2), ColId(0)]);
        assert!(cols.covers(&ColList::from(ColId(0))));
        assert!(!cols.covers(&ColList::from(ColId(1))));
    }

    #[test]
    fn entity_ids_order_schema_first() {
        assert!(EntityId::Schema < EntityId::Table(TableId(0)));
        assert!(EntityId::Table(TableId(1)) < EntityId::Table(TableId(2)));
    }
}
