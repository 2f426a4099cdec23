use polystore_primitives::{
    AdapterId, AllocationId, ColumnId, KeyId, NamespaceId, PartitionId, PhysicalId, PlacementId, TableId,
};
use polystore_types::{Field, PolyValue, Type};

/// The data model a namespace speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataModel {
    Relational,
    Document,
    Graph,
}

impl DataModel {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            DataModel::Relational => 0,
            DataModel::Document => 1,
            DataModel::Graph => 2,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => DataModel::Relational,
            1 => DataModel::Document,
            2 => DataModel::Graph,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalNamespace {
    pub id: NamespaceId,
    pub name: String,
    pub model: DataModel,
    /// Whether entity names in this namespace compare case-sensitively.
    pub case_sensitive: bool,
}

impl LogicalNamespace {
    pub fn names_equal(&self, a: &str, b: &str) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a.eq_ignore_ascii_case(b)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalColumn {
    pub id: ColumnId,
    pub name: String,
    /// 1-based position within the table.
    pub position: u32,
    pub ty: Type,
    pub nullable: bool,
    pub default: Option<PolyValue>,
}

impl LogicalColumn {
    pub fn field(&self) -> Field {
        Field::new(self.name.as_str(), self.declared_type())
    }

    /// The column type with the declared nullability applied.
    pub fn declared_type(&self) -> Type {
        self.ty.clone().with_nullable(self.nullable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTable {
    pub id: TableId,
    pub namespace_id: NamespaceId,
    pub name: String,
    /// Ordered by `position`.
    pub columns: Vec<LogicalColumn>,
    pub primary_key: Option<KeyId>,
}

impl LogicalTable {
    pub fn column_by_name(&self, ns: &LogicalNamespace, name: &str) -> Option<&LogicalColumn> {
        self.columns.iter().find(|c| ns.names_equal(&c.name, name))
    }

    pub fn column(&self, id: ColumnId) -> Option<&LogicalColumn> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// 0-based index of `id` in position order.
    pub fn column_index(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn row_type(&self) -> Type {
        Type::row(self.columns.iter().map(|c| c.field()).collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Primary,
    Unique,
    Foreign,
    Index,
    Constraint,
}

impl KeyKind {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            KeyKind::Primary => 0,
            KeyKind::Unique => 1,
            KeyKind::Foreign => 2,
            KeyKind::Index => 3,
            KeyKind::Constraint => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => KeyKind::Primary,
            1 => KeyKind::Unique,
            2 => KeyKind::Foreign,
            3 => KeyKind::Index,
            4 => KeyKind::Constraint,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogKey {
    pub id: KeyId,
    pub table_id: TableId,
    pub column_ids: Vec<ColumnId>,
    pub kind: KeyKind,
}

/// Whether an allocation column was placed by the user or replicated by the
/// catalog (primary-key columns follow every placement automatically).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlacementType {
    Manual,
    Automatic,
}

/// One adapter's responsibility for a subset of a table's columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub id: PlacementId,
    pub table_id: TableId,
    pub adapter_id: AdapterId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationColumn {
    pub placement_id: PlacementId,
    pub column_id: ColumnId,
    pub position: u32,
    pub placement_type: PlacementType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKind {
    None,
    Hash,
    Range,
    List,
}

impl PartitionKind {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            PartitionKind::None => 0,
            PartitionKind::Hash => 1,
            PartitionKind::Range => 2,
            PartitionKind::List => 3,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => PartitionKind::None,
            1 => PartitionKind::Hash,
            2 => PartitionKind::Range,
            3 => PartitionKind::List,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: PartitionId,
    pub table_id: TableId,
    pub kind: PartitionKind,
    /// `PARTITIONS n` count, range bounds or list values, rendered as text.
    pub qualifier: String,
}

/// The concrete unit the router consumes: one placement crossed with one
/// partition, hosted by one adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationTable {
    pub id: AllocationId,
    pub placement_id: PlacementId,
    pub partition_id: PartitionId,
    pub adapter_id: AdapterId,
    pub logical_id: TableId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalColumn {
    pub id: PhysicalId,
    pub allocation_id: AllocationId,
    pub logical_id: ColumnId,
    pub physical_name: String,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysicalTable {
    pub id: PhysicalId,
    pub allocation_id: AllocationId,
    pub namespace_name: String,
    pub name: String,
    pub columns: Vec<PhysicalColumn>,
}
