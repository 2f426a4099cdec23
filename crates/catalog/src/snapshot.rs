use crate::entities::*;
use crate::CatalogError;
use indexmap::IndexMap;
use polystore_primitives::{
    AdapterId, AllocationId, ColumnId, KeyId, NamespaceId, PartitionId, PlacementId, TableId,
};
use std::collections::BTreeMap;

/// An immutable point-in-time view of the catalog.
///
/// A request holds one `Arc<Snapshot>` for its whole lifetime, so every
/// logical id it resolved stays resolvable even while DDL commits new
/// generations behind it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Bumped on every catalog mutation; cached plans carry the generation
    /// they were built against.
    pub generation: u64,
    pub namespaces: IndexMap<NamespaceId, LogicalNamespace>,
    pub tables: IndexMap<TableId, LogicalTable>,
    pub keys: IndexMap<KeyId, CatalogKey>,
    pub placements: IndexMap<PlacementId, Placement>,
    pub allocation_columns: Vec<AllocationColumn>,
    pub partitions: IndexMap<PartitionId, Partition>,
    pub allocations: IndexMap<AllocationId, AllocationTable>,
    /// Reconstructed at startup, never persisted.
    pub physical_tables: IndexMap<AllocationId, PhysicalTable>,
    /// Bytes of newer-format fields we read but do not understand, keyed by
    /// (section, entity id) and rewritten verbatim on save.
    pub(crate) unknown_tails: BTreeMap<(u8, u64), Box<[u8]>>,
}

impl Snapshot {
    pub fn namespace(&self, id: NamespaceId) -> Result<&LogicalNamespace, CatalogError> {
        self.namespaces.get(&id).ok_or(CatalogError::UnknownId(id.0, "namespace"))
    }

    pub fn namespace_by_name(&self, name: &str) -> Option<&LogicalNamespace> {
        self.namespaces
            .values()
            .find(|ns| ns.name == name)
            .or_else(|| self.namespaces.values().find(|ns| ns.names_equal(&ns.name, name)))
    }

    pub fn table(&self, id: TableId) -> Result<&LogicalTable, CatalogError> {
        self.tables.get(&id).ok_or(CatalogError::UnknownId(id.0, "table"))
    }

    pub fn table_by_name(&self, namespace: NamespaceId, name: &str) -> Option<&LogicalTable> {
        let ns = self.namespaces.get(&namespace)?;
        self.tables
            .values()
            .find(|t| t.namespace_id == namespace && ns.names_equal(&t.name, name))
    }

    /// Resolves `[namespace.]table` against an explicit qualifier first, then
    /// the caller's namespace, then the default namespace.
    pub fn resolve_table(
        &self,
        qualifier: Option<&str>,
        name: &str,
        current: NamespaceId,
        default: NamespaceId,
    ) -> Result<&LogicalTable, CatalogError> {
        if let Some(ns_name) = qualifier {
            let ns = self.namespace_by_name(ns_name).ok_or_else(|| CatalogError::NotFound {
                kind: "namespace",
                name: ns_name.to_string(),
            })?;
            return self.table_by_name(ns.id, name).ok_or_else(|| CatalogError::NotFound {
                kind: "table",
                name: format!("{ns_name}.{name}"),
            });
        }
        self.table_by_name(current, name)
            .or_else(|| self.table_by_name(default, name))
            .ok_or_else(|| CatalogError::NotFound {
                kind: "table",
                name: name.to_string(),
            })
    }

    pub fn column(&self, table: TableId, column: ColumnId) -> Result<&LogicalColumn, CatalogError> {
        self.table(table)?
            .column(column)
            .ok_or(CatalogError::UnknownId(column.0, "column"))
    }

    pub fn key(&self, id: KeyId) -> Result<&CatalogKey, CatalogError> {
        self.keys.get(&id).ok_or(CatalogError::UnknownId(id.0, "key"))
    }

    pub fn keys_of(&self, table: TableId) -> impl Iterator<Item = &CatalogKey> {
        self.keys.values().filter(move |k| k.table_id == table)
    }

    /// Primary-key columns of `table`, empty when none is declared.
    pub fn primary_key_columns(&self, table: TableId) -> Vec<ColumnId> {
        let Ok(t) = self.table(table) else { return Vec::new() };
        t.primary_key
            .and_then(|k| self.keys.get(&k))
            .map(|k| k.column_ids.clone())
            .unwrap_or_default()
    }

    pub fn placement(&self, id: PlacementId) -> Result<&Placement, CatalogError> {
        self.placements.get(&id).ok_or(CatalogError::UnknownId(id.0, "placement"))
    }

    pub fn placements_of(&self, table: TableId) -> Vec<&Placement> {
        self.placements.values().filter(|p| p.table_id == table).collect()
    }

    pub fn placement_on(&self, table: TableId, adapter: AdapterId) -> Option<&Placement> {
        self.placements
            .values()
            .find(|p| p.table_id == table && p.adapter_id == adapter)
    }

    pub fn placement_columns(&self, placement: PlacementId) -> Vec<&AllocationColumn> {
        let mut cols: Vec<_> = self
            .allocation_columns
            .iter()
            .filter(|c| c.placement_id == placement)
            .collect();
        cols.sort_by_key(|c| c.position);
        cols
    }

    pub fn partition(&self, id: PartitionId) -> Result<&Partition, CatalogError> {
        self.partitions.get(&id).ok_or(CatalogError::UnknownId(id.0, "partition"))
    }

    pub fn partitions_of(&self, table: TableId) -> Vec<&Partition> {
        self.partitions.values().filter(|p| p.table_id == table).collect()
    }

    pub fn allocation(&self, id: AllocationId) -> Result<&AllocationTable, CatalogError> {
        self.allocations.get(&id).ok_or(CatalogError::UnknownId(id.0, "allocation"))
    }

    pub fn allocations_of_placement(&self, placement: PlacementId) -> Vec<&AllocationTable> {
        self.allocations
            .values()
            .filter(|a| a.placement_id == placement)
            .collect()
    }

    pub fn allocations_of_table(&self, table: TableId) -> Vec<&AllocationTable> {
        self.allocations.values().filter(|a| a.logical_id == table).collect()
    }

    pub fn physical(&self, allocation: AllocationId) -> Result<&PhysicalTable, CatalogError> {
        self.physical_tables
            .get(&allocation)
            .ok_or(CatalogError::UnknownId(allocation.0, "physical table"))
    }

    /// Store-local column name for a logical column on one allocation.
    pub fn physical_column_name(
        &self,
        allocation: AllocationId,
        column: ColumnId,
    ) -> Result<&str, CatalogError> {
        let phys = self.physical(allocation)?;
        phys.columns
            .iter()
            .find(|c| c.logical_id == column)
            .map(|c| c.physical_name.as_str())
            .ok_or(CatalogError::UnknownId(column.0, "physical column"))
    }

    /// The relational accessor for one namespace; fails on a namespace of a
    /// different model.
    pub fn logical_rel(&self, ns: NamespaceId) -> Result<ModelView<'_>, CatalogError> {
        self.model_view(ns, DataModel::Relational)
    }

    pub fn logical_doc(&self, ns: NamespaceId) -> Result<ModelView<'_>, CatalogError> {
        self.model_view(ns, DataModel::Document)
    }

    pub fn logical_graph(&self, ns: NamespaceId) -> Result<ModelView<'_>, CatalogError> {
        self.model_view(ns, DataModel::Graph)
    }

    fn model_view(&self, ns: NamespaceId, model: DataModel) -> Result<ModelView<'_>, CatalogError> {
        let namespace = self.namespace(ns)?;
        if namespace.model != model {
            return Err(CatalogError::invariant(format!(
                "namespace `{}` holds {:?} entities, not {model:?}",
                namespace.name, namespace.model
            )));
        }
        Ok(ModelView { snapshot: self, ns })
    }
}

/// A per-model window into one namespace.
pub struct ModelView<'a> {
    snapshot: &'a Snapshot,
    ns: NamespaceId,
}

impl<'a> ModelView<'a> {
    pub fn tables(&self) -> impl Iterator<Item = &'a LogicalTable> + '_ {
        self.snapshot.tables.values().filter(move |t| t.namespace_id == self.ns)
    }

    pub fn table(&self, name: &str) -> Option<&'a LogicalTable> {
        self.snapshot.table_by_name(self.ns, name)
    }
}
