use crate::entities::*;
use crate::physical_name::PhysicalName;
use crate::{CatalogError, Snapshot};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use polystore_primitives::{
    AdapterId, AllocationId, ColumnId, KeyId, NamespaceId, PartitionId, PhysicalId, PlacementId, TableId,
};
use polystore_types::{PolyValue, Type};
use std::sync::Arc;

/// A column definition as DDL hands it over.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub ty: Type,
    pub nullable: bool,
    pub default: Option<PolyValue>,
}

/// What changed, published after the snapshot swap. Observers poll the
/// channel; nothing waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogChange {
    NamespaceCreated(NamespaceId),
    NamespaceRenamed(NamespaceId),
    NamespaceDropped(NamespaceId),
    TableCreated(TableId),
    TableAltered(TableId),
    TableDropped(TableId),
    PlacementAdded(PlacementId),
    PlacementDropped(TableId),
    PartitionLayoutChanged(TableId),
    /// A configuration change that takes effect after restart; flagged, not
    /// rejected.
    RestartRequired,
}

struct CatalogInner {
    next_id: u64,
    master: Snapshot,
}

impl CatalogInner {
    fn fresh_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// The catalog service.
///
/// Mutations are serialized through one writer lock and applied to a draft of
/// the master snapshot; on success the published `Arc<Snapshot>` is swapped
/// atomically and a [`CatalogChange`] goes out. Readers clone the `Arc` and
/// never block writers.
pub struct Catalog {
    inner: Mutex<CatalogInner>,
    current: RwLock<Arc<Snapshot>>,
    subscribers: Mutex<Vec<Sender<CatalogChange>>>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        let master = Snapshot::default();
        Self {
            inner: Mutex::new(CatalogInner { next_id: 1, master: master.clone() }),
            current: RwLock::new(Arc::new(master)),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// The current immutable snapshot. Hold it for the whole request.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn subscribe(&self) -> Receiver<CatalogChange> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    fn publish(&self, change: CatalogChange) {
        self.subscribers.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }

    /// Runs `f` against a draft snapshot under the writer lock; swaps the
    /// published snapshot and emits the change on success, drops the draft on
    /// error.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut CatalogInner) -> Result<(T, CatalogChange), CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut inner = self.inner.lock();
        let backup = inner.master.clone();
        let backup_id = inner.next_id;
        match f(&mut *inner) {
            Ok((out, change)) => {
                inner.master.generation += 1;
                let published = Arc::new(inner.master.clone());
                *self.current.write() = published;
                log::debug!("catalog generation {} after {:?}", inner.master.generation, change);
                drop(inner);
                self.publish(change);
                Ok(out)
            }
            Err(e) => {
                inner.master = backup;
                inner.next_id = backup_id;
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------- namespaces

    pub fn create_namespace(
        &self,
        name: &str,
        model: DataModel,
        case_sensitive: bool,
    ) -> Result<NamespaceId, CatalogError> {
        self.mutate(|inner| {
            if inner.master.namespace_by_name(name).is_some() {
                return Err(CatalogError::AlreadyExists { kind: "namespace", name: name.to_string() });
            }
            let id = NamespaceId(inner.fresh_id());
            inner.master.namespaces.insert(
                id,
                LogicalNamespace { id, name: name.to_string(), model, case_sensitive },
            );
            Ok((id, CatalogChange::NamespaceCreated(id)))
        })
    }

    pub fn rename_namespace(&self, id: NamespaceId, name: &str) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            if inner.master.namespace_by_name(name).map(|ns| ns.id) .is_some_and(|other| other != id) {
                return Err(CatalogError::AlreadyExists { kind: "namespace", name: name.to_string() });
            }
            let ns = inner
                .master
                .namespaces
                .get_mut(&id)
                .ok_or(CatalogError::UnknownId(id.0, "namespace"))?;
            ns.name = name.to_string();
            Ok(((), CatalogChange::NamespaceRenamed(id)))
        })
    }

    pub fn drop_namespace(&self, id: NamespaceId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            inner.master.namespace(id)?;
            if inner.master.tables.values().any(|t| t.namespace_id == id) {
                return Err(CatalogError::invariant("cannot drop a namespace that still holds tables"));
            }
            inner.master.namespaces.shift_remove(&id);
            Ok(((), CatalogChange::NamespaceDropped(id)))
        })
    }

    // ---------------------------------------------------------------- tables

    pub fn create_table(
        &self,
        namespace: NamespaceId,
        name: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TableId, CatalogError> {
        self.mutate(|inner| {
            inner.master.namespace(namespace)?;
            if inner.master.table_by_name(namespace, name).is_some() {
                return Err(CatalogError::AlreadyExists { kind: "table", name: name.to_string() });
            }
            if columns.is_empty() {
                return Err(CatalogError::invariant("a table needs at least one column"));
            }
            let id = TableId(inner.fresh_id());
            let columns = columns
                .into_iter()
                .enumerate()
                .map(|(i, def)| LogicalColumn {
                    id: ColumnId(inner.fresh_id()),
                    name: def.name,
                    position: i as u32 + 1,
                    ty: def.ty,
                    nullable: def.nullable,
                    default: def.default,
                })
                .collect();
            inner.master.tables.insert(
                id,
                LogicalTable { id, namespace_id: namespace, name: name.to_string(), columns, primary_key: None },
            );
            // Unpartitioned tables still carry their NONE partition: the
            // allocation layer always crosses placement x partition.
            let part_id = PartitionId(inner.fresh_id());
            inner
                .master
                .partitions
                .insert(part_id, Partition { id: part_id, table_id: id, kind: PartitionKind::None, qualifier: String::new() });
            Ok((id, CatalogChange::TableCreated(id)))
        })
    }

    pub fn drop_table(&self, id: TableId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            inner.master.table(id)?;
            let snap = &mut inner.master;
            snap.tables.shift_remove(&id);
            snap.keys.retain(|_, k| k.table_id != id);
            let placements: Vec<PlacementId> = snap
                .placements
                .values()
                .filter(|p| p.table_id == id)
                .map(|p| p.id)
                .collect();
            snap.placements.retain(|_, p| p.table_id != id);
            snap.allocation_columns.retain(|c| !placements.contains(&c.placement_id));
            snap.partitions.retain(|_, p| p.table_id != id);
            let allocs: Vec<AllocationId> = snap
                .allocations
                .values()
                .filter(|a| a.logical_id == id)
                .map(|a| a.id)
                .collect();
            snap.allocations.retain(|_, a| a.logical_id != id);
            for alloc in allocs {
                snap.physical_tables.shift_remove(&alloc);
            }
            Ok(((), CatalogChange::TableDropped(id)))
        })
    }

    pub fn rename_table(&self, id: TableId, name: &str) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let ns = inner.master.table(id)?.namespace_id;
            if inner
                .master
                .table_by_name(ns, name)
                .is_some_and(|t| t.id != id)
            {
                return Err(CatalogError::AlreadyExists { kind: "table", name: name.to_string() });
            }
            inner.master.tables.get_mut(&id).expect("checked above").name = name.to_string();
            Ok(((), CatalogChange::TableAltered(id)))
        })
    }

    // ---------------------------------------------------------------- columns

    pub fn add_column(
        &self,
        table: TableId,
        def: ColumnDef,
    ) -> Result<ColumnId, CatalogError> {
        self.mutate(|inner| {
            let ns_id = inner.master.table(table)?.namespace_id;
            let ns = inner.master.namespace(ns_id)?.clone();
            let t = inner.master.tables.get(&table).expect("checked above");
            if t.column_by_name(&ns, &def.name).is_some() {
                return Err(CatalogError::AlreadyExists { kind: "column", name: def.name });
            }
            let id = ColumnId(inner.fresh_id());
            let position = inner.master.tables[&table].columns.len() as u32 + 1;
            inner.master.tables.get_mut(&table).expect("checked above").columns.push(LogicalColumn {
                id,
                name: def.name,
                position,
                ty: def.ty,
                nullable: def.nullable,
                default: def.default,
            });
            // Keep the coverage invariant: the new column lands on every
            // existing placement of the table.
            let placements: Vec<PlacementId> = inner
                .master
                .placements
                .values()
                .filter(|p| p.table_id == table)
                .map(|p| p.id)
                .collect();
            for placement in placements {
                let position = inner.master.placement_columns(placement).len() as u32 + 1;
                inner.master.allocation_columns.push(AllocationColumn {
                    placement_id: placement,
                    column_id: id,
                    position,
                    placement_type: PlacementType::Automatic,
                });
            }
            rebuild_physical_for_table(&mut inner.master, table);
            Ok((id, CatalogChange::TableAltered(table)))
        })
    }

    pub fn rename_column(&self, table: TableId, column: ColumnId, name: &str) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let ns_id = inner.master.table(table)?.namespace_id;
            let ns = inner.master.namespace(ns_id)?.clone();
            let t = inner.master.tables.get(&table).expect("checked above");
            if t.columns.iter().any(|c| c.id != column && ns.names_equal(&c.name, name)) {
                return Err(CatalogError::AlreadyExists { kind: "column", name: name.to_string() });
            }
            let t = inner.master.tables.get_mut(&table).expect("checked above");
            let col = t
                .columns
                .iter_mut()
                .find(|c| c.id == column)
                .ok_or(CatalogError::UnknownId(column.0, "column"))?;
            col.name = name.to_string();
            Ok(((), CatalogChange::TableAltered(table)))
        })
    }

    pub fn drop_column(&self, table: TableId, column: ColumnId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let t = inner.master.table(table)?;
            if t.columns.len() == 1 {
                return Err(CatalogError::invariant("cannot drop the last column of a table"));
            }
            if inner.master.primary_key_columns(table).contains(&column) {
                return Err(CatalogError::invariant("cannot drop a primary-key column"));
            }
            let t = inner.master.tables.get_mut(&table).expect("checked above");
            let idx = t
                .column_index(column)
                .ok_or(CatalogError::UnknownId(column.0, "column"))?;
            t.columns.remove(idx);
            for (i, col) in t.columns.iter_mut().enumerate() {
                col.position = i as u32 + 1;
            }
            inner.master.allocation_columns.retain(|c| c.column_id != column);
            inner.master.keys.retain(|_, k| !k.column_ids.contains(&column));
            rebuild_physical_for_table(&mut inner.master, table);
            Ok(((), CatalogChange::TableAltered(table)))
        })
    }

    pub fn set_column_position(
        &self,
        table: TableId,
        column: ColumnId,
        position: u32,
    ) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let t = inner.master.tables.get_mut(&table).ok_or(CatalogError::UnknownId(table.0, "table"))?;
            let idx = t
                .column_index(column)
                .ok_or(CatalogError::UnknownId(column.0, "column"))?;
            if position < 1 || position as usize > t.columns.len() {
                return Err(CatalogError::invariant(format!(
                    "position {position} out of range 1..={}",
                    t.columns.len()
                )));
            }
            let col = t.columns.remove(idx);
            t.columns.insert(position as usize - 1, col);
            for (i, col) in t.columns.iter_mut().enumerate() {
                col.position = i as u32 + 1;
            }
            Ok(((), CatalogChange::TableAltered(table)))
        })
    }

    /// Redefines a column's type in place. The column id is stable; the
    /// physical name revision is bumped on every allocation that hosts it.
    pub fn alter_column_type(
        &self,
        table: TableId,
        column: ColumnId,
        ty: Type,
        nullable: bool,
    ) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let t = inner.master.tables.get_mut(&table).ok_or(CatalogError::UnknownId(table.0, "table"))?;
            let col = t
                .columns
                .iter_mut()
                .find(|c| c.id == column)
                .ok_or(CatalogError::UnknownId(column.0, "column"))?;
            col.ty = ty;
            col.nullable = nullable;
            for phys in inner.master.physical_tables.values_mut() {
                for pc in phys.columns.iter_mut().filter(|pc| pc.logical_id == column) {
                    let name = PhysicalName::parse(&pc.physical_name)
                        .expect("generated names always parse")
                        .bump_revision();
                    pc.physical_name = name.to_string();
                }
            }
            Ok(((), CatalogChange::TableAltered(table)))
        })
    }

    // ---------------------------------------------------------------- keys

    pub fn add_key(
        &self,
        table: TableId,
        columns: Vec<ColumnId>,
        kind: KeyKind,
    ) -> Result<KeyId, CatalogError> {
        self.mutate(|inner| Self::add_key_inner(inner, table, columns, kind))
    }

    fn add_key_inner(
        inner: &mut CatalogInner,
        table: TableId,
        columns: Vec<ColumnId>,
        kind: KeyKind,
    ) -> Result<(KeyId, CatalogChange), CatalogError> {
        let t = inner.master.table(table)?;
        for col in &columns {
            if t.column(*col).is_none() {
                return Err(CatalogError::UnknownId(col.0, "column"));
            }
        }
        if columns.is_empty() {
            return Err(CatalogError::invariant("a key needs at least one column"));
        }
        let id = KeyId(inner.fresh_id());
        inner
            .master
            .keys
            .insert(id, CatalogKey { id, table_id: table, column_ids: columns, kind });
        Ok((id, CatalogChange::TableAltered(table)))
    }

    pub fn add_primary_key(&self, table: TableId, columns: Vec<ColumnId>) -> Result<KeyId, CatalogError> {
        self.mutate(|inner| {
            if inner.master.table(table)?.primary_key.is_some() {
                return Err(CatalogError::invariant("table already has a primary key"));
            }
            let (id, change) = Self::add_key_inner(inner, table, columns.clone(), KeyKind::Primary)?;
            inner.master.tables.get_mut(&table).expect("checked above").primary_key = Some(id);
            // The primary key follows every placement of the table.
            let placements: Vec<PlacementId> = inner
                .master
                .placements
                .values()
                .filter(|p| p.table_id == table)
                .map(|p| p.id)
                .collect();
            for placement in placements {
                replicate_pk_columns(&mut inner.master, placement, &columns);
            }
            rebuild_physical_for_table(&mut inner.master, table);
            Ok((id, change))
        })
    }

    pub fn drop_key(&self, id: KeyId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let key = inner.master.key(id)?.clone();
            if key.kind == KeyKind::Primary {
                if let Some(t) = inner.master.tables.get_mut(&key.table_id) {
                    t.primary_key = None;
                }
            }
            inner.master.keys.shift_remove(&id);
            Ok(((), CatalogChange::TableAltered(key.table_id)))
        })
    }

    // ---------------------------------------------------------------- placements

    /// Places `columns` of `table` on `adapter`, replicating primary-key
    /// columns automatically, and allocates one unit per partition.
    pub fn add_placement(
        &self,
        table: TableId,
        adapter: AdapterId,
        columns: Vec<ColumnId>,
    ) -> Result<PlacementId, CatalogError> {
        self.mutate(|inner| {
            let t = inner.master.table(table)?;
            for col in &columns {
                if t.column(*col).is_none() {
                    return Err(CatalogError::UnknownId(col.0, "column"));
                }
            }
            if inner.master.placement_on(table, adapter).is_some() {
                return Err(CatalogError::AlreadyExists {
                    kind: "placement",
                    name: format!("table {table} on adapter {adapter}"),
                });
            }
            let id = PlacementId(inner.fresh_id());
            inner
                .master
                .placements
                .insert(id, Placement { id, table_id: table, adapter_id: adapter });
            for (i, column) in columns.iter().enumerate() {
                inner.master.allocation_columns.push(AllocationColumn {
                    placement_id: id,
                    column_id: *column,
                    position: i as u32 + 1,
                    placement_type: PlacementType::Manual,
                });
            }
            let pk = inner.master.primary_key_columns(table);
            replicate_pk_columns(&mut inner.master, id, &pk);
            let partitions: Vec<PartitionId> =
                inner.master.partitions_of(table).iter().map(|p| p.id).collect();
            for partition in partitions {
                add_allocation_inner(inner, id, partition)?;
            }
            Ok((id, CatalogChange::PlacementAdded(id)))
        })
    }

    /// Drops the placement of `table` on `adapter`.
    ///
    /// Fails when a column would lose its last allocation; in particular the
    /// last primary-key placement can never be dropped.
    pub fn drop_placement(&self, table: TableId, adapter: AdapterId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let placement = inner
                .master
                .placement_on(table, adapter)
                .ok_or_else(|| CatalogError::NotFound {
                    kind: "placement",
                    name: format!("table {table} on adapter {adapter}"),
                })?
                .id;
            let t = inner.master.table(table)?;
            for col in &t.columns {
                let elsewhere = inner.master.allocation_columns.iter().any(|c| {
                    c.column_id == col.id && c.placement_id != placement
                });
                if !elsewhere {
                    return Err(CatalogError::invariant(format!(
                        "column `{}` would lose its last placement",
                        col.name
                    )));
                }
            }
            inner.master.placements.shift_remove(&placement);
            inner.master.allocation_columns.retain(|c| c.placement_id != placement);
            let allocs: Vec<AllocationId> = inner
                .master
                .allocations_of_placement(placement)
                .iter()
                .map(|a| a.id)
                .collect();
            inner.master.allocations.retain(|_, a| a.placement_id != placement);
            for alloc in allocs {
                inner.master.physical_tables.shift_remove(&alloc);
            }
            Ok(((), CatalogChange::PlacementDropped(table)))
        })
    }

    /// Removes one column from a placement, e.g. when the column moves to a
    /// newly added placement. The column must stay hosted somewhere and
    /// primary-key columns are pinned to every placement.
    pub fn remove_placement_column(
        &self,
        placement: PlacementId,
        column: ColumnId,
    ) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let p = inner.master.placement(placement)?.clone();
            if inner.master.primary_key_columns(p.table_id).contains(&column) {
                return Err(CatalogError::invariant(
                    "primary-key columns are replicated on every placement",
                ));
            }
            let elsewhere = inner
                .master
                .allocation_columns
                .iter()
                .any(|c| c.column_id == column && c.placement_id != placement);
            if !elsewhere {
                return Err(CatalogError::invariant(format!(
                    "column {column} would lose its last placement"
                )));
            }
            let before = inner.master.allocation_columns.len();
            inner
                .master
                .allocation_columns
                .retain(|c| !(c.placement_id == placement && c.column_id == column));
            if inner.master.allocation_columns.len() == before {
                return Err(CatalogError::UnknownId(column.0, "allocation column"));
            }
            rebuild_physical_for_table(&mut inner.master, p.table_id);
            Ok(((), CatalogChange::TableAltered(p.table_id)))
        })
    }

    pub fn update_placement_type(
        &self,
        placement: PlacementId,
        column: ColumnId,
        placement_type: PlacementType,
    ) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            inner.master.placement(placement)?;
            let col = inner
                .master
                .allocation_columns
                .iter_mut()
                .find(|c| c.placement_id == placement && c.column_id == column)
                .ok_or(CatalogError::UnknownId(column.0, "allocation column"))?;
            col.placement_type = placement_type;
            let table = inner.master.placement(placement)?.table_id;
            Ok(((), CatalogChange::TableAltered(table)))
        })
    }

    // ---------------------------------------------------------------- allocations

    pub fn add_allocation(
        &self,
        placement: PlacementId,
        partition: PartitionId,
    ) -> Result<AllocationId, CatalogError> {
        self.mutate(|inner| {
            let id = add_allocation_inner(inner, placement, partition)?;
            let table = inner.master.placement(placement)?.table_id;
            Ok((id, CatalogChange::TableAltered(table)))
        })
    }

    pub fn delete_allocation(&self, id: AllocationId) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let alloc = inner.master.allocation(id)?.clone();
            let siblings = inner
                .master
                .allocations
                .values()
                .filter(|a| a.placement_id == alloc.placement_id)
                .count();
            if siblings == 1 {
                return Err(CatalogError::invariant(
                    "cannot delete the last allocation of a placement; drop the placement",
                ));
            }
            inner.master.allocations.shift_remove(&id);
            inner.master.physical_tables.shift_remove(&id);
            Ok(((), CatalogChange::TableAltered(alloc.logical_id)))
        })
    }

    // ---------------------------------------------------------------- partitions

    /// Replaces the partition layout of `table` with `kind` over
    /// `qualifiers` (one partition per qualifier), re-allocating every
    /// placement.
    pub fn partition_table(
        &self,
        table: TableId,
        kind: PartitionKind,
        qualifiers: Vec<String>,
    ) -> Result<Vec<PartitionId>, CatalogError> {
        self.mutate(|inner| {
            inner.master.table(table)?;
            if qualifiers.is_empty() {
                return Err(CatalogError::invariant("partitioning needs at least one partition"));
            }
            remove_partitions(inner, table);
            let mut ids = Vec::with_capacity(qualifiers.len());
            for qualifier in qualifiers {
                let id = PartitionId(inner.fresh_id());
                inner
                    .master
                    .partitions
                    .insert(id, Partition { id, table_id: table, kind, qualifier });
                ids.push(id);
            }
            let placements: Vec<PlacementId> = inner
                .master
                .placements
                .values()
                .filter(|p| p.table_id == table)
                .map(|p| p.id)
                .collect();
            for placement in placements {
                for partition in &ids {
                    add_allocation_inner(inner, placement, *partition)?;
                }
            }
            Ok((ids, CatalogChange::PartitionLayoutChanged(table)))
        })
    }

    /// `MERGE PARTITIONS`: collapses the layout back to a single NONE
    /// partition.
    pub fn merge_partitions(&self, table: TableId) -> Result<PartitionId, CatalogError> {
        self.mutate(|inner| {
            inner.master.table(table)?;
            remove_partitions(inner, table);
            let id = PartitionId(inner.fresh_id());
            inner
                .master
                .partitions
                .insert(id, Partition { id, table_id: table, kind: PartitionKind::None, qualifier: String::new() });
            let placements: Vec<PlacementId> = inner
                .master
                .placements
                .values()
                .filter(|p| p.table_id == table)
                .map(|p| p.id)
                .collect();
            for placement in placements {
                add_allocation_inner(inner, placement, id)?;
            }
            Ok((id, CatalogChange::PartitionLayoutChanged(table)))
        })
    }

    pub fn update_partition(
        &self,
        id: PartitionId,
        qualifier: String,
    ) -> Result<(), CatalogError> {
        self.mutate(|inner| {
            let part = inner
                .master
                .partitions
                .get_mut(&id)
                .ok_or(CatalogError::UnknownId(id.0, "partition"))?;
            part.qualifier = qualifier;
            let table = part.table_id;
            Ok(((), CatalogChange::PartitionLayoutChanged(table)))
        })
    }

    // ---------------------------------------------------------------- persistence

    /// Serializes the logical and allocation layers (§persistence format).
    pub fn save(&self) -> Vec<u8> {
        let inner = self.inner.lock();
        crate::persist::serialize(&inner.master, inner.next_id)
    }

    /// Restores a catalog from a saved image. The physical layer is
    /// reconstructed deterministically from the allocations.
    pub fn load(bytes: &[u8]) -> Result<Self, CatalogError> {
        let (mut snapshot, next_id) = crate::persist::deserialize(bytes)?;
        let allocs: Vec<AllocationId> = snapshot.allocations.keys().copied().collect();
        for alloc in allocs {
            rebuild_physical(&mut snapshot, alloc);
        }
        Ok(Self {
            inner: Mutex::new(CatalogInner { next_id, master: snapshot.clone() }),
            current: RwLock::new(Arc::new(snapshot)),
            subscribers: Mutex::new(Vec::new()),
        })
    }
}

fn replicate_pk_columns(snapshot: &mut Snapshot, placement: PlacementId, pk: &[ColumnId]) {
    for column in pk {
        let present = snapshot
            .allocation_columns
            .iter()
            .any(|c| c.placement_id == placement && c.column_id == *column);
        if !present {
            let position = snapshot.placement_columns(placement).len() as u32 + 1;
            snapshot.allocation_columns.push(AllocationColumn {
                placement_id: placement,
                column_id: *column,
                position,
                placement_type: PlacementType::Automatic,
            });
        }
    }
}

fn add_allocation_inner(
    inner: &mut CatalogInner,
    placement: PlacementId,
    partition: PartitionId,
) -> Result<AllocationId, CatalogError> {
    let p = inner.master.placement(placement)?.clone();
    inner.master.partition(partition)?;
    let id = AllocationId(inner.fresh_id());
    inner.master.allocations.insert(
        id,
        AllocationTable {
            id,
            placement_id: placement,
            partition_id: partition,
            adapter_id: p.adapter_id,
            logical_id: p.table_id,
        },
    );
    rebuild_physical(&mut inner.master, id);
    Ok(id)
}

fn remove_partitions(inner: &mut CatalogInner, table: TableId) {
    inner.master.partitions.retain(|_, p| p.table_id != table);
    let allocs: Vec<AllocationId> = inner
        .master
        .allocations
        .values()
        .filter(|a| a.logical_id == table)
        .map(|a| a.id)
        .collect();
    inner.master.allocations.retain(|_, a| a.logical_id != table);
    for alloc in allocs {
        inner.master.physical_tables.shift_remove(&alloc);
    }
}

/// Regenerates the physical entity for one allocation: `tab<allocationId>`
/// inside `sch<namespaceId>`, one `col<logicalColumnId>` per hosted column.
/// Existing revision suffixes survive the rebuild.
fn rebuild_physical(snapshot: &mut Snapshot, allocation: AllocationId) {
    let Some(alloc) = snapshot.allocations.get(&allocation).cloned() else { return };
    let Some(table) = snapshot.tables.get(&alloc.logical_id).cloned() else { return };
    let previous = snapshot.physical_tables.get(&allocation).cloned();
    let cols = snapshot.placement_columns(alloc.placement_id);
    let columns = cols
        .iter()
        .enumerate()
        .filter_map(|(i, ac)| {
            table.column(ac.column_id)?;
            let physical_name = previous
                .as_ref()
                .and_then(|p| p.columns.iter().find(|pc| pc.logical_id == ac.column_id))
                .map(|pc| pc.physical_name.clone())
                .unwrap_or_else(|| PhysicalName::column(ac.column_id.0).to_string());
            Some(PhysicalColumn {
                id: PhysicalId(ac.column_id.0),
                allocation_id: allocation,
                logical_id: ac.column_id,
                physical_name,
                position: i as u32 + 1,
            })
        })
        .collect();
    snapshot.physical_tables.insert(
        allocation,
        PhysicalTable {
            id: PhysicalId(allocation.0),
            allocation_id: allocation,
            namespace_name: PhysicalName::schema(table.namespace_id.0).to_string(),
            name: PhysicalName::table(allocation.0).to_string(),
            columns,
        },
    );
}

fn rebuild_physical_for_table(snapshot: &mut Snapshot, table: TableId) {
    let allocs: Vec<AllocationId> = snapshot
        .allocations
        .values()
        .filter(|a| a.logical_id == table)
        .map(|a| a.id)
        .collect();
    for alloc in allocs {
        rebuild_physical(snapshot, alloc);
    }
}
