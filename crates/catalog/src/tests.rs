use crate::*;
use polystore_primitives::{AdapterId, NamespaceId, TableId};
use polystore_types::{PolyValue, Type};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn col(name: &str, ty: Type) -> ColumnDef {
    ColumnDef { name: name.to_string(), ty, nullable: false, default: None }
}

fn setup() -> (Catalog, NamespaceId, TableId) {
    let catalog = Catalog::new();
    let ns = catalog
        .create_namespace("public", DataModel::Relational, false)
        .unwrap();
    let table = catalog
        .create_table(ns, "t", vec![col("a", Type::integer()), col("b", Type::varchar(16))])
        .unwrap();
    let cols: Vec<_> = catalog.snapshot().table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_primary_key(table, vec![cols[0]]).unwrap();
    (catalog, ns, table)
}

#[test]
fn snapshot_is_stable_across_later_ddl() {
    let (catalog, ns, table) = setup();
    let before = catalog.snapshot();
    catalog
        .create_table(ns, "u", vec![col("x", Type::integer())])
        .unwrap();
    // The held snapshot still resolves exactly the old state.
    assert!(before.table_by_name(ns, "u").is_none());
    assert!(catalog.snapshot().table_by_name(ns, "u").is_some());
    assert!(before.table(table).is_ok());
}

#[test]
fn generation_bumps_on_every_mutation() {
    let (catalog, ns, _) = setup();
    let g = catalog.generation();
    catalog.create_table(ns, "u", vec![col("x", Type::integer())]).unwrap();
    assert_eq!(catalog.generation(), g + 1);
}

#[test]
fn change_events_are_published() {
    let (catalog, ns, _) = setup();
    let events = catalog.subscribe();
    let t = catalog.create_table(ns, "evt", vec![col("x", Type::integer())]).unwrap();
    assert_eq!(events.try_recv().unwrap(), CatalogChange::TableCreated(t));
}

#[test]
fn placement_replicates_primary_key() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let b = snap.table(table).unwrap().column_by_name(
        snap.namespace(snap.table(table).unwrap().namespace_id).unwrap(),
        "b",
    )
    .unwrap()
    .id;
    // Place only `b` on adapter 2; the pk column `a` must follow.
    let placement = catalog.add_placement(table, AdapterId(2), vec![b]).unwrap();
    let snap = catalog.snapshot();
    let cols = snap.placement_columns(placement);
    assert_eq!(cols.len(), 2);
    assert!(cols.iter().any(|c| c.placement_type == PlacementType::Automatic));
}

#[test]
fn dropping_last_covering_placement_is_rejected() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all).unwrap();
    let err = catalog.drop_placement(table, AdapterId(1)).unwrap_err();
    assert!(matches!(err, CatalogError::InvariantViolated(_)));
}

#[test]
fn dropping_covered_placement_succeeds() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all.clone()).unwrap();
    catalog.add_placement(table, AdapterId(2), all).unwrap();
    catalog.drop_placement(table, AdapterId(2)).unwrap();
    assert_eq!(catalog.snapshot().placements_of(table).len(), 1);
}

#[test]
fn unknown_id_mutation_fails_cleanly() {
    let (catalog, _, _) = setup();
    let g = catalog.generation();
    let err = catalog.drop_table(TableId(9999)).unwrap_err();
    assert_eq!(err, CatalogError::UnknownId(9999, "table"));
    // A failed mutation publishes nothing.
    assert_eq!(catalog.generation(), g);
}

#[test]
fn partitioning_reallocates_each_placement() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all).unwrap();
    let parts = catalog
        .partition_table(table, PartitionKind::Hash, vec!["0/2".into(), "1/2".into()])
        .unwrap();
    assert_eq!(parts.len(), 2);
    let snap = catalog.snapshot();
    assert_eq!(snap.allocations_of_table(table).len(), 2);
    catalog.merge_partitions(table).unwrap();
    let snap = catalog.snapshot();
    assert_eq!(snap.allocations_of_table(table).len(), 1);
    assert_eq!(snap.partitions_of(table)[0].kind, PartitionKind::None);
}

#[test]
fn physical_names_are_deterministic() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all.clone()).unwrap();
    let snap = catalog.snapshot();
    let alloc = snap.allocations_of_table(table)[0].id;
    let phys = snap.physical(alloc).unwrap();
    assert_eq!(phys.name, format!("tab{}", alloc.0));
    assert_eq!(
        snap.physical_column_name(alloc, all[0]).unwrap(),
        format!("col{}", all[0].0)
    );
}

#[test]
fn column_redefinition_bumps_revision() {
    let (catalog, _, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all.clone()).unwrap();
    catalog
        .alter_column_type(table, all[1], Type::varchar(64), true)
        .unwrap();
    let snap = catalog.snapshot();
    let alloc = snap.allocations_of_table(table)[0].id;
    let name = snap.physical_column_name(alloc, all[1]).unwrap();
    assert_eq!(name, format!("col{}r1", all[1].0));
    let parsed = PhysicalName::parse(name).unwrap();
    assert_eq!(parsed.revision, 1);
}

#[test]
fn save_load_round_trips() {
    let (catalog, ns, table) = setup();
    let snap = catalog.snapshot();
    let all: Vec<_> = snap.table(table).unwrap().columns.iter().map(|c| c.id).collect();
    catalog.add_placement(table, AdapterId(1), all).unwrap();
    catalog
        .create_table(
            ns,
            "with_default",
            vec![ColumnDef {
                name: "d".into(),
                ty: Type::decimal(10, 2),
                nullable: true,
                default: Some(PolyValue::Decimal(100, 2)),
            }],
        )
        .unwrap();

    let image = catalog.save();
    let restored = Catalog::load(&image).unwrap();
    assert_eq!(*restored.snapshot(), *catalog.snapshot());

    // Ids keep increasing monotonically after a restore.
    let next = restored
        .create_namespace("docs", DataModel::Document, true)
        .unwrap();
    assert!(catalog.snapshot().namespaces.keys().all(|id| id.0 < next.0));
}

#[test]
fn newer_format_record_tails_survive_rewrite() {
    let (catalog, _, _) = setup();
    let mut image = catalog.save();
    // Extend the single namespace record with bytes this version does not
    // know: patch the record length and append.
    // Image layout: magic(4) version(4) generation(8) next_id(8) tag(1) count(4) reclen(4).
    let reclen_at = 4 + 4 + 8 + 8 + 1 + 4;
    let reclen = u32::from_le_bytes(image[reclen_at..reclen_at + 4].try_into().unwrap());
    let rec_end = reclen_at + 4 + reclen as usize;
    image[reclen_at..reclen_at + 4].copy_from_slice(&(reclen + 3).to_le_bytes());
    for (i, b) in [0xde, 0xad, 0xbf].into_iter().enumerate() {
        image.insert(rec_end + i, b);
    }

    let restored = Catalog::load(&image).unwrap();
    let rewritten = restored.save();
    let restored_again = Catalog::load(&rewritten).unwrap();
    assert_eq!(*restored_again.snapshot(), *restored.snapshot());
    // The unknown bytes are still in the rewritten image.
    let hay: &[u8] = &rewritten;
    assert!(hay.windows(3).any(|w| w == [0xde, 0xad, 0xbf]));
}

proptest! {
    #[test]
    fn persisted_catalog_round_trips(
        tables in proptest::collection::vec(
            (
                "[a-z][a-z0-9_]{0,8}",
                proptest::collection::vec(
                    ("[a-z][a-z0-9_]{0,8}", 0u8..5u8, any::<bool>()),
                    1..5,
                ),
            ),
            1..6,
        )
    ) {
        let catalog = Catalog::new();
        let ns = catalog.create_namespace("public", DataModel::Relational, false).unwrap();
        for (name, cols) in tables {
            let mut defs = Vec::new();
            let mut seen = Vec::new();
            for (col_name, ty_pick, nullable) in cols {
                if seen.iter().any(|s: &String| s.eq_ignore_ascii_case(&col_name)) {
                    continue;
                }
                seen.push(col_name.clone());
                let ty = match ty_pick {
                    0 => Type::integer(),
                    1 => Type::bigint(),
                    2 => Type::varchar(32),
                    3 => Type::decimal(12, 3),
                    _ => Type::boolean(),
                };
                defs.push(ColumnDef { name: col_name, ty, nullable, default: None });
            }
            if defs.is_empty() || catalog.snapshot().table_by_name(ns, &name).is_some() {
                continue;
            }
            let table = catalog.create_table(ns, &name, defs).unwrap();
            let cols: Vec<_> = catalog.snapshot().table(table).unwrap().columns.iter().map(|c| c.id).collect();
            catalog.add_primary_key(table, vec![cols[0]]).unwrap();
            catalog.add_placement(table, AdapterId(1), cols).unwrap();
        }
        let restored = Catalog::load(&catalog.save()).unwrap();
        prop_assert_eq!(&*restored.snapshot(), &*catalog.snapshot());
    }
}
