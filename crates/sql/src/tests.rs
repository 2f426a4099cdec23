use crate::*;
use polystore_algebra::{AlgArena, AlgNodeKind, AggKind};
use polystore_catalog::{Catalog, ColumnDef, DataModel};
use polystore_primitives::NamespaceId;
use polystore_types::{PolyType, Type};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn fixture() -> (Arc<polystore_catalog::Snapshot>, NamespaceId) {
    let catalog = Catalog::new();
    let ns = catalog
        .create_namespace("public", DataModel::Relational, false)
        .unwrap();
    let col = |name: &str, ty: Type, nullable: bool| ColumnDef {
        name: name.into(),
        ty,
        nullable,
        default: None,
    };
    let t = catalog
        .create_table(
            ns,
            "t",
            vec![
                col("a", Type::integer(), false),
                col("b", Type::varchar(16), true),
                col("k", Type::integer(), false),
            ],
        )
        .unwrap();
    let u = catalog
        .create_table(
            ns,
            "u",
            vec![col("c", Type::integer(), false), col("k", Type::integer(), false)],
        )
        .unwrap();
    for table in [t, u] {
        let first = catalog.snapshot().table(table).unwrap().columns[0].id;
        catalog.add_primary_key(table, vec![first]).unwrap();
    }
    (catalog.snapshot(), ns)
}

fn plan(sql: &str) -> Result<(AlgArena, polystore_algebra::NodeId), SqlError> {
    let (snapshot, ns) = fixture();
    let ast = parse(sql)?;
    let source = SourceMap::of(sql);
    let validator = Validator::new(&snapshot, ns, ns, &[], &source);
    let validated = validator.validate(&ast)?;
    let mut arena = AlgArena::new();
    let root = Converter::new(&mut arena, &snapshot).convert(&validated)?;
    Ok((arena, root))
}

#[test]
fn select_filter_project_plan_shape() {
    let (arena, root) = plan("SELECT b FROM t WHERE a = 2").unwrap();
    let explain = arena.explain(root);
    assert!(explain.starts_with("Project"), "{explain}");
    assert!(explain.contains("Filter"), "{explain}");
    assert!(explain.contains("Scan"), "{explain}");
    let row = arena.row_type(root);
    assert_eq!(row.fields.len(), 1);
    assert_eq!(row.fields[0].name.as_ref(), "b");
    assert_eq!(row.fields[0].ty.tag, PolyType::VarChar);
}

#[test]
fn count_star_aggregates() {
    let (arena, root) = plan("SELECT count(*) FROM t").unwrap();
    let node = arena.get(root);
    // Project over Aggregate.
    let agg = arena.get(node.inputs[0]);
    let AlgNodeKind::Aggregate { group, calls } = &agg.kind else {
        panic!("expected aggregate, got {}", agg.kind.name());
    };
    assert!(group.is_empty());
    assert_eq!(calls[0].kind, AggKind::CountStar);
    assert_eq!(arena.row_type(root).fields[0].ty.tag, PolyType::BigInt);
}

#[test]
fn group_by_with_having() {
    let (arena, root) = plan("SELECT k, count(*) FROM t GROUP BY k HAVING count(*) > 1").unwrap();
    let explain = arena.explain(root);
    assert!(explain.contains("Aggregate"), "{explain}");
    assert!(explain.contains("Filter"), "{explain}");
    assert_eq!(arena.row_type(root).fields.len(), 2);
}

#[test]
fn join_concatenates_row_types() {
    let (arena, root) = plan("SELECT t.a, u.c FROM t JOIN u ON t.k = u.k").unwrap();
    let row = arena.row_type(root);
    assert_eq!(row.fields.len(), 2);
    assert_eq!(row.fields[0].name.as_ref(), "a");
    assert_eq!(row.fields[1].name.as_ref(), "c");
}

#[test]
fn unqualified_ambiguous_column_reports_position() {
    let err = plan("SELECT k FROM t JOIN u ON t.a = u.c").unwrap_err();
    let SqlError::AmbiguousColumn { name, pos } = err else {
        panic!("expected ambiguity, got {err}");
    };
    assert_eq!(name, "k");
    assert_eq!(pos.line, 1);
    assert_eq!(pos.col, 8);
}

#[test]
fn unknown_column_reports_position() {
    let err = plan("SELECT missing FROM t").unwrap_err();
    let SqlError::UnknownColumn { name, pos } = err else {
        panic!("expected unknown column, got {err}");
    };
    assert_eq!(name, "missing");
    assert_eq!((pos.line, pos.col), (1, 8));
}

#[test]
fn unknown_table_reports_position() {
    let err = plan("SELECT a FROM nope").unwrap_err();
    assert!(matches!(err, SqlError::UnknownTable { ref name, .. } if name == "nope"));
}

#[test]
fn overload_resolution_rejects_bad_operands() {
    let err = plan("SELECT upper(a) FROM t").unwrap_err();
    let SqlError::NoMatchingOverload { name, .. } = err else {
        panic!("expected overload failure, got {err}");
    };
    assert_eq!(name, "upper");
}

#[test]
fn function_overloads_resolve_by_family() {
    let (arena, root) = plan("SELECT upper(b), abs(a) FROM t").unwrap();
    let row = arena.row_type(root);
    assert_eq!(row.fields[0].ty.tag, PolyType::VarChar);
    assert_eq!(row.fields[1].ty.tag, PolyType::Integer);
}

#[test]
fn insert_coerces_and_fills_defaults() {
    let (arena, root) = plan("INSERT INTO t (a, k) VALUES (1, 2)").unwrap();
    let node = arena.get(root);
    let AlgNodeKind::TableModify { op, .. } = &node.kind else { panic!() };
    assert_eq!(*op, polystore_algebra::ModifyOp::Insert);
    // The Values input carries the full three-column row; `b` filled NULL.
    let values = arena.get(node.inputs[0]);
    let AlgNodeKind::Values { rows, .. } = &values.kind else { panic!() };
    assert_eq!(rows[0].len(), 3);
}

#[test]
fn insert_rejects_null_into_non_nullable() {
    let err = plan("INSERT INTO t (a, b) VALUES (1, 'x')").unwrap_err();
    // `k` is not nullable and has no default.
    assert!(matches!(err, SqlError::Validation { ref message, .. } if message.contains("k")), "{err}");
}

#[test]
fn type_mismatch_in_comparison() {
    let err = plan("SELECT a FROM t WHERE a = 'x'").unwrap_err();
    assert!(matches!(err, SqlError::TypeAt { .. }), "{err}");
}

#[test]
fn set_op_with_nullable_mismatch_still_types() {
    // `a` is NOT NULL, `b` is nullable; UNION result is nullable VARCHAR-vs-INT
    // arity-compatible columns must still be family compatible.
    let (arena, root) = plan("SELECT a FROM t UNION SELECT c FROM u").unwrap();
    assert_eq!(arena.row_type(root).fields.len(), 1);
    let err = plan("SELECT a FROM t UNION SELECT b FROM u2nope");
    assert!(err.is_err());
}

#[test]
fn set_op_rejects_cross_family_columns() {
    let err = plan("SELECT a FROM t UNION SELECT b FROM t").unwrap_err();
    assert!(matches!(err, SqlError::Validation { .. }), "{err}");
}

#[test]
fn order_by_limit_offset_becomes_sort() {
    let (arena, root) = plan("SELECT a FROM t ORDER BY a DESC LIMIT 5 OFFSET 2").unwrap();
    let node = arena.get(root);
    let AlgNodeKind::Sort { collation, offset, limit } = &node.kind else {
        panic!("expected sort, got {}", node.kind.name());
    };
    assert_eq!(collation.0.len(), 1);
    assert_eq!((*offset, *limit), (Some(2), Some(5)));
}

#[test]
fn limit_zero_is_preserved() {
    let (arena, root) = plan("SELECT a FROM t LIMIT 0").unwrap();
    let AlgNodeKind::Sort { limit, .. } = &arena.get(root).kind else { panic!() };
    assert_eq!(*limit, Some(0));
}

#[test]
fn prepared_statement_binds_param_types() {
    let (snapshot, ns) = fixture();
    let ast = parse("PREPARE p (INTEGER) AS SELECT a FROM t WHERE a > ?").unwrap();
    let source = SourceMap::of("PREPARE p (INTEGER) AS SELECT a FROM t WHERE a > ?");
    let validator = Validator::new(&snapshot, ns, ns, &[], &source);
    let validated = validator.validate(&ast).unwrap();
    let BoundStatement::Prepare { name, param_types, stmt } = validated.statement() else {
        panic!();
    };
    assert_eq!(name, "p");
    assert_eq!(param_types, &[Type::integer()]);
    assert!(matches!(**stmt, BoundStatement::Query(_)));
}

#[test]
fn distinct_becomes_grouping() {
    let (arena, root) = plan("SELECT DISTINCT k FROM t").unwrap();
    let node = arena.get(root);
    let AlgNodeKind::Aggregate { group, calls } = &node.kind else {
        panic!("expected aggregate, got {}", node.kind.name());
    };
    assert_eq!(group.len(), 1);
    assert!(calls.is_empty());
}
