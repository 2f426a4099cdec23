//! End-to-end scenarios over the in-memory adapter.

use polystore::adapter::MemAdapter;
use polystore::{DbConfig, ErrorKind, PolyDb, StatementResult};
use polystore_primitives::AdapterId;
use polystore_types::PolyValue;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Fixture {
    db: Arc<PolyDb>,
    stores: Vec<Arc<MemAdapter>>,
}

fn fixture(stores: usize) -> Fixture {
    init_logging();
    let db = Arc::new(PolyDb::new(DbConfig::default()));
    let stores: Vec<Arc<MemAdapter>> = (1..=stores as u64)
        .map(|i| {
            let adapter = Arc::new(MemAdapter::deploy(AdapterId(i), format!("s{i}")));
            db.deploy(adapter.clone()).unwrap();
            adapter
        })
        .collect();
    Fixture { db, stores }
}

fn ints(result: &StatementResult) -> Vec<i64> {
    result
        .rows()
        .iter()
        .map(|r| r[0].as_int().expect("integer column"))
        .collect()
}

#[test]
fn scenario_1_placement_split_routes_across_stores() {
    let f = fixture(2);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(16)) ON STORE s1")
        .unwrap();
    assert_eq!(
        db.run_auto("alice", "INSERT INTO t VALUES (1, 'x'), (2, 'y')").unwrap(),
        StatementResult::Count(2)
    );
    let count = db.run_auto("alice", "SELECT count(*) FROM t").unwrap();
    assert_eq!(ints(&count), vec![2]);

    db.run_auto("alice", "ALTER TABLE t ADD PLACEMENT (b) ON STORE s2").unwrap();

    // The scan of `a` goes to s1 and the scan of `b` to s2, rejoined on the
    // key.
    let txn = db.begin("alice");
    let plan = db.explain(&txn, "SELECT a, b FROM t WHERE a = 2").unwrap();
    db.rollback(&txn);
    assert_eq!(plan.matches("PhysicalScan").count(), 2, "{plan}");
    assert!(plan.contains("adapter=1") && plan.contains("adapter=2"), "{plan}");
    assert!(plan.contains("Join"), "{plan}");

    let result = db.run_auto("alice", "SELECT a, b FROM t WHERE a = 2").unwrap();
    assert_eq!(
        result.rows(),
        &[vec![PolyValue::Int(2), PolyValue::Str("y".into())]]
    );

    // The data really moved: s2 now holds the b column (plus the key), and
    // the rows on s1 shrank to the key column.
    let s2_rows: Vec<_> = f.stores[1]
        .committed_rows(first_allocation(db, AdapterId(2)))
        .into_iter()
        .collect();
    assert_eq!(s2_rows.len(), 2);
    let s1_rows = f.stores[0].committed_rows(first_allocation(db, AdapterId(1)));
    assert!(s1_rows.iter().all(|r| r.len() == 1), "{s1_rows:?}");
}

fn first_allocation(db: &PolyDb, adapter: AdapterId) -> polystore_primitives::AllocationId {
    let snap = db.catalog().snapshot();
    snap.allocations
        .values()
        .find(|a| a.adapter_id == adapter)
        .expect("adapter hosts an allocation")
        .id
}

#[test]
fn scenario_2_prepared_statements_hit_the_implementation_cache() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(16)) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "INSERT INTO t VALUES (1, 'x'), (2, 'y')").unwrap();

    let txn = db.begin("alice");
    db.run(&txn, "PREPARE p (INTEGER) AS SELECT a FROM t WHERE a > ?").unwrap();

    let first = db.run(&txn, "EXECUTE p (0)").unwrap();
    let mut got = ints(&first);
    got.sort();
    assert_eq!(got, vec![1, 2]);

    let hits_before = db.impl_cache_hits();
    let second = db.run(&txn, "EXECUTE p (1)").unwrap();
    assert_eq!(ints(&second), vec![2]);
    assert!(
        db.impl_cache_hits() > hits_before,
        "second execution must replay the cached implementation"
    );
    db.commit(&txn).unwrap();
}

#[test]
fn scenario_3_readers_see_pre_update_state_until_commit() {
    let f = fixture(1);
    let db = f.db.clone();
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(16)) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "INSERT INTO t VALUES (1, 'x')").unwrap();

    // T2 starts first and reads under its shared lock.
    let t2 = db.begin("reader");
    let read = db.run(&t2, "SELECT b FROM t WHERE a = 1").unwrap();
    assert_eq!(read.rows(), &[vec![PolyValue::Str("x".into())]]);

    // T1's exclusive lock has to wait for T2.
    let writer_db = f.db.clone();
    let writer = thread::spawn(move || {
        writer_db.run_auto("writer", "UPDATE t SET b = 'z' WHERE a = 1").unwrap();
    });
    thread::sleep(Duration::from_millis(100));
    // Still the old value from T2's view.
    let again = db.run(&t2, "SELECT b FROM t WHERE a = 1").unwrap();
    assert_eq!(again.rows(), &[vec![PolyValue::Str("x".into())]]);
    db.commit(&t2).unwrap();
    writer.join().unwrap();

    let after = db.run_auto("check", "SELECT b FROM t WHERE a = 1").unwrap();
    assert_eq!(after.rows(), &[vec![PolyValue::Str("z".into())]]);
}

#[test]
fn scenario_4_deadlock_victim_retries_and_both_commit() {
    let f = fixture(1);
    let db = f.db.clone();
    db.run_auto("ddl", "CREATE TABLE t1 (a INTEGER PRIMARY KEY, v INTEGER) ON STORE s1")
        .unwrap();
    db.run_auto("ddl", "CREATE TABLE t2 (a INTEGER PRIMARY KEY, v INTEGER) ON STORE s1")
        .unwrap();
    db.run_auto("ddl", "INSERT INTO t1 VALUES (1, 0)").unwrap();
    db.run_auto("ddl", "INSERT INTO t2 VALUES (1, 0)").unwrap();

    // Both transactions take their first lock, meet at the barrier, then
    // request each other's entity: the cycle is guaranteed.
    let barrier = Arc::new(std::sync::Barrier::new(2));
    let run_crossing = |db: Arc<PolyDb>,
                        barrier: Arc<std::sync::Barrier>,
                        first: &'static str,
                        second: &'static str| {
        thread::spawn(move || {
            let mut deadlocks = 0u32;
            loop {
                let txn = db.begin("worker");
                let outcome = db
                    .run(&txn, &format!("UPDATE {first} SET v = 1 WHERE a = 1"))
                    .and_then(|_| {
                        if deadlocks == 0 {
                            barrier.wait();
                        }
                        db.run(&txn, &format!("UPDATE {second} SET v = 1 WHERE a = 1"))
                    });
                match outcome {
                    Ok(_) => {
                        db.commit(&txn).unwrap();
                        return deadlocks;
                    }
                    Err(e) => {
                        assert_eq!(e.kind(), ErrorKind::Deadlock, "unexpected error: {e}");
                        db.rollback(&txn);
                        deadlocks += 1;
                        assert!(deadlocks < 10, "deadlock retry never succeeded");
                        thread::sleep(Duration::from_millis(20 * deadlocks as u64));
                    }
                }
            }
        })
    };

    let a = run_crossing(f.db.clone(), barrier.clone(), "t1", "t2");
    let b = run_crossing(f.db.clone(), barrier, "t2", "t1");
    let (da, db_count) = (a.join().unwrap(), b.join().unwrap());
    // Exactly one side loses the race (possibly more than once under
    // scheduling noise), and both end up committed.
    assert!(da + db_count >= 1, "the crossing updates never deadlocked");

    let check = f.db.run_auto("check", "SELECT v FROM t1").unwrap();
    assert_eq!(ints(&check), vec![1]);
    let check = f.db.run_auto("check", "SELECT v FROM t2").unwrap();
    assert_eq!(ints(&check), vec![1]);
}

#[test]
fn scenario_5_duplicate_key_rejected_before_any_store_is_touched() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(16)) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "INSERT INTO t VALUES (1, 'x')").unwrap();

    let err = db.run_auto("alice", "INSERT INTO t VALUES (1, 'dup')").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogInvariantViolated);

    let alloc = first_allocation(db, AdapterId(1));
    let rows = f.stores[0].committed_rows(alloc);
    assert_eq!(rows.len(), 1, "the failed insert must not reach the store");
    assert_eq!(rows[0][1], PolyValue::Str("x".into()));
}

#[test]
fn scenario_6_cross_store_join_goes_through_exchanges() {
    let f = fixture(2);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t1 (k INTEGER PRIMARY KEY, a INTEGER) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "CREATE TABLE t2 (k INTEGER PRIMARY KEY, c VARCHAR(8)) ON STORE s2")
        .unwrap();
    db.run_auto("alice", "INSERT INTO t1 VALUES (1, 10), (2, 20), (3, 30)").unwrap();
    db.run_auto("alice", "INSERT INTO t2 VALUES (2, 'b'), (3, 'c'), (4, 'd')").unwrap();

    let txn = db.begin("alice");
    let plan = db
        .explain(&txn, "SELECT t1.a, t2.c FROM t1 JOIN t2 ON t1.k = t2.k")
        .unwrap();
    db.rollback(&txn);
    assert!(plan.contains("Exchange"), "{plan}");
    assert_eq!(plan.matches("PhysicalScan").count(), 2, "{plan}");
    assert!(plan.contains("Join"), "{plan}");

    let mut rows = db
        .run_auto("alice", "SELECT t1.a, t2.c FROM t1 JOIN t2 ON t1.k = t2.k")
        .unwrap()
        .rows()
        .to_vec();
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec![PolyValue::Int(20), PolyValue::Str("b".into())],
            vec![PolyValue::Int(30), PolyValue::Str("c".into())],
        ]
    );
}

#[test]
fn two_phase_commit_aborts_on_a_no_vote() {
    let f = fixture(2);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(8)) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "ALTER TABLE t ADD PLACEMENT (b) ON STORE s2").unwrap();

    f.stores[1].fail_next_prepare();
    let txn = db.begin("alice");
    db.run(&txn, "INSERT INTO t VALUES (1, 'x')").unwrap();
    let err = db.commit(&txn).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommitAborted);

    // Nothing became visible on either store.
    let check = db.run_auto("check", "SELECT count(*) FROM t").unwrap();
    assert_eq!(ints(&check), vec![0]);
}

#[test]
fn phase_two_failure_reports_success_and_reconciles() {
    let f = fixture(2);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(8)) ON STORE s1")
        .unwrap();
    db.run_auto("alice", "ALTER TABLE t ADD PLACEMENT (b) ON STORE s2").unwrap();

    f.stores[1].fail_next_commit();
    let txn = db.begin("alice");
    db.run(&txn, "INSERT INTO t VALUES (1, 'x')").unwrap();
    let summary = db.commit(&txn).unwrap();
    assert_eq!(summary.partial_failures, vec![AdapterId(2)]);

    // The reconciler retries in the background until the store accepts.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !db.reconciler().pending().is_empty() {
        assert!(std::time::Instant::now() < deadline, "reconciler never drained");
        thread::sleep(Duration::from_millis(50));
    }
    let check = db.run_auto("check", "SELECT a, b FROM t").unwrap();
    assert_eq!(check.rows().len(), 1);
}

#[test]
fn limits_offsets_and_empty_inputs() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("alice", "CREATE TABLE t (a INTEGER PRIMARY KEY) ON STORE s1").unwrap();
    db.run_auto("alice", "INSERT INTO t VALUES (1), (2), (3)").unwrap();

    let none = db.run_auto("alice", "SELECT a FROM t LIMIT 0").unwrap();
    assert!(none.rows().is_empty());

    let past_end = db.run_auto("alice", "SELECT a FROM t ORDER BY a OFFSET 10").unwrap();
    assert!(past_end.rows().is_empty());

    let window = db.run_auto("alice", "SELECT a FROM t ORDER BY a DESC LIMIT 1 OFFSET 1").unwrap();
    assert_eq!(ints(&window), vec![2]);

    // A join against a predicate that selects nothing.
    db.run_auto("alice", "CREATE TABLE u (a INTEGER PRIMARY KEY) ON STORE s1").unwrap();
    let empty_side = db
        .run_auto("alice", "SELECT t.a FROM t JOIN u ON t.a = u.a")
        .unwrap();
    assert!(empty_side.rows().is_empty());

    // Aggregates over no rows still answer.
    let agg = db.run_auto("alice", "SELECT count(*) FROM u").unwrap();
    assert_eq!(ints(&agg), vec![0]);
}

#[test]
fn set_ops_tolerate_nullability_mismatch() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("a", "CREATE TABLE t (a INTEGER PRIMARY KEY, n INTEGER) ON STORE s1").unwrap();
    db.run_auto("a", "CREATE TABLE u (a INTEGER PRIMARY KEY, n INTEGER NOT NULL) ON STORE s1")
        .unwrap();
    db.run_auto("a", "INSERT INTO t (a, n) VALUES (1, NULL), (2, 5)").unwrap();
    db.run_auto("a", "INSERT INTO u VALUES (7, 5)").unwrap();

    // Nullable-vs-NOT NULL columns are coercible set-op inputs; the result
    // column is nullable.
    let union = db
        .run_auto("a", "SELECT n FROM t UNION ALL SELECT n FROM u")
        .unwrap_or_else(|e| panic!("union failed: {e}"));
    assert_eq!(union.rows().len(), 3);

    let distinct = db.run_auto("a", "SELECT n FROM t UNION SELECT n FROM u").unwrap();
    // {NULL, 5}: the duplicate 5 collapses, the NULL survives.
    assert_eq!(distinct.rows().len(), 2);
}

#[test]
fn partitioned_table_round_trips_through_dml() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("a", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(8)) ON STORE s1").unwrap();
    db.run_auto("a", "INSERT INTO t VALUES (1, 'x'), (2, 'y'), (3, 'z')").unwrap();
    db.run_auto("a", "ALTER TABLE t PARTITION BY HASH (a) PARTITIONS 2").unwrap();

    let snap = db.catalog().snapshot();
    let table = snap.namespace_by_name("public").map(|ns| ns.id).unwrap();
    let table = snap.table_by_name(table, "t").unwrap().id;
    assert_eq!(snap.allocations_of_table(table).len(), 2);

    let mut rows = ints(&db.run_auto("a", "SELECT a FROM t").unwrap());
    rows.sort();
    assert_eq!(rows, vec![1, 2, 3]);

    db.run_auto("a", "INSERT INTO t VALUES (4, 'w')").unwrap();
    let count = db.run_auto("a", "SELECT count(*) FROM t").unwrap();
    assert_eq!(ints(&count), vec![4]);

    db.run_auto("a", "ALTER TABLE t MERGE PARTITIONS").unwrap();
    let count = db.run_auto("a", "SELECT count(*) FROM t").unwrap();
    assert_eq!(ints(&count), vec![4]);
}

#[test]
fn catalog_survives_save_and_load() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("a", "CREATE TABLE t (a INTEGER PRIMARY KEY, b VARCHAR(8)) ON STORE s1").unwrap();
    let image = db.catalog().save();

    let restored = polystore_catalog::Catalog::load(&image).unwrap();
    let db2 = PolyDb::with_catalog(Arc::new(restored), DbConfig::default());
    db2.deploy(Arc::new(MemAdapter::deploy(AdapterId(1), "s1"))).unwrap();

    // The schema resolves; the physical layer was rebuilt deterministically.
    let snap = db2.catalog().snapshot();
    let ns = snap.namespace_by_name("public").unwrap().id;
    let t = snap.table_by_name(ns, "t").unwrap();
    let alloc = snap.allocations_of_table(t.id)[0].id;
    assert!(snap.physical(alloc).is_ok());
}

#[test]
fn cancellation_unwinds_at_the_next_boundary() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("a", "CREATE TABLE t (a INTEGER PRIMARY KEY) ON STORE s1").unwrap();
    db.run_auto("a", "INSERT INTO t VALUES (1), (2)").unwrap();

    let txn = db.begin("a");
    txn.cancel();
    let err = db.run(&txn, "SELECT a FROM t").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    db.rollback(&txn);
}

#[test]
fn update_counts_come_back_per_batch_entry() {
    let f = fixture(1);
    let db = &f.db;
    db.run_auto("a", "CREATE TABLE t (a INTEGER PRIMARY KEY, v INTEGER) ON STORE s1").unwrap();
    db.run_auto("a", "INSERT INTO t VALUES (1, 0), (2, 0), (3, 0)").unwrap();

    let txn = db.begin("a");
    db.run(&txn, "PREPARE bump (INTEGER) AS UPDATE t SET v = 1 WHERE a = ?").unwrap();
    let counts = db
        .execute_batch(
            &txn,
            "bump",
            vec![
                vec![PolyValue::Int(1)],
                vec![PolyValue::Int(9)],
                vec![PolyValue::Int(3)],
            ],
        )
        .unwrap();
    db.commit(&txn).unwrap();
    assert_eq!(counts, vec![1, 0, 1]);
}
