//! The database façade: one object owning the catalog, the adapter
//! registry, the optimizer and its caches, the lock manager and the
//! reconciler, processing statements end to end.

use crate::adapter::{AdapterRegistry, Row, StoreAdapter};
use crate::config::DbConfig;
use crate::error::{DbError, ErrorKind, Result};
use crate::exec::{build_pipeline, Cursor, ExecCtx};
use crate::router::Router;
use crate::stats::RowStats;
use crate::txn::{
    commit_two_phase, rollback_all, CommitSummary, LockManager, LockMode, Reconciler, Transaction,
    TxnMode,
};
use parking_lot::Mutex;
use polystore_algebra::{AlgArena, AlgNodeKind, ModifyOp, NodeId, TraitSet};
use polystore_catalog::{Catalog, CatalogError, DataModel, KeyKind, Snapshot};
use polystore_planner::{CacheKey, GenerationalCache, Planner, PlannerConfig};
use polystore_primitives::{AdapterId, ColumnId, EntityId, NamespaceId, TableId, TxId};
use polystore_sql::{
    parse, BoundDdl, BoundStatement, Converter, SourceMap, SqlAst, Validator,
};
use polystore_types::{PolyValue, Type};
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A planned statement: the arena holding the plan and its root. The same
/// value serves as the optimized entry in the plan cache and, once routed,
/// as the executable artifact in the implementation cache.
pub struct CachedPlan {
    pub arena: AlgArena,
    pub root: NodeId,
}

struct PreparedInfo {
    ast: SqlAst,
    param_types: Vec<Type>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Rows { columns: Vec<String>, rows: Vec<Row> },
    Count(i64),
    Ddl,
    Tx,
    Prepared,
    Committed(Vec<AdapterId>),
}

impl StatementResult {
    pub fn rows(&self) -> &[Row] {
        match self {
            StatementResult::Rows { rows, .. } => rows,
            _ => &[],
        }
    }

    pub fn count(&self) -> i64 {
        match self {
            StatementResult::Count(n) => *n,
            _ => 0,
        }
    }
}

pub struct PolyDb {
    config: DbConfig,
    catalog: Arc<Catalog>,
    adapters: Arc<AdapterRegistry>,
    locks: Arc<LockManager>,
    planner: Planner,
    plan_cache: GenerationalCache<Arc<CachedPlan>>,
    impl_cache: GenerationalCache<Arc<CachedPlan>>,
    impl_hits: AtomicU64,
    reconciler: Reconciler,
    stats: Arc<RowStats>,
    prepared: Mutex<FxHashMap<String, PreparedInfo>>,
    next_tx: AtomicU64,
}

impl PolyDb {
    pub fn new(config: DbConfig) -> Self {
        Self::with_catalog(Arc::new(Catalog::new()), config)
    }

    pub fn with_catalog(catalog: Arc<Catalog>, config: DbConfig) -> Self {
        if catalog.snapshot().namespace_by_name(&config.default_namespace).is_none() {
            catalog
                .create_namespace(&config.default_namespace, DataModel::Relational, false)
                .expect("creating the default namespace on an empty catalog");
        }
        let adapters = Arc::new(AdapterRegistry::new());
        let planner = Planner::new(PlannerConfig {
            iteration_budget: config.planner_iteration_budget,
            join_iterations: config.join_iterations,
        });
        Self {
            plan_cache: GenerationalCache::new(config.plan_cache_size),
            impl_cache: GenerationalCache::new(config.impl_cache_size),
            impl_hits: AtomicU64::new(0),
            reconciler: Reconciler::start(adapters.clone(), Duration::from_millis(200)),
            planner,
            catalog,
            adapters,
            locks: Arc::new(LockManager::new()),
            stats: Arc::new(RowStats::new()),
            prepared: Mutex::new(FxHashMap::default()),
            next_tx: AtomicU64::new(1),
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn deploy(&self, adapter: Arc<dyn StoreAdapter>) -> Result<AdapterId> {
        self.adapters.deploy(adapter)
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Implementation-cache hits so far; observable per request via
    /// `Transaction::analyze` tooling and tests.
    pub fn impl_cache_hits(&self) -> u64 {
        self.impl_hits.load(Ordering::Relaxed)
    }

    fn default_namespace(&self, snapshot: &Snapshot) -> NamespaceId {
        snapshot
            .namespace_by_name(&self.config.default_namespace)
            .map(|ns| ns.id)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------ lifecycle

    pub fn begin(&self, user: &str) -> Arc<Transaction> {
        self.begin_mode(user, TxnMode::Manual)
    }

    fn begin_mode(&self, user: &str, mode: TxnMode) -> Arc<Transaction> {
        let id = TxId(self.next_tx.fetch_add(1, Ordering::Relaxed));
        let snapshot = self.catalog.snapshot();
        let ns = self.default_namespace(&snapshot);
        log::debug!("begin tx {id} for `{user}` ({mode:?})");
        Arc::new(Transaction::new(id, user, ns, mode, snapshot))
    }

    pub fn commit(&self, txn: &Arc<Transaction>) -> Result<CommitSummary> {
        let outcome = commit_two_phase(txn, &self.adapters, &self.reconciler);
        self.locks.release_all(txn.id);
        outcome
    }

    pub fn rollback(&self, txn: &Arc<Transaction>) {
        rollback_all(txn, &self.adapters);
        self.locks.release_all(txn.id);
    }

    /// Runs one statement in an automatic transaction, retrying bounded
    /// times with exponential backoff when it loses a deadlock.
    pub fn run_auto(&self, user: &str, sql: &str) -> Result<StatementResult> {
        let mut attempt = 0u32;
        loop {
            let txn = self.begin_mode(user, TxnMode::Auto);
            match self.run(&txn, sql) {
                Ok(result) => {
                    let summary = self.commit(&txn)?;
                    if !summary.partial_failures.is_empty() {
                        log::warn!(
                            "commit of tx {} succeeded with stores pending reconciliation: {:?}",
                            txn.id,
                            summary.partial_failures
                        );
                    }
                    return Ok(result);
                }
                Err(e) => {
                    self.rollback(&txn);
                    if e.is_retryable() && attempt < self.config.max_deadlock_retries {
                        attempt += 1;
                        let backoff = Duration::from_millis(10 << attempt.min(6));
                        log::info!("retrying after deadlock (attempt {attempt}): {e}");
                        std::thread::sleep(backoff);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }

    // ------------------------------------------------------------ statements

    pub fn run(&self, txn: &Arc<Transaction>, sql: &str) -> Result<StatementResult> {
        let ast = parse(sql)?;
        let source = SourceMap::of(sql);
        match ast {
            SqlAst::Begin => Ok(StatementResult::Tx),
            SqlAst::Commit => {
                let summary = self.commit(txn)?;
                Ok(StatementResult::Committed(summary.partial_failures))
            }
            SqlAst::Rollback => {
                self.rollback(txn);
                Ok(StatementResult::Tx)
            }
            SqlAst::Prepare { name, param_types, stmt } => {
                // Validate now so the error surfaces at PREPARE time.
                let snapshot = txn.snapshot();
                let ns = self.default_namespace(&snapshot);
                Validator::new(&snapshot, ns, ns, &param_types, &source).validate(&stmt)?;
                self.prepared
                    .lock()
                    .insert(name, PreparedInfo { ast: *stmt, param_types });
                Ok(StatementResult::Prepared)
            }
            SqlAst::Execute { name, args } => {
                let (ast, param_types) = {
                    let prepared = self.prepared.lock();
                    let info = prepared
                        .get(&name)
                        .ok_or_else(|| DbError::UnknownPrepared(name.clone()))?;
                    (info.ast.clone(), info.param_types.clone())
                };
                self.execute_statement(txn, &ast, param_types, args, &source)
            }
            ref ddl if ddl.is_ddl() => self.execute_ddl(txn, ddl, &source),
            other => self.execute_statement(txn, &other, Vec::new(), Vec::new(), &source),
        }
    }

    /// Executes a prepared statement once per parameter tuple, returning the
    /// update counts in order.
    pub fn execute_batch(
        &self,
        txn: &Arc<Transaction>,
        name: &str,
        batches: Vec<Vec<PolyValue>>,
    ) -> Result<Vec<i64>> {
        let (ast, param_types) = {
            let prepared = self.prepared.lock();
            let info = prepared
                .get(name)
                .ok_or_else(|| DbError::UnknownPrepared(name.to_string()))?;
            (info.ast.clone(), info.param_types.clone())
        };
        let source = SourceMap::of("");
        batches
            .into_iter()
            .map(|args| {
                self.execute_statement(txn, &ast, param_types.clone(), args, &source)
                    .map(|r| r.count())
            })
            .collect()
    }

    fn execute_statement(
        &self,
        txn: &Arc<Transaction>,
        ast: &SqlAst,
        declared_types: Vec<Type>,
        mut args: Vec<PolyValue>,
        source: &SourceMap,
    ) -> Result<StatementResult> {
        // Placeholders without a PREPARE have no declared types to bind
        // against; lifting literals around them would renumber them.
        if declared_types.is_empty() && ast.uses_params() {
            return Err(DbError::Sql(polystore_sql::SqlError::Unsupported(
                "placeholders outside a prepared statement".into(),
            )));
        }
        // Canonical parameterized form: literals lifted behind the declared
        // placeholders, so textually different statements share a plan.
        let (param_ast, lifted) = ast.parameterize(declared_types.len());
        let mut param_types = declared_types;
        param_types.extend(lifted.iter().map(|v| v.type_of()));
        args.extend(lifted);

        let cacheable = !ast.is_dml() || self.config.cache_dml;
        let (key_sql, _) = param_ast.canonicalize();
        let key = CacheKey::new(key_sql, param_types.clone());

        let mut refreshed = false;
        let plan = loop {
            let snapshot = txn.snapshot();
            let generation = snapshot.generation;
            if cacheable {
                if let Some(plan) = self.impl_cache.get(&key, generation) {
                    self.impl_hits.fetch_add(1, Ordering::Relaxed);
                    break plan;
                }
            }
            match self.build_plan(txn, &snapshot, &param_ast, &param_types, source, cacheable, &key)
            {
                Ok(plan) => break plan,
                Err(e) if !refreshed && e.kind() == ErrorKind::UnknownId => {
                    // One snapshot refresh: the id may have appeared in a
                    // generation newer than the transaction's view.
                    refreshed = true;
                    txn.refresh_snapshot(self.catalog.snapshot());
                }
                Err(e) => return Err(e),
            }
        };

        self.acquire_plan_locks(txn, &plan)?;
        let ctx = ExecCtx {
            txn: txn.clone(),
            snapshot: txn.snapshot(),
            adapters: self.adapters.clone(),
            params: Arc::new(args),
            exchange_capacity: self.config.exchange_capacity,
        };
        let pipeline = build_pipeline(&plan.arena, plan.root, &self.adapters)?;
        let mut cursor = Cursor::new(pipeline, ctx);
        let rows = cursor.fetch_all()?;

        if let AlgNodeKind::TableModify { table, op, .. } = &plan.arena.get(plan.root).kind {
            let count = rows
                .first()
                .and_then(|r| r.first())
                .and_then(|v| v.as_int())
                .unwrap_or(0);
            match op {
                ModifyOp::Insert => self.stats.record(*table, count),
                ModifyOp::Delete => self.stats.record(*table, -count),
                _ => {}
            }
            return Ok(StatementResult::Count(count));
        }
        let columns = plan
            .arena
            .row_type(plan.root)
            .fields
            .iter()
            .map(|f| f.name.to_string())
            .collect();
        Ok(StatementResult::Rows { columns, rows })
    }

    fn build_plan(
        &self,
        txn: &Arc<Transaction>,
        snapshot: &Arc<Snapshot>,
        ast: &SqlAst,
        param_types: &[Type],
        source: &SourceMap,
        cacheable: bool,
        key: &CacheKey,
    ) -> Result<Arc<CachedPlan>> {
        let generation = snapshot.generation;
        let ns = self.default_namespace(snapshot);

        let (mut arena, optimized) = match cacheable
            .then(|| self.plan_cache.get(key, generation))
            .flatten()
        {
            Some(plan) => (plan.arena.clone(), plan.root),
            None => {
                let validated =
                    Validator::new(snapshot, ns, ns, param_types, source).validate(ast)?;
                let mut arena = AlgArena::new();
                let logical = Converter::new(&mut arena, snapshot).convert(&validated)?;
                let optimized = self.planner.optimize(&mut arena, logical, &*self.stats)?;
                if cacheable {
                    self.plan_cache.put(
                        key.clone(),
                        generation,
                        Arc::new(CachedPlan { arena: arena.clone(), root: optimized }),
                    );
                }
                (arena, optimized)
            }
        };

        let routed = Router::new(snapshot, &self.adapters, txn).route(&mut arena, optimized)?;
        log::trace!("routed plan:\n{}", arena.explain(routed));
        let plan = Arc::new(CachedPlan { arena, root: routed });
        if cacheable {
            self.impl_cache.put(key.clone(), generation, plan.clone());
        }
        Ok(plan)
    }

    /// Entity locks of a routed plan: shared on scanned tables, exclusive on
    /// modified ones, acquired in ascending entity order.
    fn acquire_plan_locks(&self, txn: &Arc<Transaction>, plan: &CachedPlan) -> Result<()> {
        let mut wanted: Vec<(EntityId, LockMode)> = Vec::new();
        for id in plan.arena.post_order(plan.root) {
            let (entity, mode) = match &plan.arena.get(id).kind {
                AlgNodeKind::PhysicalScan { table, .. } => {
                    (EntityId::Table(*table), LockMode::Shared)
                }
                AlgNodeKind::TableModify { table, .. } => {
                    (EntityId::Table(*table), LockMode::Exclusive)
                }
                _ => continue,
            };
            match wanted.iter_mut().find(|(e, _)| *e == entity) {
                Some((_, held)) if mode == LockMode::Exclusive => *held = LockMode::Exclusive,
                Some(_) => {}
                None => wanted.push((entity, mode)),
            }
        }
        wanted.sort_by_key(|(e, _)| *e);
        for (entity, mode) in wanted {
            self.locks
                .acquire(txn.id, entity, mode, self.config.lock_timeout)?;
        }
        Ok(())
    }

    /// Renders the routed physical plan of a query without executing it.
    pub fn explain(&self, txn: &Arc<Transaction>, sql: &str) -> Result<String> {
        let ast = parse(sql)?;
        let source = SourceMap::of(sql);
        let (param_ast, lifted) = ast.parameterize(0);
        let param_types: Vec<Type> = lifted.iter().map(|v| v.type_of()).collect();
        let (key_sql, _) = param_ast.canonicalize();
        let key = CacheKey::new(key_sql, param_types.clone());
        let snapshot = txn.snapshot();
        let plan =
            self.build_plan(txn, &snapshot, &param_ast, &param_types, &source, false, &key)?;
        Ok(plan.arena.explain(plan.root))
    }

    // ------------------------------------------------------------ DDL

    fn execute_ddl(&self, txn: &Arc<Transaction>, ast: &SqlAst, source: &SourceMap) -> Result<StatementResult> {
        // DDL resolves against the freshest catalog state, not the
        // transaction's snapshot.
        txn.refresh_snapshot(self.catalog.snapshot());
        let snapshot = txn.snapshot();
        let ns = self.default_namespace(&snapshot);
        let validated = Validator::new(&snapshot, ns, ns, &[], source).validate(ast)?;
        let BoundStatement::Ddl(ddl) = validated.into_statement() else {
            return Err(DbError::Other(anyhow::anyhow!("DDL statement bound to a non-DDL plan")));
        };

        self.locks
            .acquire(txn.id, EntityId::Schema, LockMode::Exclusive, self.config.lock_timeout)?;
        if let Some(table) = ddl_table(&ddl) {
            self.locks
                .acquire(txn.id, EntityId::Table(table), LockMode::Exclusive, self.config.lock_timeout)?;
        }

        self.apply_ddl(txn, &snapshot, ddl)?;
        txn.refresh_snapshot(self.catalog.snapshot());
        Ok(StatementResult::Ddl)
    }

    fn adapter_for_store(&self, store: Option<&str>) -> Result<Arc<dyn StoreAdapter>> {
        match store {
            Some(name) => self.adapters.by_name(name).ok_or_else(|| {
                DbError::Catalog(CatalogError::NotFound { kind: "store", name: name.to_string() })
            }),
            None => self
                .adapters
                .all()
                .into_iter()
                .min_by_key(|a| a.id())
                .ok_or_else(|| DbError::Other(anyhow::anyhow!("no store adapter deployed"))),
        }
    }

    fn apply_ddl(&self, txn: &Arc<Transaction>, snapshot: &Arc<Snapshot>, ddl: BoundDdl) -> Result<()> {
        match ddl {
            BoundDdl::CreateNamespace { name } => {
                self.catalog.create_namespace(&name, DataModel::Relational, false)?;
            }
            BoundDdl::DropNamespace { namespace } => {
                self.catalog.drop_namespace(namespace)?;
            }
            BoundDdl::CreateTable { namespace, name, columns, primary_key, unique, store } => {
                let adapter = self.adapter_for_store(store.as_deref())?;
                let table = self.catalog.create_table(namespace, &name, columns)?;
                let snap = self.catalog.snapshot();
                let ids = |names: &[String]| -> Result<Vec<ColumnId>> {
                    let t = snap.table(table)?;
                    let ns = snap.namespace(t.namespace_id)?;
                    names
                        .iter()
                        .map(|n| {
                            t.column_by_name(ns, n).map(|c| c.id).ok_or_else(|| {
                                CatalogError::NotFound { kind: "column", name: n.clone() }.into()
                            })
                        })
                        .collect()
                };
                if !primary_key.is_empty() {
                    self.catalog.add_primary_key(table, ids(&primary_key)?)?;
                }
                for u in &unique {
                    self.catalog.add_key(table, ids(std::slice::from_ref(u))?, KeyKind::Unique)?;
                }
                let all: Vec<ColumnId> = snap.table(table)?.columns.iter().map(|c| c.id).collect();
                self.catalog.add_placement(table, adapter.id(), all)?;
                let snap = self.catalog.snapshot();
                for allocation in snap.allocations_of_table(table) {
                    adapter.create_table(&snap, allocation.id)?;
                }
                txn.enlist(adapter.id());
                self.stats.record(table, 0);
            }
            BoundDdl::DropTable { table } => {
                for allocation in snapshot.allocations_of_table(table) {
                    let adapter = self.adapters.get(allocation.adapter_id)?;
                    adapter.drop_table(allocation.id)?;
                }
                self.catalog.drop_table(table)?;
                self.stats.forget(table);
            }
            BoundDdl::AddPlacement { table, columns, store } => {
                self.add_placement_with_data(txn, snapshot, table, columns, &store)?;
            }
            BoundDdl::DropPlacement { table, store } => {
                let adapter = self.adapter_for_store(Some(&store))?;
                let placement = snapshot
                    .placement_on(table, adapter.id())
                    .ok_or_else(|| CatalogError::NotFound {
                        kind: "placement",
                        name: store.clone(),
                    })?
                    .id;
                let allocations: Vec<_> = snapshot
                    .allocations_of_placement(placement)
                    .iter()
                    .map(|a| a.id)
                    .collect();
                self.catalog.drop_placement(table, adapter.id())?;
                for allocation in allocations {
                    adapter.drop_table(allocation)?;
                }
            }
            BoundDdl::PartitionBy { table, kind, column, qualifiers } => {
                let rows = self.read_table_rows(txn, table)?;
                let qualified: Vec<String> =
                    qualifiers.iter().map(|q| format!("{}:{q}", column.0)).collect();
                self.repartition(txn, snapshot, table, rows, |catalog| {
                    catalog.partition_table(table, kind, qualified.clone()).map(|_| ())
                })?;
            }
            BoundDdl::MergePartitions { table } => {
                let rows = self.read_table_rows(txn, table)?;
                self.repartition(txn, snapshot, table, rows, |catalog| {
                    catalog.merge_partitions(table).map(|_| ())
                })?;
            }
            BoundDdl::AddColumn { table, def } => {
                self.catalog.add_column(table, def)?;
                let snap = self.catalog.snapshot();
                let t = snap.table(table)?;
                let column = t.columns.last().expect("just added").id;
                for allocation in snap.allocations_of_table(table) {
                    let adapter = self.adapters.get(allocation.adapter_id)?;
                    let physical = snap
                        .physical(allocation.id)?
                        .columns
                        .iter()
                        .find(|c| c.logical_id == column)
                        .cloned();
                    if let Some(physical) = physical {
                        adapter.add_column(&snap, allocation.id, &physical)?;
                    }
                }
            }
            BoundDdl::DropColumn { table, column } => {
                // Capture the physical layout before the catalog forgets it.
                let old: Vec<_> = snapshot
                    .allocations_of_table(table)
                    .iter()
                    .filter_map(|a| {
                        let physical = snapshot
                            .physical(a.id)
                            .ok()?
                            .columns
                            .iter()
                            .find(|c| c.logical_id == column)
                            .cloned()?;
                        Some((a.id, a.adapter_id, physical))
                    })
                    .collect();
                self.catalog.drop_column(table, column)?;
                for (allocation, adapter_id, physical) in old {
                    self.adapters.get(adapter_id)?.drop_column(allocation, &physical)?;
                }
            }
            BoundDdl::RenameColumn { table, column, to } => {
                self.catalog.rename_column(table, column, &to)?;
            }
            BoundDdl::RenameTable { table, to } => {
                self.catalog.rename_table(table, &to)?;
            }
        }
        Ok(())
    }

    /// `ADD PLACEMENT (cols) ON STORE s`: the listed columns move to the new
    /// placement (the primary key is replicated automatically), existing
    /// data is copied over before the statement returns, and the columns
    /// leave the placements that previously hosted them.
    fn add_placement_with_data(
        &self,
        txn: &Arc<Transaction>,
        old_snapshot: &Arc<Snapshot>,
        table: TableId,
        columns: Vec<ColumnId>,
        store: &str,
    ) -> Result<()> {
        let adapter = self.adapter_for_store(Some(store))?;
        let rows = self.read_table_rows(txn, table)?;
        let pk = old_snapshot.primary_key_columns(table);
        let moved: Vec<ColumnId> =
            columns.iter().filter(|c| !pk.contains(c)).copied().collect();

        // Old hosts of the moving columns, captured before the mutation.
        let old_hosts: Vec<(polystore_primitives::PlacementId, AdapterId, ColumnId)> = old_snapshot
            .placements_of(table)
            .iter()
            .flat_map(|p| {
                old_snapshot
                    .placement_columns(p.id)
                    .iter()
                    .filter(|c| moved.contains(&c.column_id))
                    .map(|c| (p.id, p.adapter_id, c.column_id))
                    .collect::<Vec<_>>()
            })
            .collect();

        self.catalog.add_placement(table, adapter.id(), columns)?;
        let snap = self.catalog.snapshot();
        let placement = snap
            .placement_on(table, adapter.id())
            .expect("placement just added")
            .id;
        for allocation in snap.allocations_of_placement(placement) {
            adapter.create_table(&snap, allocation.id)?;
        }
        txn.enlist(adapter.id());

        // Copy the hosted columns of every existing row onto the new store.
        self.insert_into_placement(txn, &snap, table, placement, &rows)?;

        // And move the columns off their previous hosts.
        for (old_placement, old_adapter, column) in old_hosts {
            let old_physicals: Vec<_> = old_snapshot
                .allocations_of_placement(old_placement)
                .iter()
                .filter_map(|a| {
                    old_snapshot
                        .physical(a.id)
                        .ok()?
                        .columns
                        .iter()
                        .find(|c| c.logical_id == column)
                        .cloned()
                        .map(|p| (a.id, p))
                })
                .collect();
            self.catalog.remove_placement_column(old_placement, column)?;
            let store_adapter = self.adapters.get(old_adapter)?;
            for (allocation, physical) in old_physicals {
                store_adapter.drop_column(allocation, &physical)?;
            }
        }
        Ok(())
    }

    /// Replaces the partition layout via `mutate`, then redistributes the
    /// saved rows into the new allocations.
    fn repartition(
        &self,
        txn: &Arc<Transaction>,
        old_snapshot: &Arc<Snapshot>,
        table: TableId,
        rows: Vec<Row>,
        mutate: impl FnOnce(&Catalog) -> std::result::Result<(), CatalogError>,
    ) -> Result<()> {
        let old_allocs: Vec<(polystore_primitives::AllocationId, AdapterId)> = old_snapshot
            .allocations_of_table(table)
            .iter()
            .map(|a| (a.id, a.adapter_id))
            .collect();
        mutate(&self.catalog)?;
        let snap = self.catalog.snapshot();
        for placement in snap.placements_of(table) {
            let adapter = self.adapters.get(placement.adapter_id)?;
            for allocation in snap.allocations_of_placement(placement.id) {
                adapter.create_table(&snap, allocation.id)?;
            }
            txn.enlist(placement.adapter_id);
            self.insert_into_placement(txn, &snap, table, placement.id, &rows)?;
        }
        for (allocation, adapter_id) in old_allocs {
            self.adapters.get(adapter_id)?.drop_table(allocation)?;
        }
        Ok(())
    }

    fn insert_into_placement(
        &self,
        txn: &Arc<Transaction>,
        snapshot: &Arc<Snapshot>,
        table: TableId,
        placement: polystore_primitives::PlacementId,
        rows: &[Row],
    ) -> Result<()> {
        crate::exec::insert_rows_into_placement(
            snapshot,
            &self.adapters,
            txn.id,
            table,
            placement,
            rows,
        )
    }

    /// Reads the full logical content of a table through the normal routed
    /// read path, inside the caller's transaction.
    fn read_table_rows(&self, txn: &Arc<Transaction>, table: TableId) -> Result<Vec<Row>> {
        let snapshot = txn.snapshot();
        let t = snapshot.table(table)?;
        if snapshot.placements_of(table).is_empty() {
            return Ok(Vec::new());
        }
        let mut arena = AlgArena::new();
        let scan = arena.add(
            AlgNodeKind::Scan { table, row: t.row_type() },
            [],
            TraitSet::logical(),
        )?;
        let routed = Router::new(&snapshot, &self.adapters, txn).route(&mut arena, scan)?;
        let pipeline = build_pipeline(&arena, routed, &self.adapters)?;
        let ctx = ExecCtx {
            txn: txn.clone(),
            snapshot: snapshot.clone(),
            adapters: self.adapters.clone(),
            params: Arc::new(Vec::new()),
            exchange_capacity: self.config.exchange_capacity,
        };
        Cursor::new(pipeline, ctx).fetch_all()
    }
}

fn ddl_table(ddl: &BoundDdl) -> Option<TableId> {
    match ddl {
        BoundDdl::DropTable { table }
        | BoundDdl::AddPlacement { table, .. }
        | BoundDdl::DropPlacement { table, .. }
        | BoundDdl::PartitionBy { table, .. }
        | BoundDdl::MergePartitions { table }
        | BoundDdl::AddColumn { table, .. }
        | BoundDdl::DropColumn { table, .. }
        | BoundDdl::RenameColumn { table, .. }
        | BoundDdl::RenameTable { table, .. } => Some(*table),
        _ => None,
    }
}
