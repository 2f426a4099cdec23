use parking_lot::Mutex;
use polystore_algebra::StatsSource;
use polystore_primitives::TableId;
use rustc_hash::FxHashMap;

/// Table cardinalities maintained by the DML path; the optimizer's cost
/// model reads them. Deliberately not part of the catalog: row counts change
/// on every write and must not invalidate cached plans.
#[derive(Default)]
pub struct RowStats {
    counts: Mutex<FxHashMap<TableId, i64>>,
}

impl RowStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, table: TableId, delta: i64) {
        let mut counts = self.counts.lock();
        let n = counts.entry(table).or_insert(0);
        *n = (*n + delta).max(0);
    }

    pub fn forget(&self, table: TableId) {
        self.counts.lock().remove(&table);
    }

    pub fn get(&self, table: TableId) -> Option<i64> {
        self.counts.lock().get(&table).copied()
    }
}

impl StatsSource for RowStats {
    fn row_count(&self, table: TableId) -> Option<f64> {
        self.get(table).map(|n| n as f64)
    }
}
