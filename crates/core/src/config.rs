use std::time::Duration;

/// Tunables of one database instance. Plain data; the embedding process
/// decides where the values come from.
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub default_namespace: String,
    pub plan_cache_size: usize,
    pub impl_cache_size: usize,
    /// Whether DML plans participate in the caches.
    pub cache_dml: bool,
    pub lock_timeout: Duration,
    pub max_deadlock_retries: u32,
    /// Exchange channel capacity, in batches.
    pub exchange_capacity: usize,
    pub planner_iteration_budget: usize,
    pub join_iterations: usize,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            default_namespace: "public".into(),
            plan_cache_size: 128,
            impl_cache_size: 128,
            cache_dml: false,
            lock_timeout: Duration::from_secs(5),
            max_deadlock_retries: 3,
            exchange_capacity: 4,
            planner_iteration_budget: 2_000,
            join_iterations: 16,
        }
    }
}

/// Rows per exchange batch.
pub const EXCHANGE_BATCH: usize = 256;

/// Tight operator loops re-check cancellation every this many rows.
pub const CANCEL_CHECK_INTERVAL: usize = 1_000;
