//! The polystore core.
//!
//! One logical database whose tables may be placed, column- and
//! partition-wise, across several backend stores. This crate ties the
//! frontend, optimizer and catalog together: the [`router`] binds logical
//! scans and writes to concrete allocations, the [`exec`] pipeline pulls
//! rows through adapter cursors, the [`txn`] layer wraps every request in a
//! transaction with entity locks and two-phase commit, and [`PolyDb`] is the
//! facade the outside world talks to.

pub mod adapter;
pub mod config;
mod db;
pub mod error;
pub mod exec;
pub mod router;
mod stats;
pub mod txn;

pub use config::DbConfig;
pub use db::{CachedPlan, PolyDb, StatementResult};
pub use error::{AdapterError, DbError, ErrorKind, Result, RouteError, TxnError};
pub use stats::RowStats;
