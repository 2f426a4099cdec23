use polystore_algebra::AlgebraError;
use polystore_catalog::CatalogError;
use polystore_planner::PlanError;
use polystore_primitives::AdapterId;
use polystore_sql::SqlError;
use polystore_types::TypeError;
use thiserror::Error;

/// Stable machine-readable classification, carried by every error surfaced
/// at the transaction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Validation,
    UnknownId,
    AmbiguousReference,
    CatalogInvariantViolated,
    TypeMismatch,
    Overflow,
    PrecisionOutOfRange,
    NoMatchingOverload,
    NoPlanFound,
    NoPlacementCoversColumns,
    UnsupportedCrossStoreOperator,
    Adapter,
    Deadlock,
    LockTimeout,
    Cancelled,
    TransactionTimeout,
    CommitAborted,
    PartialCommitFailed,
    Internal,
}

#[derive(Error, Debug)]
pub enum RouteError {
    #[error("No placement combination covers the required columns of table {table}")]
    NoPlacementCoversColumns { table: polystore_primitives::TableId },
    #[error("Operator `{op}` cannot run on any involved store and has no coordinator fallback")]
    UnsupportedCrossStoreOperator { op: &'static str },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

#[derive(Error, Debug)]
pub enum TxnError {
    #[error("Deadlock detected while waiting for {0}")]
    Deadlock(String),
    #[error("Lock wait on {0} timed out")]
    LockTimeout(String),
    #[error("Cancelled")]
    Cancelled,
    #[error("Transaction deadline exceeded")]
    Timeout,
    #[error("Commit aborted: {0}")]
    CommitAborted(String),
    #[error("Transaction is not active")]
    NotActive,
}

#[derive(Error, Debug)]
#[error("Adapter {adapter} failed: {source}")]
pub struct AdapterError {
    pub adapter: AdapterId,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Sql(#[from] SqlError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error(transparent)]
    Txn(#[from] TxnError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error("Unknown prepared statement `{0}`")]
    UnknownPrepared(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DbError::Sql(e) => match e {
                SqlError::Parse { .. } => ErrorKind::Parse,
                SqlError::AmbiguousColumn { .. } => ErrorKind::AmbiguousReference,
                SqlError::NoMatchingOverload { .. } => ErrorKind::NoMatchingOverload,
                SqlError::TypeAt { source, .. } => type_kind(source),
                SqlError::Catalog(c) => catalog_kind(c),
                SqlError::Algebra(_) => ErrorKind::TypeMismatch,
                _ => ErrorKind::Validation,
            },
            DbError::Catalog(c) => catalog_kind(c),
            DbError::Type(t) => type_kind(t),
            DbError::Algebra(_) => ErrorKind::TypeMismatch,
            DbError::Plan(_) => ErrorKind::NoPlanFound,
            DbError::Route(RouteError::NoPlacementCoversColumns { .. }) => {
                ErrorKind::NoPlacementCoversColumns
            }
            DbError::Route(RouteError::UnsupportedCrossStoreOperator { .. }) => {
                ErrorKind::UnsupportedCrossStoreOperator
            }
            DbError::Route(_) => ErrorKind::Internal,
            DbError::Txn(TxnError::Deadlock(_)) => ErrorKind::Deadlock,
            DbError::Txn(TxnError::LockTimeout(_)) => ErrorKind::LockTimeout,
            DbError::Txn(TxnError::Cancelled) => ErrorKind::Cancelled,
            DbError::Txn(TxnError::Timeout) => ErrorKind::TransactionTimeout,
            DbError::Txn(TxnError::CommitAborted(_)) => ErrorKind::CommitAborted,
            DbError::Txn(TxnError::NotActive) => ErrorKind::Internal,
            DbError::Adapter(_) => ErrorKind::Adapter,
            DbError::UnknownPrepared(_) => ErrorKind::Validation,
            DbError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the statement may be retried after rollback.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Deadlock)
    }
}

fn type_kind(e: &TypeError) -> ErrorKind {
    match e {
        TypeError::Overflow(_) => ErrorKind::Overflow,
        TypeError::PrecisionOutOfRange(_) => ErrorKind::PrecisionOutOfRange,
        _ => ErrorKind::TypeMismatch,
    }
}

fn catalog_kind(e: &CatalogError) -> ErrorKind {
    match e {
        CatalogError::UnknownId(..) | CatalogError::NotFound { .. } => ErrorKind::UnknownId,
        CatalogError::AmbiguousReference(_) => ErrorKind::AmbiguousReference,
        _ => ErrorKind::CatalogInvariantViolated,
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
