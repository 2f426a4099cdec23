use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown id `{0}` for {1}")]
    UnknownId(u64, &'static str),
    #[error("{kind} with name `{name}` not found")]
    NotFound { kind: &'static str, name: String },
    #[error("{kind} with name `{name}` already exists")]
    AlreadyExists { kind: &'static str, name: String },
    #[error("Catalog invariant violated: {0}")]
    InvariantViolated(String),
    #[error("Ambiguous reference `{0}`")]
    AmbiguousReference(String),
    #[error("Corrupt catalog image: {0}")]
    Corrupt(String),
    #[error("Physical name `{0}` does not match the generated-name pattern")]
    BadPhysicalName(String),
}

impl CatalogError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        CatalogError::InvariantViolated(msg.into())
    }
}
