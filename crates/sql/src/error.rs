use crate::SourcePos;
use polystore_algebra::AlgebraError;
use polystore_catalog::CatalogError;
use polystore_types::TypeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SqlError {
    #[error("Parse error at {pos}: {message}")]
    Parse { message: String, pos: SourcePos },
    #[error("Validation error at {pos}: {message}")]
    Validation { message: String, pos: SourcePos },
    #[error("Unknown table `{name}` at {pos}")]
    UnknownTable { name: String, pos: SourcePos },
    #[error("Unknown column `{name}` at {pos}")]
    UnknownColumn { name: String, pos: SourcePos },
    #[error("Column `{name}` is ambiguous at {pos}")]
    AmbiguousColumn { name: String, pos: SourcePos },
    #[error("No overload of `{name}` accepts ({operands}) at {pos}")]
    NoMatchingOverload {
        name: String,
        operands: String,
        pos: SourcePos,
    },
    #[error("Statement must be validated before conversion")]
    ValidationRequired,
    #[error("Unsupported SQL feature: {0}")]
    Unsupported(String),
    #[error("Type error at {pos}: {source}")]
    TypeAt { source: TypeError, pos: SourcePos },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Algebra(#[from] AlgebraError),
}

impl SqlError {
    pub fn parse(message: impl Into<String>, pos: SourcePos) -> Self {
        SqlError::Parse { message: message.into(), pos }
    }

    pub fn validation(message: impl Into<String>, pos: SourcePos) -> Self {
        SqlError::Validation { message: message.into(), pos }
    }

    /// The source region, when this error carries one.
    pub fn pos(&self) -> Option<SourcePos> {
        match self {
            SqlError::Parse { pos, .. }
            | SqlError::Validation { pos, .. }
            | SqlError::UnknownTable { pos, .. }
            | SqlError::UnknownColumn { pos, .. }
            | SqlError::AmbiguousColumn { pos, .. }
            | SqlError::NoMatchingOverload { pos, .. }
            | SqlError::TypeAt { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}

impl From<TypeError> for SqlError {
    fn from(source: TypeError) -> Self {
        SqlError::TypeAt { source, pos: SourcePos::START }
    }
}
