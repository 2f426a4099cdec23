//! The SQL frontend.
//!
//! [`parse`] turns statement text into a language-neutral tree, the
//! [`Validator`] resolves and types it against a catalog snapshot, and the
//! [`Converter`] lowers the validated result onto the algebra builder.

mod ast;
mod convert;
mod error;
mod parser;
mod pos;
mod validate;

#[cfg(test)]
mod tests;

pub use ast::{
    AlterAction, BinaryOp, ColumnDefAst, ExprAst, JoinKindAst, ObjectNameAst, OrderItem,
    PartitionSpecAst, QueryAst, QueryBody, SelectAst, SelectItemAst, SqlAst, TableRefAst,
};
pub use convert::Converter;
pub use error::SqlError;
pub use parser::parse;
pub use pos::{SourceMap, SourcePos};
pub use validate::{
    BoundBody, BoundDdl, BoundOrder, BoundQuery, BoundSelect, BoundStatement, BoundTable,
    Validated, Validator,
};
