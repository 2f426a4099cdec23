//! SQL data types, type families, coercion rules and runtime values.
//!
//! A [`Type`] is a [`PolyType`] tag plus nullability and tag-specific detail
//! (precision/scale, charset/collation, element or field types). Types group
//! into [`TypeFamily`]s for coercion; [`least_restrictive`] is defined on
//! families and fails loudly rather than widening silently.

mod error;
mod family;
mod ty;
mod value;

pub use error::TypeError;
pub use family::TypeFamily;
pub use ty::{
    least_restrictive, Charset, Coercibility, Collation, Field, PolyType, Type,
    MAX_DATETIME_PRECISION, MAX_NUMERIC_PRECISION,
};
pub use value::PolyValue;
