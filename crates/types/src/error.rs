use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("No common type for `{0}`")]
    NoCommonType(String),
    #[error("Type mismatch: expected `{expected}`, found `{found}`")]
    Mismatch { expected: String, found: String },
    #[error("Numeric overflow in `{0}`")]
    Overflow(String),
    #[error("Precision `{0}` out of range, datetime precision must be <= 9")]
    PrecisionOutOfRange(u32),
    #[error("Cannot combine character values with charsets `{0}` and `{1}`")]
    CharsetMismatch(String, String),
    #[error("Collation conflict between `{0}` and `{1}`")]
    CollationConflict(String, String),
    #[error("Division by zero")]
    DivisionByZero,
    #[error("Cannot cast `{from}` to `{to}`")]
    InvalidCast { from: String, to: String },
}
