use core::fmt;

/// Groups of types that coerce among each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeFamily {
    Boolean,
    Numeric,
    Character,
    Datetime,
    IntervalYearMonth,
    IntervalDaySecond,
    Array,
    Multiset,
    Row,
    /// The polymorphic `Any` family absorbs every other family.
    Any,
    /// The family of the untyped `NULL` literal, coercible to any family.
    Null,
}

impl TypeFamily {
    /// Whether a value of family `other` may appear where `self` is required,
    /// before any explicit cast.
    pub fn accepts(self, other: TypeFamily) -> bool {
        self == other || matches!(self, TypeFamily::Any) || matches!(other, TypeFamily::Null | TypeFamily::Any)
    }
}

impl fmt::Display for TypeFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TypeFamily::Boolean => "BOOLEAN",
            TypeFamily::Numeric => "NUMERIC",
            TypeFamily::Character => "CHARACTER",
            TypeFamily::Datetime => "DATETIME",
            TypeFamily::IntervalYearMonth => "INTERVAL_YEAR_MONTH",
            TypeFamily::IntervalDaySecond => "INTERVAL_DAY_SECOND",
            TypeFamily::Array => "ARRAY",
            TypeFamily::Multiset => "MULTISET",
            TypeFamily::Row => "ROW",
            TypeFamily::Any => "ANY",
            TypeFamily::Null => "NULL",
        };
        f.write_str(name)
    }
}
