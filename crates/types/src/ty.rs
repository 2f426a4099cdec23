use crate::{TypeError, TypeFamily};
use core::fmt;
use itertools::Itertools;

/// Maximum precision of `DECIMAL`, and the cap applied when combining
/// precisions in arithmetic.
pub const MAX_NUMERIC_PRECISION: u32 = 38;
/// Maximum fractional-seconds precision of datetime types.
pub const MAX_DATETIME_PRECISION: u32 = 9;

/// The tag of a [`Type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolyType {
    Boolean,
    TinyInt,
    SmallInt,
    Integer,
    BigInt,
    Decimal,
    Real,
    Double,
    Char,
    VarChar,
    Date,
    Time,
    Timestamp,
    IntervalYearMonth,
    IntervalDaySecond,
    Array,
    Multiset,
    Row,
    Any,
    Null,
}

impl PolyType {
    pub fn family(self) -> TypeFamily {
        match self {
            PolyType::Boolean => TypeFamily::Boolean,
            PolyType::TinyInt
            | PolyType::SmallInt
            | PolyType::Integer
            | PolyType::BigInt
            | PolyType::Decimal
            | PolyType::Real
            | PolyType::Double => TypeFamily::Numeric,
            PolyType::Char | PolyType::VarChar => TypeFamily::Character,
            PolyType::Date | PolyType::Time | PolyType::Timestamp => TypeFamily::Datetime,
            PolyType::IntervalYearMonth => TypeFamily::IntervalYearMonth,
            PolyType::IntervalDaySecond => TypeFamily::IntervalDaySecond,
            PolyType::Array => TypeFamily::Array,
            PolyType::Multiset => TypeFamily::Multiset,
            PolyType::Row => TypeFamily::Row,
            PolyType::Any => TypeFamily::Any,
            PolyType::Null => TypeFamily::Null,
        }
    }

    /// Position on the numeric widening ladder; wider types lose nothing when
    /// receiving narrower ones. Non-numerics return `None`.
    fn numeric_rank(self) -> Option<u8> {
        Some(match self {
            PolyType::TinyInt => 0,
            PolyType::SmallInt => 1,
            PolyType::Integer => 2,
            PolyType::BigInt => 3,
            PolyType::Decimal => 4,
            PolyType::Real => 5,
            PolyType::Double => 6,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Charset {
    Utf8,
    Latin1,
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "LATIN-1",
        })
    }
}

/// How strongly a collation binds in dyadic operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Coercibility {
    None,
    Coercible,
    Implicit,
    Explicit,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Collation {
    pub name: Box<str>,
    pub coercibility: Coercibility,
}

impl Collation {
    pub fn implicit(name: &str) -> Self {
        Self {
            name: name.into(),
            coercibility: Coercibility::Implicit,
        }
    }

    /// Standard dyadic combination: the higher coercibility wins; equal
    /// implicit collations with different names conflict; two coercible or
    /// no-collation operands fall back to no collation.
    pub fn combine(lhs: Option<&Collation>, rhs: Option<&Collation>) -> Result<Option<Collation>, TypeError> {
        match (lhs, rhs) {
            (None, other) | (other, None) => Ok(other.cloned()),
            (Some(a), Some(b)) => match a.coercibility.cmp(&b.coercibility) {
                core::cmp::Ordering::Greater => Ok(Some(a.clone())),
                core::cmp::Ordering::Less => Ok(Some(b.clone())),
                core::cmp::Ordering::Equal if a.name == b.name => Ok(Some(a.clone())),
                core::cmp::Ordering::Equal if a.coercibility <= Coercibility::Coercible => Ok(None),
                core::cmp::Ordering::Equal => {
                    Err(TypeError::CollationConflict(a.name.to_string(), b.name.to_string()))
                }
            },
        }
    }
}

/// A named, typed field of a row type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Box<str>,
    pub ty: Type,
}

impl Field {
    pub fn new(name: impl Into<Box<str>>, ty: Type) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A fully resolved SQL type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Type {
    pub tag: PolyType,
    pub nullable: bool,
    /// Decimal precision, char/varchar length, or datetime fractional
    /// precision, depending on the tag.
    pub precision: Option<u32>,
    /// Decimal scale.
    pub scale: Option<u32>,
    pub charset: Option<Charset>,
    pub collation: Option<Collation>,
    /// Element type of arrays and multisets.
    pub element: Option<Box<Type>>,
    /// Fields of row types.
    pub fields: Vec<Field>,
}

impl Type {
    pub fn of(tag: PolyType) -> Self {
        let charset = matches!(tag.family(), TypeFamily::Character).then_some(Charset::Utf8);
        let collation = charset.is_some().then(|| Collation::implicit("default"));
        Self {
            tag,
            nullable: false,
            precision: None,
            scale: None,
            charset,
            collation,
            element: None,
            fields: Vec::new(),
        }
    }

    pub fn integer() -> Self {
        Type::of(PolyType::Integer)
    }

    pub fn bigint() -> Self {
        Type::of(PolyType::BigInt)
    }

    pub fn double() -> Self {
        Type::of(PolyType::Double)
    }

    pub fn boolean() -> Self {
        Type::of(PolyType::Boolean)
    }

    pub fn varchar(len: u32) -> Self {
        Type::of(PolyType::VarChar).with_precision(len)
    }

    pub fn decimal(precision: u32, scale: u32) -> Self {
        Type::of(PolyType::Decimal)
            .with_precision(precision.min(MAX_NUMERIC_PRECISION))
            .with_scale(scale)
    }

    /// An untyped NULL; coercible to anything and always nullable.
    pub fn null() -> Self {
        Type::of(PolyType::Null).with_nullable(true)
    }

    pub fn any() -> Self {
        Type::of(PolyType::Any).with_nullable(true)
    }

    pub fn row(fields: Vec<Field>) -> Self {
        let mut ty = Type::of(PolyType::Row);
        ty.fields = fields;
        ty
    }

    pub fn array(element: Type) -> Self {
        let mut ty = Type::of(PolyType::Array);
        ty.element = Some(Box::new(element));
        ty
    }

    pub fn multiset(element: Type) -> Self {
        let mut ty = Type::of(PolyType::Multiset);
        ty.element = Some(Box::new(element));
        ty
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }

    pub fn with_collation(mut self, collation: Collation) -> Self {
        self.collation = Some(collation);
        self
    }

    /// Validates tag-specific detail. Datetime fractional precision is capped
    /// at [`MAX_DATETIME_PRECISION`].
    pub fn check(&self) -> Result<(), TypeError> {
        if matches!(self.tag.family(), TypeFamily::Datetime) {
            if let Some(p) = self.precision {
                if p > MAX_DATETIME_PRECISION {
                    return Err(TypeError::PrecisionOutOfRange(p));
                }
            }
        }
        Ok(())
    }

    pub fn family(&self) -> TypeFamily {
        self.tag.family()
    }

    pub fn is_numeric(&self) -> bool {
        self.family() == TypeFamily::Numeric
    }

    pub fn is_character(&self) -> bool {
        self.family() == TypeFamily::Character
    }

    pub fn is_null(&self) -> bool {
        self.tag == PolyType::Null
    }

    /// Whether a value of `source` can be stored into `self` without an
    /// explicit cast: same family (numeric widening allowed), and a nullable
    /// source needs a nullable target.
    pub fn assignable_from(&self, source: &Type) -> bool {
        if source.is_null() {
            return self.nullable;
        }
        if source.nullable && !self.nullable {
            return false;
        }
        if !self.family().accepts(source.family()) {
            return false;
        }
        match (self.tag.numeric_rank(), source.tag.numeric_rank()) {
            (Some(t), Some(s)) => t >= s,
            _ => true,
        }
    }

    /// Row types concatenate for two-input operators.
    pub fn concat_rows(left: &Type, right: &Type) -> Type {
        debug_assert_eq!(left.tag, PolyType::Row);
        debug_assert_eq!(right.tag, PolyType::Row);
        let mut fields = left.fields.clone();
        fields.extend(right.fields.iter().cloned());
        Type::row(fields)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            PolyType::Decimal => write!(
                f,
                "DECIMAL({}, {})",
                self.precision.unwrap_or(MAX_NUMERIC_PRECISION),
                self.scale.unwrap_or(0)
            )?,
            PolyType::VarChar => write!(f, "VARCHAR({})", self.precision.unwrap_or(0))?,
            PolyType::Char => write!(f, "CHAR({})", self.precision.unwrap_or(1))?,
            PolyType::Row => write!(f, "ROW({})", self.fields.iter().map(|x| format!("{}: {}", x.name, x.ty)).join(", "))?,
            PolyType::Array => write!(f, "{} ARRAY", self.element.as_deref().map(|e| e.to_string()).unwrap_or_default())?,
            tag => write!(f, "{tag:?}")?,
        }
        if self.nullable {
            write!(f, " NULL")?;
        }
        Ok(())
    }
}

/// The decimal type produced by `DECIMAL(p1, s1) + DECIMAL(p2, s2)` per the
/// SQL standard, with the precision capped at [`MAX_NUMERIC_PRECISION`].
pub(crate) fn decimal_addition_type(lhs: &Type, rhs: &Type) -> Type {
    let (p1, s1) = (lhs.precision.unwrap_or(MAX_NUMERIC_PRECISION), lhs.scale.unwrap_or(0));
    let (p2, s2) = (rhs.precision.unwrap_or(MAX_NUMERIC_PRECISION), rhs.scale.unwrap_or(0));
    let scale = s1.max(s2);
    let precision = ((p1 - s1).max(p2 - s2) + scale + 1).min(MAX_NUMERIC_PRECISION);
    Type::decimal(precision, scale).with_nullable(lhs.nullable || rhs.nullable)
}

/// The least restrictive type all of `types` coerce to, or
/// `TypeError::NoCommonType`. Nullability is OR-ed; `NULL` coerces to any
/// family and `ANY` absorbs everything.
pub fn least_restrictive(types: &[Type]) -> Result<Type, TypeError> {
    let mut iter = types.iter();
    let first = iter.next().ok_or_else(|| TypeError::NoCommonType("<empty>".into()))?;
    let mut acc = first.clone();
    for ty in iter {
        acc = least_restrictive_pair(&acc, ty)?;
    }
    acc.check()?;
    Ok(acc)
}

fn least_restrictive_pair(lhs: &Type, rhs: &Type) -> Result<Type, TypeError> {
    let nullable = lhs.nullable || rhs.nullable;
    if lhs.is_null() {
        return Ok(rhs.clone().with_nullable(true));
    }
    if rhs.is_null() {
        return Ok(lhs.clone().with_nullable(true));
    }
    if lhs.tag == PolyType::Any || rhs.tag == PolyType::Any {
        return Ok(Type::any());
    }
    if lhs.family() != rhs.family() {
        return Err(TypeError::NoCommonType(format!("{lhs} vs {rhs}")));
    }
    match lhs.family() {
        TypeFamily::Numeric => {
            let (wide, narrow) = if lhs.tag.numeric_rank() >= rhs.tag.numeric_rank() {
                (lhs, rhs)
            } else {
                (rhs, lhs)
            };
            if wide.tag == PolyType::Decimal {
                // Widening an exact type keeps exactness: merge precisions.
                Ok(decimal_addition_type(
                    &as_decimal(narrow),
                    &as_decimal(wide),
                ))
            } else {
                Ok(wide.clone().with_nullable(nullable))
            }
        }
        TypeFamily::Character => {
            match (lhs.charset, rhs.charset) {
                (Some(a), Some(b)) if a != b => {
                    return Err(TypeError::CharsetMismatch(a.to_string(), b.to_string()))
                }
                _ => {}
            }
            let collation = Collation::combine(lhs.collation.as_ref(), rhs.collation.as_ref())?;
            let len = lhs.precision.unwrap_or(0).max(rhs.precision.unwrap_or(0));
            let mut out = Type::varchar(len).with_nullable(nullable);
            out.collation = collation;
            out.charset = lhs.charset.or(rhs.charset);
            Ok(out)
        }
        TypeFamily::Datetime | TypeFamily::IntervalYearMonth | TypeFamily::IntervalDaySecond => {
            if lhs.tag != rhs.tag {
                return Err(TypeError::NoCommonType(format!("{lhs} vs {rhs}")));
            }
            let precision = match (lhs.precision, rhs.precision) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (p, None) | (None, p) => p,
            };
            let mut out = lhs.clone().with_nullable(nullable);
            out.precision = precision;
            Ok(out)
        }
        TypeFamily::Array | TypeFamily::Multiset => {
            let (le, re) = (lhs.element.as_deref(), rhs.element.as_deref());
            match (le, re) {
                (Some(a), Some(b)) => {
                    let element = least_restrictive_pair(a, b)?;
                    let mut out = lhs.clone().with_nullable(nullable);
                    out.element = Some(Box::new(element));
                    Ok(out)
                }
                _ => Err(TypeError::NoCommonType(format!("{lhs} vs {rhs}"))),
            }
        }
        TypeFamily::Row => {
            if lhs.fields.len() != rhs.fields.len() {
                return Err(TypeError::NoCommonType(format!("{lhs} vs {rhs}")));
            }
            let fields = lhs
                .fields
                .iter()
                .zip(&rhs.fields)
                .map(|(a, b)| Ok(Field::new(a.name.clone(), least_restrictive_pair(&a.ty, &b.ty)?)))
                .collect::<Result<Vec<_>, TypeError>>()?;
            Ok(Type::row(fields).with_nullable(nullable))
        }
        TypeFamily::Boolean => Ok(Type::boolean().with_nullable(nullable)),
        TypeFamily::Any | TypeFamily::Null => Ok(Type::any()),
    }
}

fn as_decimal(ty: &Type) -> Type {
    if ty.tag == PolyType::Decimal {
        return ty.clone();
    }
    // Integer widths as (p, 0) decimals for precision merging.
    let p = match ty.tag {
        PolyType::TinyInt => 3,
        PolyType::SmallInt => 5,
        PolyType::Integer => 10,
        PolyType::BigInt => 19,
        _ => MAX_NUMERIC_PRECISION,
    };
    Type::decimal(p, 0).with_nullable(ty.nullable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decimal_addition_follows_the_standard() {
        let out = decimal_addition_type(&Type::decimal(10, 2), &Type::decimal(8, 4));
        assert_eq!((out.precision, out.scale), (Some(13), Some(4)));
    }

    #[test]
    fn decimal_addition_caps_precision() {
        let out = decimal_addition_type(&Type::decimal(38, 10), &Type::decimal(38, 2));
        assert_eq!((out.precision, out.scale), (Some(38), Some(10)));
    }

    #[test]
    fn least_restrictive_widens_integers() {
        let out = least_restrictive(&[Type::integer(), Type::bigint().with_nullable(true)]).unwrap();
        assert_eq!(out.tag, PolyType::BigInt);
        assert!(out.nullable);
    }

    #[test]
    fn least_restrictive_rejects_cross_family() {
        let err = least_restrictive(&[Type::integer(), Type::varchar(8)]).unwrap_err();
        assert!(matches!(err, TypeError::NoCommonType(_)));
    }

    #[test]
    fn null_coerces_to_any_family() {
        let out = least_restrictive(&[Type::null(), Type::varchar(4)]).unwrap();
        assert_eq!(out.tag, PolyType::VarChar);
        assert!(out.nullable);
    }

    #[test]
    fn datetime_precision_is_bounded() {
        let err = least_restrictive(&[
            Type::of(PolyType::Timestamp).with_precision(12),
            Type::of(PolyType::Timestamp),
        ])
        .unwrap_err();
        assert_eq!(err, TypeError::PrecisionOutOfRange(12));
    }

    #[test]
    fn implicit_collation_conflict_reports() {
        let a = Type::varchar(4).with_collation(Collation::implicit("de_DE"));
        let b = Type::varchar(4).with_collation(Collation::implicit("en_US"));
        let err = least_restrictive(&[a, b]).unwrap_err();
        assert!(matches!(err, TypeError::CollationConflict(..)));
    }

    #[test]
    fn explicit_collation_wins() {
        let mut a = Type::varchar(4);
        a.collation = Some(Collation {
            name: "de_DE".into(),
            coercibility: Coercibility::Explicit,
        });
        let b = Type::varchar(4).with_collation(Collation::implicit("en_US"));
        let out = least_restrictive(&[a, b]).unwrap();
        assert_eq!(out.collation.unwrap().name.as_ref(), "de_DE");
    }
}
