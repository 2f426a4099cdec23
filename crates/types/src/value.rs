use crate::ty::decimal_addition_type;
use crate::{PolyType, Type, TypeError};
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use itertools::Itertools;

/// A runtime value.
///
/// Integer widths share one representation; the [`Type`] attached to the
/// producing expression carries the width. Floats order and hash by their bit
/// pattern so values can serve as grouping keys.
#[derive(Debug, Clone)]
pub enum PolyValue {
    Bool(bool),
    Int(i64),
    /// Mantissa and scale: `1234, 2` is `12.34`.
    Decimal(i128, u32),
    Float(f64),
    Str(Box<str>),
    /// Days since the epoch.
    Date(i32),
    /// Nanoseconds since midnight.
    Time(i64),
    /// Microseconds since the epoch.
    Timestamp(i64),
    /// Months.
    IntervalYm(i32),
    /// Milliseconds.
    IntervalDs(i64),
    Array(Vec<PolyValue>),
    Row(Vec<PolyValue>),
    Null,
}

impl PolyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PolyValue::Null)
    }

    pub fn type_of(&self) -> Type {
        match self {
            PolyValue::Bool(_) => Type::boolean(),
            PolyValue::Int(_) => Type::bigint(),
            PolyValue::Decimal(_, scale) => Type::decimal(crate::MAX_NUMERIC_PRECISION, *scale),
            PolyValue::Float(_) => Type::double(),
            PolyValue::Str(s) => Type::varchar(s.chars().count() as u32),
            PolyValue::Date(_) => Type::of(PolyType::Date),
            PolyValue::Time(_) => Type::of(PolyType::Time),
            PolyValue::Timestamp(_) => Type::of(PolyType::Timestamp),
            PolyValue::IntervalYm(_) => Type::of(PolyType::IntervalYearMonth),
            PolyValue::IntervalDs(_) => Type::of(PolyType::IntervalDaySecond),
            PolyValue::Array(values) => {
                let element = values.first().map(|v| v.type_of()).unwrap_or_else(Type::any);
                Type::array(element)
            }
            PolyValue::Row(values) => Type::row(
                values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| crate::Field::new(format!("f{i}"), v.type_of()))
                    .collect(),
            ),
            PolyValue::Null => Type::null(),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PolyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PolyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PolyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            PolyValue::Int(i) => Some(*i as f64),
            PolyValue::Float(f) => Some(*f),
            PolyValue::Decimal(m, s) => Some(*m as f64 / 10f64.powi(*s as i32)),
            _ => None,
        }
    }

    /// Rescales a decimal mantissa, reporting overflow of the 38-digit cap.
    fn rescale(mantissa: i128, from: u32, to: u32) -> Result<i128, TypeError> {
        debug_assert!(to >= from);
        mantissa
            .checked_mul(10i128.checked_pow(to - from).ok_or_else(overflow)?)
            .ok_or_else(overflow)
    }

    pub fn add(&self, other: &PolyValue) -> Result<PolyValue, TypeError> {
        self.numeric_op(other, "+", i64::checked_add, i128::checked_add, |a, b| a + b)
    }

    pub fn sub(&self, other: &PolyValue) -> Result<PolyValue, TypeError> {
        self.numeric_op(other, "-", i64::checked_sub, i128::checked_sub, |a, b| a - b)
    }

    pub fn mul(&self, other: &PolyValue) -> Result<PolyValue, TypeError> {
        match (self, other) {
            // Scales add under multiplication, unlike the shared-scale ops.
            (PolyValue::Decimal(m1, s1), PolyValue::Decimal(m2, s2)) => {
                Ok(PolyValue::Decimal(m1.checked_mul(*m2).ok_or_else(overflow)?, s1 + s2))
            }
            _ => self.numeric_op(other, "*", i64::checked_mul, i128::checked_mul, |a, b| a * b),
        }
    }

    pub fn div(&self, other: &PolyValue) -> Result<PolyValue, TypeError> {
        match (self, other) {
            (_, v) if v.is_null() => Ok(PolyValue::Null),
            (v, _) if v.is_null() => Ok(PolyValue::Null),
            (PolyValue::Int(_), PolyValue::Int(0)) => Err(TypeError::DivisionByZero),
            (PolyValue::Int(a), PolyValue::Int(b)) => Ok(PolyValue::Int(a / b)),
            (a, b) => {
                let (x, y) = (coerced(a)?, coerced(b)?);
                if y == 0.0 {
                    return Err(TypeError::DivisionByZero);
                }
                Ok(PolyValue::Float(x / y))
            }
        }
    }

    fn numeric_op(
        &self,
        other: &PolyValue,
        op: &str,
        int_op: fn(i64, i64) -> Option<i64>,
        dec_op: fn(i128, i128) -> Option<i128>,
        float_op: fn(f64, f64) -> f64,
    ) -> Result<PolyValue, TypeError> {
        match (self, other) {
            (PolyValue::Null, _) | (_, PolyValue::Null) => Ok(PolyValue::Null),
            (PolyValue::Int(a), PolyValue::Int(b)) => {
                int_op(*a, *b).map(PolyValue::Int).ok_or_else(|| overflow_op(op))
            }
            (PolyValue::Decimal(..), PolyValue::Decimal(..))
            | (PolyValue::Decimal(..), PolyValue::Int(_))
            | (PolyValue::Int(_), PolyValue::Decimal(..)) => {
                let (m1, s1) = self.to_decimal_parts();
                let (m2, s2) = other.to_decimal_parts();
                let scale = s1.max(s2);
                let a = Self::rescale(m1, s1, scale)?;
                let b = Self::rescale(m2, s2, scale)?;
                let out = dec_op(a, b).ok_or_else(|| overflow_op(op))?;
                // The declared result precision is bounded; mirror the bound
                // on the runtime mantissa.
                let limit = decimal_addition_type(&self.type_of(), &other.type_of());
                let digits = out.unsigned_abs().to_string().len() as u32;
                if digits > limit.precision.unwrap_or(crate::MAX_NUMERIC_PRECISION) {
                    return Err(overflow_op(op));
                }
                Ok(PolyValue::Decimal(out, scale))
            }
            _ => {
                let (a, b) = (coerced(self)?, coerced(other)?);
                Ok(PolyValue::Float(float_op(a, b)))
            }
        }
    }

    fn to_decimal_parts(&self) -> (i128, u32) {
        match self {
            PolyValue::Decimal(m, s) => (*m, *s),
            PolyValue::Int(i) => (*i as i128, 0),
            _ => unreachable!("decimal coercion over non-exact value"),
        }
    }

    /// SQL comparison: `None` when either side is NULL.
    pub fn sql_cmp(&self, other: &PolyValue) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        Some(self.cmp(other))
    }

    /// Casts to `target`, used by `CAST` calls and assignment coercion.
    pub fn cast_to(&self, target: &Type) -> Result<PolyValue, TypeError> {
        let invalid = || TypeError::InvalidCast {
            from: self.type_of().to_string(),
            to: target.to_string(),
        };
        if self.is_null() {
            return if target.nullable { Ok(PolyValue::Null) } else { Err(invalid()) };
        }
        match target.tag {
            PolyType::TinyInt | PolyType::SmallInt | PolyType::Integer | PolyType::BigInt => match self {
                PolyValue::Int(i) => Ok(PolyValue::Int(*i)),
                PolyValue::Decimal(m, s) => Ok(PolyValue::Int((m / 10i128.pow(*s)) as i64)),
                PolyValue::Float(f) => Ok(PolyValue::Int(*f as i64)),
                PolyValue::Str(s) => s.trim().parse().map(PolyValue::Int).map_err(|_| invalid()),
                PolyValue::Bool(b) => Ok(PolyValue::Int(*b as i64)),
                _ => Err(invalid()),
            },
            PolyType::Decimal => {
                let scale = target.scale.unwrap_or(0);
                match self {
                    PolyValue::Int(i) => Ok(PolyValue::Decimal(Self::rescale(*i as i128, 0, scale)?, scale)),
                    PolyValue::Decimal(m, s) if *s <= scale => {
                        Ok(PolyValue::Decimal(Self::rescale(*m, *s, scale)?, scale))
                    }
                    PolyValue::Decimal(m, s) => Ok(PolyValue::Decimal(m / 10i128.pow(s - scale), scale)),
                    PolyValue::Float(f) => {
                        Ok(PolyValue::Decimal((f * 10f64.powi(scale as i32)).round() as i128, scale))
                    }
                    _ => Err(invalid()),
                }
            }
            PolyType::Real | PolyType::Double => self.as_f64().map(PolyValue::Float).ok_or_else(invalid),
            PolyType::Char | PolyType::VarChar => Ok(PolyValue::Str(self.to_string().into())),
            PolyType::Boolean => match self {
                PolyValue::Bool(b) => Ok(PolyValue::Bool(*b)),
                PolyValue::Str(s) => match s.to_ascii_lowercase().as_str() {
                    "true" | "t" => Ok(PolyValue::Bool(true)),
                    "false" | "f" => Ok(PolyValue::Bool(false)),
                    _ => Err(invalid()),
                },
                _ => Err(invalid()),
            },
            _ if target.tag == self.type_of().tag => Ok(self.clone()),
            _ => Err(invalid()),
        }
    }
}

fn coerced(v: &PolyValue) -> Result<f64, TypeError> {
    v.as_f64().ok_or_else(|| TypeError::Mismatch {
        expected: "NUMERIC".into(),
        found: v.type_of().to_string(),
    })
}

fn overflow() -> TypeError {
    TypeError::Overflow("decimal rescale".into())
}

fn overflow_op(op: &str) -> TypeError {
    TypeError::Overflow(op.to_string())
}

impl PartialEq for PolyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PolyValue {}

impl PartialOrd for PolyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PolyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use PolyValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            // NULL sorts last by default; Sort applies its own null placement.
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Str(a), Str(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (IntervalYm(a), IntervalYm(b)) => a.cmp(b),
            (IntervalDs(a), IntervalDs(b)) => a.cmp(b),
            (Array(a), Array(b)) | (Row(a), Row(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Decimal(m1, s1), Decimal(m2, s2)) => {
                let scale = (*s1).max(*s2);
                match (
                    Self::rescale(*m1, *s1, scale),
                    Self::rescale(*m2, *s2, scale),
                ) {
                    (Ok(a), Ok(b)) => a.cmp(&b),
                    // Rescale overflow: magnitudes differ by > 38 digits.
                    _ => self.as_f64().unwrap().total_cmp(&other.as_f64().unwrap()),
                }
            }
            // Mixed numerics compare through f64; exactness does not matter
            // for ordering at the magnitudes the executor produces.
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                _ => discriminant_rank(a).cmp(&discriminant_rank(b)),
            },
        }
    }
}

fn discriminant_rank(v: &PolyValue) -> u8 {
    match v {
        PolyValue::Bool(_) => 0,
        PolyValue::Int(_) => 1,
        PolyValue::Decimal(..) => 2,
        PolyValue::Float(_) => 3,
        PolyValue::Str(_) => 4,
        PolyValue::Date(_) => 5,
        PolyValue::Time(_) => 6,
        PolyValue::Timestamp(_) => 7,
        PolyValue::IntervalYm(_) => 8,
        PolyValue::IntervalDs(_) => 9,
        PolyValue::Array(_) => 10,
        PolyValue::Row(_) => 11,
        PolyValue::Null => 12,
    }
}

impl Hash for PolyValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            PolyValue::Bool(b) => b.hash(state),
            PolyValue::Int(i) => state.write_i64(*i),
            PolyValue::Decimal(m, s) => {
                // Normalize so equal values hash equally across scales.
                let mut m = *m;
                let mut s = *s;
                while s > 0 && m % 10 == 0 {
                    m /= 10;
                    s -= 1;
                }
                m.hash(state);
                s.hash(state);
            }
            PolyValue::Float(f) => state.write_u64(f.to_bits()),
            PolyValue::Str(s) => s.hash(state),
            PolyValue::Date(d) => state.write_i32(*d),
            PolyValue::Time(t) | PolyValue::Timestamp(t) | PolyValue::IntervalDs(t) => state.write_i64(*t),
            PolyValue::IntervalYm(m) => state.write_i32(*m),
            PolyValue::Array(v) | PolyValue::Row(v) => v.hash(state),
            PolyValue::Null => state.write_u8(0xff),
        }
    }
}

impl fmt::Display for PolyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolyValue::Bool(b) => write!(f, "{b}"),
            PolyValue::Int(i) => write!(f, "{i}"),
            PolyValue::Decimal(m, 0) => write!(f, "{m}"),
            PolyValue::Decimal(m, s) => {
                let div = 10i128.pow(*s);
                let sign = if *m < 0 { "-" } else { "" };
                let m = m.unsigned_abs();
                write!(f, "{sign}{}.{:0width$}", m / div as u128, m % div as u128, width = *s as usize)
            }
            PolyValue::Float(x) => write!(f, "{x}"),
            PolyValue::Str(s) => write!(f, "{s}"),
            PolyValue::Date(d) => write!(f, "DATE {d}"),
            PolyValue::Time(t) => write!(f, "TIME {t}"),
            PolyValue::Timestamp(t) => write!(f, "TIMESTAMP {t}"),
            PolyValue::IntervalYm(m) => write!(f, "INTERVAL {m} MONTH"),
            PolyValue::IntervalDs(ms) => write!(f, "INTERVAL {ms} MS"),
            PolyValue::Array(v) => write!(f, "[{}]", v.iter().join(", ")),
            PolyValue::Row(v) => write!(f, "({})", v.iter().join(", ")),
            PolyValue::Null => write!(f, "NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn decimal_addition_aligns_scales() {
        let a = PolyValue::Decimal(1050, 2); // 10.50
        let b = PolyValue::Decimal(5, 1); // 0.5
        assert_eq!(a.add(&b).unwrap(), PolyValue::Decimal(1100, 2));
    }

    #[test]
    fn integer_overflow_is_reported() {
        let err = PolyValue::Int(i64::MAX).add(&PolyValue::Int(1)).unwrap_err();
        assert!(matches!(err, TypeError::Overflow(_)));
    }

    #[test]
    fn null_propagates_through_arithmetic() {
        assert!(PolyValue::Int(1).add(&PolyValue::Null).unwrap().is_null());
    }

    #[test]
    fn sql_cmp_is_none_on_null() {
        assert_eq!(PolyValue::Int(1).sql_cmp(&PolyValue::Null), None);
        assert_eq!(
            PolyValue::Int(1).sql_cmp(&PolyValue::Int(2)),
            Some(Ordering::Less)
        );
    }

    #[test]
    fn decimal_display_pads_fraction() {
        assert_eq!(PolyValue::Decimal(-1005, 2).to_string(), "-10.05");
    }

    #[test]
    fn cast_string_to_int() {
        let v = PolyValue::Str(" 42 ".into()).cast_to(&Type::integer()).unwrap();
        assert_eq!(v, PolyValue::Int(42));
    }

    #[test]
    fn equal_decimals_hash_equally_across_scales() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &PolyValue| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let a = PolyValue::Decimal(10, 1);
        let b = PolyValue::Decimal(100, 2);
        assert_eq!(a, b);
        assert_eq!(hash(&a), hash(&b));
    }
}
