use crate::AlgebraError;
use polystore_types::{least_restrictive, PolyType, PolyValue, Type, TypeError, TypeFamily};
use core::fmt;
use itertools::Itertools;

/// Identifies one correlation between a `Correlate` node and the correlated
/// variables referenced in its right input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(pub u32);

/// A scalar operator in a [`RexNode::Call`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    /// Unary minus.
    Negate,
    IsNull,
    IsNotNull,
    Concat,
    Cast(Type),
    Abs,
    Upper,
    Lower,
    CharLength,
    Coalesce,
}

impl ScalarOp {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            ScalarOp::Eq | ScalarOp::NotEq | ScalarOp::Lt | ScalarOp::LtEq | ScalarOp::Gt | ScalarOp::GtEq
        )
    }

    /// Monotonic single-argument calls preserve the input ordering, so a
    /// collation survives projection through them.
    pub fn is_monotonic_unary(&self) -> bool {
        matches!(self, ScalarOp::Cast(_))
    }

    /// Derives the result type, or fails with the mismatch.
    pub fn derive_type(&self, args: &[Type]) -> Result<Type, TypeError> {
        let nullable = args.iter().any(|t| t.nullable);
        match self {
            ScalarOp::And | ScalarOp::Or | ScalarOp::Not => {
                for arg in args {
                    if !matches!(arg.family(), TypeFamily::Boolean | TypeFamily::Null) {
                        return Err(TypeError::Mismatch {
                            expected: "BOOLEAN".into(),
                            found: arg.to_string(),
                        });
                    }
                }
                Ok(Type::boolean().with_nullable(nullable))
            }
            ScalarOp::Eq | ScalarOp::NotEq | ScalarOp::Lt | ScalarOp::LtEq | ScalarOp::Gt | ScalarOp::GtEq => {
                // Comparison operands must share a family; the result is a
                // nullable-if-inputs-are boolean.
                least_restrictive(args)?;
                Ok(Type::boolean().with_nullable(nullable))
            }
            ScalarOp::Plus | ScalarOp::Minus | ScalarOp::Times | ScalarOp::Divide | ScalarOp::Modulo => {
                let out = least_restrictive(args)?;
                if !out.is_numeric() && !out.is_null() {
                    return Err(TypeError::Mismatch {
                        expected: "NUMERIC".into(),
                        found: out.to_string(),
                    });
                }
                Ok(out)
            }
            ScalarOp::Negate => least_restrictive(args),
            ScalarOp::IsNull | ScalarOp::IsNotNull => Ok(Type::boolean()),
            ScalarOp::Concat => {
                let out = least_restrictive(args)?;
                if !out.is_character() && !out.is_null() {
                    return Err(TypeError::Mismatch {
                        expected: "CHARACTER".into(),
                        found: out.to_string(),
                    });
                }
                Ok(out)
            }
            ScalarOp::Cast(target) => Ok(target.clone().with_nullable(nullable || target.nullable)),
            ScalarOp::Abs => {
                let out = least_restrictive(args)?;
                if !out.is_numeric() && !out.is_null() {
                    return Err(TypeError::Mismatch {
                        expected: "NUMERIC".into(),
                        found: out.to_string(),
                    });
                }
                Ok(out)
            }
            ScalarOp::Upper | ScalarOp::Lower => {
                let out = least_restrictive(args)?;
                if !out.is_character() && !out.is_null() {
                    return Err(TypeError::Mismatch {
                        expected: "CHARACTER".into(),
                        found: out.to_string(),
                    });
                }
                Ok(out)
            }
            ScalarOp::CharLength => {
                let arg = least_restrictive(args)?;
                if !arg.is_character() && !arg.is_null() {
                    return Err(TypeError::Mismatch {
                        expected: "CHARACTER".into(),
                        found: arg.to_string(),
                    });
                }
                Ok(Type::integer().with_nullable(nullable))
            }
            ScalarOp::Coalesce => {
                let out = least_restrictive(args)?;
                // COALESCE is non-null as soon as one branch is.
                Ok(out.with_nullable(args.iter().all(|t| t.nullable)))
            }
        }
    }
}

impl fmt::Display for ScalarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarOp::Eq => "=",
            ScalarOp::NotEq => "<>",
            ScalarOp::Lt => "<",
            ScalarOp::LtEq => "<=",
            ScalarOp::Gt => ">",
            ScalarOp::GtEq => ">=",
            ScalarOp::And => "AND",
            ScalarOp::Or => "OR",
            ScalarOp::Not => "NOT",
            ScalarOp::Plus => "+",
            ScalarOp::Minus => "-",
            ScalarOp::Times => "*",
            ScalarOp::Divide => "/",
            ScalarOp::Modulo => "%",
            ScalarOp::Negate => "-",
            ScalarOp::IsNull => "IS NULL",
            ScalarOp::IsNotNull => "IS NOT NULL",
            ScalarOp::Concat => "||",
            ScalarOp::Abs => "ABS",
            ScalarOp::Upper => "UPPER",
            ScalarOp::Lower => "LOWER",
            ScalarOp::CharLength => "CHAR_LENGTH",
            ScalarOp::Coalesce => "COALESCE",
            ScalarOp::Cast(ty) => return write!(f, "CAST(.. AS {ty})"),
        };
        f.write_str(s)
    }
}

/// Window frame specification for `Over` expressions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowSpec {
    pub partition_by: Vec<usize>,
    pub order_by: Vec<usize>,
}

/// A scalar expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RexNode {
    /// Field `index` of the operator's input row (inputs concatenated for
    /// two-input operators).
    InputRef { index: usize, ty: Type },
    Literal { value: PolyValue, ty: Type },
    /// A prepared-statement placeholder `?index`.
    DynamicParam { index: usize, ty: Type },
    Call { op: ScalarOp, args: Vec<RexNode> },
    Over { spec: WindowSpec, agg: crate::AggKind, args: Vec<RexNode>, ty: Type },
    FieldAccess { expr: Box<RexNode>, field: Box<str>, ty: Type },
    /// Reference to a field of the correlating row of an enclosing
    /// `Correlate`.
    CorrelVar { id: CorrelationId, field: usize, ty: Type },
}

impl RexNode {
    pub fn literal(value: PolyValue) -> Self {
        let ty = value.type_of();
        RexNode::Literal { value, ty }
    }

    pub fn input(index: usize, ty: Type) -> Self {
        RexNode::InputRef { index, ty }
    }

    pub fn call(op: ScalarOp, args: Vec<RexNode>) -> Self {
        RexNode::Call { op, args }
    }

    pub fn and(lhs: RexNode, rhs: RexNode) -> Self {
        RexNode::call(ScalarOp::And, vec![lhs, rhs])
    }

    pub fn eq(lhs: RexNode, rhs: RexNode) -> Self {
        RexNode::call(ScalarOp::Eq, vec![lhs, rhs])
    }

    pub fn cast(expr: RexNode, target: Type) -> Self {
        RexNode::call(ScalarOp::Cast(target), vec![expr])
    }

    pub fn ty(&self) -> Result<Type, TypeError> {
        match self {
            RexNode::InputRef { ty, .. }
            | RexNode::Literal { ty, .. }
            | RexNode::DynamicParam { ty, .. }
            | RexNode::Over { ty, .. }
            | RexNode::FieldAccess { ty, .. }
            | RexNode::CorrelVar { ty, .. } => Ok(ty.clone()),
            RexNode::Call { op, args } => {
                let tys = args.iter().map(|a| a.ty()).collect::<Result<Vec<_>, _>>()?;
                op.derive_type(&tys)
            }
        }
    }

    /// Checks every `InputRef` against the arity of the input row type.
    pub fn validate_refs(&self, arity: usize) -> Result<(), AlgebraError> {
        self.visit(&mut |rex| match rex {
            RexNode::InputRef { index, .. } if *index >= arity => {
                Err(AlgebraError::InputRefOutOfBounds { index: *index, arity })
            }
            _ => Ok(()),
        })
    }

    pub fn visit(&self, f: &mut impl FnMut(&RexNode) -> Result<(), AlgebraError>) -> Result<(), AlgebraError> {
        f(self)?;
        match self {
            RexNode::Call { args, .. } | RexNode::Over { args, .. } => {
                for arg in args {
                    arg.visit(f)?;
                }
            }
            RexNode::FieldAccess { expr, .. } => expr.visit(f)?,
            _ => {}
        }
        Ok(())
    }

    /// Rewrites every `InputRef` through `map`, leaving the rest untouched.
    pub fn map_input_refs(&self, map: &impl Fn(usize) -> usize) -> RexNode {
        match self {
            RexNode::InputRef { index, ty } => RexNode::InputRef {
                index: map(*index),
                ty: ty.clone(),
            },
            RexNode::Call { op, args } => RexNode::Call {
                op: op.clone(),
                args: args.iter().map(|a| a.map_input_refs(map)).collect(),
            },
            RexNode::Over { spec, agg, args, ty } => RexNode::Over {
                spec: spec.clone(),
                agg: *agg,
                args: args.iter().map(|a| a.map_input_refs(map)).collect(),
                ty: ty.clone(),
            },
            RexNode::FieldAccess { expr, field, ty } => RexNode::FieldAccess {
                expr: Box::new(expr.map_input_refs(map)),
                field: field.clone(),
                ty: ty.clone(),
            },
            other => other.clone(),
        }
    }

    /// Replaces every `InputRef(i)` by `bindings[i]`, used when pulling an
    /// expression through the projection that produced its input.
    pub fn substitute(&self, bindings: &[RexNode]) -> RexNode {
        match self {
            RexNode::InputRef { index, .. } => bindings
                .get(*index)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            RexNode::Call { op, args } => RexNode::Call {
                op: op.clone(),
                args: args.iter().map(|a| a.substitute(bindings)).collect(),
            },
            RexNode::Over { spec, agg, args, ty } => RexNode::Over {
                spec: spec.clone(),
                agg: *agg,
                args: args.iter().map(|a| a.substitute(bindings)).collect(),
                ty: ty.clone(),
            },
            RexNode::FieldAccess { expr, field, ty } => RexNode::FieldAccess {
                expr: Box::new(expr.substitute(bindings)),
                field: field.clone(),
                ty: ty.clone(),
            },
            other => other.clone(),
        }
    }

    /// All `InputRef` indices in this expression, ascending and deduped.
    pub fn input_refs(&self) -> Vec<usize> {
        let mut refs = Vec::new();
        let _ = self.visit(&mut |rex| {
            if let RexNode::InputRef { index, .. } = rex {
                refs.push(*index);
            }
            Ok(())
        });
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    /// Whether any `DynamicParam` occurs below this expression.
    pub fn has_params(&self) -> bool {
        let mut found = false;
        let _ = self.visit(&mut |rex| {
            if matches!(rex, RexNode::DynamicParam { .. }) {
                found = true;
            }
            Ok(())
        });
        found
    }

    /// Evaluates against `row` with `params` bound. `Over` is rejected here;
    /// window evaluation is an operator concern.
    pub fn eval(&self, row: &[PolyValue], params: &[PolyValue]) -> Result<PolyValue, TypeError> {
        match self {
            RexNode::InputRef { index, .. } => Ok(row.get(*index).cloned().unwrap_or(PolyValue::Null)),
            RexNode::Literal { value, .. } => Ok(value.clone()),
            RexNode::DynamicParam { index, .. } => {
                Ok(params.get(*index).cloned().unwrap_or(PolyValue::Null))
            }
            RexNode::CorrelVar { .. } => Err(TypeError::Mismatch {
                expected: "decorrelated plan".into(),
                found: "correlated variable".into(),
            }),
            RexNode::FieldAccess { expr, field, .. } => {
                let value = expr.eval(row, params)?;
                let row_ty = expr.ty()?;
                let pos = row_ty.fields.iter().position(|f| f.name.as_ref() == field.as_ref());
                match (value, pos) {
                    (PolyValue::Row(values), Some(pos)) => {
                        Ok(values.get(pos).cloned().unwrap_or(PolyValue::Null))
                    }
                    (PolyValue::Null, _) => Ok(PolyValue::Null),
                    (v, _) => Err(TypeError::Mismatch {
                        expected: "ROW".into(),
                        found: v.type_of().to_string(),
                    }),
                }
            }
            RexNode::Over { .. } => Err(TypeError::Mismatch {
                expected: "scalar expression".into(),
                found: "window expression".into(),
            }),
            RexNode::Call { op, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(row, params))
                    .collect::<Result<Vec<_>, _>>()?;
                eval_call(op, &values)
            }
        }
    }
}

fn eval_call(op: &ScalarOp, args: &[PolyValue]) -> Result<PolyValue, TypeError> {
    use core::cmp::Ordering;
    let cmp = |wanted: &[Ordering]| -> PolyValue {
        match args[0].sql_cmp(&args[1]) {
            None => PolyValue::Null,
            Some(ord) => PolyValue::Bool(wanted.contains(&ord)),
        }
    };
    Ok(match op {
        ScalarOp::Eq => cmp(&[Ordering::Equal]),
        ScalarOp::NotEq => cmp(&[Ordering::Less, Ordering::Greater]),
        ScalarOp::Lt => cmp(&[Ordering::Less]),
        ScalarOp::LtEq => cmp(&[Ordering::Less, Ordering::Equal]),
        ScalarOp::Gt => cmp(&[Ordering::Greater]),
        ScalarOp::GtEq => cmp(&[Ordering::Greater, Ordering::Equal]),
        ScalarOp::And => match (args[0].as_bool(), args[1].as_bool()) {
            (Some(false), _) | (_, Some(false)) => PolyValue::Bool(false),
            (Some(true), Some(true)) => PolyValue::Bool(true),
            _ => PolyValue::Null,
        },
        ScalarOp::Or => match (args[0].as_bool(), args[1].as_bool()) {
            (Some(true), _) | (_, Some(true)) => PolyValue::Bool(true),
            (Some(false), Some(false)) => PolyValue::Bool(false),
            _ => PolyValue::Null,
        },
        ScalarOp::Not => match args[0].as_bool() {
            Some(b) => PolyValue::Bool(!b),
            None => PolyValue::Null,
        },
        ScalarOp::Plus => args[0].add(&args[1])?,
        ScalarOp::Minus => args[0].sub(&args[1])?,
        ScalarOp::Times => args[0].mul(&args[1])?,
        ScalarOp::Divide => args[0].div(&args[1])?,
        ScalarOp::Modulo => match (&args[0], &args[1]) {
            (PolyValue::Null, _) | (_, PolyValue::Null) => PolyValue::Null,
            (PolyValue::Int(_), PolyValue::Int(0)) => return Err(TypeError::DivisionByZero),
            (PolyValue::Int(a), PolyValue::Int(b)) => PolyValue::Int(a % b),
            (a, b) => {
                return Err(TypeError::Mismatch {
                    expected: "INTEGER % INTEGER".into(),
                    found: format!("{} % {}", a.type_of(), b.type_of()),
                })
            }
        },
        ScalarOp::Negate => PolyValue::Int(0).sub(&args[0])?,
        ScalarOp::IsNull => PolyValue::Bool(args[0].is_null()),
        ScalarOp::IsNotNull => PolyValue::Bool(!args[0].is_null()),
        ScalarOp::Concat => match (&args[0], &args[1]) {
            (PolyValue::Null, _) | (_, PolyValue::Null) => PolyValue::Null,
            (a, b) => PolyValue::Str(format!("{a}{b}").into()),
        },
        ScalarOp::Cast(target) => {
            if args[0].is_null() {
                PolyValue::Null
            } else {
                args[0].cast_to(target)?
            }
        }
        ScalarOp::Abs => match &args[0] {
            PolyValue::Null => PolyValue::Null,
            PolyValue::Int(i) => PolyValue::Int(i.checked_abs().ok_or_else(|| TypeError::Overflow("ABS".into()))?),
            PolyValue::Decimal(m, s) => PolyValue::Decimal(m.abs(), *s),
            PolyValue::Float(x) => PolyValue::Float(x.abs()),
            v => {
                return Err(TypeError::Mismatch {
                    expected: "NUMERIC".into(),
                    found: v.type_of().to_string(),
                })
            }
        },
        ScalarOp::Upper => match args[0].as_str() {
            Some(s) => PolyValue::Str(s.to_uppercase().into()),
            None => PolyValue::Null,
        },
        ScalarOp::Lower => match args[0].as_str() {
            Some(s) => PolyValue::Str(s.to_lowercase().into()),
            None => PolyValue::Null,
        },
        ScalarOp::CharLength => match args[0].as_str() {
            Some(s) => PolyValue::Int(s.chars().count() as i64),
            None => PolyValue::Null,
        },
        ScalarOp::Coalesce => args
            .iter()
            .find(|v| !v.is_null())
            .cloned()
            .unwrap_or(PolyValue::Null),
    })
}

impl fmt::Display for RexNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RexNode::InputRef { index, .. } => write!(f, "${index}"),
            RexNode::Literal { value, .. } => write!(f, "{value}"),
            RexNode::DynamicParam { index, .. } => write!(f, "?{index}"),
            RexNode::CorrelVar { id, field, .. } => write!(f, "$cor{}.{field}", id.0),
            RexNode::FieldAccess { expr, field, .. } => write!(f, "{expr}.{field}"),
            RexNode::Over { agg, args, .. } => write!(f, "{agg:?}({}) OVER (..)", args.iter().join(", ")),
            RexNode::Call { op: ScalarOp::Cast(ty), args } => write!(f, "CAST({} AS {ty})", &args[0]),
            RexNode::Call { op, args } if args.len() == 2 => {
                write!(f, "({} {op} {})", args[0], args[1])
            }
            RexNode::Call { op, args } => write!(f, "{op}({})", args.iter().join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn call_type_derivation_widens() {
        let call = RexNode::call(
            ScalarOp::Plus,
            vec![
                RexNode::input(0, Type::integer()),
                RexNode::input(1, Type::bigint().with_nullable(true)),
            ],
        );
        let ty = call.ty().unwrap();
        assert_eq!(ty.tag, PolyType::BigInt);
        assert!(ty.nullable);
    }

    #[test]
    fn comparison_across_families_fails() {
        let call = RexNode::call(
            ScalarOp::Eq,
            vec![
                RexNode::input(0, Type::integer()),
                RexNode::literal(PolyValue::Str("x".into())),
            ],
        );
        assert!(call.ty().is_err());
    }

    #[test]
    fn three_valued_logic() {
        let and = RexNode::call(
            ScalarOp::And,
            vec![RexNode::literal(PolyValue::Null), RexNode::literal(PolyValue::Bool(false))],
        );
        assert_eq!(and.eval(&[], &[]).unwrap(), PolyValue::Bool(false));

        let or = RexNode::call(
            ScalarOp::Or,
            vec![RexNode::literal(PolyValue::Null), RexNode::literal(PolyValue::Bool(false))],
        );
        assert_eq!(or.eval(&[], &[]).unwrap(), PolyValue::Null);
    }

    #[test]
    fn params_bind_at_eval() {
        let gt = RexNode::call(
            ScalarOp::Gt,
            vec![
                RexNode::input(0, Type::integer()),
                RexNode::DynamicParam { index: 0, ty: Type::integer() },
            ],
        );
        let row = [PolyValue::Int(5)];
        assert_eq!(gt.eval(&row, &[PolyValue::Int(3)]).unwrap(), PolyValue::Bool(true));
        assert_eq!(gt.eval(&row, &[PolyValue::Int(9)]).unwrap(), PolyValue::Bool(false));
    }

    #[test]
    fn input_ref_bounds_are_checked() {
        let rex = RexNode::input(3, Type::integer());
        assert!(rex.validate_refs(3).is_err());
        assert!(rex.validate_refs(4).is_ok());
    }
}
