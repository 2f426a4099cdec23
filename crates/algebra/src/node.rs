use crate::{AlgebraError, CorrelationId, Distribution, RelCollation, RexNode, TraitSet, WindowSpec};
use polystore_primitives::{AdapterId, AllocationId, ColId, ColList, ColumnId, TableId};
use polystore_types::{least_restrictive, Field, PolyType, Type, TypeFamily};
use smallvec::SmallVec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    Semi,
    Anti,
}

impl JoinType {
    /// Semi and anti joins expose only the left input.
    pub fn projects_right(self) -> bool {
        !matches!(self, JoinType::Semi | JoinType::Anti)
    }

    /// Which sides become nullable in the output row type.
    fn null_generating(self) -> (bool, bool) {
        match self {
            JoinType::Inner | JoinType::Semi | JoinType::Anti => (false, false),
            JoinType::Left => (false, true),
            JoinType::Right => (true, false),
            JoinType::Full => (true, true),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetOpKind {
    Union,
    Intersect,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifyOp {
    Insert,
    Update,
    Delete,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    Count,
    /// `COUNT(*)`: counts rows, ignores no argument.
    CountStar,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggKind {
    pub fn result_type(self, arg: Option<&Type>) -> Type {
        match self {
            AggKind::Count | AggKind::CountStar => Type::bigint(),
            AggKind::Avg => Type::double().with_nullable(true),
            AggKind::Sum | AggKind::Min | AggKind::Max => arg
                .cloned()
                .map(|t| t.with_nullable(true))
                .unwrap_or_else(|| Type::null()),
        }
    }
}

/// One aggregate call of an `Aggregate` node.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggCall {
    pub kind: AggKind,
    /// Input column the aggregate consumes; `None` for `COUNT(*)`.
    pub arg: Option<ColId>,
    pub distinct: bool,
}

/// One window of a `Window` node: the frame plus the calls computed over it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowGroup {
    pub spec: WindowSpec,
    pub calls: Vec<AggCall>,
}

/// The closed set of relational operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AlgNodeKind {
    /// Scan of a logical table. The row type is resolved by the frontend
    /// against the catalog snapshot and declared here.
    Scan { table: TableId, row: Type },
    /// Scan of one concrete allocation on one adapter, produced by routing.
    PhysicalScan {
        table: TableId,
        allocation: AllocationId,
        adapter: AdapterId,
        columns: ColList,
        row: Type,
    },
    Values { rows: Vec<Vec<RexNode>>, row: Type },
    Filter { condition: RexNode },
    Project { exprs: Vec<RexNode>, names: Vec<Box<str>> },
    Aggregate { group: ColList, calls: Vec<AggCall> },
    Join { condition: RexNode, join_type: JoinType },
    SetOp { kind: SetOpKind, all: bool },
    Sort {
        collation: RelCollation,
        offset: Option<usize>,
        limit: Option<usize>,
    },
    Window { groups: Vec<WindowGroup> },
    TableModify {
        table: TableId,
        op: ModifyOp,
        update_columns: Vec<ColumnId>,
        sources: Vec<RexNode>,
    },
    Exchange { distribution: Distribution },
    Correlate { id: CorrelationId, join_type: JoinType },
    /// Changes convention only; inserted by the optimizer.
    Converter,
}

impl AlgNodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            AlgNodeKind::Scan { .. } => "Scan",
            AlgNodeKind::PhysicalScan { .. } => "PhysicalScan",
            AlgNodeKind::Values { .. } => "Values",
            AlgNodeKind::Filter { .. } => "Filter",
            AlgNodeKind::Project { .. } => "Project",
            AlgNodeKind::Aggregate { .. } => "Aggregate",
            AlgNodeKind::Join { .. } => "Join",
            AlgNodeKind::SetOp { .. } => "SetOp",
            AlgNodeKind::Sort { .. } => "Sort",
            AlgNodeKind::Window { .. } => "Window",
            AlgNodeKind::TableModify { .. } => "TableModify",
            AlgNodeKind::Exchange { .. } => "Exchange",
            AlgNodeKind::Correlate { .. } => "Correlate",
            AlgNodeKind::Converter => "Converter",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            AlgNodeKind::Scan { .. } | AlgNodeKind::PhysicalScan { .. } | AlgNodeKind::Values { .. } => 0,
            AlgNodeKind::Join { .. } | AlgNodeKind::SetOp { .. } | AlgNodeKind::Correlate { .. } => 2,
            _ => 1,
        }
    }
}

/// A node of the algebra graph: kind, ordered inputs, derived row type and
/// the trait set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlgNode {
    pub kind: AlgNodeKind,
    pub inputs: SmallVec<[crate::NodeId; 2]>,
    pub row_type: Type,
    pub traits: TraitSet,
}

impl AlgNode {
    /// Structural equality modulo traits: same kind and same inputs.
    pub fn structural_eq(&self, other: &AlgNode) -> bool {
        self.kind == other.kind && self.inputs == other.inputs
    }
}

/// Derives the row type of an operator from its kind and input row types.
///
/// Total and deterministic: two structurally equal nodes always derive the
/// same row type.
pub fn derive_row_type(kind: &AlgNodeKind, inputs: &[&Type]) -> Result<Type, AlgebraError> {
    let input = |i: usize| -> &Type { inputs[i] };
    let expect_arity = |expected: usize| -> Result<(), AlgebraError> {
        if inputs.len() != expected {
            return Err(AlgebraError::WrongArity {
                op: kind.name(),
                expected,
                got: inputs.len(),
            });
        }
        Ok(())
    };

    match kind {
        AlgNodeKind::Scan { row, .. } | AlgNodeKind::PhysicalScan { row, .. } | AlgNodeKind::Values { row, .. } => {
            expect_arity(0)?;
            Ok(row.clone())
        }
        AlgNodeKind::Filter { condition } => {
            expect_arity(1)?;
            condition.validate_refs(input(0).fields.len())?;
            let ty = condition.ty()?;
            if !matches!(ty.family(), TypeFamily::Boolean | TypeFamily::Null) {
                return Err(AlgebraError::NonBooleanCondition(ty.to_string()));
            }
            Ok(input(0).clone())
        }
        AlgNodeKind::Project { exprs, names } => {
            expect_arity(1)?;
            let arity = input(0).fields.len();
            let mut fields = Vec::with_capacity(exprs.len());
            for (i, expr) in exprs.iter().enumerate() {
                expr.validate_refs(arity)?;
                let name = names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("EXPR${i}").into());
                fields.push(Field::new(name, expr.ty()?));
            }
            Ok(Type::row(fields))
        }
        AlgNodeKind::Aggregate { group, calls } => {
            expect_arity(1)?;
            let in_fields = &input(0).fields;
            let mut fields = Vec::with_capacity(group.len() + calls.len());
            for col in group.iter() {
                let field = in_fields.get(col.idx()).ok_or(AlgebraError::InputRefOutOfBounds {
                    index: col.idx(),
                    arity: in_fields.len(),
                })?;
                fields.push(field.clone());
            }
            for (i, call) in calls.iter().enumerate() {
                let arg_ty = match call.arg {
                    Some(col) => Some(
                        &in_fields
                            .get(col.idx())
                            .ok_or(AlgebraError::InputRefOutOfBounds {
                                index: col.idx(),
                                arity: in_fields.len(),
                            })?
                            .ty,
                    ),
                    None => None,
                };
                fields.push(Field::new(
                    format!("agg#{}", group.len() + i),
                    call.kind.result_type(arg_ty),
                ));
            }
            Ok(Type::row(fields))
        }
        AlgNodeKind::Join { condition, join_type } => {
            expect_arity(2)?;
            let (left, right) = (input(0), input(1));
            let concat = Type::concat_rows(left, right);
            condition.validate_refs(concat.fields.len())?;
            let ty = condition.ty()?;
            if !matches!(ty.family(), TypeFamily::Boolean | TypeFamily::Null) {
                return Err(AlgebraError::NonBooleanCondition(ty.to_string()));
            }
            if !join_type.projects_right() {
                return Ok(left.clone());
            }
            let (null_left, null_right) = join_type.null_generating();
            let mut fields = Vec::with_capacity(concat.fields.len());
            for (i, field) in concat.fields.iter().enumerate() {
                let from_left = i < left.fields.len();
                let force_null = (from_left && null_left) || (!from_left && null_right);
                let mut field = field.clone();
                if force_null {
                    field.ty.nullable = true;
                }
                fields.push(field);
            }
            Ok(Type::row(fields))
        }
        AlgNodeKind::SetOp { .. } => {
            expect_arity(2)?;
            let (left, right) = (input(0), input(1));
            if left.fields.len() != right.fields.len() {
                return Err(AlgebraError::SetOpArityMismatch {
                    left: left.fields.len(),
                    right: right.fields.len(),
                });
            }
            let fields = left
                .fields
                .iter()
                .zip(&right.fields)
                .map(|(l, r)| {
                    let ty = least_restrictive(&[l.ty.clone(), r.ty.clone()])?;
                    Ok(Field::new(l.name.clone(), ty))
                })
                .collect::<Result<Vec<_>, AlgebraError>>()?;
            Ok(Type::row(fields))
        }
        AlgNodeKind::Sort { collation, .. } => {
            expect_arity(1)?;
            let arity = input(0).fields.len();
            for fc in &collation.0 {
                if fc.field.idx() >= arity {
                    return Err(AlgebraError::InputRefOutOfBounds {
                        index: fc.field.idx(),
                        arity,
                    });
                }
            }
            Ok(input(0).clone())
        }
        AlgNodeKind::Window { groups } => {
            expect_arity(1)?;
            let in_fields = &input(0).fields;
            let mut fields = in_fields.clone();
            for group in groups {
                for call in &group.calls {
                    let arg_ty = call.arg.and_then(|c| in_fields.get(c.idx())).map(|f| &f.ty);
                    let n = fields.len() - in_fields.len();
                    fields.push(Field::new(format!("w#{n}"), call.kind.result_type(arg_ty)));
                }
            }
            Ok(Type::row(fields))
        }
        AlgNodeKind::TableModify { .. } => {
            expect_arity(1)?;
            Ok(Type::row(vec![Field::new("ROWCOUNT", Type::bigint())]))
        }
        AlgNodeKind::Exchange { .. } | AlgNodeKind::Converter => {
            expect_arity(1)?;
            Ok(input(0).clone())
        }
        AlgNodeKind::Correlate { join_type, .. } => {
            expect_arity(2)?;
            let (left, right) = (input(0), input(1));
            if !join_type.projects_right() {
                return Ok(left.clone());
            }
            Ok(Type::concat_rows(left, right))
        }
    }
}

pub(crate) fn values_row_type(rows: &[Vec<RexNode>]) -> Result<Type, AlgebraError> {
    let arity = rows.first().map(|r| r.len()).unwrap_or(0);
    let mut fields = Vec::with_capacity(arity);
    for i in 0..arity {
        let col_types = rows
            .iter()
            .map(|row| row[i].ty())
            .collect::<Result<Vec<_>, _>>()?;
        let ty = if col_types.is_empty() {
            Type::null()
        } else {
            least_restrictive(&col_types)?
        };
        fields.push(Field::new(format!("EXPR${i}"), ty));
    }
    Ok(Type::row(fields))
}

/// An all-`Null` row type placeholder for empty `Values`.
pub(crate) fn empty_values_row(arity: usize) -> Type {
    Type::row(
        (0..arity)
            .map(|i| Field::new(format!("EXPR${i}"), Type::of(PolyType::Null).with_nullable(true)))
            .collect(),
    )
}
