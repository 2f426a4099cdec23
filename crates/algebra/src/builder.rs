use crate::node::{empty_values_row, values_row_type};
use crate::{
    AggCall, AlgArena, AlgNodeKind, AlgebraError, Distribution, FieldCollation, JoinType, ModifyOp,
    NodeId, RelCollation, RexNode, SetOpKind, TraitSet,
};
use polystore_primitives::{ColList, ColumnId, TableId};
use polystore_types::Type;

/// Stack-machine builder over an [`AlgArena`].
///
/// Each operation pops its inputs off the stack and pushes the new node, so a
/// frontend emits operators in post order and never holds node ids itself.
/// All nodes are built in the `Logical` convention; collations are derived,
/// conventions are the optimizer's business.
pub struct AlgebraBuilder<'a> {
    arena: &'a mut AlgArena,
    stack: Vec<NodeId>,
}

impl<'a> AlgebraBuilder<'a> {
    pub fn new(arena: &'a mut AlgArena) -> Self {
        Self { arena, stack: Vec::new() }
    }

    pub fn arena(&mut self) -> &mut AlgArena {
        self.arena
    }

    /// The row type of the node on top of the stack.
    pub fn peek_row(&self) -> Result<&Type, AlgebraError> {
        let id = self.stack.last().ok_or(AlgebraError::StackUnderflow("peek"))?;
        Ok(self.arena.row_type(*id))
    }

    pub fn scan(&mut self, table: TableId, row: Type) -> Result<&mut Self, AlgebraError> {
        let id = self.arena.add(AlgNodeKind::Scan { table, row }, [], TraitSet::logical())?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn values(&mut self, rows: Vec<Vec<RexNode>>, arity: usize) -> Result<&mut Self, AlgebraError> {
        let row = if rows.is_empty() {
            empty_values_row(arity)
        } else {
            values_row_type(&rows)?
        };
        let id = self.arena.add(AlgNodeKind::Values { rows, row }, [], TraitSet::logical())?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn filter(&mut self, condition: RexNode) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("filter")?;
        // A filter neither reorders nor redistributes.
        let traits = self.arena.get(input).traits.clone();
        let id = self.arena.add(AlgNodeKind::Filter { condition }, [input], traits)?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn project(
        &mut self,
        exprs: Vec<RexNode>,
        names: Vec<Box<str>>,
    ) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("project")?;
        let collation = project_collation(&self.arena.get(input).traits.collation, &exprs);
        let traits = TraitSet::logical().with_collation(collation);
        let id = self.arena.add(AlgNodeKind::Project { exprs, names }, [input], traits)?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn aggregate(&mut self, group: ColList, calls: Vec<AggCall>) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("aggregate")?;
        let id = self
            .arena
            .add(AlgNodeKind::Aggregate { group, calls }, [input], TraitSet::logical())?;
        self.stack.push(id);
        Ok(self)
    }

    /// Pops right then left.
    pub fn join(&mut self, join_type: JoinType, condition: RexNode) -> Result<&mut Self, AlgebraError> {
        let right = self.pop("join")?;
        let left = self.pop("join")?;
        let id = self.arena.add(
            AlgNodeKind::Join { condition, join_type },
            [left, right],
            TraitSet::logical(),
        )?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn set_op(&mut self, kind: SetOpKind, all: bool) -> Result<&mut Self, AlgebraError> {
        let right = self.pop("set_op")?;
        let left = self.pop("set_op")?;
        let id = self
            .arena
            .add(AlgNodeKind::SetOp { kind, all }, [left, right], TraitSet::logical())?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn sort(
        &mut self,
        collation: RelCollation,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("sort")?;
        let traits = TraitSet::logical().with_collation(collation.clone());
        let id = self
            .arena
            .add(AlgNodeKind::Sort { collation, offset, limit }, [input], traits)?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn modify(
        &mut self,
        table: TableId,
        op: ModifyOp,
        update_columns: Vec<ColumnId>,
        sources: Vec<RexNode>,
    ) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("modify")?;
        let id = self.arena.add(
            AlgNodeKind::TableModify { table, op, update_columns, sources },
            [input],
            TraitSet::logical(),
        )?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn exchange(&mut self, distribution: Distribution) -> Result<&mut Self, AlgebraError> {
        let input = self.pop("exchange")?;
        let traits = TraitSet::logical().with_distribution(distribution.clone());
        let id = self
            .arena
            .add(AlgNodeKind::Exchange { distribution }, [input], traits)?;
        self.stack.push(id);
        Ok(self)
    }

    pub fn correlate(
        &mut self,
        id: crate::CorrelationId,
        join_type: JoinType,
    ) -> Result<&mut Self, AlgebraError> {
        let right = self.pop("correlate")?;
        let left = self.pop("correlate")?;
        let node = self.arena.add(
            AlgNodeKind::Correlate { id, join_type },
            [left, right],
            TraitSet::logical(),
        )?;
        self.stack.push(node);
        Ok(self)
    }

    /// Pushes an existing node (e.g. a shared sub-plan) onto the stack.
    pub fn push(&mut self, id: NodeId) -> &mut Self {
        self.stack.push(id);
        self
    }

    /// Finishes the build; exactly one node must remain.
    pub fn build(mut self) -> Result<NodeId, AlgebraError> {
        let id = self.pop("build")?;
        if !self.stack.is_empty() {
            return Err(AlgebraError::UnfinishedBuild(self.stack.len() + 1));
        }
        Ok(id)
    }

    fn pop(&mut self, op: &'static str) -> Result<NodeId, AlgebraError> {
        self.stack.pop().ok_or(AlgebraError::StackUnderflow(op))
    }
}

/// The image of the input collation under a projection.
///
/// A collation field survives when some projection is a direct `InputRef` to
/// it or a monotonic single-argument call over such a ref; the lowest
/// projection index wins. Mapping stops at the first lost field, keeping the
/// result a valid prefix of the input order.
pub fn project_collation(input: &RelCollation, exprs: &[RexNode]) -> RelCollation {
    let mut out = Vec::new();
    'fields: for fc in &input.0 {
        for (i, expr) in exprs.iter().enumerate() {
            let maps = match expr {
                RexNode::InputRef { index, .. } => *index == fc.field.idx(),
                RexNode::Call { op, args } if op.is_monotonic_unary() && args.len() == 1 => {
                    matches!(&args[0], RexNode::InputRef { index, .. } if *index == fc.field.idx())
                }
                _ => false,
            };
            if maps {
                out.push(FieldCollation {
                    field: polystore_primitives::ColId(i as u32),
                    direction: fc.direction,
                    nulls: fc.nulls,
                });
                continue 'fields;
            }
        }
        break;
    }
    RelCollation(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScalarOp;
    use polystore_primitives::ColId;
    use polystore_types::{Field, PolyValue};
    use pretty_assertions::assert_eq;

    fn row_ab() -> Type {
        Type::row(vec![
            Field::new("a", Type::integer()),
            Field::new("b", Type::varchar(8)),
        ])
    }

    #[test]
    fn select_filter_project_builds() {
        let mut arena = AlgArena::new();
        let mut builder = AlgebraBuilder::new(&mut arena);
        builder
            .scan(TableId(1), row_ab())
            .unwrap()
            .filter(RexNode::call(
                ScalarOp::Eq,
                vec![RexNode::input(0, Type::integer()), RexNode::literal(PolyValue::Int(2))],
            ))
            .unwrap()
            .project(vec![RexNode::input(1, Type::varchar(8))], vec!["b".into()])
            .unwrap();
        let root = builder.build().unwrap();
        let row = arena.row_type(root);
        assert_eq!(row.fields.len(), 1);
        assert_eq!(row.fields[0].name.as_ref(), "b");
    }

    #[test]
    fn build_rejects_leftover_stack() {
        let mut arena = AlgArena::new();
        let mut builder = AlgebraBuilder::new(&mut arena);
        builder.scan(TableId(1), row_ab()).unwrap();
        builder.scan(TableId(2), row_ab()).unwrap();
        assert!(matches!(builder.build(), Err(AlgebraError::UnfinishedBuild(2))));
    }

    #[test]
    fn sort_then_project_keeps_collation_through_input_refs() {
        let mut arena = AlgArena::new();
        let mut builder = AlgebraBuilder::new(&mut arena);
        builder
            .scan(TableId(1), row_ab())
            .unwrap()
            .sort(RelCollation::of([FieldCollation::asc(ColId(0))]), None, None)
            .unwrap()
            .project(
                vec![
                    RexNode::input(1, Type::varchar(8)),
                    RexNode::input(0, Type::integer()),
                ],
                vec!["b".into(), "a".into()],
            )
            .unwrap();
        let root = builder.build().unwrap();
        let collation = &arena.get(root).traits.collation;
        // `a` moved to projection index 1.
        assert_eq!(collation.0, vec![FieldCollation::asc(ColId(1))]);
    }

    #[test]
    fn collation_dies_at_non_monotonic_projection() {
        let mut arena = AlgArena::new();
        let mut builder = AlgebraBuilder::new(&mut arena);
        builder
            .scan(TableId(1), row_ab())
            .unwrap()
            .sort(RelCollation::of([FieldCollation::asc(ColId(0))]), None, None)
            .unwrap()
            .project(
                vec![RexNode::call(
                    ScalarOp::Plus,
                    vec![RexNode::input(0, Type::integer()), RexNode::literal(PolyValue::Int(1))],
                )],
                vec!["a1".into()],
            )
            .unwrap();
        let root = builder.build().unwrap();
        assert!(arena.get(root).traits.collation.is_none());
    }

    #[test]
    fn empty_values_under_join_types_cleanly() {
        let mut arena = AlgArena::new();
        let mut builder = AlgebraBuilder::new(&mut arena);
        builder
            .scan(TableId(1), row_ab())
            .unwrap()
            .values(vec![], 2)
            .unwrap()
            .join(JoinType::Inner, RexNode::literal(PolyValue::Bool(true)))
            .unwrap();
        let root = builder.build().unwrap();
        assert_eq!(arena.row_type(root).fields.len(), 4);
    }
}
