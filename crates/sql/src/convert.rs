//! Bound statements to algebra.
//!
//! The converter is shape only: all naming and typing happened during
//! binding, so this walk just drives the [`AlgebraBuilder`] stack machine.

use crate::validate::{BoundBody, BoundQuery, BoundSelect, BoundStatement, Validated};
use crate::SqlError;
use polystore_algebra::{
    AlgArena, AlgebraBuilder, Direction, FieldCollation, ModifyOp, NodeId, NullPlacement,
    RelCollation, RexNode,
};
use polystore_catalog::Snapshot;
use polystore_primitives::{ColId, ColList};

pub struct Converter<'a> {
    arena: &'a mut AlgArena,
    snapshot: &'a Snapshot,
}

impl<'a> Converter<'a> {
    pub fn new(arena: &'a mut AlgArena, snapshot: &'a Snapshot) -> Self {
        Self { arena, snapshot }
    }

    /// Converts a validated query or DML statement into a logical plan.
    pub fn convert(&mut self, validated: &Validated) -> Result<NodeId, SqlError> {
        match validated.statement() {
            BoundStatement::Query(q) => self.convert_query(q),
            BoundStatement::Insert { table, rows } => {
                let mut b = AlgebraBuilder::new(self.arena);
                let arity = self.snapshot.table(*table)?.columns.len();
                b.values(rows.clone(), arity)?;
                b.modify(*table, ModifyOp::Insert, Vec::new(), Vec::new())?;
                Ok(b.build()?)
            }
            BoundStatement::Update { table, assignments, predicate } => {
                let t = self.snapshot.table(*table)?;
                let row = t.row_type();
                let mut b = AlgebraBuilder::new(self.arena);
                b.scan(*table, row)?;
                if let Some(p) = predicate {
                    b.filter(p.clone())?;
                }
                let (columns, sources): (Vec<_>, Vec<_>) = assignments.iter().cloned().unzip();
                b.modify(*table, ModifyOp::Update, columns, sources)?;
                Ok(b.build()?)
            }
            BoundStatement::Delete { table, predicate } => {
                let t = self.snapshot.table(*table)?;
                let row = t.row_type();
                let mut b = AlgebraBuilder::new(self.arena);
                b.scan(*table, row)?;
                if let Some(p) = predicate {
                    b.filter(p.clone())?;
                }
                b.modify(*table, ModifyOp::Delete, Vec::new(), Vec::new())?;
                Ok(b.build()?)
            }
            // DDL and transaction control never reach plan construction; a
            // caller landing here skipped the bind step for this statement.
            _ => Err(SqlError::ValidationRequired),
        }
    }

    pub fn convert_query(&mut self, query: &BoundQuery) -> Result<NodeId, SqlError> {
        let root = self.convert_body(&query.body)?;
        if query.order_by.is_empty() && query.limit.is_none() && query.offset.is_none() {
            return Ok(root);
        }
        let collation = RelCollation::of(query.order_by.iter().map(|o| FieldCollation {
            field: ColId(o.field as u32),
            direction: if o.asc { Direction::Ascending } else { Direction::Descending },
            // PostgreSQL defaults: NULLS LAST ascending, NULLS FIRST
            // descending.
            nulls: match o.nulls_first {
                Some(true) => NullPlacement::First,
                Some(false) => NullPlacement::Last,
                None if o.asc => NullPlacement::Last,
                None => NullPlacement::First,
            },
        }));
        let mut b = AlgebraBuilder::new(self.arena);
        b.push(root);
        b.sort(collation, query.offset, query.limit)?;
        Ok(b.build()?)
    }

    fn convert_body(&mut self, body: &BoundBody) -> Result<NodeId, SqlError> {
        match body {
            BoundBody::Values { rows, arity } => {
                let mut b = AlgebraBuilder::new(self.arena);
                b.values(rows.clone(), *arity)?;
                Ok(b.build()?)
            }
            BoundBody::SetOp { kind, all, left, right } => {
                let left = self.convert_body(left)?;
                let right = self.convert_body(right)?;
                let mut b = AlgebraBuilder::new(self.arena);
                b.push(left);
                b.push(right);
                b.set_op(*kind, *all)?;
                Ok(b.build()?)
            }
            BoundBody::Select(select) => self.convert_select(select),
        }
    }

    fn convert_select(&mut self, select: &BoundSelect) -> Result<NodeId, SqlError> {
        let mut b = AlgebraBuilder::new(self.arena);

        if select.tables.is_empty() {
            // FROM-less SELECT: one empty row projected through the exprs.
            b.values(vec![Vec::new()], 0)?;
        } else {
            b.scan(select.tables[0].table, select.tables[0].row.clone())?;
            for (i, table) in select.tables.iter().enumerate().skip(1) {
                b.scan(table.table, table.row.clone())?;
                let (join_type, cond) = &select.joins[i - 1];
                b.join(*join_type, cond.clone())?;
            }
        }

        if let Some(p) = &select.predicate {
            b.filter(p.clone())?;
        }

        if !select.group_by.is_empty() || !select.aggs.is_empty() {
            let group = ColList::from_iter(select.group_by.iter().map(|i| ColId(*i as u32)));
            b.aggregate(group, select.aggs.clone())?;
            if let Some(h) = &select.having {
                b.filter(h.clone())?;
            }
        }

        let (exprs, names): (Vec<RexNode>, Vec<Box<str>>) =
            select.projections.iter().cloned().unzip();
        b.project(exprs, names)?;

        if select.distinct {
            let arity = b.peek_row()?.fields.len();
            let group = ColList::from_iter((0..arity).map(|i| ColId(i as u32)));
            b.aggregate(group, Vec::new())?;
        }

        Ok(b.build()?)
    }
}
