//! Name resolution and type inference against a catalog snapshot.
//!
//! Binding turns the parse tree into a [`BoundStatement`]: every column name
//! becomes an input reference with its resolved [`Type`], every scalar
//! expression a typed [`RexNode`], every table name a [`TableId`]. The
//! converter consumes only bound statements, so an unvalidated tree can never
//! reach plan construction.

use crate::ast::*;
use crate::{SourceMap, SourcePos, SqlError};
use polystore_algebra::{AggCall, AggKind, JoinType, RexNode, ScalarOp, SetOpKind};
use polystore_catalog::{ColumnDef, PartitionKind, Snapshot};
use polystore_primitives::{ColId, ColumnId, NamespaceId, TableId};
use polystore_types::{PolyValue, Type, TypeFamily};

#[derive(Debug, Clone)]
pub struct BoundTable {
    pub table: TableId,
    pub alias: String,
    pub row: Type,
}

#[derive(Debug, Clone)]
pub struct BoundOrder {
    /// Output column index of the ordering key.
    pub field: usize,
    pub asc: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct BoundSelect {
    pub tables: Vec<BoundTable>,
    /// One join per table after the first, condition over the concatenated
    /// row of everything to its left plus itself.
    pub joins: Vec<(JoinType, RexNode)>,
    pub predicate: Option<RexNode>,
    pub group_by: Vec<usize>,
    pub aggs: Vec<AggCall>,
    /// Filter over the aggregate output row.
    pub having: Option<RexNode>,
    /// Final projection; over the aggregate output when `group_by` or
    /// `aggs` are non-empty, over the concatenated input row otherwise.
    pub projections: Vec<(RexNode, Box<str>)>,
    pub distinct: bool,
}

#[derive(Debug, Clone)]
pub enum BoundBody {
    Select(BoundSelect),
    SetOp {
        kind: SetOpKind,
        all: bool,
        left: Box<BoundBody>,
        right: Box<BoundBody>,
    },
    Values { rows: Vec<Vec<RexNode>>, arity: usize },
}

impl BoundBody {
    /// Output field names and types, for ORDER BY resolution and set-op
    /// checks.
    pub fn output_fields(&self) -> Vec<(Box<str>, Type)> {
        match self {
            BoundBody::Select(select) => select
                .projections
                .iter()
                .map(|(rex, name)| (name.clone(), rex.ty().unwrap_or_else(|_| Type::any())))
                .collect(),
            BoundBody::SetOp { left, .. } => left.output_fields(),
            BoundBody::Values { rows, arity } => (0..*arity)
                .map(|i| {
                    let ty = rows
                        .first()
                        .and_then(|r| r.get(i))
                        .and_then(|rex| rex.ty().ok())
                        .unwrap_or_else(Type::null);
                    (format!("EXPR${i}").into_boxed_str(), ty)
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BoundQuery {
    pub body: BoundBody,
    pub order_by: Vec<BoundOrder>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum BoundDdl {
    CreateTable {
        namespace: NamespaceId,
        name: String,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
        unique: Vec<String>,
        store: Option<String>,
    },
    DropTable { table: TableId },
    CreateNamespace { name: String },
    DropNamespace { namespace: NamespaceId },
    AddPlacement {
        table: TableId,
        columns: Vec<ColumnId>,
        store: String,
    },
    DropPlacement { table: TableId, store: String },
    PartitionBy {
        table: TableId,
        kind: PartitionKind,
        column: ColumnId,
        qualifiers: Vec<String>,
    },
    MergePartitions { table: TableId },
    AddColumn { table: TableId, def: ColumnDef },
    DropColumn { table: TableId, column: ColumnId },
    RenameColumn { table: TableId, column: ColumnId, to: String },
    RenameTable { table: TableId, to: String },
}

#[derive(Debug, Clone)]
pub enum BoundStatement {
    Query(BoundQuery),
    Insert {
        table: TableId,
        /// Full-width rows in column order, coerced to the column types.
        rows: Vec<Vec<RexNode>>,
    },
    Update {
        table: TableId,
        assignments: Vec<(ColumnId, RexNode)>,
        predicate: Option<RexNode>,
    },
    Delete {
        table: TableId,
        predicate: Option<RexNode>,
    },
    Ddl(BoundDdl),
    Prepare {
        name: String,
        param_types: Vec<Type>,
        stmt: Box<BoundStatement>,
    },
    Execute { name: String, args: Vec<PolyValue> },
    Begin,
    Commit,
    Rollback,
}

/// Proof that binding succeeded; the only input the converter accepts.
#[derive(Debug, Clone)]
pub struct Validated(pub(crate) BoundStatement);

impl Validated {
    pub fn statement(&self) -> &BoundStatement {
        &self.0
    }

    pub fn into_statement(self) -> BoundStatement {
        self.0
    }
}

pub struct Validator<'a> {
    snapshot: &'a Snapshot,
    current: NamespaceId,
    default: NamespaceId,
    param_types: &'a [Type],
    source: &'a SourceMap,
}

struct ScopeTable {
    alias: String,
    case_sensitive: bool,
    fields: Vec<(String, Type)>,
    offset: usize,
}

struct Scope {
    tables: Vec<ScopeTable>,
}

impl Scope {
    fn arity(&self) -> usize {
        self.tables.iter().map(|t| t.fields.len()).sum()
    }

    fn resolve(&self, qualifier: Option<&str>, name: &str, pos: SourcePos) -> Result<(usize, Type), SqlError> {
        let mut hits = Vec::new();
        for table in &self.tables {
            if let Some(q) = qualifier {
                if !table.alias.eq_ignore_ascii_case(q) {
                    continue;
                }
            }
            for (i, (field, ty)) in table.fields.iter().enumerate() {
                let matches = if table.case_sensitive {
                    field == name
                } else {
                    field.eq_ignore_ascii_case(name)
                };
                if matches {
                    hits.push((table.offset + i, ty.clone()));
                }
            }
        }
        match hits.len() {
            0 => Err(SqlError::UnknownColumn { name: name.to_string(), pos }),
            1 => Ok(hits.pop().expect("len 1")),
            _ => Err(SqlError::AmbiguousColumn { name: name.to_string(), pos }),
        }
    }
}

impl<'a> Validator<'a> {
    pub fn new(
        snapshot: &'a Snapshot,
        current: NamespaceId,
        default: NamespaceId,
        param_types: &'a [Type],
        source: &'a SourceMap,
    ) -> Self {
        Self { snapshot, current, default, param_types, source }
    }

    pub fn validate(&self, ast: &SqlAst) -> Result<Validated, SqlError> {
        Ok(Validated(self.bind_statement(ast)?))
    }

    fn bind_statement(&self, ast: &SqlAst) -> Result<BoundStatement, SqlError> {
        match ast {
            SqlAst::Query(q) => Ok(BoundStatement::Query(self.bind_query(q)?)),
            SqlAst::Insert { table, columns, source } => self.bind_insert(table, columns, source),
            SqlAst::Update { table, assignments, predicate } => {
                let t = self.lookup_table(table)?;
                let scope = self.table_scope(&t);
                let assignments = assignments
                    .iter()
                    .map(|(col_name, expr)| {
                        let pos = self.source.pos_of(col_name);
                        let col = t
                            .column_by_name(self.namespace_of(&t), col_name)
                            .ok_or_else(|| SqlError::UnknownColumn { name: col_name.clone(), pos })?;
                        let bound = self.bind_expr(expr, &scope)?;
                        let coerced = coerce_assignment(bound, col.declared_type(), col_name, pos)?;
                        Ok((col.id, coerced))
                    })
                    .collect::<Result<Vec<_>, SqlError>>()?;
                let predicate = self.bind_predicate(predicate.as_ref(), &scope)?;
                Ok(BoundStatement::Update { table: t.id, assignments, predicate })
            }
            SqlAst::Delete { table, predicate } => {
                let t = self.lookup_table(table)?;
                let scope = self.table_scope(&t);
                let predicate = self.bind_predicate(predicate.as_ref(), &scope)?;
                Ok(BoundStatement::Delete { table: t.id, predicate })
            }
            SqlAst::CreateTable { name, columns, primary_key, store } => {
                let namespace = self.resolve_namespace(name.qualifier.as_deref())?;
                let defs = columns
                    .iter()
                    .map(|c| {
                        c.ty.check().map_err(|e| SqlError::TypeAt {
                            source: e,
                            pos: self.source.pos_of(&c.name),
                        })?;
                        Ok(ColumnDef {
                            name: c.name.clone(),
                            ty: c.ty.clone(),
                            nullable: c.nullable,
                            default: c.default.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, SqlError>>()?;
                let unique = columns.iter().filter(|c| c.unique).map(|c| c.name.clone()).collect();
                Ok(BoundStatement::Ddl(BoundDdl::CreateTable {
                    namespace,
                    name: name.name.clone(),
                    columns: defs,
                    primary_key: primary_key.clone(),
                    unique,
                    store: store.clone(),
                }))
            }
            SqlAst::DropTable { name } => {
                let t = self.lookup_table(name)?;
                Ok(BoundStatement::Ddl(BoundDdl::DropTable { table: t.id }))
            }
            SqlAst::CreateNamespace { name } => {
                Ok(BoundStatement::Ddl(BoundDdl::CreateNamespace { name: name.clone() }))
            }
            SqlAst::DropNamespace { name } => {
                let ns = self
                    .snapshot
                    .namespace_by_name(name)
                    .ok_or_else(|| SqlError::Validation {
                        message: format!("unknown namespace `{name}`"),
                        pos: self.source.pos_of(name),
                    })?;
                Ok(BoundStatement::Ddl(BoundDdl::DropNamespace { namespace: ns.id }))
            }
            SqlAst::AlterTable { name, action } => self.bind_alter(name, action),
            SqlAst::Prepare { name, param_types, stmt } => {
                let inner = Validator {
                    snapshot: self.snapshot,
                    current: self.current,
                    default: self.default,
                    param_types,
                    source: self.source,
                };
                let stmt = inner.bind_statement(stmt)?;
                Ok(BoundStatement::Prepare {
                    name: name.clone(),
                    param_types: param_types.clone(),
                    stmt: Box::new(stmt),
                })
            }
            SqlAst::Execute { name, args } => {
                Ok(BoundStatement::Execute { name: name.clone(), args: args.clone() })
            }
            SqlAst::Begin => Ok(BoundStatement::Begin),
            SqlAst::Commit => Ok(BoundStatement::Commit),
            SqlAst::Rollback => Ok(BoundStatement::Rollback),
        }
    }

    // ------------------------------------------------------------ lookup

    fn lookup_table(&self, name: &ObjectNameAst) -> Result<&'a polystore_catalog::LogicalTable, SqlError> {
        self.snapshot
            .resolve_table(name.qualifier.as_deref(), &name.name, self.current, self.default)
            .map_err(|_| SqlError::UnknownTable {
                name: name.name.clone(),
                pos: self.source.pos_of(&name.name),
            })
    }

    fn resolve_namespace(&self, qualifier: Option<&str>) -> Result<NamespaceId, SqlError> {
        match qualifier {
            None => Ok(self.current),
            Some(q) => self
                .snapshot
                .namespace_by_name(q)
                .map(|ns| ns.id)
                .ok_or_else(|| SqlError::Validation {
                    message: format!("unknown namespace `{q}`"),
                    pos: self.source.pos_of(q),
                }),
        }
    }

    fn namespace_of(&self, table: &polystore_catalog::LogicalTable) -> &'a polystore_catalog::LogicalNamespace {
        self.snapshot
            .namespace(table.namespace_id)
            .expect("table namespaces resolve in the same snapshot")
    }

    fn table_scope(&self, table: &polystore_catalog::LogicalTable) -> Scope {
        let ns = self.namespace_of(table);
        Scope {
            tables: vec![ScopeTable {
                alias: table.name.clone(),
                case_sensitive: ns.case_sensitive,
                fields: table
                    .columns
                    .iter()
                    .map(|c| (c.name.clone(), c.declared_type()))
                    .collect(),
                offset: 0,
            }],
        }
    }

    // ------------------------------------------------------------ queries

    pub fn bind_query(&self, query: &QueryAst) -> Result<BoundQuery, SqlError> {
        let body = self.bind_body(&query.body)?;
        let fields = body.output_fields();
        let order_by = query
            .order_by
            .iter()
            .map(|item| {
                let field = self.resolve_output_column(&item.expr, &fields)?;
                Ok(BoundOrder { field, asc: item.asc, nulls_first: item.nulls_first })
            })
            .collect::<Result<Vec<_>, SqlError>>()?;
        Ok(BoundQuery {
            body,
            order_by,
            limit: query.limit.map(|l| l as usize),
            offset: query.offset.map(|o| o as usize),
        })
    }

    /// ORDER BY keys name output columns, by alias or 1-based ordinal.
    fn resolve_output_column(
        &self,
        expr: &ExprAst,
        fields: &[(Box<str>, Type)],
    ) -> Result<usize, SqlError> {
        match expr {
            ExprAst::Column { qualifier: None, name } => {
                let pos = self.source.pos_of(name);
                let hits: Vec<usize> = fields
                    .iter()
                    .enumerate()
                    .filter(|(_, (f, _))| f.eq_ignore_ascii_case(name))
                    .map(|(i, _)| i)
                    .collect();
                match hits.as_slice() {
                    [] => Err(SqlError::UnknownColumn { name: name.clone(), pos }),
                    [one] => Ok(*one),
                    _ => Err(SqlError::AmbiguousColumn { name: name.clone(), pos }),
                }
            }
            ExprAst::Literal(PolyValue::Int(ordinal)) => {
                let i = *ordinal as usize;
                if i >= 1 && i <= fields.len() {
                    Ok(i - 1)
                } else {
                    Err(SqlError::validation(
                        format!("ORDER BY ordinal {ordinal} out of range"),
                        SourcePos::START,
                    ))
                }
            }
            _ => Err(SqlError::Unsupported("ORDER BY over arbitrary expressions".into())),
        }
    }

    fn bind_body(&self, body: &QueryBody) -> Result<BoundBody, SqlError> {
        match body {
            QueryBody::Select(select) => Ok(BoundBody::Select(self.bind_select(select)?)),
            QueryBody::SetOp { kind, all, left, right } => {
                let left = self.bind_body(left)?;
                let right = self.bind_body(right)?;
                let (l, r) = (left.output_fields(), right.output_fields());
                if l.len() != r.len() {
                    return Err(SqlError::validation(
                        format!("set operation inputs have {} and {} columns", l.len(), r.len()),
                        SourcePos::START,
                    ));
                }
                for ((_, lt), (_, rt)) in l.iter().zip(&r) {
                    if !lt.family().accepts(rt.family()) && !rt.family().accepts(lt.family()) {
                        return Err(SqlError::validation(
                            format!("set operation columns `{lt}` and `{rt}` are incompatible"),
                            SourcePos::START,
                        ));
                    }
                }
                Ok(BoundBody::SetOp {
                    kind: *kind,
                    all: *all,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            QueryBody::Values(rows) => {
                let arity = rows.first().map(|r| r.len()).unwrap_or(0);
                let empty = Scope { tables: Vec::new() };
                let rows = rows
                    .iter()
                    .map(|row| {
                        if row.len() != arity {
                            return Err(SqlError::validation(
                                "VALUES rows have differing arity",
                                SourcePos::START,
                            ));
                        }
                        row.iter().map(|e| self.bind_expr(e, &empty)).collect()
                    })
                    .collect::<Result<Vec<Vec<_>>, SqlError>>()?;
                Ok(BoundBody::Values { rows, arity })
            }
        }
    }

    fn bind_select(&self, select: &SelectAst) -> Result<BoundSelect, SqlError> {
        if select.from.is_empty() {
            // `SELECT expr` without FROM is a single-row VALUES in disguise;
            // bind it as a one-table-less projection over nothing.
            let empty = Scope { tables: Vec::new() };
            let projections = self.bind_projection_simple(select, &empty)?;
            return Ok(BoundSelect {
                tables: Vec::new(),
                joins: Vec::new(),
                predicate: None,
                group_by: Vec::new(),
                aggs: Vec::new(),
                having: None,
                projections,
                distinct: select.distinct,
            });
        }

        let mut scope = Scope { tables: Vec::new() };
        let mut tables = Vec::new();
        let mut joins = Vec::new();
        for table_ref in &select.from {
            let t = self.lookup_table(&table_ref.name)?;
            let ns = self.namespace_of(t);
            let offset = scope.arity();
            scope.tables.push(ScopeTable {
                alias: table_ref.alias.clone().unwrap_or_else(|| t.name.clone()),
                case_sensitive: ns.case_sensitive,
                fields: t.columns.iter().map(|c| (c.name.clone(), c.declared_type())).collect(),
                offset,
            });
            tables.push(BoundTable {
                table: t.id,
                alias: table_ref.alias.clone().unwrap_or_else(|| t.name.clone()),
                row: t.row_type(),
            });
            if let Some((kind, on)) = &table_ref.join {
                let join_type = match kind {
                    JoinKindAst::Inner => JoinType::Inner,
                    JoinKindAst::Left => JoinType::Left,
                    JoinKindAst::Right => JoinType::Right,
                    JoinKindAst::Full => JoinType::Full,
                };
                // The condition sees everything joined so far.
                let cond = self.bind_expr(on, &scope)?;
                expect_boolean(&cond)?;
                joins.push((join_type, cond));
            }
        }

        let predicate = self.bind_predicate(select.selection.as_ref(), &scope)?;

        let group_by = select
            .group_by
            .iter()
            .map(|e| match e {
                ExprAst::Column { qualifier, name } => {
                    let pos = self.source.pos_of(name);
                    scope.resolve(qualifier.as_deref(), name, pos).map(|(i, _)| i)
                }
                _ => Err(SqlError::Unsupported("GROUP BY over expressions".into())),
            })
            .collect::<Result<Vec<_>, SqlError>>()?;

        let has_aggs = select.having.is_some()
            || !group_by.is_empty()
            || select.projection.iter().any(|item| {
                matches!(item, SelectItemAst::Expr { expr, .. } if aggregate_of(expr).is_some())
            });

        if !has_aggs {
            let projections = self.bind_projection_simple(select, &scope)?;
            return Ok(BoundSelect {
                tables,
                joins,
                predicate,
                group_by,
                aggs: Vec::new(),
                having: None,
                projections,
                distinct: select.distinct,
            });
        }

        // Aggregate query: the aggregate output row is the group keys in
        // order followed by one field per aggregate call; projections and
        // HAVING are rebound over that row.
        let mut aggs: Vec<AggCall> = Vec::new();
        let mut add_agg = |call: AggCall| -> usize {
            if let Some(i) = aggs.iter().position(|a| *a == call) {
                return i;
            }
            aggs.push(call);
            aggs.len() - 1
        };

        let mut projections = Vec::new();
        for item in &select.projection {
            let SelectItemAst::Expr { expr, alias } = item else {
                return Err(SqlError::Unsupported("wildcard in an aggregate query".into()));
            };
            if let Some((kind, arg, distinct)) = aggregate_of(expr) {
                let (call, ty) = self.bind_agg(kind, arg, distinct, &scope)?;
                let idx = add_agg(call);
                let name = alias
                    .clone()
                    .map(Into::into)
                    .unwrap_or_else(|| agg_display(kind).into());
                projections.push((
                    RexNode::input(group_by.len() + idx, ty),
                    name,
                ));
            } else {
                // Non-aggregate projections must be group keys.
                let bound = self.bind_expr(expr, &scope)?;
                let rebased = rebase_on_group(&bound, &group_by).ok_or_else(|| {
                    SqlError::validation(
                        "projection is neither an aggregate nor grouped",
                        SourcePos::START,
                    )
                })?;
                let name: Box<str> = alias
                    .clone()
                    .map(Into::into)
                    .unwrap_or_else(|| display_name(expr).into());
                projections.push((rebased, name));
            }
        }

        let having = match &select.having {
            None => None,
            Some(expr) => {
                let rebound = self.rebind_over_aggs(expr, &scope, &group_by, &mut add_agg)?;
                expect_boolean(&rebound)?;
                Some(rebound)
            }
        };

        Ok(BoundSelect {
            tables,
            joins,
            predicate,
            group_by,
            aggs,
            having,
            projections,
            distinct: select.distinct,
        })
    }

    fn bind_projection_simple(
        &self,
        select: &SelectAst,
        scope: &Scope,
    ) -> Result<Vec<(RexNode, Box<str>)>, SqlError> {
        let mut out = Vec::new();
        for item in &select.projection {
            match item {
                SelectItemAst::Wildcard => {
                    for table in &scope.tables {
                        for (i, (name, ty)) in table.fields.iter().enumerate() {
                            out.push((RexNode::input(table.offset + i, ty.clone()), name.as_str().into()));
                        }
                    }
                }
                SelectItemAst::QualifiedWildcard(qualifier) => {
                    let table = scope
                        .tables
                        .iter()
                        .find(|t| t.alias.eq_ignore_ascii_case(qualifier))
                        .ok_or_else(|| SqlError::UnknownTable {
                            name: qualifier.clone(),
                            pos: self.source.pos_of(qualifier),
                        })?;
                    for (i, (name, ty)) in table.fields.iter().enumerate() {
                        out.push((RexNode::input(table.offset + i, ty.clone()), name.as_str().into()));
                    }
                }
                SelectItemAst::Expr { expr, alias } => {
                    if aggregate_of(expr).is_some() {
                        return Err(SqlError::validation(
                            "aggregate without GROUP BY must be the whole query",
                            SourcePos::START,
                        ));
                    }
                    let bound = self.bind_expr(expr, scope)?;
                    bound.ty().map_err(|e| SqlError::TypeAt { source: e, pos: SourcePos::START })?;
                    let name: Box<str> = alias
                        .clone()
                        .map(Into::into)
                        .unwrap_or_else(|| display_name(expr).into());
                    out.push((bound, name));
                }
            }
        }
        Ok(out)
    }

    fn bind_agg(
        &self,
        kind: AggKind,
        arg: Option<&ExprAst>,
        distinct: bool,
        scope: &Scope,
    ) -> Result<(AggCall, Type), SqlError> {
        let (arg_col, arg_ty) = match arg {
            None => (None, None),
            Some(ExprAst::Column { qualifier, name }) => {
                let pos = self.source.pos_of(name);
                let (i, ty) = scope.resolve(qualifier.as_deref(), name, pos)?;
                (Some(ColId(i as u32)), Some(ty))
            }
            Some(_) => return Err(SqlError::Unsupported("aggregate over expressions".into())),
        };
        if matches!(kind, AggKind::Sum | AggKind::Avg) {
            if let Some(ty) = &arg_ty {
                if ty.family() != TypeFamily::Numeric {
                    return Err(SqlError::NoMatchingOverload {
                        name: agg_display(kind).into(),
                        operands: ty.to_string(),
                        pos: SourcePos::START,
                    });
                }
            }
        }
        let call = AggCall { kind, arg: arg_col, distinct };
        let ty = kind.result_type(arg_ty.as_ref());
        Ok((call, ty))
    }

    /// Rewrites a HAVING expression over the aggregate output row: aggregate
    /// calls become references to (possibly appended) agg fields, column
    /// refs must be group keys.
    fn rebind_over_aggs(
        &self,
        expr: &ExprAst,
        scope: &Scope,
        group_by: &[usize],
        add_agg: &mut impl FnMut(AggCall) -> usize,
    ) -> Result<RexNode, SqlError> {
        if let Some((kind, arg, distinct)) = aggregate_of(expr) {
            let (call, ty) = self.bind_agg(kind, arg, distinct, scope)?;
            let idx = add_agg(call);
            return Ok(RexNode::input(group_by.len() + idx, ty));
        }
        match expr {
            ExprAst::Column { qualifier, name } => {
                let pos = self.source.pos_of(name);
                let (abs, ty) = scope.resolve(qualifier.as_deref(), name, pos)?;
                let key = group_by.iter().position(|g| *g == abs).ok_or_else(|| {
                    SqlError::validation(format!("`{name}` must appear in GROUP BY"), pos)
                })?;
                Ok(RexNode::input(key, ty))
            }
            ExprAst::Literal(v) => Ok(RexNode::literal(v.clone())),
            ExprAst::Param(i) => self.bind_param(*i),
            ExprAst::Binary { op, lhs, rhs } => {
                let lhs = self.rebind_over_aggs(lhs, scope, group_by, add_agg)?;
                let rhs = self.rebind_over_aggs(rhs, scope, group_by, add_agg)?;
                self.typed_call(bin_op(*op), vec![lhs, rhs])
            }
            ExprAst::Not(e) => {
                let e = self.rebind_over_aggs(e, scope, group_by, add_agg)?;
                self.typed_call(ScalarOp::Not, vec![e])
            }
            other => Err(SqlError::Unsupported(format!("HAVING expression {other:?}"))),
        }
    }

    // ------------------------------------------------------------ DML

    fn bind_insert(
        &self,
        table: &ObjectNameAst,
        columns: &[String],
        source: &QueryAst,
    ) -> Result<BoundStatement, SqlError> {
        let t = self.lookup_table(table)?;
        let ns = self.namespace_of(t);
        let QueryBody::Values(value_rows) = &source.body else {
            return Err(SqlError::Unsupported("INSERT from a query".into()));
        };

        // Map each target column to its position in the VALUES row.
        let targets: Vec<&polystore_catalog::LogicalColumn> = if columns.is_empty() {
            t.columns.iter().collect()
        } else {
            columns
                .iter()
                .map(|name| {
                    t.column_by_name(ns, name).ok_or_else(|| SqlError::UnknownColumn {
                        name: name.clone(),
                        pos: self.source.pos_of(name),
                    })
                })
                .collect::<Result<Vec<_>, SqlError>>()?
        };

        let empty = Scope { tables: Vec::new() };
        let mut rows = Vec::with_capacity(value_rows.len());
        for value_row in value_rows {
            if value_row.len() != targets.len() {
                return Err(SqlError::validation(
                    format!("INSERT expects {} values, got {}", targets.len(), value_row.len()),
                    SourcePos::START,
                ));
            }
            let mut full = Vec::with_capacity(t.columns.len());
            for col in &t.columns {
                let pos = self.source.pos_of(&col.name);
                let supplied = targets.iter().position(|c| c.id == col.id);
                let rex = match supplied {
                    Some(i) => {
                        let bound = self.bind_expr(&value_row[i], &empty)?;
                        coerce_assignment(bound, col.declared_type(), &col.name, pos)?
                    }
                    None => match &col.default {
                        Some(v) => RexNode::literal(v.clone()),
                        None if col.nullable => RexNode::Literal {
                            value: PolyValue::Null,
                            ty: col.declared_type(),
                        },
                        None => {
                            return Err(SqlError::validation(
                                format!("column `{}` has no default and is not nullable", col.name),
                                pos,
                            ))
                        }
                    },
                };
                full.push(rex);
            }
            rows.push(full);
        }
        Ok(BoundStatement::Insert { table: t.id, rows })
    }

    fn bind_alter(&self, name: &ObjectNameAst, action: &AlterAction) -> Result<BoundStatement, SqlError> {
        let t = self.lookup_table(name)?;
        let ns = self.namespace_of(t);
        let column_id = |col: &str| -> Result<ColumnId, SqlError> {
            t.column_by_name(ns, col)
                .map(|c| c.id)
                .ok_or_else(|| SqlError::UnknownColumn {
                    name: col.to_string(),
                    pos: self.source.pos_of(col),
                })
        };
        let ddl = match action {
            AlterAction::AddPlacement { columns, store } => BoundDdl::AddPlacement {
                table: t.id,
                columns: columns.iter().map(|c| column_id(c)).collect::<Result<_, _>>()?,
                store: store.clone(),
            },
            AlterAction::DropPlacement { store } => {
                BoundDdl::DropPlacement { table: t.id, store: store.clone() }
            }
            AlterAction::PartitionBy { kind, column, spec } => {
                let column = column_id(column)?;
                let qualifiers = match spec {
                    PartitionSpecAst::Count(n) => {
                        (0..*n).map(|i| format!("{i}/{n}")).collect()
                    }
                    PartitionSpecAst::Values(groups) => groups
                        .iter()
                        .map(|vs| vs.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(","))
                        .collect(),
                };
                BoundDdl::PartitionBy { table: t.id, kind: *kind, column, qualifiers }
            }
            AlterAction::MergePartitions => BoundDdl::MergePartitions { table: t.id },
            AlterAction::AddColumn(col) => BoundDdl::AddColumn {
                table: t.id,
                def: ColumnDef {
                    name: col.name.clone(),
                    ty: col.ty.clone(),
                    nullable: col.nullable,
                    default: col.default.clone(),
                },
            },
            AlterAction::DropColumn(col) => {
                BoundDdl::DropColumn { table: t.id, column: column_id(col)? }
            }
            AlterAction::RenameColumn { from, to } => BoundDdl::RenameColumn {
                table: t.id,
                column: column_id(from)?,
                to: to.clone(),
            },
            AlterAction::RenameTable { to } => BoundDdl::RenameTable { table: t.id, to: to.clone() },
        };
        Ok(BoundStatement::Ddl(ddl))
    }

    // ------------------------------------------------------------ expressions

    fn bind_predicate(&self, expr: Option<&ExprAst>, scope: &Scope) -> Result<Option<RexNode>, SqlError> {
        match expr {
            None => Ok(None),
            Some(expr) => {
                if aggregate_of(expr).is_some() {
                    return Err(SqlError::validation(
                        "aggregates are not allowed in WHERE",
                        SourcePos::START,
                    ));
                }
                let bound = self.bind_expr(expr, scope)?;
                expect_boolean(&bound)?;
                Ok(Some(bound))
            }
        }
    }

    fn bind_param(&self, index: usize) -> Result<RexNode, SqlError> {
        let ty = self.param_types.get(index).cloned().ok_or_else(|| {
            SqlError::validation(
                format!("placeholder ?{index} has no declared type"),
                SourcePos::START,
            )
        })?;
        Ok(RexNode::DynamicParam { index, ty })
    }

    fn typed_call(&self, op: ScalarOp, args: Vec<RexNode>) -> Result<RexNode, SqlError> {
        let call = RexNode::call(op, args);
        call.ty().map_err(|e| SqlError::TypeAt { source: e, pos: SourcePos::START })?;
        Ok(call)
    }

    fn bind_expr(&self, expr: &ExprAst, scope: &Scope) -> Result<RexNode, SqlError> {
        match expr {
            ExprAst::Column { qualifier, name } => {
                let pos = self.source.pos_of(name);
                let (index, ty) = scope.resolve(qualifier.as_deref(), name, pos)?;
                Ok(RexNode::input(index, ty))
            }
            ExprAst::Literal(v) => Ok(RexNode::literal(v.clone())),
            ExprAst::Param(i) => self.bind_param(*i),
            ExprAst::Binary { op, lhs, rhs } => {
                let lhs = self.bind_expr(lhs, scope)?;
                let rhs = self.bind_expr(rhs, scope)?;
                self.typed_call(bin_op(*op), vec![lhs, rhs])
            }
            ExprAst::Not(e) => {
                let e = self.bind_expr(e, scope)?;
                self.typed_call(ScalarOp::Not, vec![e])
            }
            ExprAst::Neg(e) => {
                let e = self.bind_expr(e, scope)?;
                self.typed_call(ScalarOp::Negate, vec![e])
            }
            ExprAst::IsNull { expr, negated } => {
                let e = self.bind_expr(expr, scope)?;
                let op = if *negated { ScalarOp::IsNotNull } else { ScalarOp::IsNull };
                self.typed_call(op, vec![e])
            }
            ExprAst::Cast { expr, ty } => {
                let e = self.bind_expr(expr, scope)?;
                ty.check().map_err(|err| SqlError::TypeAt { source: err, pos: SourcePos::START })?;
                self.typed_call(ScalarOp::Cast(ty.clone()), vec![e])
            }
            ExprAst::Function { name, args, star, .. } => {
                if aggregate_of(expr).is_some() {
                    return Err(SqlError::validation(
                        format!("aggregate `{name}` is not allowed here"),
                        self.source.pos_of(name),
                    ));
                }
                if *star {
                    return Err(SqlError::Unsupported(format!("{name}(*)")));
                }
                let bound: Vec<RexNode> = args
                    .iter()
                    .map(|a| self.bind_expr(a, scope))
                    .collect::<Result<_, _>>()?;
                let tys: Vec<Type> = bound
                    .iter()
                    .map(|b| b.ty())
                    .collect::<Result<_, _>>()
                    .map_err(|e| SqlError::TypeAt { source: e, pos: self.source.pos_of(name) })?;
                let op = self.resolve_function(name, &tys)?;
                self.typed_call(op, bound)
            }
        }
    }

    /// Scalar-function overload resolution by operand type family, with the
    /// numeric family absorbing integer widths and character coercion.
    fn resolve_function(&self, name: &str, operands: &[Type]) -> Result<ScalarOp, SqlError> {
        let pos = self.source.pos_of(name);
        let no_match = || SqlError::NoMatchingOverload {
            name: name.to_string(),
            operands: operands.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", "),
            pos,
        };
        let accepts = |families: &[TypeFamily]| {
            operands.len() == families.len()
                && operands.iter().zip(families).all(|(t, f)| f.accepts(t.family()))
        };
        match name {
            "abs" => accepts(&[TypeFamily::Numeric]).then_some(ScalarOp::Abs).ok_or_else(no_match),
            "mod" => accepts(&[TypeFamily::Numeric, TypeFamily::Numeric])
                .then_some(ScalarOp::Modulo)
                .ok_or_else(no_match),
            "upper" => accepts(&[TypeFamily::Character]).then_some(ScalarOp::Upper).ok_or_else(no_match),
            "lower" => accepts(&[TypeFamily::Character]).then_some(ScalarOp::Lower).ok_or_else(no_match),
            "char_length" | "character_length" => accepts(&[TypeFamily::Character])
                .then_some(ScalarOp::CharLength)
                .ok_or_else(no_match),
            "coalesce" => {
                if operands.is_empty() {
                    return Err(no_match());
                }
                Ok(ScalarOp::Coalesce)
            }
            _ => Err(no_match()),
        }
    }
}

fn expect_boolean(rex: &RexNode) -> Result<(), SqlError> {
    let ty = rex.ty().map_err(|e| SqlError::TypeAt { source: e, pos: SourcePos::START })?;
    if !matches!(ty.family(), TypeFamily::Boolean | TypeFamily::Null) {
        return Err(SqlError::validation(
            format!("expected a BOOLEAN condition, found `{ty}`"),
            SourcePos::START,
        ));
    }
    Ok(())
}

/// Inserts the cast required to store `bound` into a column of `target`.
fn coerce_assignment(
    bound: RexNode,
    target: Type,
    column: &str,
    pos: SourcePos,
) -> Result<RexNode, SqlError> {
    let ty = bound.ty().map_err(|e| SqlError::TypeAt { source: e, pos })?;
    if ty.is_null() {
        if !target.nullable {
            return Err(SqlError::validation(
                format!("column `{column}` is not nullable"),
                pos,
            ));
        }
        return Ok(bound);
    }
    if ty.tag == target.tag {
        return Ok(bound);
    }
    if target.clone().with_nullable(true).assignable_from(&ty.clone().with_nullable(false))
        || (target.family() == ty.family())
    {
        return Ok(RexNode::cast(bound, target));
    }
    Err(SqlError::TypeAt {
        source: polystore_types::TypeError::Mismatch {
            expected: target.to_string(),
            found: ty.to_string(),
        },
        pos,
    })
}

fn aggregate_of(expr: &ExprAst) -> Option<(AggKind, Option<&ExprAst>, bool)> {
    let ExprAst::Function { name, args, distinct, star } = expr else {
        return None;
    };
    let kind = match name.as_str() {
        "count" if *star => AggKind::CountStar,
        "count" => AggKind::Count,
        "sum" => AggKind::Sum,
        "min" => AggKind::Min,
        "max" => AggKind::Max,
        "avg" => AggKind::Avg,
        _ => return None,
    };
    Some((kind, args.first(), *distinct))
}

fn agg_display(kind: AggKind) -> &'static str {
    match kind {
        AggKind::Count | AggKind::CountStar => "count",
        AggKind::Sum => "sum",
        AggKind::Min => "min",
        AggKind::Max => "max",
        AggKind::Avg => "avg",
    }
}

fn display_name(expr: &ExprAst) -> String {
    match expr {
        ExprAst::Column { name, .. } => name.clone(),
        _ => "EXPR".to_string(),
    }
}

/// Maps a bound expression over the concatenated input row onto the group
/// keys of the aggregate output; `None` when it references a non-key field.
fn rebase_on_group(rex: &RexNode, group_by: &[usize]) -> Option<RexNode> {
    let refs = rex.input_refs();
    for r in &refs {
        group_by.iter().position(|g| g == r)?;
    }
    Some(rex.map_input_refs(&|i| {
        group_by
            .iter()
            .position(|g| *g == i)
            .expect("checked above")
    }))
}

fn bin_op(op: BinaryOp) -> ScalarOp {
    match op {
        BinaryOp::Eq => ScalarOp::Eq,
        BinaryOp::NotEq => ScalarOp::NotEq,
        BinaryOp::Lt => ScalarOp::Lt,
        BinaryOp::LtEq => ScalarOp::LtEq,
        BinaryOp::Gt => ScalarOp::Gt,
        BinaryOp::GtEq => ScalarOp::GtEq,
        BinaryOp::And => ScalarOp::And,
        BinaryOp::Or => ScalarOp::Or,
        BinaryOp::Plus => ScalarOp::Plus,
        BinaryOp::Minus => ScalarOp::Minus,
        BinaryOp::Times => ScalarOp::Times,
        BinaryOp::Divide => ScalarOp::Divide,
        BinaryOp::Modulo => ScalarOp::Modulo,
        BinaryOp::Concat => ScalarOp::Concat,
    }
}
