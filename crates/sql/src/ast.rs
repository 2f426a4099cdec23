//! The language-neutral parse tree the validator consumes and `unparse`
//! renders back to SQL.

use itertools::Itertools;
use polystore_algebra::SetOpKind;
use polystore_catalog::PartitionKind;
use polystore_types::{PolyValue, Type};
use core::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNameAst {
    pub qualifier: Option<String>,
    pub name: String,
}

impl ObjectNameAst {
    pub fn bare(name: impl Into<String>) -> Self {
        Self { qualifier: None, name: name.into() }
    }

    fn render(&self, out: &mut String) {
        if let Some(q) = &self.qualifier {
            let _ = write!(out, "{q}.");
        }
        let _ = write!(out, "{}", self.name);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Times,
    Divide,
    Modulo,
    Concat,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Times => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Concat => "||",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    Column { qualifier: Option<String>, name: String },
    Literal(PolyValue),
    /// `?` placeholder, numbered in order of appearance.
    Param(usize),
    Binary { op: BinaryOp, lhs: Box<ExprAst>, rhs: Box<ExprAst> },
    Not(Box<ExprAst>),
    Neg(Box<ExprAst>),
    IsNull { expr: Box<ExprAst>, negated: bool },
    Cast { expr: Box<ExprAst>, ty: Type },
    Function {
        name: String,
        args: Vec<ExprAst>,
        distinct: bool,
        /// `COUNT(*)`.
        star: bool,
    },
}

impl ExprAst {
    pub fn binary(op: BinaryOp, lhs: ExprAst, rhs: ExprAst) -> Self {
        ExprAst::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    fn render(&self, out: &mut String, lits: &mut LiteralMode) {
        match self {
            ExprAst::Column { qualifier, name } => {
                if let Some(q) = qualifier {
                    let _ = write!(out, "{q}.");
                }
                let _ = write!(out, "{name}");
            }
            ExprAst::Literal(v) => lits.render(v, out),
            ExprAst::Param(_) => out.push('?'),
            ExprAst::Binary { op, lhs, rhs } => {
                out.push('(');
                lhs.render(out, lits);
                let _ = write!(out, " {} ", op.symbol());
                rhs.render(out, lits);
                out.push(')');
            }
            ExprAst::Not(e) => {
                out.push_str("NOT (");
                e.render(out, lits);
                out.push(')');
            }
            ExprAst::Neg(e) => {
                out.push_str("- ");
                e.render(out, lits);
            }
            ExprAst::IsNull { expr, negated } => {
                out.push('(');
                expr.render(out, lits);
                out.push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
                out.push(')');
            }
            ExprAst::Cast { expr, ty } => {
                out.push_str("CAST(");
                expr.render(out, lits);
                let _ = write!(out, " AS {}", render_type(ty));
                out.push(')');
            }
            ExprAst::Function { name, args, distinct, star } => {
                let _ = write!(out, "{}(", name.to_uppercase());
                if *star {
                    out.push('*');
                } else {
                    if *distinct {
                        out.push_str("DISTINCT ");
                    }
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        arg.render(out, lits);
                    }
                }
                out.push(')');
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKindAst {
    Inner,
    Left,
    Right,
    Full,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableRefAst {
    pub name: ObjectNameAst,
    pub alias: Option<String>,
    /// How this table joins onto everything to its left; `None` for the
    /// first table.
    pub join: Option<(JoinKindAst, ExprAst)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItemAst {
    Expr { expr: ExprAst, alias: Option<String> },
    Wildcard,
    QualifiedWildcard(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectAst {
    pub distinct: bool,
    pub projection: Vec<SelectItemAst>,
    pub from: Vec<TableRefAst>,
    pub selection: Option<ExprAst>,
    pub group_by: Vec<ExprAst>,
    pub having: Option<ExprAst>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryBody {
    Select(Box<SelectAst>),
    SetOp {
        kind: SetOpKind,
        all: bool,
        left: Box<QueryBody>,
        right: Box<QueryBody>,
    },
    Values(Vec<Vec<ExprAst>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: ExprAst,
    pub asc: bool,
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryAst {
    pub body: QueryBody,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefAst {
    pub name: String,
    pub ty: Type,
    pub nullable: bool,
    pub default: Option<PolyValue>,
    pub primary: bool,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionSpecAst {
    Count(u64),
    Values(Vec<Vec<PolyValue>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterAction {
    AddPlacement { columns: Vec<String>, store: String },
    DropPlacement { store: String },
    PartitionBy {
        kind: PartitionKind,
        column: String,
        spec: PartitionSpecAst,
    },
    MergePartitions,
    AddColumn(ColumnDefAst),
    DropColumn(String),
    RenameColumn { from: String, to: String },
    RenameTable { to: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SqlAst {
    Query(QueryAst),
    Insert {
        table: ObjectNameAst,
        columns: Vec<String>,
        source: QueryAst,
    },
    Update {
        table: ObjectNameAst,
        assignments: Vec<(String, ExprAst)>,
        predicate: Option<ExprAst>,
    },
    Delete {
        table: ObjectNameAst,
        predicate: Option<ExprAst>,
    },
    CreateTable {
        name: ObjectNameAst,
        columns: Vec<ColumnDefAst>,
        primary_key: Vec<String>,
        store: Option<String>,
    },
    DropTable { name: ObjectNameAst },
    CreateNamespace { name: String },
    DropNamespace { name: String },
    AlterTable { name: ObjectNameAst, action: AlterAction },
    Prepare {
        name: String,
        param_types: Vec<Type>,
        stmt: Box<SqlAst>,
    },
    Execute { name: String, args: Vec<PolyValue> },
    Begin,
    Commit,
    Rollback,
}

impl SqlAst {
    pub fn is_ddl(&self) -> bool {
        matches!(
            self,
            SqlAst::CreateTable { .. }
                | SqlAst::DropTable { .. }
                | SqlAst::CreateNamespace { .. }
                | SqlAst::DropNamespace { .. }
                | SqlAst::AlterTable { .. }
        )
    }

    pub fn is_dml(&self) -> bool {
        matches!(self, SqlAst::Insert { .. } | SqlAst::Update { .. } | SqlAst::Delete { .. })
    }

    /// Renders canonical SQL. `parse(unparse(ast))` reproduces `ast` on the
    /// query and DML subset.
    pub fn unparse(&self) -> String {
        let mut out = String::new();
        self.render(&mut out, &mut LiteralMode::Verbatim);
        out
    }

    /// The cache key of a parameterized statement: literals replaced by
    /// placeholders, their types collected in order.
    pub fn canonicalize(&self) -> (String, Vec<Type>) {
        let mut out = String::new();
        let mut mode = LiteralMode::Parameterize(Vec::new());
        self.render(&mut out, &mut mode);
        match mode {
            LiteralMode::Parameterize(types) => (out, types),
            LiteralMode::Verbatim => unreachable!(),
        }
    }

    /// Whether any explicit placeholder occurs in this statement.
    pub fn uses_params(&self) -> bool {
        fn expr_has(e: &ExprAst) -> bool {
            match e {
                ExprAst::Param(_) => true,
                ExprAst::Binary { lhs, rhs, .. } => expr_has(lhs) || expr_has(rhs),
                ExprAst::Not(e) | ExprAst::Neg(e) => expr_has(e),
                ExprAst::IsNull { expr, .. } | ExprAst::Cast { expr, .. } => expr_has(expr),
                ExprAst::Function { args, .. } => args.iter().any(expr_has),
                _ => false,
            }
        }
        fn body_has(b: &QueryBody) -> bool {
            match b {
                QueryBody::Select(s) => {
                    s.projection.iter().any(|i| matches!(i, SelectItemAst::Expr { expr, .. } if expr_has(expr)))
                        || s.from.iter().any(|t| t.join.as_ref().is_some_and(|(_, on)| expr_has(on)))
                        || s.selection.as_ref().is_some_and(expr_has)
                        || s.group_by.iter().any(expr_has)
                        || s.having.as_ref().is_some_and(expr_has)
                }
                QueryBody::SetOp { left, right, .. } => body_has(left) || body_has(right),
                QueryBody::Values(rows) => rows.iter().flatten().any(expr_has),
            }
        }
        match self {
            SqlAst::Query(q) => body_has(&q.body),
            SqlAst::Insert { source, .. } => body_has(&source.body),
            SqlAst::Update { assignments, predicate, .. } => {
                assignments.iter().any(|(_, e)| expr_has(e))
                    || predicate.as_ref().is_some_and(expr_has)
            }
            SqlAst::Delete { predicate, .. } => predicate.as_ref().is_some_and(expr_has),
            SqlAst::Prepare { stmt, .. } => stmt.uses_params(),
            _ => false,
        }
    }

    /// Lifts every literal of a query or DML statement into a placeholder,
    /// numbering from `first_index`, and returns the lifted values in
    /// placeholder order. Ordering keys stay literal (ordinals are
    /// structural); other statement kinds come back unchanged.
    pub fn parameterize(&self, first_index: usize) -> (SqlAst, Vec<PolyValue>) {
        let mut lift = Lifter { next: first_index, values: Vec::new() };
        let out = match self {
            SqlAst::Query(q) => SqlAst::Query(lift.query(q)),
            SqlAst::Insert { table, columns, source } => SqlAst::Insert {
                table: table.clone(),
                columns: columns.clone(),
                source: lift.query(source),
            },
            SqlAst::Update { table, assignments, predicate } => SqlAst::Update {
                table: table.clone(),
                assignments: assignments
                    .iter()
                    .map(|(c, e)| (c.clone(), lift.expr(e)))
                    .collect(),
                predicate: predicate.as_ref().map(|p| lift.expr(p)),
            },
            SqlAst::Delete { table, predicate } => SqlAst::Delete {
                table: table.clone(),
                predicate: predicate.as_ref().map(|p| lift.expr(p)),
            },
            other => other.clone(),
        };
        (out, lift.values)
    }

    fn render(&self, out: &mut String, lits: &mut LiteralMode) {
        match self {
            SqlAst::Query(q) => render_query(q, out, lits),
            SqlAst::Insert { table, columns, source } => {
                out.push_str("INSERT INTO ");
                table.render(out);
                if !columns.is_empty() {
                    let _ = write!(out, " ({})", columns.iter().join(", "));
                }
                out.push(' ');
                render_query(source, out, lits);
            }
            SqlAst::Update { table, assignments, predicate } => {
                out.push_str("UPDATE ");
                table.render(out);
                out.push_str(" SET ");
                for (i, (col, expr)) in assignments.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{col} = ");
                    expr.render(out, lits);
                }
                if let Some(p) = predicate {
                    out.push_str(" WHERE ");
                    p.render(out, lits);
                }
            }
            SqlAst::Delete { table, predicate } => {
                out.push_str("DELETE FROM ");
                table.render(out);
                if let Some(p) = predicate {
                    out.push_str(" WHERE ");
                    p.render(out, lits);
                }
            }
            SqlAst::CreateTable { name, columns, primary_key, store } => {
                out.push_str("CREATE TABLE ");
                name.render(out);
                out.push_str(" (");
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    let _ = write!(out, "{} {}", col.name, render_type(&col.ty));
                    if col.primary {
                        out.push_str(" PRIMARY KEY");
                    } else if col.unique {
                        out.push_str(" UNIQUE");
                    }
                    if !col.nullable && !col.primary {
                        out.push_str(" NOT NULL");
                    }
                    if let Some(d) = &col.default {
                        out.push_str(" DEFAULT ");
                        LiteralMode::Verbatim.render(d, out);
                    }
                }
                if !primary_key.is_empty()
                    && !columns.iter().any(|c| c.primary)
                {
                    let _ = write!(out, ", PRIMARY KEY ({})", primary_key.iter().join(", "));
                }
                out.push(')');
                if let Some(store) = store {
                    let _ = write!(out, " ON STORE {store}");
                }
            }
            SqlAst::DropTable { name } => {
                out.push_str("DROP TABLE ");
                name.render(out);
            }
            SqlAst::CreateNamespace { name } => {
                let _ = write!(out, "CREATE SCHEMA {name}");
            }
            SqlAst::DropNamespace { name } => {
                let _ = write!(out, "DROP SCHEMA {name}");
            }
            SqlAst::AlterTable { name, action } => {
                out.push_str("ALTER TABLE ");
                name.render(out);
                out.push(' ');
                render_alter(action, out);
            }
            SqlAst::Prepare { name, param_types, stmt } => {
                let _ = write!(out, "PREPARE {name}");
                if !param_types.is_empty() {
                    let _ = write!(out, " ({})", param_types.iter().map(render_type).join(", "));
                }
                out.push_str(" AS ");
                stmt.render(out, lits);
            }
            SqlAst::Execute { name, args } => {
                let _ = write!(out, "EXECUTE {name}");
                if !args.is_empty() {
                    out.push_str(" (");
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        LiteralMode::Verbatim.render(arg, out);
                    }
                    out.push(')');
                }
            }
            SqlAst::Begin => out.push_str("BEGIN"),
            SqlAst::Commit => out.push_str("COMMIT"),
            SqlAst::Rollback => out.push_str("ROLLBACK"),
        }
    }
}

fn render_query(q: &QueryAst, out: &mut String, lits: &mut LiteralMode) {
    render_body(&q.body, out, lits);
    if !q.order_by.is_empty() {
        out.push_str(" ORDER BY ");
        for (i, item) in q.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            // Ordering keys are structural (an ordinal names a column); they
            // never parameterize.
            item.expr.render(out, &mut LiteralMode::Verbatim);
            if !item.asc {
                out.push_str(" DESC");
            }
            match item.nulls_first {
                Some(true) => out.push_str(" NULLS FIRST"),
                Some(false) => out.push_str(" NULLS LAST"),
                None => {}
            }
        }
    }
    if let Some(limit) = q.limit {
        let _ = write!(out, " LIMIT {limit}");
    }
    if let Some(offset) = q.offset {
        let _ = write!(out, " OFFSET {offset}");
    }
}

fn render_body(body: &QueryBody, out: &mut String, lits: &mut LiteralMode) {
    match body {
        QueryBody::Select(select) => {
            out.push_str("SELECT ");
            if select.distinct {
                out.push_str("DISTINCT ");
            }
            for (i, item) in select.projection.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                match item {
                    SelectItemAst::Expr { expr, alias } => {
                        expr.render(out, lits);
                        if let Some(alias) = alias {
                            let _ = write!(out, " AS {alias}");
                        }
                    }
                    SelectItemAst::Wildcard => out.push('*'),
                    SelectItemAst::QualifiedWildcard(t) => {
                        let _ = write!(out, "{t}.*");
                    }
                }
            }
            if !select.from.is_empty() {
                out.push_str(" FROM ");
                for (i, table) in select.from.iter().enumerate() {
                    match &table.join {
                        None => {
                            if i > 0 {
                                out.push_str(", ");
                            }
                        }
                        Some((kind, _)) => {
                            out.push_str(match kind {
                                JoinKindAst::Inner => " JOIN ",
                                JoinKindAst::Left => " LEFT JOIN ",
                                JoinKindAst::Right => " RIGHT JOIN ",
                                JoinKindAst::Full => " FULL JOIN ",
                            });
                        }
                    }
                    table.name.render(out);
                    if let Some(alias) = &table.alias {
                        let _ = write!(out, " AS {alias}");
                    }
                    if let Some((_, on)) = &table.join {
                        out.push_str(" ON ");
                        on.render(out, lits);
                    }
                }
            }
            if let Some(selection) = &select.selection {
                out.push_str(" WHERE ");
                selection.render(out, lits);
            }
            if !select.group_by.is_empty() {
                out.push_str(" GROUP BY ");
                for (i, expr) in select.group_by.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    expr.render(out, lits);
                }
            }
            if let Some(having) = &select.having {
                out.push_str(" HAVING ");
                having.render(out, lits);
            }
        }
        QueryBody::SetOp { kind, all, left, right } => {
            render_body(left, out, lits);
            out.push_str(match kind {
                SetOpKind::Union => " UNION ",
                SetOpKind::Intersect => " INTERSECT ",
                SetOpKind::Minus => " EXCEPT ",
            });
            if *all {
                out.push_str("ALL ");
            }
            render_body(right, out, lits);
        }
        QueryBody::Values(rows) => {
            out.push_str("VALUES ");
            for (i, row) in rows.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                for (j, v) in row.iter().enumerate() {
                    if j > 0 {
                        out.push_str(", ");
                    }
                    v.render(out, lits);
                }
                out.push(')');
            }
        }
    }
}

fn render_alter(action: &AlterAction, out: &mut String) {
    match action {
        AlterAction::AddPlacement { columns, store } => {
            out.push_str("ADD PLACEMENT");
            if !columns.is_empty() {
                let _ = write!(out, " ({})", columns.iter().join(", "));
            }
            let _ = write!(out, " ON STORE {store}");
        }
        AlterAction::DropPlacement { store } => {
            let _ = write!(out, "DROP PLACEMENT ON STORE {store}");
        }
        AlterAction::PartitionBy { kind, column, spec } => {
            let kind = match kind {
                PartitionKind::Hash => "HASH",
                PartitionKind::Range => "RANGE",
                PartitionKind::List => "LIST",
                PartitionKind::None => "NONE",
            };
            let _ = write!(out, "PARTITION BY {kind} ({column}) ");
            match spec {
                PartitionSpecAst::Count(n) => {
                    let _ = write!(out, "PARTITIONS {n}");
                }
                PartitionSpecAst::Values(groups) => {
                    out.push_str("VALUES ");
                    for (i, group) in groups.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push('(');
                        for (j, v) in group.iter().enumerate() {
                            if j > 0 {
                                out.push_str(", ");
                            }
                            LiteralMode::Verbatim.render(v, out);
                        }
                        out.push(')');
                    }
                }
            }
        }
        AlterAction::MergePartitions => out.push_str("MERGE PARTITIONS"),
        AlterAction::AddColumn(col) => {
            let _ = write!(out, "ADD COLUMN {} {}", col.name, render_type(&col.ty));
            if !col.nullable {
                out.push_str(" NOT NULL");
            }
            if let Some(d) = &col.default {
                out.push_str(" DEFAULT ");
                LiteralMode::Verbatim.render(d, out);
            }
        }
        AlterAction::DropColumn(name) => {
            let _ = write!(out, "DROP COLUMN {name}");
        }
        AlterAction::RenameColumn { from, to } => {
            let _ = write!(out, "RENAME COLUMN {from} TO {to}");
        }
        AlterAction::RenameTable { to } => {
            let _ = write!(out, "RENAME TO {to}");
        }
    }
}

struct Lifter {
    next: usize,
    values: Vec<PolyValue>,
}

impl Lifter {
    fn query(&mut self, q: &QueryAst) -> QueryAst {
        QueryAst {
            body: self.body(&q.body),
            // Ordering keys may be ordinals; leave them literal.
            order_by: q.order_by.clone(),
            limit: q.limit,
            offset: q.offset,
        }
    }

    fn body(&mut self, body: &QueryBody) -> QueryBody {
        match body {
            QueryBody::Select(s) => QueryBody::Select(Box::new(SelectAst {
                distinct: s.distinct,
                projection: s
                    .projection
                    .iter()
                    .map(|item| match item {
                        SelectItemAst::Expr { expr, alias } => SelectItemAst::Expr {
                            expr: self.expr(expr),
                            alias: alias.clone(),
                        },
                        other => other.clone(),
                    })
                    .collect(),
                from: s
                    .from
                    .iter()
                    .map(|t| TableRefAst {
                        name: t.name.clone(),
                        alias: t.alias.clone(),
                        join: t.join.as_ref().map(|(k, on)| (*k, self.expr(on))),
                    })
                    .collect(),
                selection: s.selection.as_ref().map(|e| self.expr(e)),
                group_by: s.group_by.clone(),
                having: s.having.as_ref().map(|e| self.expr(e)),
            })),
            QueryBody::SetOp { kind, all, left, right } => QueryBody::SetOp {
                kind: *kind,
                all: *all,
                left: Box::new(self.body(left)),
                right: Box::new(self.body(right)),
            },
            QueryBody::Values(rows) => QueryBody::Values(
                rows.iter()
                    .map(|row| row.iter().map(|e| self.expr(e)).collect())
                    .collect(),
            ),
        }
    }

    fn expr(&mut self, expr: &ExprAst) -> ExprAst {
        match expr {
            ExprAst::Literal(v) => {
                let i = self.next;
                self.next += 1;
                self.values.push(v.clone());
                ExprAst::Param(i)
            }
            ExprAst::Binary { op, lhs, rhs } => ExprAst::Binary {
                op: *op,
                lhs: Box::new(self.expr(lhs)),
                rhs: Box::new(self.expr(rhs)),
            },
            ExprAst::Not(e) => ExprAst::Not(Box::new(self.expr(e))),
            ExprAst::Neg(e) => ExprAst::Neg(Box::new(self.expr(e))),
            ExprAst::IsNull { expr, negated } => ExprAst::IsNull {
                expr: Box::new(self.expr(expr)),
                negated: *negated,
            },
            ExprAst::Cast { expr, ty } => ExprAst::Cast {
                expr: Box::new(self.expr(expr)),
                ty: ty.clone(),
            },
            ExprAst::Function { name, args, distinct, star } => ExprAst::Function {
                name: name.clone(),
                args: args.iter().map(|a| self.expr(a)).collect(),
                distinct: *distinct,
                star: *star,
            },
            other => other.clone(),
        }
    }
}

enum LiteralMode {
    Verbatim,
    /// Replace literals by `?`, collecting their types.
    Parameterize(Vec<Type>),
}

impl LiteralMode {
    fn render(&mut self, v: &PolyValue, out: &mut String) {
        match self {
            LiteralMode::Verbatim => match v {
                PolyValue::Str(s) => {
                    let _ = write!(out, "'{}'", s.replace('\'', "''"));
                }
                other => {
                    let _ = write!(out, "{other}");
                }
            },
            LiteralMode::Parameterize(types) => {
                types.push(v.type_of());
                out.push('?');
            }
        }
    }
}

pub(crate) fn render_type(ty: &Type) -> String {
    use polystore_types::PolyType;
    match ty.tag {
        PolyType::Boolean => "BOOLEAN".into(),
        PolyType::TinyInt => "TINYINT".into(),
        PolyType::SmallInt => "SMALLINT".into(),
        PolyType::Integer => "INTEGER".into(),
        PolyType::BigInt => "BIGINT".into(),
        PolyType::Decimal => format!(
            "DECIMAL({}, {})",
            ty.precision.unwrap_or(polystore_types::MAX_NUMERIC_PRECISION),
            ty.scale.unwrap_or(0)
        ),
        PolyType::Real => "REAL".into(),
        PolyType::Double => "DOUBLE".into(),
        PolyType::Char => format!("CHAR({})", ty.precision.unwrap_or(1)),
        PolyType::VarChar => format!("VARCHAR({})", ty.precision.unwrap_or(0)),
        PolyType::Date => "DATE".into(),
        PolyType::Time => "TIME".into(),
        PolyType::Timestamp => "TIMESTAMP".into(),
        other => format!("{other:?}").to_uppercase(),
    }
}
