//! Coordinator-side operators.

use super::{ExecCtx, ExecNode};
use crate::adapter::{Row, RowStream};
use crate::error::Result;
use polystore_algebra::{
    AggCall, AggKind, Direction, FieldCollation, JoinType, NullPlacement, RelCollation, RexNode,
    ScalarOp, SetOpKind,
};
use polystore_primitives::{AdapterId, AllocationId};
use polystore_types::PolyValue;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;

// ---------------------------------------------------------------- values

pub struct ValuesExec {
    rows: Vec<Vec<RexNode>>,
    cursor: usize,
}

impl ValuesExec {
    pub fn new(rows: Vec<Vec<RexNode>>) -> Self {
        Self { rows, cursor: 0 }
    }
}

impl ExecNode for ValuesExec {
    fn open(&mut self, _ctx: &ExecCtx) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        let Some(exprs) = self.rows.get(self.cursor) else { return Ok(None) };
        self.cursor += 1;
        let row = exprs
            .iter()
            .map(|e| e.eval(&[], &ctx.params))
            .collect::<std::result::Result<Row, _>>()?;
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.cursor = self.rows.len();
    }
}

// ---------------------------------------------------------------- adapter scan

pub struct AdapterScanExec {
    adapter: AdapterId,
    allocation: AllocationId,
    columns: Vec<usize>,
    /// Predicate pushed into the adapter; indices over the full physical
    /// row.
    predicate: Option<RexNode>,
    stream: Option<RowStream>,
    seen: usize,
}

impl AdapterScanExec {
    pub fn new(
        adapter: AdapterId,
        allocation: AllocationId,
        columns: Vec<usize>,
        predicate: Option<RexNode>,
    ) -> Self {
        Self { adapter, allocation, columns, predicate, stream: None, seen: 0 }
    }
}

impl ExecNode for AdapterScanExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        if self.stream.is_none() {
            let adapter = ctx.adapters.get(self.adapter)?;
            self.stream = Some(adapter.scan(
                ctx.txn.id,
                self.allocation,
                &self.columns,
                self.predicate.as_ref(),
                &ctx.params,
            )?);
        }
        Ok(())
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        ctx.check_every(&mut self.seen)?;
        match self.stream.as_mut() {
            Some(stream) => stream.next().transpose(),
            None => Ok(None),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }
}

// ---------------------------------------------------------------- filter / project

pub struct FilterExec {
    input: Box<dyn ExecNode>,
    condition: RexNode,
    seen: usize,
}

impl FilterExec {
    pub fn new(input: Box<dyn ExecNode>, condition: RexNode) -> Self {
        Self { input, condition, seen: 0 }
    }
}

impl ExecNode for FilterExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        while let Some(row) = self.input.next(ctx)? {
            ctx.check_every(&mut self.seen)?;
            if self.condition.eval(&row, &ctx.params)?.as_bool() == Some(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    fn close(&mut self) {
        self.input.close();
    }
}

pub struct ProjectExec {
    input: Box<dyn ExecNode>,
    exprs: Vec<RexNode>,
}

impl ProjectExec {
    pub fn new(input: Box<dyn ExecNode>, exprs: Vec<RexNode>) -> Self {
        Self { input, exprs }
    }
}

impl ExecNode for ProjectExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        let Some(row) = self.input.next(ctx)? else { return Ok(None) };
        let out = self
            .exprs
            .iter()
            .map(|e| e.eval(&row, &ctx.params))
            .collect::<std::result::Result<Row, _>>()?;
        Ok(Some(out))
    }

    fn close(&mut self) {
        self.input.close();
    }
}

// ---------------------------------------------------------------- join

/// Join with a materialized right side: hashed on equi keys when the
/// condition has any, nested-loop otherwise. Handles all six join types;
/// right and full outer track matched right rows and emit the leftovers
/// null-padded at the end.
pub struct JoinExec {
    left: Box<dyn ExecNode>,
    right: Box<dyn ExecNode>,
    condition: RexNode,
    join_type: JoinType,
    left_arity: usize,
    right_arity: usize,

    right_rows: Vec<Row>,
    right_matched: Vec<bool>,
    hash: Option<JoinHash>,
    current_left: Option<Row>,
    candidates: Vec<usize>,
    candidate_pos: usize,
    current_matched: bool,
    emitting_right_rest: usize,
    seen: usize,
}

struct JoinHash {
    left_keys: Vec<usize>,
    right_keys: Vec<usize>,
    index: FxHashMap<Vec<PolyValue>, Vec<usize>>,
}

impl JoinExec {
    pub fn new(
        left: Box<dyn ExecNode>,
        right: Box<dyn ExecNode>,
        condition: RexNode,
        join_type: JoinType,
        left_arity: usize,
        right_arity: usize,
    ) -> Self {
        Self {
            left,
            right,
            condition,
            join_type,
            left_arity,
            right_arity,
            right_rows: Vec::new(),
            right_matched: Vec::new(),
            hash: None,
            current_left: None,
            candidates: Vec::new(),
            candidate_pos: 0,
            current_matched: false,
            emitting_right_rest: 0,
            seen: 0,
        }
    }

    /// `(left, right)` key columns of equi conjuncts, if any.
    fn equi_keys(&self) -> (Vec<usize>, Vec<usize>) {
        let mut left = Vec::new();
        let mut right = Vec::new();
        collect_equi(&self.condition, self.left_arity, &mut left, &mut right);
        (left, right)
    }

    fn concat(&self, l: &Row, r: &Row) -> Row {
        let mut out = Vec::with_capacity(l.len() + r.len());
        out.extend(l.iter().cloned());
        out.extend(r.iter().cloned());
        out
    }

    fn null_row(n: usize) -> Row {
        vec![PolyValue::Null; n]
    }
}

fn collect_equi(cond: &RexNode, left_arity: usize, left: &mut Vec<usize>, right: &mut Vec<usize>) {
    match cond {
        RexNode::Call { op: ScalarOp::And, args } => {
            for arg in args {
                collect_equi(arg, left_arity, left, right);
            }
        }
        RexNode::Call { op: ScalarOp::Eq, args } => {
            if let (RexNode::InputRef { index: a, .. }, RexNode::InputRef { index: b, .. }) =
                (&args[0], &args[1])
            {
                let (a, b) = (*a, *b);
                if a < left_arity && b >= left_arity {
                    left.push(a);
                    right.push(b - left_arity);
                } else if b < left_arity && a >= left_arity {
                    left.push(b);
                    right.push(a - left_arity);
                }
            }
        }
        _ => {}
    }
}

impl ExecNode for JoinExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)?;
        if self.right_rows.is_empty() && self.right_matched.is_empty() {
            while let Some(row) = self.right.next(ctx)? {
                ctx.check_every(&mut self.seen)?;
                self.right_rows.push(row);
            }
            self.right_matched = vec![false; self.right_rows.len()];
            let (left_keys, right_keys) = self.equi_keys();
            if !left_keys.is_empty() {
                let mut index: FxHashMap<Vec<PolyValue>, Vec<usize>> = FxHashMap::default();
                for (i, row) in self.right_rows.iter().enumerate() {
                    let key: Vec<PolyValue> =
                        right_keys.iter().map(|k| row[*k].clone()).collect();
                    // SQL equality: a NULL key never matches anything.
                    if key.iter().any(|v| v.is_null()) {
                        continue;
                    }
                    index.entry(key).or_default().push(i);
                }
                self.hash = Some(JoinHash { left_keys, right_keys, index });
            }
        }
        Ok(())
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        loop {
            ctx.check_every(&mut self.seen)?;
            // Drain pending candidates of the current left row.
            if let Some(left_row) = self.current_left.clone() {
                while self.candidate_pos < self.candidates.len() {
                    let ri = self.candidates[self.candidate_pos];
                    self.candidate_pos += 1;
                    let combined = self.concat(&left_row, &self.right_rows[ri]);
                    if self.condition.eval(&combined, &ctx.params)?.as_bool() != Some(true) {
                        continue;
                    }
                    self.current_matched = true;
                    self.right_matched[ri] = true;
                    match self.join_type {
                        JoinType::Semi => {
                            self.current_left = None;
                            return Ok(Some(left_row));
                        }
                        JoinType::Anti => {
                            // Matched: this left row is out.
                            self.current_left = None;
                            break;
                        }
                        _ => return Ok(Some(combined)),
                    }
                }
                if let Some(left_row) = self.current_left.take() {
                    // Candidates exhausted.
                    match self.join_type {
                        JoinType::Anti if !self.current_matched => return Ok(Some(left_row)),
                        JoinType::Left | JoinType::Full if !self.current_matched => {
                            return Ok(Some(
                                self.concat(&left_row, &Self::null_row(self.right_arity)),
                            ));
                        }
                        _ => {}
                    }
                }
                continue;
            }

            // Advance the left side.
            match self.left.next(ctx)? {
                Some(left_row) => {
                    self.candidates = match &self.hash {
                        Some(hash) => {
                            let key: Vec<PolyValue> =
                                hash.left_keys.iter().map(|k| left_row[*k].clone()).collect();
                            if key.iter().any(|v| v.is_null()) {
                                Vec::new()
                            } else {
                                hash.index.get(&key).cloned().unwrap_or_default()
                            }
                        }
                        None => (0..self.right_rows.len()).collect(),
                    };
                    self.candidate_pos = 0;
                    self.current_matched = false;
                    self.current_left = Some(left_row);
                }
                None => {
                    // Left drained; right/full joins emit unmatched right
                    // rows padded with nulls.
                    if matches!(self.join_type, JoinType::Right | JoinType::Full) {
                        while self.emitting_right_rest < self.right_rows.len() {
                            let i = self.emitting_right_rest;
                            self.emitting_right_rest += 1;
                            if !self.right_matched[i] {
                                return Ok(Some(
                                    self.concat(
                                        &Self::null_row(self.left_arity),
                                        &self.right_rows[i],
                                    ),
                                ));
                            }
                        }
                    }
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.right_rows.clear();
        self.hash = None;
    }
}

// ---------------------------------------------------------------- aggregate

enum AggState {
    Count(i64),
    Sum(Option<PolyValue>),
    Min(Option<PolyValue>),
    Max(Option<PolyValue>),
    Avg { sum: Option<PolyValue>, count: i64 },
}

impl AggState {
    fn new(kind: AggKind) -> Self {
        match kind {
            AggKind::Count | AggKind::CountStar => AggState::Count(0),
            AggKind::Sum => AggState::Sum(None),
            AggKind::Min => AggState::Min(None),
            AggKind::Max => AggState::Max(None),
            AggKind::Avg => AggState::Avg { sum: None, count: 0 },
        }
    }

    fn update(&mut self, value: Option<&PolyValue>) -> Result<()> {
        match self {
            AggState::Count(n) => {
                if value.map_or(true, |v| !v.is_null()) {
                    *n += 1;
                }
            }
            AggState::Sum(acc) | AggState::Avg { sum: acc, .. } => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    *acc = Some(match acc.take() {
                        None => v.clone(),
                        Some(prev) => prev.add(v)?,
                    });
                }
                if let AggState::Avg { count, .. } = self {
                    if value.is_some_and(|v| !v.is_null()) {
                        *count += 1;
                    }
                }
            }
            AggState::Min(acc) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let better = acc.as_ref().map(|a| v < a).unwrap_or(true);
                    if better {
                        *acc = Some(v.clone());
                    }
                }
            }
            AggState::Max(acc) => {
                if let Some(v) = value.filter(|v| !v.is_null()) {
                    let better = acc.as_ref().map(|a| v > a).unwrap_or(true);
                    if better {
                        *acc = Some(v.clone());
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&self) -> PolyValue {
        match self {
            AggState::Count(n) => PolyValue::Int(*n),
            AggState::Sum(v) | AggState::Min(v) | AggState::Max(v) => {
                v.clone().unwrap_or(PolyValue::Null)
            }
            AggState::Avg { sum, count } => match (sum, count) {
                (Some(s), n) if *n > 0 => {
                    match s.div(&PolyValue::Int(*n)) {
                        Ok(v) => v,
                        Err(_) => PolyValue::Null,
                    }
                }
                _ => PolyValue::Null,
            },
        }
    }
}

struct Group {
    key: Vec<PolyValue>,
    states: Vec<AggState>,
    distinct_seen: Vec<Option<FxHashSet<PolyValue>>>,
}

pub struct AggregateExec {
    input: Box<dyn ExecNode>,
    group: Vec<usize>,
    calls: Vec<AggCall>,
    groups: Vec<Group>,
    index: FxHashMap<Vec<PolyValue>, usize>,
    built: bool,
    emit: usize,
    seen: usize,
}

impl AggregateExec {
    pub fn new(input: Box<dyn ExecNode>, group: Vec<usize>, calls: Vec<AggCall>) -> Self {
        Self {
            input,
            group,
            calls,
            groups: Vec::new(),
            index: FxHashMap::default(),
            built: false,
            emit: 0,
            seen: 0,
        }
    }
}

impl ExecNode for AggregateExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        if !self.built {
            while let Some(row) = self.input.next(ctx)? {
                ctx.check_every(&mut self.seen)?;
                let key: Vec<PolyValue> = self.group.iter().map(|g| row[*g].clone()).collect();
                let slot = match self.index.get(&key) {
                    Some(i) => *i,
                    None => {
                        let i = self.groups.len();
                        self.groups.push(Group {
                            key: key.clone(),
                            states: self.calls.iter().map(|c| AggState::new(c.kind)).collect(),
                            distinct_seen: self
                                .calls
                                .iter()
                                .map(|c| c.distinct.then(FxHashSet::default))
                                .collect(),
                        });
                        self.index.insert(key, i);
                        i
                    }
                };
                let group = &mut self.groups[slot];
                for (i, call) in self.calls.iter().enumerate() {
                    let value = call.arg.map(|a| &row[a.idx()]);
                    if let (Some(seen), Some(v)) = (&mut group.distinct_seen[i], value) {
                        if !v.is_null() && !seen.insert(v.clone()) {
                            continue;
                        }
                    }
                    group.states[i].update(value)?;
                }
            }
            // A global aggregate over no rows still produces its one row.
            if self.groups.is_empty() && self.group.is_empty() {
                self.groups.push(Group {
                    key: Vec::new(),
                    states: self.calls.iter().map(|c| AggState::new(c.kind)).collect(),
                    distinct_seen: self.calls.iter().map(|_| None).collect(),
                });
            }
            self.built = true;
        }

        let Some(group) = self.groups.get(self.emit) else { return Ok(None) };
        self.emit += 1;
        let mut row = group.key.clone();
        row.extend(group.states.iter().map(|s| s.finish()));
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.groups.clear();
        self.index.clear();
    }
}

// ---------------------------------------------------------------- sort

pub struct SortExec {
    input: Box<dyn ExecNode>,
    collation: RelCollation,
    offset: Option<usize>,
    limit: Option<usize>,
    buffer: Vec<Row>,
    built: bool,
    emit: usize,
    seen: usize,
}

impl SortExec {
    pub fn new(
        input: Box<dyn ExecNode>,
        collation: RelCollation,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Self {
        Self {
            input,
            collation,
            offset,
            limit,
            buffer: Vec::new(),
            built: false,
            emit: 0,
            seen: 0,
        }
    }
}

fn collation_cmp(a: &Row, b: &Row, fields: &[FieldCollation]) -> Ordering {
    for fc in fields {
        let (x, y) = (&a[fc.field.idx()], &b[fc.field.idx()]);
        let ord = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => match fc.nulls {
                NullPlacement::First => Ordering::Less,
                NullPlacement::Last => Ordering::Greater,
            },
            (false, true) => match fc.nulls {
                NullPlacement::First => Ordering::Greater,
                NullPlacement::Last => Ordering::Less,
            },
            (false, false) => {
                let base = x.cmp(y);
                match fc.direction {
                    Direction::Ascending => base,
                    Direction::Descending => base.reverse(),
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

impl ExecNode for SortExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.input.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        if !self.built {
            while let Some(row) = self.input.next(ctx)? {
                ctx.check_every(&mut self.seen)?;
                self.buffer.push(row);
            }
            let fields = self.collation.0.clone();
            if !fields.is_empty() {
                self.buffer.sort_by(|a, b| collation_cmp(a, b, &fields));
            }
            self.emit = self.offset.unwrap_or(0).min(self.buffer.len());
            self.built = true;
        }
        let end = match self.limit {
            Some(limit) => (self.offset.unwrap_or(0) + limit).min(self.buffer.len()),
            None => self.buffer.len(),
        };
        if self.emit >= end {
            return Ok(None);
        }
        let row = self.buffer[self.emit].clone();
        self.emit += 1;
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.input.close();
        self.buffer.clear();
    }
}

// ---------------------------------------------------------------- set operations

/// Set operations with a materialized right side. `UNION` streams the left
/// then the right; the quantified variants keep multiset counts.
pub struct SetOpExec {
    left: Box<dyn ExecNode>,
    right: Box<dyn ExecNode>,
    kind: SetOpKind,
    all: bool,
    right_counts: FxHashMap<Row, i64>,
    emitted: FxHashSet<Row>,
    right_drained: bool,
    left_drained: bool,
    pending_right: Vec<Row>,
    seen: usize,
}

impl SetOpExec {
    pub fn new(left: Box<dyn ExecNode>, right: Box<dyn ExecNode>, kind: SetOpKind, all: bool) -> Self {
        Self {
            left,
            right,
            kind,
            all,
            right_counts: FxHashMap::default(),
            emitted: FxHashSet::default(),
            right_drained: false,
            left_drained: false,
            pending_right: Vec::new(),
            seen: 0,
        }
    }

    fn drain_right(&mut self, ctx: &ExecCtx) -> Result<()> {
        if self.right_drained {
            return Ok(());
        }
        while let Some(row) = self.right.next(ctx)? {
            ctx.check_every(&mut self.seen)?;
            if self.kind == SetOpKind::Union {
                self.pending_right.push(row);
            } else {
                *self.right_counts.entry(row).or_insert(0) += 1;
            }
        }
        self.right_drained = true;
        Ok(())
    }
}

impl ExecNode for SetOpExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        self.left.open(ctx)?;
        self.right.open(ctx)
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        if self.kind != SetOpKind::Union {
            self.drain_right(ctx)?;
        }
        loop {
            ctx.check_every(&mut self.seen)?;
            if !self.left_drained {
                match self.left.next(ctx)? {
                    Some(row) => match self.kind {
                        SetOpKind::Union => {
                            if self.all || self.emitted.insert(row.clone()) {
                                return Ok(Some(row));
                            }
                        }
                        SetOpKind::Intersect => {
                            let count = self.right_counts.get_mut(&row);
                            match count {
                                Some(n) if *n > 0 => {
                                    if self.all {
                                        *n -= 1;
                                        return Ok(Some(row));
                                    }
                                    if self.emitted.insert(row.clone()) {
                                        return Ok(Some(row));
                                    }
                                }
                                _ => {}
                            }
                        }
                        SetOpKind::Minus => {
                            let count = self.right_counts.get_mut(&row);
                            match count {
                                Some(n) if *n > 0 => {
                                    if self.all {
                                        *n -= 1;
                                    }
                                }
                                _ => {
                                    if self.all || self.emitted.insert(row.clone()) {
                                        return Ok(Some(row));
                                    }
                                }
                            }
                        }
                    },
                    None => self.left_drained = true,
                }
                continue;
            }
            // Left side done; only UNION has right rows left to stream.
            if self.kind == SetOpKind::Union {
                self.drain_right(ctx)?;
                while let Some(row) = self.pending_right.pop() {
                    if self.all || self.emitted.insert(row.clone()) {
                        return Ok(Some(row));
                    }
                }
            }
            return Ok(None);
        }
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.right_counts.clear();
        self.emitted.clear();
        self.pending_right.clear();
    }
}
