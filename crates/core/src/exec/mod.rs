//! The pull-based executor.
//!
//! A physical plan becomes a tree of [`ExecNode`]s, each a lazy open /
//! next / close iterator over rows. The frontend drives the root through a
//! [`Cursor`] with `fetch(n)`; cancellation and the transaction deadline are
//! checked at every fetch boundary, at every exchange hop, and once per
//! thousand rows inside tight loops.

mod build;
mod exchange;
mod modify;
mod ops;

pub use build::build_pipeline;
pub(crate) use modify::insert_rows_into_placement;

use crate::adapter::{AdapterRegistry, Row};
use crate::config::CANCEL_CHECK_INTERVAL;
use crate::error::Result;
use crate::txn::Transaction;
use polystore_catalog::Snapshot;
use polystore_types::PolyValue;
use std::sync::Arc;

/// Everything an operator needs at runtime. Cheap to clone; exchange
/// workers carry their own copy across threads.
#[derive(Clone)]
pub struct ExecCtx {
    pub txn: Arc<Transaction>,
    pub snapshot: Arc<Snapshot>,
    pub adapters: Arc<AdapterRegistry>,
    pub params: Arc<Vec<PolyValue>>,
    /// Exchange channel capacity, in batches.
    pub exchange_capacity: usize,
}

impl ExecCtx {
    pub fn check_cancelled(&self) -> Result<()> {
        self.txn.check_cancelled().map_err(Into::into)
    }

    /// Cheap periodic check for row-at-a-time loops.
    pub fn check_every(&self, counter: &mut usize) -> Result<()> {
        *counter += 1;
        if *counter % CANCEL_CHECK_INTERVAL == 0 {
            self.check_cancelled()?;
        }
        Ok(())
    }
}

/// One operator of the physical pipeline.
///
/// `open` acquires resources and must be idempotent; `close` must be safe
/// on every exit path, including after an error.
pub trait ExecNode: Send {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()>;
    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>>;
    fn close(&mut self);
}

/// The root driver. `fetch(n)` returning fewer than `n` rows means end of
/// stream.
pub struct Cursor {
    root: Box<dyn ExecNode>,
    ctx: ExecCtx,
    opened: bool,
    done: bool,
}

impl Cursor {
    pub fn new(root: Box<dyn ExecNode>, ctx: ExecCtx) -> Self {
        Self { root, ctx, opened: false, done: false }
    }

    pub fn fetch(&mut self, n: usize) -> Result<Vec<Row>> {
        if self.done {
            return Ok(Vec::new());
        }
        self.ctx.check_cancelled().inspect_err(|_| self.close())?;
        if !self.opened {
            // Mark opened first so a mid-open failure still closes whatever
            // came up; operator close is safe on every path.
            self.opened = true;
            if let Err(e) = self.root.open(&self.ctx) {
                self.close();
                return Err(e);
            }
        }
        let mut out = Vec::with_capacity(n.min(1024));
        while out.len() < n {
            match self.root.next(&self.ctx) {
                Ok(Some(row)) => out.push(row),
                Ok(None) => {
                    self.close();
                    break;
                }
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
        Ok(out)
    }

    pub fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut out = Vec::new();
        loop {
            let batch = self.fetch(1024)?;
            let finished = batch.len() < 1024;
            out.extend(batch);
            if finished {
                return Ok(out);
            }
        }
    }

    pub fn close(&mut self) {
        if self.opened && !self.done {
            self.root.close();
        }
        self.done = true;
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}
