//! The exchange pair: a worker thread drives the producing side and ships
//! row batches through a bounded channel; the consuming side pulls them.
//! Back-pressure falls out of the bounded capacity, cancellation is checked
//! per batch on both sides.

use super::{ExecCtx, ExecNode};
use crate::adapter::Row;
use crate::config::EXCHANGE_BATCH;
use crate::error::{DbError, Result};
use crossbeam_channel::{bounded, Receiver};
use std::thread::JoinHandle;

enum Batch {
    Rows(Vec<Row>),
    Error(String),
}

/// The producing half; runs on the worker thread and owns the child
/// pipeline.
struct SendBatchExec {
    child: Box<dyn ExecNode>,
}

impl SendBatchExec {
    fn run(mut self, ctx: &ExecCtx, tx: crossbeam_channel::Sender<Batch>) {
        let result = self.pump(ctx, &tx);
        self.child.close();
        if let Err(e) = result {
            // The receiver may already be gone; nothing to do then.
            let _ = tx.send(Batch::Error(e.to_string()));
        }
    }

    fn pump(&mut self, ctx: &ExecCtx, tx: &crossbeam_channel::Sender<Batch>) -> Result<()> {
        self.child.open(ctx)?;
        let mut batch = Vec::with_capacity(EXCHANGE_BATCH);
        loop {
            ctx.check_cancelled()?;
            match self.child.next(ctx)? {
                Some(row) => {
                    batch.push(row);
                    if batch.len() == EXCHANGE_BATCH
                        && tx.send(Batch::Rows(std::mem::take(&mut batch))).is_err()
                    {
                        // Receiver closed: the consumer is done with us.
                        return Ok(());
                    }
                }
                None => {
                    if !batch.is_empty() {
                        let _ = tx.send(Batch::Rows(batch));
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// The consuming half of an `Exchange`.
pub struct RecvBatchExec {
    child: Option<Box<dyn ExecNode>>,
    rx: Option<Receiver<Batch>>,
    worker: Option<JoinHandle<()>>,
    current: Vec<Row>,
    pos: usize,
}

impl RecvBatchExec {
    pub fn new(child: Box<dyn ExecNode>) -> Self {
        Self {
            child: Some(child),
            rx: None,
            worker: None,
            current: Vec::new(),
            pos: 0,
        }
    }
}

impl ExecNode for RecvBatchExec {
    fn open(&mut self, ctx: &ExecCtx) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let child = self.child.take().expect("exchange opened twice without close");
        let (tx, rx) = bounded(ctx.exchange_capacity.max(1));
        let worker_ctx = ctx.clone();
        let worker = std::thread::Builder::new()
            .name("exchange".into())
            .spawn(move || SendBatchExec { child }.run(&worker_ctx, tx))
            .map_err(|e| DbError::Other(anyhow::anyhow!("spawning exchange worker: {e}")))?;
        self.rx = Some(rx);
        self.worker = Some(worker);
        Ok(())
    }

    fn next(&mut self, ctx: &ExecCtx) -> Result<Option<Row>> {
        loop {
            if self.pos < self.current.len() {
                let row = self.current[self.pos].clone();
                self.pos += 1;
                return Ok(Some(row));
            }
            ctx.check_cancelled()?;
            let Some(rx) = &self.rx else { return Ok(None) };
            match rx.recv() {
                Ok(Batch::Rows(rows)) => {
                    self.current = rows;
                    self.pos = 0;
                }
                Ok(Batch::Error(message)) => {
                    return Err(DbError::Other(anyhow::anyhow!("exchange producer failed: {message}")))
                }
                // Producer finished and dropped its sender.
                Err(_) => return Ok(None),
            }
        }
    }

    fn close(&mut self) {
        // Dropping the receiver unblocks a producer stuck on send.
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.current.clear();
        self.pos = 0;
    }
}
