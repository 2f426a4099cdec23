//! Transaction lifecycle: creation, lock scope, enlistment of involved
//! stores, and two-phase commit with a background reconciler for phase-2
//! stragglers.

mod locks;

pub use locks::{LockManager, LockMode};

use crate::adapter::AdapterRegistry;
use crate::error::{Result, TxnError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use polystore_catalog::Snapshot;
use polystore_primitives::{AdapterId, NamespaceId, TxId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnMode {
    /// One statement, committed by the engine.
    Auto,
    /// Explicit BEGIN/COMMIT.
    Manual,
}

/// One request's transaction. Holds the catalog snapshot for its whole
/// lifetime, so everything the request resolved stays resolvable until
/// commit or rollback.
pub struct Transaction {
    pub id: TxId,
    pub user: String,
    pub default_namespace: NamespaceId,
    pub mode: TxnMode,
    pub analyze: bool,
    snapshot: Mutex<Arc<Snapshot>>,
    involved: Mutex<Vec<AdapterId>>,
    cancel: AtomicBool,
    deadline: Mutex<Option<Instant>>,
    active: AtomicBool,
}

impl Transaction {
    pub fn new(
        id: TxId,
        user: impl Into<String>,
        default_namespace: NamespaceId,
        mode: TxnMode,
        snapshot: Arc<Snapshot>,
    ) -> Self {
        Self {
            id,
            user: user.into(),
            default_namespace,
            mode,
            analyze: false,
            snapshot: Mutex::new(snapshot),
            involved: Mutex::new(Vec::new()),
            cancel: AtomicBool::new(false),
            deadline: Mutex::new(None),
            active: AtomicBool::new(true),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.lock().clone()
    }

    /// Swaps in a fresh snapshot; used by the one-shot refresh retry after
    /// an `UnknownId` during optimization, and after DDL this transaction
    /// itself executed.
    pub fn refresh_snapshot(&self, snapshot: Arc<Snapshot>) {
        *self.snapshot.lock() = snapshot;
    }

    /// Records a store as touched; it will participate in 2PC.
    pub fn enlist(&self, adapter: AdapterId) {
        let mut involved = self.involved.lock();
        if !involved.contains(&adapter) {
            involved.push(adapter);
        }
    }

    pub fn involved_adapters(&self) -> Vec<AdapterId> {
        self.involved.lock().clone()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn set_deadline(&self, deadline: Instant) {
        *self.deadline.lock() = Some(deadline);
    }

    /// Checked at every suspension point and once per thousand rows in
    /// tight loops.
    pub fn check_cancelled(&self) -> std::result::Result<(), TxnError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(TxnError::Cancelled);
        }
        if let Some(deadline) = *self.deadline.lock() {
            if Instant::now() > deadline {
                return Err(TxnError::Timeout);
            }
        }
        Ok(())
    }
}

/// What commit reports back: success, possibly with stores whose phase-2
/// confirmation is still outstanding and queued for retry.
#[derive(Debug, Clone, Default)]
pub struct CommitSummary {
    pub partial_failures: Vec<AdapterId>,
}

/// Two-phase commit across the transaction's involved stores.
///
/// Phase 1 collects votes; any no or error aborts everyone that already
/// voted yes and the commit fails. Phase 2 failures do not fail the commit:
/// the store is handed to the reconciler and the user sees success with a
/// durable follow-up note.
pub fn commit_two_phase(
    txn: &Transaction,
    adapters: &AdapterRegistry,
    reconciler: &Reconciler,
) -> Result<CommitSummary> {
    if !txn.is_active() {
        return Err(TxnError::NotActive.into());
    }
    let involved = txn.involved_adapters();
    let mut prepared = Vec::new();
    for id in &involved {
        let adapter = adapters.get(*id)?;
        let yes = match adapter.prepare(txn.id) {
            Ok(vote) => vote,
            Err(e) => {
                log::warn!("prepare failed on {id}: {e}");
                false
            }
        };
        if !yes {
            for p in &prepared {
                let _ = adapters.get(*p).map(|a| a.rollback(txn.id));
            }
            txn.deactivate();
            return Err(TxnError::CommitAborted(format!("store {id} voted no")).into());
        }
        prepared.push(*id);
    }

    let mut summary = CommitSummary::default();
    for id in &involved {
        let adapter = adapters.get(*id)?;
        if let Err(e) = adapter.commit(txn.id) {
            // The store promised in phase 1; keep retrying in the
            // background, the user-visible result stays a success.
            log::error!("phase-2 commit failed on {id}, queueing for retry: {e}");
            reconciler.enqueue(txn.id, *id);
            summary.partial_failures.push(*id);
        }
    }
    txn.deactivate();
    Ok(summary)
}

/// Broadcast rollback, regardless of state.
pub fn rollback_all(txn: &Transaction, adapters: &AdapterRegistry) {
    for id in txn.involved_adapters() {
        if let Ok(adapter) = adapters.get(id) {
            if let Err(e) = adapter.rollback(txn.id) {
                log::warn!("rollback failed on {id}: {e}");
            }
        }
    }
    txn.deactivate();
}

/// Retries phase-2 commits that failed after an all-yes vote.
pub struct Reconciler {
    tx: Sender<(TxId, AdapterId)>,
    pending: Arc<Mutex<Vec<(TxId, AdapterId)>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn start(adapters: Arc<AdapterRegistry>, retry_interval: Duration) -> Self {
        let (tx, rx): (Sender<(TxId, AdapterId)>, Receiver<(TxId, AdapterId)>) = unbounded();
        let pending: Arc<Mutex<Vec<(TxId, AdapterId)>>> = Arc::new(Mutex::new(Vec::new()));
        let worker_pending = pending.clone();
        let worker = std::thread::Builder::new()
            .name("reconciler".into())
            .spawn(move || loop {
                match rx.recv_timeout(retry_interval) {
                    // A (0, 0) item is just a nudge to run a retry pass.
                    Ok(item) if item.0 != TxId(0) => worker_pending.lock().push(item),
                    Ok(_) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
                    Err(crossbeam_channel::RecvTimeoutError::Disconnected) => return,
                }
                let mut queue = worker_pending.lock();
                queue.retain(|(txn, adapter)| match adapters.get(*adapter) {
                    Ok(a) => match a.commit(*txn) {
                        Ok(()) => {
                            log::info!("reconciled tx {txn} on {adapter}");
                            false
                        }
                        Err(e) => {
                            log::warn!("reconcile of tx {txn} on {adapter} still failing: {e}");
                            true
                        }
                    },
                    Err(_) => true,
                });
            })
            .expect("spawning the reconciler thread");
        Self {
            tx,
            pending,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn enqueue(&self, txn: TxId, adapter: AdapterId) {
        self.pending.lock().push((txn, adapter));
        // Nudge the worker; losing the nudge only delays the retry tick.
        let _ = self.tx.send((TxId(0), AdapterId(0)));
    }

    pub fn pending(&self) -> Vec<(TxId, AdapterId)> {
        self.pending
            .lock()
            .iter()
            .filter(|(t, _)| t.0 != 0)
            .copied()
            .collect()
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        // Disconnect the channel so the worker exits its recv loop.
        let (tx, _rx) = unbounded();
        drop(std::mem::replace(&mut self.tx, tx));
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
