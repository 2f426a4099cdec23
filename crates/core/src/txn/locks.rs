//! Entity-level two-phase locking.
//!
//! Locks are held per catalog entity in `Shared` or `Exclusive` mode, plus
//! one global schema entity taken exclusively around DDL. A blocking acquire
//! runs a wait-for-graph cycle check before sleeping; the requester whose
//! edge closes a cycle loses and reports deadlock, leaving the holders
//! untouched.

use crate::error::TxnError;
use parking_lot::{Condvar, Mutex};
use polystore_primitives::{EntityId, TxId};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Default)]
struct Grant {
    /// Holders with their modes; more than one only when all are shared.
    holders: FxHashMap<TxId, LockMode>,
}

impl Grant {
    fn compatible(&self, txn: TxId, mode: LockMode) -> bool {
        self.holders.iter().all(|(holder, held)| {
            *holder == txn || (*held == LockMode::Shared && mode == LockMode::Shared)
        })
    }
}

#[derive(Default)]
struct LockState {
    grants: FxHashMap<EntityId, Grant>,
    /// Which entity each blocked transaction is waiting for.
    waiting: FxHashMap<TxId, EntityId>,
}

impl LockState {
    /// True when adding the edge `txn -> holders(entity)` closes a cycle in
    /// the wait-for graph.
    fn would_deadlock(&self, txn: TxId, entity: EntityId, mode: LockMode) -> bool {
        let mut stack: Vec<TxId> = self
            .blockers(txn, entity, mode)
            .collect();
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            if current == txn {
                return true;
            }
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(wanted) = self.waiting.get(&current) {
                if let Some(grant) = self.grants.get(wanted) {
                    stack.extend(grant.holders.keys().filter(|h| **h != current));
                }
            }
        }
        false
    }

    fn blockers<'a>(
        &'a self,
        txn: TxId,
        entity: EntityId,
        mode: LockMode,
    ) -> impl Iterator<Item = TxId> + 'a {
        self.grants
            .get(&entity)
            .into_iter()
            .flat_map(move |g| {
                g.holders.iter().filter_map(move |(holder, held)| {
                    let conflicts =
                        *holder != txn && !(mode == LockMode::Shared && *held == LockMode::Shared);
                    conflicts.then_some(*holder)
                })
            })
    }
}

pub struct LockManager {
    state: Mutex<LockState>,
    released: Condvar,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
        }
    }

    /// Blocks until granted, the wait times out, or granting would deadlock.
    /// Re-entrant: upgrading Shared to Exclusive is allowed when `txn` is
    /// the only holder.
    pub fn acquire(
        &self,
        txn: TxId,
        entity: EntityId,
        mode: LockMode,
        timeout: Duration,
    ) -> Result<(), TxnError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            {
                let s = &mut *state;
                let grant = s.grants.entry(entity).or_default();
                if grant.compatible(txn, mode) {
                    let held = grant.holders.entry(txn).or_insert(mode);
                    if mode == LockMode::Exclusive {
                        *held = LockMode::Exclusive;
                    }
                    s.waiting.remove(&txn);
                    return Ok(());
                }
                if s.would_deadlock(txn, entity, mode) {
                    s.waiting.remove(&txn);
                    log::debug!("deadlock: tx {txn} waiting for {entity}");
                    return Err(TxnError::Deadlock(entity.to_string()));
                }
                s.waiting.insert(txn, entity);
            }
            let timed_out = self
                .released
                .wait_until(&mut state, deadline)
                .timed_out();
            if timed_out {
                state.waiting.remove(&txn);
                return Err(TxnError::LockTimeout(entity.to_string()));
            }
        }
    }

    /// Releases everything `txn` holds and wakes all waiters.
    pub fn release_all(&self, txn: TxId) {
        let mut state = self.state.lock();
        state.grants.retain(|_, grant| {
            grant.holders.remove(&txn);
            !grant.holders.is_empty()
        });
        state.waiting.remove(&txn);
        drop(state);
        self.released.notify_all();
    }

    /// Entities currently held by `txn`, ascending.
    pub fn held_by(&self, txn: TxId) -> Vec<EntityId> {
        let state = self.state.lock();
        let mut held: Vec<EntityId> = state
            .grants
            .iter()
            .filter(|(_, g)| g.holders.contains_key(&txn))
            .map(|(e, _)| *e)
            .collect();
        held.sort();
        held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polystore_primitives::TableId;
    use std::sync::Arc;
    use std::thread;

    const T: Duration = Duration::from_secs(2);

    #[test]
    fn shared_locks_coexist_exclusive_does_not() {
        let locks = LockManager::new();
        let e = EntityId::Table(TableId(1));
        locks.acquire(TxId(1), e, LockMode::Shared, T).unwrap();
        locks.acquire(TxId(2), e, LockMode::Shared, T).unwrap();
        let err = locks
            .acquire(TxId(3), e, LockMode::Exclusive, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, TxnError::LockTimeout(_)));
    }

    #[test]
    fn reentrant_upgrade_when_sole_holder() {
        let locks = LockManager::new();
        let e = EntityId::Table(TableId(1));
        locks.acquire(TxId(1), e, LockMode::Shared, T).unwrap();
        locks.acquire(TxId(1), e, LockMode::Exclusive, T).unwrap();
        let err = locks
            .acquire(TxId(2), e, LockMode::Shared, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, TxnError::LockTimeout(_)));
    }

    #[test]
    fn cross_thread_cycle_is_detected() {
        let locks = Arc::new(LockManager::new());
        let (e1, e2) = (EntityId::Table(TableId(1)), EntityId::Table(TableId(2)));
        locks.acquire(TxId(1), e1, LockMode::Exclusive, T).unwrap();
        locks.acquire(TxId(2), e2, LockMode::Exclusive, T).unwrap();

        let l = locks.clone();
        let blocked = thread::spawn(move || l.acquire(TxId(1), e2, LockMode::Exclusive, T));
        // Give tx 1 time to park on e2, then close the cycle from tx 2.
        thread::sleep(Duration::from_millis(100));
        let result = locks.acquire(TxId(2), e1, LockMode::Exclusive, T);
        assert!(matches!(result, Err(TxnError::Deadlock(_))));

        // The victim backs off; the survivor finishes.
        locks.release_all(TxId(2));
        blocked.join().unwrap().unwrap();
        locks.release_all(TxId(1));
    }

    #[test]
    fn release_wakes_waiters() {
        let locks = Arc::new(LockManager::new());
        let e = EntityId::Table(TableId(1));
        locks.acquire(TxId(1), e, LockMode::Exclusive, T).unwrap();
        let l = locks.clone();
        let waiter = thread::spawn(move || l.acquire(TxId(2), e, LockMode::Shared, T));
        thread::sleep(Duration::from_millis(50));
        locks.release_all(TxId(1));
        waiter.join().unwrap().unwrap();
    }
}
