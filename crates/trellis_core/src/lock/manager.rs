//! In-process lock manager with deadlock detection.

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, warn};

use super::{LockManager, LockMode, ResourceId};
use crate::error::{CoreResult, DeadlockDetected};
use crate::types::TransactionId;

#[derive(Debug, Default)]
struct LockEntry {
    shared: HashMap<TransactionId, u32>,
    exclusive: Option<(TransactionId, u32)>,
}

impl LockEntry {
    fn is_free(&self) -> bool {
        self.shared.is_empty() && self.exclusive.is_none()
    }

    /// Holders other than `tx` that conflict with a `mode` request.
    fn conflicting(&self, tx: TransactionId, mode: LockMode) -> Vec<TransactionId> {
        let mut holders = Vec::new();
        if let Some((holder, _)) = self.exclusive {
            if holder != tx {
                holders.push(holder);
            }
        }
        if mode == LockMode::Exclusive {
            let mut sharers: Vec<TransactionId> =
                self.shared.keys().copied().filter(|&h| h != tx).collect();
            sharers.sort();
            for sharer in sharers {
                if !holders.contains(&sharer) {
                    holders.push(sharer);
                }
            }
        }
        holders
    }
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<ResourceId, LockEntry>,
    waiting: HashMap<TransactionId, (ResourceId, LockMode)>,
}

impl LockTable {
    fn try_grant(&mut self, tx: TransactionId, resource: ResourceId, mode: LockMode) -> bool {
        let entry = self.locks.entry(resource).or_default();
        if !entry.conflicting(tx, mode).is_empty() {
            return false;
        }
        match mode {
            LockMode::Shared => *entry.shared.entry(tx).or_insert(0) += 1,
            LockMode::Exclusive => entry.exclusive.get_or_insert((tx, 0)).1 += 1,
        }
        true
    }

    fn blockers_of(&self, tx: TransactionId, resource: ResourceId, mode: LockMode) -> Vec<TransactionId> {
        self.locks
            .get(&resource)
            .map(|entry| entry.conflicting(tx, mode))
            .unwrap_or_default()
    }

    /// Walks the wait-for graph from the transactions blocking `tx`.
    ///
    /// Returns the chain of transactions leading back to `tx`, if any.
    fn find_cycle(&self, tx: TransactionId, blockers: &[TransactionId]) -> Option<Vec<TransactionId>> {
        let mut visited = HashSet::new();
        for &blocker in blockers {
            let mut chain = vec![blocker];
            if self.reaches(tx, blocker, &mut visited, &mut chain) {
                return Some(chain);
            }
        }
        None
    }

    fn reaches(
        &self,
        target: TransactionId,
        current: TransactionId,
        visited: &mut HashSet<TransactionId>,
        chain: &mut Vec<TransactionId>,
    ) -> bool {
        if current == target {
            return true;
        }
        if !visited.insert(current) {
            return false;
        }
        let Some(&(resource, mode)) = self.waiting.get(&current) else {
            return false;
        };
        for next in self.blockers_of(current, resource, mode) {
            chain.push(next);
            if self.reaches(target, next, visited, chain) {
                return true;
            }
            chain.pop();
        }
        false
    }

    fn release(&mut self, tx: TransactionId, resource: ResourceId, mode: LockMode) {
        let Some(entry) = self.locks.get_mut(&resource) else {
            return;
        };
        match mode {
            LockMode::Shared => {
                if let Some(count) = entry.shared.get_mut(&tx) {
                    *count -= 1;
                    if *count == 0 {
                        entry.shared.remove(&tx);
                    }
                }
            }
            LockMode::Exclusive => {
                if let Some((holder, count)) = &mut entry.exclusive {
                    if *holder == tx {
                        *count -= 1;
                        if *count == 0 {
                            entry.exclusive = None;
                        }
                    }
                }
            }
        }
        if entry.is_free() {
            self.locks.remove(&resource);
        }
    }

    fn release_all(&mut self, tx: TransactionId) {
        self.waiting.remove(&tx);
        self.locks.retain(|_, entry| {
            entry.shared.remove(&tx);
            if matches!(entry.exclusive, Some((holder, _)) if holder == tx) {
                entry.exclusive = None;
            }
            !entry.is_free()
        });
    }
}

/// A lock manager for a single process.
///
/// The lock table lives behind one mutex. A request that cannot be granted
/// checks the wait-for graph and then parks on a condition variable until a
/// release wakes it (or the poll interval passes).
#[derive(Debug)]
pub struct LocalLockManager {
    table: Mutex<LockTable>,
    released: Condvar,
    poll: Duration,
}

impl Default for LocalLockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl LocalLockManager {
    /// Creates a lock manager whose waiters re-check every `poll`.
    #[must_use]
    pub fn new(poll: Duration) -> Self {
        Self {
            table: Mutex::new(LockTable::default()),
            released: Condvar::new(),
            poll,
        }
    }

    /// Returns `true` if `tx` holds `resource` in at least `mode`.
    #[must_use]
    pub fn holds(&self, tx: TransactionId, resource: ResourceId, mode: LockMode) -> bool {
        let table = self.table.lock();
        let Some(entry) = table.locks.get(&resource) else {
            return false;
        };
        let exclusive = matches!(entry.exclusive, Some((holder, _)) if holder == tx);
        match mode {
            LockMode::Exclusive => exclusive,
            LockMode::Shared => exclusive || entry.shared.contains_key(&tx),
        }
    }

    /// Returns the number of locked resources.
    #[must_use]
    pub fn locked_resources(&self) -> usize {
        self.table.lock().locks.len()
    }

    /// Returns the number of transactions currently waiting for a lock.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.table.lock().waiting.len()
    }
}

impl LockManager for LocalLockManager {
    fn acquire(&self, tx: TransactionId, resource: ResourceId, mode: LockMode) -> CoreResult<()> {
        let mut table = self.table.lock();
        loop {
            if table.try_grant(tx, resource, mode) {
                table.waiting.remove(&tx);
                return Ok(());
            }

            let blockers = table.blockers_of(tx, resource, mode);
            if let Some(wait_chain) = table.find_cycle(tx, &blockers) {
                table.waiting.remove(&tx);
                warn!(%tx, %resource, ?wait_chain, "deadlock detected");
                return Err(DeadlockDetected {
                    transaction: tx,
                    resource,
                    wait_chain,
                }
                .into());
            }

            debug!(%tx, %resource, ?mode, ?blockers, "waiting for lock");
            table.waiting.insert(tx, (resource, mode));
            self.released.wait_for(&mut table, self.poll);
        }
    }

    fn release(&self, tx: TransactionId, resource: ResourceId, mode: LockMode) {
        self.table.lock().release(tx, resource, mode);
        self.released.notify_all();
    }

    fn release_all(&self, tx: TransactionId) {
        self.table.lock().release_all(tx);
        self.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::NodeId;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn tx(id: u64) -> TransactionId {
        TransactionId::new(id)
    }

    fn node(id: u64) -> ResourceId {
        ResourceId::Node(NodeId::new(id))
    }

    #[test]
    fn shared_locks_are_compatible() {
        let locks = LocalLockManager::default();
        locks.acquire(tx(1), node(1), LockMode::Shared).unwrap();
        locks.acquire(tx(2), node(1), LockMode::Shared).unwrap();
        assert!(locks.holds(tx(1), node(1), LockMode::Shared));
        assert!(locks.holds(tx(2), node(1), LockMode::Shared));
    }

    #[test]
    fn locks_are_reentrant() {
        let locks = LocalLockManager::default();
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();
        locks.acquire(tx(1), node(1), LockMode::Shared).unwrap();

        locks.release(tx(1), node(1), LockMode::Exclusive);
        assert!(locks.holds(tx(1), node(1), LockMode::Exclusive));
        locks.release(tx(1), node(1), LockMode::Exclusive);
        assert!(!locks.holds(tx(1), node(1), LockMode::Exclusive));
        assert!(locks.holds(tx(1), node(1), LockMode::Shared));
    }

    #[test]
    fn sole_sharer_can_upgrade() {
        let locks = LocalLockManager::default();
        locks.acquire(tx(1), node(1), LockMode::Shared).unwrap();
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();
        assert!(locks.holds(tx(1), node(1), LockMode::Exclusive));
    }

    #[test]
    fn release_all_frees_everything() {
        let locks = LocalLockManager::default();
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();
        locks.acquire(tx(1), node(2), LockMode::Shared).unwrap();
        locks.release_all(tx(1));
        assert_eq!(locks.locked_resources(), 0);
    }

    #[test]
    fn exclusive_waits_for_release() {
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();

        let (sender, receiver) = mpsc::channel();
        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                locks.acquire(tx(2), node(1), LockMode::Exclusive).unwrap();
                sender.send(()).unwrap();
            })
        };

        assert!(receiver.recv_timeout(Duration::from_millis(50)).is_err());
        locks.release_all(tx(1));
        receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert!(locks.holds(tx(2), node(1), LockMode::Exclusive));
    }

    #[test]
    fn mutual_wait_is_a_deadlock() {
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        locks.acquire(tx(1), node(1), LockMode::Exclusive).unwrap();
        locks.acquire(tx(2), node(2), LockMode::Exclusive).unwrap();

        let first = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(tx(1), node(2), LockMode::Exclusive))
        };
        while locks.waiting_count() == 0 {
            thread::yield_now();
        }

        let err = locks
            .acquire(tx(2), node(1), LockMode::Exclusive)
            .unwrap_err();
        assert!(err.is_transient());
        match &err {
            CoreError::Deadlock(deadlock) => {
                assert_eq!(deadlock.transaction, tx(2));
                assert_eq!(deadlock.wait_chain, vec![tx(1), tx(2)]);
            }
            other => panic!("unexpected error {other:?}"),
        }

        locks.release_all(tx(2));
        first.join().unwrap().unwrap();
    }

    #[test]
    fn two_sharers_upgrading_deadlock() {
        let locks = Arc::new(LocalLockManager::new(Duration::from_millis(5)));
        locks.acquire(tx(1), node(1), LockMode::Shared).unwrap();
        locks.acquire(tx(2), node(1), LockMode::Shared).unwrap();

        let first = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || locks.acquire(tx(1), node(1), LockMode::Exclusive))
        };
        while locks.waiting_count() == 0 {
            thread::yield_now();
        }

        let err = locks
            .acquire(tx(2), node(1), LockMode::Exclusive)
            .unwrap_err();
        assert!(matches!(err, CoreError::Deadlock(_)));

        locks.release_all(tx(2));
        first.join().unwrap().unwrap();
    }
}
