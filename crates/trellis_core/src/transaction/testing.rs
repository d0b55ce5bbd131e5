use std::sync::Arc;
use std::time::Duration;

use crate::availability::AvailabilityGuard;
use crate::clock::FakeClock;
use crate::config::Config;
use crate::health::DatabaseHealth;
use crate::lock::LocalLockManager;
use crate::rotation::{DatabaseRotationControl, LogRotation};
use crate::store::GraphStore;
use crate::transaction::{TransactionManager, TransactionManagerParts, TransactionTracker};
use crate::types::TransactionId;
use crate::wal::{LogFile, MemorySegments};

pub(crate) struct Fixture {
    pub manager: Arc<TransactionManager>,
    pub store: Arc<GraphStore>,
    pub log: Arc<LogFile>,
    pub health: Arc<DatabaseHealth>,
    pub guard: Arc<AvailabilityGuard>,
}

pub(crate) fn fixture(config: &Config) -> Fixture {
    let store = Arc::new(GraphStore::new());
    let log = Arc::new(
        LogFile::open(Arc::new(MemorySegments::new()), config.rotation_threshold).unwrap(),
    );
    let health = Arc::new(DatabaseHealth::new());
    let tracker = Arc::new(TransactionTracker::new());
    let guard = Arc::new(AvailabilityGuard::new(0));
    let rotation = Arc::new(LogRotation::new(
        Arc::clone(&log),
        Arc::new(DatabaseRotationControl::new(
            Arc::clone(&tracker),
            store.clone(),
        )),
        Arc::clone(&health),
        Duration::from_secs(1),
    ));
    let parts = TransactionManagerParts {
        store: store.clone(),
        log: Arc::clone(&log),
        locks: Arc::new(LocalLockManager::new(Duration::from_millis(5))),
        guard: Arc::clone(&guard),
        health: Arc::clone(&health),
        rotation,
        tracker,
        clock: Arc::new(FakeClock::new(1_000)),
    };
    Fixture {
        manager: Arc::new(TransactionManager::new(parts, TransactionId::new(1), config)),
        store,
        log,
        health,
        guard,
    }
}
