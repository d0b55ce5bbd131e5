//! Availability gate.
//!
//! The database is available when every subsystem that must be ready has
//! granted availability. The guard keeps a count of outstanding requirements:
//! zero means available, a positive count means unavailable, and `-1` is the
//! terminal shutdown state. Listeners are told about every transition between
//! available and unavailable.

use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};

const SHUTDOWN: i64 = -1;

/// Receives availability transitions.
pub trait AvailabilityListener: Send + Sync {
    /// Called when the count drops to zero.
    fn available(&self);

    /// Called when the count leaves zero, including at shutdown.
    fn unavailable(&self);
}

/// A named reason for the database being unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRequirement {
    description: String,
}

impl AvailabilityRequirement {
    /// Creates a requirement with a human-readable description.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }
}

/// Gates whether database operations may proceed.
pub struct AvailabilityGuard {
    count: AtomicI64,
    listeners: RwLock<Vec<Arc<dyn AvailabilityListener>>>,
    blockers: Mutex<Vec<AvailabilityRequirement>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AvailabilityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvailabilityGuard")
            .field("count", &self.count.load(Ordering::SeqCst))
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl AvailabilityGuard {
    /// Creates a guard that needs `initial_count` grants before it is
    /// available.
    #[must_use]
    pub fn new(initial_count: u32) -> Self {
        Self::with_clock(initial_count, Arc::new(SystemClock))
    }

    /// Creates a guard measuring timeouts with `clock`.
    #[must_use]
    pub fn with_clock(initial_count: u32, clock: Arc<dyn Clock>) -> Self {
        Self {
            count: AtomicI64::new(i64::from(initial_count)),
            listeners: RwLock::new(Vec::new()),
            blockers: Mutex::new(Vec::new()),
            clock,
        }
    }

    /// Satisfies one requirement.
    ///
    /// Has no effect after shutdown. A grant while already available is
    /// ignored with a warning.
    pub fn grant(&self) {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            if current == SHUTDOWN {
                return;
            }
            if current == 0 {
                warn!("availability granted while already available; ignoring");
                return;
            }
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current == 1 {
            info!("database is available");
            self.notify(|listener| listener.available());
        }
    }

    /// Adds one requirement. Has no effect after shutdown.
    pub fn deny(&self) {
        let mut current = self.count.load(Ordering::SeqCst);
        loop {
            if current == SHUTDOWN {
                return;
            }
            match self.count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if current == 0 {
            info!("database is unavailable");
            self.notify(|listener| listener.unavailable());
        }
    }

    /// Adds a described requirement.
    pub fn require(&self, requirement: &AvailabilityRequirement) {
        self.blockers.lock().push(requirement.clone());
        self.deny();
    }

    /// Satisfies a requirement previously passed to [`require`](Self::require).
    pub fn fulfill(&self, requirement: &AvailabilityRequirement) {
        {
            let mut blockers = self.blockers.lock();
            if let Some(pos) = blockers.iter().position(|r| r == requirement) {
                blockers.remove(pos);
            }
        }
        self.grant();
    }

    /// Moves the guard into the terminal shutdown state.
    ///
    /// Listeners are told the database became unavailable only if it was
    /// available at the time.
    pub fn shutdown(&self) {
        let previous = self.count.swap(SHUTDOWN, Ordering::SeqCst);
        if previous == SHUTDOWN {
            return;
        }
        debug!(previous, "availability guard shut down");
        if previous == 0 {
            self.notify(|listener| listener.unavailable());
        }
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.count.load(Ordering::SeqCst) == SHUTDOWN
    }

    /// Returns the number of outstanding requirements, or `-1` after shutdown.
    #[must_use]
    pub fn current_count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    /// Waits up to `timeout` for the database to become available.
    ///
    /// Returns immediately when available or shut down. Otherwise polls,
    /// yielding the thread between checks.
    #[must_use]
    pub fn is_available(&self, timeout: Duration) -> bool {
        match self.count.load(Ordering::SeqCst) {
            0 => return true,
            SHUTDOWN => return false,
            _ => {}
        }

        let deadline = self
            .clock
            .current_time_millis()
            .saturating_add(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        loop {
            match self.count.load(Ordering::SeqCst) {
                0 => return true,
                SHUTDOWN => return false,
                _ => {}
            }
            if self.clock.current_time_millis() >= deadline {
                return false;
            }
            thread::yield_now();
        }
    }

    /// Like [`is_available`](Self::is_available) but reports why the wait
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseShutdown` after shutdown, `Unavailable` on timeout.
    pub fn await_available(&self, timeout: Duration) -> CoreResult<()> {
        if self.is_available(timeout) {
            return Ok(());
        }
        if self.is_shutdown() {
            return Err(CoreError::DatabaseShutdown);
        }
        Err(CoreError::Unavailable {
            waited: timeout,
            blockers: self.describe_who_is_blocking(),
        })
    }

    /// Describes the outstanding requirements.
    #[must_use]
    pub fn describe_who_is_blocking(&self) -> String {
        let count = self.count.load(Ordering::SeqCst);
        if count == SHUTDOWN {
            return "database is shut down".to_string();
        }
        if count == 0 {
            return "nothing is blocking".to_string();
        }

        let blockers = self.blockers.lock();
        if blockers.is_empty() {
            format!("{count} reasons for blocking")
        } else {
            let described: Vec<&str> = blockers.iter().map(AvailabilityRequirement::description).collect();
            format!("{count} reasons for blocking: {}", described.join(", "))
        }
    }

    /// Registers a listener.
    pub fn add_listener(&self, listener: Arc<dyn AvailabilityListener>) {
        self.listeners.write().push(listener);
    }

    /// Removes a previously registered listener.
    pub fn remove_listener(&self, listener: &Arc<dyn AvailabilityListener>) {
        let target = Arc::as_ptr(listener).cast::<()>();
        self.listeners
            .write()
            .retain(|l| Arc::as_ptr(l).cast::<()>() != target);
    }

    fn notify(&self, event: impl Fn(&dyn AvailabilityListener)) {
        let snapshot: Vec<Arc<dyn AvailabilityListener>> = self.listeners.read().clone();
        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| event(listener.as_ref())));
            if outcome.is_err() {
                warn!("availability listener panicked; continuing with remaining listeners");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        available: AtomicUsize,
        unavailable: AtomicUsize,
    }

    impl AvailabilityListener for Counting {
        fn available(&self) {
            self.available.fetch_add(1, Ordering::SeqCst);
        }

        fn unavailable(&self) {
            self.unavailable.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Exploding;

    impl AvailabilityListener for Exploding {
        fn available(&self) {
            panic!("listener failure");
        }

        fn unavailable(&self) {
            panic!("listener failure");
        }
    }

    #[test]
    fn grant_and_deny_fire_transitions() {
        let guard = AvailabilityGuard::new(1);
        let listener = Arc::new(Counting::default());
        guard.add_listener(listener.clone());

        assert!(!guard.is_available(Duration::ZERO));
        guard.grant();
        assert!(guard.is_available(Duration::ZERO));
        assert_eq!(listener.available.load(Ordering::SeqCst), 1);

        guard.deny();
        guard.deny();
        assert_eq!(listener.unavailable.load(Ordering::SeqCst), 1);
        guard.grant();
        assert_eq!(listener.available.load(Ordering::SeqCst), 1);
        guard.grant();
        assert_eq!(listener.available.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn grant_when_available_is_ignored() {
        let guard = AvailabilityGuard::new(0);
        guard.grant();
        assert_eq!(guard.current_count(), 0);
        assert!(!guard.is_shutdown());
    }

    #[test]
    fn shutdown_is_terminal() {
        let guard = AvailabilityGuard::new(0);
        let listener = Arc::new(Counting::default());
        guard.add_listener(listener.clone());

        guard.shutdown();
        guard.shutdown();
        assert_eq!(listener.unavailable.load(Ordering::SeqCst), 1);

        guard.grant();
        guard.deny();
        assert!(guard.is_shutdown());
        assert!(!guard.is_available(Duration::from_millis(5)));
    }

    #[test]
    fn shutdown_from_unavailable_does_not_notify() {
        let guard = AvailabilityGuard::new(2);
        let listener = Arc::new(Counting::default());
        guard.add_listener(listener.clone());
        guard.shutdown();
        assert_eq!(listener.unavailable.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let guard = AvailabilityGuard::new(1);
        let counting = Arc::new(Counting::default());
        guard.add_listener(Arc::new(Exploding));
        guard.add_listener(counting.clone());

        guard.grant();
        assert_eq!(counting.available.load(Ordering::SeqCst), 1);
        assert_eq!(guard.current_count(), 0);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let guard = AvailabilityGuard::new(1);
        let counting = Arc::new(Counting::default());
        let as_dyn: Arc<dyn AvailabilityListener> = counting.clone();
        guard.add_listener(as_dyn.clone());
        guard.remove_listener(&as_dyn);

        guard.grant();
        assert_eq!(counting.available.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn is_available_times_out() {
        let guard = AvailabilityGuard::new(1);
        let started = std::time::Instant::now();
        assert!(!guard.is_available(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(19));
    }

    #[test]
    fn timeout_beyond_u64_millis_does_not_wrap() {
        let clock = FakeClock::new(0);
        let guard = Arc::new(AvailabilityGuard::with_clock(1, Arc::new(clock.clone())));
        let granter = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                clock.advance(Duration::from_secs(60));
                thread::sleep(Duration::from_millis(10));
                guard.grant();
            })
        };
        assert!(guard.is_available(Duration::from_secs(u64::MAX / 1000 + 1)));
        granter.join().unwrap();
    }

    #[test]
    fn is_available_sees_grant_from_other_thread() {
        let guard = Arc::new(AvailabilityGuard::new(1));
        let granter = {
            let guard = Arc::clone(&guard);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                guard.grant();
            })
        };
        assert!(guard.is_available(Duration::from_secs(5)));
        granter.join().unwrap();
    }

    #[test]
    fn requirements_describe_blockers() {
        let guard = AvailabilityGuard::new(0);
        let recovery = AvailabilityRequirement::new("recovery");
        let rotation = AvailabilityRequirement::new("log rotation");

        guard.require(&recovery);
        guard.require(&rotation);
        assert_eq!(
            guard.describe_who_is_blocking(),
            "2 reasons for blocking: recovery, log rotation"
        );

        let err = guard.await_available(Duration::ZERO).unwrap_err();
        assert!(matches!(err, CoreError::Unavailable { .. }));
        assert!(err.to_string().contains("recovery"));

        guard.fulfill(&recovery);
        guard.fulfill(&rotation);
        assert!(guard.await_available(Duration::ZERO).is_ok());
    }

    #[test]
    fn anonymous_denies_are_counted() {
        let guard = AvailabilityGuard::new(3);
        assert_eq!(guard.describe_who_is_blocking(), "3 reasons for blocking");
        guard.shutdown();
        assert!(matches!(
            guard.await_available(Duration::ZERO),
            Err(CoreError::DatabaseShutdown)
        ));
    }

    #[test]
    fn concurrent_grant_deny_loses_no_update() {
        let guard = Arc::new(AvailabilityGuard::new(1_000));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let guard = Arc::clone(&guard);
                thread::spawn(move || {
                    for _ in 0..500 {
                        guard.deny();
                        guard.grant();
                        guard.grant();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(guard.current_count(), 0);
    }

    proptest! {
        #[test]
        fn availability_tracks_outstanding_denies(
            initial in 0u32..4,
            ops in prop::collection::vec(any::<bool>(), 0..64),
        ) {
            let guard = AvailabilityGuard::new(initial);
            let mut model = i64::from(initial);
            for grant in ops {
                if grant {
                    guard.grant();
                    model = (model - 1).max(0);
                } else {
                    guard.deny();
                    model += 1;
                }
                prop_assert_eq!(guard.is_available(Duration::ZERO), model == 0);
            }
            guard.shutdown();
            guard.grant();
            prop_assert!(!guard.is_available(Duration::ZERO));
        }
    }
}
