//! Database health latch.

use parking_lot::{Mutex, RwLock};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{CoreError, DatabasePanicked};

/// Receives the error-state event when the database panics.
pub trait PanicListener: Send + Sync {
    /// Called once per panic episode with the latched failure.
    fn panicked(&self, event: &DatabasePanicked);
}

/// Tracks whether the database can safely continue.
///
/// The first call to [`panic`](Self::panic) records its cause and flips the
/// database to unhealthy. Later panics are ignored until
/// [`healed`](Self::healed) resets the state, so the root cause is never
/// overwritten by secondary failures.
pub struct DatabaseHealth {
    healthy_flag: AtomicBool,
    cause: Mutex<Option<Arc<CoreError>>>,
    listeners: RwLock<Vec<Arc<dyn PanicListener>>>,
}

impl std::fmt::Debug for DatabaseHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHealth")
            .field("healthy", &self.is_healthy())
            .field("cause", &*self.cause.lock())
            .finish()
    }
}

impl Default for DatabaseHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseHealth {
    /// Creates a healthy state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            healthy_flag: AtomicBool::new(true),
            cause: Mutex::new(None),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Latches the database into the panicked state.
    ///
    /// No-op if the database is already unhealthy.
    pub fn panic(&self, cause: CoreError) {
        let event = {
            let mut slot = self.cause.lock();
            if !self.healthy_flag.load(Ordering::SeqCst) {
                return;
            }
            let cause = Arc::new(cause);
            *slot = Some(Arc::clone(&cause));
            self.healthy_flag.store(false, Ordering::SeqCst);
            DatabasePanicked::new(cause)
        };

        error!(
            cause = %event.cause(),
            chain = %cause_chain(event.cause()),
            "DATABASE PANIC: the database has encountered a critical error and will refuse further work"
        );

        let snapshot: Vec<Arc<dyn PanicListener>> = self.listeners.read().clone();
        for listener in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.panicked(&event)));
            if outcome.is_err() {
                warn!("panic listener failed; continuing with remaining listeners");
            }
        }
    }

    /// Latches `cause` and returns the error for the current episode,
    /// which carries the first cause rather than necessarily this one.
    pub(crate) fn panic_and_fail(&self, cause: CoreError) -> CoreError {
        self.panic(cause);
        match self.cause_of_panic() {
            Some(first) => CoreError::Panicked(DatabasePanicked::new(first)),
            None => CoreError::invalid_operation("database healed while panicking"),
        }
    }

    /// Fails with the latched cause if the database is unhealthy.
    ///
    /// The caller chooses the error type; any type convertible from
    /// [`DatabasePanicked`] can be requested.
    ///
    /// # Errors
    ///
    /// Returns `E::from(DatabasePanicked)` while unhealthy.
    pub fn assert_healthy<E: From<DatabasePanicked>>(&self) -> Result<(), E> {
        if self.healthy_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.cause_of_panic() {
            Some(cause) => Err(E::from(DatabasePanicked::new(cause))),
            // healed concurrently between the two loads
            None => Ok(()),
        }
    }

    /// Returns `true` if no panic is latched.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy_flag.load(Ordering::SeqCst)
    }

    /// Returns the cause of the current panic episode.
    #[must_use]
    pub fn cause_of_panic(&self) -> Option<Arc<CoreError>> {
        self.cause.lock().clone()
    }

    /// Resets to healthy and forgets the cause.
    pub fn healed(&self) {
        let mut slot = self.cause.lock();
        *slot = None;
        self.healthy_flag.store(true, Ordering::SeqCst);
        info!("database health restored");
    }

    /// Registers a panic listener.
    pub fn add_panic_listener(&self, listener: Arc<dyn PanicListener>) {
        self.listeners.write().push(listener);
    }
}

fn cause_chain(err: &CoreError) -> String {
    let mut chain = err.to_string();
    let mut current: Option<&(dyn std::error::Error + 'static)> = std::error::Error::source(err);
    while let Some(source) = current {
        chain.push_str(" <- ");
        chain.push_str(&source.to_string());
        current = source.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Recorder {
        events: AtomicUsize,
    }

    impl PanicListener for Recorder {
        fn panicked(&self, _event: &DatabasePanicked) {
            self.events.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_cause_wins() {
        let health = DatabaseHealth::new();
        health.panic(CoreError::log_corruption("cause A"));
        health.panic(CoreError::log_corruption("cause B"));

        assert!(!health.is_healthy());
        let cause = health.cause_of_panic().unwrap();
        assert!(cause.to_string().contains("cause A"));
    }

    #[test]
    fn assert_healthy_wraps_cause_in_requested_type() {
        let health = DatabaseHealth::new();
        assert!(health.assert_healthy::<CoreError>().is_ok());

        health.panic(CoreError::invalid_operation("store diverged"));

        let core: CoreError = health.assert_healthy().unwrap_err();
        assert!(core.is_panic());
        assert!(core.to_string().contains("store diverged"));

        let io: std::io::Error = health.assert_healthy().unwrap_err();
        assert!(io.to_string().contains("critical error"));
    }

    #[test]
    fn healed_resets_state() {
        let health = DatabaseHealth::new();
        health.panic(CoreError::DatabaseLocked);
        health.healed();

        assert!(health.is_healthy());
        assert!(health.cause_of_panic().is_none());
        assert!(health.assert_healthy::<CoreError>().is_ok());

        health.panic(CoreError::log_corruption("second episode"));
        assert!(health
            .cause_of_panic()
            .unwrap()
            .to_string()
            .contains("second episode"));
    }

    #[test]
    fn listeners_notified_once_per_episode() {
        let health = DatabaseHealth::new();
        let recorder = Arc::new(Recorder::default());
        health.add_panic_listener(recorder.clone());

        health.panic(CoreError::DatabaseLocked);
        health.panic(CoreError::DatabaseLocked);
        assert_eq!(recorder.events.load(Ordering::SeqCst), 1);

        health.healed();
        health.panic(CoreError::DatabaseLocked);
        assert_eq!(recorder.events.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn default_is_healthy() {
        let health = DatabaseHealth::default();
        assert!(health.is_healthy());
    }
}
