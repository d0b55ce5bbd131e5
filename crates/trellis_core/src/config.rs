//! Database configuration.

use std::time::Duration;

/// Configuration for opening a database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the database if it doesn't exist.
    pub create_if_missing: bool,

    /// Whether the database rejects writing transactions.
    pub read_only: bool,

    /// Size of the active log segment at which it is rotated.
    pub rotation_threshold: u64,

    /// Whether to sync the log on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// How long rotation waits for in-flight transactions before proceeding.
    pub await_closed_timeout: Duration,

    /// How long `begin` waits for the database to become available.
    pub availability_timeout: Duration,

    /// Re-check interval of a parked lock waiter.
    pub lock_wait_poll: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            read_only: false,
            rotation_threshold: 64 * 1024 * 1024, // 64 MB
            sync_on_commit: true,
            await_closed_timeout: Duration::from_secs(10),
            availability_timeout: Duration::from_secs(1),
            lock_wait_poll: Duration::from_millis(50),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the database if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Opens the database read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets the log rotation threshold in bytes.
    #[must_use]
    pub const fn rotation_threshold(mut self, bytes: u64) -> Self {
        self.rotation_threshold = bytes;
        self
    }

    /// Sets whether to sync the log on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets how long rotation waits for in-flight transactions.
    #[must_use]
    pub const fn await_closed_timeout(mut self, timeout: Duration) -> Self {
        self.await_closed_timeout = timeout;
        self
    }

    /// Sets how long `begin` waits for availability.
    #[must_use]
    pub const fn availability_timeout(mut self, timeout: Duration) -> Self {
        self.availability_timeout = timeout;
        self
    }

    /// Sets the lock waiter re-check interval.
    #[must_use]
    pub const fn lock_wait_poll(mut self, interval: Duration) -> Self {
        self.lock_wait_poll = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(!config.read_only);
        assert!(config.sync_on_commit);
        assert_eq!(config.await_closed_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_commit(false)
            .rotation_threshold(1024)
            .availability_timeout(Duration::ZERO);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_commit);
        assert_eq!(config.rotation_threshold, 1024);
        assert_eq!(config.availability_timeout, Duration::ZERO);
    }
}
