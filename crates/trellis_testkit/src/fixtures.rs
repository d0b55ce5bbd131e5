//! Test fixtures and database helpers.
//!
//! Provides convenience functions for setting up test databases, restarting
//! them cleanly and simulating crashes.

use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use trellis_core::store::{MemorySnapshot, SnapshotLocation};
use trellis_core::wal::{MemorySegments, SegmentStore};
use trellis_core::{Config, CoreError, GraphDatabase};

use crate::crash::{CrashSwitch, CrashingSegments};

enum Backing {
    Memory {
        segments: MemorySegments,
        snapshot: MemorySnapshot,
    },
    Directory(TempDir),
}

/// A test database with automatic cleanup.
///
/// Unlike [`GraphDatabase::open_in_memory`], the memory variant keeps its
/// log and snapshot outside the database handle, so the test can restart
/// or crash it and open a new instance over the same bytes.
pub struct TestDatabase {
    /// The database instance.
    pub db: GraphDatabase,
    backing: Backing,
    config: Config,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// Creates a new in-memory test database with `config`.
    pub fn memory_with(config: Config) -> Self {
        let segments = MemorySegments::new();
        let snapshot = MemorySnapshot::new();
        let db = open_memory(Arc::new(segments.clone()), &snapshot, &config);
        Self {
            db,
            backing: Backing::Memory { segments, snapshot },
            config,
        }
    }

    /// Creates an in-memory test database whose log writers can be made to
    /// crash through the returned switch.
    pub fn crashable(config: Config) -> (Self, CrashSwitch) {
        let segments = MemorySegments::new();
        let snapshot = MemorySnapshot::new();
        let crashing = CrashingSegments::new(segments.clone());
        let switch = crashing.switch();
        let db = open_memory(Arc::new(crashing), &snapshot, &config);
        let test_db = Self {
            db,
            backing: Backing::Memory { segments, snapshot },
            config,
        };
        (test_db, switch)
    }

    /// Creates a new test database in a temporary directory.
    pub fn file() -> Self {
        Self::file_with(Config::default())
    }

    /// Creates a new directory-backed test database with `config`.
    pub fn file_with(config: Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = GraphDatabase::open(temp_dir.path(), config.clone())
            .expect("Failed to open directory database");
        Self {
            db,
            backing: Backing::Directory(temp_dir),
            config,
        }
    }

    /// Returns the database directory if directory-backed, `None` in memory.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::Directory(dir) => Some(dir.path()),
            Backing::Memory { .. } => None,
        }
    }

    /// Returns the shared log segments of an in-memory database.
    pub fn segments(&self) -> Option<&MemorySegments> {
        match &self.backing {
            Backing::Memory { segments, .. } => Some(segments),
            Backing::Directory(_) => None,
        }
    }

    /// Shuts the database down cleanly and opens it again.
    pub fn restart(self) -> Self {
        let Self {
            db,
            backing,
            config,
        } = self;
        db.shutdown().expect("Failed to shut down database");
        drop(db);
        Self::reopen(backing, config)
    }

    /// Drops the database without a checkpoint or store force, then opens
    /// it again, which runs recovery.
    ///
    /// Crash switches are left behind: the reopened database writes to the
    /// plain segments.
    pub fn crash(self) -> Self {
        let Self {
            db,
            backing,
            config,
        } = self;
        db.health()
            .panic(CoreError::invalid_operation("simulated crash"));
        drop(db);
        Self::reopen(backing, config)
    }

    fn reopen(backing: Backing, config: Config) -> Self {
        let db = match &backing {
            Backing::Memory { segments, snapshot } => {
                open_memory(Arc::new(segments.clone()), snapshot, &config)
            }
            Backing::Directory(dir) => GraphDatabase::open(dir.path(), config.clone())
                .expect("Failed to reopen directory database"),
        };
        Self {
            db,
            backing,
            config,
        }
    }
}

fn open_memory(
    segments: Arc<dyn SegmentStore>,
    snapshot: &MemorySnapshot,
    config: &Config,
) -> GraphDatabase {
    GraphDatabase::open_with(
        segments,
        SnapshotLocation::Memory(snapshot.clone()),
        config.clone(),
    )
    .expect("Failed to open in-memory database")
}

impl std::ops::Deref for TestDatabase {
    type Target = GraphDatabase;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Runs a test with a temporary in-memory database.
///
/// # Example
///
/// ```rust,ignore
/// use trellis_testkit::with_temp_db;
///
/// #[test]
/// fn my_test() {
///     with_temp_db(|db| {
///         let node = db.transaction(|tx| tx.create_node()).unwrap();
///         assert!(db.graph().node_exists(node));
///     });
/// }
/// ```
pub fn with_temp_db<F, R>(f: F) -> R
where
    F: FnOnce(&GraphDatabase) -> R,
{
    let test_db = TestDatabase::memory();
    f(&test_db.db)
}

/// Runs a test with a temporary directory-backed database.
pub fn with_file_db<F, R>(f: F) -> R
where
    F: FnOnce(&GraphDatabase, &Path) -> R,
{
    let test_db = TestDatabase::file();
    let path = test_db
        .path()
        .expect("File database should have a path")
        .to_path_buf();
    f(&test_db.db, &path)
}
