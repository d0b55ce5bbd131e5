//! Database directory management.
//!
//! On-disk layout of a Trellis database:
//!
//! ```text
//! <db_path>/
//! ├─ LOCK              # Advisory lock for single-writer
//! ├─ store.json        # Graph snapshot, replaced atomically
//! ├─ trellis.log.0     # Log segments, one per version
//! └─ trellis.log.1
//! ```

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};
use crate::wal::DirectorySegments;

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.json";

/// An open database directory, holding its exclusive lock.
///
/// Only one `DatabaseDir` can exist per directory at a time; the lock is
/// released when it is dropped.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens or creates a database directory and takes its lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path is not a directory
    /// - Another process holds the lock (`DatabaseLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::not_found(format!(
                    "database directory {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_operation(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the database directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the graph snapshot.
    #[must_use]
    pub fn snapshot_path(&self) -> PathBuf {
        self.path.join(SNAPSHOT_FILE)
    }

    /// Returns the log segments stored in this directory.
    #[must_use]
    pub fn segments(&self) -> DirectorySegments {
        DirectorySegments::new(&self.path)
    }

    /// Returns `true` if neither a snapshot nor a log segment exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed.
    pub fn is_new_database(&self) -> CoreResult<bool> {
        use crate::wal::SegmentStore;
        Ok(!self.snapshot_path().exists() && self.segments().versions()?.is_empty())
    }
}

/// Replaces `path` with `bytes` using write-then-rename, then syncs the
/// parent directory so the rename itself is durable.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> CoreResult<()> {
    let temp = path.with_extension("tmp");
    let mut file = File::create(&temp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp, path)?;
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => sync_directory(parent),
        _ => Ok(()),
    }
}

#[cfg(unix)]
pub(crate) fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

// NTFS journals metadata; directories cannot be opened for fsync.
#[cfg(not(unix))]
pub(crate) fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
