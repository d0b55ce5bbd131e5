//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A storage backend over a single OS file.
///
/// A writable backend caches the file length and appends at the end. A
/// read-only backend (see [`FileBackend::open_read_only`]) asks the file
/// system for the length on every call, so it observes appends made through
/// another handle. Log readers use read-only handles while the writer keeps
/// the active segment open.
///
/// # Durability
///
/// - `flush()` pushes data to the OS
/// - `sync()` calls `File::sync_all()`
///
/// # Example
///
/// ```no_run
/// use trellis_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("trellis.log.0")).unwrap();
/// backend.append(b"entry").unwrap();
/// backend.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    file: Mutex<File>,
    /// Cached length for writable handles; `None` for read-only handles.
    size: Option<u64>,
}

impl FileBackend {
    /// Opens or creates a writable file backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: Some(size),
        })
    }

    /// Opens or creates a writable backend, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Opens an existing file for reading only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            size: None,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if this handle rejects writes.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.size.is_none()
    }

    fn cached_size_mut(&mut self) -> StorageResult<&mut u64> {
        self.size.as_mut().ok_or(StorageError::ReadOnly)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let end = offset.saturating_add(len as u64);
        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let offset = *self.cached_size_mut()?;
        if data.is_empty() {
            return Ok(offset);
        }

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::End(0))?;
            file.write_all(data)?;
        }
        *self.cached_size_mut()? += data.len() as u64;
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.file.lock().flush()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        match self.size {
            Some(size) => Ok(size),
            None => Ok(self.file.lock().metadata()?.len()),
        }
    }

    fn sync(&mut self) -> StorageResult<()> {
        if self.is_read_only() {
            return Ok(());
        }
        self.file.lock().sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let size = *self.cached_size_mut()?;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }

        {
            let file = self.file.lock();
            file.set_len(new_size)?;
            file.sync_all()?;
        }
        *self.cached_size_mut()? = new_size;
        Ok(())
    }
}
