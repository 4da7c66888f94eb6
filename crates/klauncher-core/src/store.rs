//! Whole-file JSON persistence.
//!
//! Every state file is small and rewritten in full. Writers hold an exclusive
//! advisory lock on a sibling `.lock` file for the whole read-modify-write
//! cycle and replace the target through a temp file + rename, so a reader
//! never observes a half-written file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to serialize {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Read and decode `path`. `Ok(None)` when the file is absent or blank.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(io_err(path))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let value = serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Some(value))
}

/// Like [`read_json`] but a corrupt file reads as absent, with a warning.
pub fn read_json_lenient<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match read_json(path) {
        Err(StoreError::Parse { path, source }) => {
            tracing::warn!(path = %path.display(), error = %source, "failed to decode JSON, starting fresh");
            Ok(None)
        }
        other => other,
    }
}

/// Pretty-print `value` into `path` via a temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
    }
    let body = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
        file.write_all(body.as_bytes()).map_err(io_err(&tmp))?;
        file.write_all(b"\n").map_err(io_err(&tmp))?;
        file.sync_all().map_err(io_err(&tmp))?;
    }
    fs::rename(&tmp, path).map_err(io_err(path))?;
    Ok(())
}

/// Load `path` leniently, apply `mutate`, and write the result back while
/// holding the file lock.
pub fn update_json<T, R>(path: &Path, mutate: impl FnOnce(&mut T) -> R) -> Result<R, StoreError>
where
    T: Serialize + DeserializeOwned + Default,
{
    let _lock = FileLock::acquire(path)?;
    let mut value: T = read_json_lenient(path)?.unwrap_or_default();
    let result = mutate(&mut value);
    write_json_atomic(path, &value)?;
    Ok(result)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Exclusive lock held for the lifetime of the guard.
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(target: &Path) -> Result<Self, StoreError> {
        let path = lock_path(target);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;
        file.lock_exclusive().map_err(|source| StoreError::Lock {
            path: path.clone(),
            source,
        })?;
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = self.file.unlock() {
            tracing::debug!(path = %self.path.display(), error = %err, "unlock failed");
        }
    }
}
