//! Small JSON state files on local disk.
//!
//! Writes are atomic: the value goes to `<file>.tmp` first and is then renamed
//! over the target, so a crash mid-write leaves either the old or the new
//! file, never a truncated one. A missing file reads as `None`.

use crate::error::PersistError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn io_error(path: &Path, source: std::io::Error) -> PersistError {
    PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn decode<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T, PersistError> {
    serde_json::from_slice(bytes).map_err(|e| PersistError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn encode<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>, PersistError> {
    serde_json::to_vec_pretty(value).map_err(|e| PersistError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Read and decode `path`; `Ok(None)` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match std::fs::read(path) {
        Ok(bytes) => decode(path, &bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Encode `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let bytes = encode(path, value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, &bytes).map_err(|e| io_error(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| io_error(path, e))
}

/// Async twin of [`read_json`].
pub async fn read_json_async<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => decode(path, &bytes).map(Some),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_error(path, e)),
    }
}

/// Async twin of [`write_json_atomic`].
pub async fn write_json_atomic_async<T: Serialize>(
    path: &Path,
    value: &T,
) -> Result<(), PersistError> {
    let bytes = encode(path, value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, e))?;
    }
    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}
