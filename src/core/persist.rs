//! core::persist
//!
//! Atomic JSON files for store snapshots and engine state.
//!
//! Every write goes to `<file>.tmp`, is fsynced, then renamed over the
//! target, so a crash leaves either the old file or the new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::core::graph::{GraphError, GraphStore, StoreKind, StoreSnapshot};

/// Errors from reading or writing persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("i/o error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("malformed json in '{path}': {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("snapshot '{path}' holds a {found} store, expected {expected}")]
    WrongKind {
        path: PathBuf,
        expected: StoreKind,
        found: StoreKind,
    },

    #[error("snapshot '{path}' is inconsistent: {source}")]
    Graph { path: PathBuf, source: GraphError },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Serialize `value` to `path` atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| PersistError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let temp_path = path.with_extension("json.tmp");
    let mut file = File::create(&temp_path).map_err(io_err(&temp_path))?;
    file.write_all(&bytes).map_err(io_err(&temp_path))?;
    file.sync_all().map_err(io_err(&temp_path))?;
    fs::rename(&temp_path, path).map_err(io_err(path))?;
    Ok(())
}

/// Read a JSON file, `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_err(path)(e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistError::Json {
            path: path.to_path_buf(),
            source,
        })
}

/// Save a store snapshot.
pub fn save_store(path: &Path, store: &GraphStore) -> Result<(), PersistError> {
    write_json_atomic(path, &store.snapshot())
}

/// Load a store, or an empty one if the file is missing.
pub fn load_store(path: &Path, kind: StoreKind) -> Result<GraphStore, PersistError> {
    let Some(snapshot) = read_json::<StoreSnapshot>(path)? else {
        return Ok(GraphStore::new(kind));
    };
    if snapshot.kind != kind {
        return Err(PersistError::WrongKind {
            path: path.to_path_buf(),
            expected: kind,
            found: snapshot.kind,
        });
    }
    GraphStore::from_snapshot(snapshot).map_err(|source| PersistError::Graph {
        path: path.to_path_buf(),
        source,
    })
}
