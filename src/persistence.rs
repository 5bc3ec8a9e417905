//! Store snapshots on disk.
//!
//! The in-memory store survives a restart through one JSON file: the binary loads it at
//! startup and writes it after graceful shutdown. Writes go to a sibling temp file that
//! is renamed over the target, so a crash mid-save leaves the previous snapshot intact.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::{Cab, RideRequest, Trip};

/// Committed rows of every table.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StoreSnapshot {
    pub cabs: Vec<Cab>,
    pub trips: Vec<Trip>,
    pub requests: Vec<RideRequest>,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("snapshot io failed path={path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot at {path} is not valid: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Clone, Debug)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the snapshot file atomically.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| PersistenceError::Format {
            path: self.path.clone(),
            source,
        })?;
        let staging = self.staging_path();
        fs::write(&staging, body).map_err(|source| self.io_error(&staging, source))?;
        fs::rename(&staging, &self.path).map_err(|source| self.io_error(&self.path, source))
    }

    /// `Ok(None)` when no snapshot has been written yet.
    pub fn load(&self) -> Result<Option<StoreSnapshot>, PersistenceError> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(&self.path, source)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| PersistenceError::Format {
                path: self.path.clone(),
                source,
            })
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
