//! One JSON document per request.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use super::{RequestStore, StoreError};
use crate::model::Request;

const EXTENSION: &str = "json";

/// Keeps each request in `<dir>/<preparedId>.json`.
///
/// Documents are written to a temporary file and renamed into place so a
/// crash never leaves a truncated record behind.
#[derive(Debug, Clone)]
pub struct JsonRequestStore {
    dir: PathBuf,
}

impl JsonRequestStore {
    /// Opens the store, creating `dir` if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }

    fn read(&self, path: &Path) -> Result<Request, StoreError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
            id: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source,
        })
    }
}

impl RequestStore for JsonRequestStore {
    fn save(&self, request: &Request) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(request)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path_for(&request.prepared_id))
            .map_err(|e| StoreError::Io(e.error))?;
        debug!(prepared_id = %request.prepared_id, status = %request.status, "Request saved");
        Ok(())
    }

    fn load(&self, id: &Uuid) -> Result<Option<Request>, StoreError> {
        let path = self.path_for(id);
        match self.read(&path) {
            Ok(request) => Ok(Some(request)),
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn all(&self) -> Result<Vec<Request>, StoreError> {
        let mut requests = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match self.read(&path) {
                Ok(request) => requests.push(request),
                // A corrupt record must not block recovery of the others.
                Err(e @ StoreError::Corrupt { .. }) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable request record")
                }
                Err(e) => return Err(e),
            }
        }
        requests.sort_by_key(|r| r.submitted);
        Ok(requests)
    }

    fn remove(&self, id: &Uuid) -> Result<bool, StoreError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
