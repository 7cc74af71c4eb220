//! Failure markers.
//!
//! A marker records that a tier operation on an entity failed and that the
//! fast-storage copy may be the only good one. The Archiver refuses to
//! delete data that carries a marker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::model::EntityKey;

/// Directory of marker files, one per entity.
#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    /// Uses `<cache_dir>/marker`, creating it if needed.
    pub fn new(cache_dir: &Path) -> io::Result<Self> {
        let dir = cache_dir.join("marker");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, key: EntityKey) -> PathBuf {
        self.dir.join(key.to_string())
    }

    pub fn create(&self, key: EntityKey) -> io::Result<()> {
        fs::write(self.path(key), b"")
    }

    pub fn remove(&self, key: EntityKey) -> io::Result<()> {
        match fs::remove_file(self.path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    pub fn exists(&self, key: EntityKey) -> bool {
        self.path(key).exists()
    }
}
