//! Directory-backed storage tier.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::{Storage, StorageError};

/// Stores each location as a file below a root directory.
///
/// Writes go to a temporary file in the target directory and are renamed
/// into place, so readers never observe partial content. Deleting the last
/// file of a directory removes the now empty directories up to the root.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    /// Creates the storage, creating `root` if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StorageError::io(&root.display().to_string(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(location);
        let valid = !location.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(StorageError::InvalidLocation(location.to_string()));
        }
        Ok(self.root.join(relative))
    }

    fn prune_empty_parents(&self, path: &Path) {
        let mut dir = path.parent();
        while let Some(d) = dir {
            if d == self.root || !d.starts_with(&self.root) {
                break;
            }
            // Fails when the directory is not empty, which ends the walk.
            if fs::remove_dir(d).is_err() {
                break;
            }
            dir = d.parent();
        }
    }
}

impl Storage for LocalFileStorage {
    fn exists(&self, location: &str) -> Result<bool, StorageError> {
        Ok(self.resolve(location)?.exists())
    }

    fn get(&self, location: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.resolve(location)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(location.to_string()))
            }
            Err(e) => Err(StorageError::io(location, e)),
        }
    }

    fn put(&self, location: &str, body: &mut dyn Read) -> Result<u64, StorageError> {
        let path = self.resolve(location)?;
        let parent = path
            .parent()
            .ok_or_else(|| StorageError::InvalidLocation(location.to_string()))?;
        fs::create_dir_all(parent).map_err(|e| StorageError::io(location, e))?;

        let mut tmp =
            tempfile::NamedTempFile::new_in(parent).map_err(|e| StorageError::io(location, e))?;
        let written = io::copy(body, &mut tmp).map_err(|e| StorageError::io(location, e))?;
        tmp.persist(&path)
            .map_err(|e| StorageError::io(location, e.error))?;

        debug!(location, bytes = written, root = %self.root.display(), "Stored");
        Ok(written)
    }

    fn delete(&self, location: &str, create_id: &str, mod_id: &str) -> Result<(), StorageError> {
        let path = self.resolve(location)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(StorageError::io(location, e)),
        }
        self.prune_empty_parents(&path);
        debug!(location, create_id, mod_id, root = %self.root.display(), "Deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage() -> (TempDir, LocalFileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = LocalFileStorage::new(dir.path().join("main")).unwrap();
        (dir, storage)
    }

    fn read_all(storage: &LocalFileStorage, location: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        storage.get(location).unwrap().read_to_end(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_put_get_exists() {
        let (_dir, storage) = storage();
        let written = storage.put("inv/ds/a.dat", &mut &b"hello"[..]).unwrap();
        assert_eq!(written, 5);
        assert!(storage.exists("inv/ds/a.dat").unwrap());
        assert!(storage.exists("inv/ds").unwrap());
        assert_eq!(read_all(&storage, "inv/ds/a.dat"), b"hello");

        storage.put("inv/ds/a.dat", &mut &b"bye"[..]).unwrap();
        assert_eq!(read_all(&storage, "inv/ds/a.dat"), b"bye");
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let (_dir, storage) = storage();
        assert!(matches!(
            storage.get("nope"),
            Err(StorageError::NotFound(l)) if l == "nope"
        ));
    }

    #[test]
    fn test_delete_prunes_empty_directories() {
        let (_dir, storage) = storage();
        storage.put("inv/ds1/a.dat", &mut &b"a"[..]).unwrap();
        storage.put("inv/ds1/b.dat", &mut &b"b"[..]).unwrap();
        storage.put("inv/ds2/c.dat", &mut &b"c"[..]).unwrap();

        storage.delete("inv/ds1/a.dat", "u", "u").unwrap();
        assert!(storage.exists("inv/ds1").unwrap());
        storage.delete("inv/ds1/b.dat", "u", "u").unwrap();
        assert!(!storage.exists("inv/ds1").unwrap());
        assert!(storage.exists("inv").unwrap());
        assert!(storage.root().exists());

        // Deleting again is fine.
        storage.delete("inv/ds1/b.dat", "u", "u").unwrap();
    }

    #[test]
    fn test_rejects_escaping_locations() {
        let (_dir, storage) = storage();
        for bad in ["", "../x", "/etc/passwd", "a/../../b"] {
            assert!(
                matches!(storage.exists(bad), Err(StorageError::InvalidLocation(_))),
                "accepted '{}'",
                bad
            );
        }
    }
}
