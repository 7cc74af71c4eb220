//! Storage tier collaborator.
//!
//! Both tiers, fast ("main") and slow ("archive"), are accessed through the
//! [`Storage`] trait. Locations are relative, `/` separated paths chosen by
//! the catalog. [`LocalFileStorage`] maps locations onto a directory tree.

mod local;

pub use local::LocalFileStorage;

use std::io::{self, Read};

use thiserror::Error;

/// Errors raised by a storage tier.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Nothing is stored at the location.
    #[error("Nothing stored at '{0}'")]
    NotFound(String),

    /// The location is absolute or escapes the storage root.
    #[error("Invalid storage location '{0}'")]
    InvalidLocation(String),

    /// Underlying I/O failure.
    #[error("I/O error at '{location}': {source}")]
    Io {
        location: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    pub(crate) fn io(location: &str, source: io::Error) -> Self {
        Self::Io {
            location: location.to_string(),
            source,
        }
    }
}

/// One storage tier.
pub trait Storage: Send + Sync {
    /// Whether a file or directory exists at `location`.
    fn exists(&self, location: &str) -> Result<bool, StorageError>;

    /// Opens the file at `location` for reading.
    fn get(&self, location: &str) -> Result<Box<dyn Read + Send>, StorageError>;

    /// Stores `body` at `location`, replacing any previous content.
    ///
    /// Returns the number of bytes written.
    fn put(&self, location: &str, body: &mut dyn Read) -> Result<u64, StorageError>;

    /// Removes whatever is stored at `location`.
    ///
    /// `create_id` and `mod_id` identify who created and last modified the
    /// data, for tiers that keep an audit trail. Deleting a missing location
    /// succeeds.
    fn delete(&self, location: &str, create_id: &str, mod_id: &str) -> Result<(), StorageError>;
}
