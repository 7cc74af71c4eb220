//! Catalog and authorization collaborator.
//!
//! The catalog owns the metadata of investigations, datasets and datafiles
//! and decides which user may see what. This crate only depends on the
//! [`Catalog`] trait; [`InMemoryCatalog`] is a complete in-process
//! implementation used by tests and embedders without an external catalog.
//!
//! All calls are synchronous and identified by an opaque session string.

mod memory;

pub use memory::{CatalogCounters, InMemoryCatalog};

use thiserror::Error;

use crate::model::{DatafileInfo, DatasetInfo};

/// Classification of a catalog failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogErrorKind {
    /// Unknown or expired session.
    Session,
    /// The user may not read or change the object.
    InsufficientPrivileges,
    /// The object does not exist.
    NoSuchObject,
    /// Any other catalog failure.
    Internal,
}

/// Error raised by a [`Catalog`] implementation.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct CatalogError {
    kind: CatalogErrorKind,
    message: String,
}

impl CatalogError {
    pub fn new(kind: CatalogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> CatalogErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Inclusive id range used by range probes and fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub min: u64,
    pub max: u64,
}

impl IdRange {
    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, id: u64) -> bool {
        id >= self.min && id <= self.max
    }
}

/// Result of a min/max/count probe over a set of child entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeProbe {
    pub min: u64,
    pub max: u64,
    pub count: u64,
}

impl RangeProbe {
    pub fn range(&self) -> IdRange {
        IdRange::new(self.min, self.max)
    }
}

/// Metadata and authorization lookups.
pub trait Catalog: Send + Sync {
    /// Resolves a session to the user name.
    fn user_name(&self, session: &str) -> Result<String, CatalogError>;

    /// Point lookup of a dataset.
    fn dataset(&self, session: &str, id: u64) -> Result<DatasetInfo, CatalogError>;

    /// Point lookup of a datafile.
    ///
    /// Distinguishes a missing datafile from one the user may not read.
    fn datafile(&self, session: &str, id: u64) -> Result<DatafileInfo, CatalogError>;

    /// Searches for a datafile and its owning dataset.
    ///
    /// Returns `None` when the datafile is absent or invisible to the user.
    fn search_datafile(
        &self,
        session: &str,
        id: u64,
    ) -> Result<Option<(DatasetInfo, DatafileInfo)>, CatalogError>;

    /// Fails when the investigation is absent or invisible to the user.
    fn check_investigation(&self, session: &str, id: u64) -> Result<(), CatalogError>;

    /// Min id, max id and count of a dataset's datafiles within `range`.
    ///
    /// Returns `None` when there are no datafiles in the range.
    fn probe_datafiles(
        &self,
        session: &str,
        dataset_id: u64,
        range: Option<IdRange>,
    ) -> Result<Option<RangeProbe>, CatalogError>;

    /// All datafiles of a dataset with ids inside `range`.
    fn fetch_datafiles(
        &self,
        session: &str,
        dataset_id: u64,
        range: IdRange,
    ) -> Result<Vec<DatafileInfo>, CatalogError>;

    /// Min id, max id and count of an investigation's datasets within `range`.
    fn probe_datasets(
        &self,
        session: &str,
        investigation_id: u64,
        range: Option<IdRange>,
    ) -> Result<Option<RangeProbe>, CatalogError>;

    /// All datasets of an investigation with ids inside `range`.
    fn fetch_datasets(
        &self,
        session: &str,
        investigation_id: u64,
        range: IdRange,
    ) -> Result<Vec<DatasetInfo>, CatalogError>;

    /// Number of the given datafiles that still exist.
    fn count_datafiles(&self, session: &str, ids: &[u64]) -> Result<u64, CatalogError>;

    /// Registers a new datafile of `size` bytes in a dataset.
    fn create_datafile(
        &self,
        session: &str,
        dataset_id: u64,
        name: &str,
        location: &str,
        size: u64,
    ) -> Result<DatafileInfo, CatalogError>;

    /// Removes a datafile from the catalog.
    fn delete_datafile(&self, session: &str, id: u64) -> Result<(), CatalogError>;
}
