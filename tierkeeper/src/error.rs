//! Request-facing error taxonomy.
//!
//! Every public operation of the service surfaces exactly one [`IdsError`]
//! kind. Collaborator failures (catalog, storage, persistence) are converted
//! at their boundary through the `From` impls below so that raw errors never
//! leak to callers.

use thiserror::Error;

use crate::catalog::{CatalogError, CatalogErrorKind};
use crate::lock::AlreadyLocked;
use crate::persistence::StoreError;
use crate::storage::StorageError;

/// Errors returned by the request-facing operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdsError {
    /// Malformed input such as an invalid id list or range header.
    #[error("{0}")]
    BadRequest(String),

    /// Session is invalid or the user may not access the data.
    #[error("{0}")]
    InsufficientPrivileges(String),

    /// Unknown id or preparedId.
    #[error("{0}")]
    NotFound(String),

    /// Data is busy or still being restored; the caller should poll again.
    #[error("{0}")]
    DataNotOnline(String),

    /// Operation is not available in the current deployment.
    #[error("{0}")]
    NotImplemented(String),

    /// Catalog or storage failure.
    #[error("{0}")]
    Internal(String),
}

impl IdsError {
    /// HTTP-style status code for the request-facing layer.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::InsufficientPrivileges(_) => 403,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
            Self::NotImplemented(_) => 501,
            Self::DataNotOnline(_) => 503,
        }
    }

    /// Stable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequestException",
            Self::InsufficientPrivileges(_) => "InsufficientPrivilegesException",
            Self::NotFound(_) => "NotFoundException",
            Self::DataNotOnline(_) => "DataNotOnlineException",
            Self::NotImplemented(_) => "NotImplementedException",
            Self::Internal(_) => "InternalException",
        }
    }

    /// The "data busy" error raised when a lock cannot be acquired.
    pub fn busy() -> Self {
        Self::DataNotOnline("Data is busy".to_string())
    }
}

impl From<CatalogError> for IdsError {
    fn from(e: CatalogError) -> Self {
        match e.kind() {
            CatalogErrorKind::Session | CatalogErrorKind::InsufficientPrivileges => {
                Self::InsufficientPrivileges(e.message().to_string())
            }
            CatalogErrorKind::NoSuchObject => Self::NotFound(e.message().to_string()),
            CatalogErrorKind::Internal => Self::Internal(e.to_string()),
        }
    }
}

impl From<StorageError> for IdsError {
    fn from(e: StorageError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<StoreError> for IdsError {
    fn from(e: StoreError) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<AlreadyLocked> for IdsError {
    fn from(_: AlreadyLocked) -> Self {
        Self::busy()
    }
}
