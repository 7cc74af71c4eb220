//! Durable request state.
//!
//! Requests and their per-entity statuses are the recovery source of truth:
//! the in-memory queue and changing set are rebuilt from
//! [`RequestStore::unfinished`] after a restart.

mod json;
mod memory;

pub use json::JsonRequestStore;
pub use memory::MemoryRequestStore;

use thiserror::Error;
use uuid::Uuid;

use crate::model::Request;

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Request store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt request record {id}: {source}")]
    Corrupt {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode request {0}")]
    Encode(#[from] serde_json::Error),
}

/// Storage of [`Request`] records keyed by preparedId.
pub trait RequestStore: Send + Sync {
    /// Inserts or replaces a request.
    fn save(&self, request: &Request) -> Result<(), StoreError>;

    fn load(&self, id: &Uuid) -> Result<Option<Request>, StoreError>;

    /// Requests whose aggregate status is SUBMITTED or RETRIEVING.
    fn unfinished(&self) -> Result<Vec<Request>, StoreError> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|r| !r.is_finished())
            .collect())
    }

    fn all(&self) -> Result<Vec<Request>, StoreError>;

    /// Removes a request, returning whether it existed.
    fn remove(&self, id: &Uuid) -> Result<bool, StoreError>;
}
