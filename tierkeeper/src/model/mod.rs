//! Domain types shared by every layer: entities, requested states,
//! statuses and persisted requests.

mod entity;
mod request;
mod state;

#[cfg(test)]
pub(crate) use entity::fixtures;

pub use entity::{overlaps, DataEntity, DatafileInfo, DatasetInfo, EntityKey, StorageUnit};
pub use request::{EntityRecord, Request};
pub use state::{DeferredOp, RequestedState, Status, StatusInfo};
