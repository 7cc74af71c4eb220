//! Operational snapshot of the coordinator.

use serde::Serialize;

use crate::lock::LockInfo;
use crate::model::{EntityKey, RequestedState};

/// One queued or in-flight entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityState {
    pub entity: EntityKey,
    pub state: RequestedState,
}

/// Queue contents, changing set and held locks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub queue: Vec<EntityState>,
    pub changing: Vec<EntityState>,
    pub prepares: Vec<EntityKey>,
    pub locks: Vec<LockInfo>,
    pub workers_in_flight: usize,
}

impl ServiceStatus {
    pub fn to_json(&self) -> String {
        // Serialising plain enums and integers cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let status = ServiceStatus {
            queue: vec![EntityState {
                entity: EntityKey::Dataset(3),
                state: RequestedState::WriteThenArchive,
            }],
            ..Default::default()
        };
        let json: serde_json::Value = serde_json::from_str(&status.to_json()).unwrap();
        assert_eq!(json["queue"][0]["entity"]["type"], "dataset");
        assert_eq!(json["queue"][0]["state"], "WRITE_THEN_ARCHIVE");
        assert_eq!(json["workersInFlight"], 0);
    }
}
