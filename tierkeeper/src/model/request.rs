//! Persisted client requests and their aggregate status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::{DataEntity, DatafileInfo, DatasetInfo, EntityKey};
use super::state::{RequestedState, StatusInfo};

/// Status of one entity within a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity: DataEntity,
    pub status: StatusInfo,
}

/// A submitted prepare, archive, restore or write call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub prepared_id: Uuid,
    pub user: String,
    pub requested_state: RequestedState,
    pub compress: bool,
    pub zip: bool,
    pub submitted: DateTime<Utc>,
    pub expires: DateTime<Utc>,
    pub status: StatusInfo,
    pub entities: Vec<EntityRecord>,
    /// Datasets of a prepared selection, kept for later downloads.
    #[serde(default)]
    pub datasets: Vec<DatasetInfo>,
    /// Datafiles of a prepared selection.
    #[serde(default)]
    pub datafiles: Vec<DatafileInfo>,
    #[serde(default)]
    pub must_zip: bool,
}

impl Request {
    /// Creates a request with every entity SUBMITTED.
    ///
    /// Duplicate entities are collapsed to one record.
    pub fn new(
        user: impl Into<String>,
        requested_state: RequestedState,
        entities: impl IntoIterator<Item = DataEntity>,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        let mut records: Vec<EntityRecord> = Vec::new();
        for entity in entities {
            if records.iter().all(|r| r.entity.key() != entity.key()) {
                records.push(EntityRecord {
                    entity,
                    status: StatusInfo::Submitted,
                });
            }
        }
        let mut request = Self {
            prepared_id: Uuid::new_v4(),
            user: user.into(),
            requested_state,
            compress: false,
            zip: false,
            submitted: now,
            expires: now + lifetime,
            status: StatusInfo::Submitted,
            entities: records,
            datasets: Vec::new(),
            datafiles: Vec::new(),
            must_zip: false,
        };
        request.recompute_status();
        request
    }

    pub fn with_packing(mut self, compress: bool, zip: bool) -> Self {
        self.compress = compress;
        self.zip = zip;
        self
    }

    /// Keeps the resolved selection so downloads need no catalog lookups.
    pub fn with_selection(
        mut self,
        datasets: Vec<DatasetInfo>,
        datafiles: Vec<DatafileInfo>,
        must_zip: bool,
    ) -> Self {
        self.datasets = datasets;
        self.datafiles = datafiles;
        self.must_zip = must_zip;
        self
    }

    pub fn record(&self, key: EntityKey) -> Option<&EntityRecord> {
        self.entities.iter().find(|r| r.entity.key() == key)
    }

    /// Sets the status of one entity and recomputes the aggregate.
    ///
    /// Terminal entity statuses are never overwritten. Returns whether the
    /// record changed.
    pub fn set_entity_status(&mut self, key: EntityKey, status: StatusInfo) -> bool {
        let changed = match self.entities.iter_mut().find(|r| r.entity.key() == key) {
            Some(record) if !record.status.is_terminal() && record.status != status => {
                record.status = status;
                true
            }
            _ => false,
        };
        if changed {
            self.recompute_status();
        }
        changed
    }

    /// Recomputes the aggregate status from the entity records.
    ///
    /// COMPLETED when every entity completed, INCOMPLETE once every entity is
    /// terminal otherwise, RETRIEVING once any entity has moved on from
    /// SUBMITTED.
    pub fn recompute_status(&mut self) {
        let all_terminal = self.entities.iter().all(|r| r.status.is_terminal());
        self.status = if all_terminal {
            if self
                .entities
                .iter()
                .all(|r| r.status == StatusInfo::Completed)
            {
                StatusInfo::Completed
            } else {
                StatusInfo::Incomplete
            }
        } else if self
            .entities
            .iter()
            .any(|r| r.status != StatusInfo::Submitted)
        {
            StatusInfo::Retrieving
        } else {
            StatusInfo::Submitted
        };
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires < now
    }
}
