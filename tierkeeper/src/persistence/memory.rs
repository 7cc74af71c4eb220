use std::collections::HashMap;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{RequestStore, StoreError};
use crate::model::Request;

/// Non-durable store, for tests and single-process embedders.
#[derive(Default)]
pub struct MemoryRequestStore {
    requests: Mutex<HashMap<Uuid, Request>>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RequestStore for MemoryRequestStore {
    fn save(&self, request: &Request) -> Result<(), StoreError> {
        self.requests
            .lock()
            .insert(request.prepared_id, request.clone());
        Ok(())
    }

    fn load(&self, id: &Uuid) -> Result<Option<Request>, StoreError> {
        Ok(self.requests.lock().get(id).cloned())
    }

    fn all(&self) -> Result<Vec<Request>, StoreError> {
        let mut all: Vec<Request> = self.requests.lock().values().cloned().collect();
        all.sort_by_key(|r| r.submitted);
        Ok(all)
    }

    fn remove(&self, id: &Uuid) -> Result<bool, StoreError> {
        Ok(self.requests.lock().remove(id).is_some())
    }
}
