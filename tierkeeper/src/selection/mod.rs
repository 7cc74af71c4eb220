//! Data selection: id list parsing and catalog resolution.
//!
//! A client names the data it wants as three comma separated id lists
//! (investigations, datasets, datafiles). [`SelectionResolver`] validates the
//! lists and turns them into a [`DataSelection`] of catalog metadata.
//!
//! # Example
//!
//! ```ignore
//! use tierkeeper::selection::{SelectionQuery, SelectionResolver};
//!
//! let resolver = SelectionResolver::new(catalog, 10_000);
//! let query = SelectionQuery::new().with_datasets("4,5");
//! let selection = resolver.resolve("session", &query, true)?;
//! assert!(selection.must_zip());
//! ```

mod ids;
mod resolver;

pub use ids::parse_id_list;
pub use resolver::{SelectionResolver, DEFAULT_MAX_ENTITIES};

use std::collections::{BTreeMap, BTreeSet};

use crate::error::IdsError;
use crate::model::{DataEntity, DatafileInfo, DatasetInfo, StorageUnit};

/// Raw id lists as received from a client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionQuery {
    pub investigation_ids: Option<String>,
    pub dataset_ids: Option<String>,
    pub datafile_ids: Option<String>,
}

impl SelectionQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_investigations(mut self, ids: impl Into<String>) -> Self {
        self.investigation_ids = Some(ids.into());
        self
    }

    pub fn with_datasets(mut self, ids: impl Into<String>) -> Self {
        self.dataset_ids = Some(ids.into());
        self
    }

    pub fn with_datafiles(mut self, ids: impl Into<String>) -> Self {
        self.datafile_ids = Some(ids.into());
        self
    }

    /// Validates the three lists without touching the catalog.
    pub fn parse(&self) -> Result<SelectionIds, IdsError> {
        let ids = SelectionIds {
            investigations: parse_id_list("investigationIds", self.investigation_ids.as_deref())?,
            datasets: parse_id_list("datasetIds", self.dataset_ids.as_deref())?,
            datafiles: parse_id_list("datafileIds", self.datafile_ids.as_deref())?,
        };
        if ids.is_empty() {
            return Err(IdsError::BadRequest(
                "No investigation, dataset nor datafile specified".to_string(),
            ));
        }
        Ok(ids)
    }
}

/// Validated id lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionIds {
    pub investigations: Vec<u64>,
    pub datasets: Vec<u64>,
    pub datafiles: Vec<u64>,
}

impl SelectionIds {
    pub fn is_empty(&self) -> bool {
        self.investigations.is_empty() && self.datasets.is_empty() && self.datafiles.is_empty()
    }

    /// True when more than one item, or any dataset or investigation, is named.
    pub fn must_zip(&self) -> bool {
        self.datafiles.len() > 1 || !self.datasets.is_empty() || !self.investigations.is_empty()
    }

    /// True when exactly one dataset and nothing else is named.
    pub fn is_single_dataset(&self) -> bool {
        self.datafiles.is_empty() && self.datasets.len() == 1 && self.investigations.is_empty()
    }
}

/// Catalog metadata of a resolved selection.
#[derive(Debug, Clone, Default)]
pub struct DataSelection {
    ids: SelectionIds,
    datasets: BTreeMap<u64, DatasetInfo>,
    /// Explicitly named datafiles, plus every child datafile when the
    /// selection was resolved with datafiles.
    datafiles: BTreeMap<u64, DatafileInfo>,
    empty_datasets: BTreeSet<u64>,
}

impl DataSelection {
    pub fn ids(&self) -> &SelectionIds {
        &self.ids
    }

    pub fn must_zip(&self) -> bool {
        self.ids.must_zip()
    }

    pub fn is_single_dataset(&self) -> bool {
        self.ids.is_single_dataset()
    }

    pub fn datasets(&self) -> impl Iterator<Item = &DatasetInfo> {
        self.datasets.values()
    }

    pub fn dataset(&self, id: u64) -> Option<&DatasetInfo> {
        self.datasets.get(&id)
    }

    pub fn dataset_ids(&self) -> Vec<u64> {
        self.datasets.keys().copied().collect()
    }

    pub fn datafiles(&self) -> impl Iterator<Item = &DatafileInfo> {
        self.datafiles.values()
    }

    pub fn datafile_count(&self) -> usize {
        self.datafiles.len()
    }

    /// Datasets that contain no datafiles at all.
    pub fn is_empty_dataset(&self, id: u64) -> bool {
        self.empty_datasets.contains(&id)
    }

    /// The tier units touched by this selection.
    pub fn entities(&self, unit: StorageUnit) -> Vec<DataEntity> {
        match unit {
            StorageUnit::Dataset => self
                .datasets
                .values()
                .cloned()
                .map(DataEntity::Dataset)
                .collect(),
            StorageUnit::Datafile => self
                .datafiles
                .values()
                .cloned()
                .map(DataEntity::Datafile)
                .collect(),
        }
    }
}
