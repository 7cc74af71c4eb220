//! Catalogued data entities and their overlap relation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Metadata of a dataset as needed by the storage tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub id: u64,
    pub name: String,
    /// Storage location of the dataset directory, relative to a tier root.
    pub location: String,
    pub investigation_id: u64,
}

/// Metadata of a single datafile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatafileInfo {
    pub id: u64,
    pub name: String,
    /// Storage location of the file, relative to a tier root.
    pub location: String,
    pub create_id: String,
    pub mod_id: String,
    pub dataset_id: u64,
    /// Size in bytes as recorded in the catalog.
    #[serde(default)]
    pub file_size: u64,
}

/// Whether tier units are whole datasets or individual datafiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageUnit {
    Dataset,
    Datafile,
}

impl fmt::Display for StorageUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset => write!(f, "dataset"),
            Self::Datafile => write!(f, "datafile"),
        }
    }
}

impl std::str::FromStr for StorageUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "dataset" => Ok(Self::Dataset),
            "datafile" => Ok(Self::Datafile),
            other => Err(format!("unknown storage unit '{}'", other)),
        }
    }
}

/// Identity of a queue or changing-set entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "lowercase")]
pub enum EntityKey {
    Dataset(u64),
    Datafile(u64),
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset(id) => write!(f, "dataset-{}", id),
            Self::Datafile(id) => write!(f, "datafile-{}", id),
        }
    }
}

/// A unit of data moved between tiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataEntity {
    Dataset(DatasetInfo),
    Datafile(DatafileInfo),
}

impl DataEntity {
    pub fn key(&self) -> EntityKey {
        match self {
            Self::Dataset(ds) => EntityKey::Dataset(ds.id),
            Self::Datafile(df) => EntityKey::Datafile(df.id),
        }
    }

    /// Id of the dataset this entity belongs to (its own id for a dataset).
    pub fn dataset_id(&self) -> u64 {
        match self {
            Self::Dataset(ds) => ds.id,
            Self::Datafile(df) => df.dataset_id,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            Self::Dataset(ds) => &ds.location,
            Self::Datafile(df) => &df.location,
        }
    }
}

impl fmt::Display for DataEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key().fmt(f)
    }
}

/// Returns true when two entities touch the same physical data.
///
/// Two datasets overlap when they are the same dataset, two datafiles when
/// they are the same file, and a datafile overlaps the dataset containing it.
pub fn overlaps(a: &DataEntity, b: &DataEntity) -> bool {
    match (a, b) {
        (DataEntity::Dataset(x), DataEntity::Dataset(y)) => x.id == y.id,
        (DataEntity::Datafile(x), DataEntity::Datafile(y)) => x.id == y.id,
        (DataEntity::Dataset(ds), DataEntity::Datafile(df))
        | (DataEntity::Datafile(df), DataEntity::Dataset(ds)) => df.dataset_id == ds.id,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn dataset(id: u64) -> DatasetInfo {
        DatasetInfo {
            id,
            name: format!("ds{}", id),
            location: format!("inv1/ds{}", id),
            investigation_id: 1,
        }
    }

    pub fn datafile(id: u64, dataset_id: u64) -> DatafileInfo {
        DatafileInfo {
            id,
            name: format!("f{}.dat", id),
            location: format!("inv1/ds{}/f{}.dat", dataset_id, id),
            create_id: "alice".to_string(),
            mod_id: "alice".to_string(),
            dataset_id,
            file_size: 100,
        }
    }
}
