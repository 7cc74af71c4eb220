//! In-process catalog.
//!
//! Keeps investigations, datasets and datafiles in ordered maps so that
//! range probes behave like indexed catalog queries. Access is granted per
//! investigation: an investigation without a reader list is public.
//! Query counters let callers observe how many probes and fetches a
//! resolution needed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use super::{Catalog, CatalogError, CatalogErrorKind, IdRange, RangeProbe};
use crate::model::{DatafileInfo, DatasetInfo};

/// Snapshot of the query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogCounters {
    /// Number of min/max/count probes issued.
    pub probes: usize,
    /// Number of row fetches issued.
    pub fetches: usize,
    /// Largest number of rows returned by a single fetch.
    pub largest_fetch: usize,
}

#[derive(Default)]
struct CatalogData {
    sessions: HashMap<String, String>,
    /// Investigation id to optional reader list.
    investigations: BTreeMap<u64, Option<HashSet<String>>>,
    datasets: BTreeMap<u64, DatasetInfo>,
    datafiles: BTreeMap<u64, DatafileInfo>,
}

impl CatalogData {
    fn user(&self, session: &str) -> Result<&str, CatalogError> {
        self.sessions
            .get(session)
            .map(String::as_str)
            .ok_or_else(|| {
                CatalogError::new(CatalogErrorKind::Session, "Unable to find user by sessionid")
            })
    }

    fn may_read_investigation(&self, user: &str, investigation_id: u64) -> bool {
        match self.investigations.get(&investigation_id) {
            Some(None) => true,
            Some(Some(readers)) => readers.contains(user),
            None => false,
        }
    }

    fn may_read_dataset(&self, user: &str, ds: &DatasetInfo) -> bool {
        self.may_read_investigation(user, ds.investigation_id)
    }

    fn readable_dataset(&self, user: &str, id: u64) -> Result<&DatasetInfo, CatalogError> {
        let ds = self.datasets.get(&id).ok_or_else(|| {
            CatalogError::new(CatalogErrorKind::NoSuchObject, format!("Dataset {}", id))
        })?;
        if !self.may_read_dataset(user, ds) {
            return Err(CatalogError::new(
                CatalogErrorKind::InsufficientPrivileges,
                format!("{} may not read Dataset {}", user, id),
            ));
        }
        Ok(ds)
    }
}

/// Catalog held entirely in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    data: RwLock<CatalogData>,
    probes: AtomicUsize,
    fetches: AtomicUsize,
    largest_fetch: AtomicUsize,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for a user.
    pub fn add_session(&self, session: impl Into<String>, user: impl Into<String>) {
        self.data.write().sessions.insert(session.into(), user.into());
    }

    /// Adds a public investigation.
    pub fn add_investigation(&self, id: u64) {
        self.data.write().investigations.entry(id).or_insert(None);
    }

    /// Restricts an investigation to the given readers.
    pub fn restrict_investigation<I, S>(&self, id: u64, readers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let readers = readers.into_iter().map(Into::into).collect();
        self.data.write().investigations.insert(id, Some(readers));
    }

    /// Adds a dataset, creating its investigation as public if needed.
    pub fn add_dataset(&self, dataset: DatasetInfo) {
        let mut data = self.data.write();
        data.investigations
            .entry(dataset.investigation_id)
            .or_insert(None);
        data.datasets.insert(dataset.id, dataset);
    }

    pub fn add_datafile(&self, datafile: DatafileInfo) {
        self.data.write().datafiles.insert(datafile.id, datafile);
    }

    pub fn counters(&self) -> CatalogCounters {
        CatalogCounters {
            probes: self.probes.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            largest_fetch: self.largest_fetch.load(Ordering::Relaxed),
        }
    }

    pub fn reset_counters(&self) {
        self.probes.store(0, Ordering::Relaxed);
        self.fetches.store(0, Ordering::Relaxed);
        self.largest_fetch.store(0, Ordering::Relaxed);
    }

    fn record_fetch(&self, rows: usize) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.largest_fetch.fetch_max(rows, Ordering::Relaxed);
    }
}

fn probe<I: Iterator<Item = u64>>(ids: I) -> Option<RangeProbe> {
    ids.fold(None, |acc, id| match acc {
        None => Some(RangeProbe {
            min: id,
            max: id,
            count: 1,
        }),
        Some(p) => Some(RangeProbe {
            min: p.min.min(id),
            max: p.max.max(id),
            count: p.count + 1,
        }),
    })
}

impl Catalog for InMemoryCatalog {
    fn user_name(&self, session: &str) -> Result<String, CatalogError> {
        self.data.read().user(session).map(str::to_string)
    }

    fn dataset(&self, session: &str, id: u64) -> Result<DatasetInfo, CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        data.readable_dataset(user, id).cloned()
    }

    fn datafile(&self, session: &str, id: u64) -> Result<DatafileInfo, CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        let df = data.datafiles.get(&id).ok_or_else(|| {
            CatalogError::new(CatalogErrorKind::NoSuchObject, format!("Datafile {}", id))
        })?;
        match data.datasets.get(&df.dataset_id) {
            Some(ds) if data.may_read_dataset(user, ds) => Ok(df.clone()),
            _ => Err(CatalogError::new(
                CatalogErrorKind::InsufficientPrivileges,
                format!("{} may not read Datafile {}", user, id),
            )),
        }
    }

    fn search_datafile(
        &self,
        session: &str,
        id: u64,
    ) -> Result<Option<(DatasetInfo, DatafileInfo)>, CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        let found = data.datafiles.get(&id).and_then(|df| {
            data.datasets
                .get(&df.dataset_id)
                .filter(|ds| data.may_read_dataset(user, ds))
                .map(|ds| (ds.clone(), df.clone()))
        });
        Ok(found)
    }

    fn check_investigation(&self, session: &str, id: u64) -> Result<(), CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        if !data.investigations.contains_key(&id) {
            return Err(CatalogError::new(
                CatalogErrorKind::NoSuchObject,
                format!("Investigation {}", id),
            ));
        }
        if !data.may_read_investigation(user, id) {
            return Err(CatalogError::new(
                CatalogErrorKind::InsufficientPrivileges,
                format!("{} may not read Investigation {}", user, id),
            ));
        }
        Ok(())
    }

    fn probe_datafiles(
        &self,
        session: &str,
        dataset_id: u64,
        range: Option<IdRange>,
    ) -> Result<Option<RangeProbe>, CatalogError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read();
        let user = data.user(session)?;
        data.readable_dataset(user, dataset_id)?;
        Ok(probe(
            data.datafiles
                .values()
                .filter(|df| df.dataset_id == dataset_id)
                .map(|df| df.id)
                .filter(|id| range.map_or(true, |r| r.contains(*id))),
        ))
    }

    fn fetch_datafiles(
        &self,
        session: &str,
        dataset_id: u64,
        range: IdRange,
    ) -> Result<Vec<DatafileInfo>, CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        data.readable_dataset(user, dataset_id)?;
        let rows: Vec<DatafileInfo> = data
            .datafiles
            .range(range.min..=range.max)
            .map(|(_, df)| df)
            .filter(|df| df.dataset_id == dataset_id)
            .cloned()
            .collect();
        self.record_fetch(rows.len());
        Ok(rows)
    }

    fn probe_datasets(
        &self,
        session: &str,
        investigation_id: u64,
        range: Option<IdRange>,
    ) -> Result<Option<RangeProbe>, CatalogError> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let data = self.data.read();
        let user = data.user(session)?;
        if !data.may_read_investigation(user, investigation_id) {
            return Ok(None);
        }
        Ok(probe(
            data.datasets
                .values()
                .filter(|ds| ds.investigation_id == investigation_id)
                .map(|ds| ds.id)
                .filter(|id| range.map_or(true, |r| r.contains(*id))),
        ))
    }

    fn fetch_datasets(
        &self,
        session: &str,
        investigation_id: u64,
        range: IdRange,
    ) -> Result<Vec<DatasetInfo>, CatalogError> {
        let data = self.data.read();
        let user = data.user(session)?;
        let rows: Vec<DatasetInfo> = if data.may_read_investigation(user, investigation_id) {
            data.datasets
                .range(range.min..=range.max)
                .map(|(_, ds)| ds)
                .filter(|ds| ds.investigation_id == investigation_id)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        self.record_fetch(rows.len());
        Ok(rows)
    }

    fn count_datafiles(&self, session: &str, ids: &[u64]) -> Result<u64, CatalogError> {
        let data = self.data.read();
        data.user(session)?;
        let unique: HashSet<u64> = ids.iter().copied().collect();
        Ok(unique
            .iter()
            .filter(|id| data.datafiles.contains_key(id))
            .count() as u64)
    }

    fn create_datafile(
        &self,
        session: &str,
        dataset_id: u64,
        name: &str,
        location: &str,
        size: u64,
    ) -> Result<DatafileInfo, CatalogError> {
        let mut data = self.data.write();
        let user = data.user(session)?.to_string();
        data.readable_dataset(&user, dataset_id)?;
        if data
            .datafiles
            .values()
            .any(|df| df.dataset_id == dataset_id && df.name == name)
        {
            return Err(CatalogError::new(
                CatalogErrorKind::Internal,
                format!("Datafile {} already exists in Dataset {}", name, dataset_id),
            ));
        }
        let id = data.datafiles.keys().next_back().map_or(1, |last| last + 1);
        let df = DatafileInfo {
            id,
            name: name.to_string(),
            location: location.to_string(),
            create_id: user.clone(),
            mod_id: user,
            dataset_id,
            file_size: size,
        };
        data.datafiles.insert(id, df.clone());
        Ok(df)
    }

    fn delete_datafile(&self, session: &str, id: u64) -> Result<(), CatalogError> {
        let mut data = self.data.write();
        let user = data.user(session)?.to_string();
        let dataset_id = data
            .datafiles
            .get(&id)
            .map(|df| df.dataset_id)
            .ok_or_else(|| {
                CatalogError::new(CatalogErrorKind::NoSuchObject, format!("Datafile {}", id))
            })?;
        data.readable_dataset(&user, dataset_id)?;
        data.datafiles.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{datafile, dataset};

    fn catalog() -> InMemoryCatalog {
        let cat = InMemoryCatalog::new();
        cat.add_session("s-alice", "alice");
        cat.add_session("s-eve", "eve");
        cat.add_dataset(dataset(1));
        for id in [10, 11, 12] {
            cat.add_datafile(datafile(id, 1));
        }
        cat.restrict_investigation(1, ["alice"]);
        cat
    }

    #[test]
    fn test_unknown_session() {
        let err = catalog().user_name("nope").unwrap_err();
        assert_eq!(err.kind(), CatalogErrorKind::Session);
    }

    #[test]
    fn test_datafile_lookup_distinguishes_missing_from_denied() {
        let cat = catalog();
        assert_eq!(cat.datafile("s-alice", 10).unwrap().dataset_id, 1);
        assert_eq!(
            cat.datafile("s-eve", 10).unwrap_err().kind(),
            CatalogErrorKind::InsufficientPrivileges
        );
        assert_eq!(
            cat.datafile("s-alice", 99).unwrap_err().kind(),
            CatalogErrorKind::NoSuchObject
        );
        assert!(cat.search_datafile("s-eve", 10).unwrap().is_none());
    }

    #[test]
    fn test_probe_and_fetch_ranges() {
        let cat = catalog();
        let p = cat.probe_datafiles("s-alice", 1, None).unwrap().unwrap();
        assert_eq!((p.min, p.max, p.count), (10, 12, 3));

        let p = cat
            .probe_datafiles("s-alice", 1, Some(IdRange::new(11, 20)))
            .unwrap()
            .unwrap();
        assert_eq!(p.count, 2);

        let rows = cat.fetch_datafiles("s-alice", 1, IdRange::new(10, 11)).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(cat.counters().probes, 2);
        assert_eq!(cat.counters().largest_fetch, 2);
    }

    #[test]
    fn test_create_and_delete_datafile() {
        let cat = catalog();
        let df = cat
            .create_datafile("s-alice", 1, "new.dat", "inv1/ds1/new.dat", 42)
            .unwrap();
        assert_eq!(df.id, 13);
        assert_eq!(df.file_size, 42);
        assert_eq!(df.create_id, "alice");
        assert_eq!(cat.count_datafiles("s-alice", &[10, 13, 99]).unwrap(), 2);

        cat.delete_datafile("s-alice", 13).unwrap();
        assert_eq!(cat.count_datafiles("s-alice", &[13]).unwrap(), 0);
    }
}
