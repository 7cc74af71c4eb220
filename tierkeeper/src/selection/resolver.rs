//! Catalog resolution of id lists with range-splitting fetches.
//!
//! Datasets and investigations may own arbitrarily many children. Rather
//! than fetching all children in one query, the resolver probes the child id
//! range (min, max, count) and bisects it until every slice holds at most
//! `max_entities` rows, then fetches each slice. Pending slices live on an
//! explicit work stack so pathological id distributions cannot grow the call
//! stack.

use std::sync::Arc;

use tracing::{debug, trace};

use super::{DataSelection, SelectionIds, SelectionQuery};
use crate::catalog::{Catalog, CatalogError, CatalogErrorKind, IdRange, RangeProbe};
use crate::error::IdsError;
use crate::model::{DatafileInfo, DatasetInfo};

/// Default number of rows a single fetch may return.
pub const DEFAULT_MAX_ENTITIES: usize = 10_000;

/// Resolves selections against the catalog.
#[derive(Clone)]
pub struct SelectionResolver {
    catalog: Arc<dyn Catalog>,
    max_entities: usize,
}

impl SelectionResolver {
    pub fn new(catalog: Arc<dyn Catalog>, max_entities: usize) -> Self {
        Self {
            catalog,
            max_entities: max_entities.max(1),
        }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub fn max_entities(&self) -> usize {
        self.max_entities
    }

    /// Parses and resolves a query.
    ///
    /// With `with_datafiles` every datafile of the selected datasets and
    /// investigations is fetched; otherwise only explicitly named datafiles
    /// are included.
    pub fn resolve(
        &self,
        session: &str,
        query: &SelectionQuery,
        with_datafiles: bool,
    ) -> Result<DataSelection, IdsError> {
        let ids = query.parse()?;
        self.resolve_ids(session, ids, with_datafiles)
    }

    /// Resolves already validated id lists.
    pub fn resolve_ids(
        &self,
        session: &str,
        ids: SelectionIds,
        with_datafiles: bool,
    ) -> Result<DataSelection, IdsError> {
        if ids.is_empty() {
            return Err(IdsError::BadRequest(
                "No investigation, dataset nor datafile specified".to_string(),
            ));
        }

        let mut selection = DataSelection::default();

        for &id in &ids.datafiles {
            match self.catalog.search_datafile(session, id)? {
                Some((ds, df)) => {
                    selection.datasets.entry(ds.id).or_insert(ds);
                    selection.datafiles.insert(df.id, df);
                }
                None => {
                    // The point lookup reports missing privileges precisely.
                    self.catalog.datafile(session, id)?;
                    return Err(IdsError::NotFound(format!("Datafile {}", id)));
                }
            }
        }

        for &id in &ids.datasets {
            let ds = self.catalog.dataset(session, id)?;
            self.add_dataset(session, ds, with_datafiles, &mut selection)?;
        }

        for &id in &ids.investigations {
            self.catalog
                .check_investigation(session, id)
                .map_err(|e| investigation_error(e, id))?;
            let datasets = match self.catalog.probe_datasets(session, id, None)? {
                Some(probe) => self.split_fetch(
                    probe,
                    |r| self.catalog.probe_datasets(session, id, Some(r)),
                    |r| self.catalog.fetch_datasets(session, id, r),
                )?,
                None => Vec::new(),
            };
            debug!(
                investigation_id = id,
                datasets = datasets.len(),
                "Resolved investigation"
            );
            for ds in datasets {
                self.add_dataset(session, ds, with_datafiles, &mut selection)?;
            }
        }

        selection.ids = ids;
        Ok(selection)
    }

    /// All datafiles of one dataset, fetched in bounded slices.
    pub fn dataset_datafiles(
        &self,
        session: &str,
        dataset: &DatasetInfo,
    ) -> Result<Vec<DatafileInfo>, IdsError> {
        match self.catalog.probe_datafiles(session, dataset.id, None)? {
            Some(probe) => self.split_fetch(
                probe,
                |r| self.catalog.probe_datafiles(session, dataset.id, Some(r)),
                |r| self.catalog.fetch_datafiles(session, dataset.id, r),
            ),
            None => Ok(Vec::new()),
        }
    }

    fn add_dataset(
        &self,
        session: &str,
        ds: DatasetInfo,
        with_datafiles: bool,
        selection: &mut DataSelection,
    ) -> Result<(), IdsError> {
        match self.catalog.probe_datafiles(session, ds.id, None)? {
            None => {
                selection.empty_datasets.insert(ds.id);
            }
            Some(probe) if with_datafiles => {
                let files = self.split_fetch(
                    probe,
                    |r| self.catalog.probe_datafiles(session, ds.id, Some(r)),
                    |r| self.catalog.fetch_datafiles(session, ds.id, r),
                )?;
                for df in files {
                    selection.datafiles.insert(df.id, df);
                }
            }
            Some(_) => {}
        }
        selection.datasets.insert(ds.id, ds);
        Ok(())
    }

    /// Fetches every row under `initial`, bisecting ranges that are too big.
    fn split_fetch<T, P, F>(
        &self,
        initial: RangeProbe,
        mut probe: P,
        mut fetch: F,
    ) -> Result<Vec<T>, IdsError>
    where
        P: FnMut(IdRange) -> Result<Option<RangeProbe>, CatalogError>,
        F: FnMut(IdRange) -> Result<Vec<T>, CatalogError>,
    {
        let mut rows = Vec::new();
        let mut work = vec![initial];

        while let Some(slice) = work.pop() {
            if slice.count as usize <= self.max_entities || slice.min == slice.max {
                trace!(min = slice.min, max = slice.max, count = slice.count, "Fetching slice");
                rows.extend(fetch(slice.range())?);
                continue;
            }
            let half = slice.min + (slice.max - slice.min) / 2;
            // Upper half first so the lower half is popped next.
            for range in [IdRange::new(half + 1, slice.max), IdRange::new(slice.min, half)] {
                if let Some(p) = probe(range)? {
                    work.push(p);
                }
            }
        }

        Ok(rows)
    }
}

fn investigation_error(e: CatalogError, id: u64) -> IdsError {
    match e.kind() {
        CatalogErrorKind::Session => IdsError::InsufficientPrivileges(e.message().to_string()),
        CatalogErrorKind::Internal => IdsError::Internal(e.to_string()),
        _ => IdsError::NotFound(format!("Investigation {}", id)),
    }
}
