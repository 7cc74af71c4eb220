//! The request-facing service.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::ServiceConfig;
use super::stream::{output_name, parse_range, Body, DataStream};
use crate::catalog::Catalog;
use crate::error::IdsError;
use crate::fsm::{Fsm, ServiceStatus};
use crate::lock::{LockManager, LockType};
use crate::model::{
    DataEntity, DatafileInfo, DatasetInfo, DeferredOp, Request, RequestedState, Status,
    StatusInfo, StorageUnit,
};
use crate::packing::BundleEntry;
use crate::persistence::RequestStore;
use crate::selection::{DataSelection, SelectionQuery, SelectionResolver};
use crate::storage::Storage;
use crate::tidier::TidierDaemon;
use crate::workers::{MarkerStore, WorkerContext};

const RESTORE_REQUESTED: &str =
    "Before getting the data, it must be restored from slow storage; restoration has been requested";

/// Slow storage of a two-level deployment.
pub struct ArchiveTier {
    pub storage: Arc<dyn Storage>,
    pub markers: MarkerStore,
}

/// A tier unit of a selection, flagged when it is a dataset without files.
#[derive(Debug, Clone)]
struct Unit {
    entity: DataEntity,
    empty: bool,
}

/// Facade over selection, locking, the migration coordinator and
/// persistence.
///
/// Without an [`ArchiveTier`] the deployment is single-level: archive and
/// restore do nothing and all data is always online.
///
/// # Example
///
/// ```ignore
/// use tierkeeper::service::{IdsService, ServiceConfig};
///
/// let service = IdsService::new(ServiceConfig::default(), catalog, main, store, Some(tier));
/// let handles = service.start(shutdown.clone())?;
///
/// let id = service.prepare_data(session, &query, false, false)?;
/// while !service.is_prepared(&id)? { /* poll */ }
/// service.get_prepared_data(&id, None, None)?.write_to(&mut out)?;
/// ```
pub struct IdsService {
    config: ServiceConfig,
    catalog: Arc<dyn Catalog>,
    resolver: SelectionResolver,
    main: Arc<dyn Storage>,
    store: Arc<dyn RequestStore>,
    locks: LockManager,
    fsm: Option<Arc<Fsm>>,
}

impl IdsService {
    pub fn new(
        config: ServiceConfig,
        catalog: Arc<dyn Catalog>,
        main: Arc<dyn Storage>,
        store: Arc<dyn RequestStore>,
        archive: Option<ArchiveTier>,
    ) -> Self {
        let resolver = SelectionResolver::new(Arc::clone(&catalog), config.max_entities());
        let locks = LockManager::new();
        let fsm = archive.map(|tier| {
            let workers = WorkerContext {
                main: Arc::clone(&main),
                archive: tier.storage,
                markers: tier.markers,
                resolver: resolver.clone(),
                reader_session: config.reader_session().to_string(),
            };
            Arc::new(Fsm::new(
                config.fsm().clone(),
                locks.clone(),
                Arc::clone(&store),
                workers,
            ))
        });
        info!(
            two_level = fsm.is_some(),
            storage_unit = %config.storage_unit(),
            read_only = config.read_only(),
            "Service created"
        );
        Self {
            config,
            catalog,
            resolver,
            main,
            store,
            locks,
            fsm,
        }
    }

    /// Starts the background daemons: the dispatcher (two-level only, after
    /// recovering persisted requests) and the tidier.
    pub fn start(&self, shutdown: CancellationToken) -> Result<Vec<JoinHandle<()>>, IdsError> {
        let mut handles = Vec::new();
        if let Some(fsm) = &self.fsm {
            handles.push(fsm.start(shutdown.clone())?);
        }
        let tidier = TidierDaemon::new(Arc::clone(&self.store))
            .with_interval(self.config.tidy_interval())
            .with_stale_grace(self.config.request_lifetime());
        handles.push(tokio::spawn(tidier.run(shutdown)));
        Ok(handles)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The migration coordinator of a two-level deployment.
    pub fn fsm(&self) -> Option<&Arc<Fsm>> {
        self.fsm.as_ref()
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn store(&self) -> &Arc<dyn RequestStore> {
        &self.store
    }

    pub fn is_two_level(&self) -> bool {
        self.fsm.is_some()
    }

    pub fn ping(&self) -> &'static str {
        "IdsOK"
    }

    pub fn api_version(&self) -> &'static str {
        crate::VERSION
    }

    /// Whether put and delete are disabled.
    pub fn is_read_only(&self) -> bool {
        self.config.read_only()
    }

    // =========================================================================
    // Preparation
    // =========================================================================

    /// Records a selection for later download and brings it online.
    ///
    /// Returns the preparedId at once; entities already online are completed
    /// immediately, the rest wait for a RESTORE.
    pub fn prepare_data(
        &self,
        session: &str,
        query: &SelectionQuery,
        compress: bool,
        zip: bool,
    ) -> Result<String, IdsError> {
        let selection = self.resolver.resolve(session, query, true)?;
        let user = self.catalog.user_name(session)?;
        let units = self.selection_units(&selection);

        let mut request = Request::new(
            user,
            RequestedState::Prepare,
            units.iter().map(|u| u.entity.clone()),
            self.config.request_lifetime(),
        )
        .with_packing(compress, zip)
        .with_selection(
            selection.datasets().cloned().collect(),
            selection.datafiles().cloned().collect(),
            selection.must_zip(),
        );

        let mut waiting = Vec::new();
        for unit in units {
            if self.fsm.is_none() || self.is_online(&unit)? {
                request.set_entity_status(unit.entity.key(), StatusInfo::Completed);
            } else {
                waiting.push(unit.entity);
            }
        }
        self.store.save(&request)?;

        if let Some(fsm) = &self.fsm {
            for entity in &waiting {
                fsm.prepare(entity.clone(), request.prepared_id);
            }
        }
        info!(
            prepared_id = %request.prepared_id,
            user = %request.user,
            entities = request.entities.len(),
            waiting = waiting.len(),
            "Data prepared"
        );
        Ok(request.prepared_id.to_string())
    }

    /// Whether every entity of a prepared request is online.
    ///
    /// A request whose restoration failed reports an internal error.
    pub fn is_prepared(&self, prepared_id: &str) -> Result<bool, IdsError> {
        let request = self.load_prepared(prepared_id)?;
        match request.status {
            StatusInfo::Completed => Ok(true),
            StatusInfo::Submitted | StatusInfo::Retrieving => Ok(false),
            status => Err(IdsError::Internal(format!(
                "Restoration of {prepared_id} finished with status {status}"
            ))),
        }
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Availability of a selection.
    ///
    /// Without a session the reader session is used. Archived entities get a
    /// RESTORE queued as a side effect.
    pub fn get_status(
        &self,
        session: Option<&str>,
        query: &SelectionQuery,
    ) -> Result<Status, IdsError> {
        let ids = query.parse()?;
        let session = session.unwrap_or_else(|| self.config.reader_session());
        let with_datafiles = self.config.storage_unit() == StorageUnit::Datafile;
        let selection = self.resolver.resolve_ids(session, ids, with_datafiles)?;
        let Some(fsm) = &self.fsm else {
            return Ok(Status::Online);
        };
        self.aggregate_status(fsm, self.selection_units(&selection))
    }

    /// Availability of a prepared selection.
    pub fn get_status_for_prepared(&self, prepared_id: &str) -> Result<Status, IdsError> {
        let request = self.load_prepared(prepared_id)?;
        let Some(fsm) = &self.fsm else {
            return Ok(Status::Online);
        };
        self.aggregate_status(fsm, request_units(&request))
    }

    fn aggregate_status(&self, fsm: &Fsm, units: Vec<Unit>) -> Result<Status, IdsError> {
        let mut status = Status::Online;
        for unit in units {
            let current = if fsm.is_restoring(&unit.entity) {
                Status::Restoring
            } else if !self.is_online(&unit)? {
                fsm.queue(unit.entity.clone(), DeferredOp::Restore, None);
                Status::Archived
            } else {
                Status::Online
            };
            status = status.max(current);
        }
        Ok(status)
    }

    // =========================================================================
    // Selection info
    // =========================================================================

    /// Total catalogued size in bytes of the datafiles of a selection.
    pub fn get_size(&self, session: &str, query: &SelectionQuery) -> Result<u64, IdsError> {
        let selection = self.resolver.resolve(session, query, true)?;
        Ok(selection.datafiles().map(|df| df.file_size).sum())
    }

    /// Total size of the datafiles of a prepared selection.
    pub fn get_size_for_prepared(&self, prepared_id: &str) -> Result<u64, IdsError> {
        let request = self.load_prepared(prepared_id)?;
        Ok(request.datafiles.iter().map(|df| df.file_size).sum())
    }

    /// Ids of the datafiles of a selection, ascending.
    pub fn get_datafile_ids(
        &self,
        session: &str,
        query: &SelectionQuery,
    ) -> Result<Vec<u64>, IdsError> {
        let selection = self.resolver.resolve(session, query, true)?;
        Ok(selection.datafiles().map(|df| df.id).collect())
    }

    /// Ids of the datafiles of a prepared selection.
    pub fn get_datafile_ids_for_prepared(&self, prepared_id: &str) -> Result<Vec<u64>, IdsError> {
        let request = self.load_prepared(prepared_id)?;
        let mut ids: Vec<u64> = request.datafiles.iter().map(|df| df.id).collect();
        ids.sort_unstable();
        Ok(ids)
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Opens a download of a selection.
    ///
    /// `range` is an HTTP `Range` value of the form `bytes=N-`.
    pub fn get_data(
        &self,
        session: &str,
        query: &SelectionQuery,
        compress: bool,
        zip: bool,
        outname: Option<&str>,
        range: Option<&str>,
    ) -> Result<DataStream, IdsError> {
        let offset = parse_range(range)?;
        let selection = self.resolver.resolve(session, query, true)?;
        let datasets: Vec<DatasetInfo> = selection.datasets().cloned().collect();
        let datafiles: Vec<DatafileInfo> = selection.datafiles().cloned().collect();
        let bundle = zip || selection.must_zip();
        self.open_stream(
            &datasets,
            &datafiles,
            self.selection_units(&selection),
            bundle,
            compress,
            outname,
            offset,
        )
    }

    /// Opens a download of a prepared selection.
    pub fn get_prepared_data(
        &self,
        prepared_id: &str,
        outname: Option<&str>,
        range: Option<&str>,
    ) -> Result<DataStream, IdsError> {
        let offset = parse_range(range)?;
        let request = self.load_prepared(prepared_id)?;
        let bundle = request.zip || request.must_zip;
        self.open_stream(
            &request.datasets,
            &request.datafiles,
            request_units(&request),
            bundle,
            request.compress,
            outname,
            offset,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn open_stream(
        &self,
        datasets: &[DatasetInfo],
        datafiles: &[DatafileInfo],
        units: Vec<Unit>,
        bundle: bool,
        compress: bool,
        outname: Option<&str>,
        offset: u64,
    ) -> Result<DataStream, IdsError> {
        let lock = self
            .locks
            .lock(datasets.iter().map(|ds| ds.id), LockType::Shared)
            .map_err(|e| {
                debug!(reason = %e, "Could not acquire lock, getData failed");
                IdsError::from(e)
            })?;

        if let Some(fsm) = &self.fsm {
            self.check_online(fsm, &units)?;
        }
        self.check_datafiles_present(datafiles)?;

        let (body, single_name) = if bundle {
            let by_id: BTreeMap<u64, &DatasetInfo> = datasets.iter().map(|ds| (ds.id, ds)).collect();
            let entries = datafiles
                .iter()
                .filter_map(|df| {
                    by_id
                        .get(&df.dataset_id)
                        .map(|ds| BundleEntry::for_datafile(ds, df))
                })
                .collect();
            (Body::Bundle { entries, compress }, None)
        } else {
            let df = datafiles
                .first()
                .ok_or_else(|| IdsError::NotFound("No datafile selected".to_string()))?;
            (
                Body::Raw {
                    location: df.location.clone(),
                },
                Some(df.name.as_str()),
            )
        };
        let name = output_name(outname, bundle, compress, single_name, Utc::now());
        info!(name = %name, offset, datafiles = datafiles.len(), bundle, "Download opened");

        Ok(DataStream::new(name, offset, body, Arc::clone(&self.main), lock))
    }

    /// Queues a RESTORE for every unit missing from fast storage.
    fn check_online(&self, fsm: &Fsm, units: &[Unit]) -> Result<(), IdsError> {
        let mut missing = 0;
        for unit in units {
            if !self.is_online(unit)? {
                fsm.queue(unit.entity.clone(), DeferredOp::Restore, None);
                missing += 1;
            }
        }
        if missing > 0 {
            debug!(missing, "Data not online, restoration requested");
            return Err(IdsError::DataNotOnline(RESTORE_REQUESTED.to_string()));
        }
        Ok(())
    }

    /// Fails when the catalog no longer knows one of the datafiles.
    fn check_datafiles_present(&self, datafiles: &[DatafileInfo]) -> Result<(), IdsError> {
        let ids: Vec<u64> = datafiles.iter().map(|df| df.id).collect();
        for chunk in ids.chunks(self.config.max_entities()) {
            let found = self
                .catalog
                .count_datafiles(self.config.reader_session(), chunk)?;
            if found != chunk.len() as u64 {
                return Err(IdsError::NotFound(
                    "One of the datafiles requested has been deleted".to_string(),
                ));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Migration requests
    // =========================================================================

    /// Requests that a selection be removed from fast storage.
    pub fn archive(&self, session: &str, query: &SelectionQuery) -> Result<(), IdsError> {
        self.migrate(session, query, RequestedState::Archive, DeferredOp::Archive)
    }

    /// Requests that a selection be brought back to fast storage.
    pub fn restore(&self, session: &str, query: &SelectionQuery) -> Result<(), IdsError> {
        self.migrate(session, query, RequestedState::Restore, DeferredOp::Restore)
    }

    fn migrate(
        &self,
        session: &str,
        query: &SelectionQuery,
        state: RequestedState,
        op: DeferredOp,
    ) -> Result<(), IdsError> {
        let ids = query.parse()?;
        let Some(fsm) = &self.fsm else {
            if !ids.investigations.is_empty() {
                return Err(IdsError::NotImplemented(
                    "This operation is unavailable for single level storage with investigation ids"
                        .to_string(),
                ));
            }
            self.resolver.resolve_ids(session, ids, false)?;
            debug!(op = %op, "Single level storage, nothing to migrate");
            return Ok(());
        };

        let with_datafiles = self.config.storage_unit() == StorageUnit::Datafile;
        let selection = self.resolver.resolve_ids(session, ids, with_datafiles)?;
        let user = self.catalog.user_name(session)?;
        let entities = selection.entities(self.config.storage_unit());
        let request = Request::new(user, state, entities.clone(), self.config.request_lifetime());
        self.store.save(&request)?;

        for entity in entities {
            fsm.queue(entity, op, Some(request.prepared_id));
        }
        info!(
            prepared_id = %request.prepared_id,
            op = %op,
            entities = request.entities.len(),
            "Migration requested"
        );
        Ok(())
    }

    // =========================================================================
    // Modification
    // =========================================================================

    /// Stores a new datafile in a dataset and returns its id.
    ///
    /// The file is written to fast storage and registered in the catalog; it
    /// is removed again if registration fails. Two-level deployments queue a
    /// WRITE so slow storage follows.
    pub fn put(
        &self,
        session: &str,
        dataset_id: u64,
        name: &str,
        body: &mut dyn Read,
    ) -> Result<u64, IdsError> {
        self.check_writable()?;
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(IdsError::BadRequest(format!(
                "The name '{name}' is not a valid datafile name"
            )));
        }
        let user = self.catalog.user_name(session)?;
        let dataset = self.catalog.dataset(session, dataset_id)?;

        let _lock = self.locks.lock([dataset.id], LockType::Shared)?;

        let unit = self.config.storage_unit();
        if let (Some(fsm), StorageUnit::Dataset) = (&self.fsm, unit) {
            let empty = self
                .catalog
                .probe_datafiles(session, dataset.id, None)?
                .is_none();
            let unit = Unit {
                entity: DataEntity::Dataset(dataset.clone()),
                empty,
            };
            self.check_online(fsm, std::slice::from_ref(&unit))?;
        }

        let location = format!("{}/{}", dataset.location, name);
        if self.main.exists(&location)? {
            return Err(IdsError::BadRequest(format!(
                "Dataset {dataset_id} already holds a file named '{name}'"
            )));
        }
        let bytes = self.main.put(&location, body)?;
        let datafile = match self
            .catalog
            .create_datafile(session, dataset.id, name, &location, bytes)
        {
            Ok(df) => df,
            Err(e) => {
                if let Err(cleanup) = self.main.delete(&location, &user, &user) {
                    warn!(location = %location, error = %cleanup, "Unable to remove unregistered file");
                }
                return Err(e.into());
            }
        };
        info!(datafile_id = datafile.id, dataset_id, bytes, user = %user, "Datafile stored");

        if let Some(fsm) = &self.fsm {
            let entity = match unit {
                StorageUnit::Dataset => DataEntity::Dataset(dataset),
                StorageUnit::Datafile => DataEntity::Datafile(datafile.clone()),
            };
            self.queue_write(fsm, user, vec![entity])?;
        }
        Ok(datafile.id)
    }

    /// Removes the datafiles of a selection from the catalog and fast storage.
    pub fn delete(&self, session: &str, query: &SelectionQuery) -> Result<(), IdsError> {
        self.check_writable()?;
        let selection = self.resolver.resolve(session, query, true)?;
        let user = self.catalog.user_name(session)?;
        if let Some(fsm) = &self.fsm {
            self.check_online(fsm, &self.selection_units(&selection))?;
        }

        let _lock = self
            .locks
            .lock(selection.dataset_ids(), LockType::Exclusive)?;
        for df in selection.datafiles() {
            self.catalog.delete_datafile(session, df.id)?;
            self.main.delete(&df.location, &df.create_id, &df.mod_id)?;
        }
        info!(datafiles = selection.datafile_count(), user = %user, "Datafiles deleted");

        if let Some(fsm) = &self.fsm {
            self.queue_write(fsm, user, selection.entities(self.config.storage_unit()))?;
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), IdsError> {
        if self.config.read_only() {
            return Err(IdsError::NotImplemented(
                "This operation has been configured to be unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn queue_write(&self, fsm: &Fsm, user: String, entities: Vec<DataEntity>) -> Result<(), IdsError> {
        let request = Request::new(
            user,
            RequestedState::Write,
            entities.clone(),
            self.config.request_lifetime(),
        );
        self.store.save(&request)?;
        for entity in entities {
            fsm.queue(entity, DeferredOp::Write, Some(request.prepared_id));
        }
        Ok(())
    }

    // =========================================================================
    // Administration
    // =========================================================================

    /// Queue, changing set and locks. Root users only.
    pub fn get_service_status(&self, session: &str) -> Result<ServiceStatus, IdsError> {
        let user = self.catalog.user_name(session)?;
        if !self.config.is_root(&user) {
            return Err(IdsError::InsufficientPrivileges(format!(
                "{user} is not included in the root users"
            )));
        }
        Ok(match &self.fsm {
            Some(fsm) => fsm.service_status(),
            None => ServiceStatus {
                locks: self.locks.lock_info(),
                ..ServiceStatus::default()
            },
        })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn load_prepared(&self, prepared_id: &str) -> Result<Request, IdsError> {
        let id = Uuid::parse_str(prepared_id).map_err(|_| {
            IdsError::BadRequest(format!(
                "The preparedId '{prepared_id}' is not a valid UUID"
            ))
        })?;
        match self.store.load(&id)? {
            Some(request)
                if request.requested_state == RequestedState::Prepare
                    && !request.is_expired(Utc::now()) =>
            {
                Ok(request)
            }
            _ => Err(IdsError::NotFound(format!(
                "The preparedId {prepared_id} is not known"
            ))),
        }
    }

    fn selection_units(&self, selection: &DataSelection) -> Vec<Unit> {
        selection
            .entities(self.config.storage_unit())
            .into_iter()
            .map(|entity| {
                let empty = matches!(&entity, DataEntity::Dataset(ds) if selection.is_empty_dataset(ds.id));
                Unit { entity, empty }
            })
            .collect()
    }

    fn is_online(&self, unit: &Unit) -> Result<bool, IdsError> {
        if unit.empty {
            return Ok(true);
        }
        Ok(self.main.exists(unit.entity.location())?)
    }
}

fn request_units(request: &Request) -> Vec<Unit> {
    request
        .entities
        .iter()
        .map(|record| {
            let empty = match &record.entity {
                DataEntity::Dataset(ds) => !request.datafiles.iter().any(|df| df.dataset_id == ds.id),
                DataEntity::Datafile(_) => false,
            };
            Unit {
                entity: record.entity.clone(),
                empty,
            }
        })
        .collect()
}
