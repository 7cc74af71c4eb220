//! Builds an [`IdsService`] from the INI configuration.
//!
//! Each tier component is created by its own function so that failures
//! name the directory at fault.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::config::ServiceConfig;
use super::facade::{ArchiveTier, IdsService};
use crate::catalog::Catalog;
use crate::config::ConfigFile;
use crate::error::IdsError;
use crate::fsm::FsmConfig;
use crate::persistence::{JsonRequestStore, RequestStore};
use crate::storage::{LocalFileStorage, Storage};
use crate::workers::MarkerStore;

/// Translate the file settings into a [`ServiceConfig`].
pub fn service_config_from(file: &ConfigFile) -> ServiceConfig {
    let fsm = FsmConfig::default()
        .with_write_delay(Duration::from_secs(file.fsm.write_delay_secs))
        .with_process_interval(Duration::from_secs(file.fsm.process_queue_interval_secs))
        .with_max_workers(file.fsm.max_workers);

    ServiceConfig::builder()
        .root_users(file.service.root_users.iter().cloned())
        .read_only(file.service.read_only)
        .days_to_expire(file.retention.days_to_expire)
        .storage_unit(file.storage.storage_unit)
        .reader_session(file.service.reader_session.clone())
        .max_entities(file.selection.max_entities)
        .tidy_interval(Duration::from_secs(file.retention.tidy_interval_secs))
        .fsm(fsm)
        .build()
}

/// Create the main storage tier.
pub fn create_main_storage(file: &ConfigFile) -> Result<Arc<dyn Storage>, IdsError> {
    let storage = LocalFileStorage::new(&file.storage.main_dir)?;
    Ok(Arc::new(storage))
}

/// Create the archive tier, or `None` for a single-level deployment.
pub fn create_archive_tier(file: &ConfigFile) -> Result<Option<ArchiveTier>, IdsError> {
    let Some(archive_dir) = &file.storage.archive_dir else {
        return Ok(None);
    };
    let storage = LocalFileStorage::new(archive_dir)?;
    let markers = MarkerStore::new(&file.storage.cache_dir).map_err(|e| {
        IdsError::Internal(format!(
            "Cannot use marker directory {}: {e}",
            file.storage.cache_dir.display()
        ))
    })?;
    Ok(Some(ArchiveTier {
        storage: Arc::new(storage),
        markers,
    }))
}

/// Create the persistent request store.
pub fn create_request_store(file: &ConfigFile) -> Result<Arc<dyn RequestStore>, IdsError> {
    let store = JsonRequestStore::open(&file.storage.data_dir)?;
    Ok(Arc::new(store))
}

/// Assemble a service from the configuration file and a catalog.
///
/// Background daemons are not started; call [`IdsService::start`].
pub fn create_service(file: &ConfigFile, catalog: Arc<dyn Catalog>) -> Result<IdsService, IdsError> {
    let main = create_main_storage(file)?;
    let archive = create_archive_tier(file)?;
    let store = create_request_store(file)?;

    info!(
        main = %file.storage.main_dir.display(),
        archive = ?file.storage.archive_dir,
        requests = %file.storage.data_dir.display(),
        "Storage tiers opened"
    );

    Ok(IdsService::new(
        service_config_from(file),
        catalog,
        main,
        store,
        archive,
    ))
}
