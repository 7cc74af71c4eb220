//! Tier workers.
//!
//! Each worker performs one physical migration for one entity:
//!
//! - [`Restorer`]: slow → fast, unpacking dataset units
//! - [`Writer`]: fast → slow, packing dataset units; confirms durability
//! - [`Archiver`]: removes the fast copy unless a failure marker exists
//!
//! Workers are plain blocking code. The dispatcher runs them on the blocking
//! thread pool while holding an exclusive lock on the entity's dataset, and
//! maps the outcome to an entity status with [`WorkerError::status`].

mod archiver;
mod marker;
mod restorer;
mod writer;

pub use archiver::Archiver;
pub use marker::MarkerStore;
pub use restorer::Restorer;
pub use writer::Writer;

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::error::IdsError;
use crate::model::{DataEntity, EntityKey, RequestedState, StatusInfo};
use crate::packing::PackError;
use crate::selection::SelectionResolver;
use crate::storage::{Storage, StorageError};

/// Worker failures.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The Archiver found a failure marker.
    #[error("Refusing to remove {0} from fast storage: a previous write or restore failed")]
    Marked(EntityKey),

    /// Slow storage holds nothing for the entity.
    #[error("No archived copy of {0}")]
    NotArchived(EntityKey),

    /// Slow storage did not show the written unit afterwards.
    #[error("Slow storage did not confirm '{0}'")]
    NotDurable(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("Spool I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] IdsError),
}

impl WorkerError {
    /// Entity status recorded for this failure.
    pub fn status(&self) -> StatusInfo {
        match self {
            Self::Marked(_) => StatusInfo::Denied,
            Self::NotArchived(_) => StatusInfo::NotFound,
            _ => StatusInfo::Error,
        }
    }
}

/// Everything a worker needs to reach both tiers and the catalog.
pub struct WorkerContext {
    pub main: Arc<dyn Storage>,
    pub archive: Arc<dyn Storage>,
    pub markers: MarkerStore,
    pub resolver: SelectionResolver,
    /// Catalog session used to list a dataset's datafiles.
    pub reader_session: String,
}

impl WorkerContext {
    fn mark_failed(&self, key: EntityKey) {
        if let Err(e) = self.markers.create(key) {
            error!(entity = %key, error = %e, "Unable to create failure marker");
        }
    }
}

/// A single physical migration step.
pub trait TierWorker {
    fn name(&self) -> &'static str;

    fn run(&self, entity: &DataEntity) -> Result<(), WorkerError>;
}

/// Runs the migration for `state` and returns the resulting entity status.
///
/// WRITE_THEN_ARCHIVE runs the Writer and then the Archiver; the Archiver is
/// skipped when the Writer fails.
pub fn execute(ctx: &WorkerContext, entity: &DataEntity, state: RequestedState) -> StatusInfo {
    let restorer = Restorer::new(ctx);
    let writer = Writer::new(ctx);
    let archiver = Archiver::new(ctx);
    let steps: Vec<&dyn TierWorker> = match state {
        RequestedState::Restore => vec![&restorer as &dyn TierWorker],
        RequestedState::Write => vec![&writer as &dyn TierWorker],
        RequestedState::Archive => vec![&archiver as &dyn TierWorker],
        RequestedState::WriteThenArchive => vec![&writer as &dyn TierWorker, &archiver],
        RequestedState::Prepare => Vec::new(),
    };

    for step in steps {
        if let Err(e) = step.run(entity) {
            error!(entity = %entity, worker = step.name(), error = %e, "Tier worker failed");
            return e.status();
        }
        info!(entity = %entity, worker = step.name(), "Tier worker finished");
    }
    StatusInfo::Completed
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::model::fixtures::{datafile, dataset};
    use crate::storage::LocalFileStorage;
    use std::io::Read;
    use tempfile::TempDir;

    pub struct Fixture {
        pub _dir: TempDir,
        pub main: Arc<LocalFileStorage>,
        pub archive: Arc<LocalFileStorage>,
        pub ctx: WorkerContext,
    }

    /// Dataset 1 with datafiles 10 and 11 on fast storage.
    pub fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let catalog = Arc::new(InMemoryCatalog::new());
        catalog.add_session("reader", "reader");
        catalog.add_dataset(dataset(1));
        catalog.add_datafile(datafile(10, 1));
        catalog.add_datafile(datafile(11, 1));

        let main = Arc::new(LocalFileStorage::new(dir.path().join("main")).unwrap());
        let archive = Arc::new(LocalFileStorage::new(dir.path().join("archive")).unwrap());
        main.put("inv1/ds1/f10.dat", &mut &b"ten"[..]).unwrap();
        main.put("inv1/ds1/f11.dat", &mut &b"eleven"[..]).unwrap();

        let ctx = WorkerContext {
            main: main.clone(),
            archive: archive.clone(),
            markers: MarkerStore::new(&dir.path().join("cache")).unwrap(),
            resolver: SelectionResolver::new(catalog.clone(), 100),
            reader_session: "reader".to_string(),
        };
        Fixture {
            _dir: dir,
            main,
            archive,
            ctx,
        }
    }

    pub fn read(storage: &LocalFileStorage, location: &str) -> String {
        let mut s = String::new();
        storage
            .get(location)
            .unwrap()
            .read_to_string(&mut s)
            .unwrap();
        s
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::fixtures::dataset;

    #[test]
    fn test_write_then_archive_runs_in_order() {
        let f = fixture();
        let entity = DataEntity::Dataset(dataset(1));

        let status = execute(&f.ctx, &entity, RequestedState::WriteThenArchive);

        assert_eq!(status, StatusInfo::Completed);
        assert!(f.archive.exists("inv1/ds1/files.tar").unwrap());
        assert!(!f.main.exists("inv1/ds1").unwrap());
    }

    #[test]
    fn test_archiver_skipped_when_writer_fails() {
        let f = fixture();
        // A directory where the unit file should go makes the put fail.
        std::fs::create_dir_all(f.archive.root().join("inv1/ds1/files.tar/blocker")).unwrap();
        let entity = DataEntity::Dataset(dataset(1));

        let status = execute(&f.ctx, &entity, RequestedState::WriteThenArchive);

        assert_eq!(status, StatusInfo::Error);
        assert!(f.main.exists("inv1/ds1/f10.dat").unwrap());
        assert!(f.ctx.markers.exists(entity.key()));
    }

    #[test]
    fn test_failure_statuses() {
        assert_eq!(
            WorkerError::Marked(EntityKey::Dataset(1)).status(),
            StatusInfo::Denied
        );
        assert_eq!(
            WorkerError::NotArchived(EntityKey::Dataset(1)).status(),
            StatusInfo::NotFound
        );
        assert_eq!(
            WorkerError::NotDurable("x".into()).status(),
            StatusInfo::Error
        );
    }
}
