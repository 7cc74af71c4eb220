use std::io::{Seek, SeekFrom};

use tracing::{debug, info, warn};

use super::{TierWorker, WorkerContext, WorkerError};
use crate::model::DataEntity;
use crate::packing::{dataset_unit_location, pack_dataset};

/// Pushes the current fast-storage content of an entity to slow storage.
///
/// If the entity no longer exists on fast storage, the slow copy is removed
/// instead. Success is only reported once slow storage shows the unit.
pub struct Writer<'a> {
    ctx: &'a WorkerContext,
}

impl<'a> Writer<'a> {
    pub fn new(ctx: &'a WorkerContext) -> Self {
        Self { ctx }
    }

    fn write(&self, entity: &DataEntity) -> Result<(), WorkerError> {
        let main = self.ctx.main.as_ref();
        let archive = self.ctx.archive.as_ref();

        let (unit, create_id, mod_id) = match entity {
            DataEntity::Dataset(ds) => (dataset_unit_location(ds), "", ""),
            DataEntity::Datafile(df) => (df.location.clone(), df.create_id.as_str(), df.mod_id.as_str()),
        };

        if !main.exists(entity.location())? {
            if archive.exists(&unit)? {
                archive.delete(&unit, create_id, mod_id)?;
                info!(entity = %entity, unit = %unit, "Gone from fast storage, removed archived copy");
            }
            return Ok(());
        }

        match entity {
            DataEntity::Dataset(ds) => {
                let files = self
                    .ctx
                    .resolver
                    .dataset_datafiles(&self.ctx.reader_session, ds)?;
                let mut spool = tempfile::tempfile()?;
                let packed = pack_dataset(main, &files, &mut spool)?;
                if packed < files.len() {
                    warn!(
                        dataset_id = ds.id,
                        catalogued = files.len(),
                        packed,
                        "Some catalogued datafiles are missing from fast storage"
                    );
                }
                spool.seek(SeekFrom::Start(0))?;
                let bytes = archive.put(&unit, &mut spool)?;
                debug!(dataset_id = ds.id, packed, bytes, "Dataset unit written");
            }
            DataEntity::Datafile(df) => {
                let mut body = main.get(&df.location)?;
                let bytes = archive.put(&unit, &mut body)?;
                debug!(datafile_id = df.id, bytes, "Datafile written");
            }
        }

        if !archive.exists(&unit)? {
            return Err(WorkerError::NotDurable(unit));
        }
        Ok(())
    }
}

impl TierWorker for Writer<'_> {
    fn name(&self) -> &'static str {
        "writer"
    }

    fn run(&self, entity: &DataEntity) -> Result<(), WorkerError> {
        match self.write(entity) {
            Ok(()) => {
                if let Err(e) = self.ctx.markers.remove(entity.key()) {
                    warn!(entity = %entity, error = %e, "Unable to remove failure marker");
                }
                Ok(())
            }
            Err(e) => {
                self.ctx.mark_failed(entity.key());
                Err(e)
            }
        }
    }
}
