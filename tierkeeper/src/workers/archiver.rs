use tracing::{debug, error, warn};

use super::{TierWorker, WorkerContext, WorkerError};
use crate::model::DataEntity;

/// Removes an entity's fast-storage copy.
pub struct Archiver<'a> {
    ctx: &'a WorkerContext,
}

impl<'a> Archiver<'a> {
    pub fn new(ctx: &'a WorkerContext) -> Self {
        Self { ctx }
    }
}

impl TierWorker for Archiver<'_> {
    fn name(&self) -> &'static str {
        "archiver"
    }

    fn run(&self, entity: &DataEntity) -> Result<(), WorkerError> {
        let key = entity.key();
        if self.ctx.markers.exists(key) {
            error!(
                entity = %entity,
                "Not removing from fast storage: a failure marker exists and the data may not be archived"
            );
            return Err(WorkerError::Marked(key));
        }

        let main = self.ctx.main.as_ref();
        match entity {
            DataEntity::Dataset(ds) => {
                let files = self
                    .ctx
                    .resolver
                    .dataset_datafiles(&self.ctx.reader_session, ds)?;
                for df in &files {
                    main.delete(&df.location, &df.create_id, &df.mod_id)?;
                }
                if main.exists(&ds.location)? {
                    warn!(
                        dataset_id = ds.id,
                        location = %ds.location,
                        "Uncatalogued files remain in the dataset directory"
                    );
                }
                debug!(dataset_id = ds.id, files = files.len(), "Dataset removed from fast storage");
            }
            DataEntity::Datafile(df) => {
                main.delete(&df.location, &df.create_id, &df.mod_id)?;
                debug!(datafile_id = df.id, "Datafile removed from fast storage");
            }
        }
        Ok(())
    }
}
