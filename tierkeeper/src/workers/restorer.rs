use tracing::debug;

use super::{TierWorker, WorkerContext, WorkerError};
use crate::model::DataEntity;
use crate::packing::{dataset_unit_location, unpack_dataset};

/// Copies an entity from slow storage back onto fast storage.
pub struct Restorer<'a> {
    ctx: &'a WorkerContext,
}

impl<'a> Restorer<'a> {
    pub fn new(ctx: &'a WorkerContext) -> Self {
        Self { ctx }
    }

    fn restore(&self, entity: &DataEntity) -> Result<(), WorkerError> {
        match entity {
            DataEntity::Dataset(ds) => {
                let unit = dataset_unit_location(ds);
                if !self.ctx.archive.exists(&unit)? {
                    return Err(WorkerError::NotArchived(entity.key()));
                }
                let files = unpack_dataset(self.ctx.archive.get(&unit)?, self.ctx.main.as_ref())?;
                debug!(dataset_id = ds.id, files, "Dataset unit unpacked");
            }
            DataEntity::Datafile(df) => {
                if !self.ctx.archive.exists(&df.location)? {
                    return Err(WorkerError::NotArchived(entity.key()));
                }
                let mut body = self.ctx.archive.get(&df.location)?;
                let bytes = self.ctx.main.put(&df.location, &mut body)?;
                debug!(datafile_id = df.id, bytes, "Datafile restored");
            }
        }
        Ok(())
    }
}

impl TierWorker for Restorer<'_> {
    fn name(&self) -> &'static str {
        "restorer"
    }

    fn run(&self, entity: &DataEntity) -> Result<(), WorkerError> {
        let result = self.restore(entity);
        if result.is_err() {
            self.ctx.mark_failed(entity.key());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::super::Writer;
    use super::*;
    use crate::model::fixtures::{datafile, dataset};
    use crate::storage::Storage;

    #[test]
    fn test_restores_dataset_unit() {
        let f = fixture();
        let entity = DataEntity::Dataset(dataset(1));
        Writer::new(&f.ctx).run(&entity).unwrap();
        f.main.delete("inv1/ds1", "", "").unwrap();
        assert!(!f.main.exists("inv1/ds1/f10.dat").unwrap());

        Restorer::new(&f.ctx).run(&entity).unwrap();

        assert_eq!(read(&f.main, "inv1/ds1/f10.dat"), "ten");
        assert_eq!(read(&f.main, "inv1/ds1/f11.dat"), "eleven");
    }

    #[test]
    fn test_restores_single_datafile() {
        let f = fixture();
        f.archive.put("inv1/ds1/f12.dat", &mut &b"twelve"[..]).unwrap();
        let entity = DataEntity::Datafile(datafile(12, 1));

        Restorer::new(&f.ctx).run(&entity).unwrap();

        assert_eq!(read(&f.main, "inv1/ds1/f12.dat"), "twelve");
    }

    #[test]
    fn test_missing_unit_leaves_marker() {
        let f = fixture();
        let entity = DataEntity::Dataset(dataset(1));

        let err = Restorer::new(&f.ctx).run(&entity).unwrap_err();

        assert!(matches!(err, WorkerError::NotArchived(_)));
        assert!(f.ctx.markers.exists(entity.key()));
    }
}
