//! Packing of dataset archive units and download bundles.
//!
//! A dataset unit on slow storage is a tar stream whose entry paths are the
//! datafile locations, so unpacking restores every file to the place it was
//! read from. Download bundles use display paths instead and are gzip
//! compressed on request.

use std::io::{self, Read, Seek, SeekFrom, Write};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;
use tracing::debug;

use crate::error::IdsError;
use crate::model::{DatafileInfo, DatasetInfo};
use crate::storage::{Storage, StorageError};

/// File name of the packed unit inside a dataset's slow-storage location.
pub const DATASET_UNIT_NAME: &str = "files.tar";

/// Packing failures.
#[derive(Debug, Error)]
pub enum PackError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Archive I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Archive entry '{0}' has no usable path")]
    InvalidEntry(String),
}

impl From<PackError> for IdsError {
    fn from(e: PackError) -> Self {
        IdsError::Internal(e.to_string())
    }
}

/// Location of a dataset's packed unit on slow storage.
pub fn dataset_unit_location(dataset: &DatasetInfo) -> String {
    format!("{}/{}", dataset.location.trim_end_matches('/'), DATASET_UNIT_NAME)
}

/// Writes every listed datafile present on `main` into a tar stream.
///
/// Files the catalog knows about but that are missing from fast storage are
/// skipped. Returns the number of files packed.
pub fn pack_dataset<W: Write>(
    main: &dyn Storage,
    files: &[DatafileInfo],
    out: W,
) -> Result<usize, PackError> {
    let mut builder = tar::Builder::new(out);
    let mut packed = 0;
    for df in files {
        if !main.exists(&df.location)? {
            debug!(datafile_id = df.id, location = %df.location, "Not on fast storage, skipping");
            continue;
        }
        append_spooled(&mut builder, &df.location, main.get(&df.location)?)?;
        packed += 1;
    }
    builder.into_inner()?.flush()?;
    Ok(packed)
}

/// Extracts a dataset unit onto `main`. Returns the number of files written.
pub fn unpack_dataset<R: Read>(unit: R, main: &dyn Storage) -> Result<usize, PackError> {
    let mut archive = tar::Archive::new(unit);
    let mut unpacked = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.to_string_lossy().into_owned();
        if path.is_empty() {
            return Err(PackError::InvalidEntry(path));
        }
        main.put(&path, &mut entry)?;
        unpacked += 1;
    }
    Ok(unpacked)
}

/// One file of a download bundle.
#[derive(Debug, Clone)]
pub struct BundleEntry {
    /// Path of the entry inside the bundle.
    pub name: String,
    /// Location of the content on fast storage.
    pub location: String,
}

impl BundleEntry {
    /// Bundle entry named `ids/<investigation>/<dataset>/<datafile>`.
    pub fn for_datafile(dataset: &DatasetInfo, datafile: &DatafileInfo) -> Self {
        Self {
            name: format!(
                "ids/{}/{}/{}",
                dataset.investigation_id, dataset.name, datafile.name
            ),
            location: datafile.location.clone(),
        }
    }
}

/// Writes a download bundle of `entries`, gzip compressed if `compress`.
pub fn write_bundle<W: Write>(
    main: &dyn Storage,
    entries: &[BundleEntry],
    out: W,
    compress: bool,
) -> Result<(), PackError> {
    if compress {
        let encoder = GzEncoder::new(out, Compression::default());
        let encoder = write_entries(main, entries, encoder)?;
        encoder.finish()?.flush()?;
    } else {
        write_entries(main, entries, out)?.flush()?;
    }
    Ok(())
}

fn write_entries<W: Write>(
    main: &dyn Storage,
    entries: &[BundleEntry],
    out: W,
) -> Result<W, PackError> {
    let mut builder = tar::Builder::new(out);
    for entry in entries {
        append_spooled(&mut builder, &entry.name, main.get(&entry.location)?)?;
    }
    Ok(builder.into_inner()?)
}

/// Tar headers need the size up front, so content is spooled first.
fn append_spooled<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    mut content: Box<dyn Read + Send>,
) -> Result<(), PackError> {
    let mut spool = tempfile::tempfile()?;
    let size = io::copy(&mut content, &mut spool)?;
    spool.seek(SeekFrom::Start(0))?;

    let mut header = tar::Header::new_gnu();
    header.set_size(size);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().max(0) as u64);
    header.set_cksum();
    builder.append_data(&mut header, path, spool)?;
    Ok(())
}
