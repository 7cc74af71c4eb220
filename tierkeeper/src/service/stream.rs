//! Download responses.

use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::IdsError;
use crate::lock::Lock;
use crate::packing::{write_bundle, BundleEntry};
use crate::storage::Storage;

/// Parses an HTTP `Range` value of the form `bytes=N-` into the offset `N`.
///
/// `None` means the whole content.
pub fn parse_range(range: Option<&str>) -> Result<u64, IdsError> {
    let Some(range) = range else {
        return Ok(0);
    };
    range
        .strip_prefix("bytes=")
        .and_then(|rest| rest.strip_suffix('-'))
        .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|digits| digits.parse::<u64>().ok())
        .ok_or_else(|| IdsError::BadRequest("The range must match bytes=(\\d+)-".to_string()))
}

/// Name offered to the client for a download.
///
/// A raw single file keeps its datafile name unless `outname` is given.
/// Bundles use `outname` with the bundle suffix appended when missing, or a
/// `yyyy-MM-dd_HH-mm-ss` timestamp.
pub fn output_name(
    outname: Option<&str>,
    bundle: bool,
    compress: bool,
    datafile_name: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    if !bundle {
        return outname
            .or(datafile_name)
            .map(str::to_string)
            .unwrap_or_else(|| now.format("%Y-%m-%d_%H-%M-%S").to_string());
    }
    let suffix = if compress { ".tar.gz" } else { ".tar" };
    match outname {
        Some(name) if name.ends_with(suffix) => name.to_string(),
        Some(name) => format!("{name}{suffix}"),
        None => format!("{}{suffix}", now.format("%Y-%m-%d_%H-%M-%S")),
    }
}

#[derive(Debug)]
pub(crate) enum Body {
    /// One datafile, streamed as is.
    Raw { location: String },
    /// A tar bundle of several datafiles.
    Bundle {
        entries: Vec<BundleEntry>,
        compress: bool,
    },
}

/// A prepared download.
///
/// Holds a SHARED lock on every dataset it reads from until it is written
/// out or dropped.
pub struct DataStream {
    name: String,
    offset: u64,
    body: Body,
    main: Arc<dyn Storage>,
    lock: Lock,
}

impl DataStream {
    pub(crate) fn new(
        name: String,
        offset: u64,
        body: Body,
        main: Arc<dyn Storage>,
        lock: Lock,
    ) -> Self {
        Self {
            name,
            offset,
            body,
            main,
            lock,
        }
    }

    /// File name for the `Content-Disposition` header.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes skipped at the start of the content.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn is_bundle(&self) -> bool {
        matches!(self.body, Body::Bundle { .. })
    }

    /// Writes the content, minus the first `offset` bytes, to `out`.
    ///
    /// Returns the number of bytes written. The lock is released afterwards.
    pub fn write_to<W: Write>(self, out: W) -> Result<u64, IdsError> {
        let mut out = OffsetWriter::new(out, self.offset);
        match &self.body {
            Body::Raw { location } => {
                let mut content = self.main.get(location)?;
                io::copy(&mut content, &mut out)
                    .map_err(|e| IdsError::Internal(format!("Streaming {location} failed: {e}")))?;
                out.flush()
                    .map_err(|e| IdsError::Internal(format!("Streaming {location} failed: {e}")))?;
            }
            Body::Bundle { entries, compress } => {
                write_bundle(self.main.as_ref(), entries, &mut out, *compress)?;
            }
        }
        debug!(
            name = %self.name,
            offset = self.offset,
            written = out.written(),
            datasets = ?self.lock.datasets().collect::<Vec<_>>(),
            "Download finished"
        );
        Ok(out.written())
    }
}

impl std::fmt::Debug for DataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStream")
            .field("name", &self.name)
            .field("offset", &self.offset)
            .field("body", &self.body)
            .field("lock", &self.lock)
            .finish()
    }
}

/// Discards the first `skip` bytes written through it.
struct OffsetWriter<W> {
    inner: W,
    skip: u64,
    written: u64,
}

impl<W: Write> OffsetWriter<W> {
    fn new(inner: W, skip: u64) -> Self {
        Self {
            inner,
            skip,
            written: 0,
        }
    }

    fn written(&self) -> u64 {
        self.written
    }
}

impl<W: Write> Write for OffsetWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let skipped = self.skip.min(buf.len() as u64) as usize;
        self.skip -= skipped as u64;
        if skipped == buf.len() {
            return Ok(skipped);
        }
        let n = self.inner.write(&buf[skipped..])?;
        self.written += n as u64;
        Ok(skipped + n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
