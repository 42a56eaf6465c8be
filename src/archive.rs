//! Streaming tar.gz entry reader.
//!
//! Wraps a gzipped tarball byte stream and visits regular-file entries one
//! at a time, in archive order, without ever buffering the whole archive.
//! The root wrapper directory that GitHub tarball exports prepend to every
//! path is stripped before the visitor sees it.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use std::io::Read;
use std::ops::ControlFlow;
use tar::Archive;

pub struct ArchiveReader<R: Read> {
    archive: Archive<GzDecoder<R>>,
}

impl<R: Read> ArchiveReader<R> {
    pub fn new(gzipped: R) -> Self {
        Self {
            archive: Archive::new(GzDecoder::new(gzipped)),
        }
    }

    /// Visit each regular file exactly once with its root-stripped relative
    /// path and byte stream. Directories, symlinks, and other entry types
    /// are skipped. The visitor returns [`ControlFlow::Break`] to stop the
    /// traversal early; the entry's stream is released on every exit path.
    ///
    /// A failure to advance the entry stream itself (corrupt archive) is a
    /// hard error; failures reading one entry's bytes are the visitor's to
    /// handle and do not end the traversal.
    pub fn for_each_file<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&str, &mut dyn Read) -> ControlFlow<()>,
    {
        let entries = self
            .archive
            .entries()
            .context("Failed to open archive entry stream")?;

        for entry in entries {
            let mut entry = entry.context("Failed to read archive entry header")?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let path = match entry.path() {
                Ok(p) => p.to_string_lossy().into_owned(),
                // Unrepresentable path: skip the entry, keep streaming.
                Err(_) => continue,
            };
            let Some(relative) = strip_archive_root(&path) else {
                continue;
            };
            let relative = relative.to_string();
            if let ControlFlow::Break(()) = visit(&relative, &mut entry) {
                break;
            }
        }
        Ok(())
    }
}

/// Drop the leading `{repo}-{sha}/` wrapper component from a tarball path.
/// Returns `None` for the wrapper itself or anything without a component
/// below it.
fn strip_archive_root(path: &str) -> Option<&str> {
    let (_, rest) = path.split_once('/')?;
    if rest.is_empty() {
        None
    } else {
        Some(rest)
    }
}
