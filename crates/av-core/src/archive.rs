//! Archive extraction for downloaded model files.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::Error;
use crate::task::Task;
use crate::Result;

/// Unpacks an archive into a destination directory.
pub trait ArchiveExtractor: Send + Sync {
    /// Blocking extraction; returns the destination directory.
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf>;
}

/// Zip archives via the `zip` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<PathBuf> {
        let bytes = fs::read(archive)?;
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| Error::archive(format!("{}: {}", archive.display(), e)))?;
        fs::create_dir_all(destination)?;
        zip.extract(destination)
            .map_err(|e| Error::archive(format!("{}: {}", archive.display(), e)))?;
        debug!(
            archive = %archive.display(),
            destination = %destination.display(),
            entries = zip.len(),
            "Extracted archive"
        );
        Ok(destination.to_path_buf())
    }
}

/// Extracts `archive` into `destination` on the worker pool.
pub fn unzip(
    extractor: Arc<dyn ArchiveExtractor>,
    archive: PathBuf,
    destination: PathBuf,
) -> Task<PathBuf> {
    Task::spawn_blocking("Unzipping", move || extractor.extract(&archive, &destination))
}
