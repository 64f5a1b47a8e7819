//! Raw tree -> database refresh.
//!
//! Files are parsed independently (in parallel with the `parallel` feature),
//! then all rows are written through one connection in a single upsert.
//! Afterwards the timestamp index is rebuilt and the database vacuumed.

use std::path::{Path, PathBuf};
use std::time::Instant;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::archive::{read_features, RawArchive};
use crate::error::Result;
use crate::overland::extract_records;
use crate::processing::derive_speeds;
use crate::store::LocationStore;
use crate::LocationRecord;

/// Default accuracy threshold in meters.
pub const DEFAULT_MAX_HORIZONTAL_ACCURACY: f64 = 200.0;

/// Options for a refresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshOptions {
    /// Points with a larger (or missing) accuracy are dropped.
    /// Default: 200.0 meters
    pub max_horizontal_accuracy: f64,

    /// Delete all rows before loading.
    /// Default: false
    pub rebuild: bool,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            max_horizontal_accuracy: DEFAULT_MAX_HORIZONTAL_ACCURACY,
            rebuild: false,
        }
    }
}

/// Rows parsed from a single raw file.
#[derive(Debug, Clone)]
pub struct FileBatch {
    pub path: PathBuf,
    pub records: Vec<LocationRecord>,
    pub filtered: usize,
    pub malformed: usize,
}

/// Summary of a refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub files_seen: usize,
    pub files_loaded: usize,
    /// Unreadable or malformed files
    pub files_skipped: usize,
    pub rows_upserted: usize,
    pub points_filtered: usize,
    pub points_malformed: usize,
}

/// Read one raw file and turn it into rows with derived speeds.
pub fn load_file(path: &Path, max_horizontal_accuracy: f64) -> Result<FileBatch> {
    let features = read_features(path)?;
    let extraction = extract_records(
        &features,
        &path.to_string_lossy(),
        max_horizontal_accuracy,
    );

    let mut records = extraction.records;
    derive_speeds(&mut records);

    Ok(FileBatch {
        path: path.to_path_buf(),
        records,
        filtered: extraction.filtered,
        malformed: extraction.malformed,
    })
}

/// Load every file under `archive` into `store`.
pub fn refresh(
    archive: &RawArchive,
    store: &mut LocationStore,
    options: &RefreshOptions,
) -> Result<RefreshReport> {
    let started = Instant::now();

    if options.rebuild {
        store.clear()?;
    }

    let files = archive.list_files();
    info!(
        "Refreshing from {} ({} files)",
        archive.root().display(),
        files.len()
    );

    let results = load_all(&files, options.max_horizontal_accuracy);

    let mut report = RefreshReport {
        files_seen: files.len(),
        ..Default::default()
    };
    let mut rows = Vec::new();
    for (path, result) in files.iter().zip(results) {
        match result {
            Ok(batch) => {
                report.files_loaded += 1;
                report.points_filtered += batch.filtered;
                report.points_malformed += batch.malformed;
                rows.extend(batch.records);
            }
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.files_skipped += 1;
            }
        }
    }

    report.rows_upserted = store.upsert(&rows)?;
    store.rebuild_index()?;
    store.vacuum()?;

    info!(
        "Refresh done in {:.2?}: {} files loaded, {} skipped, {} rows, {} filtered",
        started.elapsed(),
        report.files_loaded,
        report.files_skipped,
        report.rows_upserted,
        report.points_filtered
    );
    Ok(report)
}

#[cfg(feature = "parallel")]
fn load_all(files: &[PathBuf], max_horizontal_accuracy: f64) -> Vec<Result<FileBatch>> {
    use rayon::prelude::*;

    files
        .par_iter()
        .map(|path| load_file(path, max_horizontal_accuracy))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn load_all(files: &[PathBuf], max_horizontal_accuracy: f64) -> Vec<Result<FileBatch>> {
    files
        .iter()
        .map(|path| load_file(path, max_horizontal_accuracy))
        .collect()
}

/// Load a single freshly written file, without index maintenance.
pub fn ingest_file(
    store: &mut LocationStore,
    path: &Path,
    max_horizontal_accuracy: f64,
) -> Result<usize> {
    let batch = load_file(path, max_horizontal_accuracy)?;
    let n = store.upsert(&batch.records)?;
    info!(
        "Loaded {} rows from {} ({} filtered)",
        n,
        path.display(),
        batch.filtered
    );
    Ok(n)
}
