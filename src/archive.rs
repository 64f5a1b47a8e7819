//! Raw file archive.
//!
//! Every accepted batch is written once under
//! `<root>/YYYY/MM/DD/HH/YYYYMMDD-HHMM00-<hash>.geojson`. The archive is the
//! source of truth; the database can always be rebuilt from it.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};
use walkdir::WalkDir;

use crate::error::{OptionExt, Result, TrailError};
use crate::overland::{content_hash, parse_payload, Feature, PartitionKey};

const EXTENSION: &str = "geojson";

/// What happened to a posted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// New file written
    Written(PathBuf),
    /// A file with the same partition and hash already existed; nothing written
    Duplicate(PathBuf),
}

impl StoreOutcome {
    pub fn path(&self) -> &Path {
        match self {
            StoreOutcome::Written(p) | StoreOutcome::Duplicate(p) => p,
        }
    }
}

/// Date/hour partitioned tree of raw batches.
#[derive(Debug, Clone)]
pub struct RawArchive {
    root: PathBuf,
}

impl RawArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a batch would be stored at.
    pub fn path_for(&self, features: &[Feature]) -> Result<PathBuf> {
        let first_ts = features
            .first()
            .ok_or(TrailError::EmptyBatch)?
            .timestamp()
            .ok_or_malformed("first location has no timestamp")?;
        let key = PartitionKey::from_timestamp(first_ts)?;
        Ok(self
            .root
            .join(key.relative_dir())
            .join(key.file_name(&content_hash(features))))
    }

    /// Parse a posted body and write it to the tree unless already present.
    pub fn store_batch(&self, body: &[u8]) -> Result<StoreOutcome> {
        let payload = parse_payload(body)?;
        let path = self.path_for(&payload.locations)?;

        if path.exists() {
            warn!("File already exists, skipping: {}", path.display());
            return Ok(StoreOutcome::Duplicate(path));
        }

        let dir = path.parent().ok_or_internal("partition path has no parent")?;
        fs::create_dir_all(dir).map_err(|e| TrailError::io(dir, e))?;

        let pretty = serde_json::to_vec_pretty(&payload).map_err(|e| TrailError::Internal {
            message: format!("failed to serialize batch: {e}"),
        })?;
        fs::write(&path, pretty).map_err(|e| TrailError::io(&path, e))?;

        info!(
            "Wrote {} ({} locations)",
            path.display(),
            payload.locations.len()
        );
        Ok(StoreOutcome::Written(path))
    }

    /// All `.geojson` files under the root, sorted by path (and therefore by time).
    pub fn list_files(&self) -> Vec<PathBuf> {
        if !self.root.exists() {
            warn!("Raw data directory {} does not exist", self.root.display());
            return Vec::new();
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().is_some_and(|ext| ext == EXTENSION))
            .collect();

        files.sort();
        files
    }
}

/// Read the features of one archived file.
pub fn read_features(path: &Path) -> Result<Vec<Feature>> {
    let bytes = fs::read(path).map_err(|e| TrailError::io(path, e))?;
    parse_payload(&bytes).map(|payload| payload.locations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const BATCH: &str = r#"{"locations": [
        {"type": "Feature", "geometry": {"type": "Point", "coordinates": [13.4050, 52.5200]},
         "properties": {"timestamp": "2024-06-01T08:15:30Z", "horizontal_accuracy": 10}},
        {"type": "Feature", "geometry": {"type": "Point", "coordinates": [13.4060, 52.5210]},
         "properties": {"timestamp": "2024-06-01T08:16:30Z", "horizontal_accuracy": 12}}
    ]}"#;

    #[test]
    fn test_store_batch_writes_partitioned_file() {
        let tmp = TempDir::new().unwrap();
        let archive = RawArchive::new(tmp.path());

        let outcome = archive.store_batch(BATCH.as_bytes()).unwrap();
        let path = match &outcome {
            StoreOutcome::Written(p) => p.clone(),
            other => panic!("expected a new file, got {other:?}"),
        };

        let rel = path.strip_prefix(tmp.path()).unwrap();
        assert!(rel.starts_with("2024/06/01/08"));
        let name = rel.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("20240601-081500-"));
        assert!(name.ends_with(".geojson"));

        let features = read_features(&path).unwrap();
        assert_eq!(features.len(), 2);
    }

    #[test]
    fn test_store_batch_twice_is_duplicate() {
        let tmp = TempDir::new().unwrap();
        let archive = RawArchive::new(tmp.path());

        let first = archive.store_batch(BATCH.as_bytes()).unwrap();
        let second = archive.store_batch(BATCH.as_bytes()).unwrap();

        assert!(matches!(first, StoreOutcome::Written(_)));
        assert!(matches!(second, StoreOutcome::Duplicate(_)));
        assert_eq!(first.path(), second.path());
        assert_eq!(archive.list_files().len(), 1);
    }

    #[test]
    fn test_store_batch_rejects_empty_and_malformed() {
        let tmp = TempDir::new().unwrap();
        let archive = RawArchive::new(tmp.path());

        assert!(matches!(
            archive.store_batch(br#"{"locations": []}"#),
            Err(TrailError::EmptyBatch)
        ));
        assert!(matches!(
            archive.store_batch(b"{\"locations\": [1, 2"),
            Err(TrailError::MalformedPayload { .. })
        ));
        assert!(archive.list_files().is_empty());
    }

    #[test]
    fn test_list_files_only_geojson_sorted() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("2024/01/02/03");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("b.geojson"), "{}").unwrap();
        fs::write(dir.join("a.geojson"), "{}").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();

        let files = RawArchive::new(tmp.path()).list_files();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("a.geojson"));
        assert!(files[1].ends_with("b.geojson"));
    }

    #[test]
    fn test_list_files_missing_root() {
        let archive = RawArchive::new("/nonexistent/geotrail/raw");
        assert!(archive.list_files().is_empty());
    }
}
