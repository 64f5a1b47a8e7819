//! # Location Store
//!
//! Single SQLite table holding every accepted GPS point, keyed by timestamp.
//!
//! Writes only happen through [`LocationStore::upsert`], which replaces an
//! existing row with the same timestamp. Rows are never deleted except by
//! [`LocationStore::clear`] during a full rebuild.

use std::fs;
use std::path::Path;

use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};
use crate::LocationRecord;

const TIMESTAMP_INDEX: &str = "idx_locations_timestamp";

/// `(timestamp, lat, lon, accuracy)` as served by the coordinates endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub timestamp: String,
    pub lat: f64,
    pub lon: f64,
    pub horizontal_accuracy: f64,
}

/// SQLite-backed location table.
pub struct LocationStore {
    db: Connection,
}

impl LocationStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database file, creating parent directories.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| TrailError::io(dir, e))?;
        }

        let db = Connection::open(db_path)?;
        let mode: String =
            db.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Opened {} (journal_mode={})", db_path.display(), mode);

        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS locations (
                timestamp TEXT PRIMARY KEY,
                lon REAL NOT NULL,
                lat REAL NOT NULL,
                speed REAL,
                altitude REAL,
                horizontal_accuracy REAL NOT NULL,
                motion TEXT,
                geojson_file TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_locations_timestamp ON locations(timestamp);
            "#,
        )?;
        Ok(())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Insert or replace rows by timestamp in a single transaction.
    ///
    /// Returns the number of rows written.
    pub fn upsert(&mut self, records: &[LocationRecord]) -> Result<usize> {
        let tx = self.db.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO locations
                    (timestamp, lon, lat, speed, altitude, horizontal_accuracy, motion, geojson_file)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(timestamp) DO UPDATE SET
                    lon = excluded.lon,
                    lat = excluded.lat,
                    speed = excluded.speed,
                    altitude = excluded.altitude,
                    horizontal_accuracy = excluded.horizontal_accuracy,
                    motion = excluded.motion,
                    geojson_file = excluded.geojson_file",
            )?;
            for r in records {
                stmt.execute(params![
                    r.timestamp,
                    r.lon,
                    r.lat,
                    r.speed,
                    r.altitude,
                    r.horizontal_accuracy,
                    r.motion,
                    r.geojson_file,
                ])?;
            }
        }
        tx.commit()?;
        Ok(records.len())
    }

    /// Drop and recreate the timestamp index.
    pub fn rebuild_index(&self) -> Result<()> {
        self.db.execute_batch(&format!(
            "DROP INDEX IF EXISTS {TIMESTAMP_INDEX};
             CREATE INDEX {TIMESTAMP_INDEX} ON locations(timestamp);"
        ))?;
        info!("Rebuilt index {}", TIMESTAMP_INDEX);
        Ok(())
    }

    /// Compact the database file.
    pub fn vacuum(&self) -> Result<()> {
        self.db.execute_batch("VACUUM;")?;
        Ok(())
    }

    /// Delete every row. Only used for full rebuilds.
    pub fn clear(&mut self) -> Result<usize> {
        let deleted = self.db.execute("DELETE FROM locations", [])?;
        info!("Cleared {} rows for rebuild", deleted);
        Ok(deleted)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM locations", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    /// Rows loaded from one raw file.
    pub fn count_for_file(&self, geojson_file: &str) -> Result<usize> {
        let n: i64 = self.db.query_row(
            "SELECT COUNT(*) FROM locations WHERE geojson_file = ?1",
            [geojson_file],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Moving points inside `[start, end]`, optionally limited by accuracy,
    /// ordered by timestamp. Bounds are canonical timestamps.
    pub fn fetch_coordinates(
        &self,
        start: &str,
        end: &str,
        max_accuracy: Option<f64>,
    ) -> Result<Vec<Coordinate>> {
        let mut stmt = self.db.prepare_cached(
            "SELECT timestamp, lat, lon, horizontal_accuracy
             FROM locations
             WHERE timestamp >= ?1 AND timestamp <= ?2
               AND speed > 0
               AND (?3 IS NULL OR horizontal_accuracy <= ?3)
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![start, end, max_accuracy], |row| {
            Ok(Coordinate {
                timestamp: row.get(0)?,
                lat: row.get(1)?,
                lon: row.get(2)?,
                horizontal_accuracy: row.get(3)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TrailError::from)
    }

    /// Every row inside `[start, end]`, ordered by timestamp.
    pub fn fetch_range(&self, start: &str, end: &str) -> Result<Vec<LocationRecord>> {
        let mut stmt = self.db.prepare_cached(
            "SELECT timestamp, lon, lat, speed, altitude, horizontal_accuracy, motion, geojson_file
             FROM locations
             WHERE timestamp >= ?1 AND timestamp <= ?2
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(params![start, end], |row| {
            Ok(LocationRecord {
                timestamp: row.get(0)?,
                lon: row.get(1)?,
                lat: row.get(2)?,
                speed: row.get(3)?,
                altitude: row.get(4)?,
                horizontal_accuracy: row.get(5)?,
                motion: row.get(6)?,
                geojson_file: row.get(7)?,
            })
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(TrailError::from)
    }

    /// Earliest and latest timestamp, or `None` when the table is empty.
    pub fn time_span(&self) -> Result<Option<(String, String)>> {
        let span = self
            .db
            .query_row(
                "SELECT MIN(timestamp), MAX(timestamp) FROM locations",
                [],
                |row| {
                    let min: Option<String> = row.get(0)?;
                    let max: Option<String> = row.get(1)?;
                    Ok(min.zip(max))
                },
            )
            .optional()?;
        Ok(span.flatten())
    }
}
