//! # Geotrail
//!
//! Personal GPS ingestion, storage and travel reporting for the Overland app.
//!
//! This library provides:
//! - A partitioned raw file archive for Overland GeoJSON batches
//! - A refresh pipeline that loads the archive into SQLite
//! - Read-only queries and trip/flight/country reporting
//! - A heartbeat watchdog with escalating alerts
//!
//! ## Features
//!
//! - **`parallel`** - Parse raw files in parallel with rayon
//! - **`alerts`** - Telegram delivery for heartbeat alerts
//! - **`server`** - HTTP ingestion and reporting endpoints (axum)
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use geotrail::overland::{extract_records, parse_payload};
//!
//! let body = br#"{"locations": [{
//!     "type": "Feature",
//!     "geometry": {"type": "Point", "coordinates": [13.405, 52.52]},
//!     "properties": {"timestamp": "2024-05-01T10:00:00Z", "horizontal_accuracy": 12.0}
//! }]}"#;
//!
//! let payload = parse_payload(body).unwrap();
//! let extraction = extract_records(&payload.locations, "inline.geojson", 200.0);
//! assert_eq!(extraction.records.len(), 1);
//! assert_eq!(extraction.records[0].timestamp, "2024-05-01T10:00:00Z");
//! ```

use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{OptionExt, Result, TrailError};

// Geographic utilities (distance, track length)
pub mod geo_utils;

// Overland payload model, accuracy filter, content hash
pub mod overland;
pub use overland::{content_hash, Feature, OverlandPayload, PartitionKey};

// Date/hour partitioned raw file tree
pub mod archive;
pub use archive::{RawArchive, StoreOutcome};

// Per-point derivations and trip splitting
pub mod processing;
pub use processing::{split_into_trips, Trip, TripConfig};

// SQLite location table
pub mod store;
pub use store::{Coordinate, LocationStore};

// Raw tree -> database refresh pipeline
pub mod refresh;
pub use refresh::{refresh, RefreshOptions, RefreshReport};

// Flight and country statistics
pub mod reports;

// Heartbeat watchdog state machine
pub mod watchdog;
pub use watchdog::{format_downtime, AlertSchedule, HeartbeatClock, Watchdog, WatchdogEvent};

// Configuration file and CLI lookups
pub mod config;
pub use config::AppConfig;

// Alert delivery (Telegram)
#[cfg(feature = "alerts")]
pub mod alerts;

// HTTP endpoints
#[cfg(feature = "server")]
pub mod server;

// ============================================================================
// Core Types
// ============================================================================

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use geotrail::GpsPoint;
/// let point = GpsPoint::new(52.5200, 13.4050); // Berlin
/// assert!(point.is_valid());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box for a set of points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut min_lat = f64::MAX;
        let mut max_lat = f64::MIN;
        let mut min_lng = f64::MAX;
        let mut max_lng = f64::MIN;

        for p in points {
            min_lat = min_lat.min(p.latitude);
            max_lat = max_lat.max(p.latitude);
            min_lng = min_lng.min(p.longitude);
            max_lng = max_lng.max(p.longitude);
        }

        Some(Self {
            min_lat,
            max_lat,
            min_lng,
            max_lng,
        })
    }
}

/// One row of the `locations` table.
///
/// Keyed by `timestamp`, which is always UTC with second precision
/// (`YYYY-MM-DDTHH:MM:SSZ`) so that string order equals time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub timestamp: String,
    pub lon: f64,
    pub lat: f64,
    /// Meters per second, reported by the device or derived from the previous point
    pub speed: Option<f64>,
    pub altitude: Option<f64>,
    /// Reported GPS error radius in meters
    pub horizontal_accuracy: f64,
    /// First motion label reported by the device ("walking", "driving", ...)
    pub motion: Option<String>,
    /// Raw file the point was loaded from
    pub geojson_file: String,
}

impl LocationRecord {
    pub fn point(&self) -> GpsPoint {
        GpsPoint::new(self.lat, self.lon)
    }
}

// ============================================================================
// Tests
// ============================================================================
