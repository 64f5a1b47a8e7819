//! Overland GeoJSON payload model.
//!
//! The Overland app posts batches shaped like
//! `{"locations": [{"type": "Feature", "geometry": {...}, "properties": {...}}]}`.
//! Only the fields the pipeline needs are typed; everything else is carried
//! through `extra` so a batch written back to disk keeps what the phone sent.

use chrono::{DateTime, Datelike, SecondsFormat, Timelike, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use md5::{Digest, Md5};
use std::path::PathBuf;

use crate::error::{Result, TrailError};
use crate::{GpsPoint, LocationRecord};

/// Hash used for batches without any location.
pub const EMPTY_BATCH_HASH: &str = "0000000";

/// Number of hex characters kept from the digest.
const HASH_LEN: usize = 7;

/// A batch as posted by the phone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlandPayload {
    pub locations: Vec<Feature>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single GeoJSON point feature.
///
/// `geometry` and `properties` stay raw JSON: a point with a null or
/// mistyped field must not sink the rest of its batch, and the archived
/// file keeps exactly what the phone sent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub geometry: Value,
    #[serde(default, skip_serializing_if = "Properties::is_null")]
    pub properties: Properties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Point properties with typed, lenient accessors.
///
/// A missing, null or wrongly typed field reads as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Value);

impl Properties {
    fn is_null(&self) -> bool {
        self.0.is_null()
    }

    fn number(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.0.get("timestamp").and_then(Value::as_str)
    }

    pub fn speed(&self) -> Option<f64> {
        self.number("speed")
    }

    pub fn altitude(&self) -> Option<f64> {
        self.number("altitude")
    }

    pub fn horizontal_accuracy(&self) -> Option<f64> {
        self.number("horizontal_accuracy")
    }

    /// First motion label, if `motion` is a non-empty array of strings.
    pub fn motion(&self) -> Option<&str> {
        self.0
            .get("motion")
            .and_then(Value::as_array)
            .and_then(|labels| labels.first())
            .and_then(Value::as_str)
    }
}

impl Feature {
    /// `(lon, lat)` if the geometry carries at least two numeric coordinates.
    pub fn lon_lat(&self) -> Option<(f64, f64)> {
        match self.geometry.get("coordinates")?.as_array()?.as_slice() {
            [lon, lat, ..] => Some((lon.as_f64()?, lat.as_f64()?)),
            _ => None,
        }
    }

    pub fn timestamp(&self) -> Option<&str> {
        self.properties.timestamp()
    }
}

/// Parse a raw request body or file into a payload.
pub fn parse_payload(bytes: &[u8]) -> Result<OverlandPayload> {
    serde_json::from_slice(bytes).map_err(|e| TrailError::malformed(e.to_string()))
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| TrailError::InvalidTimestamp {
            value: value.to_string(),
        })
}

/// Canonical primary-key form of a timestamp: UTC, second precision, `Z` suffix.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn normalize_timestamp(value: &str) -> Result<String> {
    parse_timestamp(value).map(|dt| format_timestamp(&dt))
}

/// Deterministic identifier for a batch.
///
/// Only the first and last timestamp and the number of points are hashed, so
/// a batch re-sent by the phone maps to the same file name without hashing
/// the whole body. MD5 keeps names stable across existing raw trees.
pub fn content_hash(features: &[Feature]) -> String {
    let (first, last) = match (features.first(), features.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return EMPTY_BATCH_HASH.to_string(),
    };
    let input = format!(
        "{}|{}|{}",
        first.timestamp().unwrap_or_default(),
        last.timestamp().unwrap_or_default(),
        features.len()
    );
    let digest = Md5::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..HASH_LEN].to_string()
}

/// Date/hour bucket of a batch, taken from its first point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionKey {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl PartitionKey {
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            year: dt.year(),
            month: dt.month(),
            day: dt.day(),
            hour: dt.hour(),
            minute: dt.minute(),
        }
    }

    pub fn from_timestamp(value: &str) -> Result<Self> {
        parse_timestamp(value).map(|dt| Self::from_datetime(&dt))
    }

    /// `YYYY/MM/DD/HH`
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(format!("{:04}", self.year))
            .join(format!("{:02}", self.month))
            .join(format!("{:02}", self.day))
            .join(format!("{:02}", self.hour))
    }

    /// `YYYYMMDD-HHMM00-{hash}.geojson`
    pub fn file_name(&self, hash: &str) -> String {
        format!(
            "{:04}{:02}{:02}-{:02}{:02}00-{}.geojson",
            self.year, self.month, self.day, self.hour, self.minute, hash
        )
    }
}

fn accuracy_ok(feature: &Feature, max_horizontal_accuracy: f64) -> bool {
    matches!(
        feature.properties.horizontal_accuracy(),
        Some(acc) if acc.is_finite() && acc <= max_horizontal_accuracy
    )
}

/// Keep features whose horizontal accuracy is present and within the threshold.
pub fn filter_by_accuracy(features: &[Feature], max_horizontal_accuracy: f64) -> Vec<&Feature> {
    features
        .iter()
        .filter(|f| accuracy_ok(f, max_horizontal_accuracy))
        .collect()
}

/// Rows extracted from one batch plus what was dropped on the way.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub records: Vec<LocationRecord>,
    /// Points rejected by the accuracy filter (including missing accuracy)
    pub filtered: usize,
    /// Points missing valid coordinates or a parseable timestamp
    pub malformed: usize,
}

/// Turn features into table rows.
///
/// Speed is copied as reported; filling gaps from neighbouring points is
/// done later by [`crate::processing::derive_speeds`].
pub fn extract_records(
    features: &[Feature],
    source: &str,
    max_horizontal_accuracy: f64,
) -> Extraction {
    let mut out = Extraction::default();

    for feature in features {
        if !accuracy_ok(feature, max_horizontal_accuracy) {
            out.filtered += 1;
            continue;
        }
        let Some((lon, lat)) = feature.lon_lat() else {
            debug!("Skipping point without coordinates in {}", source);
            out.malformed += 1;
            continue;
        };
        if !GpsPoint::new(lat, lon).is_valid() {
            debug!("Skipping out-of-range point ({}, {}) in {}", lat, lon, source);
            out.malformed += 1;
            continue;
        }
        let timestamp = match feature.timestamp().map(normalize_timestamp) {
            Some(Ok(ts)) => ts,
            Some(Err(e)) => {
                debug!("Skipping point in {}: {}", source, e);
                out.malformed += 1;
                continue;
            }
            None => {
                debug!("Skipping point without timestamp in {}", source);
                out.malformed += 1;
                continue;
            }
        };
        let props = &feature.properties;
        out.records.push(LocationRecord {
            timestamp,
            lon,
            lat,
            speed: props.speed(),
            altitude: props.altitude(),
            horizontal_accuracy: props.horizontal_accuracy().unwrap_or_default(),
            motion: props.motion().map(str::to_string),
            geojson_file: source.to_string(),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feature(value: Value) -> Feature {
        serde_json::from_value(value).unwrap()
    }

    fn point(ts: &str, accuracy: Option<f64>) -> Feature {
        let mut props = json!({ "timestamp": ts });
        if let Some(acc) = accuracy {
            props["horizontal_accuracy"] = json!(acc);
        }
        feature(json!({
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [-122.4194, 37.7749] },
            "properties": props,
        }))
    }

    #[test]
    fn test_filter_by_accuracy_removes_inaccurate_points() {
        let features = vec![
            point("2024-01-01T12:00:00Z", Some(50.0)),
            point("2024-01-01T12:00:01Z", Some(150.0)),
            point("2024-01-01T12:00:02Z", Some(250.0)),
        ];
        let kept = filter_by_accuracy(&features, 200.0);
        assert_eq!(kept.len(), 2);
        assert!(kept
            .iter()
            .all(|f| f.properties.horizontal_accuracy().unwrap() <= 200.0));
    }

    #[test]
    fn test_filter_by_accuracy_handles_missing_accuracy() {
        let features = vec![
            point("2024-01-01T12:00:00Z", Some(50.0)),
            point("2024-01-01T12:00:01Z", None),
            feature(json!({ "properties": { "other_field": "value" } })),
        ];
        assert_eq!(filter_by_accuracy(&features, 200.0).len(), 1);
    }

    #[test]
    fn test_extract_parses_valid_feature() {
        let features = vec![feature(json!({
            "geometry": { "coordinates": [-122.4194, 37.7749] },
            "properties": {
                "timestamp": "2024-01-01T12:00:00Z",
                "horizontal_accuracy": 10.0,
                "speed": 1.5,
                "altitude": 50.0,
                "motion": ["walking", "running"],
            },
        }))];

        let out = extract_records(&features, "test.geojson", 200.0);
        assert_eq!(out.records.len(), 1);
        let rec = &out.records[0];
        assert_eq!(rec.lon, -122.4194);
        assert_eq!(rec.lat, 37.7749);
        assert_eq!(rec.timestamp, "2024-01-01T12:00:00Z");
        assert_eq!(rec.speed, Some(1.5));
        assert_eq!(rec.altitude, Some(50.0));
        assert_eq!(rec.motion.as_deref(), Some("walking"));
        assert_eq!(rec.geojson_file, "test.geojson");
    }

    #[test]
    fn test_extract_empty_motion_is_none() {
        let features = vec![feature(json!({
            "geometry": { "coordinates": [-122.4194, 37.7749] },
            "properties": {
                "timestamp": "2024-01-01T12:00:00Z",
                "horizontal_accuracy": 10.0,
                "motion": [],
            },
        }))];
        let out = extract_records(&features, "test.geojson", 200.0);
        assert_eq!(out.records[0].motion, None);
    }

    #[test]
    fn test_extract_skips_entries_missing_required_fields() {
        let features = vec![
            point("2024-01-01T12:00:00Z", Some(10.0)),
            feature(json!({
                "geometry": { "coordinates": [-122.5, 37.8] },
                "properties": { "horizontal_accuracy": 15.0 },
            })),
            feature(json!({ "properties": { "timestamp": "2024-01-01T13:00:00Z", "horizontal_accuracy": 15.0 } })),
            point("2024-01-01T14:00:00Z", Some(20.0)),
        ];
        let out = extract_records(&features, "test.geojson", 200.0);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.malformed, 2);
        assert_eq!(out.filtered, 0);
    }

    #[test]
    fn test_extract_normalizes_offsets_to_utc() {
        let features = vec![point("2024-01-01T14:30:05.250+02:00", Some(5.0))];
        let out = extract_records(&features, "a.geojson", 200.0);
        assert_eq!(out.records[0].timestamp, "2024-01-01T12:30:05Z");
    }

    #[test]
    fn test_extract_rejects_unparseable_timestamp() {
        let features = vec![point("yesterday", Some(5.0))];
        let out = extract_records(&features, "a.geojson", 200.0);
        assert!(out.records.is_empty());
        assert_eq!(out.malformed, 1);
    }

    #[test]
    fn test_null_and_mistyped_properties_only_affect_their_point() {
        let body = br#"{"locations": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [13.405, 52.52]},
             "properties": {"timestamp": "2024-06-01T08:00:00Z", "horizontal_accuracy": 5, "motion": null, "speed": "fast"}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [13.406, 52.52]},
             "properties": {"timestamp": "2024-06-01T08:00:05Z", "horizontal_accuracy": 5, "motion": ["driving"], "speed": 3.5}},
            {"type": "Feature", "geometry": null,
             "properties": {"timestamp": "2024-06-01T08:00:10Z", "horizontal_accuracy": 5}},
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [13.407, 52.52]},
             "properties": {"timestamp": 1717228815, "horizontal_accuracy": 5}}
        ]}"#;

        let payload = parse_payload(body).unwrap();
        assert_eq!(payload.locations.len(), 4);

        let out = extract_records(&payload.locations, "a.geojson", 200.0);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.malformed, 2);
        assert_eq!(out.records[0].motion, None);
        assert_eq!(out.records[0].speed, None);
        assert_eq!(out.records[1].motion.as_deref(), Some("driving"));
        assert_eq!(out.records[1].speed, Some(3.5));

        // Written back unchanged
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["locations"][0]["properties"]["motion"], Value::Null);
        assert_eq!(json["locations"][0]["properties"]["speed"], json!("fast"));
    }

    #[test]
    fn test_extract_rejects_out_of_range_coordinates() {
        let features = vec![
            feature(json!({
                "geometry": { "coordinates": [13.4, 95.0] },
                "properties": { "timestamp": "2024-01-01T12:00:00Z", "horizontal_accuracy": 5.0 },
            })),
            feature(json!({
                "geometry": { "coordinates": [200.0, 52.5] },
                "properties": { "timestamp": "2024-01-01T12:00:01Z", "horizontal_accuracy": 5.0 },
            })),
            point("2024-01-01T12:00:02Z", Some(5.0)),
        ];
        let out = extract_records(&features, "a.geojson", 200.0);
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.malformed, 2);
    }

    #[test]
    fn test_content_hash_matches_existing_file_names() {
        let features = vec![
            point("2024-01-01T12:00:00Z", Some(5.0)),
            point("2024-01-01T12:05:00Z", Some(5.0)),
            point("2024-01-01T12:10:00Z", Some(5.0)),
        ];
        // md5("2024-01-01T12:00:00Z|2024-01-01T12:10:00Z|3")
        assert_eq!(content_hash(&features), "4e7bd95");
    }

    #[test]
    fn test_content_hash_depends_on_endpoints_and_count() {
        let a = vec![
            point("2024-01-01T12:00:00Z", Some(5.0)),
            point("2024-01-01T12:05:00Z", Some(50.0)),
            point("2024-01-01T12:10:00Z", Some(5.0)),
        ];
        // Same first/last timestamp and count, different middle point
        let b = vec![
            point("2024-01-01T12:00:00Z", Some(5.0)),
            point("2024-01-01T12:07:00Z", None),
            point("2024-01-01T12:10:00Z", Some(5.0)),
        ];
        let c = vec![
            point("2024-01-01T12:00:00Z", Some(5.0)),
            point("2024-01-01T12:10:00Z", Some(5.0)),
        ];

        assert_eq!(content_hash(&a), content_hash(&b));
        assert_ne!(content_hash(&a), content_hash(&c));
        assert_eq!(content_hash(&a).len(), 7);
        assert_eq!(content_hash(&[]), EMPTY_BATCH_HASH);
    }

    #[test]
    fn test_partition_key_layout() {
        let key = PartitionKey::from_timestamp("2024-03-07T09:41:12Z").unwrap();
        assert_eq!(key.relative_dir(), PathBuf::from("2024/03/07/09"));
        assert_eq!(key.file_name("abc1234"), "20240307-094100-abc1234.geojson");
    }

    #[test]
    fn test_parse_payload_requires_locations() {
        assert!(parse_payload(br#"{"locations": []}"#).is_ok());
        assert!(matches!(
            parse_payload(br#"{"points": []}"#),
            Err(TrailError::MalformedPayload { .. })
        ));
        assert!(parse_payload(b"not json").is_err());
    }

    #[test]
    fn test_unknown_fields_survive_round_trip() {
        let body = br#"{"locations":[{"type":"Feature","geometry":{"type":"Point","coordinates":[1.0,2.0]},"properties":{"timestamp":"2024-01-01T00:00:00Z","battery_level":0.8}}],"current":{"x":1}}"#;
        let payload = parse_payload(body).unwrap();
        let out = serde_json::to_value(&payload).unwrap();
        assert_eq!(out["current"]["x"], json!(1));
        assert_eq!(out["locations"][0]["type"], json!("Feature"));
        assert_eq!(out["locations"][0]["properties"]["battery_level"], json!(0.8));
        assert_eq!(out["locations"][0]["geometry"]["type"], json!("Point"));
    }
}
