//! Per-point derivations over ordered tracks.
//!
//! - Distance, elapsed time and speed between consecutive points
//! - Filling missing device speeds during the refresh
//! - Dropping GPS jumps from coordinate queries
//! - Splitting a track into trips for map rendering

use chrono::{DateTime, Utc};
use geo::{algorithm::simplify::Simplify, Coord, LineString};
use serde::{Deserialize, Serialize};

use crate::geo_utils::{haversine_distance, track_distance};
use crate::overland::parse_timestamp;
use crate::store::Coordinate;
use crate::{GpsPoint, LocationRecord};

/// Movement from the previous point to this one.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SegmentMetrics {
    pub meters: f64,
    pub seconds: f64,
    /// meters / seconds, 0 when no time elapsed
    pub speed: f64,
}

impl SegmentMetrics {
    fn between(a: (&DateTime<Utc>, &GpsPoint), b: (&DateTime<Utc>, &GpsPoint)) -> Self {
        let meters = haversine_distance(a.1, b.1);
        let seconds = (*b.0 - *a.0).num_milliseconds() as f64 / 1000.0;
        let speed = if seconds > 0.0 { meters / seconds } else { 0.0 };
        Self {
            meters,
            seconds,
            speed,
        }
    }
}

/// Metrics for each point relative to its predecessor; the first point gets zeros.
pub fn annotate_segments(track: &[(DateTime<Utc>, GpsPoint)]) -> Vec<SegmentMetrics> {
    let mut out = Vec::with_capacity(track.len());
    if track.is_empty() {
        return out;
    }
    out.push(SegmentMetrics::default());
    for w in track.windows(2) {
        out.push(SegmentMetrics::between(
            (&w[0].0, &w[0].1),
            (&w[1].0, &w[1].1),
        ));
    }
    out
}

/// Sort records by time and fill unusable speeds.
///
/// Overland reports `-1` when the device has no speed fix. Such points (and
/// points without a speed at all) get distance/time from the previous point
/// of the same batch, provided time moved forward.
pub fn derive_speeds(records: &mut [LocationRecord]) {
    records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));

    let mut prev: Option<(DateTime<Utc>, GpsPoint)> = None;
    for rec in records.iter_mut() {
        let Ok(time) = parse_timestamp(&rec.timestamp) else {
            prev = None;
            continue;
        };
        let point = rec.point();

        let reported_ok = matches!(rec.speed, Some(s) if s.is_finite() && s >= 0.0);
        if !reported_ok {
            rec.speed = prev.as_ref().and_then(|(prev_time, prev_point)| {
                let m = SegmentMetrics::between((prev_time, prev_point), (&time, &point));
                (m.seconds > 0.0).then_some(m.speed)
            });
        }
        prev = Some((time, point));
    }
}

/// Drop points that are more than `max_km` away from their predecessor.
///
/// Distances are measured along the unfiltered sequence, so a single GPS
/// jump removes only the jumped-to point. The first point is always kept.
pub fn filter_by_max_distance(coords: Vec<Coordinate>, max_km: f64) -> Vec<Coordinate> {
    let mut prev: Option<GpsPoint> = None;
    coords
        .into_iter()
        .filter(|c| {
            let point = GpsPoint::new(c.lat, c.lon);
            let keep = match prev {
                Some(p) => haversine_distance(&p, &point) / 1000.0 <= max_km,
                None => true,
            };
            prev = Some(point);
            keep
        })
        .collect()
}

/// Configuration for trip splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripConfig {
    /// Gap between consecutive points that ends a trip.
    /// Default: 60.0 meters
    pub max_gap_meters: f64,

    /// Trips with this many points or fewer are dropped.
    /// Default: 5
    pub min_points: usize,

    /// Douglas-Peucker tolerance in degrees for the rendered polyline.
    /// Default: 0.00005 (~5 meters)
    pub simplification_tolerance: f64,
}

impl Default for TripConfig {
    fn default() -> Self {
        Self {
            max_gap_meters: 60.0,
            min_points: 5,
            simplification_tolerance: 0.00005,
        }
    }
}

/// A continuous stretch of movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub start: String,
    pub end: String,
    /// Simplified polyline
    pub points: Vec<GpsPoint>,
    /// Number of raw points in the trip
    pub point_count: usize,
    /// Length of the raw track in meters
    pub distance_meters: f64,
}

/// Split a time-ordered track wherever two consecutive points are further
/// apart than `config.max_gap_meters`.
pub fn split_into_trips(records: &[LocationRecord], config: &TripConfig) -> Vec<Trip> {
    let mut trips = Vec::new();
    let mut run_start = 0;

    for i in 1..=records.len() {
        let boundary = i == records.len()
            || haversine_distance(&records[i - 1].point(), &records[i].point())
                > config.max_gap_meters;
        if !boundary {
            continue;
        }
        let run = &records[run_start..i];
        if run.len() > config.min_points {
            trips.push(build_trip(run, config));
        }
        run_start = i;
    }

    trips
}

fn build_trip(run: &[LocationRecord], config: &TripConfig) -> Trip {
    let raw: Vec<GpsPoint> = run.iter().map(LocationRecord::point).collect();

    let line = LineString::new(
        raw.iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect(),
    );
    let simplified = line.simplify(&config.simplification_tolerance);

    Trip {
        start: run[0].timestamp.clone(),
        end: run[run.len() - 1].timestamp.clone(),
        points: simplified
            .0
            .iter()
            .map(|c| GpsPoint::new(c.y, c.x))
            .collect(),
        point_count: run.len(),
        distance_meters: track_distance(&raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ts: &str, lat: f64, lon: f64, speed: Option<f64>) -> LocationRecord {
        LocationRecord {
            timestamp: ts.to_string(),
            lon,
            lat,
            speed,
            altitude: None,
            horizontal_accuracy: 5.0,
            motion: None,
            geojson_file: "t.geojson".to_string(),
        }
    }

    fn coord(ts: &str, lat: f64, lon: f64) -> Coordinate {
        Coordinate {
            timestamp: ts.to_string(),
            lat,
            lon,
            horizontal_accuracy: 5.0,
        }
    }

    #[test]
    fn test_annotate_segments() {
        let t0 = parse_timestamp("2024-01-01T00:00:00Z").unwrap();
        let t1 = parse_timestamp("2024-01-01T00:00:10Z").unwrap();
        let track = vec![
            (t0, GpsPoint::new(0.0, 0.0)),
            (t1, GpsPoint::new(0.001, 0.0)),
        ];
        let metrics = annotate_segments(&track);
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0], SegmentMetrics::default());
        assert!((metrics[1].meters - 111.3).abs() < 0.5);
        assert_eq!(metrics[1].seconds, 10.0);
        assert!((metrics[1].speed - 11.13).abs() < 0.05);
        assert!(annotate_segments(&[]).is_empty());
    }

    #[test]
    fn test_derive_speeds_fills_missing_and_negative() {
        let mut records = vec![
            record("2024-01-01T00:00:10Z", 0.001, 0.0, Some(-1.0)),
            record("2024-01-01T00:00:00Z", 0.0, 0.0, None),
            record("2024-01-01T00:00:20Z", 0.002, 0.0, Some(3.0)),
        ];
        derive_speeds(&mut records);

        assert_eq!(records[0].timestamp, "2024-01-01T00:00:00Z");
        // No predecessor
        assert_eq!(records[0].speed, None);
        assert!((records[1].speed.unwrap() - 11.13).abs() < 0.05);
        // Reported speed wins
        assert_eq!(records[2].speed, Some(3.0));
    }

    #[test]
    fn test_filter_by_max_distance_drops_jumps_keeps_first() {
        let coords = vec![
            coord("2024-01-01T00:00:00Z", 52.5200, 13.4050),
            coord("2024-01-01T00:00:10Z", 52.5201, 13.4051),
            coord("2024-01-01T00:00:20Z", 48.8566, 2.3522),
            coord("2024-01-01T00:00:30Z", 48.8567, 2.3523),
        ];
        let kept = filter_by_max_distance(coords, 0.1);
        let stamps: Vec<&str> = kept.iter().map(|c| c.timestamp.as_str()).collect();
        assert_eq!(
            stamps,
            vec![
                "2024-01-01T00:00:00Z",
                "2024-01-01T00:00:10Z",
                "2024-01-01T00:00:30Z"
            ]
        );
    }

    #[test]
    fn test_split_into_trips() {
        // Two walks of 8 points ~11m apart, separated by a 10km jump,
        // followed by a short 3 point fragment.
        let mut records = Vec::new();
        for i in 0..8 {
            records.push(record(
                &format!("2024-01-01T00:00:{:02}Z", i),
                52.0 + i as f64 * 0.0001,
                13.0,
                None,
            ));
        }
        for i in 0..8 {
            records.push(record(
                &format!("2024-01-01T00:01:{:02}Z", i),
                52.1 + i as f64 * 0.0001,
                13.0,
                None,
            ));
        }
        for i in 0..3 {
            records.push(record(
                &format!("2024-01-01T00:02:{:02}Z", i),
                53.0 + i as f64 * 0.0001,
                13.0,
                None,
            ));
        }

        let trips = split_into_trips(&records, &TripConfig::default());
        assert_eq!(trips.len(), 2);
        assert_eq!(trips[0].start, "2024-01-01T00:00:00Z");
        assert_eq!(trips[0].end, "2024-01-01T00:00:07Z");
        assert_eq!(trips[0].point_count, 8);
        assert!((trips[0].distance_meters - 7.0 * 11.13).abs() < 1.0);
        // A straight line simplifies to its endpoints
        assert_eq!(trips[1].points.len(), 2);
    }

    #[test]
    fn test_split_into_trips_empty() {
        assert!(split_into_trips(&[], &TripConfig::default()).is_empty());
    }
}
