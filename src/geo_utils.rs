//! Geographic utilities: great-circle distance and track length.

use crate::GpsPoint;

/// Equatorial earth radius in meters (WGS 84).
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Great-circle distance between two points in meters (haversine formula).
///
/// # Example
/// ```
/// use geotrail::GpsPoint;
/// use geotrail::geo_utils::haversine_distance;
///
/// let a = GpsPoint::new(0.0, 0.0);
/// let b = GpsPoint::new(0.0, 1.0);
/// assert!((haversine_distance(&a, &b) - 111_319.5).abs() < 1.0);
/// ```
pub fn haversine_distance(p1: &GpsPoint, p2: &GpsPoint) -> f64 {
    let lat1 = p1.latitude.to_radians();
    let lat2 = p2.latitude.to_radians();
    let delta_lat = (p2.latitude - p1.latitude).to_radians();
    let delta_lon = (p2.longitude - p1.longitude).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Total distance along a polyline in meters.
pub fn track_distance(points: &[GpsPoint]) -> f64 {
    points
        .windows(2)
        .map(|w| haversine_distance(&w[0], &w[1]))
        .sum()
}
