//! # Travel Reports
//!
//! Flight and country statistics computed from three small JSON files kept
//! next to the GPS data:
//!
//! - flight log: array of [`FlightEntry`]
//! - airport table: IATA code -> [`Airport`]
//! - country table: ISO alpha-2 code -> [`Country`]
//!
//! Plus a list of visited country names for the passport view.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrailError};
use crate::geo_utils::haversine_distance;
use crate::GpsPoint;

const EARTH_CIRCUMFERENCE_KM: f64 = 40_075.0;
const EARTH_TO_MOON_KM: f64 = 385_000.0;
const EARTH_TO_MARS_KM: f64 = 54_600_000.0;

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| TrailError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| TrailError::Config {
        message: format!("{}: {}", path.display(), e),
    })
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================================
// Reference tables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Airport {
    pub lat: f64,
    pub lon: f64,
    /// ISO alpha-2 country code
    pub country: String,
}

/// Airports keyed by IATA code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AirportTable(HashMap<String, Airport>);

impl AirportTable {
    pub fn load(path: &Path) -> Result<Self> {
        let table: Self = load_json(path)?;
        info!("Loaded {} airports from {}", table.0.len(), path.display());
        Ok(table)
    }

    pub fn get(&self, iata: &str) -> Option<&Airport> {
        self.0.get(iata.trim())
    }
}

impl FromIterator<(String, Airport)> for AirportTable {
    fn from_iter<I: IntoIterator<Item = (String, Airport)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Country {
    pub name: String,
    pub alpha_3: String,
    pub flag: String,
}

/// Countries keyed by ISO alpha-2 code.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CountryTable(HashMap<String, Country>);

impl CountryTable {
    pub fn load(path: &Path) -> Result<Self> {
        load_json(path)
    }

    pub fn by_code(&self, alpha_2: &str) -> Option<&Country> {
        self.0.get(alpha_2)
    }

    pub fn by_name(&self, name: &str) -> Option<&Country> {
        self.0.values().find(|c| c.name == name)
    }
}

impl FromIterator<(String, Country)> for CountryTable {
    fn from_iter<I: IntoIterator<Item = (String, Country)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Visited country names, one entry per visit.
pub fn load_visited(path: &Path) -> Result<Vec<String>> {
    load_json(path)
}

// ============================================================================
// Flights
// ============================================================================

/// One row of the flight log as written by hand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightEntry {
    pub date: NaiveDate,
    pub origin: String,
    pub destination: String,
    #[serde(default)]
    pub flight_number: Option<String>,
    pub departure_airport: String,
    pub arrival_airport: String,
    #[serde(default)]
    pub aircraft: Option<String>,
    #[serde(default)]
    pub call_sign: Option<String>,
}

/// A flight with resolved endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flight {
    #[serde(flatten)]
    pub entry: FlightEntry,
    pub origin_point: GpsPoint,
    pub destination_point: GpsPoint,
    /// Great-circle distance, 2 decimals
    pub distance_km: f64,
}

impl Flight {
    pub fn route(&self) -> String {
        format!(
            "{}-{}",
            self.entry.departure_airport, self.entry.arrival_airport
        )
    }

    /// Carrier code: first token of the flight number.
    pub fn airline(&self) -> Option<&str> {
        self.entry
            .flight_number
            .as_deref()
            .and_then(|n| n.split_whitespace().next())
    }
}

/// Flights ordered by date.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlightLog {
    pub flights: Vec<Flight>,
}

impl FlightLog {
    pub fn load_entries(path: &Path) -> Result<Vec<FlightEntry>> {
        load_json(path)
    }

    /// Look up both airports of every entry. Entries with an unknown airport
    /// are skipped.
    pub fn resolve(entries: Vec<FlightEntry>, airports: &AirportTable) -> Self {
        let mut flights: Vec<Flight> = entries
            .into_iter()
            .filter_map(|mut entry| {
                entry.departure_airport = entry.departure_airport.trim().to_string();
                entry.arrival_airport = entry.arrival_airport.trim().to_string();

                let (Some(dep), Some(arr)) = (
                    airports.get(&entry.departure_airport),
                    airports.get(&entry.arrival_airport),
                ) else {
                    warn!(
                        "Skipping flight {} {}-{}: unknown airport",
                        entry.date, entry.departure_airport, entry.arrival_airport
                    );
                    return None;
                };

                let origin_point = GpsPoint::new(round_to(dep.lat, 3), round_to(dep.lon, 3));
                let destination_point =
                    GpsPoint::new(round_to(arr.lat, 3), round_to(arr.lon, 3));
                let distance_km =
                    round_to(haversine_distance(&origin_point, &destination_point) / 1000.0, 2);

                Some(Flight {
                    entry,
                    origin_point,
                    destination_point,
                    distance_km,
                })
            })
            .collect();

        flights.sort_by_key(|f| f.entry.date);
        Self { flights }
    }

    pub fn total_distance_km(&self) -> f64 {
        self.flights.iter().map(|f| f.distance_km).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightStats {
    pub flights: usize,
    /// Rounded to whole kilometers
    pub flight_distance_km: i64,
    pub airports: usize,
    pub airlines: usize,
    pub routes: usize,
    pub countries: usize,
}

pub fn flight_stats(log: &FlightLog, airports: &AirportTable) -> FlightStats {
    let airport_codes: HashSet<&str> = log
        .flights
        .iter()
        .flat_map(|f| [f.entry.departure_airport.as_str(), f.entry.arrival_airport.as_str()])
        .collect();
    let airlines: HashSet<&str> = log.flights.iter().filter_map(Flight::airline).collect();
    let routes: HashSet<String> = log.flights.iter().map(Flight::route).collect();

    FlightStats {
        flights: log.flights.len(),
        flight_distance_km: log.total_distance_km().round() as i64,
        airports: airport_codes.len(),
        airlines: airlines.len(),
        routes: routes.len(),
        countries: countries_from_flights(log, airports).len(),
    }
}

/// How far the total flight distance would have taken you.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpaceStats {
    /// Times around the equator
    pub earth: f64,
    /// Times to the moon
    pub moon: f64,
    /// Times to mars
    pub mars: f64,
}

pub fn space_stats(distance_km: f64) -> SpaceStats {
    SpaceStats {
        earth: round_to(distance_km / EARTH_CIRCUMFERENCE_KM, 1),
        moon: round_to(distance_km / EARTH_TO_MOON_KM, 1),
        mars: round_to(distance_km / EARTH_TO_MARS_KM, 3),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Year,
    Month,
    DayOfWeek,
}

/// `(label, count)` pairs. Years present in the log in order; all twelve
/// months and all seven weekdays, zero-filled.
pub fn flights_per(log: &FlightLog, period: Period) -> Vec<(String, usize)> {
    match period {
        Period::Year => {
            let mut counts: Vec<(i32, usize)> = Vec::new();
            for f in &log.flights {
                let year = f.entry.date.year();
                match counts.iter_mut().find(|(y, _)| *y == year) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((year, 1)),
                }
            }
            counts.sort_unstable();
            counts
                .into_iter()
                .map(|(y, n)| (y.to_string(), n))
                .collect()
        }
        Period::Month => {
            let mut counts = [0usize; 12];
            for f in &log.flights {
                counts[f.entry.date.month0() as usize] += 1;
            }
            MONTHS
                .iter()
                .zip(counts)
                .map(|(m, n)| (m.to_string(), n))
                .collect()
        }
        Period::DayOfWeek => {
            let mut counts = [0usize; 7];
            for f in &log.flights {
                counts[f.entry.date.weekday().num_days_from_monday() as usize] += 1;
            }
            WEEKDAYS
                .iter()
                .zip(counts)
                .map(|(d, n)| (d.to_string(), n))
                .collect()
        }
    }
}

// ============================================================================
// Countries
// ============================================================================

/// Alpha-2 codes of every country flown from or to, most frequent first.
pub fn countries_from_flights(log: &FlightLog, airports: &AirportTable) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for f in &log.flights {
        for code in [&f.entry.departure_airport, &f.entry.arrival_airport] {
            if let Some(airport) = airports.get(code) {
                *counts.entry(airport.country.as_str()).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().map(|(c, _)| c.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitedStats {
    pub countries: usize,
}

/// Distinct visited names that appear in the country table, sorted.
pub fn known_visited(visited: &[String], countries: &CountryTable) -> Vec<String> {
    let mut names: Vec<String> = visited
        .iter()
        .filter(|name| {
            let known = countries.by_name(name).is_some();
            if !known {
                warn!("Visited country {:?} not in country table", name);
            }
            known
        })
        .cloned()
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Only names found in the country table are counted.
pub fn visited_stats(visited: &[String], countries: &CountryTable) -> VisitedStats {
    VisitedStats {
        countries: known_visited(visited, countries).len(),
    }
}

/// Flags for the given alpha-2 codes, in order. Unknown codes are skipped.
pub fn flags(codes: &[String], countries: &CountryTable) -> Vec<String> {
    codes
        .iter()
        .filter_map(|code| countries.by_code(code).map(|c| c.flag.clone()))
        .collect()
}

/// Flags of visited countries by name, first occurrence order.
pub fn visited_flags(visited: &[String], countries: &CountryTable) -> Vec<String> {
    let mut seen = HashSet::new();
    visited
        .iter()
        .filter(|name| seen.insert(name.as_str()))
        .filter_map(|name| countries.by_name(name).map(|c| c.flag.clone()))
        .collect()
}

// ============================================================================
// Assembled reports
// ============================================================================

/// Everything shown on the flights page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightsReport {
    pub stats: FlightStats,
    pub space: SpaceStats,
    pub per_year: Vec<(String, usize)>,
    pub per_month: Vec<(String, usize)>,
    pub per_day_of_week: Vec<(String, usize)>,
    /// Flags of countries flown from or to, most frequent first
    pub flags: Vec<String>,
    pub flights: Vec<Flight>,
}

impl FlightsReport {
    pub fn build(log: FlightLog, airports: &AirportTable, countries: &CountryTable) -> Self {
        let stats = flight_stats(&log, airports);
        Self {
            space: space_stats(log.total_distance_km()),
            per_year: flights_per(&log, Period::Year),
            per_month: flights_per(&log, Period::Month),
            per_day_of_week: flights_per(&log, Period::DayOfWeek),
            flags: flags(&countries_from_flights(&log, airports), countries),
            stats,
            flights: log.flights,
        }
    }

    /// Load the three tables from disk and build the report.
    pub fn load(flights: &Path, airports: &Path, countries: &Path) -> Result<Self> {
        let airports = AirportTable::load(airports)?;
        let countries = CountryTable::load(countries)?;
        let log = FlightLog::resolve(FlightLog::load_entries(flights)?, &airports);
        Ok(Self::build(log, &airports, &countries))
    }
}

/// Countries visited, for the passport page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassportReport {
    pub stats: VisitedStats,
    pub flags: Vec<String>,
    pub countries: Vec<String>,
}

impl PassportReport {
    pub fn build(visited: &[String], countries: &CountryTable) -> Self {
        let names = known_visited(visited, countries);
        Self {
            stats: VisitedStats {
                countries: names.len(),
            },
            flags: visited_flags(visited, countries),
            countries: names,
        }
    }

    pub fn load(visited: &Path, countries: &Path) -> Result<Self> {
        let countries = CountryTable::load(countries)?;
        Ok(Self::build(&load_visited(visited)?, &countries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn airports() -> AirportTable {
        [
            ("BER", 52.366, 13.503, "DE"),
            ("MUC", 48.354, 11.786, "DE"),
            ("LHR", 51.470, -0.454, "GB"),
            ("JFK", 40.640, -73.779, "US"),
        ]
        .into_iter()
        .map(|(code, lat, lon, country)| {
            (
                code.to_string(),
                Airport {
                    lat,
                    lon,
                    country: country.to_string(),
                },
            )
        })
        .collect()
    }

    fn entry(date: &str, dep: &str, arr: &str, number: Option<&str>) -> FlightEntry {
        FlightEntry {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            origin: dep.to_string(),
            destination: arr.to_string(),
            flight_number: number.map(str::to_string),
            departure_airport: dep.to_string(),
            arrival_airport: arr.to_string(),
            aircraft: None,
            call_sign: None,
        }
    }

    fn log() -> FlightLog {
        FlightLog::resolve(
            vec![
                entry("2023-05-02", "LHR", "JFK", Some("BA 117")),
                entry("2023-01-10", " BER", "LHR ", Some("BA 983")),
                entry("2024-01-15", "BER", "MUC", Some("LH 1935")),
                entry("2024-02-01", "MUC", "XXX", None),
            ],
            &airports(),
        )
    }

    #[test]
    fn test_resolve_sorts_trims_and_skips_unknown() {
        let log = log();
        assert_eq!(log.flights.len(), 3);
        assert_eq!(log.flights[0].route(), "BER-LHR");
        assert_eq!(log.flights[0].airline(), Some("BA"));
        let atlantic = &log.flights[1];
        assert_eq!(atlantic.route(), "LHR-JFK");
        assert!((atlantic.distance_km - 5546.4).abs() < 1.0);
        assert_eq!(atlantic.distance_km, round_to(atlantic.distance_km, 2));
    }

    #[test]
    fn test_flight_stats() {
        let log = log();
        let stats = flight_stats(&log, &airports());
        assert_eq!(stats.flights, 3);
        assert_eq!(stats.airports, 4);
        assert_eq!(stats.airlines, 2);
        assert_eq!(stats.routes, 3);
        assert_eq!(stats.countries, 3);
        assert_eq!(stats.flight_distance_km, log.total_distance_km().round() as i64);
    }

    #[test]
    fn test_space_stats() {
        let stats = space_stats(80_150.0);
        assert_eq!(stats.earth, 2.0);
        assert_eq!(stats.moon, 0.2);
        assert_eq!(stats.mars, 0.001);
    }

    #[test]
    fn test_flights_per_period() {
        let log = log();
        assert_eq!(
            flights_per(&log, Period::Year),
            vec![("2023".to_string(), 2), ("2024".to_string(), 1)]
        );

        let months = flights_per(&log, Period::Month);
        assert_eq!(months.len(), 12);
        assert_eq!(months[0], ("January".to_string(), 2));
        assert_eq!(months[4], ("May".to_string(), 1));

        // 2023-01-10 Tue, 2023-05-02 Tue, 2024-01-15 Mon
        let days = flights_per(&log, Period::DayOfWeek);
        assert_eq!(days[0], ("Monday".to_string(), 1));
        assert_eq!(days[1], ("Tuesday".to_string(), 2));
        assert_eq!(days.iter().map(|(_, n)| n).sum::<usize>(), 3);
    }

    #[test]
    fn test_countries_ranked_by_frequency() {
        // DE: BER twice plus MUC, GB: LHR twice, US: JFK once
        let countries = countries_from_flights(&log(), &airports());
        assert_eq!(countries, vec!["DE", "GB", "US"]);
    }

    #[test]
    fn test_visited_and_flags() {
        let table: CountryTable = [
            ("DE", "Germany", "DEU", "🇩🇪"),
            ("FR", "France", "FRA", "🇫🇷"),
        ]
        .into_iter()
        .map(|(code, name, a3, flag)| {
            (
                code.to_string(),
                Country {
                    name: name.to_string(),
                    alpha_3: a3.to_string(),
                    flag: flag.to_string(),
                },
            )
        })
        .collect();

        let visited = vec![
            "France".to_string(),
            "Germany".to_string(),
            "France".to_string(),
            "Atlantis".to_string(),
        ];
        assert_eq!(visited_stats(&visited, &table).countries, 2);
        assert_eq!(known_visited(&visited, &table), vec!["France", "Germany"]);
        assert_eq!(visited_flags(&visited, &table), vec!["🇫🇷", "🇩🇪"]);
        assert_eq!(
            flags(&["DE".to_string(), "ZZ".to_string()], &table),
            vec!["🇩🇪"]
        );
    }

    #[test]
    fn test_load_tables_from_disk() {
        let tmp = TempDir::new().unwrap();
        let flights = tmp.path().join("flights.json");
        let airports_path = tmp.path().join("airports.json");
        fs::write(
            &flights,
            r#"[{"date": "2024-03-01", "origin": "Berlin", "destination": "Munich",
                 "flight_number": "LH 1935", "departure_airport": "BER", "arrival_airport": "MUC"}]"#,
        )
        .unwrap();
        fs::write(
            &airports_path,
            r#"{"BER": {"lat": 52.366, "lon": 13.503, "country": "DE"},
                "MUC": {"lat": 48.354, "lon": 11.786, "country": "DE"}}"#,
        )
        .unwrap();

        let entries = FlightLog::load_entries(&flights).unwrap();
        let table = AirportTable::load(&airports_path).unwrap();
        let log = FlightLog::resolve(entries, &table);
        assert_eq!(log.flights.len(), 1);
        assert!((log.flights[0].distance_km - 462.9).abs() < 1.0);

        assert!(matches!(
            AirportTable::load(&tmp.path().join("missing.json")),
            Err(TrailError::Io { .. })
        ));
    }

    #[test]
    fn test_flights_report() {
        let countries: CountryTable = [("DE", "🇩🇪"), ("GB", "🇬🇧"), ("US", "🇺🇸")]
            .into_iter()
            .map(|(code, flag)| {
                (
                    code.to_string(),
                    Country {
                        name: code.to_string(),
                        alpha_3: code.to_string(),
                        flag: flag.to_string(),
                    },
                )
            })
            .collect();

        let report = FlightsReport::build(log(), &airports(), &countries);
        assert_eq!(report.stats.flights, 3);
        assert_eq!(report.flights.len(), 3);
        assert_eq!(report.flags, vec!["🇩🇪", "🇬🇧", "🇺🇸"]);
        assert_eq!(report.per_day_of_week.len(), 7);
    }

    #[test]
    fn test_passport_report() {
        let visited = vec!["Spain".to_string(), "Chile".to_string(), "Spain".to_string()];
        let report = PassportReport::build(&visited, &CountryTable::default());
        assert_eq!(report.stats.countries, 2);
        assert_eq!(report.countries, vec!["Chile", "Spain"]);
        assert!(report.flags.is_empty());
    }
}
