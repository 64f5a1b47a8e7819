//! HTTP endpoints (axum).
//!
//! | route          | method | purpose                                   |
//! |----------------|--------|-------------------------------------------|
//! | `/`, `/status` | GET    | liveness                                  |
//! | `/heartbeat`   | POST   | phone heartbeat for the watchdog          |
//! | `/dump`        | POST   | Overland batch ingestion                  |
//! | `/coordinates` | GET    | recent moving points                      |
//! | `/gps`         | GET    | trips for a date range                    |
//! | `/flights`     | GET    | flight statistics                         |
//! | `/passport`    | GET    | visited countries                         |
//!
//! Database and file work runs on the blocking pool; the SQLite connection
//! sits behind a mutex so writes from `/dump` are serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDate, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::{json, Value};

use crate::archive::{RawArchive, StoreOutcome};
use crate::config::AppConfig;
use crate::error::{Result, TrailError};
use crate::overland::format_timestamp;
use crate::processing::{filter_by_max_distance, split_into_trips, TripConfig};
use crate::refresh::ingest_file;
use crate::reports::{FlightsReport, PassportReport};
use crate::store::LocationStore;
use crate::watchdog::HeartbeatClock;
use crate::{Bounds, GpsPoint, LocationRecord};

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

const DEFAULT_LOOKBACK_HOURS: i64 = 24;
const DEFAULT_MIN_ACCURACY: f64 = 200.0;
const DEFAULT_MAX_DISTANCE_KM: f64 = 0.1;
const DEFAULT_GPS_RANGE_DAYS: i64 = 21;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub archive: Arc<RawArchive>,
    pub store: Arc<Mutex<LocationStore>>,
    pub heartbeat: HeartbeatClock,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: LocationStore,
        heartbeat: HeartbeatClock,
    ) -> Self {
        Self {
            archive: Arc::new(RawArchive::new(&config.raw_data_dir)),
            store: Arc::new(Mutex::new(store)),
            heartbeat,
            config: Arc::new(config),
        }
    }

    fn store(&self) -> MutexGuard<'_, LocationStore> {
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl IntoResponse for TrailError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            error!("Request failed: {}", self);
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (
            status,
            Json(json!({ "status": "error", "message": self.to_string() })),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(status))
        .route("/status", get(status))
        .route("/heartbeat", post(heartbeat))
        .route("/dump", post(dump))
        .route("/coordinates", get(coordinates))
        .route("/gps", get(gps))
        .route("/flights", get(flights))
        .route("/passport", get(passport))
        .with_state(state)
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
}

/// Bind and serve until the process stops.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TrailError::Internal {
            message: format!("failed to bind {addr}: {e}"),
        })?;
    info!("Running server at http://{}", addr);

    axum::serve(listener, router(state))
        .await
        .map_err(|e| TrailError::Internal {
            message: format!("server failed: {e}"),
        })
}

/// Run blocking work on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TrailError::Internal {
            message: format!("blocking task failed: {e}"),
        })?
}

/// Serialize to JSON and log the payload size.
fn sized_json<T: Serialize>(value: &T) -> Result<Response> {
    let body = serde_json::to_vec(value).map_err(|e| TrailError::Internal {
        message: format!("failed to serialize response: {e}"),
    })?;
    info!(
        "Response payload size: {:.6} MB",
        body.len() as f64 / 1024.0 / 1024.0
    );

    let mut response = Response::new(Body::from(body));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

fn parse_param<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T> {
    match params.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| TrailError::invalid_parameter(name, format!("cannot parse '{raw}'"))),
    }
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn status() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn heartbeat(State(state): State<AppState>) -> Json<Value> {
    state.heartbeat.beat();
    Json(json!({ "status": "ok" }))
}

/// Store an Overland batch and load it right away if it is new or its rows
/// are missing.
pub async fn dump(State(state): State<AppState>, body: Bytes) -> Result<Response> {
    let ack = json!({ "result": "ok" });
    let task_state = state.clone();

    let outcome = blocking(move || {
        let outcome = match task_state.archive.store_batch(&body) {
            Err(TrailError::EmptyBatch) => {
                warn!("Received empty batch, nothing stored");
                return Ok(None);
            }
            other => other?,
        };
        let threshold = task_state.config.max_horizontal_accuracy;
        let mut store = task_state.store();
        match &outcome {
            StoreOutcome::Written(path) => {
                ingest_file(&mut store, path, threshold)?;
            }
            // A retry after a failed load finds the file but not its rows
            StoreOutcome::Duplicate(path) => {
                if store.count_for_file(&path.to_string_lossy())? == 0 {
                    info!("Loading rows missing for {}", path.display());
                    ingest_file(&mut store, path, threshold)?;
                }
            }
        }
        Ok(Some(outcome))
    })
    .await?;

    if let Some(outcome) = outcome {
        info!("Stored batch at {}", outcome.path().display());
    }
    sized_json(&ack)
}

#[derive(Debug, Serialize)]
struct CoordinatesResponse {
    status: &'static str,
    count: usize,
    lookback_hours: i64,
    min_accuracy: f64,
    max_distance: f64,
    coordinates: Vec<(String, f64, f64, f64)>,
}

/// Moving points of the last `lookback_hours`, GPS jumps removed.
pub async fn coordinates(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response> {
    let lookback_hours: i64 = parse_param(&params, "lookback_hours", DEFAULT_LOOKBACK_HOURS)?;
    let min_accuracy: f64 = parse_param(&params, "min_accuracy", DEFAULT_MIN_ACCURACY)?;
    let max_distance: f64 = parse_param(&params, "max_distance", DEFAULT_MAX_DISTANCE_KM)?;

    if lookback_hours <= 0 {
        return Err(TrailError::invalid_parameter("lookback_hours", "must be positive"));
    }
    for (name, value) in [("min_accuracy", min_accuracy), ("max_distance", max_distance)] {
        if value.is_nan() || value <= 0.0 {
            return Err(TrailError::invalid_parameter(name, "must be positive"));
        }
    }

    info!(
        "Fetching coordinates with lookback_hours={} min_accuracy={} max_distance={}",
        lookback_hours, min_accuracy, max_distance
    );

    let now = Utc::now();
    let window_start = Duration::try_hours(lookback_hours)
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .ok_or_else(|| TrailError::invalid_parameter("lookback_hours", "out of range"))?;
    let start = format_timestamp(&window_start);
    let end = format_timestamp(&now);

    let rows = blocking(move || {
        state
            .store()
            .fetch_coordinates(&start, &end, Some(min_accuracy))
    })
    .await?;

    let coordinates: Vec<_> = filter_by_max_distance(rows, max_distance)
        .into_iter()
        .map(|c| (c.timestamp, c.lat, c.lon, c.horizontal_accuracy))
        .collect();

    sized_json(&CoordinatesResponse {
        status: "success",
        count: coordinates.len(),
        lookback_hours,
        min_accuracy,
        max_distance,
        coordinates,
    })
}

/// Trips between `start_date` and `end_date` (inclusive, `YYYY-MM-DD`).
/// Defaults to the last three weeks.
pub async fn gps(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let today = Utc::now().date_naive();
    let end_date: NaiveDate = parse_param(&params, "end_date", today)?;
    let start_date: NaiveDate = parse_param(
        &params,
        "start_date",
        end_date
            .checked_sub_signed(Duration::days(DEFAULT_GPS_RANGE_DAYS))
            .unwrap_or(NaiveDate::MIN),
    )?;
    if start_date > end_date {
        return Err(TrailError::invalid_parameter(
            "start_date",
            "must not be after end_date",
        ));
    }

    let start = format!("{}T00:00:00Z", start_date.format("%Y-%m-%d"));
    let end = format!("{}T23:59:59Z", end_date.format("%Y-%m-%d"));
    let records = blocking(move || state.store().fetch_range(&start, &end)).await?;
    let trips = split_into_trips(&records, &TripConfig::default());
    let points: Vec<GpsPoint> = records.iter().map(LocationRecord::point).collect();

    Ok(Json(json!({
        "status": "success",
        "start_date": start_date,
        "end_date": end_date,
        "count": records.len(),
        "bounds": Bounds::from_points(&points),
        "trips": trips,
    })))
}

pub async fn flights(State(state): State<AppState>) -> Result<Json<FlightsReport>> {
    let config = Arc::clone(&state.config);
    let report = blocking(move || {
        FlightsReport::load(
            &config.flights_file,
            &config.airports_file,
            &config.countries_file,
        )
    })
    .await?;
    Ok(Json(report))
}

pub async fn passport(State(state): State<AppState>) -> Result<Json<PassportReport>> {
    let config = Arc::clone(&state.config);
    let report =
        blocking(move || PassportReport::load(&config.visited_file, &config.countries_file))
            .await?;
    Ok(Json(report))
}
