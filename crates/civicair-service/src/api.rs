//! REST API endpoints for the civicair service.
//!
//! # Concurrency and Lock Acquisition
//!
//! - **`state.store`** (Mutex): Acquired for database operations. The
//!   reconciler takes it once for the cached-point read and once for the
//!   write-back; it is never held across an upstream fetch.
//! - **`state.config`** (RwLock): Read lock only; nothing here mutates it.
//!
//! When both are needed, take `config` first.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Bounds and
//! grid-size problems return 400. Store errors return 500.
//!
//! # Example
//!
//! ```ignore
//! use civicair_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use civicair_store::{PointQuery, StoredAqiPoint};
use civicair_types::{AqiCell, BoundingBox};

use crate::refresher::Refresher;
use crate::state::{AppState, RefreshRun};

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/health/detailed", get(health_detailed))
        .route("/api/status", get(get_status))
        // Refresher control
        .route("/api/refresher/start", post(refresher_start))
        .route("/api/refresher/stop", post(refresher_stop))
        // AQI data; the trailing-slash form is what existing map clients call
        .route("/api/aqi/fetch", post(fetch_aqi))
        .route("/api/aqi/fetch/", post(fetch_aqi))
        .route("/api/aqi/points", get(list_points))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Detailed health check response with diagnostics.
#[derive(Debug, Serialize)]
pub struct DetailedHealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    /// Database health status
    pub database: DatabaseHealth,
    /// Refresher health status
    pub refresher: RefresherHealth,
    /// Platform information
    pub platform: PlatformInfo,
}

/// Database health information.
#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
    /// Whether the database is accessible
    pub ok: bool,
    /// Number of cached points
    pub point_count: Option<u64>,
    /// Error message if database is not ok
    pub error: Option<String>,
}

/// Refresher health information.
#[derive(Debug, Serialize)]
pub struct RefresherHealth {
    pub running: bool,
    /// Sweeps in a row that could not list the store
    pub consecutive_failures: u32,
}

/// Platform information.
#[derive(Debug, Serialize)]
pub struct PlatformInfo {
    /// Operating system
    pub os: &'static str,
    /// CPU architecture
    pub arch: &'static str,
}

/// Detailed health check endpoint.
///
/// Counts the cached points, so it takes the store lock. For frequent
/// liveness probes, prefer `/api/health`.
async fn health_detailed(State(state): State<Arc<AppState>>) -> Json<DetailedHealthResponse> {
    let database = {
        let store = state.store.lock().await;
        match store.count_points() {
            Ok(count) => DatabaseHealth {
                ok: true,
                point_count: Some(count),
                error: None,
            },
            Err(e) => DatabaseHealth {
                ok: false,
                point_count: None,
                error: Some(e.to_string()),
            },
        }
    };

    let refresher = RefresherHealth {
        running: state.refresher.is_running(),
        consecutive_failures: state.refresher.consecutive_failures(),
    };

    let platform = PlatformInfo {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    };

    let status = if database.ok && refresher.running {
        "ok"
    } else {
        "degraded"
    };

    Json(DetailedHealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        database,
        refresher,
        platform,
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub refresher: RefresherStatus,
}

/// Refresher status.
#[derive(Debug, Serialize)]
pub struct RefresherStatus {
    /// Whether the refresher is running.
    pub running: bool,
    /// When the refresher was started (if running).
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// How long the refresher has been running (in seconds).
    pub uptime_seconds: Option<u64>,
    /// Configured sweep interval.
    pub interval_secs: u64,
    /// Outcome of the most recent sweep.
    pub last_run: Option<RefreshRun>,
}

/// Get service status including the refresher state and last sweep.
async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let interval_secs = state.config.read().await.refresh.interval_secs;

    let running = state.refresher.is_running();
    let started_at = state.refresher.started_at();
    let uptime_seconds = started_at.map(|s| {
        let now = OffsetDateTime::now_utc();
        (now - s).whole_seconds().max(0) as u64
    });

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
        refresher: RefresherStatus {
            running,
            started_at,
            uptime_seconds,
            interval_secs,
            last_run: state.refresher.last_run().await,
        },
    })
}

/// Response for refresher control actions.
#[derive(Debug, Serialize)]
pub struct RefresherActionResponse {
    pub success: bool,
    pub message: String,
    pub running: bool,
}

/// Start the refresher.
async fn refresher_start(State(state): State<Arc<AppState>>) -> Json<RefresherActionResponse> {
    let refresher = Refresher::new(Arc::clone(&state));
    if !refresher.start().await {
        return Json(RefresherActionResponse {
            success: false,
            message: "Refresher is already running".to_string(),
            running: true,
        });
    }

    Json(RefresherActionResponse {
        success: true,
        message: "Refresher started".to_string(),
        running: true,
    })
}

/// Stop the refresher.
///
/// A sweep already in progress finishes; no further sweeps start.
async fn refresher_stop(State(state): State<Arc<AppState>>) -> Json<RefresherActionResponse> {
    let refresher = Refresher::new(Arc::clone(&state));
    if !refresher.stop() {
        return Json(RefresherActionResponse {
            success: false,
            message: "Refresher is not running".to_string(),
            running: false,
        });
    }

    Json(RefresherActionResponse {
        success: true,
        message: "Refresher stopped".to_string(),
        running: false,
    })
}

/// Bounding box for an AQI grid request.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct FetchRequest {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl FetchRequest {
    /// Validate into a [`BoundingBox`].
    pub fn bounding_box(&self) -> Result<BoundingBox, AppError> {
        BoundingBox::new(self.lat_min, self.lon_min, self.lat_max, self.lon_max)
            .map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

/// Reconcile the AQI grid for a bounding box.
///
/// Returns one `[lat, lon, aqi, pm25]` tuple per grid point with a known
/// value, in grid order. Points with no cached value whose fetch failed are
/// left out.
///
/// # Errors
///
/// - Returns [`AppError::BadRequest`] for an invalid box or a grid larger
///   than `grid.max_points`
async fn fetch_aqi(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FetchRequest>,
) -> Result<Json<Vec<AqiCell>>, AppError> {
    let bbox = request.bounding_box()?;
    let reconciliation = state.reconciler.reconcile(&bbox).await?;
    Ok(Json(reconciliation.cells))
}

/// Query parameters for the cached point listing.
#[derive(Debug, Deserialize, Default)]
pub struct PointsQuery {
    pub lat_min: Option<f64>,
    pub lon_min: Option<f64>,
    pub lat_max: Option<f64>,
    pub lon_max: Option<f64>,
    /// Unix timestamp; only points refreshed at or after it.
    pub since: Option<i64>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl PointsQuery {
    /// The optional box filter.
    ///
    /// Either all four edges are given or none.
    pub fn bounding_box(&self) -> Result<Option<BoundingBox>, AppError> {
        match (self.lat_min, self.lon_min, self.lat_max, self.lon_max) {
            (None, None, None, None) => Ok(None),
            (Some(lat_min), Some(lon_min), Some(lat_max), Some(lon_max)) => {
                BoundingBox::new(lat_min, lon_min, lat_max, lon_max)
                    .map(Some)
                    .map_err(|e| AppError::BadRequest(e.to_string()))
            }
            _ => Err(AppError::BadRequest(
                "lat_min, lon_min, lat_max and lon_max must be given together".to_string(),
            )),
        }
    }

    /// Build the store query, asking for one extra row to detect more pages.
    fn to_point_query(&self) -> Result<PointQuery, AppError> {
        let mut query = PointQuery::new();

        if let Some(bbox) = self.bounding_box()? {
            query = query.within(bbox);
        }
        if let Some(since) = self.since {
            let dt = OffsetDateTime::from_unix_timestamp(since).map_err(|_| {
                AppError::BadRequest(format!("Invalid 'since' timestamp: {}", since))
            })?;
            query = query.since(dt);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit.saturating_add(1));
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        Ok(query)
    }
}

/// Paginated response wrapper with metadata.
#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    /// The data items.
    pub data: Vec<T>,
    /// Pagination metadata.
    pub pagination: PaginationMeta,
}

/// Pagination metadata.
#[derive(Debug, Serialize)]
pub struct PaginationMeta {
    /// Number of items returned.
    pub count: usize,
    /// Offset from the beginning.
    pub offset: u32,
    /// Maximum items requested (if specified).
    pub limit: Option<u32>,
    /// Whether there are more items available.
    pub has_more: bool,
}

/// List cached points, most recently refreshed first.
///
/// # Query Parameters
///
/// - `lat_min`, `lon_min`, `lat_max`, `lon_max`: box filter, all or none
/// - `since`: Unix timestamp to filter points from (inclusive)
/// - `limit`: Maximum number of points to return
/// - `offset`: Number of points to skip
///
/// # Errors
///
/// - Returns [`AppError::BadRequest`] for a partial or invalid box
/// - Returns [`AppError::Store`] if the database query fails
async fn list_points(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PointsQuery>,
) -> Result<Json<PaginatedResponse<StoredAqiPoint>>, AppError> {
    let query = params.to_point_query()?;

    let mut points = state.store.lock().await.query_points(&query)?;

    let has_more = params.limit.is_some_and(|l| points.len() > l as usize);
    if has_more {
        points.pop();
    }

    Ok(Json(PaginatedResponse {
        pagination: PaginationMeta {
            count: points.len(),
            offset: params.offset.unwrap_or(0),
            limit: params.limit,
            has_more,
        },
        data: points,
    }))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Store(civicair_store::Error),
    Internal(String),
}

impl From<civicair_store::Error> for AppError {
    fn from(e: civicair_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl From<civicair_core::Error> for AppError {
    fn from(e: civicair_core::Error) -> Self {
        use civicair_core::Error;

        match e {
            Error::InvalidBounds(_) | Error::InvalidStep(_) | Error::TooManyPoints { .. } => {
                AppError::BadRequest(e.to_string())
            }
            Error::Store(e) => AppError::Store(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
