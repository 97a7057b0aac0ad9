//! HTTP API and background refresh for the civicair AQI grid.
//!
//! This crate provides a service that:
//! - Answers bounding-box AQI requests through the staleness reconciler
//! - Caches readings in the local SQLite database
//! - Re-fetches every cached point on a fixed interval
//!
//! # REST API Endpoints
//!
//! - `GET /api/health` - Service health check
//! - `GET /api/health/detailed` - Database and refresher diagnostics
//! - `GET /api/status` - Refresher status and last sweep
//! - `POST /api/refresher/start` / `POST /api/refresher/stop` - Control the sweep
//! - `POST /api/aqi/fetch` - AQI grid for a bounding box
//! - `GET /api/aqi/points` - Cached points, paginated
//!
//! # Configuration
//!
//! The service reads configuration from `~/.config/civicair/server.toml`:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//!
//! [provider]
//! api_key = "..."   # or OPENWEATHER_API_KEY
//!
//! [grid]
//! step_km = 5.0
//!
//! [refresh]
//! interval_secs = 900
//! ```

pub mod api;
pub mod config;
pub mod refresher;
pub mod state;

pub use config::{
    Config, ConfigError, GridConfig, ProviderConfig, RefreshConfig, ServerConfig, StorageConfig,
};
pub use refresher::Refresher;
pub use state::{AppState, RefreshRun, RefresherState};
