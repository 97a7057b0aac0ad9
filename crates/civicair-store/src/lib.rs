//! Local persistence for cached AQI grid readings.
//!
//! This crate provides SQLite-based storage for the AQI cache: one row per
//! rounded grid coordinate, refreshed in place whenever a new reading arrives.
//!
//! # Features
//!
//! - Idempotent batch upsert keyed by 6-decimal coordinates
//! - Inclusive bounding-box lookup
//! - Filtering by refresh time, with pagination
//! - Safe for concurrent writers on the same file (WAL, immediate transactions)
//!
//! # Example
//!
//! ```no_run
//! use civicair_store::{PointQuery, Store};
//! use civicair_types::BoundingBox;
//!
//! let store = Store::open_default()?;
//!
//! let bbox = BoundingBox::new(10.0, 106.0, 10.5, 106.5).unwrap();
//! let points = store.find_in_bounding_box(&bbox)?;
//! let latest = store.query_points(&PointQuery::new().limit(10))?;
//! # Ok::<(), civicair_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{NewAqiPoint, StoredAqiPoint};
pub use queries::PointQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/civicair/aqi.db`
/// - macOS: `~/Library/Application Support/civicair/aqi.db`
/// - Windows: `C:\Users\<user>\AppData\Local\civicair\aqi.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("civicair")
        .join("aqi.db")
}
