//! Database schema.

use rusqlite::Connection;
use time::OffsetDateTime;

use crate::error::{Error, Result};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize(conn: &Connection) -> Result<()> {
    let version = get_schema_version(conn)?;

    if version == 0 {
        create_schema_v1(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    }

    Ok(())
}

/// Encode a timestamp for the `updated_at` column (Unix nanoseconds).
///
/// Returns `None` outside the range an `i64` of nanoseconds can hold
/// (roughly years 1677 to 2262).
pub(crate) fn timestamp_to_sql(time: OffsetDateTime) -> Option<i64> {
    i64::try_from(time.unix_timestamp_nanos()).ok()
}

/// Decode an `updated_at` column value.
pub(crate) fn timestamp_from_sql(nanos: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|_| Error::InvalidTimestamp(nanos))
}

/// Get the current schema version.
fn get_schema_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='schema_version'",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version: i32 =
        conn.query_row("SELECT version FROM schema_version", [], |row| row.get(0))?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?)",
        [version],
    )?;
    Ok(())
}

/// Create the initial schema (version 1).
///
/// Coordinates are stored twice: as REAL degrees for display and as INTEGER
/// micro-degrees, which carry the uniqueness constraint and range checks.
/// `updated_at` holds Unix nanoseconds so freshness checks see the exact age.
fn create_schema_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS aqi_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            lat_e6 INTEGER NOT NULL CHECK (lat_e6 BETWEEN -90000000 AND 90000000),
            lon_e6 INTEGER NOT NULL CHECK (lon_e6 BETWEEN -180000000 AND 180000000),
            lat REAL NOT NULL,
            lon REAL NOT NULL,
            aqi INTEGER NOT NULL DEFAULT 1,
            pm25 REAL,
            updated_at INTEGER NOT NULL,
            UNIQUE(lat_e6, lon_e6)
        );
        CREATE INDEX IF NOT EXISTS idx_aqi_points_updated
            ON aqi_points(updated_at);
        "#,
    )?;

    Ok(())
}
