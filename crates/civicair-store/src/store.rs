//! Main store implementation.

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info, warn};

use civicair_types::{BoundingBox, GridKey};

use crate::error::{Error, Result};
use crate::models::{NewAqiPoint, StoredAqiPoint};
use crate::queries::PointQuery;
use crate::schema;

/// How long a connection waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const UPSERT_SQL: &str = "INSERT INTO aqi_points (lat_e6, lon_e6, lat, lon, aqi, pm25, updated_at)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(lat_e6, lon_e6) DO UPDATE SET
        aqi = excluded.aqi,
        pm25 = excluded.pm25,
        updated_at = excluded.updated_at";

/// SQLite-based store for cached AQI points.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        info!("Opening database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;

        schema::initialize(&conn)?;

        Ok(Self { conn })
    }

    /// Open the default database location.
    pub fn open_default() -> Result<Self> {
        Self::open(crate::default_db_path())
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    /// All points inside the inclusive bounding box, in no particular order.
    pub fn find_in_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<StoredAqiPoint>> {
        self.query_points(&PointQuery::new().within(*bbox))
    }

    /// Insert or update a batch of points keyed by rounded coordinate.
    ///
    /// Each row succeeds or fails on its own: a rejected row is logged and
    /// skipped, the rest of the batch is still written. The batch runs in a
    /// single immediate transaction so concurrent writers serialize per batch.
    ///
    /// Returns the number of rows written.
    pub fn upsert_many(&self, points: &[NewAqiPoint]) -> Result<usize> {
        if points.is_empty() {
            return Ok(0);
        }

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let mut written = 0;
        let mut failed = 0;

        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for point in points {
                if !point.lat.is_finite() || !point.lon.is_finite() {
                    warn!(
                        "Skipping AQI point with non-finite coordinate ({}, {})",
                        point.lat, point.lon
                    );
                    failed += 1;
                    continue;
                }

                let key = point.key();
                let Some(updated_at) = schema::timestamp_to_sql(point.updated_at) else {
                    warn!(
                        "Skipping AQI point {} with unrepresentable timestamp {}",
                        key, point.updated_at
                    );
                    failed += 1;
                    continue;
                };
                let result = stmt.execute(rusqlite::params![
                    key.lat_e6,
                    key.lon_e6,
                    key.lat(),
                    key.lon(),
                    point.aqi,
                    point.pm25,
                    updated_at,
                ]);

                match result {
                    Ok(_) => written += 1,
                    Err(e) => {
                        warn!("Failed to upsert AQI point {}: {}", key, e);
                        failed += 1;
                    }
                }
            }
        }

        tx.commit()?;

        debug!("Upserted {} AQI points ({} failed)", written, failed);
        Ok(written)
    }

    /// Get the point stored for a coordinate.
    pub fn get_point(&self, lat: f64, lon: f64) -> Result<Option<StoredAqiPoint>> {
        let key = GridKey::from_degrees(lat, lon);
        let raw = self
            .conn
            .query_row(
                "SELECT id, lat, lon, aqi, pm25, updated_at FROM aqi_points
                 WHERE lat_e6 = ?1 AND lon_e6 = ?2",
                rusqlite::params![key.lat_e6, key.lon_e6],
                RawPoint::from_row,
            )
            .optional()?;

        raw.map(RawPoint::into_point).transpose()
    }

    /// Every stored point, oldest refresh first.
    pub fn list_all(&self) -> Result<Vec<StoredAqiPoint>> {
        self.query_points(&PointQuery::new().oldest_first())
    }

    /// Query points with filters.
    pub fn query_points(&self, query: &PointQuery) -> Result<Vec<StoredAqiPoint>> {
        let sql = query.build_sql();
        let (_, params) = query.build_where();

        debug!("Executing query: {}", sql);

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_ref.as_slice(), RawPoint::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        raw.into_iter().map(RawPoint::into_point).collect()
    }

    /// Count stored points.
    pub fn count_points(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM aqi_points", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Row as read from SQLite, before timestamp conversion.
struct RawPoint {
    id: i64,
    lat: f64,
    lon: f64,
    aqi: i32,
    pm25: Option<f64>,
    updated_at: i64,
}

impl RawPoint {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            lat: row.get(1)?,
            lon: row.get(2)?,
            aqi: row.get(3)?,
            pm25: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    fn into_point(self) -> Result<StoredAqiPoint> {
        let updated_at = schema::timestamp_from_sql(self.updated_at)?;
        Ok(StoredAqiPoint {
            id: self.id,
            lat: self.lat,
            lon: self.lon,
            aqi: self.aqi,
            pm25: self.pm25,
            updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicair_types::{AqiReading, GridPoint};
    use time::OffsetDateTime;

    fn point(lat: f64, lon: f64, aqi: i32, pm25: Option<f64>) -> NewAqiPoint {
        NewAqiPoint::from_reading(
            GridPoint::new(lat, lon),
            AqiReading { aqi, pm25 },
            OffsetDateTime::now_utc(),
        )
    }

    fn bbox(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> BoundingBox {
        BoundingBox::new(lat_min, lon_min, lat_max, lon_max).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.count_points().unwrap(), 0);
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_find_in_bounding_box() {
        let store = Store::open_in_memory().unwrap();

        let written = store
            .upsert_many(&[
                point(10.0, 106.0, 2, Some(15.5)),
                point(10.01, 106.01, 3, None),
                point(11.0, 106.0, 4, Some(40.0)),
            ])
            .unwrap();
        assert_eq!(written, 3);

        let found = store
            .find_in_bounding_box(&bbox(10.0, 106.0, 10.02, 106.02))
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| p.lat < 10.5));
    }

    #[test]
    fn test_upsert_is_idempotent_and_last_write_wins() {
        let store = Store::open_in_memory().unwrap();

        store.upsert_many(&[point(10.0, 106.0, 2, Some(15.5))]).unwrap();
        store.upsert_many(&[point(10.0, 106.0, 4, Some(55.0))]).unwrap();

        assert_eq!(store.count_points().unwrap(), 1);
        let stored = store.get_point(10.0, 106.0).unwrap().unwrap();
        assert_eq!(stored.aqi, 4);
        assert_eq!(stored.pm25, Some(55.0));
    }

    #[test]
    fn test_upsert_same_cell_within_tolerance() {
        let store = Store::open_in_memory().unwrap();

        // Both round to (10.000000, 106.000000)
        store.upsert_many(&[point(10.000_000_1, 106.0, 2, None)]).unwrap();
        store.upsert_many(&[point(9.999_999_9, 106.0, 3, None)]).unwrap();

        assert_eq!(store.count_points().unwrap(), 1);
        assert_eq!(store.get_point(10.0, 106.0).unwrap().unwrap().aqi, 3);
    }

    #[test]
    fn test_upsert_row_failure_does_not_abort_batch() {
        let store = Store::open_in_memory().unwrap();

        let mut bad = point(10.0, 106.0, 1, None);
        bad.lat = 95.0; // violates the latitude CHECK constraint
        let mut non_finite = point(10.0, 106.0, 1, None);
        non_finite.lon = f64::NAN;

        let written = store
            .upsert_many(&[
                point(10.0, 106.0, 2, None),
                bad,
                non_finite,
                point(10.01, 106.0, 3, None),
            ])
            .unwrap();

        assert_eq!(written, 2);
        assert_eq!(store.count_points().unwrap(), 2);
    }

    #[test]
    fn test_upsert_updates_timestamp() {
        let store = Store::open_in_memory().unwrap();
        let earlier = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let later = OffsetDateTime::from_unix_timestamp(1_700_000_900).unwrap();

        let mut p = point(10.0, 106.0, 2, None);
        p.updated_at = earlier;
        store.upsert_many(&[p]).unwrap();
        p.updated_at = later;
        store.upsert_many(&[p]).unwrap();

        let stored = store.get_point(10.0, 106.0).unwrap().unwrap();
        assert_eq!(stored.updated_at, later);
    }

    #[test]
    fn test_sub_second_timestamp_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let at = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_900_000_000).unwrap();

        let mut p = point(10.0, 106.0, 2, None);
        p.updated_at = at;
        store.upsert_many(&[p]).unwrap();

        let stored = store.get_point(10.0, 106.0).unwrap().unwrap();
        assert_eq!(stored.updated_at, at);

        // `since` compares at full precision too
        let after = store
            .query_points(&PointQuery::new().since(at + time::Duration::milliseconds(50)))
            .unwrap();
        assert!(after.is_empty());
        let at_or_before = store.query_points(&PointQuery::new().since(at)).unwrap();
        assert_eq!(at_or_before.len(), 1);
    }

    #[test]
    fn test_bounding_box_is_inclusive_at_six_decimals() {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_many(&[point(10.02, 106.02, 1, None), point(10.020_001, 106.0, 1, None)])
            .unwrap();

        let found = store
            .find_in_bounding_box(&bbox(10.0, 106.0, 10.02, 106.02))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key(), GridKey::from_degrees(10.02, 106.02));
    }

    #[test]
    fn test_query_points_pagination_and_since() {
        let store = Store::open_in_memory().unwrap();
        let base = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();

        let points: Vec<NewAqiPoint> = (0..5)
            .map(|i| {
                let mut p = point(10.0 + i as f64 * 0.01, 106.0, i + 1, None);
                p.updated_at = base + time::Duration::minutes(i as i64);
                p
            })
            .collect();
        store.upsert_many(&points).unwrap();

        let page = store
            .query_points(&PointQuery::new().limit(2).offset(1))
            .unwrap();
        assert_eq!(page.len(), 2);
        // Newest first: aqi 5, 4, 3, ...
        assert_eq!(page[0].aqi, 4);
        assert_eq!(page[1].aqi, 3);

        let recent = store
            .query_points(&PointQuery::new().since(base + time::Duration::minutes(3)))
            .unwrap();
        assert_eq!(recent.len(), 2);

        let all = store.list_all().unwrap();
        assert_eq!(all.first().map(|p| p.aqi), Some(1));
    }

    #[test]
    fn test_concurrent_writers_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aqi.db");
        Store::open(&path).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = Store::open(&path).unwrap();
                    for round in 0..10 {
                        // Every worker writes the same shared cell plus its own cell
                        store
                            .upsert_many(&[
                                point(10.0, 106.0, round, None),
                                point(20.0 + worker as f64, 106.0, round, None),
                            ])
                            .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let store = Store::open(&path).unwrap();
        assert_eq!(store.count_points().unwrap(), 5);
        assert_eq!(store.get_point(10.0, 106.0).unwrap().unwrap().aqi, 9);
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("aqi.db");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count_points().unwrap(), 0);
    }

    #[test]
    fn test_stored_point_serializes_timestamp() {
        let store = Store::open_in_memory().unwrap();
        store.upsert_many(&[point(10.0, 106.0, 2, Some(15.5))]).unwrap();
        let stored = store.get_point(10.0, 106.0).unwrap().unwrap();

        let json = serde_json::to_value(&stored).unwrap();
        assert_eq!(json["aqi"], 2);
        assert!(json["updated_at"].is_string());
    }
}
