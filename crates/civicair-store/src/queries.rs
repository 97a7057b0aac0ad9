//! Query builder for stored AQI points.
//!
//! [`PointQuery`] follows the builder pattern: every filter is optional and
//! can be chained in any order.
//!
//! # Example
//!
//! ```
//! use civicair_store::{PointQuery, Store};
//! use civicair_types::BoundingBox;
//! use time::{Duration, OffsetDateTime};
//!
//! let store = Store::open_in_memory()?;
//! let bbox = BoundingBox::new(10.0, 106.0, 11.0, 107.0).unwrap();
//!
//! let query = PointQuery::new()
//!     .within(bbox)
//!     .since(OffsetDateTime::now_utc() - Duration::hours(1))
//!     .limit(50);
//!
//! let points = store.query_points(&query)?;
//! assert!(points.is_empty());
//! # Ok::<(), civicair_store::Error>(())
//! ```

use civicair_types::BoundingBox;
use time::OffsetDateTime;

use crate::schema::timestamp_to_sql;

/// Fluent query builder for AQI points.
///
/// By default results are ordered by `updated_at` descending (most recently
/// refreshed first).
#[derive(Debug, Default, Clone)]
pub struct PointQuery {
    /// Restrict to points inside this box (inclusive, 6-decimal precision).
    pub bbox: Option<BoundingBox>,
    /// Restrict to points refreshed at or after this time.
    pub since: Option<OffsetDateTime>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
    /// Order by `updated_at` descending.
    pub newest_first: bool,
}

impl PointQuery {
    /// Create a new query: no filters, newest first.
    pub fn new() -> Self {
        Self {
            newest_first: true,
            ..Default::default()
        }
    }

    /// Filter to points inside a bounding box.
    pub fn within(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    /// Filter to points refreshed at or after this time.
    pub fn since(mut self, time: OffsetDateTime) -> Self {
        self.since = Some(time);
        self
    }

    /// Limit the number of results.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first N results.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Order by oldest `updated_at` first.
    pub fn oldest_first(mut self) -> Self {
        self.newest_first = false;
        self
    }

    /// Build the SQL WHERE clause and parameters.
    ///
    /// Box filtering compares integer micro-degrees so that a point rounded onto
    /// the box edge is always included.
    pub(crate) fn build_where(&self) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(bbox) = self.bbox {
            let (min, max) = (bbox.min_key(), bbox.max_key());
            conditions.push("lat_e6 BETWEEN ? AND ?");
            params.push(Box::new(min.lat_e6));
            params.push(Box::new(max.lat_e6));
            conditions.push("lon_e6 BETWEEN ? AND ?");
            params.push(Box::new(min.lon_e6));
            params.push(Box::new(max.lon_e6));
        }

        if let Some(since) = self.since {
            conditions.push("updated_at >= ?");
            // Before the representable range means no lower bound at all
            params.push(Box::new(timestamp_to_sql(since).unwrap_or(i64::MIN)));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    /// Build the full SQL query.
    pub(crate) fn build_sql(&self) -> String {
        let (where_clause, _) = self.build_where();
        let order = if self.newest_first { "DESC" } else { "ASC" };

        let mut sql = format!(
            "SELECT id, lat, lon, aqi, pm25, updated_at FROM aqi_points {} \
             ORDER BY updated_at {}, id {}",
            where_clause, order, order
        );

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {}", limit)),
            // SQLite requires a LIMIT before OFFSET
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset)),
            (None, None) => {}
        }

        sql
    }
}
