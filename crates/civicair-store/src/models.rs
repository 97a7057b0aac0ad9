//! Data models for stored AQI points.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use civicair_types::{AqiCell, AqiReading, GridKey, GridPoint};

/// An AQI point stored in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredAqiPoint {
    /// Database row ID.
    pub id: i64,
    /// Latitude in degrees (6 decimal places).
    pub lat: f64,
    /// Longitude in degrees (6 decimal places).
    pub lon: f64,
    /// Air quality index.
    pub aqi: i32,
    /// PM2.5 concentration in µg/m³.
    pub pm25: Option<f64>,
    /// When this reading was last refreshed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl StoredAqiPoint {
    /// Canonical key of this point.
    pub fn key(&self) -> GridKey {
        GridKey::from_degrees(self.lat, self.lon)
    }

    /// The point's coordinate.
    pub fn point(&self) -> GridPoint {
        GridPoint::new(self.lat, self.lon)
    }

    /// The cached reading.
    pub fn reading(&self) -> AqiReading {
        AqiReading {
            aqi: self.aqi,
            pm25: self.pm25,
        }
    }

    /// Age of the reading relative to `now`.
    pub fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.updated_at
    }

    /// Convert to an API result row.
    pub fn to_cell(&self) -> AqiCell {
        AqiCell::new(self.point(), self.reading())
    }
}

/// A point to insert or update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewAqiPoint {
    pub lat: f64,
    pub lon: f64,
    pub aqi: i32,
    pub pm25: Option<f64>,
    pub updated_at: OffsetDateTime,
}

impl NewAqiPoint {
    /// Create a point from a fresh upstream reading.
    pub fn from_reading(point: GridPoint, reading: AqiReading, updated_at: OffsetDateTime) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            aqi: reading.aqi,
            pm25: reading.pm25,
            updated_at,
        }
    }

    /// Canonical key of this point.
    pub fn key(&self) -> GridKey {
        GridKey::from_degrees(self.lat, self.lon)
    }
}
