//! Core value types for the AQI grid.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{BoundsError, BoundsResult};

/// Number of decimal places that define coordinate identity.
pub const COORD_PRECISION: u32 = 6;

/// Scale factor between degrees and fixed-point micro-degrees.
pub const COORD_SCALE: f64 = 1_000_000.0;

/// Round a coordinate in degrees to [`COORD_PRECISION`] decimal places.
///
/// ```
/// use civicair_types::round_coord;
///
/// assert_eq!(round_coord(10.123_456_789), 10.123457);
/// assert_eq!(round_coord(-0.000_000_4), 0.0);
/// ```
#[must_use]
pub fn round_coord(degrees: f64) -> f64 {
    to_micro(degrees) as f64 / COORD_SCALE
}

fn to_micro(degrees: f64) -> i64 {
    (degrees * COORD_SCALE).round() as i64
}

/// Canonical identity of a grid cell.
///
/// Latitude and longitude are held as integer micro-degrees (degrees x 10^6),
/// so hashing and equality never compare floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridKey {
    /// Latitude in micro-degrees.
    pub lat_e6: i64,
    /// Longitude in micro-degrees.
    pub lon_e6: i64,
}

impl GridKey {
    /// Build a key from coordinates in degrees, rounding to 6 decimals.
    ///
    /// ```
    /// use civicair_types::GridKey;
    ///
    /// let a = GridKey::from_degrees(10.0, 106.0);
    /// let b = GridKey::from_degrees(10.000_000_2, 105.999_999_9);
    /// assert_eq!(a, b);
    /// ```
    #[must_use]
    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self {
            lat_e6: to_micro(lat),
            lon_e6: to_micro(lon),
        }
    }

    /// Latitude in degrees.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.lat_e6 as f64 / COORD_SCALE
    }

    /// Longitude in degrees.
    #[must_use]
    pub fn lon(&self) -> f64 {
        self.lon_e6 as f64 / COORD_SCALE
    }
}

impl fmt::Display for GridKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat(), self.lon())
    }
}

/// A grid coordinate, already rounded to 6 decimal places.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GridPoint {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

impl GridPoint {
    /// Create a grid point, rounding both coordinates.
    #[must_use]
    pub fn new(lat: f64, lon: f64) -> Self {
        GridKey::from_degrees(lat, lon).into()
    }

    /// The canonical key for this point.
    #[must_use]
    pub fn key(&self) -> GridKey {
        GridKey::from_degrees(self.lat, self.lon)
    }
}

impl From<GridKey> for GridPoint {
    fn from(key: GridKey) -> Self {
        Self {
            lat: key.lat(),
            lon: key.lon(),
        }
    }
}

impl fmt::Display for GridPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lat, self.lon)
    }
}

/// A validated, inclusive bounding box.
///
/// Construct with [`BoundingBox::new`]; the fields are read-only so an
/// invalid box cannot be built by hand.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct BoundingBox {
    lat_min: f64,
    lon_min: f64,
    lat_max: f64,
    lon_max: f64,
}

impl BoundingBox {
    /// Validate and build a bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`BoundsError`] when a value is not finite, lies outside the
    /// valid latitude/longitude range, or when `min >= max` on either axis.
    ///
    /// ```
    /// use civicair_types::{BoundingBox, BoundsError};
    ///
    /// assert!(BoundingBox::new(10.0, 106.0, 10.02, 106.02).is_ok());
    /// assert!(matches!(
    ///     BoundingBox::new(10.0, 106.0, 10.0, 106.02),
    ///     Err(BoundsError::LatitudeOrder { .. })
    /// ));
    /// ```
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> BoundsResult<Self> {
        check_axis("lat_min", lat_min, 90.0)?;
        check_axis("lon_min", lon_min, 180.0)?;
        check_axis("lat_max", lat_max, 90.0)?;
        check_axis("lon_max", lon_max, 180.0)?;

        if lat_min >= lat_max {
            return Err(BoundsError::LatitudeOrder {
                min: lat_min,
                max: lat_max,
            });
        }
        if lon_min >= lon_max {
            return Err(BoundsError::LongitudeOrder {
                min: lon_min,
                max: lon_max,
            });
        }

        Ok(Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        })
    }

    /// Minimum latitude.
    pub fn lat_min(&self) -> f64 {
        self.lat_min
    }

    /// Minimum longitude.
    pub fn lon_min(&self) -> f64 {
        self.lon_min
    }

    /// Maximum latitude.
    pub fn lat_max(&self) -> f64 {
        self.lat_max
    }

    /// Maximum longitude.
    pub fn lon_max(&self) -> f64 {
        self.lon_max
    }

    /// South-west corner as a key (rounded to 6 decimals).
    #[must_use]
    pub fn min_key(&self) -> GridKey {
        GridKey::from_degrees(self.lat_min, self.lon_min)
    }

    /// North-east corner as a key (rounded to 6 decimals).
    #[must_use]
    pub fn max_key(&self) -> GridKey {
        GridKey::from_degrees(self.lat_max, self.lon_max)
    }

    /// Whether a key lies inside the box, comparing at 6-decimal precision.
    #[must_use]
    pub fn contains_key(&self, key: GridKey) -> bool {
        let (min, max) = (self.min_key(), self.max_key());
        (min.lat_e6..=max.lat_e6).contains(&key.lat_e6)
            && (min.lon_e6..=max.lon_e6).contains(&key.lon_e6)
    }
}

fn check_axis(field: &'static str, value: f64, limit: f64) -> BoundsResult<()> {
    if !value.is_finite() {
        return Err(BoundsError::NonFinite { field });
    }
    if !(-limit..=limit).contains(&value) {
        return Err(BoundsError::OutOfRange {
            field,
            value,
            min: -limit,
            max: limit,
        });
    }
    Ok(())
}

/// One successful reading from an upstream AQI provider.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AqiReading {
    /// Air quality index on the provider's scale (1 = best).
    pub aqi: i32,
    /// Fine particulate concentration in µg/m³, when reported.
    pub pm25: Option<f64>,
}

/// Per-coordinate result of one reconciliation pass.
///
/// `aqi == None` means the upstream fetch for this coordinate failed.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FetchOutcome {
    pub lat: f64,
    pub lon: f64,
    pub aqi: Option<i32>,
    pub pm25: Option<f64>,
}

impl FetchOutcome {
    /// Outcome for a successful fetch.
    pub fn success(point: GridPoint, reading: AqiReading) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            aqi: Some(reading.aqi),
            pm25: reading.pm25,
        }
    }

    /// Outcome for a failed fetch.
    pub fn failure(point: GridPoint) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            aqi: None,
            pm25: None,
        }
    }

    /// Whether the fetch produced a value.
    pub fn is_success(&self) -> bool {
        self.aqi.is_some()
    }

    /// The reading carried by a successful outcome.
    pub fn reading(&self) -> Option<AqiReading> {
        self.aqi.map(|aqi| AqiReading {
            aqi,
            pm25: self.pm25,
        })
    }

    /// The key this outcome belongs to.
    pub fn key(&self) -> GridKey {
        GridKey::from_degrees(self.lat, self.lon)
    }
}

/// One emitted result row.
///
/// Serializes as the JSON array `[lat, lon, aqi, pm25]`, which is the shape
/// map clients consume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AqiCell {
    pub lat: f64,
    pub lon: f64,
    pub aqi: i32,
    pub pm25: Option<f64>,
}

impl AqiCell {
    /// Build a cell for a grid point.
    pub fn new(point: GridPoint, reading: AqiReading) -> Self {
        Self {
            lat: point.lat,
            lon: point.lon,
            aqi: reading.aqi,
            pm25: reading.pm25,
        }
    }
}

#[cfg(feature = "serde")]
impl Serialize for AqiCell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.lat, self.lon, self.aqi, self.pm25).serialize(serializer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for AqiCell {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (lat, lon, aqi, pm25) = <(f64, f64, i32, Option<f64>)>::deserialize(deserializer)?;
        Ok(Self { lat, lon, aqi, pm25 })
    }
}
