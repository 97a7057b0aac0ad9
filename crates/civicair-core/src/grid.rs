//! Geodesic grid generation over a bounding box.
//!
//! Points are laid out row by row, south to north. Each row starts at
//! `lon_min` and steps east by a fixed geodesic distance on the WGS84
//! ellipsoid until the next longitude would leave the box. The next row starts
//! one step north of the current row's start.
//!
//! Every point is rounded to 6 decimal places before it is emitted, and all
//! box comparisons use the rounded value, so a point that rounds onto an edge
//! is kept.
//!
//! A row holds its starting latitude. The eastward step only determines the
//! next longitude, so rows stay on their parallel instead of drifting toward
//! the equator along the great circle.
//!
//! # Example
//!
//! ```
//! use civicair_core::grid::generate_grid;
//! use civicair_types::BoundingBox;
//!
//! let bbox = BoundingBox::new(10.0, 106.0, 10.02, 106.02).unwrap();
//! let points = generate_grid(&bbox, 2.0)?;
//!
//! assert_eq!(points.len(), 4);
//! assert_eq!((points[0].lat, points[0].lon), (10.0, 106.0));
//! # Ok::<(), civicair_core::Error>(())
//! ```

use geo::{Destination, Geodesic, Point};

use civicair_types::{BoundingBox, GridKey, GridPoint};

use crate::error::{Error, Result};

/// Smallest accepted step (1 m).
///
/// Coordinates are keyed at 1e-6 degrees (about 0.11 m), so a shorter step
/// could land on the same key twice.
pub const MIN_STEP_KM: f64 = 0.001;

/// Compass bearing for eastward steps, in degrees.
const BEARING_EAST: f64 = 90.0;
/// Compass bearing for northward steps, in degrees.
const BEARING_NORTH: f64 = 0.0;

/// Generate the full grid for a bounding box.
///
/// Returns [`Error::InvalidStep`] if `step_km` is not finite or is below
/// [`MIN_STEP_KM`].
/// The result can be arbitrarily large for a big box and a small step; use
/// [`GridIter`] with [`Iterator::take`] to cap it.
pub fn generate_grid(bbox: &BoundingBox, step_km: f64) -> Result<Vec<GridPoint>> {
    Ok(GridIter::new(bbox, step_km)?.collect())
}

/// Lazy iterator over the grid points of a bounding box.
///
/// Cloning a fresh iterator restarts the sequence; the walk is deterministic
/// for the same box and step.
#[derive(Debug, Clone)]
pub struct GridIter {
    lon_min: f64,
    max: GridKey,
    step_m: f64,
    /// Latitude of the row currently being walked (unrounded).
    row_lat: f64,
    /// Next point to emit, or `None` once the grid is exhausted.
    cursor: Option<Point<f64>>,
}

impl GridIter {
    /// Start a walk at `(lat_min, lon_min)` with the given step.
    pub fn new(bbox: &BoundingBox, step_km: f64) -> Result<Self> {
        if !step_km.is_finite() || step_km < MIN_STEP_KM {
            return Err(Error::InvalidStep(step_km));
        }

        Ok(Self {
            lon_min: bbox.lon_min(),
            max: bbox.max_key(),
            step_m: step_km * 1000.0,
            row_lat: bbox.lat_min(),
            cursor: Some(Point::new(bbox.lon_min(), bbox.lat_min())),
        })
    }

    /// Move the cursor past `current`: one step east, or to the next row.
    fn advance(&mut self, current: Point<f64>) {
        let east = Geodesic::destination(current, BEARING_EAST, self.step_m);
        let next_lon = east.x();

        // A step across the antimeridian wraps to a smaller longitude
        if next_lon > current.x()
            && GridKey::from_degrees(self.row_lat, next_lon).lon_e6 <= self.max.lon_e6
        {
            self.cursor = Some(Point::new(next_lon, self.row_lat));
            return;
        }

        let row_start = Point::new(self.lon_min, self.row_lat);
        let north = Geodesic::destination(row_start, BEARING_NORTH, self.step_m);
        let next_lat = north.y();

        // Past the pole the latitude starts decreasing again
        if next_lat > self.row_lat
            && GridKey::from_degrees(next_lat, self.lon_min).lat_e6 <= self.max.lat_e6
        {
            self.row_lat = next_lat;
            self.cursor = Some(Point::new(self.lon_min, next_lat));
        } else {
            self.cursor = None;
        }
    }
}

impl Iterator for GridIter {
    type Item = GridPoint;

    fn next(&mut self) -> Option<GridPoint> {
        let current = self.cursor?;
        self.advance(current);
        Some(GridPoint::new(current.y(), current.x()))
    }
}

impl std::iter::FusedIterator for GridIter {}
