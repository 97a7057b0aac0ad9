//! Value types for the civicair AQI grid.
//!
//! This crate holds the plain data shared by the store, the reconciler and the
//! HTTP service:
//!
//! - [`GridKey`]: fixed-point coordinate identity (micro-degrees)
//! - [`GridPoint`]: a coordinate rounded to 6 decimal places
//! - [`BoundingBox`]: a validated, inclusive viewport
//! - [`AqiReading`], [`FetchOutcome`] and [`AqiCell`]: readings as they move
//!   from the upstream provider to the API response
//!
//! # Example
//!
//! ```
//! use civicair_types::{BoundingBox, GridPoint};
//!
//! let bbox = BoundingBox::new(10.0, 106.0, 10.02, 106.02)?;
//! let point = GridPoint::new(10.000_000_1, 106.0);
//! assert!(bbox.contains_key(point.key()));
//! # Ok::<(), civicair_types::BoundsError>(())
//! ```

pub mod error;
pub mod types;

pub use error::{BoundsError, BoundsResult};
pub use types::{
    AqiCell, AqiReading, BoundingBox, COORD_PRECISION, COORD_SCALE, FetchOutcome, GridKey,
    GridPoint, round_coord,
};
