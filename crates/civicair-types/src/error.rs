//! Validation errors for civicair value types.

use thiserror::Error;

/// Reasons a bounding box is rejected.
///
/// Every variant names the constraint that was violated so the message can be
/// returned to API callers as-is.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new checks
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum BoundsError {
    /// A coordinate was NaN or infinite.
    #[error("{field} must be a finite number")]
    NonFinite {
        /// The offending field name (e.g. `lat_min`).
        field: &'static str,
    },

    /// A coordinate lies outside the valid range for its axis.
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        /// The offending field name.
        field: &'static str,
        /// The value that was provided.
        value: f64,
        /// Lower bound of the valid range.
        min: f64,
        /// Upper bound of the valid range.
        max: f64,
    },

    /// `lat_min` was not strictly less than `lat_max`.
    #[error("lat_min must be less than lat_max (got {min} >= {max})")]
    LatitudeOrder {
        /// Provided `lat_min`.
        min: f64,
        /// Provided `lat_max`.
        max: f64,
    },

    /// `lon_min` was not strictly less than `lon_max`.
    #[error("lon_min must be less than lon_max (got {min} >= {max})")]
    LongitudeOrder {
        /// Provided `lon_min`.
        min: f64,
        /// Provided `lon_max`.
        max: f64,
    },
}

/// Result type alias using civicair-types' [`BoundsError`].
pub type BoundsResult<T> = std::result::Result<T, BoundsError>;
