//! Error types for civicair-core.
//!
//! Two families of errors live here:
//!
//! - [`Error`] is returned by operations that can fail as a whole: grid
//!   generation, reconciliation setup, provider construction and store access.
//! - [`ProviderError`] describes why a single upstream fetch produced no value.
//!   The reconciler and the refresh sweep absorb these per coordinate.
//!
//! ## Propagation
//!
//! | Error | Fatal to |
//! |-------|----------|
//! | [`Error::InvalidBounds`], [`Error::InvalidStep`], [`Error::TooManyPoints`] | the request |
//! | [`Error::Configuration`] | startup |
//! | [`Error::Store`], [`Error::StoreUnavailable`] | nothing on the request path (degrades to "no cached value") |
//! | [`ProviderError`] | nothing (degrades to fallback or omission) |

use std::time::Duration;

use thiserror::Error;

use civicair_types::BoundsError;

/// Errors that can occur in civicair-core.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The bounding box failed validation.
    #[error("Invalid bounds: {0}")]
    InvalidBounds(#[from] BoundsError),

    /// The grid step is below the 1 m minimum or not a number.
    #[error("Invalid grid step: {0} km (must be a finite value of at least 0.001)")]
    InvalidStep(f64),

    /// The grid for the requested box is larger than allowed.
    #[error("Bounding box too large: grid exceeds {max} points")]
    TooManyPoints {
        /// The configured maximum.
        max: usize,
    },

    /// The provider or service is misconfigured.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persistent store failure.
    #[error("Store error: {0}")]
    Store(#[from] civicair_store::Error),

    /// The store could not be reached at all.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Why a single upstream fetch produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ProviderError {
    /// Connection or transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The fetch did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The provider answered with a non-2xx status.
    #[error("upstream returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Short, stable name of the failure kind, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Status { .. } => "status",
            Self::Malformed(_) => "malformed",
        }
    }
}

/// Result type alias using civicair-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;
