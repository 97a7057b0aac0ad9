//! Trait abstractions for the reconciler's collaborators.
//!
//! [`AqiProvider`] abstracts over the upstream AQI source and [`PointStore`]
//! over the point cache, so the reconciler and the refresh sweep work the same
//! against real services and the mocks in [`crate::mock`].

use async_trait::async_trait;

use civicair_store::{NewAqiPoint, StoredAqiPoint};
use civicair_types::{AqiReading, BoundingBox, GridPoint};

use crate::error::{ProviderError, Result};

/// An upstream source of AQI readings.
///
/// # Example
///
/// ```ignore
/// use civicair_core::AqiProvider;
/// use civicair_types::GridPoint;
///
/// async fn print_aqi<P: AqiProvider>(provider: &P) {
///     match provider.fetch_aqi(GridPoint::new(10.0, 106.0)).await {
///         Ok(reading) => println!("AQI: {}", reading.aqi),
///         Err(e) => println!("no value: {}", e),
///     }
/// }
/// ```
#[async_trait]
pub trait AqiProvider: Send + Sync {
    /// Fetch the current reading for one coordinate.
    ///
    /// Implementations must bound their own latency; callers additionally
    /// wrap each call in a timeout.
    async fn fetch_aqi(&self, point: GridPoint) -> std::result::Result<AqiReading, ProviderError>;

    /// Human-readable provider name for logs and diagnostics.
    fn name(&self) -> &str;
}

/// Persistent cache of AQI points keyed by rounded coordinate.
#[async_trait]
pub trait PointStore: Send + Sync {
    /// All stored points inside the inclusive box, in no particular order.
    async fn find_in_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<StoredAqiPoint>>;

    /// Insert or update each point. Returns the number of rows written.
    ///
    /// Rows fail independently; a row failure is not an error of the batch.
    async fn upsert_many(&self, points: &[NewAqiPoint]) -> Result<usize>;

    /// Every stored point.
    async fn list_all(&self) -> Result<Vec<StoredAqiPoint>>;

    /// Number of stored points.
    async fn count(&self) -> Result<u64>;
}
