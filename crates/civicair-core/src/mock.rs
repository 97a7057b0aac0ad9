//! Mock provider and in-memory store for testing.
//!
//! [`MockProvider`] implements [`AqiProvider`] and [`MemoryStore`] implements
//! [`PointStore`], so the reconciler and the refresh sweep can be exercised
//! without network access or SQLite.
//!
//! # Features
//!
//! - **Failure injection**: fail every fetch, or script a failure per coordinate
//! - **Latency simulation**: delay each fetch (works with tokio's paused clock)
//! - **Concurrency tracking**: record the peak number of in-flight fetches
//! - **Store outages**: make reads or writes of the memory store fail

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use civicair_store::{NewAqiPoint, StoredAqiPoint};
use civicair_types::{AqiReading, BoundingBox, GridKey, GridPoint};

use crate::error::{Error, ProviderError, Result};
use crate::traits::{AqiProvider, PointStore};

/// A scriptable AQI provider.
///
/// # Example
///
/// ```
/// use civicair_core::{AqiProvider, MockProvider};
/// use civicair_types::{AqiReading, GridPoint};
///
/// #[tokio::main]
/// async fn main() {
///     let provider = MockProvider::new().with_reading(AqiReading { aqi: 2, pm25: Some(15.5) });
///     let reading = provider.fetch_aqi(GridPoint::new(10.0, 106.0)).await.unwrap();
///     assert_eq!(reading.aqi, 2);
///     assert_eq!(provider.call_count(), 1);
/// }
/// ```
pub struct MockProvider {
    default_reading: RwLock<AqiReading>,
    scripted: RwLock<HashMap<GridKey, std::result::Result<AqiReading, ProviderError>>>,
    panics: RwLock<HashSet<GridKey>>,
    should_fail: AtomicBool,
    failure: RwLock<ProviderError>,
    /// Simulated fetch latency in milliseconds (0 = no delay).
    latency_ms: AtomicU64,
    call_count: AtomicU32,
    calls: Mutex<Vec<GridKey>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("should_fail", &self.should_fail.load(Ordering::Relaxed))
            .field("latency_ms", &self.latency_ms.load(Ordering::Relaxed))
            .field("call_count", &self.call_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProvider {
    /// Create a provider that answers every coordinate with AQI 1.
    pub fn new() -> Self {
        Self {
            default_reading: RwLock::new(AqiReading {
                aqi: 1,
                pm25: Some(5.0),
            }),
            scripted: RwLock::new(HashMap::new()),
            panics: RwLock::new(HashSet::new()),
            should_fail: AtomicBool::new(false),
            failure: RwLock::new(ProviderError::Transport("mock failure".to_string())),
            latency_ms: AtomicU64::new(0),
            call_count: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every unscripted coordinate with this reading.
    pub fn with_reading(mut self, reading: AqiReading) -> Self {
        *self.default_reading.get_mut() = reading;
        self
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(self, latency: Duration) -> Self {
        self.set_latency(latency);
        self
    }

    /// Fail every unscripted fetch with `error`.
    pub fn failing(mut self, error: ProviderError) -> Self {
        *self.failure.get_mut() = error;
        self.should_fail.store(true, Ordering::Relaxed);
        self
    }

    /// Set whether unscripted fetches fail.
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::Relaxed);
    }

    /// Set the simulated latency.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Answer a specific coordinate with a specific reading.
    pub async fn set_reading_for(&self, point: GridPoint, reading: AqiReading) {
        self.scripted.write().await.insert(point.key(), Ok(reading));
    }

    /// Fail a specific coordinate with a specific error.
    pub async fn fail_for(&self, point: GridPoint, error: ProviderError) {
        self.scripted.write().await.insert(point.key(), Err(error));
    }

    /// Panic while fetching a specific coordinate.
    pub async fn panic_for(&self, point: GridPoint) {
        self.panics.write().await.insert(point.key());
    }

    /// Number of fetches started.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Coordinates fetched so far, in call order.
    pub async fn calls(&self) -> Vec<GridKey> {
        self.calls.lock().await.clone()
    }

    /// Highest number of fetches that were in flight at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// Decrements the in-flight counter even when the fetch is cancelled.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[async_trait]
impl AqiProvider for MockProvider {
    async fn fetch_aqi(&self, point: GridPoint) -> std::result::Result<AqiReading, ProviderError> {
        let key = point.key();
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.calls.lock().await.push(key);

        let now = self.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        let _guard = InFlight(&self.in_flight);
        self.peak_in_flight.fetch_max(now, Ordering::Relaxed);

        let latency = self.latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.panics.read().await.contains(&key) {
            panic!("mock provider panic at {}", key);
        }

        if let Some(scripted) = self.scripted.read().await.get(&key) {
            return scripted.clone();
        }

        if self.should_fail.load(Ordering::Relaxed) {
            Err(self.failure.read().await.clone())
        } else {
            Ok(*self.default_reading.read().await)
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// An in-memory [`PointStore`] with the same keying rules as the SQLite store.
pub struct MemoryStore {
    points: Mutex<HashMap<GridKey, StoredAqiPoint>>,
    next_id: AtomicI64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    upsert_calls: AtomicU32,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("fail_reads", &self.fail_reads.load(Ordering::Relaxed))
            .field("fail_writes", &self.fail_writes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            points: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            upsert_calls: AtomicU32::new(0),
        }
    }

    /// Make reads fail.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Make writes fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Number of `upsert_many` calls, including failed ones.
    pub fn upsert_calls(&self) -> u32 {
        self.upsert_calls.load(Ordering::Relaxed)
    }

    /// Get the point stored for a coordinate.
    pub async fn get(&self, lat: f64, lon: f64) -> Option<StoredAqiPoint> {
        self.points
            .lock()
            .await
            .get(&GridKey::from_degrees(lat, lon))
            .cloned()
    }

    /// Number of stored points.
    pub async fn len(&self) -> usize {
        self.points.lock().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.points.lock().await.is_empty()
    }

    fn check_reads(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::Relaxed) {
            Err(Error::StoreUnavailable("mock read failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PointStore for MemoryStore {
    async fn find_in_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<StoredAqiPoint>> {
        self.check_reads()?;
        Ok(self
            .points
            .lock()
            .await
            .iter()
            .filter(|(key, _)| bbox.contains_key(**key))
            .map(|(_, point)| point.clone())
            .collect())
    }

    async fn upsert_many(&self, points: &[NewAqiPoint]) -> Result<usize> {
        self.upsert_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(Error::StoreUnavailable("mock write failure".to_string()));
        }

        let mut stored = self.points.lock().await;
        let mut written = 0;
        for point in points {
            let valid = point.lat.is_finite()
                && point.lon.is_finite()
                && (-90.0..=90.0).contains(&point.lat)
                && (-180.0..=180.0).contains(&point.lon);
            if !valid {
                continue;
            }

            let key = point.key();
            let id = match stored.get(&key) {
                Some(existing) => existing.id,
                None => self.next_id.fetch_add(1, Ordering::Relaxed),
            };
            stored.insert(
                key,
                StoredAqiPoint {
                    id,
                    lat: key.lat(),
                    lon: key.lon(),
                    aqi: point.aqi,
                    pm25: point.pm25,
                    updated_at: point.updated_at,
                },
            );
            written += 1;
        }
        Ok(written)
    }

    async fn list_all(&self) -> Result<Vec<StoredAqiPoint>> {
        self.check_reads()?;
        let mut points: Vec<_> = self.points.lock().await.values().cloned().collect();
        points.sort_by_key(|p| (p.updated_at, p.id));
        Ok(points)
    }

    async fn count(&self) -> Result<u64> {
        self.check_reads()?;
        Ok(self.points.lock().await.len() as u64)
    }
}
