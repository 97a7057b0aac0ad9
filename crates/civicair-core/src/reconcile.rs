//! Staleness reconciliation for a bounding box.
//!
//! A reconciliation pass turns a viewport into one AQI cell per grid point:
//!
//! 1. Generate the grid; its order is the output order.
//! 2. Load cached points in the box and index them by [`GridKey`].
//! 3. Classify each grid point as fresh, stale or missing.
//! 4. Fetch every stale or missing coordinate concurrently, one task each.
//! 5. Merge: a fetched value wins, a stale point falls back to its cached
//!    value, a missing point whose fetch failed is omitted.
//! 6. Persist the fetched values.
//!
//! Steps 4 and 6 run in their own spawned task. If the caller goes away
//! mid-request, the fetched values are still written to the store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use civicair_store::{NewAqiPoint, StoredAqiPoint};
use civicair_types::{AqiCell, BoundingBox, FetchOutcome, GridKey, GridPoint};

use crate::error::{Error, ProviderError, Result};
use crate::grid::GridIter;
use crate::traits::{AqiProvider, PointStore};

/// Maximum age of a cached reading before it must be re-fetched.
pub const FRESHNESS_THRESHOLD: time::Duration = time::Duration::minutes(15);

/// Default grid step in kilometres.
pub const DEFAULT_STEP_KM: f64 = 5.0;

/// Default upper bound on grid points per request.
pub const DEFAULT_MAX_POINTS: usize = 400;

/// Default per-fetch timeout.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning for a [`Reconciler`].
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Grid step in kilometres.
    pub step_km: f64,
    /// Cached readings younger than this are used as-is.
    pub freshness: time::Duration,
    /// Upper bound on a single upstream fetch.
    pub fetch_timeout: Duration,
    /// Requests whose grid is larger than this are rejected.
    pub max_points: usize,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            step_km: DEFAULT_STEP_KM,
            freshness: FRESHNESS_THRESHOLD,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            max_points: DEFAULT_MAX_POINTS,
        }
    }
}

impl ReconcileOptions {
    /// Set the grid step.
    pub fn step_km(mut self, step_km: f64) -> Self {
        self.step_km = step_km;
        self
    }

    /// Set the per-fetch timeout.
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Set the grid size limit.
    pub fn max_points(mut self, max_points: usize) -> Self {
        self.max_points = max_points;
        self
    }
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    /// Points in the generated grid.
    pub grid_points: usize,
    /// Served from a fresh cache entry.
    pub fresh: usize,
    /// Served from a successful upstream fetch.
    pub fetched: usize,
    /// Stale, fetch failed, served the old value.
    pub fallback: usize,
    /// Missing, fetch failed, left out of the result.
    pub omitted: usize,
    /// Rows written back to the store.
    pub persisted: usize,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    /// One cell per grid point with a known value, in grid order.
    pub cells: Vec<AqiCell>,
    pub stats: ReconcileStats,
}

/// Reconciles cached AQI points against the upstream provider.
pub struct Reconciler {
    provider: Arc<dyn AqiProvider>,
    store: Arc<dyn PointStore>,
    options: ReconcileOptions,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Create a reconciler.
    pub fn new(
        provider: Arc<dyn AqiProvider>,
        store: Arc<dyn PointStore>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            provider,
            store,
            options,
        }
    }

    /// The options this reconciler was built with.
    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile a bounding box against the current time.
    pub async fn reconcile(&self, bbox: &BoundingBox) -> Result<Reconciliation> {
        self.reconcile_at(bbox, OffsetDateTime::now_utc()).await
    }

    /// Reconcile a bounding box, treating `now` as the current time.
    ///
    /// # Errors
    ///
    /// Only validation fails the call: [`Error::InvalidStep`] and
    /// [`Error::TooManyPoints`]. Provider and store failures degrade the
    /// result instead.
    pub async fn reconcile_at(
        &self,
        bbox: &BoundingBox,
        now: OffsetDateTime,
    ) -> Result<Reconciliation> {
        let grid = self.plan_grid(bbox)?;
        let cached = self.load_cached(bbox).await;
        let freshness = self.options.freshness;

        let mut queue = Vec::new();
        let mut queued = HashSet::new();
        for point in &grid {
            let key = point.key();
            match cached.get(&key) {
                Some(stored) if stored.age(now) < freshness => {
                    debug!("{} is fresh (age {})", point, stored.age(now));
                    continue;
                }
                Some(stored) => debug!("{} is stale (age {})", point, stored.age(now)),
                None => debug!("{} is missing", point),
            }
            if queued.insert(key) {
                queue.push(*point);
            }
        }

        let (outcomes, persisted) = if queue.is_empty() {
            (HashMap::new(), 0)
        } else {
            self.fetch_and_persist(queue, now).await
        };

        let mut stats = ReconcileStats {
            grid_points: grid.len(),
            persisted,
            ..Default::default()
        };
        let mut cells = Vec::with_capacity(grid.len());

        for point in &grid {
            let key = point.key();
            let stored = cached.get(&key);

            if let Some(stored) = stored.filter(|s| s.age(now) < freshness) {
                stats.fresh += 1;
                cells.push(AqiCell::new(*point, stored.reading()));
            } else if let Some(reading) = outcomes.get(&key).and_then(FetchOutcome::reading) {
                stats.fetched += 1;
                cells.push(AqiCell::new(*point, reading));
            } else if let Some(stored) = stored {
                stats.fallback += 1;
                cells.push(AqiCell::new(*point, stored.reading()));
            } else {
                stats.omitted += 1;
            }
        }

        info!(
            "Reconciled {} grid points: {} fresh, {} fetched, {} fallback, {} omitted, {} persisted",
            stats.grid_points,
            stats.fresh,
            stats.fetched,
            stats.fallback,
            stats.omitted,
            stats.persisted
        );

        Ok(Reconciliation { cells, stats })
    }

    /// Generate the grid, rejecting it before any I/O if it is too large.
    fn plan_grid(&self, bbox: &BoundingBox) -> Result<Vec<GridPoint>> {
        let max = self.options.max_points;
        let grid: Vec<GridPoint> = GridIter::new(bbox, self.options.step_km)?
            .take(max.saturating_add(1))
            .collect();

        if grid.len() > max {
            return Err(Error::TooManyPoints { max });
        }
        Ok(grid)
    }

    /// Index cached points by key. A read failure means nothing is cached.
    async fn load_cached(&self, bbox: &BoundingBox) -> HashMap<GridKey, StoredAqiPoint> {
        match self.store.find_in_bounding_box(bbox).await {
            Ok(points) => points.into_iter().map(|p| (p.key(), p)).collect(),
            Err(e) => {
                warn!("Failed to read cached AQI points, treating all as missing: {}", e);
                HashMap::new()
            }
        }
    }

    /// Fetch the queue and persist the successes in a detached task.
    async fn fetch_and_persist(
        &self,
        queue: Vec<GridPoint>,
        now: OffsetDateTime,
    ) -> (HashMap<GridKey, FetchOutcome>, usize) {
        let provider = Arc::clone(&self.provider);
        let store = Arc::clone(&self.store);
        let timeout = self.options.fetch_timeout;
        let requested = queue.len();

        let task = tokio::spawn(async move {
            let outcomes = fetch_all(provider, queue, timeout).await;
            let persisted = persist(store.as_ref(), &outcomes, now).await;
            (outcomes, persisted)
        });

        match task.await {
            Ok((outcomes, persisted)) => (
                outcomes.into_iter().map(|o| (o.key(), o)).collect(),
                persisted,
            ),
            Err(e) => {
                error!("Fetch task for {} points failed: {}", requested, e);
                (HashMap::new(), 0)
            }
        }
    }
}

/// Fetch every point concurrently, one task per point.
///
/// The result has one outcome per input point, in input order. A task that
/// panics becomes a failure for its own point only.
pub(crate) async fn fetch_all(
    provider: Arc<dyn AqiProvider>,
    points: Vec<GridPoint>,
    timeout: Duration,
) -> Vec<FetchOutcome> {
    let handles: Vec<_> = points
        .iter()
        .map(|&point| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move { fetch_one(provider.as_ref(), point, timeout).await })
        })
        .collect();

    join_all(handles)
        .await
        .into_iter()
        .zip(points)
        .map(|(joined, point)| match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("AQI fetch task for {} aborted: {}", point, e);
                FetchOutcome::failure(point)
            }
        })
        .collect()
}

/// Fetch one point with a timeout, turning every failure into a value.
pub(crate) async fn fetch_one(
    provider: &dyn AqiProvider,
    point: GridPoint,
    timeout: Duration,
) -> FetchOutcome {
    let result = match tokio::time::timeout(timeout, provider.fetch_aqi(point)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout)),
    };

    match result {
        Ok(reading) => {
            debug!("Fetched AQI {} for {}", reading.aqi, point);
            FetchOutcome::success(point, reading)
        }
        Err(e) => {
            warn!(kind = e.kind(), "AQI fetch for {} failed: {}", point, e);
            FetchOutcome::failure(point)
        }
    }
}

/// Upsert the successful outcomes. Returns the number of rows written.
pub(crate) async fn persist(
    store: &dyn PointStore,
    outcomes: &[FetchOutcome],
    at: OffsetDateTime,
) -> usize {
    let batch: Vec<NewAqiPoint> = outcomes
        .iter()
        .filter_map(|o| {
            o.reading()
                .map(|r| NewAqiPoint::from_reading(GridPoint::new(o.lat, o.lon), r, at))
        })
        .collect();

    if batch.is_empty() {
        return 0;
    }

    match store.upsert_many(&batch).await {
        Ok(written) => written,
        Err(e) => {
            error!("Failed to persist {} AQI points: {}", batch.len(), e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::generate_grid;
    use crate::mock::{MemoryStore, MockProvider};
    use civicair_types::AqiReading;

    const SCENARIO_STEP_KM: f64 = 2.0;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    fn scenario_box() -> BoundingBox {
        BoundingBox::new(10.0, 106.0, 10.02, 106.02).unwrap()
    }

    fn reading(aqi: i32, pm25: Option<f64>) -> AqiReading {
        AqiReading { aqi, pm25 }
    }

    fn setup(
        provider: MockProvider,
        options: ReconcileOptions,
    ) -> (Arc<MockProvider>, Arc<MemoryStore>, Reconciler) {
        let provider = Arc::new(provider);
        let store = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(provider.clone(), store.clone(), options);
        (provider, store, reconciler)
    }

    async fn seed(store: &MemoryStore, point: GridPoint, value: AqiReading, age: time::Duration) {
        store
            .upsert_many(&[NewAqiPoint::from_reading(point, value, now() - age)])
            .await
            .unwrap();
    }

    fn scenario_options() -> ReconcileOptions {
        ReconcileOptions::default().step_km(SCENARIO_STEP_KM)
    }

    #[tokio::test]
    async fn test_scenario_empty_store() {
        let (provider, store, reconciler) = setup(
            MockProvider::new().with_reading(reading(2, Some(15.5))),
            scenario_options(),
        );

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 4);
        assert!(result.cells.iter().all(|c| c.aqi == 2 && c.pm25 == Some(15.5)));
        assert_eq!(provider.call_count(), 4);
        assert_eq!(store.len().await, 4);
        assert_eq!(
            result.stats,
            ReconcileStats {
                grid_points: 4,
                fetched: 4,
                persisted: 4,
                ..Default::default()
            }
        );

        let stored = store.get(10.0, 106.0).await.unwrap();
        assert_eq!(stored.updated_at, now());
    }

    #[tokio::test]
    async fn test_output_follows_grid_order() {
        let bbox = BoundingBox::new(10.0, 106.0, 10.1, 106.1).unwrap();
        let (_, _, reconciler) = setup(MockProvider::new(), scenario_options());

        let grid = generate_grid(&bbox, SCENARIO_STEP_KM).unwrap();
        let result = reconciler.reconcile_at(&bbox, now()).await.unwrap();

        let emitted: Vec<_> = result.cells.iter().map(|c| (c.lat, c.lon)).collect();
        let expected: Vec<_> = grid.iter().map(|p| (p.lat, p.lon)).collect();
        assert!(expected.len() > 4);
        assert_eq!(emitted, expected);
    }

    #[tokio::test]
    async fn test_freshness_boundary() {
        let origin = GridPoint::new(10.0, 106.0);

        // Single-point grid: the box is smaller than one 5 km step
        let (provider, store, reconciler) = setup(MockProvider::new(), ReconcileOptions::default());
        seed(&store, origin, reading(3, None), time::Duration::seconds(14 * 60 + 59)).await;
        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();
        assert_eq!(provider.call_count(), 0);
        assert_eq!(result.stats.fresh, 1);
        assert_eq!(result.cells[0].aqi, 3);

        let (provider, store, reconciler) = setup(MockProvider::new(), ReconcileOptions::default());
        seed(&store, origin, reading(3, None), time::Duration::seconds(15 * 60 + 1)).await;
        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();
        assert_eq!(provider.call_count(), 1);
        assert_eq!(result.stats.fetched, 1);
        assert_eq!(result.cells[0].aqi, 1);
    }

    #[tokio::test]
    async fn test_sqlite_cache_keeps_sub_second_age() {
        use crate::store::SharedStore;
        use civicair_store::Store;

        let seeded_at = now() + time::Duration::milliseconds(900);
        let store = SharedStore::new(Store::open_in_memory().unwrap());
        store
            .upsert_many(&[NewAqiPoint::from_reading(
                GridPoint::new(10.0, 106.0),
                reading(3, None),
                seeded_at,
            )])
            .await
            .unwrap();

        let provider = Arc::new(MockProvider::new());
        let reconciler = Reconciler::new(
            provider.clone(),
            Arc::new(store),
            ReconcileOptions::default(),
        );

        let age = time::Duration::milliseconds((14 * 60 + 59) * 1000 + 500);
        let result = reconciler
            .reconcile_at(&scenario_box(), seeded_at + age)
            .await
            .unwrap();

        assert_eq!(provider.call_count(), 0);
        assert_eq!(result.stats.fresh, 1);
        assert_eq!(result.cells[0].aqi, 3);
    }

    #[tokio::test]
    async fn test_exact_threshold_is_stale() {
        let (provider, store, reconciler) = setup(MockProvider::new(), ReconcileOptions::default());
        seed(&store, GridPoint::new(10.0, 106.0), reading(3, None), FRESHNESS_THRESHOLD).await;

        reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_point_falls_back_on_failure() {
        let (_, store, reconciler) = setup(
            MockProvider::new().failing(ProviderError::Status { status: 503 }),
            ReconcileOptions::default(),
        );
        let age = time::Duration::minutes(30);
        seed(&store, GridPoint::new(10.0, 106.0), reading(3, Some(12.0)), age).await;

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 1);
        assert_eq!(result.cells[0].aqi, 3);
        assert_eq!(result.cells[0].pm25, Some(12.0));
        assert_eq!(result.stats.fallback, 1);
        assert_eq!(result.stats.persisted, 0);

        // The cached row is left untouched
        let stored = store.get(10.0, 106.0).await.unwrap();
        assert_eq!(stored.updated_at, now() - age);
    }

    #[tokio::test]
    async fn test_missing_point_is_omitted_on_failure() {
        let grid = generate_grid(&scenario_box(), SCENARIO_STEP_KM).unwrap();
        let provider = MockProvider::new();
        provider
            .fail_for(grid[1], ProviderError::Malformed("empty list".to_string()))
            .await;
        let (_, store, reconciler) = setup(provider, scenario_options());

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 3);
        assert!(!result.cells.iter().any(|c| (c.lat, c.lon) == (grid[1].lat, grid[1].lon)));
        assert_eq!(result.stats.omitted, 1);
        assert_eq!(store.len().await, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let latency = Duration::from_secs(2);
        let (provider, _, reconciler) = setup(
            MockProvider::new().with_latency(latency),
            scenario_options(),
        );

        let start = tokio::time::Instant::now();
        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(result.cells.len(), 4);
        assert_eq!(provider.peak_in_flight(), 4);
        assert!(elapsed >= latency);
        assert!(elapsed < latency * 2, "fetches were serialized: {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_fetch_times_out() {
        let (_, store, reconciler) = setup(
            MockProvider::new().with_latency(Duration::from_secs(30)),
            ReconcileOptions::default(),
        );

        let start = tokio::time::Instant::now();
        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert!(result.cells.is_empty());
        assert_eq!(result.stats.omitted, 1);
        assert!(start.elapsed() < Duration::from_secs(30));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_panicking_fetch_only_affects_its_point() {
        let grid = generate_grid(&scenario_box(), SCENARIO_STEP_KM).unwrap();
        let provider = MockProvider::new();
        provider.panic_for(grid[2]).await;
        let (_, _, reconciler) = setup(provider, scenario_options());

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 3);
        assert_eq!(result.stats.omitted, 1);
    }

    #[tokio::test]
    async fn test_store_read_failure_fetches_everything() {
        let (provider, store, reconciler) = setup(MockProvider::new(), scenario_options());
        seed(&store, GridPoint::new(10.0, 106.0), reading(5, None), time::Duration::ZERO).await;
        store.set_fail_reads(true);

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 4);
        assert_eq!(provider.call_count(), 4);
        assert_eq!(result.stats.fresh, 0);
    }

    #[tokio::test]
    async fn test_store_write_failure_keeps_response() {
        let (_, store, reconciler) = setup(MockProvider::new(), scenario_options());
        store.set_fail_writes(true);

        let result = reconciler.reconcile_at(&scenario_box(), now()).await.unwrap();

        assert_eq!(result.cells.len(), 4);
        assert_eq!(result.stats.persisted, 0);
        assert_eq!(store.upsert_calls(), 1);
    }

    #[tokio::test]
    async fn test_too_many_points_rejected_before_io() {
        let (provider, store, reconciler) =
            setup(MockProvider::new(), scenario_options().max_points(3));

        let err = reconciler
            .reconcile_at(&scenario_box(), now())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TooManyPoints { max: 3 }));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_step_rejected() {
        let (_, _, reconciler) = setup(MockProvider::new(), ReconcileOptions::default().step_km(0.0));
        let err = reconciler
            .reconcile_at(&scenario_box(), now())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStep(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_request_still_persists() {
        let (_, store, reconciler) = setup(
            MockProvider::new().with_latency(Duration::from_secs(5)),
            scenario_options(),
        );
        let bbox = scenario_box();

        // Caller gives up before the fetches finish
        let abandoned =
            tokio::time::timeout(Duration::from_secs(1), reconciler.reconcile_at(&bbox, now()))
                .await;
        assert!(abandoned.is_err());
        assert!(store.is_empty().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.len().await, 4);
    }
}
