//! Application state shared across handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{RwLock, watch};

use civicair_core::{AqiProvider, Reconciler, RefreshSummary, SharedStore};
use civicair_store::Store;

use crate::config::Config;

/// Shared application state.
pub struct AppState {
    /// The point cache, shared with the reconciler and the refresher.
    pub store: SharedStore,
    /// Configuration (RwLock for runtime updates).
    pub config: RwLock<Config>,
    /// Upstream AQI provider.
    pub provider: Arc<dyn AqiProvider>,
    /// Request-path reconciler.
    pub reconciler: Reconciler,
    /// Refresher control state.
    pub refresher: RefresherState,
}

impl AppState {
    /// Create new application state.
    ///
    /// The reconciler is built from the grid and provider sections of
    /// `config`.
    pub fn new(store: Store, config: Config, provider: Arc<dyn AqiProvider>) -> Arc<Self> {
        let store = SharedStore::new(store);
        let reconciler = Reconciler::new(
            Arc::clone(&provider),
            Arc::new(store.clone()),
            config.reconcile_options(),
        );

        Arc::new(Self {
            store,
            config: RwLock::new(config),
            provider,
            reconciler,
            refresher: RefresherState::new(),
        })
    }
}

/// State for tracking and controlling the background refresher.
///
/// Each start captures the current stop generation; a stop bumps it. A loop
/// exits as soon as the generation it captured is no longer current, so a
/// quick stop-then-start never leaves two loops running.
pub struct RefresherState {
    /// Whether the refresher is currently running.
    running: AtomicBool,
    /// When the refresher was started (Unix timestamp).
    started_at: AtomicU64,
    /// Stop generation, bumped on every stop.
    stop_tx: watch::Sender<u64>,
    /// Sweeps in a row that could not list the store.
    consecutive_failures: AtomicU32,
    /// Outcome of the most recent sweep.
    last_run: RwLock<Option<RefreshRun>>,
}

impl RefresherState {
    /// Create a new refresher state.
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(0);
        Self {
            running: AtomicBool::new(false),
            started_at: AtomicU64::new(0),
            stop_tx,
            consecutive_failures: AtomicU32::new(0),
            last_run: RwLock::new(None),
        }
    }

    /// Check if the refresher is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Mark the refresher as started.
    ///
    /// Returns `false` if it was already running.
    pub fn try_start(&self) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        let now = OffsetDateTime::now_utc().unix_timestamp() as u64;
        self.started_at.store(now, Ordering::SeqCst);
        true
    }

    /// Get the refresher start time.
    pub fn started_at(&self) -> Option<OffsetDateTime> {
        if !self.is_running() {
            return None;
        }
        let ts = self.started_at.load(Ordering::SeqCst);
        if ts == 0 {
            None
        } else {
            OffsetDateTime::from_unix_timestamp(ts as i64).ok()
        }
    }

    /// Get a receiver for the stop signal.
    pub fn subscribe_stop(&self) -> watch::Receiver<u64> {
        self.stop_tx.subscribe()
    }

    /// Signal the running loop to stop.
    ///
    /// Returns `false` if the refresher was not running.
    pub fn signal_stop(&self) -> bool {
        self.stop_tx.send_modify(|generation| *generation += 1);
        self.running.swap(false, Ordering::SeqCst)
    }

    /// Record a completed sweep.
    pub async fn record_success(&self, summary: RefreshSummary) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.last_run.write().await = Some(RefreshRun {
            finished_at: OffsetDateTime::now_utc(),
            summary: Some(summary),
            error: None,
        });
    }

    /// Record a failed sweep. Returns the number of failures in a row.
    pub async fn record_failure(&self, error: String) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_run.write().await = Some(RefreshRun {
            finished_at: OffsetDateTime::now_utc(),
            summary: None,
            error: Some(error),
        });
        failures
    }

    /// Sweeps in a row that failed.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Outcome of the most recent sweep.
    pub async fn last_run(&self) -> Option<RefreshRun> {
        self.last_run.read().await.clone()
    }
}

impl Default for RefresherState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one refresh sweep.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRun {
    /// When the sweep finished.
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// Counters, if the sweep ran.
    pub summary: Option<RefreshSummary>,
    /// Why the sweep could not run.
    pub error: Option<String>,
}
