//! Background refresh of cached AQI points.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info, warn};

use civicair_core::{RefreshOptions, refresh_all};

use crate::state::AppState;

/// Periodically re-fetches every cached point.
///
/// Sweeps run one after another in a single task, so at most one is ever in
/// flight. The first sweep happens one interval after start.
pub struct Refresher {
    state: Arc<AppState>,
}

impl Refresher {
    /// Create a new refresher.
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Start the refresh loop in the background.
    ///
    /// Returns `false` without doing anything if it is already running.
    pub async fn start(&self) -> bool {
        if !self.state.refresher.try_start() {
            return false;
        }

        let (period, options) = {
            let config = self.state.config.read().await;
            (config.refresh.interval(), config.refresh_options())
        };

        info!(
            "Starting refresher (interval: {}s, concurrency: {})",
            period.as_secs(),
            options.concurrency
        );

        // Capture the generation now so a stop issued before the task is
        // polled still reaches it
        let mut stop_rx = self.state.refresher.subscribe_stop();
        let generation = *stop_rx.borrow_and_update();

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            run(state, stop_rx, generation, period, options).await;
        });
        true
    }

    /// Signal the refresh loop to stop after its current sweep.
    ///
    /// Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        self.state.refresher.signal_stop()
    }
}

async fn run(
    state: Arc<AppState>,
    mut stop_rx: watch::Receiver<u64>,
    generation: u64,
    period: Duration,
    options: RefreshOptions,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow_and_update() != generation {
                    break;
                }
                continue;
            }
        }

        sweep(&state, &options).await;

        if *stop_rx.borrow() != generation {
            break;
        }
    }

    info!("Refresher stopped");
}

/// Run one sweep and record its outcome.
async fn sweep(state: &AppState, options: &RefreshOptions) {
    let store = Arc::new(state.store.clone());
    match refresh_all(Arc::clone(&state.provider), store, options).await {
        Ok(summary) => state.refresher.record_success(summary).await,
        Err(e) => {
            let failures = state.refresher.record_failure(e.to_string()).await;
            if failures <= 3 {
                warn!("Refresh sweep failed: {} (attempt {})", e, failures);
            } else if failures == 4 {
                error!(
                    "Refresh sweep failed {} times in a row, will keep retrying silently",
                    failures
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use civicair_core::MockProvider;
    use civicair_store::{NewAqiPoint, Store};
    use civicair_types::{AqiReading, GridPoint};
    use time::OffsetDateTime;

    use crate::config::Config;

    fn state_with_point(provider: Arc<MockProvider>) -> Arc<AppState> {
        let store = Store::open_in_memory().unwrap();
        store
            .upsert_many(&[NewAqiPoint::from_reading(
                GridPoint::new(10.0, 106.0),
                AqiReading { aqi: 1, pm25: None },
                OffsetDateTime::now_utc() - time::Duration::hours(1),
            )])
            .unwrap();

        let mut config = Config::default();
        config.refresh.interval_secs = 60;
        AppState::new(store, config, provider)
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_sweeps_on_interval() {
        let provider = Arc::new(MockProvider::new().with_reading(AqiReading {
            aqi: 5,
            pm25: Some(80.0),
        }));
        let state = state_with_point(provider.clone());
        let refresher = Refresher::new(Arc::clone(&state));

        assert!(refresher.start().await);
        assert!(!refresher.start().await);

        // Nothing happens before the first interval elapses
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.call_count(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(provider.call_count(), 1);

        let run = state.refresher.last_run().await.unwrap();
        assert_eq!(run.summary.unwrap().updated, 1);
        let stored = state.store.lock().await.get_point(10.0, 106.0).unwrap().unwrap();
        assert_eq!(stored.aqi, 5);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresher_stops() {
        let provider = Arc::new(MockProvider::new());
        let state = state_with_point(provider.clone());
        let refresher = Refresher::new(Arc::clone(&state));

        refresher.start().await;
        assert!(refresher.stop());
        assert!(!state.refresher.is_running());

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_runs_single_loop() {
        let provider = Arc::new(MockProvider::new());
        let state = state_with_point(provider.clone());
        let refresher = Refresher::new(Arc::clone(&state));

        refresher.start().await;
        refresher.stop();
        refresher.start().await;

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(provider.call_count(), 1);
    }
}
