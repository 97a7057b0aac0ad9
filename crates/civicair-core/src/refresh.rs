//! Background refresh of every cached point.
//!
//! A sweep re-fetches each stored coordinate with bounded concurrency and
//! writes the successes back. Points whose fetch fails keep their old value;
//! the next request for them falls back to it.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{info, warn};

use civicair_types::FetchOutcome;

use crate::error::Result;
use crate::reconcile::{DEFAULT_FETCH_TIMEOUT, fetch_one, persist};
use crate::traits::{AqiProvider, PointStore};

/// Default number of concurrent fetches during a sweep.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Tuning for [`refresh_all`].
#[derive(Debug, Clone)]
pub struct RefreshOptions {
    /// Maximum fetches in flight at once.
    pub concurrency: usize,
    /// Upper bound on a single upstream fetch.
    pub fetch_timeout: Duration,
}

impl Default for RefreshOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

/// What a sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshSummary {
    /// Points found in the store.
    pub total: usize,
    /// Points with a successful fetch.
    pub updated: usize,
    /// Points whose fetch failed.
    pub failed: usize,
    /// Rows written back.
    pub persisted: usize,
}

/// Re-fetch every stored point and write the new values.
///
/// # Errors
///
/// Fails only if the stored points cannot be listed. Per-point failures are
/// logged and counted in the summary.
pub async fn refresh_all(
    provider: Arc<dyn AqiProvider>,
    store: Arc<dyn PointStore>,
    options: &RefreshOptions,
) -> Result<RefreshSummary> {
    let points = store.list_all().await?;
    let total = points.len();
    if total == 0 {
        info!("Refresh sweep: no cached points");
        return Ok(RefreshSummary::default());
    }

    let timeout = options.fetch_timeout;
    let outcomes: Vec<FetchOutcome> = stream::iter(points)
        .map(|stored| {
            let provider = Arc::clone(&provider);
            async move { fetch_one(provider.as_ref(), stored.point(), timeout).await }
        })
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    let updated = outcomes.iter().filter(|o| o.is_success()).count();
    let failed = total - updated;
    let persisted = persist(store.as_ref(), &outcomes, OffsetDateTime::now_utc()).await;

    if failed > 0 {
        warn!("Refresh sweep: {} of {} fetches failed", failed, total);
    }
    info!(
        "Refresh sweep: {} points, {} updated, {} failed, {} persisted",
        total, updated, failed, persisted
    );

    Ok(RefreshSummary {
        total,
        updated,
        failed,
        persisted,
    })
}
