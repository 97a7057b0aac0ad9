//! Geodesic AQI grid and staleness reconciliation.
//!
//! This crate turns a map viewport into a grid of air-quality readings,
//! serving cached values while they are fresh and re-fetching the rest from
//! an upstream provider in parallel.
//!
//! # Features
//!
//! - **Grid generation**: fixed-distance geodesic stepping over a bounding box
//! - **Reconciliation**: fresh, stale and missing classification with
//!   fallback to the last known value
//! - **Fan-out**: one task per upstream fetch, each with its own timeout
//! - **Background refresh**: bounded-concurrency sweep over every cached point
//! - **Test doubles**: a scriptable provider and an in-memory store
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use civicair_core::{OpenWeatherClient, ReconcileOptions, Reconciler, SharedStore};
//! use civicair_store::Store;
//! use civicair_types::BoundingBox;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = OpenWeatherClient::new(
//!         "http://api.openweathermap.org",
//!         "my-api-key",
//!         Duration::from_secs(10),
//!     )?;
//!     let store = SharedStore::new(Store::open_default()?);
//!
//!     let reconciler = Reconciler::new(
//!         Arc::new(provider),
//!         Arc::new(store),
//!         ReconcileOptions::default(),
//!     );
//!
//!     let bbox = BoundingBox::new(10.7, 106.6, 10.9, 106.8)?;
//!     let result = reconciler.reconcile(&bbox).await?;
//!     println!("{} cells", result.cells.len());
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod grid;
pub mod mock;
pub mod openweather;
pub mod reconcile;
pub mod refresh;
pub mod store;
pub mod traits;

pub use error::{Error, ProviderError, Result};
pub use grid::{GridIter, generate_grid};
pub use mock::{MemoryStore, MockProvider};
pub use openweather::OpenWeatherClient;
pub use reconcile::{
    FRESHNESS_THRESHOLD, ReconcileOptions, ReconcileStats, Reconciler, Reconciliation,
};
pub use refresh::{RefreshOptions, RefreshSummary, refresh_all};
pub use store::SharedStore;
pub use traits::{AqiProvider, PointStore};
