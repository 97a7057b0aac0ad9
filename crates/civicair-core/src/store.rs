//! [`PointStore`] implementation over the SQLite store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use civicair_store::{NewAqiPoint, Store, StoredAqiPoint};
use civicair_types::BoundingBox;

use crate::error::Result;
use crate::traits::PointStore;

/// A [`Store`] shared between the request path and background tasks.
///
/// SQLite calls are short, so they run directly under the async mutex.
/// Cloning is cheap and every clone refers to the same connection.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    /// Wrap an open store.
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Lock the underlying store for queries not covered by [`PointStore`].
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.inner.lock().await
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl PointStore for SharedStore {
    async fn find_in_bounding_box(&self, bbox: &BoundingBox) -> Result<Vec<StoredAqiPoint>> {
        Ok(self.inner.lock().await.find_in_bounding_box(bbox)?)
    }

    async fn upsert_many(&self, points: &[NewAqiPoint]) -> Result<usize> {
        Ok(self.inner.lock().await.upsert_many(points)?)
    }

    async fn list_all(&self) -> Result<Vec<StoredAqiPoint>> {
        Ok(self.inner.lock().await.list_all()?)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.lock().await.count_points()?)
    }
}
