//! Transient display handles for blobs.
//!
//! A UI shows an image through a short-lived URL rather than the raw bytes.
//! The store does not track how long a handle is displayed, so every handle
//! acquired here must be released explicitly; [`HandleRegistry::live_count`]
//! makes leaks visible.

use std::collections::HashMap;
use std::sync::Mutex;

use tome_types::{BlobId, BlobRecord};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::ContentStore;

/// A revocable URL standing in for one blob while it is on screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayHandle {
    pub url: String,
    pub blob_id: BlobId,
    pub mime: String,
}

/// Issues and revokes [`DisplayHandle`]s.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    live: Mutex<HashMap<String, BlobRecord>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `id` through `store` and issue a handle for it.
    ///
    /// Returns `Ok(None)` when the blob does not exist.
    pub async fn acquire(
        &self,
        store: &dyn ContentStore,
        id: &BlobId,
    ) -> StoreResult<Option<DisplayHandle>> {
        let Some(record) = store.get(id).await? else {
            return Ok(None);
        };
        let url = format!("blob:tome/{}", uuid::Uuid::now_v7());
        let handle = DisplayHandle {
            url: url.clone(),
            blob_id: id.clone(),
            mime: record.mime.clone(),
        };
        self.live
            .lock()
            .map_err(StoreError::poisoned)?
            .insert(url, record);
        debug!(blob_id = %id, url = %handle.url, "display handle acquired");
        Ok(Some(handle))
    }

    /// The payload behind a live handle URL.
    pub fn resolve(&self, url: &str) -> Option<BlobRecord> {
        self.live.lock().ok()?.get(url).cloned()
    }

    /// Revoke a handle. Releasing twice is harmless.
    pub fn release(&self, handle: &DisplayHandle) {
        if let Ok(mut live) = self.live.lock() {
            live.remove(&handle.url);
        }
    }

    /// Revoke every handle (e.g. before a full reload).
    pub fn release_all(&self) {
        if let Ok(mut live) = self.live.lock() {
            live.clear();
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().map(|l| l.len()).unwrap_or(0)
    }
}
