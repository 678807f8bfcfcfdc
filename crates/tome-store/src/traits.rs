use std::collections::BTreeMap;

use async_trait::async_trait;
use tome_types::{BlobId, BlobRecord, TextKey};

use crate::error::StoreResult;

/// Store of immutable binary blobs.
///
/// All implementations must satisfy these invariants:
/// - `put` generates a fresh id and never overwrites an existing record.
/// - `delete` is idempotent: deleting a missing id is not an error.
/// - A failed `put` leaves nothing behind that a caller could reference.
/// - No reference counting: orphaned records stay until someone deletes them.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store a payload and return its newly generated id.
    async fn put(&self, record: BlobRecord) -> StoreResult<BlobId>;

    /// Read a blob. Returns `Ok(None)` if it does not exist.
    async fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>>;

    async fn delete(&self, id: &BlobId) -> StoreResult<()>;

    /// Remove every blob.
    async fn clear_all(&self) -> StoreResult<()>;

    /// Ids of every stored blob, sorted.
    async fn ids(&self) -> StoreResult<Vec<BlobId>>;

    async fn contains(&self, id: &BlobId) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }
}

/// Store of large text fields keyed by caller-chosen keys.
///
/// Keys are supplied by the caller so that an import can restore the exact
/// keys a bundle was exported with.
#[async_trait]
pub trait TextStore: Send + Sync {
    /// Create or replace the text under `key`.
    async fn put(&self, key: &TextKey, content: &str) -> StoreResult<()>;

    async fn get(&self, key: &TextKey) -> StoreResult<Option<String>>;

    /// Idempotent delete.
    async fn delete(&self, key: &TextKey) -> StoreResult<()>;

    async fn clear_all(&self) -> StoreResult<()>;

    /// Every record, for export.
    async fn get_all(&self) -> StoreResult<BTreeMap<TextKey, String>>;

    /// Store under a generated key and return it.
    async fn put_new(&self, content: &str) -> StoreResult<TextKey> {
        let key = TextKey::generate();
        self.put(&key, content).await?;
        Ok(key)
    }
}

/// Synchronous single-document store for the serialized application state.
pub trait SnapshotStore: Send + Sync {
    /// The last written document, if any.
    fn read(&self) -> StoreResult<Option<String>>;

    /// Replace the document.
    fn write(&self, document: &str) -> StoreResult<()>;

    fn clear(&self) -> StoreResult<()>;
}
