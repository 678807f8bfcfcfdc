//! In-memory backends for tests and embedding.
//!
//! Each store can be given a byte capacity (writes beyond it fail with
//! [`StoreError::QuotaExceeded`]) and can be switched offline (every call
//! fails with [`StoreError::BackendUnavailable`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tome_types::{BlobId, BlobRecord, TextKey};

use crate::error::{StoreError, StoreResult};
use crate::traits::{ContentStore, SnapshotStore, TextStore};

fn check_online(online: &AtomicBool, name: &str) -> StoreResult<()> {
    if online.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(StoreError::BackendUnavailable(format!("{name} is offline")))
    }
}

fn check_capacity(capacity: Option<usize>, used: usize, incoming: usize) -> StoreResult<()> {
    match capacity {
        Some(cap) if used + incoming > cap => Err(StoreError::QuotaExceeded(format!(
            "{incoming} bytes requested, {} of {cap} available",
            cap.saturating_sub(used)
        ))),
        _ => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// `HashMap`-based blob store.
pub struct InMemoryContentStore {
    blobs: RwLock<HashMap<BlobId, BlobRecord>>,
    capacity: Option<usize>,
    online: AtomicBool,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            capacity: None,
            online: AtomicBool::new(true),
        }
    }

    /// A store that rejects writes once `bytes` of payload are held.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total payload bytes held.
    pub fn total_bytes(&self) -> usize {
        self.blobs
            .read()
            .map(|m| m.values().map(BlobRecord::len).sum())
            .unwrap_or(0)
    }
}

impl Default for InMemoryContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryContentStore")
            .field("blob_count", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put(&self, record: BlobRecord) -> StoreResult<BlobId> {
        check_online(&self.online, "content store")?;
        let mut blobs = self.blobs.write().map_err(StoreError::poisoned)?;
        let used = blobs.values().map(BlobRecord::len).sum();
        check_capacity(self.capacity, used, record.len())?;
        let mut id = BlobId::generate();
        while blobs.contains_key(&id) {
            id = BlobId::generate();
        }
        blobs.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>> {
        check_online(&self.online, "content store")?;
        let blobs = self.blobs.read().map_err(StoreError::poisoned)?;
        Ok(blobs.get(id).cloned())
    }

    async fn delete(&self, id: &BlobId) -> StoreResult<()> {
        check_online(&self.online, "content store")?;
        let mut blobs = self.blobs.write().map_err(StoreError::poisoned)?;
        blobs.remove(id);
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        check_online(&self.online, "content store")?;
        self.blobs.write().map_err(StoreError::poisoned)?.clear();
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<BlobId>> {
        check_online(&self.online, "content store")?;
        let blobs = self.blobs.read().map_err(StoreError::poisoned)?;
        let mut ids: Vec<BlobId> = blobs.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// `BTreeMap`-based text store.
#[derive(Debug)]
pub struct InMemoryTextStore {
    texts: RwLock<BTreeMap<TextKey, String>>,
    capacity: Option<usize>,
    online: AtomicBool,
}

impl InMemoryTextStore {
    pub fn new() -> Self {
        Self {
            texts: RwLock::new(BTreeMap::new()),
            capacity: None,
            online: AtomicBool::new(true),
        }
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new()
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.texts.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryTextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextStore for InMemoryTextStore {
    async fn put(&self, key: &TextKey, content: &str) -> StoreResult<()> {
        check_online(&self.online, "text store")?;
        let mut texts = self.texts.write().map_err(StoreError::poisoned)?;
        let used: usize = texts
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(_, v)| v.len())
            .sum();
        check_capacity(self.capacity, used, content.len())?;
        texts.insert(key.clone(), content.to_string());
        Ok(())
    }

    async fn get(&self, key: &TextKey) -> StoreResult<Option<String>> {
        check_online(&self.online, "text store")?;
        let texts = self.texts.read().map_err(StoreError::poisoned)?;
        Ok(texts.get(key).cloned())
    }

    async fn delete(&self, key: &TextKey) -> StoreResult<()> {
        check_online(&self.online, "text store")?;
        self.texts.write().map_err(StoreError::poisoned)?.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        check_online(&self.online, "text store")?;
        self.texts.write().map_err(StoreError::poisoned)?.clear();
        Ok(())
    }

    async fn get_all(&self) -> StoreResult<BTreeMap<TextKey, String>> {
        check_online(&self.online, "text store")?;
        Ok(self.texts.read().map_err(StoreError::poisoned)?.clone())
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Single-slot snapshot store.
///
/// Counts successful writes and can be told to fail the next writes, which
/// is how storage-full conditions are simulated.
#[derive(Debug)]
pub struct InMemorySnapshotStore {
    document: RwLock<Option<String>>,
    capacity: Option<usize>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self {
            document: RwLock::new(None),
            capacity: None,
            fail_writes: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    /// Reject documents longer than `bytes`.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            capacity: Some(bytes),
            ..Self::new()
        }
    }

    /// Seed the store with an existing document (e.g. an old build's save).
    pub fn with_document(document: impl Into<String>) -> Self {
        Self {
            document: RwLock::new(Some(document.into())),
            ..Self::new()
        }
    }

    /// While set, every write fails with `QuotaExceeded`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl Default for InMemorySnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore for InMemorySnapshotStore {
    fn read(&self) -> StoreResult<Option<String>> {
        Ok(self.document.read().map_err(StoreError::poisoned)?.clone())
    }

    fn write(&self, document: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::QuotaExceeded("snapshot store is full".into()));
        }
        check_capacity(self.capacity, 0, document.len())?;
        *self.document.write().map_err(StoreError::poisoned)? = Some(document.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        *self.document.write().map_err(StoreError::poisoned)? = None;
        Ok(())
    }
}
