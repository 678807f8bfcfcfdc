//! File-backed stores under a data directory.
//!
//! Layout:
//! ```text
//! <root>/blobs/<blob-id>.blob   [mime]\n[payload]
//! <root>/texts.json             { "<text-key>": "<content>", ... }
//! <root>/snapshot.json          the serialized AppState
//! ```
//! Every write goes to a temporary sibling first and is renamed into place,
//! so a crash never leaves a half-written record under a live name.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tome_types::{BlobId, BlobRecord, TextKey};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::{ContentStore, SnapshotStore, TextStore};

const BLOB_EXT: &str = "blob";

/// Write `data` to a temporary sibling of `path`, then rename it over `path`.
async fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::now_v7().simple()));
    if let Err(e) = tokio::fs::write(&tmp, data).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Ids come from snapshots and bundles, so only path-safe ones map to files.
fn is_path_safe(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// One file per blob; the MIME type is the first line of the file.
#[derive(Debug)]
pub struct FsContentStore {
    dir: PathBuf,
}

impl FsContentStore {
    /// Open (or create) the blob directory under `root`.
    pub async fn open(root: &Path) -> StoreResult<Self> {
        let dir = root.join("blobs");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    fn blob_path(&self, id: &BlobId) -> Option<PathBuf> {
        if is_path_safe(id.as_str()) {
            Some(self.dir.join(format!("{}.{BLOB_EXT}", id.as_str())))
        } else {
            None
        }
    }

    async fn blob_files(&self) -> StoreResult<Vec<(BlobId, PathBuf)>> {
        let mut out = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|e| e == BLOB_EXT).unwrap_or(false) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    out.push((BlobId::new(stem), path));
                }
            }
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn put(&self, record: BlobRecord) -> StoreResult<BlobId> {
        let id = BlobId::generate();
        let path = self
            .blob_path(&id)
            .ok_or_else(|| StoreError::Serialization(format!("unsafe blob id {id}")))?;
        let mut data = Vec::with_capacity(record.mime.len() + 1 + record.len());
        data.extend_from_slice(record.mime.as_bytes());
        data.push(b'\n');
        data.extend_from_slice(&record.data);
        write_atomic(&path, &data).await?;
        debug!(blob_id = %id, bytes = record.len(), "blob stored");
        Ok(id)
    }

    async fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>> {
        let Some(path) = self.blob_path(id) else {
            return Ok(None);
        };
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let split = raw.iter().position(|b| *b == b'\n').ok_or_else(|| StoreError::Corrupt {
            key: id.to_string(),
            reason: "missing mime header".into(),
        })?;
        let mime = std::str::from_utf8(&raw[..split])
            .map_err(|e| StoreError::Corrupt {
                key: id.to_string(),
                reason: e.to_string(),
            })?
            .to_string();
        let data = Bytes::from(raw).slice(split + 1..);
        Ok(Some(BlobRecord { mime, data }))
    }

    async fn delete(&self, id: &BlobId) -> StoreResult<()> {
        let Some(path) = self.blob_path(id) else {
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear_all(&self) -> StoreResult<()> {
        for (id, path) in self.blob_files().await? {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(blob_id = %id, error = %e, "failed to remove blob during clear");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    async fn ids(&self) -> StoreResult<Vec<BlobId>> {
        Ok(self.blob_files().await?.into_iter().map(|(id, _)| id).collect())
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// All texts in one JSON object, rewritten on each change.
#[derive(Debug)]
pub struct FsTextStore {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl FsTextStore {
    pub async fn open(root: &Path) -> StoreResult<Self> {
        tokio::fs::create_dir_all(root).await?;
        Ok(Self {
            path: root.join("texts.json"),
            lock: Mutex::new(()),
        })
    }

    async fn load(&self) -> StoreResult<BTreeMap<TextKey, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| StoreError::Corrupt {
                key: self.path.display().to_string(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, texts: &BTreeMap<TextKey, String>) -> StoreResult<()> {
        let raw =
            serde_json::to_vec(texts).map_err(|e| StoreError::Serialization(e.to_string()))?;
        write_atomic(&self.path, &raw).await
    }
}

#[async_trait]
impl TextStore for FsTextStore {
    async fn put(&self, key: &TextKey, content: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut texts = self.load().await?;
        texts.insert(key.clone(), content.to_string());
        self.save(&texts).await
    }

    async fn get(&self, key: &TextKey) -> StoreResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn delete(&self, key: &TextKey) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut texts = self.load().await?;
        if texts.remove(key).is_some() {
            self.save(&texts).await?;
        }
        Ok(())
    }

    async fn clear_all(&self) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_all(&self) -> StoreResult<BTreeMap<TextKey, String>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Snapshot document in a single file, replaced via `tempfile` + rename.
#[derive(Debug)]
pub struct FsSnapshotStore {
    path: PathBuf,
}

impl FsSnapshotStore {
    pub fn open(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            path: root.join("snapshot.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FsSnapshotStore {
    fn read(&self) -> StoreResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, document: &str) -> StoreResult<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(document.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| StoreError::from(e.error))?;
        Ok(())
    }

    fn clear(&self) -> StoreResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(tail: &[u8]) -> BlobRecord {
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
        data.extend_from_slice(tail);
        BlobRecord::new("image/png", data)
    }

    #[tokio::test]
    async fn content_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).await.unwrap();
        let record = png(b"\nwith newline in payload");
        let id = store.put(record.clone()).await.unwrap();

        let back = store.get(&id).await.unwrap().unwrap();
        assert_eq!(back, record);
        assert_eq!(store.ids().await.unwrap(), vec![id.clone()]);

        // A second handle on the same directory sees the blob.
        let reopened = FsContentStore::open(dir.path()).await.unwrap();
        assert!(reopened.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn content_delete_missing_and_unsafe_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).await.unwrap();
        store.delete(&BlobId::new("blob-missing")).await.unwrap();
        store.delete(&BlobId::new("../../etc/passwd")).await.unwrap();
        assert!(store.get(&BlobId::new("../escape")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn content_clear_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).await.unwrap();
        store.put(png(b"a")).await.unwrap();
        store.put(png(b"b")).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsContentStore::open(dir.path()).await.unwrap();
        let id = BlobId::new("blob-broken");
        std::fs::write(dir.path().join("blobs").join("blob-broken.blob"), b"noheader").unwrap();
        let err = store.get(&id).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn text_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsTextStore::open(dir.path()).await.unwrap();
        let key = TextKey::for_entity("npc", "n1");
        store.put(&key, "met at the docks").await.unwrap();
        store.put(&TextKey::new("other"), "x").await.unwrap();
        store.delete(&TextKey::new("other")).await.unwrap();

        let reopened = FsTextStore::open(dir.path()).await.unwrap();
        let all = reopened.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(reopened.get(&key).await.unwrap().as_deref(), Some("met at the docks"));

        reopened.clear_all().await.unwrap();
        reopened.clear_all().await.unwrap();
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_text_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("texts.json"), b"{not json").unwrap();
        let store = FsTextStore::open(dir.path()).await.unwrap();
        assert!(matches!(
            store.get_all().await.unwrap_err(),
            StoreError::Corrupt { .. }
        ));
    }

    #[test]
    fn snapshot_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsSnapshotStore::open(dir.path()).unwrap();
        assert!(store.read().unwrap().is_none());
        store.write("{\"schemaVersion\":3}").unwrap();
        store.write("{\"schemaVersion\":3,\"ui\":{}}").unwrap();
        assert_eq!(
            store.read().unwrap().as_deref(),
            Some("{\"schemaVersion\":3,\"ui\":{}}")
        );
        store.clear().unwrap();
        store.clear().unwrap();
        assert!(store.read().unwrap().is_none());
    }
}
