use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tome_backup::{ExportReport, ImportReport, PostImportHook};
use tome_migrate::{migrate, scan_inline_images, DataUrl, InlineAssignments, MigrationDrift};
use tome_save::{
    FlushOutcome, SaveError, SaveManager, SaveResult, SaveStatus, SnapshotSource, StatusSink,
};
use tome_store::{DisplayHandle, HandleRegistry};
use tome_types::{
    AppState, BlobId, BlobRecord, HistoryFrame, MapHistory, MapId, StateHandle, TextKey,
    TrackerEntity, CURRENT_SCHEMA_VERSION,
};
use tracing::{debug, info, warn};

use crate::collab::Confirm;
use crate::config::CampaignConfig;
use crate::error::{SdkError, SdkResult};
use crate::stores::CampaignStores;

/// A field that holds a blob reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlobSlot {
    CharacterPortrait,
    /// `section` is `npcs`, `party` or `locations`.
    EntityPortrait { section: String, id: String },
    MapBackground(MapId),
    MapDrawing(MapId),
}

/// What happened while loading the stored campaign.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// `None` when nothing was stored or the document was unreadable.
    pub from_version: Option<u32>,
    pub drift: Option<MigrationDrift>,
    pub inline_converted: usize,
    pub dangling_cleared: Vec<String>,
    /// The migrated snapshot was written back.
    pub persisted: bool,
}

struct StateSource(StateHandle);

impl SnapshotSource for StateSource {
    fn snapshot(&self) -> SaveResult<String> {
        let state = self.0.read().map_err(|_| SaveError::Poisoned)?;
        Ok(state.to_snapshot_string()?)
    }
}

fn find_entity<'a>(
    state: &'a mut AppState,
    section: &str,
    id: &str,
) -> SdkResult<&'a mut TrackerEntity> {
    state
        .tracker
        .sections_mut()
        .into_iter()
        .find(|(name, _)| *name == section)
        .and_then(|(_, entities)| entities.iter_mut().find(|e| e.id == id))
        .ok_or_else(|| SdkError::EntityNotFound {
            section: section.to_string(),
            id: id.to_string(),
        })
}

fn slot_mut<'a>(state: &'a mut AppState, slot: &BlobSlot) -> SdkResult<&'a mut Option<BlobId>> {
    match slot {
        BlobSlot::CharacterPortrait => Ok(&mut state.character.portrait_blob_ref),
        BlobSlot::EntityPortrait { section, id } => {
            Ok(&mut find_entity(state, section, id)?.portrait_blob_ref)
        }
        BlobSlot::MapBackground(map) => state
            .map
            .get_mut(map)
            .map(|m| &mut m.bg_blob_ref)
            .ok_or_else(|| SdkError::MapNotFound(map.clone())),
        BlobSlot::MapDrawing(map) => state
            .map
            .get_mut(map)
            .map(|m| &mut m.drawing_blob_ref)
            .ok_or_else(|| SdkError::MapNotFound(map.clone())),
    }
}

/// High-level handle on one campaign.
///
/// Owns the single [`AppState`] behind a [`StateHandle`], the three stores,
/// the save manager, ephemeral map history and display handles. Every
/// mutation made through this type marks the campaign dirty; callers that
/// edit the state directly through [`Campaign::update`] get the same.
pub struct Campaign {
    state: StateHandle,
    stores: CampaignStores,
    save: SaveManager,
    history: Mutex<MapHistory>,
    handles: HandleRegistry,
    sink: Arc<dyn StatusSink>,
    config: CampaignConfig,
}

impl Campaign {
    /// Open a campaign over `stores` and load whatever they hold.
    pub async fn open(
        stores: CampaignStores,
        config: CampaignConfig,
        sink: Arc<dyn StatusSink>,
    ) -> SdkResult<(Self, LoadReport)> {
        let state: StateHandle = Arc::new(RwLock::new(AppState::default()));
        let save = SaveManager::new(
            config.save.clone(),
            Arc::new(StateSource(state.clone())),
            stores.snapshot.clone(),
            sink.clone(),
        );
        let campaign = Self {
            state,
            history: Mutex::new(MapHistory::new(config.history.depth)),
            handles: HandleRegistry::new(),
            stores,
            save,
            sink,
            config,
        };
        let report = campaign.load().await?;
        Ok((campaign, report))
    }

    /// Purely in-memory campaign with default settings.
    pub async fn in_memory(sink: Arc<dyn StatusSink>) -> SdkResult<Self> {
        let (campaign, _) =
            Self::open(CampaignStores::in_memory(), CampaignConfig::default(), sink).await?;
        Ok(campaign)
    }

    // ---- Load path ----

    /// Read, migrate and validate the stored snapshot, then make it live.
    ///
    /// Legacy inline images are moved into the content store first, and any
    /// reference to a blob that no longer exists is cleared. The snapshot is
    /// written back only when migration changed it and the stored document
    /// was neither unreadable nor from a newer build.
    pub async fn load(&self) -> SdkResult<LoadReport> {
        let stored = match self.stores.snapshot.read() {
            Ok(doc) => doc,
            Err(e) => {
                warn!(error = %e, "snapshot store unreadable; starting from defaults");
                self.sink.set_status(&format!("Could not read saved data: {e}"));
                None
            }
        };
        let mut report = LoadReport::default();

        let (mut state, needs_write) = match stored {
            None => {
                debug!("no stored snapshot; starting a new campaign");
                (AppState::default(), false)
            }
            Some(doc) => {
                let raw: Value = serde_json::from_str(&doc).unwrap_or(Value::Null);
                let assignments = self.convert_inline_images(&raw).await;
                report.inline_converted = assignments.len();
                let migrated = migrate(&raw, &assignments);
                report.from_version = migrated.from_version;
                report.drift = migrated.drift;
                let changed = migrated.from_version != Some(CURRENT_SCHEMA_VERSION)
                    || report.inline_converted > 0
                    || !migrated.dropped_inline.is_empty();
                (migrated.state, changed && report.drift.is_none())
            }
        };

        report.dangling_cleared = self.clear_dangling(&mut state).await;
        report.persisted =
            report.drift.is_none() && (needs_write || !report.dangling_cleared.is_empty());

        self.handles.release_all();
        self.lock_history()?.clear();
        self.write_state()?.replace_with(state);

        self.save.init()?;
        if report.persisted {
            self.save.mark_dirty()?;
            // The manager already reported the failure and stays dirty.
            if let Err(e) = self.save.flush() {
                warn!(error = %e, "could not write migrated snapshot; keeping it in memory");
                report.persisted = false;
            }
        }
        if let Some(drift) = &report.drift {
            self.sink.set_status(&drift.to_string());
        }
        info!(
            from_version = ?report.from_version,
            inline = report.inline_converted,
            dangling = report.dangling_cleared.len(),
            persisted = report.persisted,
            "campaign loaded"
        );
        Ok(report)
    }

    async fn convert_inline_images(&self, raw: &Value) -> InlineAssignments {
        let mut assignments = InlineAssignments::new();
        for image in scan_inline_images(raw) {
            let Some(url) = DataUrl::parse(&image.data_url) else {
                warn!(slot = %image.slot, "inline image is not a base64 data URL");
                continue;
            };
            match self.stores.content.put(BlobRecord::new(url.mime, url.data)).await {
                Ok(id) => {
                    debug!(slot = %image.slot, blob_id = %id, "inline image moved to content store");
                    assignments.insert(image.slot, id);
                }
                Err(e) => warn!(slot = %image.slot, error = %e, "could not store inline image"),
            }
        }
        assignments
    }

    /// Clear references to blobs the content store does not have.
    async fn clear_dangling(&self, state: &mut AppState) -> Vec<String> {
        let mut missing = HashSet::new();
        for id in state.referenced_blob_ids() {
            match self.stores.content.contains(&id).await {
                Ok(true) => {}
                Ok(false) => {
                    missing.insert(id);
                }
                // Unknown is not missing; keep the reference.
                Err(e) => warn!(blob_id = %id, error = %e, "could not check blob"),
            }
        }
        let mut cleared = Vec::new();
        if missing.is_empty() {
            return cleared;
        }
        state.visit_blob_refs_mut(|path, slot| {
            if slot.as_ref().is_some_and(|id| missing.contains(id)) {
                warn!(path, "reference to a missing blob cleared");
                *slot = None;
                cleared.push(path.to_string());
            }
        });
        cleared
    }

    // ---- State access ----

    /// The shared state handle. Hold guards briefly and never across `.await`.
    pub fn state(&self) -> StateHandle {
        self.state.clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppState) -> R) -> SdkResult<R> {
        let state = self.state.read().map_err(|_| SdkError::Poisoned)?;
        Ok(f(&state))
    }

    /// Mutate the state in place and mark it dirty.
    pub fn update<R>(&self, f: impl FnOnce(&mut AppState) -> R) -> SdkResult<R> {
        let out = f(&mut *self.write_state()?);
        self.save.mark_dirty()?;
        Ok(out)
    }

    fn write_state(&self) -> SdkResult<std::sync::RwLockWriteGuard<'_, AppState>> {
        self.state.write().map_err(|_| SdkError::Poisoned)
    }

    fn lock_history(&self) -> SdkResult<MutexGuard<'_, MapHistory>> {
        self.history.lock().map_err(|_| SdkError::Poisoned)
    }

    // ---- Save ----

    pub fn mark_dirty(&self) -> SdkResult<()> {
        Ok(self.save.mark_dirty()?)
    }

    pub fn flush(&self) -> SdkResult<FlushOutcome> {
        Ok(self.save.flush()?)
    }

    pub fn status(&self) -> SaveStatus {
        self.save.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.save.subscribe()
    }

    pub fn config(&self) -> &CampaignConfig {
        &self.config
    }

    // ---- Assets ----

    /// Store an image, identified by its signature.
    pub async fn put_image(&self, bytes: Vec<u8>) -> SdkResult<BlobId> {
        let record = BlobRecord::sniffed(bytes).ok_or(SdkError::UnsupportedImage)?;
        self.put_blob(record).await
    }

    pub async fn put_blob(&self, record: BlobRecord) -> SdkResult<BlobId> {
        Ok(self.stores.content.put(record).await?)
    }

    pub async fn get_blob(&self, id: &BlobId) -> SdkResult<Option<BlobRecord>> {
        Ok(self.stores.content.get(id).await?)
    }

    /// Current blob in `slot`.
    pub fn blob_ref(&self, slot: &BlobSlot) -> SdkResult<Option<BlobId>> {
        Ok(slot_mut(&mut *self.write_state()?, slot)?.clone())
    }

    /// Replace the blob in `slot`: delete the old blob (failure ignored),
    /// store the new one, then assign it.
    ///
    /// If storing fails the slot keeps its old id and the error is returned.
    pub async fn replace_blob_ref(&self, slot: &BlobSlot, record: BlobRecord) -> SdkResult<BlobId> {
        let old = self.blob_ref(slot)?;
        if let Some(old) = &old {
            if let Err(e) = self.stores.content.delete(old).await {
                warn!(blob_id = %old, error = %e, "could not delete replaced blob");
            }
        }

        let new = self.stores.content.put(record).await.map_err(|e| {
            warn!(slot = ?slot, error = %e, "could not store replacement blob");
            SdkError::from(e)
        })?;

        let assigned = {
            let mut state = self.write_state()?;
            slot_mut(&mut state, slot).map(|field| *field = Some(new.clone()))
        };
        if let Err(e) = assigned {
            // The slot vanished while the blob was stored.
            if let Err(e) = self.stores.content.delete(&new).await {
                warn!(blob_id = %new, error = %e, "could not delete unassigned blob");
            }
            return Err(e);
        }
        self.save.mark_dirty()?;
        debug!(slot = ?slot, old = ?old, new = %new, "blob reference replaced");
        Ok(new)
    }

    /// Delete the blob in `slot` and clear the reference.
    pub async fn clear_blob_ref(&self, slot: &BlobSlot) -> SdkResult<()> {
        let Some(old) = self.blob_ref(slot)? else {
            return Ok(());
        };
        if let Err(e) = self.stores.content.delete(&old).await {
            warn!(blob_id = %old, error = %e, "could not delete cleared blob");
        }
        {
            let mut state = self.write_state()?;
            *slot_mut(&mut state, slot)? = None;
        }
        self.save.mark_dirty()?;
        Ok(())
    }

    pub async fn acquire_handle(&self, id: &BlobId) -> SdkResult<Option<DisplayHandle>> {
        Ok(self.handles.acquire(self.stores.content.as_ref(), id).await?)
    }

    pub fn release_handle(&self, handle: &DisplayHandle) {
        self.handles.release(handle);
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    // ---- Notes ----

    /// Store the note of a tracker entity, creating its key on first use.
    pub async fn set_note(&self, section: &str, id: &str, text: &str) -> SdkResult<TextKey> {
        let key = {
            let mut state = self.write_state()?;
            let entity = find_entity(&mut state, section, id)?;
            entity
                .note_key
                .clone()
                .unwrap_or_else(|| TextKey::for_entity(section, id))
        };
        self.stores.texts.put(&key, text).await?;

        let assigned = {
            let mut state = self.write_state()?;
            let entity = find_entity(&mut state, section, id)?;
            let fresh = entity.note_key.is_none();
            entity.note_key = Some(key.clone());
            fresh
        };
        if assigned {
            self.save.mark_dirty()?;
        }
        Ok(key)
    }

    pub async fn note(&self, key: &TextKey) -> SdkResult<Option<String>> {
        Ok(self.stores.texts.get(key).await?)
    }

    // ---- Maps ----

    pub fn add_map(&self, name: &str) -> SdkResult<MapId> {
        self.update(|s| s.map.add_map(name))
    }

    pub fn rename_map(&self, id: &MapId, name: &str) -> SdkResult<()> {
        self.write_state()?.map.rename_map(id, name)?;
        self.save.mark_dirty()?;
        Ok(())
    }

    pub fn select_map(&self, id: &MapId) -> SdkResult<()> {
        self.write_state()?.map.select_map(id)?;
        self.save.mark_dirty()?;
        Ok(())
    }

    /// Remove a map and release its blobs and history.
    pub async fn delete_map(&self, id: &MapId) -> SdkResult<()> {
        let removed = self.write_state()?.map.delete_map(id)?;
        self.lock_history()?.forget_map(id);
        self.save.mark_dirty()?;
        for blob in removed.owned_blobs() {
            if let Err(e) = self.stores.content.delete(&blob).await {
                warn!(blob_id = %blob, map_id = %id, error = %e, "could not delete map blob");
            }
        }
        Ok(())
    }

    // ---- Drawing history (never persisted) ----

    pub fn record_stroke(&self, frame: HistoryFrame) -> SdkResult<()> {
        self.lock_history()?.record(frame);
        Ok(())
    }

    pub fn undo(&self, current: HistoryFrame) -> SdkResult<Option<HistoryFrame>> {
        Ok(self.lock_history()?.undo(current))
    }

    pub fn redo(&self, current: HistoryFrame) -> SdkResult<Option<HistoryFrame>> {
        Ok(self.lock_history()?.redo(current))
    }

    pub fn can_undo(&self) -> bool {
        self.history.lock().map(|h| h.can_undo()).unwrap_or(false)
    }

    pub fn can_redo(&self) -> bool {
        self.history.lock().map(|h| h.can_redo()).unwrap_or(false)
    }

    // ---- Backup ----

    /// Export the live campaign as bundle bytes.
    pub async fn export_bundle(&self) -> SdkResult<(Vec<u8>, ExportReport)> {
        let snapshot = self.read(AppState::clone)?;
        let (bundle, report) = tome_backup::export_bundle(
            &snapshot,
            self.stores.content.as_ref(),
            self.stores.texts.as_ref(),
            Utc::now(),
        )
        .await?;
        if !report.skipped.is_empty() {
            self.sink.set_status(&format!(
                "Backup created; {} image(s) could not be read and were left out",
                report.skipped.len()
            ));
        }
        let bytes = bundle
            .to_json_bytes()
            .map_err(|e| tome_backup::BackupError::Serialization(e.to_string()))?;
        Ok((bytes, report))
    }

    /// Replace the campaign with a bundle after asking `confirm`.
    ///
    /// Returns `Ok(None)` if the user declined. A rejected bundle changes
    /// nothing.
    pub async fn import_bundle(
        &self,
        bytes: &[u8],
        confirm: &dyn Confirm,
        hook: &dyn PostImportHook,
    ) -> SdkResult<Option<ImportReport>> {
        if !confirm.confirm("Replace the current campaign with this backup?") {
            return Ok(None);
        }
        let slot = self.save.exclusive().await?;
        let result = tome_backup::import_bundle(
            bytes,
            &self.config.import,
            self.stores.borrowed(),
            &self.state,
            hook,
        )
        .await;

        match result {
            Ok(report) => {
                self.handles.release_all();
                self.lock_history()?.clear();
                self.save.init()?;
                drop(slot);
                match &report.drift {
                    Some(drift) => self.sink.set_status(&drift.to_string()),
                    None => self.sink.set_status("Backup imported"),
                }
                Ok(Some(report))
            }
            Err(e) => {
                drop(slot);
                if !e.is_validation() {
                    self.handles.release_all();
                }
                self.sink.set_status(&format!("Import failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Wipe everything after asking `confirm`. Returns whether it happened.
    pub async fn reset(&self, confirm: &dyn Confirm) -> SdkResult<bool> {
        if !confirm.confirm("Delete the whole campaign? This cannot be undone.") {
            return Ok(false);
        }
        if let Err(e) = self.save.flush() {
            debug!(error = %e, "flush before reset failed");
        }
        let slot = self.save.exclusive().await?;
        let result = tome_backup::reset_all(self.stores.borrowed(), &self.state).await;
        self.handles.release_all();
        self.lock_history()?.clear();
        self.save.init()?;
        drop(slot);
        result?;
        self.sink.set_status("Campaign reset");
        Ok(true)
    }

    /// Flush pending changes and release display handles.
    pub fn close(&self) -> SdkResult<FlushOutcome> {
        self.handles.release_all();
        Ok(self.save.flush()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tome_backup::NoOpHook;
    use tome_save::NoOpSink;
    use tome_store::{
        ContentStore, InMemoryContentStore, InMemorySnapshotStore, SnapshotStore, StoreError,
        StoreResult,
    };

    use crate::collab::AlwaysConfirm;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 7, 7];
    const WEBP: &[u8] = b"RIFF\x04\x00\x00\x00WEBPVP8 ";

    fn sink() -> Arc<dyn StatusSink> {
        Arc::new(NoOpSink)
    }

    fn stores_with(snapshot: InMemorySnapshotStore) -> (CampaignStores, Arc<InMemoryContentStore>) {
        let content = Arc::new(InMemoryContentStore::new());
        let stores = CampaignStores {
            content: content.clone(),
            snapshot: Arc::new(snapshot),
            ..CampaignStores::in_memory()
        };
        (stores, content)
    }

    /// Snapshot store whose writes take a while and record overlap.
    #[derive(Default)]
    struct SlowSnapshot {
        inner: InMemorySnapshotStore,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl SnapshotStore for SlowSnapshot {
        fn read(&self) -> StoreResult<Option<String>> {
            self.inner.read()
        }

        fn write(&self, document: &str) -> StoreResult<()> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(200));
            let result = self.inner.write(document);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        fn clear(&self) -> StoreResult<()> {
            self.inner.clear()
        }
    }

    /// A campaign over a slow snapshot store, dirty and mid-write.
    async fn campaign_mid_save() -> (
        Campaign,
        Arc<SlowSnapshot>,
        tokio::task::JoinHandle<SaveResult<FlushOutcome>>,
    ) {
        let snapshot = Arc::new(SlowSnapshot::default());
        let stores = CampaignStores {
            snapshot: snapshot.clone(),
            ..CampaignStores::in_memory()
        };
        let (campaign, _) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        campaign
            .update(|s| s.character.name = "Before".into())
            .unwrap();
        let writer = {
            let save = campaign.save.clone();
            tokio::task::spawn_blocking(move || save.flush())
        };
        while snapshot.in_flight.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        (campaign, snapshot, writer)
    }

    async fn campaign_with_npc() -> Campaign {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        campaign
            .update(|s| s.tracker.npcs.push(TrackerEntity::new("n1", "Mira")))
            .unwrap();
        campaign
    }

    // -----------------------------------------------------------------------
    // Load path
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn fresh_campaign_has_one_map() {
        let (campaign, report) =
            Campaign::open(CampaignStores::in_memory(), CampaignConfig::default(), sink())
                .await
                .unwrap();
        assert_eq!(report, LoadReport::default());
        assert_eq!(campaign.read(|s| s.map.maps.len()).unwrap(), 1);
        assert_eq!(campaign.status(), SaveStatus::Saved);
    }

    #[tokio::test]
    async fn legacy_snapshot_is_migrated_and_persisted() {
        let legacy = json!({
            "schemaVersion": 1,
            "character": { "name": "Ash", "portraitDataUrl": DataUrl::encode("image/png", PNG) },
            "map": { "brushSize": 6, "undo": [1, 2, 3] }
        });
        let snapshot = InMemorySnapshotStore::with_document(legacy.to_string());
        let (stores, content) = stores_with(snapshot);
        let snapshot = stores.snapshot.clone();

        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert_eq!(report.from_version, Some(1));
        assert_eq!(report.inline_converted, 1);
        assert!(report.persisted);

        let id = campaign
            .read(|s| s.character.portrait_blob_ref.clone())
            .unwrap()
            .unwrap();
        assert_eq!(content.get(&id).await.unwrap().unwrap().data.as_ref(), PNG);

        let stored: Value = serde_json::from_str(&snapshot.read().unwrap().unwrap()).unwrap();
        assert_eq!(stored["schemaVersion"], CURRENT_SCHEMA_VERSION);
        assert!(stored["map"].get("undo").is_none());
        assert_eq!(stored["map"]["maps"][0]["brushSize"], 6);
    }

    #[tokio::test]
    async fn dangling_refs_are_cleared_on_load() {
        let mut state = AppState::default();
        state.character.portrait_blob_ref = Some(BlobId::new("blob-lost"));
        let snapshot = InMemorySnapshotStore::with_document(state.to_snapshot_string().unwrap());
        let (stores, _) = stores_with(snapshot);

        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert_eq!(report.dangling_cleared, vec!["character.portraitBlobRef".to_string()]);
        assert!(report.persisted);
        assert_eq!(campaign.read(|s| s.character.portrait_blob_ref.clone()).unwrap(), None);
    }

    #[tokio::test]
    async fn future_snapshot_is_not_overwritten() {
        let doc = json!({ "schemaVersion": 99, "map": { "maps": [{ "id": "m", "name": "Far" }] } })
            .to_string();
        let snapshot = InMemorySnapshotStore::with_document(doc.clone());
        let (stores, _) = stores_with(snapshot);
        let snapshot = stores.snapshot.clone();

        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert_eq!(report.drift, Some(MigrationDrift::Future { found: 99 }));
        assert!(!report.persisted);
        assert_eq!(snapshot.read().unwrap(), Some(doc));
        assert_eq!(campaign.read(|s| s.map.maps[0].name.clone()).unwrap(), "Far");
    }

    #[tokio::test]
    async fn unreadable_snapshot_falls_back_to_defaults() {
        let snapshot = InMemorySnapshotStore::with_document("not json at all");
        let (stores, _) = stores_with(snapshot);
        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert_eq!(report.drift, Some(MigrationDrift::Unreadable));
        assert_eq!(campaign.read(|s| s.map.maps.len()).unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_write_back_keeps_campaign_usable() {
        let legacy = json!({ "schemaVersion": 2, "character": { "name": "Ash" } });
        let snapshot = InMemorySnapshotStore::with_document(legacy.to_string());
        snapshot.set_fail_writes(true);
        let (stores, _) = stores_with(snapshot);

        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert_eq!(report.from_version, Some(2));
        assert!(!report.persisted);
        assert_eq!(campaign.status(), SaveStatus::Error);
        assert!(campaign.save.is_dirty());
        assert_eq!(campaign.read(|s| s.character.name.clone()).unwrap(), "Ash");

        let (bytes, _) = campaign.export_bundle().await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn load_replaces_contents_not_handle() {
        let campaign = campaign_with_npc().await;
        let handle = campaign.state();
        campaign.flush().unwrap();
        campaign.update(|s| s.tracker.npcs.clear()).unwrap();
        campaign.load().await.unwrap();
        assert!(Arc::ptr_eq(&handle, &campaign.state()));
        assert_eq!(handle.read().unwrap().tracker.npcs.len(), 1);
    }

    #[tokio::test]
    async fn campaign_survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let stores = CampaignStores::open_dir(dir.path()).await.unwrap();
            let (campaign, _) = Campaign::open(stores, CampaignConfig::default(), sink())
                .await
                .unwrap();
            campaign.update(|s| s.character.name = "Ash".into()).unwrap();
            campaign
                .replace_blob_ref(&BlobSlot::CharacterPortrait, BlobRecord::new("image/png", PNG))
                .await
                .unwrap();
            campaign.close().unwrap();
        }

        let stores = CampaignStores::open_dir(dir.path()).await.unwrap();
        let (campaign, report) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        assert!(report.dangling_cleared.is_empty());
        assert!(!report.persisted);
        assert_eq!(campaign.read(|s| s.character.name.clone()).unwrap(), "Ash");
        let id = campaign.blob_ref(&BlobSlot::CharacterPortrait).unwrap().unwrap();
        assert_eq!(campaign.get_blob(&id).await.unwrap().unwrap().data.as_ref(), PNG);
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn put_image_sniffs_format() {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        let id = campaign.put_image(WEBP.to_vec()).await.unwrap();
        assert_eq!(campaign.get_blob(&id).await.unwrap().unwrap().mime, "image/webp");
        assert!(matches!(
            campaign.put_image(b"GIF89a".to_vec()).await,
            Err(SdkError::UnsupportedImage)
        ));
    }

    #[tokio::test]
    async fn replace_deletes_old_blob_then_assigns() {
        let campaign = campaign_with_npc().await;
        let slot = BlobSlot::EntityPortrait {
            section: "npcs".into(),
            id: "n1".into(),
        };
        let first = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/png", PNG))
            .await
            .unwrap();
        let second = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/webp", WEBP))
            .await
            .unwrap();

        assert_ne!(first, second);
        assert!(campaign.get_blob(&first).await.unwrap().is_none());
        assert_eq!(campaign.blob_ref(&slot).unwrap(), Some(second));
        assert!(campaign.save.is_dirty());
    }

    /// Content store that drops every npc while a blob is being stored and
    /// refuses deletes.
    struct VanishingSlot {
        inner: InMemoryContentStore,
        state: std::sync::OnceLock<StateHandle>,
    }

    #[async_trait::async_trait]
    impl ContentStore for VanishingSlot {
        async fn put(&self, record: BlobRecord) -> StoreResult<BlobId> {
            if let Some(state) = self.state.get() {
                state.write().unwrap().tracker.npcs.clear();
            }
            self.inner.put(record).await
        }

        async fn get(&self, id: &BlobId) -> StoreResult<Option<BlobRecord>> {
            self.inner.get(id).await
        }

        async fn delete(&self, _id: &BlobId) -> StoreResult<()> {
            Err(StoreError::BackendUnavailable("read-only".into()))
        }

        async fn clear_all(&self) -> StoreResult<()> {
            self.inner.clear_all().await
        }

        async fn ids(&self) -> StoreResult<Vec<BlobId>> {
            self.inner.ids().await
        }
    }

    #[tokio::test]
    async fn slot_removed_during_store_reports_missing_slot() {
        let content = Arc::new(VanishingSlot {
            inner: InMemoryContentStore::new(),
            state: std::sync::OnceLock::new(),
        });
        let stores = CampaignStores {
            content: content.clone(),
            ..CampaignStores::in_memory()
        };
        let (campaign, _) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        campaign
            .update(|s| s.tracker.npcs.push(TrackerEntity::new("n1", "Mira")))
            .unwrap();
        let _ = content.state.set(campaign.state());

        let slot = BlobSlot::EntityPortrait {
            section: "npcs".into(),
            id: "n1".into(),
        };
        let err = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/png", PNG))
            .await
            .unwrap_err();

        // The failed cleanup is logged, not returned.
        assert!(matches!(err, SdkError::EntityNotFound { ref id, .. } if id == "n1"));
        assert_eq!(content.inner.ids().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_put_leaves_reference() {
        let content = Arc::new(InMemoryContentStore::new());
        let stores = CampaignStores {
            content: content.clone(),
            ..CampaignStores::in_memory()
        };
        let (campaign, _) = Campaign::open(stores, CampaignConfig::default(), sink())
            .await
            .unwrap();
        let slot = BlobSlot::CharacterPortrait;
        let first = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/png", PNG))
            .await
            .unwrap();

        content.set_online(false);
        let err = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/png", PNG))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Store(_)));
        assert_eq!(campaign.blob_ref(&slot).unwrap(), Some(first));
    }

    #[tokio::test]
    async fn unknown_slot_is_rejected() {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        let slot = BlobSlot::EntityPortrait {
            section: "party".into(),
            id: "ghost".into(),
        };
        let err = campaign
            .replace_blob_ref(&slot, BlobRecord::new("image/png", PNG))
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::EntityNotFound { .. }));
    }

    #[tokio::test]
    async fn display_handles_are_released_on_close() {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        let id = campaign.put_image(PNG.to_vec()).await.unwrap();
        let handle = campaign.acquire_handle(&id).await.unwrap().unwrap();
        assert_eq!(campaign.handles().live_count(), 1);
        assert_eq!(campaign.handles().resolve(&handle.url).unwrap().data.as_ref(), PNG);
        campaign.close().unwrap();
        assert_eq!(campaign.handles().live_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Notes and maps
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn notes_use_entity_keys() {
        let campaign = campaign_with_npc().await;
        let key = campaign.set_note("npcs", "n1", "Owes the party gold").await.unwrap();
        assert_eq!(key, TextKey::for_entity("npcs", "n1"));
        let again = campaign.set_note("npcs", "n1", "Paid up").await.unwrap();
        assert_eq!(again, key);
        assert_eq!(campaign.note(&key).await.unwrap().as_deref(), Some("Paid up"));
        assert_eq!(
            campaign.read(|s| s.tracker.npcs[0].note_key.clone()).unwrap(),
            Some(key)
        );
    }

    #[tokio::test]
    async fn deleting_map_releases_blobs_and_history() {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        let first = campaign.read(|s| s.map.active_map_id.clone()).unwrap();
        let second = campaign.add_map("Crypt").unwrap();
        let bg = campaign
            .replace_blob_ref(&BlobSlot::MapBackground(second.clone()), BlobRecord::new("image/png", PNG))
            .await
            .unwrap();
        campaign
            .record_stroke(HistoryFrame {
                map_id: second.clone(),
                pixels: PNG.to_vec().into(),
            })
            .unwrap();
        assert!(campaign.can_undo());

        campaign.delete_map(&second).await.unwrap();
        assert!(campaign.get_blob(&bg).await.unwrap().is_none());
        assert!(!campaign.can_undo());
        assert_eq!(campaign.read(|s| s.map.active_map_id.clone()).unwrap(), first);

        let err = campaign.delete_map(&first).await.unwrap_err();
        assert!(matches!(err, SdkError::Model(tome_types::TypeError::LastMap)));
    }

    #[tokio::test]
    async fn history_never_reaches_snapshot() {
        let campaign = Campaign::in_memory(sink()).await.unwrap();
        let map = campaign.read(|s| s.map.active_map_id.clone()).unwrap();
        campaign
            .record_stroke(HistoryFrame {
                map_id: map,
                pixels: vec![1u8, 2, 3].into(),
            })
            .unwrap();
        campaign.mark_dirty().unwrap();
        campaign.flush().unwrap();
        let doc = campaign.stores.snapshot.read().unwrap().unwrap();
        assert!(!doc.contains("undo"));
        assert!(!doc.contains("redo"));
    }

    // -----------------------------------------------------------------------
    // Backup and reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn export_import_between_campaigns() {
        let source = campaign_with_npc().await;
        source
            .replace_blob_ref(&BlobSlot::CharacterPortrait, BlobRecord::new("image/png", PNG))
            .await
            .unwrap();
        source.set_note("npcs", "n1", "Secret door").await.unwrap();
        let (bytes, report) = source.export_bundle().await.unwrap();
        assert_eq!(report.blobs, 1);

        let target = Campaign::in_memory(sink()).await.unwrap();
        let report = target
            .import_bundle(&bytes, &AlwaysConfirm, &NoOpHook)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.blobs_restored, 1);
        assert_eq!(target.status(), SaveStatus::Saved);

        let id = target
            .read(|s| s.character.portrait_blob_ref.clone())
            .unwrap()
            .unwrap();
        assert_eq!(target.get_blob(&id).await.unwrap().unwrap().data.as_ref(), PNG);
        assert_eq!(
            target.note(&TextKey::for_entity("npcs", "n1")).await.unwrap().as_deref(),
            Some("Secret door")
        );
    }

    #[tokio::test]
    async fn declined_import_changes_nothing() {
        let campaign = campaign_with_npc().await;
        let decline = |_: &str| false;
        let out = campaign
            .import_bundle(b"{}", &decline, &NoOpHook)
            .await
            .unwrap();
        assert!(out.is_none());
        assert_eq!(campaign.read(|s| s.tracker.npcs.len()).unwrap(), 1);
    }

    #[tokio::test]
    async fn invalid_bundle_leaves_snapshot() {
        let campaign = campaign_with_npc().await;
        campaign.flush().unwrap();
        let before = campaign.stores.snapshot.read().unwrap();
        let err = campaign
            .import_bundle(br#"{"version": 1}"#, &AlwaysConfirm, &NoOpHook)
            .await
            .unwrap_err();
        assert!(matches!(err, SdkError::Backup(ref e) if e.is_validation()));
        assert_eq!(campaign.stores.snapshot.read().unwrap(), before);
        assert_eq!(campaign.read(|s| s.tracker.npcs.len()).unwrap(), 1);
    }

    #[tokio::test]
    async fn reset_clears_campaign() {
        let campaign = campaign_with_npc().await;
        let id = campaign.put_image(PNG.to_vec()).await.unwrap();
        assert!(campaign.reset(&AlwaysConfirm).await.unwrap());
        assert!(campaign.get_blob(&id).await.unwrap().is_none());
        assert!(campaign.read(|s| s.tracker.npcs.is_empty()).unwrap());
        assert_eq!(campaign.stores.snapshot.read().unwrap(), None);
        assert_eq!(campaign.status(), SaveStatus::Saved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reset_waits_for_in_flight_save() {
        let (campaign, snapshot, writer) = campaign_mid_save().await;
        assert!(campaign.reset(&AlwaysConfirm).await.unwrap());
        writer.await.unwrap().unwrap();

        assert_eq!(snapshot.read().unwrap(), None);
        assert_eq!(snapshot.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(campaign.status(), SaveStatus::Saved);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn import_never_overlaps_a_save() {
        let source = campaign_with_npc().await;
        let (bytes, _) = source.export_bundle().await.unwrap();

        let (target, snapshot, writer) = campaign_mid_save().await;
        target
            .import_bundle(&bytes, &AlwaysConfirm, &NoOpHook)
            .await
            .unwrap()
            .unwrap();
        writer.await.unwrap().unwrap();

        assert_eq!(snapshot.max_in_flight.load(Ordering::SeqCst), 1);
        let stored = snapshot.read().unwrap().unwrap();
        assert_eq!(stored, target.read(|s| s.to_snapshot_string().unwrap()).unwrap());
        assert!(stored.contains("Mira"));
        assert!(!stored.contains("Before"));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_are_saved_after_debounce() {
        let campaign = campaign_with_npc().await;
        let debounce = campaign.config().save.debounce();
        tokio::time::sleep(debounce * 2).await;
        let doc = campaign.stores.snapshot.read().unwrap().unwrap();
        assert!(doc.contains("Mira"));
        assert_eq!(campaign.status(), SaveStatus::Saved);
    }
}
