//! Two-phase import: validate everything in memory, then mutate the stores.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::Value;
use tome_migrate::{migrate, scan_inline_images, InlineAssignments, MigrationDrift};
use tome_store::{ContentStore, SnapshotStore, TextStore};
use tome_types::{AppState, BlobId, BlobRecord, ImageFormat, TextKey};
use tracing::{debug, info, warn};

use crate::bundle::BUNDLE_VERSION;
use crate::error::{BackupError, BackupResult, ValidationError};
use crate::limits::ImportLimits;

/// The three stores a campaign lives in.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    pub content: &'a dyn ContentStore,
    pub texts: &'a dyn TextStore,
    pub snapshot: &'a dyn SnapshotStore,
}

/// A bundle that passed every check. Nothing has been written yet.
#[derive(Debug)]
pub struct ValidatedBundle {
    /// Migrated state, still carrying the bundle's blob ids.
    pub state: AppState,
    pub blobs: Vec<(BlobId, BlobRecord)>,
    pub texts: BTreeMap<TextKey, String>,
    pub from_version: Option<u32>,
    pub drift: Option<MigrationDrift>,
    pub exported_at: Option<String>,
}

/// Outcome of a completed import.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub blobs_restored: usize,
    pub texts_restored: usize,
    /// Fields whose blob was not in the bundle and were cleared.
    pub dangling_cleared: Vec<String>,
    pub from_version: Option<u32>,
    pub drift: Option<MigrationDrift>,
}

/// Runs after a successful import, once the new state is live.
#[async_trait]
pub trait PostImportHook: Send + Sync {
    async fn after_import(&self, report: &ImportReport) -> BackupResult<()>;
}

pub struct NoOpHook;

#[async_trait]
impl PostImportHook for NoOpHook {
    async fn after_import(&self, _report: &ImportReport) -> BackupResult<()> {
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingBundle {
    #[serde(default)]
    exported_at: Option<String>,
    #[serde(default)]
    state: Value,
    #[serde(default)]
    blobs: BTreeMap<String, String>,
    #[serde(default)]
    texts: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn decode_image(
    id: &str,
    data_url: &str,
    limits: &ImportLimits,
) -> Result<BlobRecord, ValidationError> {
    let disallowed = |reason: &str| ValidationError::DisallowedImage {
        id: id.to_string(),
        reason: reason.to_string(),
    };
    let (header, payload) = data_url
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(','))
        .ok_or_else(|| disallowed("not a data URL"))?;
    let mime = header
        .strip_suffix(";base64")
        .ok_or_else(|| disallowed("payload is not base64"))?;
    let format = ImageFormat::from_mime(mime)
        .filter(|f| limits.allows(*f))
        .ok_or_else(|| disallowed(&format!("type {mime:?} is not allowed")))?;
    let data = STANDARD
        .decode(payload.trim())
        .map_err(|e| ValidationError::CorruptPayload {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
    if !format.matches(&data) {
        return Err(disallowed(&format!(
            "content does not look like {}",
            format.mime()
        )));
    }
    Ok(BlobRecord::new(format.mime(), data))
}

/// Check a bundle against `limits` and decode it fully in memory.
///
/// Checks run in order: size, JSON syntax, version, image count, then
/// every image's type, encoding and signature.
pub fn validate_bundle(
    bytes: &[u8],
    limits: &ImportLimits,
) -> Result<ValidatedBundle, ValidationError> {
    if bytes.len() > limits.max_bundle_bytes {
        return Err(ValidationError::TooLarge {
            size: bytes.len(),
            limit: limits.max_bundle_bytes,
        });
    }

    let raw: Value =
        serde_json::from_slice(bytes).map_err(|e| ValidationError::Malformed(e.to_string()))?;
    if !raw.is_object() {
        return Err(ValidationError::Malformed("top level is not an object".into()));
    }
    match raw.get("version") {
        Some(v) if v.as_u64() == Some(u64::from(BUNDLE_VERSION)) => {}
        Some(v) => return Err(ValidationError::UnsupportedVersion(v.to_string())),
        None => return Err(ValidationError::UnsupportedVersion("missing".into())),
    }
    let incoming: IncomingBundle =
        serde_json::from_value(raw).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    // Very old states may still carry inline images; they become blobs too.
    let inline = scan_inline_images(&incoming.state);
    let count = incoming.blobs.len() + inline.len();
    if count > limits.max_blobs {
        return Err(ValidationError::TooManyBlobs {
            count,
            limit: limits.max_blobs,
        });
    }

    let mut blobs = Vec::with_capacity(count);
    for (id, data_url) in &incoming.blobs {
        blobs.push((BlobId::new(id.as_str()), decode_image(id, data_url, limits)?));
    }
    let mut assignments = InlineAssignments::new();
    for image in inline {
        let record = decode_image(&image.slot, &image.data_url, limits)?;
        let placeholder = BlobId::new(format!("inline:{}", image.slot));
        assignments.insert(image.slot, placeholder.clone());
        blobs.push((placeholder, record));
    }

    let migrated = migrate(&incoming.state, &assignments);
    debug!(
        blobs = blobs.len(),
        texts = incoming.texts.len(),
        from_version = ?migrated.from_version,
        "bundle validated"
    );

    Ok(ValidatedBundle {
        state: migrated.state,
        blobs,
        texts: incoming
            .texts
            .into_iter()
            .map(|(k, v)| (TextKey::new(k), v))
            .collect(),
        from_version: migrated.from_version,
        drift: migrated.drift,
        exported_at: incoming.exported_at,
    })
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

fn partial(stage: &'static str) -> impl FnOnce(tome_store::StoreError) -> BackupError {
    move |source| {
        warn!(stage, error = %source, "import failed after stores were modified");
        BackupError::PartialRestore { stage, source }
    }
}

/// Replace the whole campaign with a validated bundle.
///
/// Wipes the content and text stores, re-inserts blobs under fresh ids and
/// texts under their original keys, rewrites every blob reference, persists
/// the snapshot and swaps the contents of `live`. There is no rollback: a
/// store failure here yields [`BackupError::PartialRestore`].
pub async fn restore(
    bundle: ValidatedBundle,
    stores: Stores<'_>,
    live: &RwLock<AppState>,
    hook: &dyn PostImportHook,
) -> BackupResult<ImportReport> {
    let ValidatedBundle {
        mut state,
        blobs,
        texts,
        from_version,
        drift,
        ..
    } = bundle;

    stores
        .content
        .clear_all()
        .await
        .map_err(partial("clearing images"))?;
    stores
        .texts
        .clear_all()
        .await
        .map_err(partial("clearing notes"))?;

    let mut remap: HashMap<BlobId, BlobId> = HashMap::with_capacity(blobs.len());
    for (old, record) in blobs {
        let new = stores
            .content
            .put(record)
            .await
            .map_err(partial("restoring images"))?;
        debug!(old = %old, new = %new, "blob restored");
        remap.insert(old, new);
    }
    for (key, text) in &texts {
        stores
            .texts
            .put(key, text)
            .await
            .map_err(partial("restoring notes"))?;
    }

    let mut dangling = Vec::new();
    state.visit_blob_refs_mut(|path, slot| {
        if let Some(old) = slot.take() {
            match remap.get(&old) {
                Some(new) => *slot = Some(new.clone()),
                None => {
                    warn!(blob_id = %old, path, "reference to a blob missing from the backup; cleared");
                    dangling.push(path.to_string());
                }
            }
        }
    });

    let document = state.to_snapshot_string()?;
    {
        let mut guard = live.write().map_err(|_| BackupError::Poisoned)?;
        stores
            .snapshot
            .write(&document)
            .map_err(partial("saving the imported campaign"))?;
        guard.replace_with(state);
    }

    let report = ImportReport {
        blobs_restored: remap.len(),
        texts_restored: texts.len(),
        dangling_cleared: dangling,
        from_version,
        drift,
    };
    info!(
        blobs = report.blobs_restored,
        texts = report.texts_restored,
        dangling = report.dangling_cleared.len(),
        "import complete"
    );

    hook.after_import(&report).await?;
    Ok(report)
}

/// Validate then restore.
pub async fn import_bundle(
    bytes: &[u8],
    limits: &ImportLimits,
    stores: Stores<'_>,
    live: &RwLock<AppState>,
    hook: &dyn PostImportHook,
) -> BackupResult<ImportReport> {
    let bundle = validate_bundle(bytes, limits).map_err(|e| {
        warn!(error = %e, "backup rejected");
        e
    })?;
    restore(bundle, stores, live, hook).await
}
