use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tome_migrate::DataUrl;
use tome_store::{ContentStore, TextStore};
use tome_types::{AppState, BlobId};
use tracing::{debug, info, warn};

use crate::bundle::{BackupBundle, BUNDLE_VERSION};
use crate::error::BackupResult;

/// A blob left out of an export.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedBlob {
    pub id: BlobId,
    /// First field that referenced it.
    pub path: String,
    pub reason: String,
}

/// Summary of an export.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub blobs: usize,
    pub texts: usize,
    pub skipped: Vec<SkippedBlob>,
    /// The text store could not be read; `texts` in the bundle is empty.
    pub texts_unavailable: bool,
}

/// Build a bundle from `state` and the stores.
///
/// Unreadable blobs are skipped and reported; an unreadable text store
/// yields an empty `texts` map. Neither fails the export.
pub async fn export_bundle(
    state: &AppState,
    content: &dyn ContentStore,
    texts: &dyn TextStore,
    now: DateTime<Utc>,
) -> BackupResult<(BackupBundle, ExportReport)> {
    let mut report = ExportReport::default();
    let mut blobs = BTreeMap::new();

    for slot in state.blob_refs() {
        if blobs.contains_key(&slot.id) || report.skipped.iter().any(|s| s.id == slot.id) {
            continue;
        }
        match content.get(&slot.id).await {
            Ok(Some(record)) => {
                blobs.insert(slot.id, DataUrl::encode(&record.mime, &record.data));
            }
            Ok(None) => {
                warn!(blob_id = %slot.id, path = %slot.path, "referenced blob missing; omitted from backup");
                report.skipped.push(SkippedBlob {
                    id: slot.id,
                    path: slot.path,
                    reason: "missing".into(),
                });
            }
            Err(e) => {
                warn!(blob_id = %slot.id, path = %slot.path, error = %e, "blob read failed; omitted from backup");
                report.skipped.push(SkippedBlob {
                    id: slot.id,
                    path: slot.path,
                    reason: e.to_string(),
                });
            }
        }
    }

    let texts = match texts.get_all().await {
        Ok(all) => all,
        Err(e) => {
            warn!(error = %e, "text store unreadable; exporting without notes");
            report.texts_unavailable = true;
            BTreeMap::new()
        }
    };

    report.blobs = blobs.len();
    report.texts = texts.len();
    debug!(blobs = report.blobs, texts = report.texts, "bundle assembled");
    if !report.skipped.is_empty() {
        info!(skipped = report.skipped.len(), "export completed with omissions");
    }

    let bundle = BackupBundle {
        version: BUNDLE_VERSION,
        exported_at: now,
        state: state.to_snapshot_value()?,
        blobs,
        texts,
    };
    Ok((bundle, report))
}
