use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tome_types::{BlobId, TextKey};

/// Format version written by [`export_bundle`](crate::export_bundle) and
/// the only one accepted on import.
pub const BUNDLE_VERSION: u32 = 2;

/// A complete, self-contained campaign backup.
///
/// Blobs are inlined as `data:<mime>;base64,` URLs keyed by the id they had
/// at export time; import assigns fresh ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupBundle {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub state: Value,
    #[serde(default)]
    pub blobs: BTreeMap<BlobId, String>,
    #[serde(default)]
    pub texts: BTreeMap<TextKey, String>,
}

impl BackupBundle {
    /// Pretty-printed JSON, as written to disk.
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

/// Default file name for a bundle exported at `now`.
pub fn suggested_file_name(now: DateTime<Utc>) -> String {
    format!("tome-backup-{}.json", now.format("%Y-%m-%d"))
}
