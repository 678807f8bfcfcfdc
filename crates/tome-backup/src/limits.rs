use serde::{Deserialize, Serialize};
use tome_types::ImageFormat;

/// Bounds enforced on every imported bundle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportLimits {
    pub max_bundle_bytes: usize,
    pub max_blobs: usize,
    pub allowed_mimes: Vec<String>,
}

impl ImportLimits {
    pub fn allows(&self, format: ImageFormat) -> bool {
        self.allowed_mimes
            .iter()
            .any(|m| ImageFormat::from_mime(m) == Some(format))
    }
}

impl Default for ImportLimits {
    fn default() -> Self {
        Self {
            max_bundle_bytes: 15 * 1024 * 1024,
            max_blobs: 200,
            allowed_mimes: ImageFormat::ALL.iter().map(|f| f.mime().to_string()).collect(),
        }
    }
}
