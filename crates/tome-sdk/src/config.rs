use serde::{Deserialize, Serialize};
use tome_backup::ImportLimits;
use tome_save::SaveConfig;

/// Runtime settings for a [`Campaign`](crate::Campaign).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub save: SaveConfig,
    pub import: ImportLimits,
    pub history: HistoryConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Undo frames kept across all maps.
    pub depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { depth: 30 }
    }
}
