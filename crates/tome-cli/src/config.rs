use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tome_sdk::{CampaignConfig, HistoryConfig, ImportLimits, SaveConfig};

const DEFAULT_CONFIG_FILE: &str = "tome.toml";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("tome-data"),
        }
    }
}

/// Everything the `tome` binary can be configured with.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomeConfig {
    pub storage: StorageConfig,
    pub save: SaveConfig,
    pub import: ImportLimits,
    pub history: HistoryConfig,
}

impl TomeConfig {
    /// Read `path`, or `./tome.toml` when it exists, or use defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.exists() {
                    return Ok(Self::default());
                }
                default
            }
        };
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn campaign(&self) -> CampaignConfig {
        CampaignConfig {
            save: self.save.clone(),
            import: self.import.clone(),
            history: self.history.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = TomeConfig::default();
        assert_eq!(c.storage.data_dir, PathBuf::from("tome-data"));
        assert_eq!(c.import.max_blobs, 200);
        assert_eq!(c.history.depth, 30);
    }

    #[test]
    fn parse_sections() {
        let c = TomeConfig::parse(
            r#"
            [storage]
            data_dir = "/srv/tome"

            [save]
            debounce_ms = 1000

            [import]
            max_blobs = 10
            "#,
        )
        .unwrap();
        assert_eq!(c.storage.data_dir, PathBuf::from("/srv/tome"));
        assert_eq!(c.save.debounce_ms, 1000);
        assert_eq!(c.save.status_delay_ms, 150);
        assert_eq!(c.campaign().import.max_blobs, 10);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TomeConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tome.toml");
        std::fs::write(&path, "[history]\ndepth = 5\n").unwrap();
        assert_eq!(TomeConfig::load(Some(&path)).unwrap().history.depth, 5);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(TomeConfig::parse("[save]\ndebounce_ms = \"soon\"").is_err());
    }
}
