use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TypeError, TypeResult};
use crate::ids::{BlobId, TextKey};
use crate::map::MapState;

/// Schema version produced by the current migrator.
///
/// History: 1 = single map with inline `data:` images, 2 = single map with
/// blob references, 3 = multi-map list.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// The one shared instance of the application state.
///
/// Guards are short-lived and never held across an `.await`.
pub type StateHandle = Arc<RwLock<AppState>>;

/// Root aggregate: everything durable about a campaign.
///
/// Serializes to the snapshot shape
/// `{ schemaVersion, tracker, character, map, ui }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
    pub schema_version: u32,
    #[serde(default)]
    pub tracker: Tracker,
    #[serde(default)]
    pub character: Character,
    #[serde(default)]
    pub map: MapState,
    #[serde(default)]
    pub ui: UiState,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            tracker: Tracker::default(),
            character: Character::default(),
            map: MapState::default(),
            ui: UiState::default(),
        }
    }
}

impl AppState {
    /// Replace the contents of this instance in place.
    ///
    /// Load, import and reset go through here so that every holder of the
    /// shared handle observes the new contents.
    pub fn replace_with(&mut self, next: AppState) {
        *self = next;
    }

    /// Serialize to the persisted snapshot document.
    pub fn to_snapshot_string(&self) -> TypeResult<String> {
        serde_json::to_string(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }

    pub fn to_snapshot_value(&self) -> TypeResult<Value> {
        serde_json::to_value(self).map_err(|e| TypeError::Serialization(e.to_string()))
    }
}

/// Domain entities tracked during play.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracker {
    #[serde(default)]
    pub npcs: Vec<TrackerEntity>,
    #[serde(default)]
    pub party: Vec<TrackerEntity>,
    #[serde(default)]
    pub locations: Vec<TrackerEntity>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tracker {
    /// The entity lists with their kind labels, in a fixed order.
    pub fn sections(&self) -> [(&'static str, &Vec<TrackerEntity>); 3] {
        [
            ("npcs", &self.npcs),
            ("party", &self.party),
            ("locations", &self.locations),
        ]
    }

    pub fn sections_mut(&mut self) -> [(&'static str, &mut Vec<TrackerEntity>); 3] {
        [
            ("npcs", &mut self.npcs),
            ("party", &mut self.party),
            ("locations", &mut self.locations),
        ]
    }
}

/// An NPC, party member or location card.
///
/// Fields this build does not know about are kept in `extra` and written
/// back unchanged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerEntity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait_blob_ref: Option<BlobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_key: Option<TextKey>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackerEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            portrait_blob_ref: None,
            note_key: None,
            extra: Map::new(),
        }
    }
}

/// The player character sheet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portrait_blob_ref: Option<BlobId>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Top-level UI preferences.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default = "default_tab")]
    pub active_tab: String,
    #[serde(default)]
    pub widgets: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_theme() -> String {
    "dark".to_string()
}

fn default_tab() -> String {
    "tracker".to_string()
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            theme: default_theme(),
            active_tab: default_tab(),
            widgets: Map::new(),
            extra: Map::new(),
        }
    }
}
