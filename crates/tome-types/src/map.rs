//! The map list and its ephemeral drawing history.

use std::collections::VecDeque;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{TypeError, TypeResult};
use crate::ids::{BlobId, MapId};

pub const DEFAULT_COLOR_KEY: &str = "ink";
pub const DEFAULT_BRUSH_SIZE: u32 = 4;

/// One named map with its background and drawing overlay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapEntry {
    pub id: MapId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg_blob_ref: Option<BlobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drawing_blob_ref: Option<BlobId>,
    #[serde(default = "default_color_key")]
    pub color_key: String,
    #[serde(default = "default_brush_size")]
    pub brush_size: u32,
}

fn default_color_key() -> String {
    DEFAULT_COLOR_KEY.to_string()
}

fn default_brush_size() -> u32 {
    DEFAULT_BRUSH_SIZE
}

impl MapEntry {
    /// A fresh entry with default brush settings and no images.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: MapId::generate(),
            name: name.into(),
            bg_blob_ref: None,
            drawing_blob_ref: None,
            color_key: default_color_key(),
            brush_size: DEFAULT_BRUSH_SIZE,
        }
    }

    /// Blob ids this entry owns.
    pub fn owned_blobs(&self) -> Vec<BlobId> {
        self.bg_blob_ref
            .iter()
            .chain(self.drawing_blob_ref.iter())
            .cloned()
            .collect()
    }
}

/// Persisted view state of the map panel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapView {
    #[serde(default = "default_zoom")]
    pub zoom: f64,
    #[serde(default)]
    pub offset_x: f64,
    #[serde(default)]
    pub offset_y: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_zoom() -> f64 {
    1.0
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            zoom: default_zoom(),
            offset_x: 0.0,
            offset_y: 0.0,
            extra: Map::new(),
        }
    }
}

/// The ordered list of maps plus the active selection.
///
/// Invariant: `maps` is never empty and `active_map_id` names one of them.
/// Every mutating operation here preserves that; [`MapState::ensure_valid`]
/// re-establishes it for data that came from outside.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub maps: Vec<MapEntry>,
    pub active_map_id: MapId,
    #[serde(default)]
    pub ui: MapView,
}

impl Default for MapState {
    fn default() -> Self {
        let first = MapEntry::new("Map 1");
        Self {
            active_map_id: first.id.clone(),
            maps: vec![first],
            ui: MapView::default(),
        }
    }
}

impl MapState {
    pub fn get(&self, id: &MapId) -> Option<&MapEntry> {
        self.maps.iter().find(|m| &m.id == id)
    }

    pub fn get_mut(&mut self, id: &MapId) -> Option<&mut MapEntry> {
        self.maps.iter_mut().find(|m| &m.id == id)
    }

    pub fn active_map(&self) -> Option<&MapEntry> {
        self.get(&self.active_map_id)
    }

    pub fn active_map_mut(&mut self) -> Option<&mut MapEntry> {
        let id = self.active_map_id.clone();
        self.get_mut(&id)
    }

    /// Append a new map, make it active and return its id.
    pub fn add_map(&mut self, name: impl Into<String>) -> MapId {
        let entry = MapEntry::new(name);
        let id = entry.id.clone();
        self.maps.push(entry);
        self.active_map_id = id.clone();
        id
    }

    pub fn select_map(&mut self, id: &MapId) -> TypeResult<()> {
        if self.get(id).is_none() {
            return Err(TypeError::UnknownMap(id.clone()));
        }
        self.active_map_id = id.clone();
        Ok(())
    }

    pub fn rename_map(&mut self, id: &MapId, name: impl Into<String>) -> TypeResult<()> {
        let entry = self
            .get_mut(id)
            .ok_or_else(|| TypeError::UnknownMap(id.clone()))?;
        entry.name = name.into();
        Ok(())
    }

    /// Remove a map and return it so the caller can release its blobs.
    ///
    /// Deleting the last remaining map is rejected. When the active map is
    /// removed the first remaining map becomes active.
    pub fn delete_map(&mut self, id: &MapId) -> TypeResult<MapEntry> {
        let index = self
            .maps
            .iter()
            .position(|m| &m.id == id)
            .ok_or_else(|| TypeError::UnknownMap(id.clone()))?;
        if self.maps.len() == 1 {
            return Err(TypeError::LastMap);
        }
        let removed = self.maps.remove(index);
        if self.active_map_id == removed.id {
            self.active_map_id = self.maps[0].id.clone();
        }
        Ok(removed)
    }

    /// Restore the non-empty / valid-selection invariant.
    pub fn ensure_valid(&mut self) {
        if self.maps.is_empty() {
            self.maps.push(MapEntry::new("Map 1"));
        }
        if self.get(&self.active_map_id).is_none() {
            self.active_map_id = self.maps[0].id.clone();
        }
    }
}

/// One undo/redo step: the overlay pixels of a map before a stroke.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryFrame {
    pub map_id: MapId,
    pub pixels: Bytes,
}

/// Undo/redo stacks for drawing.
///
/// This type is intentionally not `Serialize`: it lives beside the
/// [`AppState`](crate::AppState), never inside it, so no snapshot or bundle
/// can carry it.
#[derive(Debug)]
pub struct MapHistory {
    undo: VecDeque<HistoryFrame>,
    redo: Vec<HistoryFrame>,
    capacity: usize,
}

impl MapHistory {
    pub const DEFAULT_CAPACITY: usize = 30;

    pub fn new(capacity: usize) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Record the state before a new stroke. Clears the redo stack.
    pub fn record(&mut self, frame: HistoryFrame) {
        self.push_undo(frame);
        self.redo.clear();
    }

    fn push_undo(&mut self, frame: HistoryFrame) {
        while self.undo.len() >= self.capacity {
            self.undo.pop_front();
        }
        self.undo.push_back(frame);
    }

    /// Step back: `current` is pushed onto redo, the previous frame returned.
    pub fn undo(&mut self, current: HistoryFrame) -> Option<HistoryFrame> {
        let previous = self.undo.pop_back()?;
        self.redo.push(current);
        Some(previous)
    }

    pub fn redo(&mut self, current: HistoryFrame) -> Option<HistoryFrame> {
        let next = self.redo.pop()?;
        self.push_undo(current);
        Some(next)
    }

    /// Drop every frame that belongs to `map_id` (after the map is deleted).
    pub fn forget_map(&mut self, map_id: &MapId) {
        self.undo.retain(|f| &f.map_id != map_id);
        self.redo.retain(|f| &f.map_id != map_id);
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }
}

impl Default for MapHistory {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
