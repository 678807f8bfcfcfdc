//! Lenient readers for each snapshot section.
//!
//! Every reader accepts whatever an older (or newer) build may have written:
//! wrong types fall back to defaults, unknown fields are carried in `extra`,
//! and nothing here can fail.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tome_types::{
    BlobId, Character, MapEntry, MapId, MapState, MapView, TextKey, Tracker, TrackerEntity,
    UiState,
};
use tracing::warn;

use crate::inline::{
    inline_value, party_key, slot_path, InlineAssignments, ENTITY_INLINE_FIELDS,
    MAP_BG_INLINE_FIELDS, MAP_DRAWING_INLINE_FIELDS, TRACKER_SECTIONS,
};

const ENTITY_REF_FIELDS: [&str; 3] = ["portraitBlobRef", "portraitBlobId", "imgBlobId"];
const MAP_BG_REF_FIELDS: [&str; 3] = ["bgBlobRef", "bgBlobId", "backgroundBlobId"];
const MAP_DRAWING_REF_FIELDS: [&str; 2] = ["drawingBlobRef", "drawingBlobId"];

const ENTITY_KNOWN: [&str; 8] = [
    "id",
    "name",
    "noteKey",
    "portraitBlobRef",
    "portraitBlobId",
    "imgBlobId",
    "portraitDataUrl",
    "imgDataUrl",
];
const CHARACTER_KNOWN: [&str; 6] = [
    "name",
    "portraitBlobRef",
    "portraitBlobId",
    "imgBlobId",
    "portraitDataUrl",
    "imgDataUrl",
];
const UI_KNOWN: [&str; 4] = ["theme", "activeTab", "lastTab", "widgets"];
const VIEW_KNOWN: [&str; 3] = ["zoom", "offsetX", "offsetY"];

/// Shared state of one migration pass.
pub(crate) struct Ctx<'a> {
    assignments: &'a InlineAssignments,
    pub(crate) dropped: Vec<String>,
}

impl<'a> Ctx<'a> {
    pub(crate) fn new(assignments: &'a InlineAssignments) -> Self {
        Self {
            assignments,
            dropped: Vec::new(),
        }
    }

    /// Resolve an image slot: a converted inline image wins, then any of the
    /// reference field spellings.
    fn image(
        &mut self,
        obj: &Map<String, Value>,
        parent: &str,
        inline_fields: &[&str],
        ref_fields: &[&str],
    ) -> Option<BlobId> {
        for field in inline_fields {
            if inline_value(obj, field).is_some() {
                let slot = slot_path(parent, field);
                if let Some(id) = self.assignments.get(&slot) {
                    return Some(id.clone());
                }
                warn!(slot = %slot, "inline image was not converted; dropping it");
                self.dropped.push(slot);
            }
        }
        ref_fields
            .iter()
            .find_map(|f| str_field(obj, f))
            .map(BlobId::new)
    }
}

fn str_field(obj: &Map<String, Value>, field: &str) -> Option<String> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Strings pass through; numbers are stringified (old builds used numeric ids).
fn id_field(obj: &Map<String, Value>, field: &str) -> Option<String> {
    match obj.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extra_without(obj: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn as_object(value: Option<&Value>) -> Option<&Map<String, Value>> {
    value.and_then(Value::as_object)
}

// ---------------------------------------------------------------------------
// Tracker / character / ui
// ---------------------------------------------------------------------------

fn entity(obj: &Map<String, Value>, parent: &str, ctx: &mut Ctx<'_>) -> TrackerEntity {
    let id = id_field(obj, "id")
        .unwrap_or_else(|| format!("ent-{}", uuid::Uuid::now_v7().simple()));
    TrackerEntity {
        name: id_field(obj, "name").unwrap_or_default(),
        portrait_blob_ref: ctx.image(obj, parent, &ENTITY_INLINE_FIELDS, &ENTITY_REF_FIELDS),
        note_key: str_field(obj, "noteKey").map(TextKey::new),
        extra: extra_without(obj, &ENTITY_KNOWN),
        id,
    }
}

fn entity_list(tracker: &Map<String, Value>, section: &str, ctx: &mut Ctx<'_>) -> Vec<TrackerEntity> {
    let Some(items) = tracker.get(section).and_then(Value::as_array) else {
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(|(i, item)| match item.as_object() {
            Some(obj) => Some(entity(obj, &format!("tracker.{section}[{i}]"), ctx)),
            None => {
                warn!(section, index = i, "skipping non-object tracker entry");
                None
            }
        })
        .collect()
}

pub(crate) fn tracker(value: Option<&Value>, ctx: &mut Ctx<'_>) -> Tracker {
    let Some(obj) = as_object(value) else {
        return Tracker::default();
    };
    Tracker {
        npcs: entity_list(obj, "npcs", ctx),
        party: entity_list(obj, party_key(obj), ctx),
        locations: entity_list(obj, "locations", ctx),
        extra: extra_without(obj, &TRACKER_SECTIONS),
    }
}

pub(crate) fn character(value: Option<&Value>, ctx: &mut Ctx<'_>) -> Character {
    let Some(obj) = as_object(value) else {
        return Character::default();
    };
    Character {
        name: id_field(obj, "name").unwrap_or_default(),
        portrait_blob_ref: ctx.image(obj, "character", &ENTITY_INLINE_FIELDS, &ENTITY_REF_FIELDS),
        extra: extra_without(obj, &CHARACTER_KNOWN),
    }
}

pub(crate) fn ui(value: Option<&Value>) -> UiState {
    let Some(obj) = as_object(value) else {
        return UiState::default();
    };
    let defaults = UiState::default();
    UiState {
        theme: str_field(obj, "theme").unwrap_or(defaults.theme),
        active_tab: str_field(obj, "activeTab")
            .or_else(|| str_field(obj, "lastTab"))
            .unwrap_or(defaults.active_tab),
        widgets: as_object(obj.get("widgets")).cloned().unwrap_or_default(),
        extra: extra_without(obj, &UI_KNOWN),
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

fn view(value: Option<&Value>) -> MapView {
    let Some(obj) = as_object(value) else {
        return MapView::default();
    };
    let number = |field: &str| obj.get(field).and_then(Value::as_f64);
    MapView {
        zoom: number("zoom").filter(|z| *z > 0.0).unwrap_or(1.0),
        offset_x: number("offsetX").unwrap_or(0.0),
        offset_y: number("offsetY").unwrap_or(0.0),
        extra: extra_without(obj, &VIEW_KNOWN),
    }
}

fn brush_size(obj: &Map<String, Value>) -> Option<u32> {
    obj.get("brushSize")
        .and_then(Value::as_u64)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn color_key(obj: &Map<String, Value>) -> Option<String> {
    str_field(obj, "colorKey").or_else(|| str_field(obj, "color"))
}

fn entry(
    obj: &Map<String, Value>,
    index: usize,
    seen: &mut HashSet<MapId>,
    ctx: &mut Ctx<'_>,
) -> MapEntry {
    let parent = format!("map.maps[{index}]");
    let mut entry = MapEntry::new(
        str_field(obj, "name").unwrap_or_else(|| format!("Map {}", index + 1)),
    );
    if let Some(id) = id_field(obj, "id").map(MapId::new) {
        if !seen.contains(&id) {
            entry.id = id;
        } else {
            warn!(map_id = %id, "duplicate map id; assigning a fresh one");
        }
    }
    seen.insert(entry.id.clone());
    entry.bg_blob_ref = ctx.image(obj, &parent, &MAP_BG_INLINE_FIELDS, &MAP_BG_REF_FIELDS);
    entry.drawing_blob_ref =
        ctx.image(obj, &parent, &MAP_DRAWING_INLINE_FIELDS, &MAP_DRAWING_REF_FIELDS);
    if let Some(color) = color_key(obj) {
        entry.color_key = color;
    }
    if let Some(size) = brush_size(obj) {
        entry.brush_size = size;
    }
    entry
}

/// Schema 3+: read the list as-is.
pub(crate) fn multi_map(map: &Map<String, Value>, ctx: &mut Ctx<'_>) -> MapState {
    let mut seen = HashSet::new();
    let maps = map
        .get("maps")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .enumerate()
                .filter_map(|(i, e)| e.as_object().map(|obj| entry(obj, i, &mut seen, ctx)))
                .collect()
        })
        .unwrap_or_default();
    let mut state = MapState {
        maps,
        active_map_id: id_field(map, "activeMapId")
            .map(MapId::new)
            .unwrap_or_else(|| MapId::new("")),
        ui: view(map.get("ui")),
    };
    state.ensure_valid();
    state
}

/// Schema 1–2: fold the implicit single map into one generated entry.
pub(crate) fn single_map(root: &Map<String, Value>, ctx: &mut Ctx<'_>) -> MapState {
    let empty = Map::new();
    let map = as_object(root.get("map")).unwrap_or(&empty);

    let mut entry = MapEntry::new("Map 1");
    entry.bg_blob_ref = ctx
        .image(map, "map", &MAP_BG_INLINE_FIELDS, &MAP_BG_REF_FIELDS)
        .or_else(|| ctx.image(root, "", &MAP_BG_INLINE_FIELDS, &MAP_BG_REF_FIELDS));
    entry.drawing_blob_ref = ctx
        .image(map, "map", &MAP_DRAWING_INLINE_FIELDS, &MAP_DRAWING_REF_FIELDS)
        .or_else(|| ctx.image(root, "", &MAP_DRAWING_INLINE_FIELDS, &MAP_DRAWING_REF_FIELDS));
    if let Some(color) = color_key(map).or_else(|| color_key(root)) {
        entry.color_key = color;
    }
    if let Some(size) = brush_size(map).or_else(|| brush_size(root)) {
        entry.brush_size = size;
    }

    let view_source = map.get("ui").or_else(|| map.get("view"));
    MapState {
        active_map_id: entry.id.clone(),
        maps: vec![entry],
        ui: view(view_source),
    }
}
