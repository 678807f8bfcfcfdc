//! Legacy inline images and the `data:` URL codec.
//!
//! Builds with schema 1 stored images as `data:` URLs directly inside the
//! snapshot. Migration is pure, so it cannot move them into the content
//! store itself. Instead the loader calls [`scan_inline_images`], stores each
//! payload, and passes the resulting ids back as [`InlineAssignments`] keyed
//! by the slot path reported here.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};
use tome_types::BlobId;

/// Field names that held inline portraits on tracker entities and the sheet.
pub(crate) const ENTITY_INLINE_FIELDS: [&str; 2] = ["portraitDataUrl", "imgDataUrl"];
pub(crate) const MAP_BG_INLINE_FIELDS: [&str; 2] = ["bgDataUrl", "backgroundDataUrl"];
pub(crate) const MAP_DRAWING_INLINE_FIELDS: [&str; 1] = ["drawingDataUrl"];

/// Tracker section names, including the schema-1 alias `players`.
pub(crate) const TRACKER_SECTIONS: [&str; 4] = ["npcs", "party", "players", "locations"];

/// The key the party is read from: `players` only counts when `party` is absent.
pub(crate) fn party_key(tracker: &Map<String, Value>) -> &'static str {
    if tracker.contains_key("party") {
        "party"
    } else {
        "players"
    }
}

/// Slot path → id of the blob the loader stored for it.
pub type InlineAssignments = HashMap<String, BlobId>;

/// One inline image found in a raw snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineImage {
    /// Stable path of the field, e.g. `tracker.npcs[0].imgDataUrl`.
    pub slot: String,
    pub data_url: String,
}

/// A decoded `data:<mime>;base64,<payload>` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: String,
    pub data: Vec<u8>,
}

impl DataUrl {
    /// Parse a base64 `data:` URL. Returns `None` for any other shape.
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        let data = STANDARD.decode(payload.trim()).ok()?;
        Some(Self {
            mime: mime.to_ascii_lowercase(),
            data,
        })
    }

    pub fn encode(mime: &str, data: &[u8]) -> String {
        format!("data:{mime};base64,{}", STANDARD.encode(data))
    }
}

pub(crate) fn slot_path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{parent}.{field}")
    }
}

pub(crate) fn inline_value<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    obj.get(field)
        .and_then(Value::as_str)
        .filter(|s| s.starts_with("data:"))
}

fn collect(obj: &Map<String, Value>, parent: &str, fields: &[&str], out: &mut Vec<InlineImage>) {
    for field in fields {
        if let Some(url) = inline_value(obj, field) {
            out.push(InlineImage {
                slot: slot_path(parent, field),
                data_url: url.to_string(),
            });
        }
    }
}

/// List every legacy inline image in a raw snapshot, in a stable order.
pub fn scan_inline_images(raw: &Value) -> Vec<InlineImage> {
    let mut out = Vec::new();
    let Some(root) = raw.as_object() else {
        return out;
    };

    if let Some(tracker) = root.get("tracker").and_then(Value::as_object) {
        let party = party_key(tracker);
        for section in ["npcs", party, "locations"] {
            if let Some(items) = tracker.get(section).and_then(Value::as_array) {
                for (i, item) in items.iter().enumerate() {
                    if let Some(obj) = item.as_object() {
                        let parent = format!("tracker.{section}[{i}]");
                        collect(obj, &parent, &ENTITY_INLINE_FIELDS, &mut out);
                    }
                }
            }
        }
    }

    if let Some(character) = root.get("character").and_then(Value::as_object) {
        collect(character, "character", &ENTITY_INLINE_FIELDS, &mut out);
    }

    if let Some(map) = root.get("map").and_then(Value::as_object) {
        match map.get("maps").and_then(Value::as_array) {
            Some(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    if let Some(obj) = entry.as_object() {
                        let parent = format!("map.maps[{i}]");
                        collect(obj, &parent, &MAP_BG_INLINE_FIELDS, &mut out);
                        collect(obj, &parent, &MAP_DRAWING_INLINE_FIELDS, &mut out);
                    }
                }
            }
            None => {
                collect(map, "map", &MAP_BG_INLINE_FIELDS, &mut out);
                collect(map, "map", &MAP_DRAWING_INLINE_FIELDS, &mut out);
            }
        }
    }

    // The oldest layout kept map fields at the top level.
    collect(root, "", &MAP_BG_INLINE_FIELDS, &mut out);
    collect(root, "", &MAP_DRAWING_INLINE_FIELDS, &mut out);
    out
}
