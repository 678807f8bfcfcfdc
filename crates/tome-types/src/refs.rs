//! Enumeration and rewriting of every blob reference in an [`AppState`].
//!
//! The backup codec, the integrity check and the asset protocol all need the
//! same list of slots; keeping the walk in one place means a new `*BlobRef`
//! field only has to be added here.

use crate::ids::BlobId;
use crate::state::AppState;

/// A blob reference together with the path of the field that holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobRefSlot {
    /// Dotted field path, e.g. `map.maps[1].bgBlobRef`.
    pub path: String,
    pub id: BlobId,
}

impl AppState {
    /// Visit every blob reference slot, populated or not.
    pub fn visit_blob_refs_mut(&mut self, mut f: impl FnMut(&str, &mut Option<BlobId>)) {
        for (kind, entities) in self.tracker.sections_mut() {
            for (i, entity) in entities.iter_mut().enumerate() {
                f(
                    &format!("tracker.{kind}[{i}].portraitBlobRef"),
                    &mut entity.portrait_blob_ref,
                );
            }
        }
        f("character.portraitBlobRef", &mut self.character.portrait_blob_ref);
        for (i, entry) in self.map.maps.iter_mut().enumerate() {
            f(&format!("map.maps[{i}].bgBlobRef"), &mut entry.bg_blob_ref);
            f(&format!("map.maps[{i}].drawingBlobRef"), &mut entry.drawing_blob_ref);
        }
    }

    /// Every populated blob reference, in walk order.
    pub fn blob_refs(&self) -> Vec<BlobRefSlot> {
        let mut slots = Vec::new();
        let mut push = |path: String, id: &Option<BlobId>| {
            if let Some(id) = id {
                slots.push(BlobRefSlot {
                    path,
                    id: id.clone(),
                });
            }
        };
        for (kind, entities) in self.tracker.sections() {
            for (i, entity) in entities.iter().enumerate() {
                push(
                    format!("tracker.{kind}[{i}].portraitBlobRef"),
                    &entity.portrait_blob_ref,
                );
            }
        }
        push(
            "character.portraitBlobRef".to_string(),
            &self.character.portrait_blob_ref,
        );
        for (i, entry) in self.map.maps.iter().enumerate() {
            push(format!("map.maps[{i}].bgBlobRef"), &entry.bg_blob_ref);
            push(format!("map.maps[{i}].drawingBlobRef"), &entry.drawing_blob_ref);
        }
        slots
    }

    /// Distinct referenced blob ids, sorted.
    pub fn referenced_blob_ids(&self) -> Vec<BlobId> {
        let mut ids: Vec<BlobId> = self.blob_refs().into_iter().map(|s| s.id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}
