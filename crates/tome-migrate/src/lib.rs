//! Schema migration for stored Tome snapshots.
//!
//! [`migrate`] maps a raw snapshot of any historical shape onto the current
//! [`AppState`]. It is pure (no I/O), total (every input yields a state) and
//! idempotent: migrating an already-current snapshot returns the same
//! content.
//!
//! # Handled drift
//!
//! - missing or mistyped fields fall back to defaults
//! - the single-map layout of schema 1–2 is folded into one generated
//!   [`MapEntry`](tome_types::MapEntry)
//! - inline `data:` images of schema 1 are replaced by the blob ids the
//!   caller stored for them (see [`scan_inline_images`])
//! - persisted undo/redo stacks from old builds are discarded
//! - snapshots from newer builds are read best-effort and flagged with
//!   [`MigrationDrift::Future`]

pub mod inline;
mod sections;
pub mod snapshot;

use std::fmt;

use serde_json::Value;
use tome_types::AppState;
use tracing::{info, warn};

pub use inline::{scan_inline_images, DataUrl, InlineAssignments, InlineImage};
pub use snapshot::StoredSnapshot;
pub use tome_types::CURRENT_SCHEMA_VERSION;

use crate::sections::Ctx;

/// Reasons a migrated state may not faithfully reflect the stored one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationDrift {
    /// Written by a newer build with this schema version.
    Future { found: u32 },
    /// The stored document was not a JSON object.
    Unreadable,
}

impl fmt::Display for MigrationDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationDrift::Future { found } => write!(
                f,
                "saved data comes from a newer version (schema {found}); export a backup before editing"
            ),
            MigrationDrift::Unreadable => {
                write!(f, "saved data was unreadable; starting from defaults")
            }
        }
    }
}

/// Output of one migration pass.
#[derive(Clone, Debug, PartialEq)]
pub struct Migrated {
    pub state: AppState,
    /// Declared version of the input, `None` if unreadable.
    pub from_version: Option<u32>,
    pub drift: Option<MigrationDrift>,
    /// Inline image slots that had no assignment and were dropped.
    pub dropped_inline: Vec<String>,
}

/// Migrate a raw snapshot to the current shape.
pub fn migrate(raw: &Value, assignments: &InlineAssignments) -> Migrated {
    let snapshot = StoredSnapshot::classify(raw);
    let mut ctx = Ctx::new(assignments);

    let (version, root, map) = match &snapshot {
        StoredSnapshot::Unreadable => {
            warn!("stored snapshot is not an object; using defaults");
            return Migrated {
                state: AppState::default(),
                from_version: None,
                drift: Some(MigrationDrift::Unreadable),
                dropped_inline: Vec::new(),
            };
        }
        StoredSnapshot::SingleMap { version, root } => {
            (*version, *root, sections::single_map(root, &mut ctx))
        }
        StoredSnapshot::MultiMap { version, root } => {
            let map = root
                .get("map")
                .and_then(Value::as_object)
                .map(|m| sections::multi_map(m, &mut ctx))
                .unwrap_or_default();
            (*version, *root, map)
        }
    };

    let drift = if snapshot.is_future() {
        warn!(
            found = version,
            current = CURRENT_SCHEMA_VERSION,
            "snapshot written by a newer build; reading best-effort"
        );
        Some(MigrationDrift::Future { found: version })
    } else {
        if version < CURRENT_SCHEMA_VERSION {
            info!(from = version, to = CURRENT_SCHEMA_VERSION, "migrating snapshot");
        }
        None
    };

    let state = AppState {
        schema_version: CURRENT_SCHEMA_VERSION,
        tracker: sections::tracker(root.get("tracker"), &mut ctx),
        character: sections::character(root.get("character"), &mut ctx),
        map,
        ui: sections::ui(root.get("ui")),
    };

    Migrated {
        state,
        from_version: Some(version),
        drift,
        dropped_inline: ctx.dropped,
    }
}

/// Parse and migrate a stored document. Unparsable text counts as
/// [`MigrationDrift::Unreadable`].
pub fn migrate_str(document: &str, assignments: &InlineAssignments) -> Migrated {
    match serde_json::from_str::<Value>(document) {
        Ok(raw) => migrate(&raw, assignments),
        Err(e) => {
            warn!(error = %e, "stored snapshot is not valid JSON; using defaults");
            migrate(&Value::Null, assignments)
        }
    }
}
