//! Foundation types for Tome.
//!
//! This crate holds the durable application model that every other Tome
//! crate reads and writes. It contains no I/O.
//!
//! # Key Types
//!
//! - [`AppState`]: the single root aggregate persisted as the snapshot
//! - [`MapState`] / [`MapEntry`]: the ordered map list (always non-empty)
//! - [`MapHistory`]: ephemeral undo/redo frames, deliberately not serializable
//! - [`BlobId`], [`TextKey`], [`MapId`]: identifiers into the stores
//! - [`BlobRecord`] / [`ImageFormat`]: binary payloads and their signatures
//!
//! # Mutation Contract
//!
//! Exactly one `AppState` lives for the lifetime of the process. Components
//! mutate its subtrees in place; load and import replace its *contents*
//! through [`AppState::replace_with`] so that shared handles stay valid.

pub mod error;
pub mod ids;
pub mod map;
pub mod record;
pub mod refs;
pub mod state;

pub use error::{TypeError, TypeResult};
pub use ids::{BlobId, MapId, TextKey};
pub use map::{HistoryFrame, MapEntry, MapHistory, MapState, MapView};
pub use record::{BlobRecord, ImageFormat};
pub use refs::BlobRefSlot;
pub use state::{
    AppState, Character, StateHandle, Tracker, TrackerEntity, UiState, CURRENT_SCHEMA_VERSION,
};
