//! Storage backends for Tome.
//!
//! Three independent stores hold a campaign:
//!
//! - [`ContentStore`]: immutable binary blobs (portraits, map layers) keyed
//!   by ids the store generates
//! - [`TextStore`]: large text fields keyed by caller-chosen [`TextKey`]s
//! - [`SnapshotStore`]: one JSON document holding the whole [`AppState`]
//!
//! The blob and text stores are asynchronous; the snapshot store is
//! synchronous and is only ever written by the save manager.
//!
//! # Backends
//!
//! - [`InMemoryContentStore`], [`InMemoryTextStore`], [`InMemorySnapshotStore`]:
//!   for tests and embedding, with capacity limits and an offline switch
//!   so quota and availability failures can be exercised
//! - [`FsContentStore`], [`FsTextStore`], [`FsSnapshotStore`]: files under
//!   a data directory, replaced atomically
//!
//! # Rules
//!
//! 1. `put` never overwrites: every call yields a fresh id.
//! 2. `delete` of a missing id succeeds.
//! 3. The stores never interpret payloads and never collect orphans; the
//!    code that drops a reference deletes the blob.
//!
//! [`TextKey`]: tome_types::TextKey
//! [`AppState`]: tome_types::AppState

pub mod error;
pub mod fs;
pub mod handle;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fs::{FsContentStore, FsSnapshotStore, FsTextStore};
pub use handle::{DisplayHandle, HandleRegistry};
pub use memory::{InMemoryContentStore, InMemorySnapshotStore, InMemoryTextStore};
pub use traits::{ContentStore, SnapshotStore, TextStore};
