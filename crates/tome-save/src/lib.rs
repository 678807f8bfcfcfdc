//! Save coordination for Tome.
//!
//! Every state mutation calls [`SaveManager::mark_dirty`]. The manager
//! debounces bursts of mutations into a single snapshot write, guarantees
//! that no two writes overlap, and reports progress as a [`SaveStatus`]
//! both through a `watch` channel and a [`StatusSink`].
//!
//! Failures are surfaced, never retried automatically: the next mutation
//! moves the status out of `Error` and schedules a fresh attempt.

pub mod config;
pub mod error;
pub mod manager;
pub mod status;

pub use config::SaveConfig;
pub use error::{SaveError, SaveResult};
pub use manager::{ExclusiveWrite, FlushOutcome, SaveManager};
pub use status::{LogSink, NoOpSink, SaveStatus, SnapshotSource, StatusSink};
