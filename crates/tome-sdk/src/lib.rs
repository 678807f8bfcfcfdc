//! High-level SDK for Tome.
//!
//! [`Campaign`] is the entry point for applications embedding the
//! persistence core. It owns the single application state and wires the
//! stores, the migrator, the save manager and the backup codec together:
//!
//! - opening a campaign runs the load path (read, convert inline images,
//!   migrate, clear dangling references, write back)
//! - every mutation goes through [`Campaign::update`] or a dedicated method
//!   and schedules a debounced save
//! - images are replaced with the delete, store, assign protocol of
//!   [`Campaign::replace_blob_ref`]
//! - backups are exported and imported as bundle bytes; the caller handles
//!   files

pub mod campaign;
pub mod collab;
pub mod config;
pub mod error;
pub mod stores;

pub use campaign::{BlobSlot, Campaign, LoadReport};
pub use collab::{AlwaysConfirm, Confirm};
pub use config::{CampaignConfig, HistoryConfig};
pub use error::{SdkError, SdkResult};
pub use stores::CampaignStores;

// Re-export key types
pub use tome_backup::{
    suggested_file_name, ExportReport, ImportLimits, ImportReport, NoOpHook, PostImportHook,
};
pub use tome_migrate::MigrationDrift;
pub use tome_save::{FlushOutcome, LogSink, NoOpSink, SaveConfig, SaveStatus, StatusSink};
pub use tome_types::{AppState, BlobId, BlobRecord, HistoryFrame, MapId, StateHandle, TextKey};
