//! Backup bundles for Tome.
//!
//! A bundle is one JSON document holding the snapshot, every referenced
//! image as an inline `data:` URL, and every text record:
//!
//! ```text
//! { "version": 2, "exportedAt": "...", "state": {...},
//!   "blobs": { "<id>": "data:image/png;base64,..." },
//!   "texts": { "<key>": "..." } }
//! ```
//!
//! # Import
//!
//! [`validate_bundle`] checks size, syntax, version, image count and every
//! image's type and signature, decodes all payloads and migrates the state,
//! all before any store is touched. [`restore`] then wipes and repopulates
//! the stores, giving each image a fresh id and rewriting references.
//! Failures during that second phase are reported as
//! [`BackupError::PartialRestore`]; there is no rollback.

pub mod bundle;
pub mod error;
pub mod export;
pub mod import;
pub mod limits;
pub mod reset;

pub use bundle::{suggested_file_name, BackupBundle, BUNDLE_VERSION};
pub use error::{BackupError, BackupResult, ValidationError};
pub use export::{export_bundle, ExportReport, SkippedBlob};
pub use import::{
    import_bundle, restore, validate_bundle, ImportReport, NoOpHook, PostImportHook, Stores,
    ValidatedBundle,
};
pub use limits::ImportLimits;
pub use reset::reset_all;
