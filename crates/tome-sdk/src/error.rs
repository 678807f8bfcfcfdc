use thiserror::Error;
use tome_types::MapId;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("store error: {0}")]
    Store(#[from] tome_store::StoreError),

    #[error("save error: {0}")]
    Save(#[from] tome_save::SaveError),

    #[error("backup error: {0}")]
    Backup(#[from] tome_backup::BackupError),

    #[error("{0}")]
    Model(#[from] tome_types::TypeError),

    #[error("not a supported image (PNG, JPEG or WEBP)")]
    UnsupportedImage,

    #[error("no {section} entry with id {id}")]
    EntityNotFound { section: String, id: String },

    #[error("map not found: {0}")]
    MapNotFound(MapId),

    #[error("application state lock poisoned")]
    Poisoned,
}

pub type SdkResult<T> = Result<T, SdkError>;
