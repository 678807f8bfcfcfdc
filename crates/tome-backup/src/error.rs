use thiserror::Error;
use tome_store::StoreError;
use tome_types::TypeError;

/// Why a bundle was rejected. Raised before any store is touched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("backup is {size} bytes; the limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("backup is not valid JSON: {0}")]
    Malformed(String),

    #[error("unsupported backup version: {0}")]
    UnsupportedVersion(String),

    #[error("backup holds {count} images; the limit is {limit}")]
    TooManyBlobs { count: usize, limit: usize },

    #[error("image {id} rejected: {reason}")]
    DisallowedImage { id: String, reason: String },

    #[error("image {id} has a corrupt payload: {reason}")]
    CorruptPayload { id: String, reason: String },
}

/// Errors from export, import and reset.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("invalid backup: {0}")]
    Validation(#[from] ValidationError),

    /// A store failed after the wipe started; the campaign may be incomplete.
    #[error("import interrupted while {stage}; data may be incomplete: {source}")]
    PartialRestore {
        stage: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("post-import hook failed: {0}")]
    Hook(String),

    #[error("application state lock poisoned")]
    Poisoned,
}

impl From<TypeError> for BackupError {
    fn from(e: TypeError) -> Self {
        BackupError::Serialization(e.to_string())
    }
}

impl BackupError {
    /// Whether nothing was changed by the failed operation.
    pub fn is_validation(&self) -> bool {
        matches!(self, BackupError::Validation(_))
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
