use thiserror::Error;
use tome_store::StoreError;
use tome_types::TypeError;

/// Errors from the save manager.
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("snapshot write failed: {0}")]
    Store(#[from] StoreError),

    #[error("could not serialize snapshot: {0}")]
    Snapshot(#[from] TypeError),

    #[error("save manager lock poisoned")]
    Poisoned,
}

impl SaveError {
    /// Short message suitable for a status line.
    pub fn user_message(&self) -> String {
        match self {
            SaveError::Store(StoreError::QuotaExceeded(_)) => {
                "Save failed: storage is full. Free some space or export a backup.".into()
            }
            SaveError::Store(StoreError::BackendUnavailable(_)) => {
                "Save failed: storage is unavailable.".into()
            }
            other => format!("Save failed: {other}"),
        }
    }
}

pub type SaveResult<T> = Result<T, SaveError>;
