use std::io;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The write was rejected for capacity.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The backend is missing, blocked or switched off.
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Stored data could not be decoded.
    #[error("corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(io::Error),
}

impl StoreError {
    /// Whether this is a capacity failure.
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded(_))
    }

    pub(crate) fn poisoned(e: impl std::fmt::Display) -> Self {
        StoreError::BackendUnavailable(format!("lock poisoned: {e}"))
    }
}

// Disk-full and permission failures map onto the quota/availability
// taxonomy so callers can surface them the same way as the in-memory limits.
impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        const ENOSPC: i32 = 28;
        const EDQUOT: i32 = 122;
        match e.raw_os_error() {
            Some(ENOSPC) | Some(EDQUOT) => StoreError::QuotaExceeded(e.to_string()),
            _ if e.kind() == io::ErrorKind::PermissionDenied => {
                StoreError::BackendUnavailable(e.to_string())
            }
            _ => StoreError::Io(e),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_full_maps_to_quota() {
        let err: StoreError = io::Error::from_raw_os_error(28).into();
        assert!(err.is_quota());
    }

    #[test]
    fn permission_denied_maps_to_unavailable() {
        let err: StoreError = io::Error::new(io::ErrorKind::PermissionDenied, "ro").into();
        assert!(matches!(err, StoreError::BackendUnavailable(_)));
    }

    #[test]
    fn other_io_stays_io() {
        let err: StoreError = io::Error::new(io::ErrorKind::NotFound, "x").into();
        assert!(matches!(err, StoreError::Io(_)));
    }
}
