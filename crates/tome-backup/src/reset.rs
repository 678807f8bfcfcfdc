use std::sync::RwLock;

use tome_types::AppState;
use tracing::{info, warn};

use crate::error::{BackupError, BackupResult};
use crate::import::Stores;

/// Wipe every store and reset `live` to defaults.
///
/// Every step is attempted even if an earlier one fails; the first error
/// is returned.
pub async fn reset_all(stores: Stores<'_>, live: &RwLock<AppState>) -> BackupResult<()> {
    let mut first: Option<BackupError> = None;
    let mut note = |what: &str, result: Result<(), tome_store::StoreError>| {
        if let Err(e) = result {
            warn!(store = what, error = %e, "reset could not clear store");
            first.get_or_insert(BackupError::Store(e));
        }
    };

    note("content", stores.content.clear_all().await);
    note("text", stores.texts.clear_all().await);
    note("snapshot", stores.snapshot.clear());

    match live.write() {
        Ok(mut state) => state.replace_with(AppState::default()),
        Err(_) => {
            first.get_or_insert(BackupError::Poisoned);
        }
    }

    match first {
        Some(e) => Err(e),
        None => {
            info!("campaign reset");
            Ok(())
        }
    }
}
