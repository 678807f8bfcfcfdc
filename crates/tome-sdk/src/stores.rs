use std::path::Path;
use std::sync::Arc;

use tome_backup::Stores;
use tome_store::{
    ContentStore, FsContentStore, FsSnapshotStore, FsTextStore, InMemoryContentStore,
    InMemorySnapshotStore, InMemoryTextStore, SnapshotStore, StoreResult, TextStore,
};

/// The three backends a campaign is persisted in.
#[derive(Clone)]
pub struct CampaignStores {
    pub content: Arc<dyn ContentStore>,
    pub texts: Arc<dyn TextStore>,
    pub snapshot: Arc<dyn SnapshotStore>,
}

impl CampaignStores {
    pub fn in_memory() -> Self {
        Self {
            content: Arc::new(InMemoryContentStore::new()),
            texts: Arc::new(InMemoryTextStore::new()),
            snapshot: Arc::new(InMemorySnapshotStore::new()),
        }
    }

    /// File-backed stores rooted at `dir`, created if missing.
    pub async fn open_dir(dir: &Path) -> StoreResult<Self> {
        Ok(Self {
            content: Arc::new(FsContentStore::open(dir).await?),
            texts: Arc::new(FsTextStore::open(dir).await?),
            snapshot: Arc::new(FsSnapshotStore::open(dir)?),
        })
    }

    pub(crate) fn borrowed(&self) -> Stores<'_> {
        Stores {
            content: self.content.as_ref(),
            texts: self.texts.as_ref(),
            snapshot: self.snapshot.as_ref(),
        }
    }
}
