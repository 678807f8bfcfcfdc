use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tome_store::SnapshotStore;
use tracing::{debug, error, warn};

use crate::config::SaveConfig;
use crate::error::{SaveError, SaveResult};
use crate::status::{SaveStatus, SnapshotSource, StatusSink};

/// What a call to [`SaveManager::flush`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was dirty.
    Clean,
    /// The snapshot was written `writes` times (more than once when
    /// mutations arrived during the write).
    Written { writes: usize },
    /// A write was already in flight; it will run once more when done.
    Coalesced,
}

#[derive(Default)]
struct Inner {
    dirty: bool,
    saving: bool,
    reflush: bool,
    debounce_timer: Option<JoinHandle<()>>,
    status_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timers(&mut self) {
        if let Some(t) = self.debounce_timer.take() {
            t.abort();
        }
        if let Some(t) = self.status_timer.take() {
            t.abort();
        }
    }
}

struct Shared {
    config: SaveConfig,
    source: Arc<dyn SnapshotSource>,
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn StatusSink>,
    inner: Mutex<Inner>,
    status: watch::Sender<SaveStatus>,
    /// Signalled whenever the write slot is released.
    idle: Notify,
}

/// Debounced, single-flight writer of the application snapshot.
///
/// ```text
///   Saved ──mark_dirty──▶ Dirty ──flush──▶ Saving ──ok──▶ Saved
///     ▲                     ▲                 │
///     │                     └──mark_dirty── Error ◀──fail──┘
/// ```
///
/// At most one snapshot write is in flight at any time. A flush requested
/// while a write runs is coalesced into one trailing write, so the last
/// mutation before a quiet period is always persisted.
///
/// Timers run on the ambient tokio runtime. Without one, `mark_dirty` only
/// records the change and the caller has to `flush` explicitly.
#[derive(Clone)]
pub struct SaveManager {
    shared: Arc<Shared>,
}

impl SaveManager {
    pub fn new(
        config: SaveConfig,
        source: Arc<dyn SnapshotSource>,
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn StatusSink>,
    ) -> Self {
        let (status, _) = watch::channel(SaveStatus::Saved);
        Self {
            shared: Arc::new(Shared {
                config,
                source,
                store,
                sink,
                inner: Mutex::new(Inner::default()),
                status,
                idle: Notify::new(),
            }),
        }
    }

    pub fn status(&self) -> SaveStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SaveStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_dirty(&self) -> bool {
        self.shared.lock().map(|i| i.dirty).unwrap_or(false)
    }

    pub fn config(&self) -> &SaveConfig {
        &self.shared.config
    }

    /// Reset to `Saved` and cancel pending timers. Called after a full load.
    pub fn init(&self) -> SaveResult<()> {
        let mut inner = self.shared.lock()?;
        inner.cancel_timers();
        inner.dirty = false;
        inner.reflush = false;
        self.shared.publish(SaveStatus::Saved, None);
        Ok(())
    }

    /// Record a mutation and schedule a write after the debounce window.
    pub fn mark_dirty(&self) -> SaveResult<()> {
        let mut inner = self.shared.lock()?;
        inner.dirty = true;

        if self.status() == SaveStatus::Error {
            self.shared.publish(SaveStatus::Dirty, None);
        }

        let Ok(runtime) = Handle::try_current() else {
            warn!("no async runtime; changes are kept until the next explicit flush");
            return Ok(());
        };

        if inner.status_timer.is_none() && self.status() == SaveStatus::Saved {
            let shared = Arc::clone(&self.shared);
            let delay = self.shared.config.status_delay();
            inner.status_timer = Some(runtime.spawn(async move {
                tokio::time::sleep(delay).await;
                shared.show_dirty();
            }));
        }

        if let Some(t) = inner.debounce_timer.take() {
            t.abort();
        }
        let manager = self.clone();
        let debounce = self.shared.config.debounce();
        inner.debounce_timer = Some(runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = manager.flush() {
                debug!(error = %e, "debounced flush failed");
            }
        }));
        Ok(())
    }

    /// Write the snapshot now if it is dirty.
    ///
    /// Returns `Coalesced` without writing when another write is in flight;
    /// that write then runs once more before finishing.
    pub fn flush(&self) -> SaveResult<FlushOutcome> {
        let shared = &self.shared;
        let mut inner = shared.lock()?;
        if inner.saving {
            inner.reflush = true;
            debug!("write in flight; coalescing flush");
            return Ok(FlushOutcome::Coalesced);
        }
        if let Some(t) = inner.debounce_timer.take() {
            t.abort();
        }
        if !inner.dirty {
            if let Some(t) = inner.status_timer.take() {
                t.abort();
            }
            if self.status() != SaveStatus::Error {
                shared.publish(SaveStatus::Saved, None);
            }
            return Ok(FlushOutcome::Clean);
        }

        let mut writes = 0;
        loop {
            inner.saving = true;
            inner.dirty = false;
            inner.reflush = false;
            shared.publish(SaveStatus::Saving, None);
            drop(inner);

            let result = shared
                .source
                .snapshot()
                .and_then(|doc| shared.store.write(&doc).map_err(SaveError::from));

            inner = shared.lock()?;
            match result {
                Ok(()) => {
                    writes += 1;
                    if inner.reflush && inner.dirty {
                        debug!(writes, "mutations arrived during write; writing again");
                        continue;
                    }
                    inner.saving = false;
                    inner.reflush = false;
                    shared.idle.notify_waiters();
                    if !inner.dirty {
                        if let Some(t) = inner.status_timer.take() {
                            t.abort();
                        }
                    }
                    let next = if inner.dirty {
                        SaveStatus::Dirty
                    } else {
                        SaveStatus::Saved
                    };
                    shared.publish(next, None);
                    debug!(writes, "snapshot saved");
                    return Ok(FlushOutcome::Written { writes });
                }
                Err(e) => {
                    inner.saving = false;
                    inner.reflush = false;
                    inner.dirty = true;
                    shared.idle.notify_waiters();
                    error!(error = %e, "snapshot write failed");
                    shared.publish(SaveStatus::Error, Some(e.user_message()));
                    return Err(e);
                }
            }
        }
    }

    /// Wait for any in-flight write, then take the write slot.
    ///
    /// Pending timers are cancelled. Until the returned guard is dropped no
    /// snapshot write starts and `flush` returns `Coalesced`, so the holder
    /// may write or clear the store directly without racing a save.
    pub async fn exclusive(&self) -> SaveResult<ExclusiveWrite> {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();
            {
                let mut inner = self.shared.lock()?;
                if !inner.saving {
                    inner.saving = true;
                    inner.cancel_timers();
                    return Ok(ExclusiveWrite {
                        manager: self.clone(),
                    });
                }
            }
            debug!("waiting for the in-flight write before taking the slot");
            idle.await;
        }
    }
}

/// The write slot of a [`SaveManager`], held until dropped.
///
/// A flush coalesced while the slot was held is rescheduled on release if
/// the state is still dirty.
#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct ExclusiveWrite {
    manager: SaveManager,
}

impl Drop for ExclusiveWrite {
    fn drop(&mut self) {
        let shared = &self.manager.shared;
        let pending = match shared.lock() {
            Ok(mut inner) => {
                inner.saving = false;
                let pending = inner.reflush && inner.dirty;
                inner.reflush = false;
                pending
            }
            Err(_) => false,
        };
        shared.idle.notify_waiters();
        if pending {
            if let Err(e) = self.manager.mark_dirty() {
                debug!(error = %e, "could not reschedule save after exclusive write");
            }
        }
    }
}

impl Shared {
    fn lock(&self) -> SaveResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| SaveError::Poisoned)
    }

    fn publish(&self, status: SaveStatus, message: Option<String>) {
        let previous = self.status.send_replace(status);
        if previous != status || message.is_some() {
            let text = message.unwrap_or_else(|| status.label().to_string());
            self.sink.set_status(&text);
        }
    }

    /// Status-delay timer: show `Dirty` unless a save finished meanwhile.
    fn show_dirty(&self) {
        let Ok(mut inner) = self.lock() else {
            return;
        };
        inner.status_timer = None;
        if inner.dirty && *self.status.borrow() == SaveStatus::Saved {
            self.publish(SaveStatus::Dirty, None);
        }
    }
}
