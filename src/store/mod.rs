//! Local-first application state.
//!
//! All mutation goes through [`Store::mutate`]: the closure edits a draft copy of
//! the whole tree, the draft replaces the live state, and the full document is
//! written to the data file on a background task. Callers get a [`WriteReceipt`]
//! they may await for confirmation or simply drop.

mod actions;

pub use actions::{week_of, SpacePatch};

use crate::bridge::DataBridge;
use crate::errors::{AppError, AppResult};
use crate::models::{AppState, CURRENT_STATE_VERSION};
use crate::storage::serialize_state;
use crate::sync::{Change, SyncQueue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{oneshot, Mutex};

/// Completion handle for one background state write.
#[derive(Debug)]
pub struct WriteReceipt {
    rx: oneshot::Receiver<AppResult<()>>,
}

impl WriteReceipt {
    fn resolved(result: AppResult<()>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Waits until the write for this mutation reached the data file.
    pub async fn confirmed(self) -> AppResult<()> {
        self.rx
            .await
            .map_err(|_| AppError::Internal("state write task dropped".to_string()))?
    }
}

pub struct Store {
    state: RwLock<AppState>,
    bridge: Arc<dyn DataBridge>,
    file: String,
    sync: Option<SyncQueue>,
    generation: AtomicU64,
    /// Generation of the document last written to the data file.
    written: Arc<Mutex<u64>>,
}

impl Store {
    pub fn new(bridge: Arc<dyn DataBridge>, file: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(AppState::default()),
            bridge,
            file: file.into(),
            sync: None,
            generation: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Mirrors entity mutations into the remote store through `queue`.
    pub fn with_sync(mut self, queue: SyncQueue) -> Self {
        self.sync = Some(queue);
        self
    }

    pub fn sync_queue(&self) -> Option<&SyncQueue> {
        self.sync.as_ref()
    }

    pub fn file_name(&self) -> &str {
        &self.file
    }

    pub fn mutate<F>(&self, f: F) -> WriteReceipt
    where
        F: FnOnce(&mut AppState),
    {
        self.mutate_with(f).1
    }

    pub fn mutate_with<R, F>(&self, f: F) -> (R, WriteReceipt)
    where
        F: FnOnce(&mut AppState) -> R,
    {
        self.commit(|state, _| f(state))
    }

    /// Like [`Store::mutate_with`], and also queues the remote changes the closure
    /// pushed into the outbox. They are queued before the state lock is released,
    /// so the remote sees changes in the order they were applied locally.
    pub(crate) fn commit<R, F>(&self, f: F) -> (R, WriteReceipt)
    where
        F: FnOnce(&mut AppState, &mut Vec<Change>) -> R,
    {
        let (result, body, generation) = {
            let mut state = self.write();
            let mut draft = state.clone();
            let mut outbox = Vec::new();
            let result = f(&mut draft, &mut outbox);
            draft.version = CURRENT_STATE_VERSION;
            *state = draft;
            if let Some(queue) = &self.sync {
                for change in outbox {
                    queue.enqueue(change);
                }
            }
            (result, serialize_state(&state), self.next_generation())
        };
        (result, self.persist(body, generation))
    }

    /// Installs the snapshot loaded at startup (or keeps the defaults) and
    /// persists once. Later calls change nothing.
    pub fn hydrate(&self, loaded: Option<AppState>) -> WriteReceipt {
        let from_file = loaded.is_some();
        let (body, generation) = {
            let mut state = self.write();
            if state.hydrated {
                tracing::debug!("store already hydrated, ignoring");
                return WriteReceipt::resolved(Ok(()));
            }
            if let Some(loaded) = loaded {
                *state = loaded;
            }
            state.hydrated = true;
            state.version = CURRENT_STATE_VERSION;
            (serialize_state(&state), self.next_generation())
        };
        tracing::info!(from_file, "store hydrated");
        self.persist(body, generation)
    }

    pub fn is_hydrated(&self) -> bool {
        self.read().hydrated
    }

    pub fn snapshot(&self) -> AppState {
        self.read().clone()
    }

    pub fn select<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.read())
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn persist(&self, body: AppResult<String>, generation: u64) -> WriteReceipt {
        let body = match body {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(error = %error, "failed to serialize state");
                return WriteReceipt::resolved(Err(error));
            }
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(file = %self.file, "no async runtime, state write skipped");
                return WriteReceipt::resolved(Err(AppError::Internal(
                    "no async runtime available for state write".to_string(),
                )));
            }
        };

        let (tx, rx) = oneshot::channel();
        let bridge = self.bridge.clone();
        let file = self.file.clone();
        let written = self.written.clone();
        handle.spawn(async move {
            // Writes may finish out of order; an older document never replaces a newer one.
            let mut last = written.lock().await;
            if *last > generation {
                let _ = tx.send(Ok(()));
                return;
            }
            let result = bridge.write_data_file(&file, &body).await;
            match &result {
                Ok(()) => *last = generation,
                Err(error) => tracing::warn!(error = %error, file = %file, "failed to save state"),
            }
            let _ = tx.send(result);
        });
        WriteReceipt { rx }
    }

    // A closure that panics leaves the live state untouched (it only saw a draft),
    // so a poisoned lock is still safe to use.
    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
