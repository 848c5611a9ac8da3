use crate::errors::AppResult;
use crate::models::{
    AiLogEntry, Goal, GoalPatch, OneOnOneItem, OneOnOnePatch, Person, PersonPatch, PromptLog, Task,
    TaskPatch,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// One mirrored mutation. Every (operation, table) pair is its own variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    InsertTask(Task),
    UpdateTask { id: String, patch: TaskPatch },
    DeleteTask { id: String },
    InsertGoal(Goal),
    UpdateGoal {
        id: String,
        patch: GoalPatch,
        updated_at: DateTime<Utc>,
    },
    DeleteGoal { id: String },
    InsertPerson(Person),
    UpdatePerson { id: String, patch: PersonPatch },
    DeletePerson { id: String },
    InsertOneOnOne(OneOnOneItem),
    UpdateOneOnOne { id: String, patch: OneOnOnePatch },
    DeleteOneOnOne { id: String },
    InsertPrompt(PromptLog),
    InsertAiLog(AiLogEntry),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

impl ChangeOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl Change {
    /// Remote table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::InsertTask(_) | Self::UpdateTask { .. } | Self::DeleteTask { .. } => "tasks",
            Self::InsertGoal(_) | Self::UpdateGoal { .. } | Self::DeleteGoal { .. } => "goals",
            Self::InsertPerson(_) | Self::UpdatePerson { .. } | Self::DeletePerson { .. } => {
                "one_on_one_people"
            }
            Self::InsertOneOnOne(_) | Self::UpdateOneOnOne { .. } | Self::DeleteOneOnOne { .. } => {
                "one_on_ones"
            }
            Self::InsertPrompt(_) => "prompts",
            Self::InsertAiLog(_) => "ai_logs",
        }
    }

    pub fn operation(&self) -> ChangeOp {
        match self {
            Self::InsertTask(_)
            | Self::InsertGoal(_)
            | Self::InsertPerson(_)
            | Self::InsertOneOnOne(_)
            | Self::InsertPrompt(_)
            | Self::InsertAiLog(_) => ChangeOp::Insert,
            Self::UpdateTask { .. }
            | Self::UpdateGoal { .. }
            | Self::UpdatePerson { .. }
            | Self::UpdateOneOnOne { .. } => ChangeOp::Update,
            Self::DeleteTask { .. }
            | Self::DeleteGoal { .. }
            | Self::DeletePerson { .. }
            | Self::DeleteOneOnOne { .. } => ChangeOp::Delete,
        }
    }

    pub fn target_id(&self) -> &str {
        match self {
            Self::InsertTask(task) => &task.id,
            Self::InsertGoal(goal) => &goal.id,
            Self::InsertPerson(person) => &person.id,
            Self::InsertOneOnOne(item) => &item.id,
            Self::InsertPrompt(prompt) => &prompt.id,
            Self::InsertAiLog(entry) => &entry.id,
            Self::UpdateTask { id, .. }
            | Self::DeleteTask { id }
            | Self::UpdateGoal { id, .. }
            | Self::DeleteGoal { id }
            | Self::UpdatePerson { id, .. }
            | Self::DeletePerson { id }
            | Self::UpdateOneOnOne { id, .. }
            | Self::DeleteOneOnOne { id } => id,
        }
    }
}

/// The remote relational store the queue mirrors into.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn apply(&self, change: &Change) -> AppResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Idle,
    Draining,
    /// Not draining, but a failed change is waiting for the next enqueue or flush.
    Backlog,
}

#[derive(Debug, Default)]
struct Inner {
    pending: VecDeque<Change>,
    draining: bool,
}

/// FIFO mirror queue with a single-flight drain loop.
#[derive(Clone)]
pub struct SyncQueue {
    remote: Arc<dyn RemoteStore>,
    inner: Arc<Mutex<Inner>>,
    idle: Arc<Notify>,
}

impl SyncQueue {
    pub fn new(remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            remote,
            inner: Arc::new(Mutex::new(Inner::default())),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Appends and starts a background drain when none is running. Never blocks.
    pub fn enqueue(&self, change: Change) {
        let start = {
            let mut inner = self.lock();
            tracing::debug!(
                table = change.table(),
                op = change.operation().as_str(),
                id = change.target_id(),
                "sync change queued"
            );
            inner.pending.push_back(change);
            if inner.draining {
                false
            } else {
                inner.draining = true;
                true
            }
        };
        if !start {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let queue = self.clone();
                handle.spawn(async move {
                    queue.drain().await;
                });
            }
            Err(_) => {
                tracing::debug!("no async runtime, sync change left queued");
                self.lock().draining = false;
            }
        }
    }

    /// Drives the queue on the calling task. Returns at once when another drain is running.
    pub async fn flush(&self) {
        {
            let mut inner = self.lock();
            if inner.draining || inner.pending.is_empty() {
                return;
            }
            inner.draining = true;
        }
        self.clone().drain().await;
    }

    /// Resolves once no drain is in progress.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.lock().draining {
                return;
            }
            notified.await;
        }
    }

    pub fn state(&self) -> QueueState {
        let inner = self.lock();
        match (inner.draining, inner.pending.is_empty()) {
            (true, _) => QueueState::Draining,
            (false, true) => QueueState::Idle,
            (false, false) => QueueState::Backlog,
        }
    }

    pub fn pending(&self) -> Vec<Change> {
        self.lock().pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().pending.is_empty()
    }

    async fn drain(self) {
        loop {
            // Pop and flag reset share one guard: an enqueue either sees this drain
            // running or starts its own.
            let next = {
                let mut inner = self.lock();
                let next = inner.pending.pop_front();
                if next.is_none() {
                    inner.draining = false;
                }
                next
            };
            let Some(change) = next else {
                self.idle.notify_waiters();
                return;
            };

            match self.remote.apply(&change).await {
                Ok(()) => {
                    tracing::debug!(
                        table = change.table(),
                        op = change.operation().as_str(),
                        id = change.target_id(),
                        "sync change applied"
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        error = %error,
                        table = change.table(),
                        op = change.operation().as_str(),
                        id = change.target_id(),
                        "sync change failed, pausing queue"
                    );
                    {
                        let mut inner = self.lock();
                        inner.pending.push_front(change);
                        inner.draining = false;
                    }
                    self.idle.notify_waiters();
                    return;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic, so a poisoned lock still holds a consistent queue.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
