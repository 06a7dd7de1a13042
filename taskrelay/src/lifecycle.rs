//! Task lifecycle state machine.
//!
//! [`LifecycleController`] is the only component that mutates progress. Each
//! transition is computed on a copy of the state, persisted, and only then
//! adopted, so a failed delivery or a failed save leaves both memory and
//! disk exactly as they were.
//!
//! # States
//!
//! | State | Condition |
//! |-------|-----------|
//! | Unbound | no active chat log |
//! | Idle | bound, nothing in progress |
//! | HasActive | one task in progress |
//! | RetryPending | the caller holds a [`RetryToken`] from a failed delivery |
//! | AllComplete | `not_started` and `in_progress` are both empty |
//!
//! The retry token is handed back to the caller rather than kept here, so
//! the operator-facing layer decides whether to retry, rebind, or move on.

use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::injector::{BindError, Delivery, Injector, TaskSink};
use crate::store::{ProgressStore, Reset, StoreError};
use crate::types::{CatalogEntry, ProgressState, TaskId};

/// Errors surfaced by lifecycle operations.
///
/// None of these leave the progress state modified.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// No chat log is bound yet.
    #[error("no active chat log; start a session first")]
    NoActiveSession,

    /// A retry was requested without a pending token.
    #[error("nothing to retry")]
    NothingToRetry,

    /// Reset was requested without operator confirmation.
    #[error("reset not confirmed")]
    ResetNotConfirmed,

    /// Progress refers to a task the catalog does not define.
    #[error("task '{0}' is not in the catalog")]
    UnknownTask(TaskId),

    /// The chat log could not be bound.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Progress could not be persisted.
    #[error("progress store error: {0}")]
    Store(#[from] StoreError),
}

/// Identifies a task whose delivery failed and may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryToken(TaskId);

impl RetryToken {
    /// Builds a token from operator input; blank input yields `None`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        (!raw.is_empty()).then(|| Self(TaskId::from(raw)))
    }

    #[must_use]
    pub fn id(&self) -> &TaskId {
        &self.0
    }
}

impl From<TaskId> for RetryToken {
    fn from(id: TaskId) -> Self {
        Self(id)
    }
}

impl fmt::Display for RetryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Outcome of [`LifecycleController::advance`] and
/// [`LifecycleController::retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// `task` was delivered and is now in progress; `completed` is the task
    /// it replaced, if any.
    Delivered {
        task: TaskId,
        completed: Option<TaskId>,
    },

    /// Nothing was left to deliver; `completed` is the task closed out by
    /// this call, if one was still in progress.
    AllComplete { completed: Option<TaskId> },

    /// Delivery was not verified; progress is unchanged.
    Failed { retry: RetryToken },

    /// The token no longer names the next task; nothing was delivered.
    Stale { retry: RetryToken },
}

impl Step {
    /// The token the caller should hold on to after this step, if any.
    #[must_use]
    pub fn retry_token(&self) -> Option<&RetryToken> {
        match self {
            Self::Failed { retry } | Self::Stale { retry } => Some(retry),
            Self::Delivered { .. } | Self::AllComplete { .. } => None,
        }
    }
}

/// Outcome of [`LifecycleController::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Started {
    /// The absolute path now bound.
    pub path: PathBuf,

    /// The in-progress task re-delivered into the new log, with its outcome.
    pub reinjected: Option<(TaskId, Delivery)>,
}

/// A task as shown in a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
}

/// Read-only view of progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub active_log: Option<PathBuf>,
    pub current: Option<TaskSummary>,
    pub next: Option<TaskSummary>,
    pub not_started: usize,
    pub completed: usize,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.active_log {
            Some(path) => writeln!(f, "Chat log:  {}", path.display())?,
            None => writeln!(f, "Chat log:  not bound (use start)")?,
        }
        match &self.current {
            Some(task) => writeln!(f, "Current:   {} (id: {})", task.title, task.id)?,
            None => writeln!(f, "Current:   none")?,
        }
        if let Some(task) = &self.next {
            writeln!(f, "Next:      {} (id: {})", task.title, task.id)?;
        }
        write!(
            f,
            "Progress:  {} completed | {} not started",
            self.completed, self.not_started
        )
    }
}

/// Drives tasks from `not_started` through `in_progress` to `completed`.
#[derive(Debug)]
pub struct LifecycleController<S = Injector> {
    catalog: Catalog,
    store: ProgressStore,
    state: ProgressState,
    sink: S,
}

impl<S: TaskSink> LifecycleController<S> {
    /// Loads progress from `store`, seeding it from `catalog` if absent.
    ///
    /// Ids in progress that the catalog no longer defines, and catalog ids
    /// missing from progress, are logged but not reconciled.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Store`] if progress is corrupt or cannot be
    /// initialized.
    pub fn open(catalog: Catalog, store: ProgressStore, sink: S) -> Result<Self, LifecycleError> {
        let state = store.load_or_initialize(catalog.ids().cloned())?;

        for id in state.all_ids().filter(|id| !catalog.contains(id)) {
            warn!(task_id = %id, "Progress lists a task the catalog does not define");
        }
        let untracked = catalog
            .ids()
            .filter(|id| !state.all_ids().any(|tracked| tracked == *id))
            .count();
        if untracked > 0 {
            warn!(untracked, "Catalog defines tasks missing from progress");
        }
        if state.active_log().is_none() {
            warn!("No chat log bound; start a session to begin");
        }

        Ok(Self {
            catalog,
            store,
            state,
            sink,
        })
    }

    #[must_use]
    pub fn state(&self) -> &ProgressState {
        &self.state
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    #[must_use]
    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    /// Binds the session to the chat log at `path`.
    ///
    /// If a task is in progress it is re-delivered into the new log on a
    /// best-effort basis; the outcome is reported but never fails the call.
    /// Any retry token the caller holds should be discarded.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Bind`] if the file is unusable and
    /// [`LifecycleError::Store`] if the binding cannot be persisted. In both
    /// cases the previous binding remains.
    pub fn start(&mut self, path: &Path) -> Result<Started, LifecycleError> {
        let bound = self.sink.bind(path)?;

        let mut next = self.state.clone();
        next.session_info.active_chat_file = Some(bound.clone());
        self.commit(next)?;
        info!(path = %bound.display(), "Session bound to chat log");

        let reinjected = match self.state.current().cloned() {
            Some(id) => {
                info!(task_id = %id, "Re-delivering in-progress task into new chat log");
                let outcome = match self.catalog.get(&id) {
                    Some(entry) => self.sink.deliver(entry, &bound),
                    None => {
                        warn!(task_id = %id, "In-progress task is not in the catalog");
                        Delivery::Unverified
                    }
                };
                Some((id, outcome))
            }
            None => None,
        };

        Ok(Started {
            path: bound,
            reinjected,
        })
    }

    /// Delivers the next task, completing the current one on success.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NoActiveSession`] if unbound,
    /// [`LifecycleError::UnknownTask`] if the next id is not in the catalog,
    /// and [`LifecycleError::Store`] if the transition cannot be persisted.
    pub fn advance(&mut self) -> Result<Step, LifecycleError> {
        let log = self.active_log()?;

        let Some(candidate) = self.state.next_pending().cloned() else {
            return self.finish();
        };

        self.deliver_front(candidate, &log)
    }

    /// Retries delivery of the task named by `token`.
    ///
    /// The token must still name the front of `not_started`; otherwise the
    /// call reports [`Step::Stale`] and delivers nothing.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NoActiveSession`] if unbound,
    /// [`LifecycleError::NothingToRetry`] if `token` is `None`, and the same
    /// errors as [`advance`](Self::advance) otherwise.
    pub fn retry(&mut self, token: Option<&RetryToken>) -> Result<Step, LifecycleError> {
        let log = self.active_log()?;
        let token = token.ok_or(LifecycleError::NothingToRetry)?;

        if self.state.next_pending() != Some(token.id()) {
            warn!(
                task_id = %token,
                next = ?self.state.next_pending().map(TaskId::as_str),
                "Retry target is no longer the next task; progress left unchanged"
            );
            return Ok(Step::Stale {
                retry: token.clone(),
            });
        }

        info!(task_id = %token, "Retrying delivery");
        self.deliver_front(token.id().clone(), &log)
    }

    /// Summarizes progress without changing it.
    #[must_use]
    pub fn status(&self) -> StatusReport {
        let summary = |id: &TaskId| TaskSummary {
            id: id.clone(),
            title: self.catalog.title_of(id).to_string(),
        };

        StatusReport {
            active_log: self.state.active_log().map(Path::to_path_buf),
            current: self.state.current().map(summary),
            next: self.state.next_pending().map(summary),
            not_started: self.state.tasks.not_started.len(),
            completed: self.state.tasks.completed.len(),
        }
    }

    /// The first catalog task not yet completed, for reminder text.
    #[must_use]
    pub fn next_up(&self) -> Option<&CatalogEntry> {
        self.catalog
            .entries()
            .find(|entry| !self.state.tasks.completed.contains(&entry.id))
    }

    /// Archives progress and starts over with every catalog task pending.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::ResetNotConfirmed`] unless `confirmed`, and
    /// [`LifecycleError::Store`] if the archive or the new state cannot be
    /// written; a failed archive leaves the old progress in place.
    pub fn reset(&mut self, confirmed: bool) -> Result<Reset, LifecycleError> {
        if !confirmed {
            return Err(LifecycleError::ResetNotConfirmed);
        }

        let reset = self.store.backup_and_reset(self.catalog.ids().cloned())?;
        self.state = reset.state.clone();
        info!(tasks = self.state.tasks.not_started.len(), "Progress reset");
        Ok(reset)
    }

    fn active_log(&self) -> Result<PathBuf, LifecycleError> {
        self.state
            .active_log()
            .map(Path::to_path_buf)
            .ok_or(LifecycleError::NoActiveSession)
    }

    /// Completes the last in-progress task once `not_started` is empty.
    fn finish(&mut self) -> Result<Step, LifecycleError> {
        let mut next = self.state.clone();
        let completed = next.complete_current();
        if let Some(id) = &completed {
            self.commit(next)?;
            info!(task_id = %id, "Final task completed");
        }
        info!("All tasks complete");
        Ok(Step::AllComplete { completed })
    }

    /// Delivers `candidate` (the front of `not_started`) and applies the
    /// transition only if delivery is verified.
    fn deliver_front(&mut self, candidate: TaskId, log: &Path) -> Result<Step, LifecycleError> {
        let entry = self
            .catalog
            .get(&candidate)
            .ok_or_else(|| LifecycleError::UnknownTask(candidate.clone()))?;

        info!(task_id = %candidate, title = %entry.title, "Delivering task");
        if !self.sink.deliver(entry, log).is_verified() {
            error!(task_id = %candidate, "Delivery failed; progress unchanged");
            return Ok(Step::Failed {
                retry: RetryToken::from(candidate),
            });
        }

        let mut next = self.state.clone();
        let Some(completed) = next.promote_front(&candidate) else {
            return Err(LifecycleError::UnknownTask(candidate));
        };
        self.commit(next)?;

        if let Some(done) = &completed {
            info!(task_id = %done, "Task completed");
        }
        info!(task_id = %candidate, "Task now in progress");
        Ok(Step::Delivered {
            task: candidate,
            completed,
        })
    }

    /// Persists `next` and adopts it; on failure keeps the current state.
    fn commit(&mut self, next: ProgressState) -> Result<(), LifecycleError> {
        self.store.save(&next)?;
        self.state = next;
        Ok(())
    }
}
