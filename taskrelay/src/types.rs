//! Core data types for TaskRelay.
//!
//! This module defines the catalog entry type and the persisted progress
//! schema. Field names serialize exactly as the on-disk progress file
//! expects (`session_info`, `tasks`, `not_started`, ...).

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Identifier of a task in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Creates a task identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The body of a catalog record, as stored on each catalog line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub title: String,
    pub description: String,
}

/// A task definition together with its identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: TaskId,
    pub title: String,
    pub description: String,
}

impl CatalogEntry {
    /// Builds an entry from an id and its catalog definition.
    #[must_use]
    pub fn from_definition(id: TaskId, definition: TaskDefinition) -> Self {
        Self {
            id,
            title: definition.title,
            description: definition.description,
        }
    }
}

/// Session binding: the external chat log tasks are delivered into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Absolute path of the bound chat log, `None` until a session is started.
    pub active_chat_file: Option<PathBuf>,
}

/// The three task queues.
///
/// `in_progress` is persisted as a list for compatibility with the file
/// format, but holds at most one id in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskQueues {
    /// Tasks not yet delivered, front is attempted next.
    pub not_started: VecDeque<TaskId>,

    /// The task currently delivered but not completed.
    #[serde(with = "at_most_one")]
    pub in_progress: Option<TaskId>,

    /// Completed tasks in completion order.
    pub completed: Vec<TaskId>,
}

/// The complete persisted progress state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressState {
    pub session_info: SessionInfo,
    pub tasks: TaskQueues,
}

impl ProgressState {
    /// Creates a fresh state with every id queued in `not_started`, in order.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskrelay::types::{ProgressState, TaskId};
    ///
    /// let state = ProgressState::seeded(vec![TaskId::from("a"), TaskId::from("b")]);
    /// assert_eq!(state.tasks.not_started.len(), 2);
    /// assert!(state.current().is_none());
    /// assert!(state.active_log().is_none());
    /// ```
    #[must_use]
    pub fn seeded(ids: impl IntoIterator<Item = TaskId>) -> Self {
        Self {
            session_info: SessionInfo::default(),
            tasks: TaskQueues {
                not_started: ids.into_iter().collect(),
                in_progress: None,
                completed: Vec::new(),
            },
        }
    }

    /// Returns the bound chat log, if any.
    #[must_use]
    pub fn active_log(&self) -> Option<&Path> {
        self.session_info.active_chat_file.as_deref()
    }

    /// Returns the task currently in progress.
    #[must_use]
    pub fn current(&self) -> Option<&TaskId> {
        self.tasks.in_progress.as_ref()
    }

    /// Returns the task that would be delivered next.
    #[must_use]
    pub fn next_pending(&self) -> Option<&TaskId> {
        self.tasks.not_started.front()
    }

    /// Returns true if nothing is left to deliver.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.tasks.not_started.is_empty()
    }

    /// Iterates over every id held in any queue.
    pub fn all_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.tasks
            .not_started
            .iter()
            .chain(self.tasks.in_progress.iter())
            .chain(self.tasks.completed.iter())
    }

    /// Returns the first id that appears more than once across the queues.
    #[must_use]
    pub fn duplicate_id(&self) -> Option<&TaskId> {
        let mut seen = HashSet::new();
        self.all_ids().find(|id| !seen.insert(*id))
    }

    /// Moves the in-progress task, if any, to the end of `completed`.
    pub fn complete_current(&mut self) -> Option<TaskId> {
        let done = self.tasks.in_progress.take()?;
        self.tasks.completed.push(done.clone());
        Some(done)
    }

    /// Completes the current task and promotes `id` from the front of
    /// `not_started` into `in_progress`.
    ///
    /// Returns `None` and leaves the state untouched if `id` is not the front
    /// of `not_started`. On success returns the id that was completed, if any.
    pub fn promote_front(&mut self, id: &TaskId) -> Option<Option<TaskId>> {
        if self.tasks.not_started.front() != Some(id) {
            return None;
        }
        let completed = self.complete_current();
        let started = self.tasks.not_started.pop_front();
        self.tasks.in_progress = started;
        Some(completed)
    }
}

/// Serde adapter persisting an `Option<TaskId>` as a list of zero or one ids.
mod at_most_one {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::TaskId;

    pub fn serialize<S>(value: &Option<TaskId>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let as_list: &[TaskId] = match value {
            Some(id) => std::slice::from_ref(id),
            None => &[],
        };
        as_list.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<TaskId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut ids = Vec::<TaskId>::deserialize(deserializer)?;
        if ids.len() > 1 {
            return Err(D::Error::custom(format!(
                "in_progress holds {} ids, at most one is allowed",
                ids.len()
            )));
        }
        Ok(ids.pop())
    }
}
