//! Durable progress storage.
//!
//! The progress file is a single pretty-printed JSON document. Every save
//! goes through [`replace_file`], so the file on disk is always a complete,
//! parseable state even if the process dies mid-write.
//!
//! # Example
//!
//! ```
//! use taskrelay::store::ProgressStore;
//! use taskrelay::types::TaskId;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = ProgressStore::new(dir.path().join("progress.json"));
//!
//! assert!(store.load().unwrap().is_none());
//! let state = store.initialize(vec![TaskId::from("a")]).unwrap();
//! assert_eq!(store.load().unwrap(), Some(state));
//! ```

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDateTime};
use thiserror::Error;
use tracing::{debug, info};

use crate::types::{ProgressState, TaskId};
use crate::utils::replace_file;

/// Timestamp format used in backup file names.
const BACKUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Extension appended to backup file names.
const BACKUP_EXTENSION: &str = "bak";

/// Errors that can occur while loading or persisting progress.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The progress file exists but is not a valid progress document.
    #[error("progress file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The progress file parses but lists a task in more than one place.
    #[error("progress file {path} lists task '{id}' more than once")]
    Inconsistent { path: PathBuf, id: TaskId },

    /// Reading or writing the progress file failed.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The state could not be serialized.
    #[error("failed to serialize progress: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Moving the current file to its backup name failed; nothing was reset.
    #[error("failed to back up {from} to {to}: {source}")]
    BackupFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of [`ProgressStore::backup_and_reset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reset {
    /// The freshly seeded state.
    pub state: ProgressState,

    /// Where the previous file was archived, if there was one.
    pub backup: Option<PathBuf>,
}

/// File-backed store for [`ProgressState`].
#[derive(Debug, Clone)]
pub struct ProgressStore {
    path: PathBuf,
}

impl ProgressStore {
    /// Creates a store backed by the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the progress file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the persisted state.
    ///
    /// Returns `Ok(None)` if no progress file exists yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the file does not match the
    /// progress schema, [`StoreError::Inconsistent`] if a task id appears
    /// more than once, and [`StoreError::Io`] for other read failures.
    pub fn load(&self) -> Result<Option<ProgressState>, StoreError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let state: ProgressState =
            serde_json::from_str(&contents).map_err(|source| StoreError::Corrupt {
                path: self.path.clone(),
                source,
            })?;

        if let Some(id) = state.duplicate_id() {
            return Err(StoreError::Inconsistent {
                path: self.path.clone(),
                id: id.clone(),
            });
        }

        Ok(Some(state))
    }

    /// Creates and persists a seeded state containing `ids` in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted.
    pub fn initialize(
        &self,
        ids: impl IntoIterator<Item = TaskId>,
    ) -> Result<ProgressState, StoreError> {
        let state = ProgressState::seeded(ids);
        self.save(&state)?;
        info!(
            path = %self.path.display(),
            tasks = state.tasks.not_started.len(),
            "Progress file initialized"
        );
        Ok(state)
    }

    /// Loads the persisted state, initializing it from `ids` if absent.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`load`](Self::load) and
    /// [`initialize`](Self::initialize).
    pub fn load_or_initialize(
        &self,
        ids: impl IntoIterator<Item = TaskId>,
    ) -> Result<ProgressState, StoreError> {
        match self.load()? {
            Some(state) => Ok(state),
            None => {
                info!(path = %self.path.display(), "No progress file found, initializing");
                self.initialize(ids)
            }
        }
    }

    /// Persists `state` atomically.
    ///
    /// On failure the previously persisted file is left intact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Serialize`] or [`StoreError::Io`].
    pub fn save(&self, state: &ProgressState) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(state).map_err(StoreError::Serialize)?;
        replace_file(&self.path, &json).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "Progress saved");
        Ok(())
    }

    /// Archives the current progress file and starts over from `ids`.
    ///
    /// The caller is responsible for obtaining operator confirmation first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BackupFailed`] if the archive name is already
    /// taken or the rename fails, in which case the original file is left in
    /// place and nothing is reset.
    pub fn backup_and_reset(
        &self,
        ids: impl IntoIterator<Item = TaskId>,
    ) -> Result<Reset, StoreError> {
        self.backup_and_reset_at(ids, Local::now().naive_local())
    }

    /// Same as [`backup_and_reset`](Self::backup_and_reset) with an explicit
    /// timestamp for the archive name.
    ///
    /// # Errors
    ///
    /// See [`backup_and_reset`](Self::backup_and_reset).
    pub fn backup_and_reset_at(
        &self,
        ids: impl IntoIterator<Item = TaskId>,
        now: NaiveDateTime,
    ) -> Result<Reset, StoreError> {
        let backup = if self.path.exists() {
            let to = self.backup_path(now);
            let failed = |source| StoreError::BackupFailed {
                from: self.path.clone(),
                to: to.clone(),
                source,
            };
            // `rename` replaces an existing file; an earlier archive must survive.
            if to.exists() {
                return Err(failed(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "backup file already exists",
                )));
            }
            fs::rename(&self.path, &to).map_err(failed)?;
            info!(backup = %to.display(), "Previous progress archived");
            Some(to)
        } else {
            None
        };

        let state = self.initialize(ids)?;
        Ok(Reset { state, backup })
    }

    /// Returns the archive path for a backup taken at `now`, e.g.
    /// `progress.json.2025-09-09_202739.bak`.
    #[must_use]
    pub fn backup_path(&self, now: NaiveDateTime) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map_or_else(|| OsString::from("progress"), OsString::from);
        name.push(format!(
            ".{}.{BACKUP_EXTENSION}",
            now.format(BACKUP_TIMESTAMP_FORMAT)
        ));
        self.path.with_file_name(name)
    }
}
