//! Verified delivery of tasks into an external chat log.
//!
//! The chat log is a JSON Lines file owned by another live process (the chat
//! frontend). There is no lock we can take on it, so delivery works as:
//!
//! 1. Read every existing line (a missing file counts as empty)
//! 2. Append the serialized task record in memory
//! 3. Write the full contents to a temp file beside the log and rename it
//!    over the log
//! 4. Re-read the log's last line up to [`RetryPolicy::max_attempts`] times,
//!    waiting `attempt × step` before each read, until it matches the record
//!
//! The consumer may re-flush or rewrite the log shortly after our rename,
//! so a single read-back is not trusted.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use taskrelay::injector::{Delivery, Injector, RetryPolicy};
//! use taskrelay::types::{CatalogEntry, TaskId};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let log = dir.path().join("chat.jsonl");
//! std::fs::write(&log, "{\"name\":\"Assistant\"}\n").unwrap();
//!
//! let mut injector = Injector::new(RetryPolicy::fast_for_tests()).with_delay(|_: Duration| {});
//! let entry = CatalogEntry {
//!     id: TaskId::from("two-sum"),
//!     title: "Two Sum".to_string(),
//!     description: "Find two numbers adding up to a target.".to_string(),
//! };
//!
//! let bound = injector.bind(&log).unwrap();
//! assert_eq!(injector.inject(&entry, &bound), Delivery::Verified);
//! ```

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::types::CatalogEntry;
use crate::utils::replace_file;

/// Default number of read-back attempts.
pub const DEFAULT_VERIFY_ATTEMPTS: u32 = 5;

/// Default backoff step; attempt `i` waits `i × step`.
pub const DEFAULT_VERIFY_STEP_MS: u64 = 100;

/// Speaker name on injected records.
const RECORD_SPEAKER: &str = "User";

/// Errors from validating a chat log before binding to it.
#[derive(Error, Debug)]
pub enum BindError {
    /// Nothing exists at the path.
    #[error("chat log {0} does not exist")]
    NotFound(PathBuf),

    /// The path exists but is a directory or special file.
    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    /// The file cannot be opened for both reading and writing.
    #[error("chat log {path} is not readable and writable: {source}")]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Operator input could not be turned into a path.
    #[error("cannot resolve '{0}' to a chat log; give a full path or '<character> - <timestamp>' with a chats directory configured")]
    Unresolvable(String),
}

/// Errors from the write phase of an injection.
#[derive(Error, Debug)]
pub enum InjectError {
    /// Reading the current log contents failed.
    #[error("failed to read chat log: {0}")]
    Read(#[source] io::Error),

    /// Writing or renaming the new log contents failed.
    #[error("failed to write chat log: {0}")]
    Write(#[source] io::Error),

    /// The record could not be serialized.
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of delivering one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The record was read back as the log's last line.
    Verified,
    /// The write failed, or every read-back attempt missed the record.
    Unverified,
}

impl Delivery {
    #[must_use]
    pub fn is_verified(self) -> bool {
        matches!(self, Self::Verified)
    }
}

/// Read-back schedule for verifying an injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of read-back attempts, at least 1.
    pub max_attempts: u32,
    /// Backoff unit; attempt `i` (1-based) waits `i × step`.
    pub step: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            step,
        }
    }

    /// A policy with millisecond steps for tests.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self::new(DEFAULT_VERIFY_ATTEMPTS, Duration::from_millis(1))
    }

    /// Wait before the 1-based `attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }

    /// Sum of all waits if every attempt misses.
    #[must_use]
    pub fn worst_case_wait(&self) -> Duration {
        (1..=self.max_attempts).map(|attempt| self.delay_for(attempt)).sum()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_VERIFY_ATTEMPTS,
            Duration::from_millis(DEFAULT_VERIFY_STEP_MS),
        )
    }
}

/// Something that can wait for a duration.
///
/// [`ThreadDelay`] actually sleeps; any `FnMut(Duration)` closure can stand
/// in for it so tests can skip or observe the waits.
pub trait Delay {
    fn wait(&mut self, duration: Duration);
}

/// Blocks the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn wait(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

impl<F: FnMut(Duration)> Delay for F {
    fn wait(&mut self, duration: Duration) {
        self(duration);
    }
}

/// One chat log line, in the frontend's message schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRecord {
    pub name: String,
    pub is_user: bool,
    pub is_system: bool,
    pub send_date: String,
    pub mes: String,
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatRecord {
    /// Builds the user message carrying `entry`, stamped with `now`.
    #[must_use]
    pub fn for_task(entry: &CatalogEntry, now: NaiveDateTime) -> Self {
        Self {
            name: RECORD_SPEAKER.to_string(),
            is_user: true,
            is_system: false,
            send_date: format_send_date(now),
            mes: task_block(entry),
            extra: serde_json::Map::new(),
        }
    }

    /// Serializes the record as a single JSON line (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which does not occur for this type in
    /// practice.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Renders the `<task>` block placed in the message body.
#[must_use]
pub fn task_block(entry: &CatalogEntry) -> String {
    format!(
        "<task>\n    <problem_name>{}</problem_name>\n    <problem_description>\n        {}\n    </problem_description>\n</task>",
        entry.title, entry.description
    )
}

/// Formats a timestamp the way the chat frontend writes `send_date`.
///
/// Full month name, unpadded day, zero-padded 12-hour clock, lowercase
/// meridiem.
///
/// # Example
///
/// ```
/// use chrono::NaiveDate;
/// use taskrelay::injector::format_send_date;
///
/// let at = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap().and_hms_opt(20, 27, 39).unwrap();
/// assert_eq!(format_send_date(at), "September 9, 2025 08:27pm");
/// ```
#[must_use]
pub fn format_send_date(at: NaiveDateTime) -> String {
    let meridiem = if at.hour() < 12 { "am" } else { "pm" };
    format!("{}{meridiem}", at.format("%B %-d, %Y %I:%M"))
}

/// Delivers task records into a chat log and verifies them.
pub struct Injector {
    policy: RetryPolicy,
    delay: Box<dyn Delay>,
}

impl std::fmt::Debug for Injector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Injector")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Injector {
    /// Creates an injector that really sleeps between read-backs.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            delay: Box::new(ThreadDelay),
        }
    }

    /// Replaces the wait used between read-back attempts.
    #[must_use]
    pub fn with_delay(self, delay: impl Delay + 'static) -> Self {
        Self {
            policy: self.policy,
            delay: Box::new(delay),
        }
    }

    #[must_use]
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Checks that `path` is an existing regular file we can read and write,
    /// and returns its absolute form.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] describing why the file is unusable.
    pub fn bind(&self, path: &Path) -> Result<PathBuf, BindError> {
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BindError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(BindError::Inaccessible {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if !metadata.is_file() {
            return Err(BindError::NotAFile(path.to_path_buf()));
        }

        let inaccessible = |source| BindError::Inaccessible {
            path: path.to_path_buf(),
            source,
        };
        // Opening without truncate or append leaves the contents untouched.
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(inaccessible)?;

        let absolute = fs::canonicalize(path).map_err(inaccessible)?;
        debug!(path = %absolute.display(), "Chat log validated");
        Ok(absolute)
    }

    /// Injects `entry` into the log at `path`, stamped with the current time.
    pub fn inject(&mut self, entry: &CatalogEntry, path: &Path) -> Delivery {
        self.inject_at(entry, path, Local::now().naive_local())
    }

    /// Injects `entry` stamped with `now`, then verifies the write.
    ///
    /// Never fails with an error: write-phase errors are logged and reported
    /// as [`Delivery::Unverified`]; read errors during verification are logged
    /// and retried.
    pub fn inject_at(&mut self, entry: &CatalogEntry, path: &Path, now: NaiveDateTime) -> Delivery {
        let line = match self.write_record(entry, path, now) {
            Ok(line) => line,
            Err(e) => {
                error!(task_id = %entry.id, path = %path.display(), error = %e, "Injection write failed");
                return Delivery::Unverified;
            }
        };

        let delivery = self.verify(path, &line);
        match delivery {
            Delivery::Verified => {
                info!(task_id = %entry.id, path = %path.display(), "Task injected and verified");
            }
            Delivery::Unverified => {
                error!(
                    task_id = %entry.id,
                    path = %path.display(),
                    attempts = self.policy.max_attempts,
                    "Injected record was not found at the end of the chat log"
                );
            }
        }
        delivery
    }

    /// Appends the record for `entry` via read, append, write-temp, rename.
    ///
    /// Returns the serialized line that verification should find.
    fn write_record(
        &self,
        entry: &CatalogEntry,
        path: &Path,
        now: NaiveDateTime,
    ) -> Result<String, InjectError> {
        let mut contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(InjectError::Read(e)),
        };

        let line = ChatRecord::for_task(entry, now).to_line()?;
        if !contents.is_empty() && !contents.ends_with('\n') {
            contents.push('\n');
        }
        contents.push_str(&line);
        contents.push('\n');

        replace_file(path, contents.as_bytes()).map_err(InjectError::Write)?;
        debug!(task_id = %entry.id, path = %path.display(), "Record written");
        Ok(line)
    }

    /// Polls the log's last line until it equals `expected`.
    fn verify(&mut self, path: &Path, expected: &str) -> Delivery {
        let expected = expected.trim();

        for attempt in 1..=self.policy.max_attempts {
            self.delay.wait(self.policy.delay_for(attempt));

            match fs::read_to_string(path) {
                Ok(contents) => {
                    if contents.lines().last().map(str::trim) == Some(expected) {
                        debug!(attempt, "Injection verified");
                        return Delivery::Verified;
                    }
                    debug!(attempt, "Last line does not match injected record yet");
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        error = %e,
                        "Failed to read chat log during verification"
                    );
                }
            }
        }

        Delivery::Unverified
    }
}

impl Default for Injector {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

/// The delivery side of the lifecycle controller.
pub trait TaskSink {
    /// Validates a chat log and returns the path to bind.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] if the log is unusable.
    fn bind(&mut self, path: &Path) -> Result<PathBuf, BindError>;

    /// Delivers `entry` into the log at `path`.
    fn deliver(&mut self, entry: &CatalogEntry, path: &Path) -> Delivery;
}

impl TaskSink for Injector {
    fn bind(&mut self, path: &Path) -> Result<PathBuf, BindError> {
        Injector::bind(self, path)
    }

    fn deliver(&mut self, entry: &CatalogEntry, path: &Path) -> Delivery {
        self.inject(entry, path)
    }
}
