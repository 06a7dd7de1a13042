//! Configuration module for TaskRelay.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `TASKRELAY_DATA_DIR` | No | platform data dir | Directory holding the catalog and progress files |
//! | `TASKRELAY_CATALOG` | No | `<data dir>/problems.jsonl` | Task catalog (JSON Lines) |
//! | `TASKRELAY_PROGRESS` | No | `<data dir>/progress.json` | Progress file |
//! | `TASKRELAY_CHATS_DIR` | No | - | Chats directory used to expand shorthand log names |
//! | `TASKRELAY_VERIFY_ATTEMPTS` | No | 5 | Read-back attempts after an injection (1-20) |
//! | `TASKRELAY_VERIFY_STEP_MS` | No | 100 | Backoff step; attempt `i` waits `i` steps |
//!
//! # Example
//!
//! ```no_run
//! use taskrelay::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Progress file: {}", config.progress_path.display());
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use thiserror::Error;

use crate::injector::{RetryPolicy, DEFAULT_VERIFY_ATTEMPTS, DEFAULT_VERIFY_STEP_MS};

/// Default catalog file name inside the data directory.
const DEFAULT_CATALOG_FILE: &str = "problems.jsonl";

/// Default progress file name inside the data directory.
const DEFAULT_PROGRESS_FILE: &str = "progress.json";

/// Minimum allowed verification attempts.
const MIN_VERIFY_ATTEMPTS: u32 = 1;

/// Maximum allowed verification attempts.
const MAX_VERIFY_ATTEMPTS: u32 = 20;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// No data directory was given and none could be determined.
    #[error("failed to determine a data directory; set TASKRELAY_DATA_DIR")]
    NoDataDirectory,
}

/// Configuration for TaskRelay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Path to the task catalog.
    pub catalog_path: PathBuf,

    /// Path to the progress file.
    pub progress_path: PathBuf,

    /// Base directory for shorthand chat log names, if configured.
    pub chats_dir: Option<PathBuf>,

    /// Number of read-back attempts after each injection.
    pub verify_attempts: u32,

    /// Backoff step between read-back attempts.
    pub verify_step: Duration,
}

impl Config {
    /// Creates a configuration with default file names under `data_dir`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::path::Path;
    /// use taskrelay::config::Config;
    ///
    /// let config = Config::with_data_dir(Path::new("/srv/relay"));
    /// assert_eq!(config.progress_path, Path::new("/srv/relay/progress.json"));
    /// assert!(config.chats_dir.is_none());
    /// ```
    #[must_use]
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            catalog_path: data_dir.join(DEFAULT_CATALOG_FILE),
            progress_path: data_dir.join(DEFAULT_PROGRESS_FILE),
            chats_dir: None,
            verify_attempts: DEFAULT_VERIFY_ATTEMPTS,
            verify_step: Duration::from_millis(DEFAULT_VERIFY_STEP_MS),
        }
    }

    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `TASKRELAY_VERIFY_ATTEMPTS` is not an integer between 1 and 20
    /// - `TASKRELAY_VERIFY_STEP_MS` is not a non-negative integer
    /// - `TASKRELAY_DATA_DIR` is unset and no platform data directory exists
    pub fn from_env() -> Result<Self, ConfigError> {
        let data_dir = match env::var("TASKRELAY_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => ProjectDirs::from("", "", "taskrelay")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .ok_or(ConfigError::NoDataDirectory)?,
        };
        let mut config = Self::with_data_dir(&data_dir);

        if let Ok(path) = env::var("TASKRELAY_CATALOG") {
            config.catalog_path = PathBuf::from(path);
        }

        if let Ok(path) = env::var("TASKRELAY_PROGRESS") {
            config.progress_path = PathBuf::from(path);
        }

        config.chats_dir = env::var("TASKRELAY_CHATS_DIR")
            .ok()
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        if let Ok(val) = env::var("TASKRELAY_VERIFY_ATTEMPTS") {
            let attempts = val.parse::<u32>().map_err(|_| ConfigError::InvalidValue {
                key: "TASKRELAY_VERIFY_ATTEMPTS".to_string(),
                message: format!("expected integer 1-20, got '{val}'"),
            })?;
            if !(MIN_VERIFY_ATTEMPTS..=MAX_VERIFY_ATTEMPTS).contains(&attempts) {
                return Err(ConfigError::InvalidValue {
                    key: "TASKRELAY_VERIFY_ATTEMPTS".to_string(),
                    message: format!(
                        "attempts must be between {MIN_VERIFY_ATTEMPTS} and {MAX_VERIFY_ATTEMPTS}, got {attempts}"
                    ),
                });
            }
            config.verify_attempts = attempts;
        }

        if let Ok(val) = env::var("TASKRELAY_VERIFY_STEP_MS") {
            let millis = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                key: "TASKRELAY_VERIFY_STEP_MS".to_string(),
                message: format!("expected non-negative integer, got '{val}'"),
            })?;
            config.verify_step = Duration::from_millis(millis);
        }

        Ok(config)
    }

    /// The verification schedule described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.verify_attempts, self.verify_step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    /// Helper to run tests with isolated environment variables.
    /// Clears all TASKRELAY_* vars before the test and restores them after.
    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let saved_vars: Vec<(String, String)> = env::vars()
            .filter(|(k, _)| k.starts_with("TASKRELAY_"))
            .collect();

        for (key, _) in &saved_vars {
            env::remove_var(key);
        }

        let result = f();

        for (key, _) in env::vars().filter(|(k, _)| k.starts_with("TASKRELAY_")) {
            env::remove_var(key);
        }
        for (key, value) in saved_vars {
            env::set_var(key, value);
        }

        result
    }

    #[test]
    #[serial]
    fn test_data_dir_defaults() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");

            let config = Config::from_env().expect("should parse minimal config");

            assert_eq!(config.catalog_path, PathBuf::from("/srv/relay/problems.jsonl"));
            assert_eq!(config.progress_path, PathBuf::from("/srv/relay/progress.json"));
            assert!(config.chats_dir.is_none());
            assert_eq!(config.retry_policy(), RetryPolicy::default());
        });
    }

    #[test]
    #[serial]
    fn test_full_config() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");
            env::set_var("TASKRELAY_CATALOG", "/custom/catalog.jsonl");
            env::set_var("TASKRELAY_PROGRESS", "/custom/state.json");
            env::set_var("TASKRELAY_CHATS_DIR", "/chats");
            env::set_var("TASKRELAY_VERIFY_ATTEMPTS", "8");
            env::set_var("TASKRELAY_VERIFY_STEP_MS", "250");

            let config = Config::from_env().expect("should parse full config");

            assert_eq!(config.catalog_path, PathBuf::from("/custom/catalog.jsonl"));
            assert_eq!(config.progress_path, PathBuf::from("/custom/state.json"));
            assert_eq!(config.chats_dir, Some(PathBuf::from("/chats")));
            assert_eq!(
                config.retry_policy(),
                RetryPolicy::new(8, Duration::from_millis(250))
            );
        });
    }

    #[test]
    #[serial]
    fn test_blank_chats_dir_is_ignored() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");
            env::set_var("TASKRELAY_CHATS_DIR", "  ");

            let config = Config::from_env().expect("should parse config");

            assert!(config.chats_dir.is_none());
        });
    }

    #[test]
    #[serial]
    fn test_invalid_attempts() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");
            env::set_var("TASKRELAY_VERIFY_ATTEMPTS", "many");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "TASKRELAY_VERIFY_ATTEMPTS"
            ));
        });
    }

    #[test]
    #[serial]
    fn test_attempts_out_of_range() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");

            for bad in ["0", "21"] {
                env::set_var("TASKRELAY_VERIFY_ATTEMPTS", bad);

                let err = Config::from_env().unwrap_err();
                assert!(matches!(
                    err,
                    ConfigError::InvalidValue { ref message, .. }
                        if message.contains("between 1 and 20")
                ));
            }
        });
    }

    #[test]
    #[serial]
    fn test_invalid_step() {
        with_clean_env(|| {
            env::set_var("TASKRELAY_DATA_DIR", "/srv/relay");
            env::set_var("TASKRELAY_VERIFY_STEP_MS", "-5");

            let err = Config::from_env().unwrap_err();
            assert!(matches!(
                err,
                ConfigError::InvalidValue { ref key, .. } if key == "TASKRELAY_VERIFY_STEP_MS"
            ));
        });
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidValue {
            key: "TASKRELAY_VERIFY_STEP_MS".to_string(),
            message: "expected non-negative integer, got 'x'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for TASKRELAY_VERIFY_STEP_MS: expected non-negative integer, got 'x'"
        );
    }
}
