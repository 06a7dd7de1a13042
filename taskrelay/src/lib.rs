//! TaskRelay - delivers catalog tasks into a live chat log.
//!
//! This crate tracks an operator's progress through an ordered catalog of
//! tasks and delivers the active task into an external chat log owned by
//! another process, verifying each write by reading it back.
//!
//! # Overview
//!
//! Progress is three queues (not started, in progress, completed) plus the
//! bound chat log, persisted as one JSON file that is replaced atomically on
//! every change. A task only moves forward once its injection has been
//! verified; failures leave progress untouched and hand a retry token back
//! to the caller.
//!
//! # Modules
//!
//! - [`types`]: Task ids, catalog entries, and the progress schema
//! - [`catalog`]: JSON Lines task catalog loading
//! - [`store`]: Atomic progress persistence and reset with backup
//! - [`injector`]: Verified chat log injection with retry policy
//! - [`lifecycle`]: The task lifecycle state machine
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Aggregate error type
//! - [`utils`]: Atomic file replacement and chat log path resolution

pub mod catalog;
pub mod config;
pub mod error;
pub mod injector;
pub mod lifecycle;
pub mod store;
pub mod types;
pub mod utils;

pub use catalog::{Catalog, CatalogError};
pub use config::{Config, ConfigError};
pub use error::{RelayError, Result};
pub use injector::{BindError, Delay, Delivery, Injector, RetryPolicy, TaskSink, ThreadDelay};
pub use lifecycle::{LifecycleController, LifecycleError, RetryToken, StatusReport, Step};
pub use store::{ProgressStore, Reset, StoreError};
pub use types::{CatalogEntry, ProgressState, TaskId};
