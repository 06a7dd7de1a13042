//! Error types for TaskRelay.
//!
//! Each component defines its own error enum next to its code; this module
//! gathers them into [`RelayError`] for callers that drive several
//! components at once.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::config::ConfigError;
use crate::injector::BindError;
use crate::lifecycle::LifecycleError;
use crate::store::StoreError;

/// Errors that can occur anywhere in TaskRelay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The task catalog is missing or malformed.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// The progress file could not be read or written.
    #[error("progress store error: {0}")]
    Store(#[from] StoreError),

    /// A chat log could not be bound.
    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    /// A lifecycle operation was rejected.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),
}

impl RelayError {
    /// Returns true for errors the process cannot continue past: a missing or
    /// malformed catalog, or a malformed progress file.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Catalog(_) => true,
            Self::Store(err) | Self::Lifecycle(LifecycleError::Store(err)) => {
                matches!(err, StoreError::Corrupt { .. } | StoreError::Inconsistent { .. })
            }
            Self::Bind(_) | Self::Lifecycle(_) => false,
        }
    }
}

/// A specialized `Result` type for TaskRelay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
