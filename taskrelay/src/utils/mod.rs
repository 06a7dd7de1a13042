//! Utility modules for TaskRelay.
//!
//! # Modules
//!
//! - [`atomic_write`]: Write-to-temp-then-rename file replacement
//! - [`session_path`]: Resolution of chat log paths and shorthand names

pub mod atomic_write;
pub mod session_path;

pub use atomic_write::replace_file;
pub use session_path::{resolve_session_path, SHORTHAND_SEPARATOR};
