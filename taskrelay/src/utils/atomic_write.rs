//! Atomic file replacement.
//!
//! Contents are written to a fresh temporary file in the target's directory,
//! flushed to disk, then renamed over the target in a single step. A reader
//! sees either the old file or the new one, never a partial write. If any
//! step fails, the temporary file is removed and the target is untouched.
//!
//! An existing target keeps its permissions rather than the owner-only mode
//! temporary files are created with.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::trace;

/// Replaces `target` with `contents` atomically.
///
/// # Errors
///
/// Returns the underlying I/O error if the temporary file cannot be created,
/// written, synced, or renamed over `target`.
///
/// # Example
///
/// ```
/// use taskrelay::utils::replace_file;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("state.json");
/// replace_file(&path, b"{}").unwrap();
/// assert_eq!(std::fs::read(&path).unwrap(), b"{}");
/// ```
pub fn replace_file(target: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    match fs::metadata(target) {
        Ok(metadata) => temp.as_file().set_permissions(metadata.permissions())?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    trace!(
        temp = %temp.path().display(),
        target = %target.display(),
        "Renaming temp file over target"
    );

    // On failure the returned temp file is dropped, which deletes it.
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
