//! Chat log path resolution.
//!
//! Operators can name a chat log either by full path or by the shorthand
//! the chat frontend shows for it, `<character> - <timestamp>`. Shorthand
//! names expand to `<chats_dir>/<character>/<shorthand>.jsonl`.
//!
//! # Example
//!
//! ```
//! use std::path::{Path, PathBuf};
//! use taskrelay::utils::session_path::resolve_session_path;
//!
//! let resolved = resolve_session_path(
//!     "Alice - 2025-09-09@20h27m39s",
//!     Some(Path::new("/data/chats")),
//! )
//! .unwrap();
//! assert_eq!(
//!     resolved,
//!     PathBuf::from("/data/chats/Alice/Alice - 2025-09-09@20h27m39s.jsonl")
//! );
//! ```

use std::path::{Path, PathBuf};

/// Separator between character name and timestamp in shorthand names.
pub const SHORTHAND_SEPARATOR: &str = " - ";

/// Extension of chat log files.
const CHAT_LOG_EXTENSION: &str = "jsonl";

/// Resolves operator input into a chat log path.
///
/// Input containing `/` or `\` is taken as a path. Anything else is treated
/// as shorthand and requires `chats_dir`.
///
/// # Returns
///
/// - `Some(path)` for a path, or a well-formed shorthand with a chats dir
/// - `None` for empty input, shorthand without a chats dir, or shorthand
///   lacking the `" - "` separator or a character name
#[must_use]
pub fn resolve_session_path(input: &str, chats_dir: Option<&Path>) -> Option<PathBuf> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains('/') || input.contains('\\') {
        return Some(PathBuf::from(input));
    }

    let (character, _) = input.split_once(SHORTHAND_SEPARATOR)?;
    if character.trim().is_empty() {
        return None;
    }

    let file_name = format!("{input}.{CHAT_LOG_EXTENSION}");
    chats_dir.map(|dir| dir.join(character).join(file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_path_is_used_verbatim() {
        assert_eq!(
            resolve_session_path("/tmp/chat.jsonl", None),
            Some(PathBuf::from("/tmp/chat.jsonl"))
        );
    }

    #[test]
    fn relative_path_is_used_verbatim() {
        assert_eq!(
            resolve_session_path("chats/a.jsonl", Some(Path::new("/base"))),
            Some(PathBuf::from("chats/a.jsonl"))
        );
    }

    #[test]
    fn windows_path_is_used_verbatim() {
        let input = r"C:\chats\Bob\log.jsonl";
        assert_eq!(resolve_session_path(input, None), Some(PathBuf::from(input)));
    }

    #[test]
    fn input_is_trimmed() {
        assert_eq!(
            resolve_session_path("  /tmp/chat.jsonl \n", None),
            Some(PathBuf::from("/tmp/chat.jsonl"))
        );
    }

    #[test]
    fn shorthand_expands_under_character_dir() {
        let resolved = resolve_session_path("Bob - 2025-01-02@10h00m00s", Some(Path::new("/c")));
        assert_eq!(
            resolved,
            Some(PathBuf::from("/c/Bob/Bob - 2025-01-02@10h00m00s.jsonl"))
        );
    }

    #[test]
    fn shorthand_splits_on_first_separator() {
        let resolved = resolve_session_path("Bob - x - y", Some(Path::new("/c")));
        assert_eq!(resolved, Some(PathBuf::from("/c/Bob/Bob - x - y.jsonl")));
    }

    #[test]
    fn shorthand_without_chats_dir_is_unresolvable() {
        assert_eq!(resolve_session_path("Bob - 2025", None), None);
    }

    #[test]
    fn shorthand_without_separator_is_unresolvable() {
        assert_eq!(resolve_session_path("Bob", Some(Path::new("/c"))), None);
    }

    #[test]
    fn shorthand_without_character_is_unresolvable() {
        assert_eq!(resolve_session_path(" - 2025", Some(Path::new("/c"))), None);
    }

    #[test]
    fn empty_input_is_unresolvable() {
        assert_eq!(resolve_session_path("   ", Some(Path::new("/c"))), None);
    }
}
