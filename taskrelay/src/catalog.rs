//! Task catalog loading.
//!
//! The catalog is a JSON Lines file. Each line is an object mapping one or
//! more task ids to `{title, description}`; all lines are merged into one
//! catalog. Iteration order follows the file: line order, then key order
//! within a line. A later line redefining an id replaces its definition but
//! keeps its original position.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::types::{CatalogEntry, TaskDefinition, TaskId};

/// Errors that can occur while loading the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog file does not exist.
    #[error("catalog not found at {0}")]
    Missing(PathBuf),

    /// A line could not be parsed as a task mapping.
    #[error("catalog line {line} is malformed: {source}")]
    Corrupt {
        /// 1-based line number.
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The catalog file exists but could not be read.
    #[error("failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Immutable, ordered set of task definitions.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<TaskId, usize>,
}

impl Catalog {
    /// Loads and merges the catalog at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Missing`] if the file does not exist and
    /// [`CatalogError::Corrupt`] if any line fails to parse, blank lines
    /// included.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let contents = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                CatalogError::Missing(path.to_path_buf())
            } else {
                CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let catalog = Self::parse(&contents)?;
        debug!(path = %path.display(), tasks = catalog.len(), "Catalog loaded");
        Ok(catalog)
    }

    /// Parses catalog text in JSON Lines form.
    ///
    /// Blank lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Corrupt`] naming the first bad line.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskrelay::catalog::Catalog;
    ///
    /// let text = r#"{"two-sum": {"title": "Two Sum", "description": "Find two numbers."}}"#;
    /// let catalog = Catalog::parse(text).unwrap();
    /// assert_eq!(catalog.len(), 1);
    /// assert_eq!(catalog.get(&"two-sum".into()).unwrap().title, "Two Sum");
    /// ```
    pub fn parse(contents: &str) -> Result<Self, CatalogError> {
        let mut catalog = Self::default();

        for (number, line) in contents.lines().enumerate() {
            let corrupt = |source| CatalogError::Corrupt {
                line: number + 1,
                source,
            };

            let record: Map<String, Value> = serde_json::from_str(line).map_err(corrupt)?;
            for (id, body) in record {
                let definition: TaskDefinition = serde_json::from_value(body).map_err(corrupt)?;
                catalog.insert(CatalogEntry::from_definition(TaskId::from(id), definition));
            }
        }

        Ok(catalog)
    }

    fn insert(&mut self, entry: CatalogEntry) {
        match self.index.get(&entry.id) {
            Some(&position) => self.entries[position] = entry,
            None => {
                self.index.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    /// Looks up a task by id.
    #[must_use]
    pub fn get(&self, id: &TaskId) -> Option<&CatalogEntry> {
        self.index.get(id).map(|&position| &self.entries[position])
    }

    /// Returns the title of `id`, or a placeholder for unknown ids.
    #[must_use]
    pub fn title_of(&self, id: &TaskId) -> &str {
        self.get(id).map_or("(unknown task)", |entry| entry.title.as_str())
    }

    /// Returns true if `id` is defined.
    #[must_use]
    pub fn contains(&self, id: &TaskId) -> bool {
        self.index.contains_key(id)
    }

    /// Task ids in catalog order.
    pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
        self.entries.iter().map(|entry| &entry.id)
    }

    /// Entries in catalog order.
    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = concat!(
        r#"{"c": {"title": "Gamma", "description": "third"}}"#,
        "\n",
        r#"{"a": {"title": "Alpha", "description": "first"}, "b": {"title": "Beta", "description": "second"}}"#,
        "\n",
    );

    #[test]
    fn parse_keeps_file_order() {
        let catalog = Catalog::parse(SAMPLE).unwrap();

        let ids: Vec<&str> = catalog.ids().map(TaskId::as_str).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(catalog.get(&TaskId::from("b")).unwrap().description, "second");
    }

    #[test]
    fn redefinition_keeps_first_position() {
        let text = concat!(
            r#"{"a": {"title": "Old", "description": "x"}}"#,
            "\n",
            r#"{"b": {"title": "Beta", "description": "y"}}"#,
            "\n",
            r#"{"a": {"title": "New", "description": "z"}}"#,
        );

        let catalog = Catalog::parse(text).unwrap();

        let ids: Vec<&str> = catalog.ids().map(TaskId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(catalog.title_of(&TaskId::from("a")), "New");
    }

    #[test]
    fn blank_line_is_corrupt() {
        let text = format!("{SAMPLE}\n{SAMPLE}");

        let err = Catalog::parse(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Corrupt { line: 3, .. }));
    }

    #[test]
    fn trailing_newline_is_not_a_blank_line() {
        assert_eq!(Catalog::parse(SAMPLE).unwrap().len(), 3);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let text = format!("{SAMPLE}{{not json\n");

        let err = Catalog::parse(&text).unwrap_err();
        assert!(matches!(err, CatalogError::Corrupt { line: 3, .. }));
    }

    #[test]
    fn entry_without_description_is_corrupt() {
        let text = r#"{"a": {"title": "Alpha"}}"#;

        let err = Catalog::parse(text).unwrap_err();
        assert!(matches!(err, CatalogError::Corrupt { line: 1, .. }));
    }

    #[test]
    fn load_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("problems.jsonl");

        let err = Catalog::load(&path).unwrap_err();
        assert!(matches!(err, CatalogError::Missing(ref p) if p == &path));
    }

    #[test]
    fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("problems.jsonl");
        fs::write(&path, SAMPLE).unwrap();

        let catalog = Catalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 3);
        assert!(catalog.contains(&TaskId::from("a")));
        assert_eq!(catalog.title_of(&TaskId::from("missing")), "(unknown task)");
    }
}
