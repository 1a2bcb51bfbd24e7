//! SQLite system of record.
//!
//! One [`Store`] wraps one connection behind a mutex. Every entry point that
//! needs the database takes a `&Store`; there is no global engine.
//!
//! | Module        | Tables                                   |
//! |---------------|------------------------------------------|
//! | [`sources`]   | `books`, `sources`                       |
//! | [`content`]   | `pages`, `problems`, `problem_parts`, `section_theory` |
//! | [`answers`]   | answer linking over `problems`           |
//! | [`search`]    | `problems_fts` (FTS5, bm25), substring fallback |
//!
//! Reprocessing a source replaces its pages and problems inside one
//! transaction ([`Store::replace_source_content`]), so a failed run never
//! leaves a half-written rewrite behind.

pub mod answers;
pub mod content;
pub mod migrations;
pub mod search;
pub mod sources;

pub use content::{ReplaceReport, SourceContent, TheoryWrite};
pub use search::Candidate;

use crate::error::IngestError;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Handle to the ingestion database.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| IngestError::ArtifactWriteFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let conn = Connection::open(path)?;
        debug!("Opened database {}", path.display());
        Self::init(conn)
    }

    /// A private in-memory database, migrated. Used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, IngestError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self, IngestError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        // SQLite's lower() only folds ASCII.
        conn.create_scalar_function(
            "fold_lower",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|t| t.to_lowercase())),
        )?;
        migrations::runner().to_latest(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Applied schema version.
    pub fn schema_version(&self) -> Result<i64, IngestError> {
        let conn = self.conn()?;
        Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, IngestError> {
        self.conn
            .lock()
            .map_err(|_| IngestError::Internal("database mutex poisoned".into()))
    }
}

/// True for `None`, empty and whitespace-only text.
pub(crate) fn is_blank(text: Option<&str>) -> bool {
    text.map_or(true, |t| t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_is_migrated() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), migrations::latest_version());
    }

    #[test]
    fn file_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("ingest.sqlite");
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        drop(store);
        // reopening an up-to-date database is a no-op
        let again = Store::open(&path).unwrap();
        assert_eq!(again.schema_version().unwrap(), migrations::latest_version());
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank(None));
        assert!(is_blank(Some("  \n")));
        assert!(!is_blank(Some("40°")));
    }
}
