//! Books and uploaded sources.

use super::Store;
use crate::error::IngestError;
use crate::model::{Book, NewBook, Source, SourceStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const BOOK_COLUMNS: &str = "id, subject, grade, title, authors, part, is_solutions_book";
const SOURCE_COLUMNS: &str = "id, book_id, pdf_path, status, page_count, error_message";

fn book_from_row(row: &Row<'_>) -> rusqlite::Result<Book> {
    Ok(Book {
        id: row.get(0)?,
        subject: row.get(1)?,
        grade: row.get(2)?,
        title: row.get(3)?,
        authors: row.get(4)?,
        part: row.get(5)?,
        is_solutions_book: row.get(6)?,
    })
}

fn source_from_row(row: &Row<'_>) -> rusqlite::Result<Source> {
    let status: String = row.get(3)?;
    let page_count: Option<i64> = row.get(4)?;
    Ok(Source {
        id: row.get(0)?,
        book_id: row.get(1)?,
        pdf_path: PathBuf::from(row.get::<_, String>(2)?),
        // the CHECK constraint keeps this total
        status: SourceStatus::parse(&status).unwrap_or(SourceStatus::Failed),
        page_count: page_count.map(|n| n as usize),
        error_message: row.get(5)?,
    })
}

pub(crate) fn get_source(conn: &Connection, source_id: i64) -> Result<Source, IngestError> {
    conn.query_row(
        &format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"),
        params![source_id],
        source_from_row,
    )
    .optional()?
    .ok_or(IngestError::SourceNotFound { source_id })
}

impl Store {
    // ── Books ─────────────────────────────────────────────────────────────

    /// The book for this (subject, grade, authors, part), created on first use.
    pub fn find_or_create_book(&self, book: &NewBook) -> Result<Book, IngestError> {
        let conn = self.conn()?;
        let existing = conn
            .query_row(
                &format!(
                    "SELECT {BOOK_COLUMNS} FROM books
                     WHERE subject = ?1 AND grade = ?2
                       AND COALESCE(authors, '') = COALESCE(?3, '')
                       AND COALESCE(part, '') = COALESCE(?4, '')"
                ),
                params![book.subject, book.grade, book.authors, book.part],
                book_from_row,
            )
            .optional()?;
        if let Some(found) = existing {
            return Ok(found);
        }

        conn.execute(
            "INSERT INTO books (subject, grade, title, authors, part, is_solutions_book, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                book.subject,
                book.grade,
                book.title,
                book.authors,
                book.part,
                book.is_solutions_book,
                Utc::now()
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created book {} '{}' ({}, grade {})", id, book.title, book.subject, book.grade);
        Ok(Book {
            id,
            subject: book.subject.clone(),
            grade: book.grade,
            title: book.title.clone(),
            authors: book.authors.clone(),
            part: book.part.clone(),
            is_solutions_book: book.is_solutions_book,
        })
    }

    pub fn get_book(&self, book_id: i64) -> Result<Book, IngestError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?1"),
            params![book_id],
            book_from_row,
        )
        .optional()?
        .ok_or(IngestError::BookNotFound { book_id })
    }

    pub fn list_books(&self) -> Result<Vec<Book>, IngestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {BOOK_COLUMNS} FROM books ORDER BY id"))?;
        let books = stmt
            .query_map([], book_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(books)
    }

    // ── Sources ───────────────────────────────────────────────────────────

    /// Register an uploaded PDF as a `pending` source.
    pub fn add_source(&self, book_id: i64, pdf_path: &Path) -> Result<Source, IngestError> {
        let conn = self.conn()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO sources (book_id, pdf_path, status, created_at, updated_at)
             VALUES (?1, ?2, 'pending', ?3, ?3)",
            params![book_id, pdf_path.to_string_lossy(), now],
        )?;
        get_source(&conn, conn.last_insert_rowid())
    }

    pub fn get_source(&self, source_id: i64) -> Result<Source, IngestError> {
        let conn = self.conn()?;
        get_source(&conn, source_id)
    }

    /// Sources of one book, or of every book.
    pub fn list_sources(&self, book_id: Option<i64>) -> Result<Vec<Source>, IngestError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SOURCE_COLUMNS} FROM sources
             WHERE ?1 IS NULL OR book_id = ?1 ORDER BY id"
        ))?;
        let sources = stmt
            .query_map(params![book_id], source_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    /// Atomically move a source into the in-flight `status`.
    ///
    /// Fails with [`IngestError::SourceBusy`] when another run already owns
    /// the source. Clears any previous error message.
    pub fn claim_source(&self, source_id: i64, status: SourceStatus) -> Result<Source, IngestError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sources SET status = ?2, error_message = NULL, updated_at = ?3
             WHERE id = ?1 AND status NOT IN ('rendering', 'ocr')",
            params![source_id, status.as_str(), Utc::now()],
        )?;
        let source = get_source(&conn, source_id)?;
        if changed == 0 {
            warn!("Source {} is busy (status '{}')", source_id, source.status);
            return Err(IngestError::SourceBusy {
                source_id,
                status: source.status.to_string(),
            });
        }
        Ok(source)
    }

    pub fn set_status(&self, source_id: i64, status: SourceStatus) -> Result<(), IngestError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE sources SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![source_id, status.as_str(), Utc::now()],
        )?;
        if changed == 0 {
            return Err(IngestError::SourceNotFound { source_id });
        }
        Ok(())
    }

    pub fn set_page_count(&self, source_id: i64, page_count: usize) -> Result<(), IngestError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sources SET page_count = ?2, updated_at = ?3 WHERE id = ?1",
            params![source_id, page_count as i64, Utc::now()],
        )?;
        Ok(())
    }

    /// Mark a source `failed` with a human-readable message.
    pub fn fail_source(&self, source_id: i64, message: &str) -> Result<(), IngestError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE sources SET status = 'failed', error_message = ?2, updated_at = ?3 WHERE id = ?1",
            params![source_id, message, Utc::now()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> NewBook {
        NewBook {
            subject: "geometry".into(),
            grade: 7,
            title: "Геометрия 7–9".into(),
            authors: Some("Атанасян".into()),
            ..Default::default()
        }
    }

    #[test]
    fn book_identity_is_reused() {
        let store = Store::open_in_memory().unwrap();
        let a = store.find_or_create_book(&geometry()).unwrap();
        let b = store.find_or_create_book(&geometry()).unwrap();
        assert_eq!(a.id, b.id);

        let other_part = NewBook {
            part: Some("2".into()),
            ..geometry()
        };
        assert_ne!(store.find_or_create_book(&other_part).unwrap().id, a.id);
        assert_eq!(store.list_books().unwrap().len(), 2);
    }

    #[test]
    fn new_source_is_pending() {
        let store = Store::open_in_memory().unwrap();
        let book = store.find_or_create_book(&geometry()).unwrap();
        let source = store.add_source(book.id, Path::new("/books/g7.pdf")).unwrap();
        assert_eq!(source.status, SourceStatus::Pending);
        assert_eq!(source.pdf_path, PathBuf::from("/books/g7.pdf"));
        assert_eq!(store.list_sources(Some(book.id)).unwrap().len(), 1);
        assert_eq!(store.list_sources(None).unwrap().len(), 1);
    }

    #[test]
    fn claim_refuses_in_flight_source() {
        let store = Store::open_in_memory().unwrap();
        let book = store.find_or_create_book(&geometry()).unwrap();
        let source = store.add_source(book.id, Path::new("g7.pdf")).unwrap();

        store.claim_source(source.id, SourceStatus::Rendering).unwrap();
        let err = store.claim_source(source.id, SourceStatus::Ocr).unwrap_err();
        assert!(matches!(err, IngestError::SourceBusy { .. }));

        store.set_status(source.id, SourceStatus::Done).unwrap();
        assert!(store.claim_source(source.id, SourceStatus::Ocr).is_ok());
    }

    #[test]
    fn failure_message_is_cleared_on_claim() {
        let store = Store::open_in_memory().unwrap();
        let book = store.find_or_create_book(&geometry()).unwrap();
        let source = store.add_source(book.id, Path::new("g7.pdf")).unwrap();
        store.fail_source(source.id, "normalized text missing").unwrap();
        let failed = store.get_source(source.id).unwrap();
        assert_eq!(failed.status, SourceStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("normalized text missing"));

        let claimed = store.claim_source(source.id, SourceStatus::Ocr).unwrap();
        assert_eq!(claimed.error_message, None);
    }

    #[test]
    fn unknown_ids_are_reported() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.get_source(99),
            Err(IngestError::SourceNotFound { source_id: 99 })
        ));
        assert!(matches!(
            store.get_book(5),
            Err(IngestError::BookNotFound { book_id: 5 })
        ));
        assert!(matches!(
            store.claim_source(99, SourceStatus::Ocr),
            Err(IngestError::SourceNotFound { .. })
        ));
    }
}
