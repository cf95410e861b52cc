//! Read access to the local book catalog.
//!
//! Lookups take a plain `&Connection` so the request pipeline can run them
//! inside its own transaction.

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::database::Database;
use crate::error::Result;
use crate::models::{CatalogBook, CatalogQuery, NewCatalogBook};

/// Upper bound on candidates linked to a single request.
pub const MAX_MATCHES: usize = 50;

/// Find available books matching every present field of `query`.
///
/// Title, series and author are case-insensitive substring matches; the
/// file hash must match exactly. Returns `(book_id, file_hash)` pairs.
pub fn find_books(conn: &Connection, query: &CatalogQuery) -> rusqlite::Result<Vec<(i64, String)>> {
    if query.is_empty() {
        return Ok(Vec::new());
    }

    let mut sql = String::from("SELECT b.book_id, b.file_hash FROM books b WHERE b.avail = 1");
    let mut args: Vec<String> = Vec::new();

    if let Some(title) = &query.title {
        sql.push_str(" AND b.title LIKE ? ESCAPE '\\'");
        args.push(like_pattern(title));
    }
    if let Some(series) = &query.series {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM book_series bs JOIN series s ON s.series_id = bs.series_id
                          WHERE bs.book_id = b.book_id AND s.name LIKE ? ESCAPE '\\')",
        );
        args.push(like_pattern(series));
    }
    if let Some(author) = &query.author {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM book_authors ba JOIN authors a ON a.author_id = ba.author_id
                          WHERE ba.book_id = b.book_id AND a.name LIKE ? ESCAPE '\\')",
        );
        args.push(like_pattern(author));
    }
    if let Some(hash) = &query.file_hash {
        sql.push_str(" AND b.file_hash = ?");
        args.push(hash.clone());
    }
    sql.push_str(&format!(" ORDER BY b.book_id LIMIT {MAX_MATCHES}"));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
    })?;
    let found = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(found)
}

fn like_pattern(term: &str) -> String {
    let escaped = term
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

impl Database {
    pub fn find_books(&self, query: &CatalogQuery) -> Result<Vec<(i64, String)>> {
        Ok(find_books(self.conn(), query)?)
    }

    /// Load response-ready details for the given books, in id order.
    /// Unknown and unavailable ids are skipped.
    pub fn catalog_books(&self, book_ids: &[i64]) -> Result<Vec<CatalogBook>> {
        let mut book_stmt = self.conn().prepare(
            "SELECT b.book_id, b.title, b.file_type, b.file_size, b.file_hash, b.ipfs_cid,
                    (SELECT s.name FROM book_series bs JOIN series s ON s.series_id = bs.series_id
                     WHERE bs.book_id = b.book_id ORDER BY s.series_id LIMIT 1),
                    (SELECT bs.ser_no FROM book_series bs
                     WHERE bs.book_id = b.book_id ORDER BY bs.series_id LIMIT 1)
             FROM books b WHERE b.book_id = ?1 AND b.avail = 1",
        )?;
        let mut author_stmt = self.conn().prepare(
            "SELECT a.name FROM book_authors ba JOIN authors a ON a.author_id = ba.author_id
             WHERE ba.book_id = ?1 ORDER BY a.author_id",
        )?;

        let mut ids = book_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut books = Vec::with_capacity(ids.len());
        for id in ids {
            let book = book_stmt
                .query_row(params![id], |row| {
                    Ok(CatalogBook {
                        book_id: row.get(0)?,
                        title: row.get(1)?,
                        authors: Vec::new(),
                        file_type: row.get(2)?,
                        file_size: row.get(3)?,
                        file_hash: row.get(4)?,
                        ipfs_cid: row.get(5)?,
                        series: row.get(6)?,
                        series_number: row.get(7)?,
                    })
                })
                .optional()?;

            if let Some(mut book) = book {
                let authors = author_stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
                book.authors = authors.collect::<rusqlite::Result<Vec<_>>>()?;
                books.push(book);
            }
        }
        Ok(books)
    }

    /// Annotation text of the book with the given fingerprint, if any.
    pub fn annotation_for_hash(&self, file_hash: &str) -> Result<Option<String>> {
        let annotation = self
            .conn()
            .query_row(
                "SELECT annotation FROM books WHERE file_hash = ?1 AND annotation IS NOT NULL
                 ORDER BY book_id LIMIT 1",
                params![file_hash],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(annotation)
    }

    /// Insert a book with its authors and series. Used by importers and tests.
    pub fn add_catalog_book(&mut self, book: &NewCatalogBook) -> Result<i64> {
        let tx = self.conn_mut().transaction()?;

        tx.execute(
            "INSERT INTO books (title, file_type, file_size, file_hash, ipfs_cid, annotation)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                book.title,
                book.file_type,
                book.file_size,
                book.file_hash,
                book.ipfs_cid,
                book.annotation,
            ],
        )?;
        let book_id = tx.last_insert_rowid();

        for name in &book.authors {
            tx.execute(
                "INSERT OR IGNORE INTO authors (name) VALUES (?1)",
                params![name],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO book_authors (book_id, author_id)
                 SELECT ?1, author_id FROM authors WHERE name = ?2",
                params![book_id, name],
            )?;
        }

        if let Some((name, number)) = &book.series {
            tx.execute("INSERT OR IGNORE INTO series (name) VALUES (?1)", params![name])?;
            tx.execute(
                "INSERT OR IGNORE INTO book_series (book_id, series_id, ser_no)
                 SELECT ?1, series_id, ?3 FROM series WHERE name = ?2",
                params![book_id, name, number],
            )?;
        }

        tx.commit()?;
        Ok(book_id)
    }

    /// Hide a book from lookups without deleting it.
    pub fn set_book_available(&self, book_id: i64, available: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE books SET avail = ?1 WHERE book_id = ?2",
            params![available, book_id],
        )?;
        Ok(affected > 0)
    }
}
