//! v001 -- Catalog schema.
//!
//! The book catalog is owned by the library importer; this migration only
//! guarantees the columns the exchange core reads, so a standalone node and
//! the test suite have something to match requests against.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Books
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS books (
    book_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    title      TEXT NOT NULL,
    file_type  TEXT NOT NULL,
    file_size  INTEGER NOT NULL DEFAULT 0,
    file_hash  TEXT NOT NULL,                 -- 16-char content fingerprint
    ipfs_cid   TEXT,                          -- optional content address
    annotation TEXT,
    avail      INTEGER NOT NULL DEFAULT 1     -- boolean 0/1
);

CREATE INDEX IF NOT EXISTS idx_books_file_hash ON books(file_hash);

-- ----------------------------------------------------------------
-- Authors
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS authors (
    author_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS book_authors (
    book_id   INTEGER NOT NULL,
    author_id INTEGER NOT NULL,
    PRIMARY KEY (book_id, author_id),

    FOREIGN KEY (book_id) REFERENCES books(book_id) ON DELETE CASCADE,
    FOREIGN KEY (author_id) REFERENCES authors(author_id) ON DELETE CASCADE
);

-- ----------------------------------------------------------------
-- Series
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS series (
    series_id INTEGER PRIMARY KEY AUTOINCREMENT,
    name      TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS book_series (
    book_id   INTEGER NOT NULL,
    series_id INTEGER NOT NULL,
    ser_no    INTEGER,
    PRIMARY KEY (book_id, series_id),

    FOREIGN KEY (book_id) REFERENCES books(book_id) ON DELETE CASCADE,
    FOREIGN KEY (series_id) REFERENCES series(series_id) ON DELETE CASCADE
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
