use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS friends (
    pubkey           TEXT PRIMARY KEY NOT NULL,   -- hex x-only pubkey
    download_count   INTEGER NOT NULL DEFAULT 0,
    last_download_at TEXT,                        -- RFC-3339
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
