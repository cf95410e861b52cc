use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::{parse_ts, ts, Database};
use crate::error::Result;
use crate::models::Friend;

impl Database {
    /// Create the friend row with zero counters, or bump `updated_at` if it
    /// already exists.
    pub fn touch_friend(&self, pubkey: &str, now: DateTime<Utc>) -> Result<()> {
        let now = ts(now);
        self.conn().execute(
            "INSERT INTO friends (pubkey, download_count, created_at, updated_at)
             VALUES (?1, 0, ?2, ?2)
             ON CONFLICT(pubkey) DO UPDATE SET updated_at = excluded.updated_at",
            params![pubkey, now],
        )?;
        Ok(())
    }

    /// Count one completed download of content supplied by `pubkey`.
    pub fn record_download(&self, pubkey: &str, now: DateTime<Utc>) -> Result<()> {
        let now = ts(now);
        self.conn().execute(
            "INSERT INTO friends (pubkey, download_count, last_download_at, created_at, updated_at)
             VALUES (?1, 1, ?2, ?2, ?2)
             ON CONFLICT(pubkey) DO UPDATE SET
                 download_count = download_count + 1,
                 last_download_at = excluded.last_download_at,
                 updated_at = excluded.updated_at",
            params![pubkey, now],
        )?;
        Ok(())
    }

    pub fn get_friend(&self, pubkey: &str) -> Result<Option<Friend>> {
        let friend = self
            .conn()
            .query_row(
                "SELECT pubkey, download_count, last_download_at, created_at, updated_at
                 FROM friends WHERE pubkey = ?1",
                params![pubkey],
                row_to_friend,
            )
            .optional()?;
        Ok(friend)
    }

    /// Downloads credited to `pubkey`, zero for strangers.
    pub fn friend_download_count(&self, pubkey: &str) -> Result<i64> {
        Ok(self.get_friend(pubkey)?.map_or(0, |f| f.download_count))
    }
}

fn row_to_friend(row: &rusqlite::Row<'_>) -> rusqlite::Result<Friend> {
    let last: Option<String> = row.get(2)?;
    let created: String = row.get(3)?;
    let updated: String = row.get(4)?;

    Ok(Friend {
        pubkey: row.get(0)?,
        download_count: row.get(1)?,
        last_download_at: last.map(|s| parse_ts(2, &s)).transpose()?,
        created_at: parse_ts(3, &created)?,
        updated_at: parse_ts(4, &updated)?,
    })
}
