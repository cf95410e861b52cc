use chrono::{DateTime, Duration, Utc};

use shelfnet_store::Database;

use crate::error::Result;

/// Daily request allowance per sender. Peers that supplied content to us
/// earn a bonus on top of the base allowance.
#[derive(Debug, Clone, Copy)]
pub struct RequestLimits {
    pub base_daily: u32,
    pub per_download_bonus: u32,
    pub max_bonus: u32,
}

impl RequestLimits {
    pub fn new(base_daily: u32, per_download_bonus: u32, max_bonus: u32) -> Self {
        Self {
            base_daily,
            per_download_bonus,
            max_bonus,
        }
    }

    pub fn friend_bonus(&self, download_count: i64) -> u32 {
        let downloads = u32::try_from(download_count.max(0)).unwrap_or(u32::MAX);
        downloads
            .saturating_mul(self.per_download_bonus)
            .min(self.max_bonus)
    }

    pub fn effective_limit(&self, download_count: i64) -> u32 {
        self.base_daily
            .saturating_add(self.friend_bonus(download_count))
    }

    /// Whether one more request from `sender` fits in the trailing 24 hours.
    pub fn check(&self, db: &Database, sender: &str, now: DateTime<Utc>) -> Result<bool> {
        let limit = self.effective_limit(db.friend_download_count(sender)?);
        let recent = db.count_requests_since(sender, now - Duration::hours(24))?;
        if recent >= limit {
            tracing::debug!(sender = %sender, recent, limit, "Rate limit exceeded");
            return Ok(false);
        }
        Ok(true)
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self::new(10, 2, 20)
    }
}

#[cfg(test)]
mod tests {
    use shelfnet_store::NewRequest;

    use super::*;

    fn record(db: &mut Database, id: &str, sender: &str, at: DateTime<Utc>) {
        let req = NewRequest {
            event_id: id.to_string(),
            sender_pubkey: sender.to_string(),
            author: None,
            series: None,
            title: Some("anything".to_string()),
            file_hash: None,
            created_at: at.timestamp(),
        };
        db.record_incoming_request(&req, at).unwrap();
    }

    #[test]
    fn test_bonus_is_capped() {
        let limits = RequestLimits::new(10, 2, 20);
        assert_eq!(limits.effective_limit(0), 10);
        assert_eq!(limits.effective_limit(3), 16);
        assert_eq!(limits.effective_limit(1_000), 30);
        assert_eq!(limits.effective_limit(-5), 10);
    }

    #[test]
    fn test_window_is_trailing_day() {
        let mut db = Database::open_in_memory().unwrap();
        let limits = RequestLimits::new(2, 1, 5);
        let now = Utc::now();

        record(&mut db, "a", "peer", now - Duration::hours(30));
        record(&mut db, "b", "peer", now - Duration::hours(2));
        assert!(limits.check(&db, "peer", now).unwrap());

        record(&mut db, "c", "peer", now - Duration::hours(1));
        assert!(!limits.check(&db, "peer", now).unwrap());
        assert!(limits.check(&db, "someone-else", now).unwrap());
    }

    #[test]
    fn test_friends_get_more() {
        let mut db = Database::open_in_memory().unwrap();
        let limits = RequestLimits::new(1, 1, 5);
        let now = Utc::now();

        record(&mut db, "a", "friend", now);
        assert!(!limits.check(&db, "friend", now).unwrap());

        db.record_download("friend", now).unwrap();
        assert!(limits.check(&db, "friend", now).unwrap());
    }
}
