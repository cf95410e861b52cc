//! Node configuration loaded from environment variables.
//!
//! Every setting has a default so a receive-only node starts with zero
//! configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use shelfnet_net::{PublishConfig, SubscriptionConfig};
use shelfnet_shared::EventKinds;

/// Node configuration.
#[derive(Clone)]
pub struct NodeConfig {
    /// SQLite database file.
    /// Env: `SHELFNET_DB_PATH`
    /// Default: platform data directory (see `Database::new`).
    pub db_path: Option<PathBuf>,

    /// Relay WebSocket URLs.
    /// Env: `SHELFNET_RELAYS` (comma-separated)
    pub relays: Vec<String>,

    /// Hex secret key. Without one the node only answers and never requests.
    /// Env: `SHELFNET_SECRET_KEY`
    pub secret_key: Option<String>,

    /// File holding the hex secret key, read when `secret_key` is unset.
    /// Env: `SHELFNET_KEY_FILE`
    pub key_file: Option<PathBuf>,

    /// Flat blacklist file.
    /// Env: `SHELFNET_BLACKLIST_PATH`
    /// Default: `./blacklist.txt`
    pub blacklist_path: PathBuf,

    /// Requests accepted per sender in any trailing 24 hours.
    /// Env: `SHELFNET_DAILY_LIMIT`
    pub daily_limit: u32,

    /// Extra allowance per download a peer supplied to us.
    /// Env: `SHELFNET_FRIEND_BONUS`
    pub friend_bonus: u32,

    /// Upper bound on the extra allowance.
    /// Env: `SHELFNET_MAX_FRIEND_BONUS`
    pub max_friend_bonus: u32,

    /// Env: `SHELFNET_LOOKBACK_HOURS`
    pub lookback: Duration,

    /// Age after which foreign requests are deleted.
    /// Env: `SHELFNET_REQUEST_TTL_DAYS`
    pub request_ttl: chrono::Duration,

    /// Env: `SHELFNET_CLEANUP_INTERVAL_SECS`
    pub cleanup_interval: Duration,

    /// Env: `SHELFNET_CONNECT_TIMEOUT_SECS`
    pub connect_timeout: Duration,

    /// Env: `SHELFNET_PUBLISH_TIMEOUT_SECS`
    pub publish_timeout: Duration,

    /// Env: `SHELFNET_BACKOFF_INITIAL_SECS`
    pub backoff_initial: Duration,

    /// Env: `SHELFNET_BACKOFF_MAX_SECS`
    pub backoff_max: Duration,

    /// Env: `SHELFNET_REQUEST_KIND`, `SHELFNET_RESPONSE_KIND`
    pub kinds: EventKinds,

    /// Mark a request sent, without replying, once peers delivered every
    /// book we matched.
    /// Env: `SHELFNET_SUPPRESS_REDUNDANT` (true/false)
    pub suppress_redundant_replies: bool,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("db_path", &self.db_path)
            .field("relays", &self.relays)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("key_file", &self.key_file)
            .field("blacklist_path", &self.blacklist_path)
            .field("daily_limit", &self.daily_limit)
            .field("friend_bonus", &self.friend_bonus)
            .field("max_friend_bonus", &self.max_friend_bonus)
            .field("lookback", &self.lookback)
            .field("request_ttl_days", &self.request_ttl.num_days())
            .field("cleanup_interval", &self.cleanup_interval)
            .field("kinds", &self.kinds)
            .field("suppress_redundant_replies", &self.suppress_redundant_replies)
            .finish_non_exhaustive()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            relays: Vec::new(),
            secret_key: None,
            key_file: None,
            blacklist_path: PathBuf::from("./blacklist.txt"),
            daily_limit: 10,
            friend_bonus: 2,
            max_friend_bonus: 20,
            lookback: Duration::from_secs(6 * 3600),
            request_ttl: chrono::Duration::days(7),
            cleanup_interval: Duration::from_secs(3600),
            connect_timeout: Duration::from_secs(10),
            publish_timeout: Duration::from_secs(10),
            backoff_initial: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            kinds: EventKinds::default(),
            suppress_redundant_replies: true,
        }
    }
}

impl NodeConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("SHELFNET_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        if let Ok(list) = std::env::var("SHELFNET_RELAYS") {
            config.relays = parse_relays(&list);
        }

        if let Ok(key) = std::env::var("SHELFNET_SECRET_KEY") {
            if !key.trim().is_empty() {
                config.secret_key = Some(key.trim().to_string());
            }
        }

        if let Ok(path) = std::env::var("SHELFNET_KEY_FILE") {
            config.key_file = Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("SHELFNET_BLACKLIST_PATH") {
            config.blacklist_path = PathBuf::from(path);
        }

        parse_var("SHELFNET_DAILY_LIMIT", &mut config.daily_limit);
        parse_var("SHELFNET_FRIEND_BONUS", &mut config.friend_bonus);
        parse_var("SHELFNET_MAX_FRIEND_BONUS", &mut config.max_friend_bonus);

        let mut hours = config.lookback.as_secs() / 3600;
        parse_var("SHELFNET_LOOKBACK_HOURS", &mut hours);
        config.lookback = Duration::from_secs(hours * 3600);

        let mut days = config.request_ttl.num_days();
        parse_var("SHELFNET_REQUEST_TTL_DAYS", &mut days);
        config.request_ttl = chrono::Duration::days(days.max(0));

        parse_secs("SHELFNET_CLEANUP_INTERVAL_SECS", &mut config.cleanup_interval);
        parse_secs("SHELFNET_CONNECT_TIMEOUT_SECS", &mut config.connect_timeout);
        parse_secs("SHELFNET_PUBLISH_TIMEOUT_SECS", &mut config.publish_timeout);
        parse_secs("SHELFNET_BACKOFF_INITIAL_SECS", &mut config.backoff_initial);
        parse_secs("SHELFNET_BACKOFF_MAX_SECS", &mut config.backoff_max);

        parse_var("SHELFNET_REQUEST_KIND", &mut config.kinds.request);
        parse_var("SHELFNET_RESPONSE_KIND", &mut config.kinds.response);

        if let Ok(val) = std::env::var("SHELFNET_SUPPRESS_REDUNDANT") {
            config.suppress_redundant_replies = val != "false" && val != "0";
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn subscription(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            kinds: self.kinds.all().to_vec(),
            lookback: self.lookback,
            connect_timeout: self.connect_timeout,
            backoff_initial: self.backoff_initial,
            backoff_max: self.backoff_max,
        }
    }

    pub fn publish(&self) -> PublishConfig {
        PublishConfig {
            connect_timeout: self.connect_timeout,
            publish_timeout: self.publish_timeout,
        }
    }
}

fn parse_relays(list: &str) -> Vec<String> {
    let mut relays: Vec<String> = Vec::new();
    for url in list.split(',').map(str::trim).filter(|u| !u.is_empty()) {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            tracing::warn!(value = %url, "Ignoring relay URL without ws:// or wss:// scheme");
            continue;
        }
        if !relays.iter().any(|r| r == url) {
            relays.push(url.to_string());
        }
    }
    relays
}

fn parse_var<T: FromStr>(name: &str, target: &mut T) {
    if let Ok(raw) = std::env::var(name) {
        match raw.trim().parse::<T>() {
            Ok(value) => *target = value,
            Err(_) => tracing::warn!(var = name, value = %raw, "Invalid value, using default"),
        }
    }
}

fn parse_secs(name: &str, target: &mut Duration) {
    let mut secs = target.as_secs();
    parse_var(name, &mut secs);
    *target = Duration::from_secs(secs.max(1));
}
