//! Server configuration.
//!
//! [`ServerConfig`] carries defaults suitable for local development and can
//! be overridden through environment variables:
//!
//! | Variable | Field | Default |
//! |----------|-------|---------|
//! | `DOCSYNC_BIND` | `bind_addr` | `127.0.0.1:5000` |
//! | `DOCSYNC_DATA_DIR` | `data_dir` | `./data` |
//! | `DOCSYNC_FLUSH_DELAY` | `flush_delay` | `500ms` |
//! | `DOCSYNC_FLUSH_RETRIES` | `flush_max_retries` | `5` |
//! | `DOCSYNC_RETRY_BASE` | `retry_base` | `250ms` |
//! | `DOCSYNC_HEARTBEAT` | `heartbeat_interval` | `30s` |
//! | `DOCSYNC_MAX_MEMBERS` | `max_members_per_document` | `100` |
//! | `DOCSYNC_LOCK_RELEASE` | `lock_release` | `retain` |

use crate::error::{Result, SyncError};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// What happens to a user's locks when their last connection leaves a room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockReleasePolicy {
    /// Locks survive until explicitly unlocked.
    #[default]
    Retain,
    /// Locks are released and the new lock set is broadcast.
    OnLeave,
}

impl FromStr for LockReleasePolicy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(LockReleasePolicy::Retain),
            "on-leave" | "on_leave" | "onleave" => Ok(LockReleasePolicy::OnLeave),
            other => Err(SyncError::Config(format!(
                "unknown lock release policy '{}'",
                other
            ))),
        }
    }
}

/// Server settings. [`ServerConfig::from_env`] reads the `DOCSYNC_*`
/// variables over [`Default`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the HTTP / WebSocket listener binds to
    pub bind_addr: SocketAddr,

    /// Directory holding the filesystem document store
    pub data_dir: PathBuf,

    /// Batching window between the first pending edit and its flush
    pub flush_delay: Duration,

    /// Retries after a failed write before waiting for the next edit
    pub flush_max_retries: u32,

    /// Base delay of the exponential retry backoff
    pub retry_base: Duration,

    /// Interval between WebSocket pings
    pub heartbeat_interval: Duration,

    /// Upper bound on connections attached to one document
    pub max_members_per_document: usize,

    /// What happens to a user's locks when they leave
    pub lock_release: LockReleasePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            data_dir: PathBuf::from("./data"),
            flush_delay: Duration::from_millis(500),
            flush_max_retries: 5,
            retry_base: Duration::from_millis(250),
            heartbeat_interval: Duration::from_secs(30),
            max_members_per_document: 100,
            lock_release: LockReleasePolicy::Retain,
        }
    }
}

impl ServerConfig {
    /// Build a configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup, starting from the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = ServerConfig::default();

        if let Some(value) = lookup("DOCSYNC_BIND") {
            config.bind_addr = value
                .parse()
                .map_err(|_| SyncError::Config(format!("invalid DOCSYNC_BIND '{}'", value)))?;
        }
        if let Some(value) = lookup("DOCSYNC_DATA_DIR") {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("DOCSYNC_FLUSH_DELAY") {
            config.flush_delay = parse_duration(&value)?;
        }
        if let Some(value) = lookup("DOCSYNC_FLUSH_RETRIES") {
            config.flush_max_retries = parse_number("DOCSYNC_FLUSH_RETRIES", &value)?;
        }
        if let Some(value) = lookup("DOCSYNC_RETRY_BASE") {
            config.retry_base = parse_duration(&value)?;
        }
        if let Some(value) = lookup("DOCSYNC_HEARTBEAT") {
            config.heartbeat_interval = parse_duration(&value)?;
        }
        if let Some(value) = lookup("DOCSYNC_MAX_MEMBERS") {
            config.max_members_per_document = parse_number("DOCSYNC_MAX_MEMBERS", &value)?;
        }
        if let Some(value) = lookup("DOCSYNC_LOCK_RELEASE") {
            config.lock_release = value.parse()?;
        }

        Ok(config)
    }

    /// Delay before retry number `attempt` (0-based) of a failed flush.
    /// Saturates at [`Duration::MAX`].
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        self.retry_base.saturating_mul(2_u32.pow(attempt.min(10)))
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| SyncError::Config(format!("invalid {} '{}'", key, value)))
}

/// Parse a duration.
///
/// # Supported Formats
///
/// | Format | Example | Result |
/// |--------|---------|--------|
/// | Milliseconds | `"500ms"` | 500 ms |
/// | Seconds with suffix | `"5s"` | 5 s |
/// | Minutes | `"2m"` | 120 s |
/// | Plain number | `"30"` | 30 s |
///
/// # Examples
///
/// ```
/// use docsync_axum::server::parse_duration;
/// use std::time::Duration;
///
/// assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
/// assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
/// assert_eq!(parse_duration("30").unwrap(), Duration::from_secs(30));
/// ```
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim();
    let invalid = || SyncError::Config(format!("invalid duration '{}'", value));

    if let Some(ms) = trimmed.strip_suffix("ms") {
        return ms.parse().map(Duration::from_millis).map_err(|_| invalid());
    }
    if let Some(s) = trimmed.strip_suffix('s') {
        return s.parse().map(Duration::from_secs).map_err(|_| invalid());
    }
    if let Some(m) = trimmed.strip_suffix('m') {
        return m
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
            .ok_or_else(invalid);
    }
    trimmed.parse().map(Duration::from_secs).map_err(|_| invalid())
}
