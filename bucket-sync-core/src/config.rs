use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_USER_AGENT: &str = "bucket-sync/0.1";

/// Settings for one reconciliation run against one prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Scope for list, put and delete. Normalised to end in `/` unless empty.
    #[serde(rename = "prefix")]
    pub destination_prefix: String,
    /// Sent on every listing and fetch request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Items fetched, hashed or uploaded at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Withhold the delete phase when it would remove more than this
    /// fraction of the stored names. `None` never withholds.
    #[serde(default)]
    pub max_delete_fraction: Option<f64>,
    #[serde(
        rename = "timeout_secs",
        default = "default_request_timeout",
        with = "duration_secs"
    )]
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn new(destination_prefix: &str) -> Self {
        Self {
            destination_prefix: normalise_prefix(destination_prefix),
            user_agent: default_user_agent(),
            concurrency: default_concurrency(),
            max_delete_fraction: None,
            request_timeout: default_request_timeout(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            prefix = %self.destination_prefix,
            concurrency = self.concurrency,
            max_delete_fraction = ?self.max_delete_fraction,
            "Loaded SyncConfig"
        );
        debug!(?self, "SyncConfig loaded (full debug)");
    }
}

/// Retry behaviour for document fetches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    #[serde(rename = "count", default = "default_retry_count")]
    pub retry_count: u32,
    /// Seconds; retry `n > 1` waits `backoff_factor * 2^(n-1)`, the first retry does not wait.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(rename = "statuses", default = "default_retryable_statuses")]
    pub retryable_statuses: BTreeSet<u16>,
    #[serde(
        rename = "timeout_secs",
        default = "default_request_timeout",
        with = "duration_secs"
    )]
    pub request_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            backoff_factor: default_backoff_factor(),
            retryable_statuses: default_retryable_statuses(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Trailing-slash normalisation shared by every prefix the crate handles.
pub fn normalise_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_count() -> u32 {
    3
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_retryable_statuses() -> BTreeSet<u16> {
    [502, 503, 504].into_iter().collect()
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}
