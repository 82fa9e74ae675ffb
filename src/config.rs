//! Feed and transport configuration.
//!
//! Everything a feed needs is passed in through these structs at
//! construction. They deserialize from TOML with every field optional:
//!
//! ```toml
//! variant = "batched"
//! poll_interval_ms = 100
//!
//! [transport]
//! base_url = "http://localhost:8080"
//!
//! [transport.backoff]
//! max_attempts = 6
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::Seq;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which polling contract the server speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolVariant {
    /// `GET updates?seq=N`, one event per request.
    ExactSeq,
    /// `GET updates?fromExclusive=N`, all retained events after N.
    #[default]
    Batched,
}

impl ProtocolVariant {
    /// How the contract's server reports `latestSeq` in a snapshot.
    ///
    /// The exact-seq server hands out the next seq it will assign, so `0`
    /// is an empty log.
    pub fn snapshot_boundary(self) -> SnapshotBoundary {
        match self {
            ProtocolVariant::ExactSeq => SnapshotBoundary::Exclusive,
            ProtocolVariant::Batched => SnapshotBoundary::Inclusive,
        }
    }
}

/// How a snapshot's reported seq maps to the first seq to stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotBoundary {
    /// The snapshot includes the event at `stateSeq`; stream from `stateSeq + 1`.
    #[default]
    Inclusive,
    /// `stateSeq` is the next seq the server will assign; stream from it.
    Exclusive,
}

/// What to do when events skip past the cursor inside one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    #[default]
    Resync,
    /// Log and count the gap, then deliver what arrived.
    Skip,
}

/// Exponential backoff schedule for retried requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Extra random delay as a fraction of the current step, in `[0, 1]`.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay_ms: 50,
            max_delay_ms: 500,
            jitter: 0.0,
        }
    }
}

impl BackoffPolicy {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay before retry number `retry` (0-based), without jitter
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.initial_delay().saturating_mul(factor).min(self.max_delay())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointPaths {
    pub latest_seq: String,
    pub snapshot: String,
    pub updates: String,
}

impl Default for EndpointPaths {
    fn default() -> Self {
        Self {
            latest_seq: "/latestSeq".to_string(),
            snapshot: "/snapshot".to_string(),
            updates: "/updates".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    /// Per-attempt timeout
    pub request_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub backoff: BackoffPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            request_timeout_ms: 5_000,
            connect_timeout_ms: 2_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub variant: ProtocolVariant,
    pub paths: EndpointPaths,
    /// Wait after a poll that found nothing new
    pub poll_interval_ms: u64,
    /// Snapshots tried per resync before giving up
    pub max_resync_attempts: u32,
    /// Consecutive malformed responses tolerated
    pub max_malformed_retries: u32,
    /// Fatal if no request succeeds for this long
    pub staleness_timeout_ms: u64,
    /// Unset: whatever the variant's server means by `latestSeq`
    pub snapshot_boundary: Option<SnapshotBoundary>,
    pub gap_policy: GapPolicy,
    /// Warm-restart checkpoint; skips the bootstrap snapshot when set
    pub start_cursor: Option<Seq>,
    pub transport: TransportConfig,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            variant: ProtocolVariant::default(),
            paths: EndpointPaths::default(),
            poll_interval_ms: 100,
            max_resync_attempts: 5,
            max_malformed_retries: 5,
            staleness_timeout_ms: 30_000,
            snapshot_boundary: None,
            gap_policy: GapPolicy::default(),
            start_cursor: None,
            transport: TransportConfig::default(),
        }
    }
}

impl FeedConfig {
    pub fn new(base_url: impl Into<String>, variant: ProtocolVariant) -> Self {
        Self {
            variant,
            transport: TransportConfig {
                base_url: base_url.into(),
                ..TransportConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: FeedConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn boundary(&self) -> SnapshotBoundary {
        self.snapshot_boundary
            .unwrap_or_else(|| self.variant.snapshot_boundary())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn staleness_timeout(&self) -> Duration {
        Duration::from_millis(self.staleness_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if let Err(e) = Url::parse(&self.transport.base_url) {
            return invalid(format!("base_url {:?}: {}", self.transport.base_url, e));
        }
        let backoff = &self.transport.backoff;
        if backoff.max_attempts == 0 {
            return invalid("backoff.max_attempts must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&backoff.jitter) {
            return invalid(format!("backoff.jitter {} outside [0, 1]", backoff.jitter));
        }
        if self.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be positive".to_string());
        }
        if self.staleness_timeout_ms <= self.poll_interval_ms {
            return invalid(format!(
                "staleness_timeout_ms ({}) must exceed poll_interval_ms ({})",
                self.staleness_timeout_ms, self.poll_interval_ms
            ));
        }
        if self.max_resync_attempts == 0 {
            return invalid("max_resync_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}
