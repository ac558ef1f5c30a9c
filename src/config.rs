//! Node configurations.
//!
//! Built once at startup and handed into the [crate::Orchestrator]; there
//! is no process-wide mutable configuration state.

use std::sync::Arc;
use std::time::Duration;

use crate::overlay::{PassthroughPolicy, RecordPolicy};

/// Minimum peers required before the key/value workflow starts.
pub const DEFAULT_MIN_PEERS: usize = 3;
/// Upper bound on waiting for the minimum peer count.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(2 * 60);
/// Sleep between peer-readiness polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Timeout for the single bootstrap connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// Settle time after the connect attempt, before bootstrap runs.
pub const DEFAULT_CONNECT_SETTLE: Duration = Duration::from_secs(5);
/// Settle time between store completion and the retrieve attempt,
/// allowing asynchronous replication to propagate.
pub const DEFAULT_REPLICATION_SETTLE: Duration = Duration::from_secs(5);
/// Sleep between connectivity-monitor ticks.
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(10);
/// Generous upper bound on everything before the monitoring loop.
pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(30 * 60);

const DEFAULT_STORE_ATTEMPTS: u32 = 5;
const DEFAULT_STORE_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_PROTOCOL_PREFIX: &str = "/myapp";
const DEFAULT_ROUTING_REFRESH: Duration = Duration::from_secs(10);

/// Bounded retry configuration. Pure data, no state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts. At least one attempt is always made.
    pub max_attempts: u32,
    /// Sleep between failed attempts.
    pub inter_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_STORE_ATTEMPTS,
            inter_delay: DEFAULT_STORE_DELAY,
        }
    }
}

/// Whether the overlay answers queries from other peers or only issues
/// its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Server,
    Client,
}

/// Options handed to whatever constructs the overlay collaborator.
#[derive(Clone)]
pub struct OverlayOptions {
    pub mode: Mode,
    /// Protocol prefix namespacing this overlay's queries and keys.
    pub protocol_prefix: String,
    pub routing_refresh_period: Duration,
    /// Record validation/selection strategy. Defaults to
    /// [PassthroughPolicy].
    pub record_policy: Arc<dyn RecordPolicy>,
}

impl std::fmt::Debug for OverlayOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayOptions")
            .field("mode", &self.mode)
            .field("protocol_prefix", &self.protocol_prefix)
            .field("routing_refresh_period", &self.routing_refresh_period)
            .finish_non_exhaustive()
    }
}

impl Default for OverlayOptions {
    fn default() -> Self {
        OverlayOptions {
            mode: Mode::Server,
            protocol_prefix: DEFAULT_PROTOCOL_PREFIX.to_string(),
            routing_refresh_period: DEFAULT_ROUTING_REFRESH,
            record_policy: Arc::new(PassthroughPolicy),
        }
    }
}

/// Node lifecycle configurations.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether this node is itself a bootstrap node. When true, no
    /// bootstrap address is needed and the Connecting phase is skipped.
    pub is_bootstrap: bool,
    /// Dialable address of a known bootstrap peer
    /// (`<addr>/p2p/<peer-id>`). Required unless [Config::is_bootstrap].
    pub bootstrap_addr: Option<String>,
    /// Minimum peers before the key/value workflow starts.
    pub min_peers: usize,
    /// Wall-clock bound on waiting for [Config::min_peers].
    pub max_wait: Duration,
    /// Sleep between peer-readiness polls.
    pub poll_interval: Duration,
    /// Timeout for the single bootstrap connection attempt.
    pub connect_timeout: Duration,
    /// Settle time after the connect attempt, before bootstrap.
    pub connect_settle: Duration,
    /// Settle time between store and retrieve.
    pub replication_settle: Duration,
    /// Retry policy for the store operation.
    pub store_retry: RetryPolicy,
    /// Sleep between connectivity-monitor ticks.
    pub monitor_interval: Duration,
    /// Upper bound covering Connecting through RetrievingValue. The
    /// monitoring loop is explicitly unbounded.
    pub run_deadline: Duration,
    /// Key of the record exercised per run.
    pub record_key: String,
    /// Value of the record exercised per run.
    pub record_value: bytes::Bytes,
    /// Options for constructing the overlay collaborator.
    pub overlay: OverlayOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            is_bootstrap: false,
            bootstrap_addr: None,
            min_peers: DEFAULT_MIN_PEERS,
            max_wait: DEFAULT_MAX_WAIT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            connect_settle: DEFAULT_CONNECT_SETTLE,
            replication_settle: DEFAULT_REPLICATION_SETTLE,
            store_retry: RetryPolicy::default(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            run_deadline: DEFAULT_RUN_DEADLINE,
            record_key: format!("{DEFAULT_PROTOCOL_PREFIX}/test"),
            record_value: bytes::Bytes::from_static(b"Hello, DHT!"),
            overlay: OverlayOptions::default(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a bootstrap node address is required when not running as a bootstrap node")]
    MissingBootstrapAddr,
    #[error("invalid bootstrap address {addr:?}: {reason}")]
    InvalidBootstrapAddr { addr: String, reason: String },
}

impl Config {
    /// Rejects configurations that must fail fast, before any network
    /// operation: a node that is not itself a bootstrap node needs a
    /// bootstrap address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_bootstrap && self.bootstrap_addr.is_none() {
            return Err(ConfigError::MissingBootstrapAddr);
        }

        Ok(())
    }
}
