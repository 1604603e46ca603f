//! Node configuration.
//!
//! Every duration is stored in milliseconds so the file format stays flat;
//! accessors convert to `Duration`.

use crate::error::{ClusterError, ClusterResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Cap of the doubling backoff between delivery attempts.
pub const MAX_RETRY_BACKOFF_MS: u64 = 1_200;

/// Upper bound (exclusive) of the random jitter added to each backoff.
pub const RETRY_JITTER_MS: u64 = 50;

/// How many acknowledgments a submission needs before it commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QuorumPolicy {
    /// Every member still required by the submission must acknowledge.
    #[default]
    All,
    /// Strictly more than half of the required members must acknowledge.
    Majority,
}

impl QuorumPolicy {
    /// Returns true when `acked` acknowledgments satisfy a required set of
    /// `required` members.
    pub fn is_satisfied(&self, acked: usize, required: usize) -> bool {
        if required == 0 {
            return false;
        }
        match self {
            QuorumPolicy::All => acked >= required,
            QuorumPolicy::Majority => acked > required / 2,
        }
    }
}

impl std::str::FromStr for QuorumPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "all" => Ok(QuorumPolicy::All),
            "majority" => Ok(QuorumPolicy::Majority),
            other => Err(format!("unknown quorum policy '{}'", other)),
        }
    }
}

/// Which nodes may stamp a new log index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexAssignment {
    /// Any member stamps the next index from its own counter.
    #[default]
    Local,
    /// Only the current master accepts submissions.
    MasterOnly,
}

/// Wire codec used by the UDP transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Bincode,
    Json,
}

/// Timing settings for discovery and replication.
///
/// A member is evicted only after its whole delivery budget is spent
/// (see [`ClusterConfig::member_delivery_budget`]). When
/// `submit_deadline_ms` is shorter than that budget, a silent member makes
/// every submission fail with `QuorumUnreachable` at the deadline and is
/// never evicted. Over UDP a crashed peer is silent, since sends to it
/// still succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long `join_cluster` waits for a discovery reply before the node
    /// founds its own cluster.
    pub discovery_timeout_ms: u64,

    /// Per-member budget for an APPEND_PENDING acknowledgment, split across
    /// the delivery attempts.
    pub member_timeout_ms: u64,

    /// Delivery attempts per member before it is evicted.
    pub send_attempts: usize,

    /// Base backoff between delivery attempts; doubled each retry.
    pub retry_backoff_ms: u64,

    /// Upper bound for a whole submission.
    pub submit_deadline_ms: u64,

    /// Interval of the housekeeping task that purges removed members.
    pub purge_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            discovery_timeout_ms: 2_000,
            member_timeout_ms: 5_000,
            send_attempts: 3,
            retry_backoff_ms: 150,
            submit_deadline_ms: 15_000,
            purge_interval_ms: 10_000,
        }
    }
}

/// Configuration for a cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Address the cluster transport binds to. This is the node's identity.
    pub bind_addr: SocketAddr,

    /// Addresses probed by discovery when joining.
    pub seeds: Vec<SocketAddr>,

    /// Address of the admin HTTP API. Defaults to the bind port + 1000.
    pub http_addr: Option<SocketAddr>,

    pub quorum: QuorumPolicy,

    pub index_assignment: IndexAssignment,

    pub codec: CodecKind,

    pub timing: TimingConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            seeds: Vec::new(),
            http_addr: None,
            quorum: QuorumPolicy::default(),
            index_assignment: IndexAssignment::default(),
            codec: CodecKind::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ClusterConfigBuilder {
        ClusterConfigBuilder::default()
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> ClusterResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClusterError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| ClusterError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Admin API address, falling back to the bind port + 1000.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr.unwrap_or_else(|| {
            SocketAddr::new(
                self.bind_addr.ip(),
                self.bind_addr.port().wrapping_add(1000),
            )
        })
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.discovery_timeout_ms)
    }

    pub fn member_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.member_timeout_ms)
    }

    /// Time to wait for an acknowledgment after a single delivery attempt.
    pub fn attempt_timeout(&self) -> Duration {
        let attempts = self.timing.send_attempts.max(1) as u64;
        Duration::from_millis((self.timing.member_timeout_ms / attempts).max(1))
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.timing.retry_backoff_ms)
    }

    pub fn submit_deadline(&self) -> Duration {
        Duration::from_millis(self.timing.submit_deadline_ms)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_millis(self.timing.purge_interval_ms)
    }

    /// Longest time a single silent member can hold a submission before it
    /// is evicted: every attempt timeout plus the backoff and maximum jitter
    /// between attempts.
    pub fn member_delivery_budget(&self) -> Duration {
        let attempts = self.timing.send_attempts.max(1);
        let mut budget = self.attempt_timeout() * attempts as u32;

        let mut delay = self.timing.retry_backoff_ms;
        for _ in 1..attempts {
            budget += Duration::from_millis(delay + RETRY_JITTER_MS - 1);
            delay = (delay * 2).min(MAX_RETRY_BACKOFF_MS);
        }
        budget
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ClusterResult<()> {
        if self.timing.send_attempts == 0 {
            return Err(ClusterError::Config(
                "timing.send_attempts must be > 0".to_string(),
            ));
        }

        if self.timing.member_timeout_ms == 0 || self.timing.submit_deadline_ms == 0 {
            return Err(ClusterError::Config(
                "member and submit timeouts must be non-zero".to_string(),
            ));
        }

        if self.timing.discovery_timeout_ms == 0 || self.timing.purge_interval_ms == 0 {
            return Err(ClusterError::Config(
                "discovery timeout and purge interval must be non-zero".to_string(),
            ));
        }

        let budget = self.member_delivery_budget();
        if self.submit_deadline() < budget {
            tracing::warn!(
                "submit deadline {:?} is shorter than the per-member delivery budget {:?}: \
                 silent members will fail submissions instead of being evicted",
                self.submit_deadline(),
                budget
            );
        }

        if self.seeds.contains(&self.bind_addr) {
            return Err(ClusterError::Config(format!(
                "seed list contains the node's own address {}",
                self.bind_addr
            )));
        }

        Ok(())
    }
}

/// Builder for ClusterConfig.
#[derive(Debug, Default)]
pub struct ClusterConfigBuilder {
    config: ClusterConfig,
}

impl ClusterConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Add a discovery seed.
    pub fn seed(mut self, addr: SocketAddr) -> Self {
        self.config.seeds.push(addr);
        self
    }

    /// Replace all seeds at once.
    pub fn seeds(mut self, seeds: impl IntoIterator<Item = SocketAddr>) -> Self {
        self.config.seeds = seeds.into_iter().collect();
        self
    }

    pub fn http_addr(mut self, addr: SocketAddr) -> Self {
        self.config.http_addr = Some(addr);
        self
    }

    pub fn quorum(mut self, quorum: QuorumPolicy) -> Self {
        self.config.quorum = quorum;
        self
    }

    pub fn index_assignment(mut self, assignment: IndexAssignment) -> Self {
        self.config.index_assignment = assignment;
        self
    }

    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn discovery_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.discovery_timeout_ms = ms;
        self
    }

    pub fn member_timeout_ms(mut self, ms: u64) -> Self {
        self.config.timing.member_timeout_ms = ms;
        self
    }

    pub fn send_attempts(mut self, attempts: usize) -> Self {
        self.config.timing.send_attempts = attempts;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.timing.retry_backoff_ms = ms;
        self
    }

    pub fn submit_deadline_ms(mut self, ms: u64) -> Self {
        self.config.timing.submit_deadline_ms = ms;
        self
    }

    pub fn purge_interval_ms(mut self, ms: u64) -> Self {
        self.config.timing.purge_interval_ms = ms;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClusterResult<ClusterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
