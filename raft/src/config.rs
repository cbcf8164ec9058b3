//! Runtime configuration for a `Raft` instance.

use rand::thread_rng;
use rand::Rng;

/// Determines when a log compaction (snapshot) is triggered.
#[derive(Debug, Clone)]
pub enum SnapshotPolicy {
    /// Snapshot once this many log entries have been applied since the last
    /// snapshot (or since startup, if none has been taken yet).
    LogsSinceLast(u64),
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        SnapshotPolicy::LogsSinceLast(5000)
    }
}

/// Error produced while validating a `Config`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("election_timeout_min ({0}) must be less than election_timeout_max ({1})")]
    ElectionTimeoutRange(u64, u64),
    #[error("election_timeout_min ({0}) must be greater than heartbeat_interval ({1})")]
    ElectionTimeoutTooSmall(u64, u64),
    #[error("max_payload_entries must be greater than 0")]
    EmptyPayload,
}

/// Runtime configuration for a Raft node.
///
/// Timers are expressed in milliseconds so they can be tuned for tests
/// without pulling `std::time::Duration` through every call site.
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_name: String,
    pub election_timeout_min: u64,
    pub election_timeout_max: u64,
    pub heartbeat_interval: u64,
    pub install_snapshot_timeout: u64,
    pub max_payload_entries: u64,
    pub replication_lag_threshold: u64,
    pub snapshot_policy: SnapshotPolicy,
    pub snapshot_max_chunk_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: "gallery-messages".into(),
            election_timeout_min: 150,
            election_timeout_max: 300,
            heartbeat_interval: 50,
            install_snapshot_timeout: 200,
            max_payload_entries: 300,
            replication_lag_threshold: 1000,
            snapshot_policy: SnapshotPolicy::default(),
            snapshot_max_chunk_size: 3 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn build(cluster_name: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder {
            inner: Config {
                cluster_name: cluster_name.into(),
                ..Default::default()
            },
        }
    }

    /// A uniformly random election timeout within the configured range, used
    /// so that followers don't all time out and start an election in lockstep.
    pub fn new_rand_election_timeout(&self) -> u64 {
        thread_rng().gen_range(self.election_timeout_min..self.election_timeout_max)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(ConfigError::ElectionTimeoutRange(self.election_timeout_min, self.election_timeout_max));
        }
        if self.election_timeout_min <= self.heartbeat_interval {
            return Err(ConfigError::ElectionTimeoutTooSmall(self.election_timeout_min, self.heartbeat_interval));
        }
        if self.max_payload_entries == 0 {
            return Err(ConfigError::EmptyPayload);
        }
        Ok(())
    }
}

/// Builder for `Config`, mirroring the fluent style used elsewhere in this
/// crate for constructing immutable, validated values.
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    pub fn election_timeout_min(mut self, v: u64) -> Self {
        self.inner.election_timeout_min = v;
        self
    }

    pub fn election_timeout_max(mut self, v: u64) -> Self {
        self.inner.election_timeout_max = v;
        self
    }

    pub fn heartbeat_interval(mut self, v: u64) -> Self {
        self.inner.heartbeat_interval = v;
        self
    }

    pub fn install_snapshot_timeout(mut self, v: u64) -> Self {
        self.inner.install_snapshot_timeout = v;
        self
    }

    pub fn max_payload_entries(mut self, v: u64) -> Self {
        self.inner.max_payload_entries = v;
        self
    }

    pub fn replication_lag_threshold(mut self, v: u64) -> Self {
        self.inner.replication_lag_threshold = v;
        self
    }

    pub fn snapshot_policy(mut self, v: SnapshotPolicy) -> Self {
        self.inner.snapshot_policy = v;
        self
    }

    pub fn validate(self) -> Result<Config, ConfigError> {
        self.inner.validate()?;
        Ok(self.inner)
    }
}
