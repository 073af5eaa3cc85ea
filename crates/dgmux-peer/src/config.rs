use std::path::Path;
use std::time::Duration;

use dgmux_frame::{
    ReassemblyConfig, DEFAULT_MAX_FRAGMENTS, DEFAULT_MAX_GROUP_AGE_TICKS,
    DEFAULT_MAX_PENDING_GROUPS, MAX_CHANNELS,
};
use dgmux_transport::Reliability;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MuxError, Result};

/// What happens to inbound traffic while the ignore-all-messages flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePolicy {
    /// Drain and discard datagrams and notifications.
    #[default]
    Drop,
    /// Leave control datagrams and notifications queued in the transport,
    /// reassemble application data but hold completed messages until the
    /// flag clears.
    Buffer,
}

/// Configuration shared by [`Server`](crate::Server) and [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Reliability of each application channel. The internal control
    /// channel is appended after these.
    pub channels: Vec<Reliability>,
    /// Connection table capacity (server role).
    pub max_connections: usize,
    /// Fragment budget per message, enforced when sending and receiving.
    pub max_fragments: usize,
    /// Client gives up on an unanswered CONNECT after this many milliseconds.
    pub connect_timeout_ms: u64,
    /// Ignore inbound traffic for this many milliseconds after start.
    pub startup_grace_ms: u64,
    /// Behaviour while inbound traffic is ignored.
    pub grace_policy: GracePolicy,
    /// Incomplete messages kept per `(peer, channel)`.
    pub max_pending_groups: usize,
    /// Ticks an incomplete message may wait. `None` disables age eviction.
    pub max_group_age_ticks: Option<u64>,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            channels: vec![
                Reliability::ReliableOrdered,
                Reliability::UnreliableUnordered,
            ],
            max_connections: 16,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            connect_timeout_ms: 25_000,
            startup_grace_ms: 0,
            grace_policy: GracePolicy::Drop,
            max_pending_groups: DEFAULT_MAX_PENDING_GROUPS,
            max_group_age_ticks: Some(DEFAULT_MAX_GROUP_AGE_TICKS),
        }
    }
}

impl MuxConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|err| {
            MuxError::InvalidConfig(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    /// Check hard limits and warn about unusual channel layouts.
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(MuxError::InvalidConfig(
                "at least one channel must be configured".to_string(),
            ));
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(MuxError::InvalidConfig(format!(
                "too many channels: {} (max {MAX_CHANNELS})",
                self.channels.len()
            )));
        }
        if self.max_connections == 0 {
            return Err(MuxError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.max_fragments == 0 {
            return Err(MuxError::InvalidConfig(
                "max_fragments must be at least 1".to_string(),
            ));
        }
        if self.max_fragments > u32::MAX as usize {
            return Err(MuxError::InvalidConfig(format!(
                "max_fragments {} exceeds the fragment index range",
                self.max_fragments
            )));
        }

        if self.channels[0] != Reliability::ReliableOrdered {
            warn!(
                channel = 0,
                reliability = %self.channels[0],
                "channel 0 is not reliable-ordered; most callers expect it to be"
            );
        }
        if let Some(&second) = self.channels.get(1) {
            if second != Reliability::UnreliableUnordered {
                warn!(
                    channel = 1,
                    reliability = %second,
                    "channel 1 is not unreliable-unordered; most callers expect it to be"
                );
            }
        }
        Ok(())
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Startup grace window as a duration.
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    /// Retention settings for the reassembly buffer.
    pub fn reassembly(&self) -> ReassemblyConfig {
        ReassemblyConfig {
            max_fragments: self.max_fragments,
            max_pending_groups: self.max_pending_groups,
            max_group_age_ticks: self.max_group_age_ticks,
        }
    }
}
