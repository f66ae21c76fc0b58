//! Engine configuration.
//!
//! A single `EngineConfig` value is passed into the engine constructor;
//! the process may hold zero or many engines, each with its own config.

use std::time::Duration;

use crate::error::{DriftError, DriftResult};

/// Tunable knobs for a [`crate::sync::GossipNode`] and its surroundings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Period between outgoing gossip rounds
    pub gossip_interval: Duration,
    /// Peers contacted per gossip tick
    pub fanout: usize,
    /// Per-request deadline within a round
    pub gossip_timeout: Duration,
    /// Cap on events carried by a single Events frame
    pub max_events_per_message: usize,
    /// Enable the stale-peer anti-entropy sweep
    pub enable_anti_entropy: bool,
    /// Anti-entropy sweep period
    pub anti_entropy_interval: Duration,
    /// How often the transport's peer set is re-pulled
    pub peer_discovery_interval: Duration,
    /// Connection admission cap
    pub max_concurrent_peers: usize,
    /// Per-peer outbound retry cap
    pub max_connection_attempts: u32,
    /// Projection snapshot cadence (events between auto-saves)
    pub auto_save_event_count: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_secs(2),
            fanout: 3,
            gossip_timeout: Duration::from_secs(8),
            max_events_per_message: 50,
            enable_anti_entropy: true,
            anti_entropy_interval: Duration::from_secs(120),
            peer_discovery_interval: Duration::from_secs(1),
            max_concurrent_peers: 8,
            max_connection_attempts: 3,
            auto_save_event_count: 100,
        }
    }
}

impl EngineConfig {
    /// Validate the configuration. Bad options are fatal at startup.
    pub fn validate(&self) -> DriftResult<()> {
        if self.gossip_interval.is_zero() {
            return Err(DriftError::ConfigInvalid(
                "gossip_interval must be > 0".to_string(),
            ));
        }
        if self.fanout == 0 {
            return Err(DriftError::ConfigInvalid("fanout must be > 0".to_string()));
        }
        if self.gossip_timeout.is_zero() {
            return Err(DriftError::ConfigInvalid(
                "gossip_timeout must be > 0".to_string(),
            ));
        }
        if self.max_events_per_message == 0 {
            return Err(DriftError::ConfigInvalid(
                "max_events_per_message must be > 0".to_string(),
            ));
        }
        if self.enable_anti_entropy && self.anti_entropy_interval.is_zero() {
            return Err(DriftError::ConfigInvalid(
                "anti_entropy_interval must be > 0".to_string(),
            ));
        }
        if self.peer_discovery_interval.is_zero() {
            return Err(DriftError::ConfigInvalid(
                "peer_discovery_interval must be > 0".to_string(),
            ));
        }
        if self.max_concurrent_peers == 0 {
            return Err(DriftError::ConfigInvalid(
                "max_concurrent_peers must be > 0".to_string(),
            ));
        }
        if self.max_connection_attempts == 0 {
            return Err(DriftError::ConfigInvalid(
                "max_connection_attempts must be > 0".to_string(),
            ));
        }
        if self.auto_save_event_count == 0 {
            return Err(DriftError::ConfigInvalid(
                "auto_save_event_count must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Jitter a timer period by ±20%, so fleets of nodes don't tick in
    /// lockstep.
    pub fn jittered(period: Duration) -> Duration {
        use rand::Rng;
        let millis = period.as_millis() as f64;
        let factor = rand::rng().random_range(0.8..1.2);
        Duration::from_millis((millis * factor) as u64)
    }
}
