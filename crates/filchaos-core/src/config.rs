//! Engine configuration: deadlines, identity settings and attack plans.

use crate::catalog::Attack;
use crate::constants::{DEFAULT_GOSSIP_TOPIC, MAX_PLAN_CONCURRENCY};
use crate::error::ConfigError;
use std::time::Duration;

/// Deadlines and settings shared by every attack execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChaosConfig {
    /// Multiaddr each ephemeral peer listens on.
    pub listen_addr: String,
    /// Bound on dialing the target.
    pub dial_timeout: Duration,
    /// Bound on shutting an ephemeral peer down.
    pub teardown_timeout: Duration,
    /// Default bound on any single stream open, read, write or close.
    pub io_timeout: Duration,
    /// Bound on the best-effort reply read after a ping write.
    pub reply_timeout: Duration,
    /// Bound on the single large OversizedPayload write.
    pub oversized_write_timeout: Duration,
    /// How long MultipleStreams keeps its streams open.
    pub stream_hold: Duration,
    /// Pause between the half write and the close in IncompleteWrite.
    pub incomplete_write_pause: Duration,
    /// Total time SlowWrite may spend trickling bytes.
    pub slow_write_budget: Duration,
    /// How long an ephemeral peer keeps an idle connection alive.
    pub idle_connection_timeout: Duration,
    /// How long stopping a session waits for in-flight executions.
    pub stop_grace: Duration,
    /// Topic advertised in forged control frames.
    pub gossip_topic: String,
    /// Fixed session seed; `None` draws one from the OS.
    pub seed: Option<u64>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            listen_addr: "/ip4/0.0.0.0/tcp/0".to_string(),
            dial_timeout: Duration::from_secs(10),
            teardown_timeout: Duration::from_secs(3),
            io_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_millis(500),
            oversized_write_timeout: Duration::from_secs(5),
            stream_hold: Duration::from_secs(2),
            incomplete_write_pause: Duration::from_secs(1),
            slow_write_budget: Duration::from_secs(30),
            idle_connection_timeout: Duration::from_secs(30),
            stop_grace: Duration::from_secs(15),
            gossip_topic: DEFAULT_GOSSIP_TOPIC.to_string(),
            seed: None,
        }
    }
}

impl ChaosConfig {
    /// Short deadlines for loopback and devnet targets.
    pub fn local() -> Self {
        Self {
            listen_addr: "/ip4/127.0.0.1/tcp/0".to_string(),
            dial_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(1),
            io_timeout: Duration::from_millis(500),
            reply_timeout: Duration::from_millis(200),
            oversized_write_timeout: Duration::from_secs(2),
            stream_hold: Duration::from_millis(200),
            incomplete_write_pause: Duration::from_millis(100),
            slow_write_budget: Duration::from_secs(2),
            idle_connection_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Reject zero deadlines; a zero deadline would fail every operation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let deadlines = [
            ("dial_timeout", self.dial_timeout),
            ("teardown_timeout", self.teardown_timeout),
            ("io_timeout", self.io_timeout),
            ("reply_timeout", self.reply_timeout),
            ("oversized_write_timeout", self.oversized_write_timeout),
            ("slow_write_budget", self.slow_write_budget),
            ("stop_grace", self.stop_grace),
        ];
        match deadlines.iter().find(|(_, d)| d.is_zero()) {
            Some((name, _)) => Err(ConfigError::ZeroTimeout(*name)),
            None => Ok(()),
        }
    }
}

/// One attack run at a fixed fan-out on a randomized interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackPlan {
    pub attack: Attack,
    pub concurrency: usize,
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl AttackPlan {
    pub fn new(attack: Attack, concurrency: usize, min_interval: Duration, max_interval: Duration) -> Self {
        Self {
            attack,
            concurrency,
            min_interval,
            max_interval,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        if !(1..=MAX_PLAN_CONCURRENCY).contains(&self.concurrency) {
            return Err(ConfigError::ConcurrencyOutOfRange {
                got: self.concurrency,
                max: MAX_PLAN_CONCURRENCY,
            });
        }
        Ok(())
    }

    /// Whether the interval is re-drawn after every tick.
    pub fn is_jittered(&self) -> bool {
        self.max_interval > self.min_interval
    }
}
