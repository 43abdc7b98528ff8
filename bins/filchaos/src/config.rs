//! Engine configuration overlaid from environment variables.

use std::time::Duration;

use anyhow::{Context, Result};
use filchaos_core::ChaosConfig;

/// Variables read by [`from_env`].
pub const DIAL_TIMEOUT_VAR: &str = "FILCHAOS_DIAL_TIMEOUT_MS";
pub const IO_TIMEOUT_VAR: &str = "FILCHAOS_IO_TIMEOUT_MS";
pub const GOSSIP_TOPIC_VAR: &str = "FILCHAOS_GOSSIP_TOPIC";
pub const SEED_VAR: &str = "FILCHAOS_SEED";

/// Overlay environment variables on `base`.
pub fn from_env(base: ChaosConfig) -> Result<ChaosConfig> {
    overlay(base, |name| std::env::var(name).ok())
}

/// Overlay whatever `lookup` returns for each known variable on `base`.
pub fn overlay(mut config: ChaosConfig, lookup: impl Fn(&str) -> Option<String>) -> Result<ChaosConfig> {
    if let Some(ms) = lookup(DIAL_TIMEOUT_VAR) {
        let ms: u64 = ms
            .parse()
            .with_context(|| format!("{DIAL_TIMEOUT_VAR} must be a whole number of milliseconds"))?;
        config.dial_timeout = Duration::from_millis(ms);
    }

    if let Some(ms) = lookup(IO_TIMEOUT_VAR) {
        let ms: u64 = ms
            .parse()
            .with_context(|| format!("{IO_TIMEOUT_VAR} must be a whole number of milliseconds"))?;
        config.io_timeout = Duration::from_millis(ms);
    }

    if let Some(topic) = lookup(GOSSIP_TOPIC_VAR) {
        config.gossip_topic = topic;
    }

    if let Some(seed) = lookup(SEED_VAR) {
        let seed = seed
            .parse()
            .with_context(|| format!("{SEED_VAR} must be an unsigned 64-bit integer"))?;
        config.seed = Some(seed);
    }

    Ok(config)
}
