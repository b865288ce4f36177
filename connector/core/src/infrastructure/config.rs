// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Connector Configuration
//!
//! Configuration for the control-plane core, loaded once at startup and
//! passed by reference to the components that need it — there is no global
//! configuration singleton. Durations are written human-readable in YAML
//! (`1s`, `250ms`, `1m`).

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::application::retry::{EntityRetryProcessConfiguration, WaitStrategy};

/// Settings of the per-entity-kind state machine loops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateMachineConfig {
    /// Entities fetched per state per cycle.
    pub batch_size: usize,
    /// Sleep between cycles when no work was found.
    #[serde(with = "humantime_serde")]
    pub iteration_wait: Duration,
    /// TTL of the exclusive claim a worker holds while processing an
    /// entity; a crashed worker's claim is reclaimed after this.
    #[serde(with = "humantime_serde")]
    pub lease_ttl: Duration,
}

impl Default for StateMachineConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            iteration_wait: Duration::from_secs(1),
            lease_ttl: Duration::from_secs(60),
        }
    }
}

/// Settings of the dispatch retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Consecutive retryable failures tolerated per state before the
    /// entity routes to its terminal-failure successor.
    pub retry_limit: u32,
    /// First backoff delay; doubles per retry.
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
    /// Upper bound on the backoff delay.
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_limit: 7,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Top-level configuration of the control-plane core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorConfig {
    #[serde(default)]
    pub state_machine: StateMachineConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ConnectorConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).context("Failed to parse connector configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.state_machine.batch_size == 0 {
            bail!("state_machine.batch_size must be greater than zero");
        }
        if self.state_machine.lease_ttl.is_zero() {
            bail!("state_machine.lease_ttl must be greater than zero");
        }
        if self.retry.base_delay.is_zero() {
            bail!("retry.base_delay must be greater than zero");
        }
        Ok(())
    }

    /// Build the retry configuration the managers hand to their engines.
    pub fn retry_configuration(&self) -> Result<EntityRetryProcessConfiguration> {
        EntityRetryProcessConfiguration::new(
            self.retry.retry_limit,
            WaitStrategy::Exponential {
                base: self.retry.base_delay,
                cap: self.retry.max_delay,
            },
        )
        .context("Invalid retry configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ConnectorConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.retry_configuration().is_ok());
    }

    #[test]
    fn yaml_round_trip_with_human_durations() {
        let config = ConnectorConfig::from_yaml(
            r"
state_machine:
  batch_size: 10
  iteration_wait: 250ms
  lease_ttl: 2m
retry:
  retry_limit: 3
  base_delay: 500ms
  max_delay: 10s
",
        )
        .unwrap();
        assert_eq!(config.state_machine.batch_size, 10);
        assert_eq!(config.state_machine.iteration_wait, Duration::from_millis(250));
        assert_eq!(config.state_machine.lease_ttl, Duration::from_secs(120));
        assert_eq!(config.retry.retry_limit, 3);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let result = ConnectorConfig::from_yaml("state_machine:\n  batch_size: 0\n  iteration_wait: 1s\n  lease_ttl: 1m\n");
        assert!(result.is_err());
    }
}
