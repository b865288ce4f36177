// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Retry Policy
//!
//! Classifies dispatch failures and schedules re-attempts. The backoff is
//! enforced by the engine as a poll gate ([`EntityRetryProcessConfiguration::retry_due`]):
//! an entity inside its backoff window is released untouched instead of
//! being handled, so handlers never sleep and leases stay short.

use chrono::Utc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::dispatcher::StatusFailure;
use crate::domain::entity::StatefulEntity;

/// Supplies the backoff delay before the n-th re-attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitStrategy {
    Fixed(Duration),
    /// `base * 2^(retries - 1)`, capped.
    Exponential { base: Duration, cap: Duration },
}

impl WaitStrategy {
    pub fn delay_for(&self, retries: u32) -> Duration {
        match self {
            WaitStrategy::Fixed(delay) => *delay,
            WaitStrategy::Exponential { base, cap } => {
                if retries == 0 {
                    return Duration::ZERO;
                }
                // Exponent clamped; beyond 16 doublings the cap has long won.
                let factor = 1u32 << (retries - 1).min(16);
                base.saturating_mul(factor).min(*cap)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum RetryConfigError {
    #[error("backoff delay must be greater than zero")]
    ZeroDelay,
}

/// How a classified dispatch failure routes the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Re-enter the same state for another attempt after backoff.
    Retry,
    /// Retry limit surpassed; treat like a fatal failure.
    Exhausted,
    /// Fatal failure; go to the terminal-failure successor immediately.
    Fatal,
}

impl FailureDisposition {
    pub fn is_terminal(self) -> bool {
        !matches!(self, FailureDisposition::Retry)
    }
}

/// Retry configuration shared by all processors of one manager.
#[derive(Debug, Clone)]
pub struct EntityRetryProcessConfiguration {
    retry_limit: u32,
    wait_strategy: WaitStrategy,
}

impl EntityRetryProcessConfiguration {
    pub fn new(retry_limit: u32, wait_strategy: WaitStrategy) -> Result<Self, RetryConfigError> {
        let zero = match &wait_strategy {
            WaitStrategy::Fixed(delay) => delay.is_zero(),
            WaitStrategy::Exponential { base, .. } => base.is_zero(),
        };
        if zero {
            return Err(RetryConfigError::ZeroDelay);
        }
        Ok(Self {
            retry_limit,
            wait_strategy,
        })
    }

    pub fn retry_limit(&self) -> u32 {
        self.retry_limit
    }

    /// False while the entity sits inside the backoff window after a failed
    /// attempt. Entities that have never failed in their current state are
    /// always due.
    pub fn retry_due<E: StatefulEntity>(&self, entity: &E) -> bool {
        if entity.state_count() == 0 {
            return true;
        }
        let delay = self.wait_strategy.delay_for(entity.state_count());
        match chrono::Duration::from_std(delay) {
            Ok(delay) => Utc::now() >= entity.state_timestamp() + delay,
            Err(_) => true,
        }
    }

    /// Classify a dispatch failure for an entity about to record it.
    /// `state_count` still holds the number of *prior* failures here: with a
    /// retry limit of N, the (N+1)-th consecutive retryable failure is
    /// exhausted.
    pub fn disposition<E: StatefulEntity>(
        &self,
        entity: &E,
        failure: &StatusFailure,
    ) -> FailureDisposition {
        if failure.is_fatal() {
            return FailureDisposition::Fatal;
        }
        if entity.state_count() >= self.retry_limit {
            FailureDisposition::Exhausted
        } else {
            FailureDisposition::Retry
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::ParticipantRole;
    use crate::domain::negotiation::{ContractNegotiation, ContractOffer};
    use crate::domain::policy::Policy;

    fn negotiation() -> ContractNegotiation {
        ContractNegotiation::new(
            ParticipantRole::Consumer,
            "ctx",
            "counterparty",
            "https://example.com",
            "dataspace-protocol-http",
            ContractOffer::new("asset", Policy::default()),
            vec![],
        )
    }

    fn config(limit: u32) -> EntityRetryProcessConfiguration {
        EntityRetryProcessConfiguration::new(
            limit,
            WaitStrategy::Exponential {
                base: Duration::from_millis(10),
                cap: Duration::from_secs(1),
            },
        )
        .unwrap()
    }

    #[test]
    fn exponential_delay_doubles_and_caps() {
        let strategy = WaitStrategy::Exponential {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
        };
        assert_eq!(strategy.delay_for(1), Duration::from_millis(100));
        assert_eq!(strategy.delay_for(2), Duration::from_millis(200));
        assert_eq!(strategy.delay_for(3), Duration::from_millis(400));
        assert_eq!(strategy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn zero_base_delay_is_rejected() {
        assert!(EntityRetryProcessConfiguration::new(
            3,
            WaitStrategy::Fixed(Duration::ZERO)
        )
        .is_err());
    }

    #[test]
    fn fatal_failures_bypass_the_retry_budget() {
        let entity = negotiation();
        let disposition = config(5).disposition(&entity, &StatusFailure::fatal("rejected"));
        assert_eq!(disposition, FailureDisposition::Fatal);
        assert!(disposition.is_terminal());
    }

    #[test]
    fn retryable_failures_exhaust_after_the_limit() {
        let mut entity = negotiation();
        let config = config(2);
        let failure = StatusFailure::retryable("timeout");

        // Attempts 1 and 2 fail: still within budget.
        assert_eq!(config.disposition(&entity, &failure), FailureDisposition::Retry);
        entity.retried();
        assert_eq!(config.disposition(&entity, &failure), FailureDisposition::Retry);
        entity.retried();

        // Attempt 3 (limit = 2) is one too many.
        assert_eq!(
            config.disposition(&entity, &failure),
            FailureDisposition::Exhausted
        );
    }

    #[test]
    fn entity_inside_backoff_window_is_not_due() {
        let mut entity = negotiation();
        let config = EntityRetryProcessConfiguration::new(
            3,
            WaitStrategy::Fixed(Duration::from_secs(60)),
        )
        .unwrap();
        assert!(config.retry_due(&entity));

        entity.retried();
        assert!(!config.retry_due(&entity));
    }
}
