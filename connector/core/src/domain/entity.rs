// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Stateful Workflow Entities
//!
//! Base fields and behavior shared by the two long-lived workflow records
//! (contract negotiations and transfer processes). Both entity kinds embed
//! [`EntityBase`] and expose it through [`StatefulEntity`], which is all the
//! state machine engine needs: identity, state code, retry bookkeeping and
//! the pending flag.
//!
//! State only ever changes through the typed transition methods on the
//! concrete entities, which delegate to [`EntityBase::record_transition`] so
//! the retry counter resets exactly when the state actually changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Role the local connector plays in a workflow entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantRole {
    Consumer,
    Provider,
}

/// Identity of the participant context a workflow operation runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantContext {
    pub participant_context_id: String,
}

impl ParticipantContext {
    pub fn new(participant_context_id: impl Into<String>) -> Self {
        Self {
            participant_context_id: participant_context_id.into(),
        }
    }
}

/// Fields shared by every long-lived workflow entity.
///
/// `state_count` counts consecutive failed attempts in the *current* state;
/// it strictly increases only while retrying the same state and resets to
/// zero on any transition to a different state. `state_timestamp` marks the
/// last transition (or retry) and drives backoff scheduling and the
/// oldest-first poll order of the stores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityBase {
    pub id: String,
    pub state_count: u32,
    pub state_timestamp: DateTime<Utc>,
    pub error_detail: Option<String>,
    pub pending: bool,
    #[serde(default)]
    pub trace_context: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EntityBase {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state_count: 0,
            state_timestamp: now,
            error_detail: None,
            pending: false,
            trace_context: HashMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a committed transition. The retry counter survives only when
    /// the entity re-enters the state it was already in.
    pub(crate) fn record_transition(&mut self, same_state: bool) {
        if !same_state {
            self.state_count = 0;
        }
        self.state_timestamp = Utc::now();
        self.updated_at = self.state_timestamp;
    }

    /// Record a failed attempt that stays in the current state.
    pub(crate) fn record_retry(&mut self) {
        self.state_count += 1;
        self.state_timestamp = Utc::now();
        self.updated_at = self.state_timestamp;
    }
}

/// Error returned by the typed transition methods when the entity is not in
/// a legal source state for the requested transition.
#[derive(Debug, Error)]
#[error("illegal transition for {entity_id}: {from} -> {to}")]
pub struct TransitionError {
    pub entity_id: String,
    pub from: String,
    pub to: String,
}

impl TransitionError {
    pub fn new(entity_id: impl Into<String>, from: impl ToString, to: impl ToString) -> Self {
        Self {
            entity_id: entity_id.into(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

/// Contract between the state machine engine and the workflow entities it
/// drives. The engine never interprets states beyond their integer code;
/// the concrete managers own the typed enums.
pub trait StatefulEntity: Clone + Send + Sync + 'static {
    fn id(&self) -> &str;

    /// Integer code of the current state, used for store queries.
    fn state_code(&self) -> i32;

    fn state_count(&self) -> u32;

    fn state_timestamp(&self) -> DateTime<Utc>;

    fn is_pending(&self) -> bool;

    fn set_pending(&mut self, pending: bool);

    fn error_detail(&self) -> Option<&str>;

    fn set_error_detail(&mut self, detail: Option<String>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_to_other_state_resets_retry_counter() {
        let mut base = EntityBase::new("entity-1");
        base.record_retry();
        base.record_retry();
        assert_eq!(base.state_count, 2);

        base.record_transition(true);
        assert_eq!(base.state_count, 2, "re-entering the same state keeps the counter");

        base.record_transition(false);
        assert_eq!(base.state_count, 0);
    }

    #[test]
    fn retry_refreshes_state_timestamp() {
        let mut base = EntityBase::new("entity-2");
        let before = base.state_timestamp;
        base.record_retry();
        assert!(base.state_timestamp >= before);
        assert_eq!(base.state_count, 1);
    }
}
