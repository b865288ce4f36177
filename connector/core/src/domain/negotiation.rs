// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Contract Negotiation Entity
//!
//! Persisted record of one contract negotiation with a counterparty. The
//! state progresses only through the typed `transition_*` methods, which
//! validate the source state and keep the retry bookkeeping in
//! [`EntityBase`] consistent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::entity::{EntityBase, ParticipantRole, StatefulEntity, TransitionError};
use crate::domain::policy::Policy;

/// Negotiation states with their wire-stable integer codes. Codes are
/// spaced so intermediate states can be added without renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NegotiationState {
    Initial,
    Requesting,
    Requested,
    Accepting,
    Accepted,
    Agreed,
    Verifying,
    Verified,
    Terminating,
    Terminated,
}

impl NegotiationState {
    pub fn code(self) -> i32 {
        match self {
            NegotiationState::Initial => 50,
            NegotiationState::Requesting => 100,
            NegotiationState::Requested => 200,
            NegotiationState::Accepting => 700,
            NegotiationState::Accepted => 800,
            NegotiationState::Agreed => 1000,
            NegotiationState::Verifying => 1050,
            NegotiationState::Verified => 1100,
            NegotiationState::Terminating => 1300,
            NegotiationState::Terminated => 1400,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let state = match code {
            50 => NegotiationState::Initial,
            100 => NegotiationState::Requesting,
            200 => NegotiationState::Requested,
            700 => NegotiationState::Accepting,
            800 => NegotiationState::Accepted,
            1000 => NegotiationState::Agreed,
            1050 => NegotiationState::Verifying,
            1100 => NegotiationState::Verified,
            1300 => NegotiationState::Terminating,
            1400 => NegotiationState::Terminated,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NegotiationState::Verified | NegotiationState::Terminated)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// One offer exchanged during the negotiation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractOffer {
    pub id: String,
    pub asset_id: String,
    pub policy: Policy,
}

impl ContractOffer {
    pub fn new(asset_id: impl Into<String>, policy: Policy) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            asset_id: asset_id.into(),
            policy,
        }
    }
}

/// The agreement both parties settled on. Set exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreement {
    pub id: String,
    pub asset_id: String,
    pub policy: Policy,
    pub provider_id: String,
    pub consumer_id: String,
    pub signed_at: DateTime<Utc>,
}

/// A contract negotiation between this connector and one counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractNegotiation {
    base: EntityBase,
    state: NegotiationState,
    pub role: ParticipantRole,
    pub participant_context_id: String,
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    /// The counterparty's process id, learned from its first acknowledgment.
    pub correlation_id: Option<String>,
    contract_offers: Vec<ContractOffer>,
    contract_agreement: Option<ContractAgreement>,
    #[serde(default)]
    pub callback_addresses: Vec<String>,
}

impl ContractNegotiation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: ParticipantRole,
        participant_context_id: impl Into<String>,
        counter_party_id: impl Into<String>,
        counter_party_address: impl Into<String>,
        protocol: impl Into<String>,
        offer: ContractOffer,
        callback_addresses: Vec<String>,
    ) -> Self {
        Self {
            base: EntityBase::new(Uuid::new_v4().to_string()),
            state: NegotiationState::Initial,
            role,
            participant_context_id: participant_context_id.into(),
            counter_party_id: counter_party_id.into(),
            counter_party_address: counter_party_address.into(),
            protocol: protocol.into(),
            correlation_id: None,
            contract_offers: vec![offer],
            contract_agreement: None,
            callback_addresses,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Offers in the order they were exchanged; never shrinks.
    pub fn contract_offers(&self) -> &[ContractOffer] {
        &self.contract_offers
    }

    pub fn last_offer(&self) -> Option<&ContractOffer> {
        self.contract_offers.last()
    }

    pub fn add_offer(&mut self, offer: ContractOffer) {
        self.contract_offers.push(offer);
        self.base.updated_at = Utc::now();
    }

    pub fn agreement(&self) -> Option<&ContractAgreement> {
        self.contract_agreement.as_ref()
    }

    /// Store the agreement. Rejected once set; the agreement is immutable.
    pub fn set_agreement(&mut self, agreement: ContractAgreement) -> Result<(), TransitionError> {
        if self.contract_agreement.is_some() {
            return Err(TransitionError::new(
                self.base.id.clone(),
                "agreement",
                "agreement",
            ));
        }
        self.contract_agreement = Some(agreement);
        self.base.updated_at = Utc::now();
        Ok(())
    }

    /// Record a failed attempt that stays in the current state, engaging the
    /// retry backoff.
    pub fn retried(&mut self) {
        self.base.record_retry();
    }

    pub fn transition_requesting(&mut self) -> Result<(), TransitionError> {
        self.transition(
            NegotiationState::Requesting,
            &[NegotiationState::Initial, NegotiationState::Requesting],
        )
    }

    pub fn transition_requested(&mut self) -> Result<(), TransitionError> {
        self.transition(NegotiationState::Requested, &[NegotiationState::Requesting])
    }

    pub fn transition_accepting(&mut self) -> Result<(), TransitionError> {
        self.transition(
            NegotiationState::Accepting,
            &[NegotiationState::Requested, NegotiationState::Accepting],
        )
    }

    pub fn transition_accepted(&mut self) -> Result<(), TransitionError> {
        self.transition(NegotiationState::Accepted, &[NegotiationState::Accepting])
    }

    pub fn transition_agreed(&mut self) -> Result<(), TransitionError> {
        self.transition(
            NegotiationState::Agreed,
            &[
                NegotiationState::Requested,
                NegotiationState::Accepted,
                NegotiationState::Agreed,
            ],
        )
    }

    pub fn transition_verifying(&mut self) -> Result<(), TransitionError> {
        self.transition(
            NegotiationState::Verifying,
            &[NegotiationState::Agreed, NegotiationState::Verifying],
        )
    }

    pub fn transition_verified(&mut self) -> Result<(), TransitionError> {
        self.transition(NegotiationState::Verified, &[NegotiationState::Verifying])
    }

    /// Reachable from any non-terminal state.
    pub fn transition_terminating(&mut self) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::new(
                self.base.id.clone(),
                self.state,
                NegotiationState::Terminating,
            ));
        }
        self.set_state(NegotiationState::Terminating);
        Ok(())
    }

    /// Reachable from any non-terminal state; fatal failures terminate a
    /// negotiation without passing through `Terminating`.
    pub fn transition_terminated(&mut self) -> Result<(), TransitionError> {
        if self.state.is_terminal() {
            return Err(TransitionError::new(
                self.base.id.clone(),
                self.state,
                NegotiationState::Terminated,
            ));
        }
        self.set_state(NegotiationState::Terminated);
        Ok(())
    }

    fn transition(
        &mut self,
        to: NegotiationState,
        allowed_from: &[NegotiationState],
    ) -> Result<(), TransitionError> {
        if !allowed_from.contains(&self.state) {
            return Err(TransitionError::new(self.base.id.clone(), self.state, to));
        }
        self.set_state(to);
        Ok(())
    }

    fn set_state(&mut self, next: NegotiationState) {
        let same = self.state == next;
        self.state = next;
        self.base.record_transition(same);
    }
}

impl StatefulEntity for ContractNegotiation {
    fn id(&self) -> &str {
        &self.base.id
    }

    fn state_code(&self) -> i32 {
        self.state.code()
    }

    fn state_count(&self) -> u32 {
        self.base.state_count
    }

    fn state_timestamp(&self) -> DateTime<Utc> {
        self.base.state_timestamp
    }

    fn is_pending(&self) -> bool {
        self.base.pending
    }

    fn set_pending(&mut self, pending: bool) {
        self.base.pending = pending;
        self.base.updated_at = Utc::now();
    }

    fn error_detail(&self) -> Option<&str> {
        self.base.error_detail.as_deref()
    }

    fn set_error_detail(&mut self, detail: Option<String>) {
        self.base.error_detail = detail;
        self.base.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn consumer_negotiation() -> ContractNegotiation {
        ContractNegotiation::new(
            ParticipantRole::Consumer,
            "ctx-1",
            "provider-1",
            "https://provider.example/protocol",
            "dataspace-protocol-http",
            ContractOffer::new("asset-1", Policy::for_target("asset-1")),
            vec![],
        )
    }

    #[test]
    fn happy_path_transitions() {
        let mut negotiation = consumer_negotiation();
        assert_eq!(negotiation.state(), NegotiationState::Initial);

        negotiation.transition_requesting().unwrap();
        negotiation.transition_requested().unwrap();
        negotiation.transition_agreed().unwrap();
        negotiation.transition_verifying().unwrap();
        negotiation.transition_verified().unwrap();
        assert!(negotiation.state().is_terminal());
    }

    #[test]
    fn requested_cannot_jump_to_verified() {
        let mut negotiation = consumer_negotiation();
        negotiation.transition_requesting().unwrap();
        negotiation.transition_requested().unwrap();
        assert!(negotiation.transition_verified().is_err());
        assert_eq!(negotiation.state(), NegotiationState::Requested);
    }

    #[test]
    fn terminated_is_final() {
        let mut negotiation = consumer_negotiation();
        negotiation.transition_terminated().unwrap();
        assert!(negotiation.transition_requesting().is_err());
        assert!(negotiation.transition_terminating().is_err());
    }

    #[test]
    fn retry_counter_resets_on_state_change() {
        let mut negotiation = consumer_negotiation();
        negotiation.transition_requesting().unwrap();
        negotiation.retried();
        negotiation.retried();
        assert_eq!(negotiation.state_count(), 2);

        // Re-entering the same state keeps the counter.
        negotiation.transition_requesting().unwrap();
        assert_eq!(negotiation.state_count(), 2);

        negotiation.transition_requested().unwrap();
        assert_eq!(negotiation.state_count(), 0);
    }

    #[test]
    fn agreement_is_set_once() {
        let mut negotiation = consumer_negotiation();
        let agreement = ContractAgreement {
            id: "agreement-1".to_string(),
            asset_id: "asset-1".to_string(),
            policy: Policy::default(),
            provider_id: "provider-1".to_string(),
            consumer_id: "consumer-1".to_string(),
            signed_at: Utc::now(),
        };
        negotiation.set_agreement(agreement.clone()).unwrap();
        assert!(negotiation.set_agreement(agreement).is_err());
    }

    #[test]
    fn state_codes_round_trip() {
        for state in [
            NegotiationState::Initial,
            NegotiationState::Requesting,
            NegotiationState::Requested,
            NegotiationState::Accepting,
            NegotiationState::Accepted,
            NegotiationState::Agreed,
            NegotiationState::Verifying,
            NegotiationState::Verified,
            NegotiationState::Terminating,
            NegotiationState::Terminated,
        ] {
            assert_eq!(NegotiationState::from_code(state.code()), Some(state));
        }
        assert_eq!(NegotiationState::from_code(9999), None);
    }
}
