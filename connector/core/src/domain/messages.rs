// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Protocol Messages
//!
//! In-memory shapes of the dataspace protocol messages the managers
//! dispatch. Wire encoding (JSON-LD, HTTP bindings) is owned by the
//! protocol layer outside this core; these structs only carry what the
//! state machines need to hand to a [`RemoteMessageDispatcher`].
//!
//! [`RemoteMessageDispatcher`]: crate::domain::dispatcher::RemoteMessageDispatcher

use serde::{Deserialize, Serialize};

use crate::domain::negotiation::ContractOffer;
use crate::domain::policy::Policy;
use crate::domain::provision::DataAddress;

/// Whether a contract request opens a negotiation or counters an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferKind {
    Initial,
    CounterOffer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractRequestMessage {
    /// Our process id from the counterparty's point of view: the correlation
    /// id when known, otherwise the local entity id (older peers echo it
    /// back as their own process id).
    pub process_id: String,
    pub offer_kind: OfferKind,
    pub offer: ContractOffer,
    pub callback_address: String,
}

/// Kinds of negotiation events announced to the counterparty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationEventKind {
    Accepted,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNegotiationEventMessage {
    pub process_id: String,
    pub event: NegotiationEventKind,
    pub policy: Policy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractAgreementVerificationMessage {
    pub process_id: String,
    pub agreement_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractNegotiationTerminationMessage {
    pub process_id: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequestMessage {
    pub process_id: String,
    pub contract_id: String,
    pub asset_id: String,
    pub destination: DataAddress,
    pub callback_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCompletionMessage {
    pub process_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferTerminationMessage {
    pub process_id: String,
    pub reason: Option<String>,
}

/// Union of everything the managers can dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolMessage {
    ContractRequest(ContractRequestMessage),
    ContractNegotiationEvent(ContractNegotiationEventMessage),
    ContractAgreementVerification(ContractAgreementVerificationMessage),
    ContractNegotiationTermination(ContractNegotiationTerminationMessage),
    TransferRequest(TransferRequestMessage),
    TransferCompletion(TransferCompletionMessage),
    TransferTermination(TransferTerminationMessage),
}
