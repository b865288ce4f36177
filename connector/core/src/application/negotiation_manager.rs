// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Consumer Contract Negotiation Manager
//!
//! Drives consumer-side contract negotiations through
//! `Initial → Requesting → Requested → (Accepting → Accepted) → Agreed →
//! Verifying → Verified`, with `Terminating → Terminated` reachable from
//! any non-terminal state. Inbound protocol messages (the provider's
//! agreement, finalization) are applied by the protocol services outside
//! this core; this manager owns the outbound legs and the local
//! transitions.
//!
//! Every processor runs on the shared [`StateMachine`] engine: dispatch
//! outcomes become transitions, classified failures route through the
//! retry policy, and listener events fire only after the store write
//! committed.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::pending_guard::PendingGuard;
use crate::application::retry::{EntityRetryProcessConfiguration, FailureDisposition};
use crate::application::state_machine::{ProcessUpdate, Processor, StateHandler, StateMachine};
use crate::domain::dispatcher::{RemoteMessageDispatcher, StatusFailure};
use crate::domain::entity::{ParticipantContext, ParticipantRole, StatefulEntity};
use crate::domain::events::{NegotiationListener, NegotiationObservable};
use crate::domain::messages::{
    ContractAgreementVerificationMessage, ContractNegotiationEventMessage,
    ContractNegotiationTerminationMessage, ContractRequestMessage, NegotiationEventKind, OfferKind,
    ProtocolMessage,
};
use crate::domain::negotiation::{ContractNegotiation, ContractOffer, NegotiationState};
use crate::domain::repository::StateEntityStore;
use crate::infrastructure::config::ConnectorConfig;
use crate::infrastructure::profile_registry::DataspaceProfileContextRegistry;

/// Request to open a negotiation with a provider.
#[derive(Debug, Clone)]
pub struct ContractRequest {
    pub counter_party_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub offer: ContractOffer,
    pub callback_addresses: Vec<String>,
}

/// Terminal-failure successor of a state whose dispatch failed fatally.
#[derive(Debug, Clone, Copy)]
enum FailureSuccessor {
    /// Notify the counterparty first (`Terminating` processor dispatches).
    Terminating,
    /// Nothing left to say; terminate directly.
    Terminated,
}

struct NegotiationServices {
    store: Arc<dyn StateEntityStore<ContractNegotiation>>,
    dispatcher: Arc<dyn RemoteMessageDispatcher>,
    profiles: Arc<DataspaceProfileContextRegistry>,
    retry: EntityRetryProcessConfiguration,
    observable: Arc<NegotiationObservable>,
}

impl NegotiationServices {
    /// Our process id from the counterparty's point of view. Older peers
    /// echo the local id back as their own process id, so it doubles as the
    /// correlation fallback.
    fn process_id(&self, negotiation: &ContractNegotiation) -> String {
        negotiation
            .correlation_id
            .clone()
            .unwrap_or_else(|| negotiation.id().to_string())
    }

    fn terminated_update(&self, negotiation: ContractNegotiation) -> ProcessUpdate<ContractNegotiation> {
        let observable = Arc::clone(&self.observable);
        let snapshot = negotiation.clone();
        ProcessUpdate::with_post(negotiation, move || {
            observable.invoke(|l| l.terminated(&snapshot));
        })
    }

    /// Route a fatal local precondition failure straight to `Terminated`.
    fn fail_terminated(
        &self,
        mut negotiation: ContractNegotiation,
        message: String,
    ) -> Result<ProcessUpdate<ContractNegotiation>> {
        warn!(
            negotiation_id = %negotiation.id(),
            error = %message,
            "Negotiation failed fatally"
        );
        negotiation.set_error_detail(Some(message));
        negotiation.transition_terminated()?;
        Ok(self.terminated_update(negotiation))
    }

    /// Apply the retry policy to a failed dispatch.
    fn on_dispatch_failure(
        &self,
        mut negotiation: ContractNegotiation,
        failure: StatusFailure,
        successor: FailureSuccessor,
    ) -> Result<ProcessUpdate<ContractNegotiation>> {
        match self.retry.disposition(&negotiation, &failure) {
            FailureDisposition::Retry => {
                debug!(
                    negotiation_id = %negotiation.id(),
                    attempt = negotiation.state_count() + 1,
                    error = %failure,
                    "Dispatch failed; will retry"
                );
                negotiation.retried();
                Ok(ProcessUpdate::new(negotiation))
            }
            disposition => {
                warn!(
                    negotiation_id = %negotiation.id(),
                    disposition = ?disposition,
                    error = %failure,
                    "Dispatch failed terminally"
                );
                negotiation.set_error_detail(Some(failure.message));
                match successor {
                    FailureSuccessor::Terminating => {
                        negotiation.transition_terminating()?;
                        Ok(ProcessUpdate::new(negotiation))
                    }
                    FailureSuccessor::Terminated => {
                        negotiation.transition_terminated()?;
                        Ok(self.terminated_update(negotiation))
                    }
                }
            }
        }
    }
}

/// `Initial`: purely local hop into `Requesting`.
struct InitialProcessor;

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for InitialProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        negotiation.transition_requesting()?;
        Ok(ProcessUpdate::new(negotiation))
    }
}

/// `Requesting`: send the contract request and correlate the ack.
struct RequestingProcessor {
    services: Arc<NegotiationServices>,
}

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for RequestingProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        let services = &self.services;

        let Some(callback) = services.profiles.get_webhook(&negotiation.protocol) else {
            let message = format!(
                "no callback endpoint found for protocol {}",
                negotiation.protocol
            );
            return services.fail_terminated(negotiation, message);
        };

        let offer = negotiation
            .last_offer()
            .cloned()
            .context("negotiation has no contract offer")?;
        let offer_kind = if negotiation.correlation_id.is_none() && negotiation.contract_offers().len() == 1
        {
            OfferKind::Initial
        } else {
            OfferKind::CounterOffer
        };
        let message = ProtocolMessage::ContractRequest(ContractRequestMessage {
            process_id: services.process_id(&negotiation),
            offer_kind,
            offer,
            callback_address: callback,
        });

        match services
            .dispatcher
            .dispatch(
                &negotiation.participant_context_id,
                &negotiation.counter_party_address,
                message,
            )
            .await
        {
            Ok(ack) => {
                if let Some(provider_pid) = ack.provider_pid {
                    negotiation.correlation_id = Some(provider_pid);
                }
                negotiation.transition_requested()?;
                let observable = Arc::clone(&services.observable);
                let snapshot = negotiation.clone();
                Ok(ProcessUpdate::with_post(negotiation, move || {
                    observable.invoke(|l| l.requested(&snapshot));
                }))
            }
            Err(failure) => {
                services.on_dispatch_failure(negotiation, failure, FailureSuccessor::Terminated)
            }
        }
    }
}

/// `Accepting`: announce acceptance of the provider's current offer.
struct AcceptingProcessor {
    services: Arc<NegotiationServices>,
}

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for AcceptingProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        let services = &self.services;
        let offer = negotiation
            .last_offer()
            .cloned()
            .context("negotiation has no contract offer to accept")?;
        let message = ProtocolMessage::ContractNegotiationEvent(ContractNegotiationEventMessage {
            process_id: services.process_id(&negotiation),
            event: NegotiationEventKind::Accepted,
            policy: offer.policy,
        });

        match services
            .dispatcher
            .dispatch(
                &negotiation.participant_context_id,
                &negotiation.counter_party_address,
                message,
            )
            .await
        {
            Ok(_) => {
                negotiation.transition_accepted()?;
                let observable = Arc::clone(&services.observable);
                let snapshot = negotiation.clone();
                Ok(ProcessUpdate::with_post(negotiation, move || {
                    observable.invoke(|l| l.accepted(&snapshot));
                }))
            }
            Err(failure) => {
                services.on_dispatch_failure(negotiation, failure, FailureSuccessor::Terminating)
            }
        }
    }
}

/// `Agreed`: purely local hop into `Verifying`; the pending guard, when
/// configured, parks entities headed into verification.
struct AgreedProcessor;

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for AgreedProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        negotiation.transition_verifying()?;
        Ok(ProcessUpdate::new(negotiation))
    }
}

/// `Verifying`: send the agreement verification.
struct VerifyingProcessor {
    services: Arc<NegotiationServices>,
}

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for VerifyingProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        let services = &self.services;
        let agreement = negotiation
            .agreement()
            .cloned()
            .context("negotiation has no contract agreement to verify")?;
        let message =
            ProtocolMessage::ContractAgreementVerification(ContractAgreementVerificationMessage {
                process_id: services.process_id(&negotiation),
                agreement_id: agreement.id,
            });

        match services
            .dispatcher
            .dispatch(
                &negotiation.participant_context_id,
                &negotiation.counter_party_address,
                message,
            )
            .await
        {
            Ok(_) => {
                negotiation.transition_verified()?;
                let observable = Arc::clone(&services.observable);
                let snapshot = negotiation.clone();
                Ok(ProcessUpdate::with_post(negotiation, move || {
                    observable.invoke(|l| l.verified(&snapshot));
                }))
            }
            Err(failure) => {
                services.on_dispatch_failure(negotiation, failure, FailureSuccessor::Terminating)
            }
        }
    }
}

/// `Terminating`: best-effort rejection notice, then `Terminated`
/// regardless of the dispatch outcome.
struct TerminatingProcessor {
    services: Arc<NegotiationServices>,
}

#[async_trait::async_trait]
impl StateHandler<ContractNegotiation> for TerminatingProcessor {
    async fn handle(&self, mut negotiation: ContractNegotiation) -> Result<ProcessUpdate<ContractNegotiation>> {
        let services = &self.services;
        let message = ProtocolMessage::ContractNegotiationTermination(
            ContractNegotiationTerminationMessage {
                process_id: services.process_id(&negotiation),
                reason: negotiation.error_detail().map(str::to_string),
            },
        );

        if let Err(failure) = services
            .dispatcher
            .dispatch(
                &negotiation.participant_context_id,
                &negotiation.counter_party_address,
                message,
            )
            .await
        {
            debug!(
                negotiation_id = %negotiation.id(),
                error = %failure,
                "Termination notice failed; terminating anyway"
            );
        }

        negotiation.transition_terminated()?;
        Ok(services.terminated_update(negotiation))
    }
}

/// Consumer-side negotiation manager: the `initiate` entry point plus the
/// background state machine.
pub struct ConsumerNegotiationManager {
    services: Arc<NegotiationServices>,
    state_machine: StateMachine<ContractNegotiation>,
}

impl ConsumerNegotiationManager {
    pub fn new(
        store: Arc<dyn StateEntityStore<ContractNegotiation>>,
        dispatcher: Arc<dyn RemoteMessageDispatcher>,
        profiles: Arc<DataspaceProfileContextRegistry>,
        config: &ConnectorConfig,
        pending_guard: Option<Arc<dyn PendingGuard<ContractNegotiation>>>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_configuration()?;
        let services = Arc::new(NegotiationServices {
            store: Arc::clone(&store),
            dispatcher,
            profiles,
            retry: retry.clone(),
            observable: Arc::new(NegotiationObservable::new()),
        });

        let mut verifying = Processor::new(
            NegotiationState::Verifying.code(),
            "verifying",
            Arc::new(VerifyingProcessor {
                services: Arc::clone(&services),
            }),
        );
        if let Some(guard) = pending_guard {
            verifying = verifying.with_guard(guard);
        }

        let processors = vec![
            Processor::new(
                NegotiationState::Initial.code(),
                "initial",
                Arc::new(InitialProcessor),
            ),
            Processor::new(
                NegotiationState::Requesting.code(),
                "requesting",
                Arc::new(RequestingProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                NegotiationState::Accepting.code(),
                "accepting",
                Arc::new(AcceptingProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                NegotiationState::Agreed.code(),
                "agreed",
                Arc::new(AgreedProcessor),
            ),
            verifying,
            Processor::new(
                NegotiationState::Terminating.code(),
                "terminating",
                Arc::new(TerminatingProcessor {
                    services: Arc::clone(&services),
                }),
            ),
        ];

        let state_machine = StateMachine::new(
            "consumer-contract-negotiation",
            store,
            processors,
            config.state_machine.batch_size,
            config.state_machine.iteration_wait,
            retry,
        );

        Ok(Self {
            services,
            state_machine,
        })
    }

    pub fn register_listener(&self, listener: Arc<dyn NegotiationListener>) {
        self.services.observable.register(listener);
    }

    /// Open a negotiation from the request's first contract offer. Purely
    /// local: persists the new entity in `Initial` and returns its id; the
    /// state machine takes it from there.
    pub async fn initiate(
        &self,
        context: &ParticipantContext,
        request: ContractRequest,
    ) -> Result<String> {
        let negotiation = ContractNegotiation::new(
            ParticipantRole::Consumer,
            context.participant_context_id.clone(),
            request.counter_party_id,
            request.counter_party_address,
            request.protocol,
            request.offer,
            request.callback_addresses,
        );
        let id = negotiation.id().to_string();
        self.services
            .store
            .create(negotiation.clone())
            .await
            .context("Failed to persist new contract negotiation")?;

        info!(
            negotiation_id = %id,
            counter_party_id = %negotiation.counter_party_id,
            "Contract negotiation initiated"
        );
        self.services.observable.invoke(|l| l.initiated(&negotiation));
        Ok(id)
    }

    pub fn start(&mut self) {
        self.state_machine.start();
    }

    pub async fn stop(&mut self) {
        self.state_machine.stop().await;
    }
}
