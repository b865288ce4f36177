// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end consumer negotiation scenarios: initiate through the public
//! API, run the real state machine against the in-memory lease store, and
//! observe transitions, dispatches and listener events.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{test_config, CountingNegotiationListener, RecordingDispatcher};
use trellis_connector_core::application::{ConsumerNegotiationManager, ContractRequest};
use trellis_connector_core::domain::dispatcher::StatusFailure;
use trellis_connector_core::domain::entity::{ParticipantContext, ParticipantRole, StatefulEntity};
use trellis_connector_core::domain::messages::{OfferKind, ProtocolMessage};
use trellis_connector_core::domain::negotiation::{
    ContractAgreement, ContractNegotiation, ContractOffer, NegotiationState,
};
use trellis_connector_core::domain::policy::Policy;
use trellis_connector_core::domain::repository::StateEntityStore;
use trellis_connector_core::infrastructure::{
    ConnectorConfig, DataspaceProfileContextRegistry, InMemoryNegotiationStore,
};

const PROTOCOL: &str = "dataspace-protocol-http";

struct Fixture {
    manager: ConsumerNegotiationManager,
    store: Arc<InMemoryNegotiationStore>,
    dispatcher: Arc<RecordingDispatcher>,
    listener: Arc<CountingNegotiationListener>,
}

fn fixture(config: &ConnectorConfig, dispatcher: RecordingDispatcher, webhook: bool) -> Fixture {
    let store = Arc::new(InMemoryNegotiationStore::new(
        "test-worker",
        config.state_machine.lease_ttl,
    ));
    let dispatcher = Arc::new(dispatcher);
    let profiles = Arc::new(DataspaceProfileContextRegistry::new());
    if webhook {
        profiles.register_webhook(PROTOCOL, "https://consumer.example/protocol");
    }
    let manager = ConsumerNegotiationManager::new(
        store.clone(),
        dispatcher.clone(),
        profiles,
        config,
        None,
    )
    .expect("manager construction");
    let listener = Arc::new(CountingNegotiationListener::default());
    manager.register_listener(listener.clone());
    Fixture {
        manager,
        store,
        dispatcher,
        listener,
    }
}

fn request() -> ContractRequest {
    ContractRequest {
        counter_party_id: "provider-1".to_string(),
        counter_party_address: "https://provider.example/protocol".to_string(),
        protocol: PROTOCOL.to_string(),
        offer: ContractOffer::new("asset-1", Policy::for_target("asset-1")),
        callback_addresses: vec![],
    }
}

#[tokio::test]
async fn initiate_then_one_cycle_reaches_requested_with_correlation() {
    let config = test_config(3);
    let mut f = fixture(&config, RecordingDispatcher::acking(Some("provider-process-1")), true);

    let context = ParticipantContext::new("ctx-1");
    let id = f.manager.initiate(&context, request()).await.unwrap();
    assert_eq!(*f.listener.initiated.lock(), 1);

    let created = f.store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(created.state(), NegotiationState::Initial);
    assert_eq!(created.role, ParticipantRole::Consumer);

    f.manager.start();
    let negotiation: ContractNegotiation =
        await_state!(f.store, &id, NegotiationState::Requested);
    f.manager.stop().await;

    assert_eq!(negotiation.correlation_id.as_deref(), Some("provider-process-1"));
    assert_eq!(*f.listener.requested.lock(), 1);
    assert_eq!(f.dispatcher.call_count(), 1);

    // First offer of a fresh negotiation goes out as an initial request,
    // carrying the local id as process id for the counterparty to echo.
    match &f.dispatcher.calls()[0] {
        ProtocolMessage::ContractRequest(message) => {
            assert_eq!(message.offer_kind, OfferKind::Initial);
            assert_eq!(message.process_id, id);
            assert_eq!(message.callback_address, "https://consumer.example/protocol");
        }
        other => panic!("unexpected message dispatched: {other:?}"),
    }
}

#[tokio::test]
async fn unresolved_webhook_terminates_without_dispatching() {
    let config = test_config(3);
    let mut f = fixture(&config, RecordingDispatcher::acking(None), false);

    let id = f
        .manager
        .initiate(&ParticipantContext::new("ctx-1"), request())
        .await
        .unwrap();

    f.manager.start();
    let negotiation = await_state!(f.store, &id, NegotiationState::Terminated);
    f.manager.stop().await;

    assert_eq!(f.dispatcher.call_count(), 0);
    assert_eq!(*f.listener.terminated.lock(), 1);
    assert!(negotiation
        .error_detail()
        .is_some_and(|detail| detail.contains("no callback endpoint")));
}

#[tokio::test]
async fn retryable_failures_exhaust_into_terminated_on_the_extra_attempt() {
    let config = test_config(2);
    let mut f = fixture(
        &config,
        RecordingDispatcher::failing(StatusFailure::retryable("connection reset")),
        true,
    );

    let id = f
        .manager
        .initiate(&ParticipantContext::new("ctx-1"), request())
        .await
        .unwrap();

    f.manager.start();
    let negotiation = await_state!(f.store, &id, NegotiationState::Terminated);
    f.manager.stop().await;

    // retry_limit = 2: attempts 1 and 2 re-enter Requesting, attempt 3 is
    // exhausted and terminates directly.
    assert_eq!(f.dispatcher.call_count(), 3);
    assert_eq!(*f.listener.terminated.lock(), 1);
    assert!(negotiation
        .error_detail()
        .is_some_and(|detail| detail.contains("connection reset")));
}

#[tokio::test]
async fn fatal_failure_bypasses_retry_entirely() {
    let config = test_config(5);
    let mut f = fixture(
        &config,
        RecordingDispatcher::failing(StatusFailure::fatal("protocol rejection")),
        true,
    );

    let id = f
        .manager
        .initiate(&ParticipantContext::new("ctx-1"), request())
        .await
        .unwrap();

    f.manager.start();
    await_state!(f.store, &id, NegotiationState::Terminated);
    f.manager.stop().await;

    assert_eq!(f.dispatcher.call_count(), 1);
    assert_eq!(*f.listener.terminated.lock(), 1);
}

#[tokio::test]
async fn retry_succeeds_once_the_counterparty_recovers() {
    let config = test_config(5);
    let dispatcher = RecordingDispatcher::acking(Some("provider-process-1"));
    dispatcher.push_response(Err(StatusFailure::retryable("timeout")));
    dispatcher.push_response(Err(StatusFailure::retryable("timeout")));
    let mut f = fixture(&config, dispatcher, true);

    let id = f
        .manager
        .initiate(&ParticipantContext::new("ctx-1"), request())
        .await
        .unwrap();

    f.manager.start();
    let negotiation = await_state!(f.store, &id, NegotiationState::Requested);
    f.manager.stop().await;

    assert_eq!(f.dispatcher.call_count(), 3);
    assert_eq!(negotiation.state_count(), 0, "success resets the retry counter");
    assert_eq!(*f.listener.requested.lock(), 1);
}

fn agreed_negotiation(context_id: &str) -> ContractNegotiation {
    let mut negotiation = ContractNegotiation::new(
        ParticipantRole::Consumer,
        context_id,
        "provider-1",
        "https://provider.example/protocol",
        PROTOCOL,
        ContractOffer::new("asset-1", Policy::for_target("asset-1")),
        vec![],
    );
    negotiation.transition_requesting().unwrap();
    negotiation.transition_requested().unwrap();
    negotiation
        .set_agreement(ContractAgreement {
            id: "agreement-1".to_string(),
            asset_id: "asset-1".to_string(),
            policy: Policy::for_target("asset-1"),
            provider_id: "provider-1".to_string(),
            consumer_id: "consumer-1".to_string(),
            signed_at: chrono::Utc::now(),
        })
        .unwrap();
    negotiation.transition_agreed().unwrap();
    negotiation
}

#[tokio::test]
async fn agreed_negotiation_verifies_the_stored_agreement() {
    let config = test_config(3);
    let mut f = fixture(&config, RecordingDispatcher::acking(None), true);

    let negotiation = agreed_negotiation("ctx-1");
    let id = negotiation.id().to_string();
    f.store.create(negotiation).await.unwrap();

    f.manager.start();
    await_state!(f.store, &id, NegotiationState::Verified);
    f.manager.stop().await;

    assert_eq!(*f.listener.verified.lock(), 1);
    assert_eq!(f.dispatcher.call_count(), 1);
    match &f.dispatcher.calls()[0] {
        ProtocolMessage::ContractAgreementVerification(message) => {
            assert_eq!(message.agreement_id, "agreement-1");
        }
        other => panic!("unexpected message dispatched: {other:?}"),
    }
}

#[tokio::test]
async fn pending_guard_parks_the_entity_before_verification() {
    let config = test_config(3);
    let store = Arc::new(InMemoryNegotiationStore::new(
        "test-worker",
        config.state_machine.lease_ttl,
    ));
    let dispatcher = Arc::new(RecordingDispatcher::acking(None));
    let profiles = Arc::new(DataspaceProfileContextRegistry::new());
    profiles.register_webhook(PROTOCOL, "https://consumer.example/protocol");

    // Every negotiation headed into verification is paused until an
    // out-of-band signal arrives.
    let awaiting_signal = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let guard_signal = Arc::clone(&awaiting_signal);
    let guard: Arc<dyn trellis_connector_core::application::PendingGuard<ContractNegotiation>> =
        Arc::new(move |_: &ContractNegotiation| {
            guard_signal.load(std::sync::atomic::Ordering::SeqCst)
        });
    let mut manager = ConsumerNegotiationManager::new(
        store.clone(),
        dispatcher.clone(),
        profiles,
        &config,
        Some(guard),
    )
    .unwrap();

    let negotiation = agreed_negotiation("ctx-1");
    let id = negotiation.id().to_string();
    store.create(negotiation).await.unwrap();

    manager.start();
    // The guard fires after the Agreed -> Verifying hop.
    let parked = {
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            let negotiation = store.find_by_id(&id).await.unwrap().unwrap();
            if negotiation.is_pending() {
                break negotiation;
            }
            assert!(std::time::Instant::now() < deadline, "pending guard did not fire");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    manager.stop().await;

    assert_eq!(parked.state(), NegotiationState::Verifying);
    assert_eq!(
        dispatcher.call_count(),
        0,
        "the verification dispatch must not run while parked"
    );

    // The signal arrives and an external actor clears the flag; the engine
    // resumes the workflow.
    awaiting_signal.store(false, std::sync::atomic::Ordering::SeqCst);
    let mut resumed = parked;
    resumed.set_pending(false);
    store.save(resumed).await.unwrap();

    manager.start();
    await_state!(store, &id, NegotiationState::Verified);
    manager.stop().await;
    assert_eq!(dispatcher.call_count(), 1);
}

#[tokio::test]
async fn stopping_mid_flow_resumes_from_persisted_state() {
    let config = test_config(3);
    let mut f = fixture(&config, RecordingDispatcher::acking(Some("provider-process-1")), true);

    let id = f
        .manager
        .initiate(&ParticipantContext::new("ctx-1"), request())
        .await
        .unwrap();

    f.manager.start();
    let negotiation = await_state!(f.store, &id, NegotiationState::Requested);
    f.manager.stop().await;

    // A different replica (fresh engine over the same store) picks the
    // entity up where it left off.
    drop(negotiation);
    f.manager.start();
    tokio::time::sleep(Duration::from_millis(50)).await;
    f.manager.stop().await;

    let settled = f.store.find_by_id(&id).await.unwrap().unwrap();
    assert_eq!(settled.state(), NegotiationState::Requested);
    assert_eq!(f.dispatcher.call_count(), 1, "requested state has no processor; no duplicate dispatch");
}
