// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! Shared fixtures for the end-to-end state machine tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use trellis_connector_core::application::Provisioner;
use trellis_connector_core::domain::dispatcher::{
    DispatchAck, RemoteMessageDispatcher, StatusFailure, StatusResult,
};
use trellis_connector_core::domain::events::{NegotiationListener, TransferListener};
use trellis_connector_core::domain::messages::ProtocolMessage;
use trellis_connector_core::domain::negotiation::ContractNegotiation;
use trellis_connector_core::domain::policy::Policy;
use trellis_connector_core::domain::provision::{
    DataAddress, DeprovisionedResource, ProvisionResponse, ProvisionedResource,
    ResourceDefinition, SecretToken,
};
use trellis_connector_core::domain::transfer::TransferProcess;
use trellis_connector_core::infrastructure::ConnectorConfig;

/// Log handler for test runs; safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Fast engine settings so the tests converge in tens of milliseconds.
pub fn test_config(retry_limit: u32) -> ConnectorConfig {
    init_tracing();
    let mut config = ConnectorConfig::default();
    config.state_machine.batch_size = 5;
    config.state_machine.iteration_wait = Duration::from_millis(10);
    config.state_machine.lease_ttl = Duration::from_secs(5);
    config.retry.retry_limit = retry_limit;
    config.retry.base_delay = Duration::from_millis(20);
    config.retry.max_delay = Duration::from_millis(80);
    config
}

/// Dispatcher that records every message and answers from a script, falling
/// back to a default response when the script runs dry.
pub struct RecordingDispatcher {
    calls: Mutex<Vec<ProtocolMessage>>,
    scripted: Mutex<VecDeque<StatusResult<DispatchAck>>>,
    default: StatusResult<DispatchAck>,
}

impl RecordingDispatcher {
    pub fn acking(provider_pid: Option<&str>) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            default: Ok(DispatchAck {
                provider_pid: provider_pid.map(str::to_string),
            }),
        }
    }

    pub fn failing(failure: StatusFailure) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            scripted: Mutex::new(VecDeque::new()),
            default: Err(failure),
        }
    }

    pub fn push_response(&self, response: StatusResult<DispatchAck>) {
        self.scripted.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn calls(&self) -> Vec<ProtocolMessage> {
        self.calls.lock().clone()
    }
}

#[async_trait::async_trait]
impl RemoteMessageDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _participant_context_id: &str,
        _counter_party_address: &str,
        message: ProtocolMessage,
    ) -> StatusResult<DispatchAck> {
        self.calls.lock().push(message);
        self.scripted
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Listener counting each negotiation event.
#[derive(Default)]
pub struct CountingNegotiationListener {
    pub initiated: Mutex<u32>,
    pub requested: Mutex<u32>,
    pub accepted: Mutex<u32>,
    pub verified: Mutex<u32>,
    pub terminated: Mutex<u32>,
}

impl NegotiationListener for CountingNegotiationListener {
    fn initiated(&self, _: &ContractNegotiation) {
        *self.initiated.lock() += 1;
    }
    fn requested(&self, _: &ContractNegotiation) {
        *self.requested.lock() += 1;
    }
    fn accepted(&self, _: &ContractNegotiation) {
        *self.accepted.lock() += 1;
    }
    fn verified(&self, _: &ContractNegotiation) {
        *self.verified.lock() += 1;
    }
    fn terminated(&self, _: &ContractNegotiation) {
        *self.terminated.lock() += 1;
    }
}

/// Listener counting each transfer event.
#[derive(Default)]
pub struct CountingTransferListener {
    pub initiated: Mutex<u32>,
    pub provisioning_requested: Mutex<u32>,
    pub provisioned: Mutex<u32>,
    pub requested: Mutex<u32>,
    pub completed: Mutex<u32>,
    pub deprovisioning_requested: Mutex<u32>,
    pub deprovisioned: Mutex<u32>,
    pub terminated: Mutex<u32>,
}

impl TransferListener for CountingTransferListener {
    fn initiated(&self, _: &TransferProcess) {
        *self.initiated.lock() += 1;
    }
    fn provisioning_requested(&self, _: &TransferProcess) {
        *self.provisioning_requested.lock() += 1;
    }
    fn provisioned(&self, _: &TransferProcess) {
        *self.provisioned.lock() += 1;
    }
    fn requested(&self, _: &TransferProcess) {
        *self.requested.lock() += 1;
    }
    fn completed(&self, _: &TransferProcess) {
        *self.completed.lock() += 1;
    }
    fn deprovisioning_requested(&self, _: &TransferProcess) {
        *self.deprovisioning_requested.lock() += 1;
    }
    fn deprovisioned(&self, _: &TransferProcess) {
        *self.deprovisioned.lock() += 1;
    }
    fn terminated(&self, _: &TransferProcess) {
        *self.terminated.lock() += 1;
    }
}

/// Provisioner for one resource kind, answering from a script and falling
/// back to a successful completion.
pub struct TestProvisioner {
    kind: &'static str,
    with_token: bool,
    provision_script: Mutex<VecDeque<StatusResult<ProvisionResponse>>>,
    deprovision_script: Mutex<VecDeque<StatusResult<DeprovisionedResource>>>,
}

impl TestProvisioner {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            with_token: false,
            provision_script: Mutex::new(VecDeque::new()),
            deprovision_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_token(mut self) -> Self {
        self.with_token = true;
        self
    }

    pub fn push_provision_response(&self, response: StatusResult<ProvisionResponse>) {
        self.provision_script.lock().push_back(response);
    }

    pub fn push_deprovision_response(&self, response: StatusResult<DeprovisionedResource>) {
        self.deprovision_script.lock().push_back(response);
    }

    pub fn resource_for(&self, definition: &ResourceDefinition) -> ProvisionedResource {
        ProvisionedResource {
            id: format!("res-{}", definition.id),
            resource_definition_id: definition.id.clone(),
            kind: definition.kind.clone(),
            data_address: Some(DataAddress::new("blob", serde_json::json!({}))),
            error: false,
            error_message: None,
        }
    }
}

#[async_trait::async_trait]
impl Provisioner for TestProvisioner {
    fn can_provision(&self, definition: &ResourceDefinition) -> bool {
        definition.kind == self.kind
    }

    async fn provision(
        &self,
        definition: &ResourceDefinition,
        _policy: &Policy,
    ) -> StatusResult<ProvisionResponse> {
        if let Some(response) = self.provision_script.lock().pop_front() {
            return response;
        }
        let resource = self.resource_for(definition);
        if self.with_token {
            Ok(ProvisionResponse::with_token(
                resource,
                SecretToken {
                    token: "test-credential".to_string(),
                },
            ))
        } else {
            Ok(ProvisionResponse::completed(resource))
        }
    }

    fn can_deprovision(&self, resource: &ProvisionedResource) -> bool {
        resource.kind == self.kind
    }

    async fn deprovision(
        &self,
        resource: &ProvisionedResource,
        _policy: &Policy,
    ) -> StatusResult<DeprovisionedResource> {
        if let Some(response) = self.deprovision_script.lock().pop_front() {
            return response;
        }
        Ok(DeprovisionedResource::completed(resource.id.clone()))
    }
}

/// Await an entity reaching a state, returning its final snapshot.
#[macro_export]
macro_rules! await_state {
    ($store:expr, $id:expr, $state:expr) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            let entity = $store
                .find_by_id($id)
                .await
                .expect("store lookup failed")
                .expect("entity vanished");
            if entity.state() == $state {
                break entity;
            }
            assert!(
                std::time::Instant::now() < deadline,
                "entity {} did not reach {:?} (still {:?})",
                $id,
                $state,
                entity.state()
            );
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    }};
}
