// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Transfer Process Entity
//!
//! Persisted record of one data transfer: the request that started it, the
//! resource manifest to provision, and the provisioned/deprovisioned
//! bookkeeping the response handlers maintain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entity::{EntityBase, ParticipantRole, StatefulEntity, TransitionError};
use crate::domain::provision::{
    DataAddress, DeprovisionedResource, ProvisionedResource, ResourceDefinition, ResourceManifest,
};

/// Transfer states with their wire-stable integer codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferState {
    Initial,
    Provisioning,
    ProvisioningRequested,
    Provisioned,
    Requesting,
    Requested,
    Started,
    Completing,
    Completed,
    Deprovisioning,
    DeprovisioningRequested,
    Deprovisioned,
    Terminating,
    Terminated,
}

impl TransferState {
    pub fn code(self) -> i32 {
        match self {
            TransferState::Initial => 100,
            TransferState::Provisioning => 200,
            TransferState::ProvisioningRequested => 250,
            TransferState::Provisioned => 300,
            TransferState::Requesting => 350,
            TransferState::Requested => 400,
            TransferState::Started => 600,
            TransferState::Completing => 700,
            TransferState::Completed => 800,
            TransferState::Deprovisioning => 900,
            TransferState::DeprovisioningRequested => 950,
            TransferState::Deprovisioned => 1000,
            TransferState::Terminating => 1100,
            TransferState::Terminated => 1200,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        let state = match code {
            100 => TransferState::Initial,
            200 => TransferState::Provisioning,
            250 => TransferState::ProvisioningRequested,
            300 => TransferState::Provisioned,
            350 => TransferState::Requesting,
            400 => TransferState::Requested,
            600 => TransferState::Started,
            700 => TransferState::Completing,
            800 => TransferState::Completed,
            900 => TransferState::Deprovisioning,
            950 => TransferState::DeprovisioningRequested,
            1000 => TransferState::Deprovisioned,
            1100 => TransferState::Terminating,
            1200 => TransferState::Terminated,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Deprovisioned | TransferState::Terminated)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The data request a transfer process executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub contract_id: String,
    pub asset_id: String,
    pub protocol: String,
    pub counter_party_address: String,
    pub destination: DataAddress,
}

/// Errors raised by the transfer process bookkeeping methods.
#[derive(Debug, Error)]
pub enum TransferProcessError {
    #[error("resource definition {0} already has a provisioned resource")]
    DuplicateProvisionedResource(String),
    #[error("provisioned resource {0} already has a terminal deprovision record")]
    DuplicateDeprovisionedResource(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// A transfer process owned by this connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProcess {
    base: EntityBase,
    state: TransferState,
    pub role: ParticipantRole,
    pub participant_context_id: String,
    pub data_request: DataRequest,
    /// The counterparty's process id, learned from its acknowledgment.
    pub correlation_id: Option<String>,
    resource_manifest: ResourceManifest,
    provisioned_resource_set: Vec<ProvisionedResource>,
    deprovisioned_resources: Vec<DeprovisionedResource>,
    #[serde(default)]
    pub callback_addresses: Vec<String>,
}

impl TransferProcess {
    pub fn new(
        role: ParticipantRole,
        participant_context_id: impl Into<String>,
        data_request: DataRequest,
        resource_manifest: ResourceManifest,
        callback_addresses: Vec<String>,
    ) -> Self {
        Self {
            base: EntityBase::new(Uuid::new_v4().to_string()),
            state: TransferState::Initial,
            role,
            participant_context_id: participant_context_id.into(),
            data_request,
            correlation_id: None,
            resource_manifest,
            provisioned_resource_set: Vec::new(),
            deprovisioned_resources: Vec::new(),
            callback_addresses,
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn resource_manifest(&self) -> &ResourceManifest {
        &self.resource_manifest
    }

    /// Replace the manifest with the policy-rewritten copy produced before
    /// provisioning starts.
    pub fn update_resource_manifest(&mut self, manifest: ResourceManifest) {
        self.resource_manifest = manifest;
        self.base.updated_at = Utc::now();
    }

    pub fn provisioned_resources(&self) -> &[ProvisionedResource] {
        &self.provisioned_resource_set
    }

    pub fn deprovisioned_resources(&self) -> &[DeprovisionedResource] {
        &self.deprovisioned_resources
    }

    /// Record a provisioned resource. Each manifest definition provisions at
    /// most once.
    pub fn add_provisioned_resource(
        &mut self,
        resource: ProvisionedResource,
    ) -> Result<(), TransferProcessError> {
        if self
            .provisioned_resource_set
            .iter()
            .any(|r| r.resource_definition_id == resource.resource_definition_id)
        {
            return Err(TransferProcessError::DuplicateProvisionedResource(
                resource.resource_definition_id,
            ));
        }
        self.provisioned_resource_set.push(resource);
        self.base.updated_at = Utc::now();
        Ok(())
    }

    /// Record a deprovision outcome. Non-terminal (`in_process`) records may
    /// be superseded by a terminal one; a second terminal record for the
    /// same resource is rejected.
    pub fn add_deprovisioned_resource(
        &mut self,
        resource: DeprovisionedResource,
    ) -> Result<(), TransferProcessError> {
        if self
            .deprovisioned_resources
            .iter()
            .any(|r| r.provisioned_resource_id == resource.provisioned_resource_id && !r.in_process)
        {
            return Err(TransferProcessError::DuplicateDeprovisionedResource(
                resource.provisioned_resource_id,
            ));
        }
        self.deprovisioned_resources
            .retain(|r| r.provisioned_resource_id != resource.provisioned_resource_id);
        self.deprovisioned_resources.push(resource);
        self.base.updated_at = Utc::now();
        Ok(())
    }

    /// Manifest definitions that have no provisioned resource yet.
    pub fn pending_definitions(&self) -> Vec<ResourceDefinition> {
        self.resource_manifest
            .definitions
            .iter()
            .filter(|d| {
                !self
                    .provisioned_resource_set
                    .iter()
                    .any(|r| r.resource_definition_id == d.id)
            })
            .cloned()
            .collect()
    }

    /// Provisioned resources that have no terminal deprovision record yet.
    pub fn resources_to_deprovision(&self) -> Vec<ProvisionedResource> {
        self.provisioned_resource_set
            .iter()
            .filter(|r| {
                !self
                    .deprovisioned_resources
                    .iter()
                    .any(|d| d.provisioned_resource_id == r.id && !d.in_process)
            })
            .cloned()
            .collect()
    }

    /// True when every manifest definition has a matching provisioned (or
    /// errored) resource.
    pub fn provisioning_complete(&self) -> bool {
        self.pending_definitions().is_empty()
    }

    /// True when every provisioned resource has a terminal deprovision
    /// record.
    pub fn deprovisioning_complete(&self) -> bool {
        self.resources_to_deprovision().is_empty()
    }

    pub fn retried(&mut self) {
        self.base.record_retry();
    }

    pub fn transition_provisioning(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Provisioning,
            &[
                TransferState::Initial,
                TransferState::Provisioning,
                TransferState::ProvisioningRequested,
            ],
        )
    }

    pub fn transition_provisioning_requested(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::ProvisioningRequested,
            &[TransferState::Provisioning],
        )
    }

    pub fn transition_provisioned(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Provisioned,
            &[
                TransferState::Provisioning,
                TransferState::ProvisioningRequested,
                TransferState::Provisioned,
            ],
        )
    }

    pub fn transition_requesting(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Requesting,
            &[TransferState::Provisioned, TransferState::Requesting],
        )
    }

    pub fn transition_requested(&mut self) -> Result<(), TransferProcessError> {
        self.transition(TransferState::Requested, &[TransferState::Requesting])
    }

    pub fn transition_started(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Started,
            &[TransferState::Requested, TransferState::Started],
        )
    }

    pub fn transition_completing(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Completing,
            &[TransferState::Started, TransferState::Completing],
        )
    }

    pub fn transition_completed(&mut self) -> Result<(), TransferProcessError> {
        self.transition(TransferState::Completed, &[TransferState::Completing])
    }

    pub fn transition_deprovisioning(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Deprovisioning,
            &[
                TransferState::Completed,
                TransferState::Terminated,
                TransferState::Deprovisioning,
                TransferState::DeprovisioningRequested,
            ],
        )
    }

    pub fn transition_deprovisioning_requested(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::DeprovisioningRequested,
            &[TransferState::Deprovisioning],
        )
    }

    /// Deprovisioning must not dead-end; this is reachable even on failure.
    pub fn transition_deprovisioned(&mut self) -> Result<(), TransferProcessError> {
        self.transition(
            TransferState::Deprovisioned,
            &[
                TransferState::Deprovisioning,
                TransferState::DeprovisioningRequested,
            ],
        )
    }

    /// Reachable from any non-terminal state.
    pub fn transition_terminating(&mut self) -> Result<(), TransferProcessError> {
        if self.state.is_terminal() {
            return Err(TransitionError::new(
                self.base.id.clone(),
                self.state,
                TransferState::Terminating,
            )
            .into());
        }
        self.set_state(TransferState::Terminating);
        Ok(())
    }

    /// Reachable from any non-terminal state; consumer-side fatal failures
    /// terminate directly without a counterparty notification.
    pub fn transition_terminated(&mut self) -> Result<(), TransferProcessError> {
        if self.state.is_terminal() {
            return Err(TransitionError::new(
                self.base.id.clone(),
                self.state,
                TransferState::Terminated,
            )
            .into());
        }
        self.set_state(TransferState::Terminated);
        Ok(())
    }

    fn transition(
        &mut self,
        to: TransferState,
        allowed_from: &[TransferState],
    ) -> Result<(), TransferProcessError> {
        if !allowed_from.contains(&self.state) {
            return Err(TransitionError::new(self.base.id.clone(), self.state, to).into());
        }
        self.set_state(to);
        Ok(())
    }

    fn set_state(&mut self, next: TransferState) {
        let same = self.state == next;
        self.state = next;
        self.base.record_transition(same);
    }
}

impl StatefulEntity for TransferProcess {
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
