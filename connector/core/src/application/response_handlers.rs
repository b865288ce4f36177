// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Provisioning Response Handlers
//!
//! Interpret the aggregated outcomes of a provisioning or deprovisioning
//! fan-out and drive the transfer process transitions. `handle` mutates the
//! process (the caller persists it); `post_actions` fires the listener
//! event matching the committed transition, once per handled batch.
//!
//! A batch arriving for a process that already left the provisioning
//! states is stale — `handle` returns `false` without touching the process
//! or the vault.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::dispatcher::StatusResult;
use crate::domain::entity::{ParticipantRole, StatefulEntity};
use crate::domain::events::TransferObservable;
use crate::domain::provision::{DeprovisionedResource, ProvisionResponse};
use crate::domain::transfer::{TransferProcess, TransferState};
use crate::infrastructure::vault::Vault;

/// Consumes aggregated provisioning results for one transfer process.
pub struct ProvisionResponsesHandler {
    vault: Arc<dyn Vault>,
    observable: Arc<TransferObservable>,
}

impl ProvisionResponsesHandler {
    pub fn new(vault: Arc<dyn Vault>, observable: Arc<TransferObservable>) -> Self {
        Self { vault, observable }
    }

    /// Apply a batch of provision responses. Returns `false` when the batch
    /// is stale for the process's current state.
    pub async fn handle(
        &self,
        process: &mut TransferProcess,
        responses: Vec<StatusResult<ProvisionResponse>>,
    ) -> bool {
        if !matches!(
            process.state(),
            TransferState::Provisioning | TransferState::ProvisioningRequested
        ) {
            debug!(
                process_id = %process.id(),
                state = %process.state(),
                "Ignoring stale provision responses"
            );
            return false;
        }

        let mut fatal: Option<String> = None;
        let mut retryable = false;
        let mut in_process_seen = false;

        for response in responses {
            match response {
                Ok(response) if response.in_process => {
                    in_process_seen = true;
                }
                Ok(response) => {
                    let Some(resource) = response.resource else {
                        warn!(
                            process_id = %process.id(),
                            "Provision response carried neither resource nor in-process flag"
                        );
                        continue;
                    };
                    if let Some(token) = response.secret_token {
                        let name = resource.token_secret_name();
                        if let Err(e) = self.vault.store_secret(&name, &token.token).await {
                            warn!(
                                process_id = %process.id(),
                                secret = %name,
                                error = %e,
                                "Failed to store provisioned secret; resource left outstanding"
                            );
                            retryable = true;
                            continue;
                        }
                    }
                    if let Err(e) = process.add_provisioned_resource(resource) {
                        debug!(process_id = %process.id(), error = %e, "Duplicate provisioned resource ignored");
                    }
                }
                Err(failure) if failure.is_fatal() => {
                    fatal = Some(failure.message);
                }
                Err(failure) => {
                    warn!(
                        process_id = %process.id(),
                        error = %failure,
                        "Retryable provisioning failure"
                    );
                    retryable = true;
                }
            }
        }

        if let Some(message) = fatal {
            // A provider can still notify the counterparty; a consumer has
            // nobody to tell and terminates directly.
            process.set_error_detail(Some(message));
            let transition = match process.role {
                ParticipantRole::Provider => process.transition_terminating(),
                ParticipantRole::Consumer => process.transition_terminated(),
            };
            if let Err(e) = transition {
                warn!(process_id = %process.id(), error = %e, "Failed to terminate after fatal provisioning");
            }
            return true;
        }

        if process.provisioning_complete() {
            if let Err(e) = process.transition_provisioned() {
                warn!(process_id = %process.id(), error = %e, "Failed to mark process provisioned");
            }
            return true;
        }

        if in_process_seen {
            if process.state() == TransferState::Provisioning {
                if let Err(e) = process.transition_provisioning_requested() {
                    warn!(process_id = %process.id(), error = %e, "Failed to mark provisioning requested");
                }
            }
            return true;
        }

        // Outstanding definitions remain; stay in Provisioning and let the
        // backoff gate pace the next attempt.
        if retryable {
            process.retried();
        }
        true
    }

    /// Fire the listener event for the transition `handle` committed.
    pub fn post_actions(&self, process: &TransferProcess) {
        match process.state() {
            TransferState::Provisioned => self.observable.invoke(|l| l.provisioned(process)),
            TransferState::ProvisioningRequested => {
                self.observable.invoke(|l| l.provisioning_requested(process));
            }
            TransferState::Terminating | TransferState::Terminated => {
                self.observable.invoke(|l| l.terminated(process));
            }
            _ => {}
        }
    }
}

/// Consumes aggregated deprovisioning results for one transfer process.
pub struct DeprovisionResponsesHandler {
    vault: Arc<dyn Vault>,
    observable: Arc<TransferObservable>,
}

impl DeprovisionResponsesHandler {
    pub fn new(vault: Arc<dyn Vault>, observable: Arc<TransferObservable>) -> Self {
        Self { vault, observable }
    }

    /// Apply a batch of deprovision responses. Returns `false` when the
    /// batch is stale for the process's current state.
    pub async fn handle(
        &self,
        process: &mut TransferProcess,
        responses: Vec<StatusResult<DeprovisionedResource>>,
    ) -> bool {
        if !matches!(
            process.state(),
            TransferState::Deprovisioning | TransferState::DeprovisioningRequested
        ) {
            debug!(
                process_id = %process.id(),
                state = %process.state(),
                "Ignoring stale deprovision responses"
            );
            return false;
        }

        let mut fatal: Option<String> = None;
        let mut retryable = false;
        let mut in_process_seen = false;

        for response in responses {
            match response {
                Ok(record) if record.in_process => {
                    in_process_seen = true;
                    if let Err(e) = process.add_deprovisioned_resource(record) {
                        debug!(process_id = %process.id(), error = %e, "Duplicate deprovision record ignored");
                    }
                }
                Ok(record) => {
                    // Best-effort cleanup of any secret issued for the
                    // resource; the in-memory and real vaults treat a
                    // missing secret as a no-op.
                    let name = format!("{}-token", record.provisioned_resource_id);
                    if let Err(e) = self.vault.delete_secret(&name).await {
                        warn!(secret = %name, error = %e, "Failed to delete provisioned secret");
                    }
                    if let Err(e) = process.add_deprovisioned_resource(record) {
                        debug!(process_id = %process.id(), error = %e, "Duplicate deprovision record ignored");
                    }
                }
                Err(failure) if failure.is_fatal() => {
                    fatal = Some(failure.message);
                }
                Err(failure) => {
                    warn!(
                        process_id = %process.id(),
                        error = %failure,
                        "Retryable deprovisioning failure"
                    );
                    retryable = true;
                }
            }
        }

        if let Some(message) = fatal {
            // Deprovisioning must not dead-end: a fatal outcome still
            // reaches the terminal state, with the error recorded.
            process.set_error_detail(Some(message));
            if let Err(e) = process.transition_deprovisioned() {
                warn!(process_id = %process.id(), error = %e, "Failed to mark process deprovisioned");
            }
            return true;
        }

        if process.deprovisioning_complete() {
            if let Err(e) = process.transition_deprovisioned() {
                warn!(process_id = %process.id(), error = %e, "Failed to mark process deprovisioned");
            }
            return true;
        }

        if in_process_seen {
            if process.state() == TransferState::Deprovisioning {
                if let Err(e) = process.transition_deprovisioning_requested() {
                    warn!(process_id = %process.id(), error = %e, "Failed to mark deprovisioning requested");
                }
            }
            return true;
        }

        if retryable {
            process.retried();
        }
        true
    }

    /// Fire the listener event for the transition `handle` committed.
    pub fn post_actions(&self, process: &TransferProcess) {
        match process.state() {
            TransferState::Deprovisioned => self.observable.invoke(|l| l.deprovisioned(process)),
            TransferState::DeprovisioningRequested => {
                self.observable.invoke(|l| l.deprovisioning_requested(process));
            }
            _ => {}
        }
    }
}
