// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Transfer Process Manager
//!
//! Drives transfer processes through
//! `Initial → Provisioning → Provisioned → Requesting → Requested →
//! Started → Completing → Completed → Deprovisioning → Deprovisioned`,
//! with `Terminating → Terminated` reachable from any non-terminal state.
//!
//! `Initial` validates (and possibly rewrites) the resource manifest
//! against the contract's policy before any resource is touched.
//! `Provisioning`/`Deprovisioning` fan out to the registered provisioners
//! and feed the aggregated outcomes to the response handlers; asynchronous
//! provisioning that completes out-of-band re-enters through
//! [`TransferProcessManager::complete_provisioning`].

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::pending_guard::PendingGuard;
use crate::application::provision_manager::ProvisionManager;
use crate::application::response_handlers::{
    DeprovisionResponsesHandler, ProvisionResponsesHandler,
};
use crate::application::retry::{EntityRetryProcessConfiguration, FailureDisposition};
use crate::application::state_machine::{ProcessUpdate, Processor, StateHandler, StateMachine};
use crate::application::policy_engine::PolicyEvaluator;
use crate::domain::dispatcher::{RemoteMessageDispatcher, StatusFailure, StatusResult};
use crate::domain::entity::{ParticipantContext, ParticipantRole, StatefulEntity};
use crate::domain::events::{TransferListener, TransferObservable};
use crate::domain::messages::{
    ProtocolMessage, TransferCompletionMessage, TransferRequestMessage, TransferTerminationMessage,
};
use crate::domain::policy::Policy;
use crate::domain::provision::{DeprovisionedResource, ProvisionResponse, ResourceManifest};
use crate::domain::repository::{PolicyArchive, StateEntityStore};
use crate::domain::transfer::{DataRequest, TransferProcess, TransferState};
use crate::infrastructure::config::ConnectorConfig;
use crate::infrastructure::profile_registry::DataspaceProfileContextRegistry;
use crate::infrastructure::vault::Vault;

/// Request to start a consumer-side transfer.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub data_request: DataRequest,
    pub resource_manifest: ResourceManifest,
    pub callback_addresses: Vec<String>,
}

/// Collaborators of the transfer manager, wired explicitly at startup.
pub struct TransferManagerServices {
    pub store: Arc<dyn StateEntityStore<TransferProcess>>,
    pub dispatcher: Arc<dyn RemoteMessageDispatcher>,
    pub profiles: Arc<DataspaceProfileContextRegistry>,
    pub vault: Arc<dyn Vault>,
    pub provision_manager: Arc<ProvisionManager>,
    pub policy_archive: Arc<dyn PolicyArchive>,
    pub policy_engine: Arc<PolicyEvaluator>,
}

struct TransferServices {
    store: Arc<dyn StateEntityStore<TransferProcess>>,
    dispatcher: Arc<dyn RemoteMessageDispatcher>,
    profiles: Arc<DataspaceProfileContextRegistry>,
    provision_manager: Arc<ProvisionManager>,
    policy_archive: Arc<dyn PolicyArchive>,
    policy_engine: Arc<PolicyEvaluator>,
    retry: EntityRetryProcessConfiguration,
    observable: Arc<TransferObservable>,
    provision_handler: ProvisionResponsesHandler,
    deprovision_handler: DeprovisionResponsesHandler,
}

impl TransferServices {
    fn process_id(&self, process: &TransferProcess) -> String {
        process
            .correlation_id
            .clone()
            .unwrap_or_else(|| process.id().to_string())
    }

    async fn contract_policy(&self, process: &TransferProcess) -> Option<Policy> {
        self.policy_archive
            .find_policy(&process.data_request.contract_id)
            .await
    }

    fn terminated_update(&self, process: TransferProcess) -> ProcessUpdate<TransferProcess> {
        let observable = Arc::clone(&self.observable);
        let snapshot = process.clone();
        ProcessUpdate::with_post(process, move || {
            observable.invoke(|l| l.terminated(&snapshot));
        })
    }

    /// Route a fatal local failure. Providers pass through `Terminating` to
    /// notify the counterparty; consumers have nobody to tell and terminate
    /// directly.
    fn fail_by_role(
        &self,
        mut process: TransferProcess,
        message: String,
    ) -> Result<ProcessUpdate<TransferProcess>> {
        warn!(
            process_id = %process.id(),
            error = %message,
            "Transfer process failed fatally"
        );
        process.set_error_detail(Some(message));
        match process.role {
            ParticipantRole::Provider => {
                process.transition_terminating()?;
                Ok(ProcessUpdate::new(process))
            }
            ParticipantRole::Consumer => {
                process.transition_terminated()?;
                Ok(self.terminated_update(process))
            }
        }
    }

    fn on_dispatch_failure(
        &self,
        mut process: TransferProcess,
        failure: StatusFailure,
    ) -> Result<ProcessUpdate<TransferProcess>> {
        match self.retry.disposition(&process, &failure) {
            FailureDisposition::Retry => {
                debug!(
                    process_id = %process.id(),
                    attempt = process.state_count() + 1,
                    error = %failure,
                    "Dispatch failed; will retry"
                );
                process.retried();
                Ok(ProcessUpdate::new(process))
            }
            disposition => {
                warn!(
                    process_id = %process.id(),
                    disposition = ?disposition,
                    error = %failure,
                    "Dispatch failed terminally"
                );
                process.set_error_detail(Some(failure.message));
                process.transition_terminating()?;
                Ok(ProcessUpdate::new(process))
            }
        }
    }
}

/// `Initial`: gate and rewrite the resource manifest through the policy
/// engine, then head into provisioning.
struct InitialProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for InitialProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;

        let Some(policy) = services.contract_policy(&process).await else {
            let message = format!(
                "no policy found for contract {}",
                process.data_request.contract_id
            );
            return services.fail_by_role(process, message);
        };

        match services
            .policy_engine
            .evaluate_manifest(process.resource_manifest(), &policy)
        {
            Ok(manifest) => {
                process.update_resource_manifest(manifest);
                process.transition_provisioning()?;
                Ok(ProcessUpdate::new(process))
            }
            Err(failures) => {
                let message = format!(
                    "resource manifest rejected by policy: {}",
                    failures.join("; ")
                );
                services.fail_by_role(process, message)
            }
        }
    }
}

/// `Provisioning`: fan out the outstanding definitions and apply the
/// aggregated responses.
struct ProvisioningProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for ProvisioningProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;
        let policy = services.contract_policy(&process).await.unwrap_or_default();
        let definitions = process.pending_definitions();
        let responses = services
            .provision_manager
            .provision(&definitions, &policy)
            .await;

        services.provision_handler.handle(&mut process, responses).await;

        let post_services = Arc::clone(services);
        let snapshot = process.clone();
        Ok(ProcessUpdate::with_post(process, move || {
            post_services.provision_handler.post_actions(&snapshot);
        }))
    }
}

/// `Provisioned`: local hop into `Requesting`.
struct ProvisionedProcessor;

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for ProvisionedProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        process.transition_requesting()?;
        Ok(ProcessUpdate::new(process))
    }
}

/// `Requesting`: ask the provider to start the transfer.
struct RequestingProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for RequestingProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;

        let Some(callback) = services.profiles.get_webhook(&process.data_request.protocol) else {
            let message = format!(
                "no callback endpoint found for protocol {}",
                process.data_request.protocol
            );
            return services.fail_by_role(process, message);
        };

        let message = ProtocolMessage::TransferRequest(TransferRequestMessage {
            process_id: services.process_id(&process),
            contract_id: process.data_request.contract_id.clone(),
            asset_id: process.data_request.asset_id.clone(),
            destination: process.data_request.destination.clone(),
            callback_address: callback,
        });

        match services
            .dispatcher
            .dispatch(
                &process.participant_context_id,
                &process.data_request.counter_party_address,
                message,
            )
            .await
        {
            Ok(ack) => {
                if let Some(provider_pid) = ack.provider_pid {
                    process.correlation_id = Some(provider_pid);
                }
                process.transition_requested()?;
                let observable = Arc::clone(&services.observable);
                let snapshot = process.clone();
                Ok(ProcessUpdate::with_post(process, move || {
                    observable.invoke(|l| l.requested(&snapshot));
                }))
            }
            Err(failure) => services.on_dispatch_failure(process, failure),
        }
    }
}

/// `Completing`: announce completion to the counterparty.
struct CompletingProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for CompletingProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;
        let message = ProtocolMessage::TransferCompletion(TransferCompletionMessage {
            process_id: services.process_id(&process),
        });

        match services
            .dispatcher
            .dispatch(
                &process.participant_context_id,
                &process.data_request.counter_party_address,
                message,
            )
            .await
        {
            Ok(_) => {
                process.transition_completed()?;
                let observable = Arc::clone(&services.observable);
                let snapshot = process.clone();
                Ok(ProcessUpdate::with_post(process, move || {
                    observable.invoke(|l| l.completed(&snapshot));
                }))
            }
            Err(failure) => services.on_dispatch_failure(process, failure),
        }
    }
}

/// `Deprovisioning`: fan out teardown of the provisioned resources and
/// apply the aggregated responses.
struct DeprovisioningProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for DeprovisioningProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;
        let policy = services.contract_policy(&process).await.unwrap_or_default();
        let resources = process.resources_to_deprovision();
        let responses = services
            .provision_manager
            .deprovision(&resources, &policy)
            .await;

        services
            .deprovision_handler
            .handle(&mut process, responses)
            .await;

        let post_services = Arc::clone(services);
        let snapshot = process.clone();
        Ok(ProcessUpdate::with_post(process, move || {
            post_services.deprovision_handler.post_actions(&snapshot);
        }))
    }
}

/// `Terminating`: best-effort termination notice, then `Terminated`.
struct TerminatingProcessor {
    services: Arc<TransferServices>,
}

#[async_trait::async_trait]
impl StateHandler<TransferProcess> for TerminatingProcessor {
    async fn handle(&self, mut process: TransferProcess) -> Result<ProcessUpdate<TransferProcess>> {
        let services = &self.services;
        let message = ProtocolMessage::TransferTermination(TransferTerminationMessage {
            process_id: services.process_id(&process),
            reason: process.error_detail().map(str::to_string),
        });

        if let Err(failure) = services
            .dispatcher
            .dispatch(
                &process.participant_context_id,
                &process.data_request.counter_party_address,
                message,
            )
            .await
        {
            debug!(
                process_id = %process.id(),
                error = %failure,
                "Termination notice failed; terminating anyway"
            );
        }

        process.transition_terminated()?;
        Ok(services.terminated_update(process))
    }
}

/// Transfer manager: `initiate`/`deprovision` entry points, the external
/// completion hooks for asynchronous provisioning, and the background state
/// machine.
pub struct TransferProcessManager {
    services: Arc<TransferServices>,
    state_machine: StateMachine<TransferProcess>,
}

impl TransferProcessManager {
    pub fn new(
        services: TransferManagerServices,
        config: &ConnectorConfig,
        pending_guard: Option<Arc<dyn PendingGuard<TransferProcess>>>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_configuration()?;
        let observable = Arc::new(TransferObservable::new());
        let store = Arc::clone(&services.store);

        let services = Arc::new(TransferServices {
            store: services.store,
            dispatcher: services.dispatcher,
            profiles: services.profiles,
            provision_manager: services.provision_manager,
            policy_archive: services.policy_archive,
            policy_engine: services.policy_engine,
            retry: retry.clone(),
            observable: Arc::clone(&observable),
            provision_handler: ProvisionResponsesHandler::new(
                Arc::clone(&services.vault),
                Arc::clone(&observable),
            ),
            deprovision_handler: DeprovisionResponsesHandler::new(services.vault, observable),
        });

        let mut requesting = Processor::new(
            TransferState::Requesting.code(),
            "requesting",
            Arc::new(RequestingProcessor {
                services: Arc::clone(&services),
            }),
        );
        if let Some(guard) = pending_guard {
            requesting = requesting.with_guard(guard);
        }

        let processors = vec![
            Processor::new(
                TransferState::Initial.code(),
                "initial",
                Arc::new(InitialProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                TransferState::Provisioning.code(),
                "provisioning",
                Arc::new(ProvisioningProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                TransferState::Provisioned.code(),
                "provisioned",
                Arc::new(ProvisionedProcessor),
            ),
            requesting,
            Processor::new(
                TransferState::Completing.code(),
                "completing",
                Arc::new(CompletingProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                TransferState::Deprovisioning.code(),
                "deprovisioning",
                Arc::new(DeprovisioningProcessor {
                    services: Arc::clone(&services),
                }),
            ),
            Processor::new(
                TransferState::Terminating.code(),
                "terminating",
                Arc::new(TerminatingProcessor {
                    services: Arc::clone(&services),
                }),
            ),
        ];

        let state_machine = StateMachine::new(
            "transfer-process",
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

    pub fn register_listener(&self, listener: Arc<dyn TransferListener>) {
        self.services.observable.register(listener);
    }

    /// Start a consumer-side transfer. Purely local: persists the new
    /// process in `Initial` and returns its id.
    pub async fn initiate(
        &self,
        context: &ParticipantContext,
        request: TransferRequest,
    ) -> Result<String> {
        let process = TransferProcess::new(
            ParticipantRole::Consumer,
            context.participant_context_id.clone(),
            request.data_request,
            request.resource_manifest,
            request.callback_addresses,
        );
        let id = process.id().to_string();
        self.services
            .store
            .create(process.clone())
            .await
            .context("Failed to persist new transfer process")?;

        info!(
            process_id = %id,
            asset_id = %process.data_request.asset_id,
            "Transfer process initiated"
        );
        self.services.observable.invoke(|l| l.initiated(&process));
        Ok(id)
    }

    /// Apply provision responses arriving out-of-band, e.g. the completion
    /// callback of a provisioner that answered `in_process` earlier.
    /// Returns `false` when the batch was stale for the process's state.
    pub async fn complete_provisioning(
        &self,
        process_id: &str,
        responses: Vec<StatusResult<ProvisionResponse>>,
    ) -> Result<bool> {
        let Some(mut process) = self.services.store.find_by_id(process_id).await? else {
            bail!("transfer process {process_id} not found");
        };
        let handled = self
            .services
            .provision_handler
            .handle(&mut process, responses)
            .await;
        if handled {
            self.services.store.save(process.clone()).await?;
            self.services.provision_handler.post_actions(&process);
        }
        Ok(handled)
    }

    /// Apply deprovision responses arriving out-of-band.
    pub async fn complete_deprovisioning(
        &self,
        process_id: &str,
        responses: Vec<StatusResult<DeprovisionedResource>>,
    ) -> Result<bool> {
        let Some(mut process) = self.services.store.find_by_id(process_id).await? else {
            bail!("transfer process {process_id} not found");
        };
        let handled = self
            .services
            .deprovision_handler
            .handle(&mut process, responses)
            .await;
        if handled {
            self.services.store.save(process.clone()).await?;
            self.services.deprovision_handler.post_actions(&process);
        }
        Ok(handled)
    }

    /// Move a completed (or terminated) process into `Deprovisioning`; the
    /// state machine takes it from there.
    pub async fn deprovision(&self, process_id: &str) -> Result<()> {
        let Some(mut process) = self.services.store.find_by_id(process_id).await? else {
            bail!("transfer process {process_id} not found");
        };
        process.transition_deprovisioning()?;
        self.services.store.save(process).await?;
        Ok(())
    }

    pub fn start(&mut self) {
        self.state_machine.start();
    }

    pub async fn stop(&mut self) {
        self.state_machine.stop().await;
    }
}
