// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Provision Manager
//!
//! Fans a transfer process's resource definitions out to the registered
//! provisioners and aggregates the per-definition outcomes. A definition
//! with no willing provisioner fails fatally on its own without touching
//! the other definitions.

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::domain::dispatcher::{StatusFailure, StatusResult};
use crate::domain::policy::Policy;
use crate::domain::provision::{
    DeprovisionedResource, ProvisionResponse, ProvisionedResource, ResourceDefinition,
};

/// Pluggable resource provisioner. Registered implementations are probed in
/// registration order; the first one that accepts a definition owns it.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    fn can_provision(&self, definition: &ResourceDefinition) -> bool;

    async fn provision(
        &self,
        definition: &ResourceDefinition,
        policy: &Policy,
    ) -> StatusResult<ProvisionResponse>;

    fn can_deprovision(&self, resource: &ProvisionedResource) -> bool;

    async fn deprovision(
        &self,
        resource: &ProvisionedResource,
        policy: &Policy,
    ) -> StatusResult<DeprovisionedResource>;
}

/// Registry and fan-out point for provisioners.
#[derive(Default)]
pub struct ProvisionManager {
    provisioners: RwLock<Vec<Arc<dyn Provisioner>>>,
}

impl ProvisionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provisioner: Arc<dyn Provisioner>) {
        self.provisioners.write().push(provisioner);
    }

    /// Provision every definition concurrently and return one result per
    /// definition, in manifest order.
    pub async fn provision(
        &self,
        definitions: &[ResourceDefinition],
        policy: &Policy,
    ) -> Vec<StatusResult<ProvisionResponse>> {
        let assigned: Vec<_> = definitions
            .iter()
            .map(|definition| self.provisioner_for(definition))
            .collect();

        let futures = definitions
            .iter()
            .zip(assigned)
            .map(|(definition, provisioner)| async move {
                match provisioner {
                    Some(provisioner) => provisioner.provision(definition, policy).await,
                    None => Err(StatusFailure::fatal(format!(
                        "no provisioner registered for resource kind '{}'",
                        definition.kind
                    ))),
                }
            });
        join_all(futures).await
    }

    /// Deprovision every resource concurrently and return one result per
    /// resource, in input order.
    pub async fn deprovision(
        &self,
        resources: &[ProvisionedResource],
        policy: &Policy,
    ) -> Vec<StatusResult<DeprovisionedResource>> {
        let assigned: Vec<_> = resources
            .iter()
            .map(|resource| self.deprovisioner_for(resource))
            .collect();

        let futures = resources
            .iter()
            .zip(assigned)
            .map(|(resource, provisioner)| async move {
                match provisioner {
                    Some(provisioner) => provisioner.deprovision(resource, policy).await,
                    None => Err(StatusFailure::fatal(format!(
                        "no provisioner can deprovision resource '{}'",
                        resource.id
                    ))),
                }
            });
        join_all(futures).await
    }

    fn provisioner_for(&self, definition: &ResourceDefinition) -> Option<Arc<dyn Provisioner>> {
        self.provisioners
            .read()
            .iter()
            .find(|provisioner| provisioner.can_provision(definition))
            .cloned()
    }

    fn deprovisioner_for(&self, resource: &ProvisionedResource) -> Option<Arc<dyn Provisioner>> {
        self.provisioners
            .read()
            .iter()
            .find(|provisioner| provisioner.can_deprovision(resource))
            .cloned()
    }
}
