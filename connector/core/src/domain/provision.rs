// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Resource Provisioning Records
//!
//! Data types describing what a transfer process must provision before data
//! can flow, and what has been provisioned or torn down so far. Resource
//! definitions are tagged by a `kind` string instead of subclassing; the
//! payload each provisioner understands travels as raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Address of a data source or destination, tagged by transport kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataAddress {
    pub kind: String,
    #[serde(default)]
    pub properties: Value,
}

impl DataAddress {
    pub fn new(kind: impl Into<String>, properties: Value) -> Self {
        Self {
            kind: kind.into(),
            properties,
        }
    }
}

/// One provisioning task a transfer process must complete. `kind` selects
/// the provisioner; `attributes` is the provisioner-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub attributes: Value,
}

impl ResourceDefinition {
    pub fn new(kind: impl Into<String>, attributes: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            attributes,
        }
    }
}

/// Ordered set of resource definitions a transfer process must provision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub definitions: Vec<ResourceDefinition>,
}

impl ResourceManifest {
    pub fn new(definitions: Vec<ResourceDefinition>) -> Self {
        Self { definitions }
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

/// A resource successfully allocated for a definition in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedResource {
    pub id: String,
    pub resource_definition_id: String,
    pub kind: String,
    /// Set when the resource is a data destination usable for the transfer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_address: Option<DataAddress>,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ProvisionedResource {
    /// Vault key under which a secret token issued for this resource is
    /// stored.
    pub fn token_secret_name(&self) -> String {
        format!("{}-token", self.id)
    }
}

/// Short-lived credential issued by a provisioner alongside a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretToken {
    pub token: String,
}

/// Outcome of one provisioner invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<ProvisionedResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_token: Option<SecretToken>,
    /// True when provisioning continues asynchronously outside the
    /// connector; a later response will carry the resource.
    #[serde(default)]
    pub in_process: bool,
}

impl ProvisionResponse {
    pub fn completed(resource: ProvisionedResource) -> Self {
        Self {
            resource: Some(resource),
            secret_token: None,
            in_process: false,
        }
    }

    pub fn with_token(resource: ProvisionedResource, token: SecretToken) -> Self {
        Self {
            resource: Some(resource),
            secret_token: Some(token),
            in_process: false,
        }
    }

    pub fn in_process() -> Self {
        Self {
            resource: None,
            secret_token: None,
            in_process: true,
        }
    }
}

/// Terminal record of a resource teardown attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeprovisionedResource {
    pub provisioned_resource_id: String,
    #[serde(default)]
    pub in_process: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl DeprovisionedResource {
    pub fn completed(provisioned_resource_id: impl Into<String>) -> Self {
        Self {
            provisioned_resource_id: provisioned_resource_id.into(),
            in_process: false,
            error: false,
            error_message: None,
        }
    }

    pub fn failed(
        provisioned_resource_id: impl Into<String>,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            provisioned_resource_id: provisioned_resource_id.into(),
            in_process: false,
            error: true,
            error_message: Some(error_message.into()),
        }
    }
}
