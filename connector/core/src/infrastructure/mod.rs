// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure layer: in-memory backends for the store, vault and
//! registry seams, plus configuration loading. Production deployments swap
//! the in-memory backends for persistent ones at startup.

pub mod config;
pub mod policy_archive;
pub mod profile_registry;
pub mod repositories;
pub mod vault;

pub use config::{ConnectorConfig, RetryConfig, StateMachineConfig};
pub use policy_archive::InMemoryPolicyArchive;
pub use profile_registry::DataspaceProfileContextRegistry;
pub use repositories::{InMemoryEntityStore, InMemoryNegotiationStore, InMemoryTransferProcessStore};
pub use vault::{InMemoryVault, Vault, VaultError};
