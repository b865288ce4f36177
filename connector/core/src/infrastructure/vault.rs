// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Secret Vault
//!
//! Keymaster seam for provisioned credentials: only the control plane talks
//! to the vault; provisioned secrets are referenced by name everywhere
//! else. The response handlers write and delete secrets here as part of the
//! handler invocation, after the governing transition was decided — a crash
//! between the vault write and the store persist can leave an orphaned
//! secret, which is accepted because writes are idempotent per derived name
//! and the handler re-runs on lease expiry.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault backend error: {0}")]
    Backend(String),
}

/// Secret storage contract. Backed by a real secret store outside this
/// core; the in-memory implementation serves development and tests.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn store_secret(&self, name: &str, value: &str) -> Result<(), VaultError>;

    /// Deleting an absent secret is a no-op, not an error.
    async fn delete_secret(&self, name: &str) -> Result<(), VaultError>;

    async fn resolve_secret(&self, name: &str) -> Result<Option<String>, VaultError>;
}

/// In-memory vault for development and testing.
#[derive(Default)]
pub struct InMemoryVault {
    secrets: DashMap<String, String>,
}

impl InMemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl Vault for InMemoryVault {
    async fn store_secret(&self, name: &str, value: &str) -> Result<(), VaultError> {
        self.secrets.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete_secret(&self, name: &str) -> Result<(), VaultError> {
        self.secrets.remove(name);
        Ok(())
    }

    async fn resolve_secret(&self, name: &str) -> Result<Option<String>, VaultError> {
        Ok(self.secrets.get(name).map(|entry| entry.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_resolve_delete_round_trip() {
        let vault = InMemoryVault::new();
        vault.store_secret("res-1-token", "s3cr3t").await.unwrap();
        assert_eq!(
            vault.resolve_secret("res-1-token").await.unwrap(),
            Some("s3cr3t".to_string())
        );

        vault.delete_secret("res-1-token").await.unwrap();
        assert_eq!(vault.resolve_secret("res-1-token").await.unwrap(), None);

        // Deleting again stays a no-op.
        vault.delete_secret("res-1-token").await.unwrap();
    }
}
