// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! In-memory [`PolicyArchive`] mapping contract ids to their agreed usage
//! policies. Production deployments back this with the contract store.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::policy::Policy;
use crate::domain::repository::PolicyArchive;

#[derive(Default)]
pub struct InMemoryPolicyArchive {
    policies: DashMap<String, Policy>,
}

impl InMemoryPolicyArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, contract_id: impl Into<String>, policy: Policy) {
        self.policies.insert(contract_id.into(), policy);
    }
}

#[async_trait]
impl PolicyArchive for InMemoryPolicyArchive {
    async fn find_policy(&self, contract_id: &str) -> Option<Policy> {
        self.policies.get(contract_id).map(|entry| entry.value().clone())
    }
}
