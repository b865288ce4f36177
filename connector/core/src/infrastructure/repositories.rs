// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # In-Memory Lease-Aware Stores
//!
//! In-memory implementation of [`StateEntityStore`] for development and
//! testing; production deployments select a SQL-backed implementation at
//! startup. Lease semantics are identical across backends: `next_not_leased`
//! acquires, `save` persists-and-releases, `release` breaks the claim, and
//! an expired lease is reclaimable by any worker.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::domain::entity::StatefulEntity;
use crate::domain::negotiation::ContractNegotiation;
use crate::domain::repository::{StateEntityStore, StoreError};
use crate::domain::transfer::TransferProcess;

/// Time-boxed exclusive claim on one entity.
#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    acquired_at: DateTime<Utc>,
    ttl: Duration,
}

impl Lease {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.acquired_at + self.ttl
    }
}

struct StoredEntry<E> {
    entity: E,
    lease: Option<Lease>,
}

/// Generic in-memory store for one stateful entity kind.
pub struct InMemoryEntityStore<E> {
    /// Lease holder identity recorded for diagnostics; exclusivity itself
    /// comes from the single entry map.
    holder_name: String,
    lease_ttl: Duration,
    entries: Mutex<HashMap<String, StoredEntry<E>>>,
}

pub type InMemoryNegotiationStore = InMemoryEntityStore<ContractNegotiation>;
pub type InMemoryTransferProcessStore = InMemoryEntityStore<TransferProcess>;

impl<E: StatefulEntity> InMemoryEntityStore<E> {
    pub fn new(holder_name: impl Into<String>, lease_ttl: std::time::Duration) -> Self {
        Self {
            holder_name: holder_name.into(),
            lease_ttl: Duration::from_std(lease_ttl).unwrap_or_else(|_| Duration::seconds(60)),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True while some worker holds a valid lease on the entity.
    pub fn is_leased(&self, id: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(id)
            .and_then(|entry| entry.lease.as_ref())
            .is_some_and(|lease| !lease.expired(Utc::now()))
    }
}

#[async_trait]
impl<E: StatefulEntity> StateEntityStore<E> for InMemoryEntityStore<E> {
    async fn create(&self, entity: E) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let id = entity.id().to_string();
        if entries.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        entries.insert(
            id,
            StoredEntry {
                entity,
                lease: None,
            },
        );
        Ok(())
    }

    async fn next_not_leased(&self, limit: usize, state: i32) -> Result<Vec<E>, StoreError> {
        let now = Utc::now();
        let mut entries = self.entries.lock();

        let mut candidates: Vec<&str> = entries
            .iter()
            .filter(|(_, entry)| {
                entry.entity.state_code() == state
                    && !entry.entity.is_pending()
                    && entry.lease.as_ref().is_none_or(|lease| lease.expired(now))
            })
            .map(|(id, _)| id.as_str())
            .collect();
        candidates.sort_by_key(|id| {
            entries
                .get(*id)
                .map(|entry| entry.entity.state_timestamp())
                .unwrap_or(now)
        });
        let selected: Vec<String> = candidates
            .into_iter()
            .take(limit)
            .map(str::to_string)
            .collect();

        let mut leased = Vec::with_capacity(selected.len());
        for id in selected {
            if let Some(entry) = entries.get_mut(&id) {
                entry.lease = Some(Lease {
                    holder: self.holder_name.clone(),
                    acquired_at: now,
                    ttl: self.lease_ttl,
                });
                leased.push(entry.entity.clone());
            }
        }
        Ok(leased)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError> {
        let entries = self.entries.lock();
        Ok(entries.get(id).map(|entry| entry.entity.clone()))
    }

    async fn save(&self, entity: E) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let id = entity.id().to_string();
        entries.insert(
            id,
            StoredEntry {
                entity,
                lease: None,
            },
        );
        Ok(())
    }

    async fn release(&self, id: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        entry.lease = None;
        Ok(())
    }
}
