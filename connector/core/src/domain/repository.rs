// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Lease-Aware Store Contracts
//!
//! Persistence contract for stateful workflow entities. One store per
//! entity kind, interface defined here, implemented in
//! `crate::infrastructure::repositories`.
//!
//! The store is the single shared mutable resource in the system; all
//! cross-replica coordination goes through its lease primitive:
//!
//! | Operation | Lease effect |
//! |-----------|--------------|
//! | `next_not_leased` | acquires a lease on every returned entity |
//! | `save` | persists and releases the lease in the same write |
//! | `release` | breaks the lease without touching the entity |
//!
//! `next_not_leased` only ever returns entities that are in the requested
//! state, not flagged pending, and not under a valid lease. Leases carry a
//! finite TTL so a crashed worker's claim is eventually reclaimed.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entity::StatefulEntity;
use crate::domain::policy::Policy;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found: {0}")]
    NotFound(String),

    #[error("entity already exists: {0}")]
    Duplicate(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Lease-aware persistence for one stateful entity kind.
#[async_trait]
pub trait StateEntityStore<E: StatefulEntity>: Send + Sync {
    /// Insert a new entity. Fails with [`StoreError::Duplicate`] when the id
    /// is already taken.
    async fn create(&self, entity: E) -> Result<(), StoreError>;

    /// Return up to `limit` entities in `state` that are neither pending nor
    /// leased, oldest state timestamp first, atomically leasing each one.
    async fn next_not_leased(&self, limit: usize, state: i32) -> Result<Vec<E>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<E>, StoreError>;

    /// Persist the entity and release its lease in one step.
    async fn save(&self, entity: E) -> Result<(), StoreError>;

    /// Break the lease without changing the entity. Used when a handler
    /// fails unexpectedly and the entity must be retried from unchanged
    /// state next cycle.
    async fn release(&self, id: &str) -> Result<(), StoreError>;
}

/// Resolves the usage policy bound to a contract id. Backed by the contract
/// store outside this core; an in-memory implementation ships in
/// `crate::infrastructure`.
#[async_trait]
pub trait PolicyArchive: Send + Sync {
    async fn find_policy(&self, contract_id: &str) -> Option<Policy>;
}
