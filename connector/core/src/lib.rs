// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Trellis Connector Core
//!
//! Control-plane core of the Trellis dataspace connector: the distributed
//! state machine engine driving contract negotiations and transfer
//! processes across connector replicas, and the policy evaluation engine
//! gating resource provisioning.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **`domain`** — workflow entities, the usage-policy tree, store and
//!   dispatcher contracts
//! - **`application`** — the state machine engine, retry policy,
//!   negotiation/transfer managers, provisioning and policy evaluation
//! - **`infrastructure`** — in-memory backends and configuration
//!
//! Replicas coordinate exclusively through the store's lease primitive:
//! every transition is poll → lease → handle → persist-and-release, so at
//! most one worker drives a given entity at any instant and a crashed
//! worker's entity resumes from its last persisted state elsewhere.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
