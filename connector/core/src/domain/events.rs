// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Workflow Listeners
//!
//! Typed callbacks fired synchronously after each committed state
//! transition. Listeners are the only externally observable signal the core
//! emits; they run on the engine task, after the store write, exactly once
//! per handled batch.

use parking_lot::RwLock;
use std::sync::Arc;

use crate::domain::negotiation::ContractNegotiation;
use crate::domain::transfer::TransferProcess;

/// Observer of contract negotiation transitions. All methods default to
/// no-ops so implementors only override what they care about.
#[allow(unused_variables)]
pub trait NegotiationListener: Send + Sync {
    fn initiated(&self, negotiation: &ContractNegotiation) {}
    fn requested(&self, negotiation: &ContractNegotiation) {}
    fn accepted(&self, negotiation: &ContractNegotiation) {}
    fn agreed(&self, negotiation: &ContractNegotiation) {}
    fn verified(&self, negotiation: &ContractNegotiation) {}
    fn terminated(&self, negotiation: &ContractNegotiation) {}
}

/// Observer of transfer process transitions.
#[allow(unused_variables)]
pub trait TransferListener: Send + Sync {
    fn initiated(&self, process: &TransferProcess) {}
    fn provisioning_requested(&self, process: &TransferProcess) {}
    fn provisioned(&self, process: &TransferProcess) {}
    fn requested(&self, process: &TransferProcess) {}
    fn completed(&self, process: &TransferProcess) {}
    fn deprovisioning_requested(&self, process: &TransferProcess) {}
    fn deprovisioned(&self, process: &TransferProcess) {}
    fn terminated(&self, process: &TransferProcess) {}
}

/// Registry of negotiation listeners, invoked in registration order.
#[derive(Default)]
pub struct NegotiationObservable {
    listeners: RwLock<Vec<Arc<dyn NegotiationListener>>>,
}

impl NegotiationObservable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn NegotiationListener>) {
        self.listeners.write().push(listener);
    }

    pub fn invoke(&self, f: impl Fn(&dyn NegotiationListener)) {
        for listener in self.listeners.read().iter() {
            f(listener.as_ref());
        }
    }
}

/// Registry of transfer listeners, invoked in registration order.
#[derive(Default)]
pub struct TransferObservable {
    listeners: RwLock<Vec<Arc<dyn TransferListener>>>,
}

impl TransferObservable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, listener: Arc<dyn TransferListener>) {
        self.listeners.write().push(listener);
    }

    pub fn invoke(&self, f: impl Fn(&dyn TransferListener)) {
        for listener in self.listeners.read().iter() {
            f(listener.as_ref());
        }
    }
}
