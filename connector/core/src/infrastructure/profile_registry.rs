// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! Registry of dataspace profile contexts: for each protocol this connector
//! speaks, the webhook URL counterparties should call back on. The
//! negotiation and transfer managers resolve their callback address here
//! before dispatching; an unresolved protocol is a fatal failure for the
//! workflow that needed it.

use dashmap::DashMap;

/// Protocol → webhook registry. Populated at startup by the bootstrap
/// wiring, read by the managers.
#[derive(Default)]
pub struct DataspaceProfileContextRegistry {
    webhooks: DashMap<String, String>,
}

impl DataspaceProfileContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_webhook(&self, protocol: impl Into<String>, url: impl Into<String>) {
        self.webhooks.insert(protocol.into(), url.into());
    }

    pub fn get_webhook(&self, protocol: &str) -> Option<String> {
        self.webhooks.get(protocol).map(|entry| entry.value().clone())
    }
}
