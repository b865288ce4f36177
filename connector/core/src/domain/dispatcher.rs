// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # Remote Dispatch Contract
//!
//! Seam between the state machines and the protocol layer. A dispatcher
//! sends one protocol message to a counterparty and resolves to a
//! [`StatusResult`]; the failure status drives the managers' retry-vs-fatal
//! routing. Duplicate dispatch must be tolerated by the protocol: a worker
//! can die between dispatch and persist, and the entity is then re-run from
//! its last persisted state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::domain::messages::ProtocolMessage;

/// Classification of a failed remote interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// Protocol-level rejection or malformed response; retrying cannot help.
    FatalError,
    /// Transient failure (I/O, timeout); retry with backoff.
    ErrorRetry,
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseStatus::FatalError => write!(f, "fatal"),
            ResponseStatus::ErrorRetry => write!(f, "retryable"),
        }
    }
}

/// Failure half of a [`StatusResult`].
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{status} failure: {message}")]
pub struct StatusFailure {
    pub status: ResponseStatus,
    pub message: String,
}

impl StatusFailure {
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::FatalError,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::ErrorRetry,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.status == ResponseStatus::FatalError
    }
}

/// Async outcome carrying either content or a classified failure.
pub type StatusResult<T> = Result<T, StatusFailure>;

/// Acknowledgment returned by a counterparty for a dispatched message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchAck {
    /// The process id the counterparty assigned on its side, if announced.
    pub provider_pid: Option<String>,
}

/// Sends protocol messages to counterparties. Implemented by the protocol
/// layer (HTTP bindings) outside this core.
#[async_trait]
pub trait RemoteMessageDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        participant_context_id: &str,
        counter_party_address: &str,
        message: ProtocolMessage,
    ) -> StatusResult<DispatchAck>;
}
