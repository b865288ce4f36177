// Copyright (c) 2026 Trellis Systems
// SPDX-License-Identifier: AGPL-3.0

//! # State Machine Engine
//!
//! Generic poll → lease → handle → persist loop driving one stateful entity
//! kind.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Drive workflow entities through their states across a
//!   fleet of connector replicas
//! - **Dependencies:** Domain (`StatefulEntity`, `StateEntityStore`)
//!
//! # Cycle
//!
//! ```text
//! for each registered processor (declared order) {
//!     batch = store.next_not_leased(batch_size, processor.state)   // leases
//!     for entity in batch {
//!         pending guard fired?   -> persist pending = true, skip handler
//!         inside backoff window? -> release lease, skip handler
//!         handler(entity)        -> save (releases lease), then post actions
//!         handler errored?       -> log, release lease, state untouched
//!     }
//! }
//! nothing processed this cycle -> sleep iteration_wait, else loop again
//! ```
//!
//! The store's lease primitive guarantees at most one worker system-wide
//! holds an entity; `save` releases the lease as part of the same write, so
//! transitions for one entity are strictly sequential. Stopping the engine
//! lets the in-flight cycle finish and persist normally.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::application::pending_guard::PendingGuard;
use crate::application::retry::EntityRetryProcessConfiguration;
use crate::domain::entity::StatefulEntity;
use crate::domain::repository::StateEntityStore;
use std::time::Duration;

/// Callback run after the engine committed a handler's transition; carries
/// the listener notifications so they fire exactly once, post-persist.
pub type PostAction = Box<dyn FnOnce() + Send>;

/// Outcome of a handler invocation: the entity to persist plus optional
/// post-commit notifications.
pub struct ProcessUpdate<E> {
    pub entity: E,
    pub post: Option<PostAction>,
}

impl<E> ProcessUpdate<E> {
    pub fn new(entity: E) -> Self {
        Self { entity, post: None }
    }

    pub fn with_post(entity: E, post: impl FnOnce() + Send + 'static) -> Self {
        Self {
            entity,
            post: Some(Box::new(post)),
        }
    }
}

/// Handler for entities in one state. Implementations never touch the
/// store; the engine owns persistence. An `Err` is an *unexpected* failure:
/// the engine logs it, releases the lease and leaves the entity unchanged —
/// classified dispatch failures must be expressed as state instead.
#[async_trait::async_trait]
pub trait StateHandler<E>: Send + Sync {
    async fn handle(&self, entity: E) -> Result<ProcessUpdate<E>>;
}

/// One registered `(state, handler)` pair.
pub struct Processor<E> {
    state: i32,
    name: &'static str,
    handler: Arc<dyn StateHandler<E>>,
    guard: Option<Arc<dyn PendingGuard<E>>>,
}

impl<E> Processor<E> {
    pub fn new(state: i32, name: &'static str, handler: Arc<dyn StateHandler<E>>) -> Self {
        Self {
            state,
            name,
            handler,
            guard: None,
        }
    }

    pub fn with_guard(mut self, guard: Arc<dyn PendingGuard<E>>) -> Self {
        self.guard = Some(guard);
        self
    }
}

struct EngineInner<E: StatefulEntity> {
    name: String,
    store: Arc<dyn StateEntityStore<E>>,
    processors: Vec<Processor<E>>,
    batch_size: usize,
    iteration_wait: Duration,
    retry: EntityRetryProcessConfiguration,
}

impl<E: StatefulEntity> EngineInner<E> {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(machine = %self.name, "State machine started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let processed = self.cycle().await;
            if processed == 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.iteration_wait) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!(machine = %self.name, "State machine stopped");
    }

    async fn cycle(&self) -> usize {
        let mut processed = 0;
        for processor in &self.processors {
            let batch = match self.store.next_not_leased(self.batch_size, processor.state).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(
                        machine = %self.name,
                        state = processor.name,
                        error = %e,
                        "Failed to poll store"
                    );
                    continue;
                }
            };
            for entity in batch {
                processed += self.process_entity(processor, entity).await;
            }
        }
        processed
    }

    async fn process_entity(&self, processor: &Processor<E>, mut entity: E) -> usize {
        let entity_id = entity.id().to_string();

        if let Some(guard) = &processor.guard {
            if guard.test(&entity) {
                debug!(
                    machine = %self.name,
                    entity_id = %entity_id,
                    state = processor.name,
                    "Entity diverted to pending"
                );
                entity.set_pending(true);
                if let Err(e) = self.store.save(entity).await {
                    error!(entity_id = %entity_id, error = %e, "Failed to persist pending flag");
                }
                return 1;
            }
        }

        if !self.retry.retry_due(&entity) {
            // Still inside the backoff window; hand the entity back.
            self.release(&entity_id).await;
            return 0;
        }

        match processor.handler.handle(entity).await {
            Ok(update) => {
                match self.store.save(update.entity).await {
                    Ok(()) => {
                        if let Some(post) = update.post {
                            post();
                        }
                    }
                    Err(e) => {
                        error!(
                            machine = %self.name,
                            entity_id = %entity_id,
                            error = %e,
                            "Failed to persist entity after handler"
                        );
                    }
                }
                1
            }
            Err(e) => {
                // Unexpected failure: state and retry counter untouched, the
                // entity is picked up again next cycle.
                error!(
                    machine = %self.name,
                    entity_id = %entity_id,
                    state = processor.name,
                    error = %format!("{e:#}"),
                    "Unexpected handler failure"
                );
                self.release(&entity_id).await;
                1
            }
        }
    }

    async fn release(&self, entity_id: &str) {
        if let Err(e) = self.store.release(entity_id).await {
            error!(entity_id = %entity_id, error = %e, "Failed to release lease");
        }
    }
}

/// Engine driving one entity kind. Managers construct it with their
/// processor list and delegate `start`/`stop`.
pub struct StateMachine<E: StatefulEntity> {
    inner: Arc<EngineInner<E>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl<E: StatefulEntity> StateMachine<E> {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn StateEntityStore<E>>,
        processors: Vec<Processor<E>>,
        batch_size: usize,
        iteration_wait: Duration,
        retry: EntityRetryProcessConfiguration,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                name: name.into(),
                store,
                processors,
                batch_size,
                iteration_wait,
                retry,
            }),
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Spawn the background loop. Idempotent while running.
    pub fn start(&mut self) {
        if self.shutdown_tx.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        self.handle = Some(tokio::spawn(inner.run(rx)));
        self.shutdown_tx = Some(tx);
    }

    /// Signal shutdown and wait for the loop to drain its current cycle.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!(machine = %self.inner.name, error = %e, "State machine task failed");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }
}
