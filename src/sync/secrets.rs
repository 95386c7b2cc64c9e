// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Converges managed Secrets to the state declared by PassSecrets.
//!
//! Every public handler runs under the event queue of its PassSecret, so at most
//! one handler mutates a given managed Secret at a time.

use super::manager::SyncEvent;
use crate::error::{Result, StoreError};
use crate::kubernetes::SecretStore;
use crate::locks::{EventQueues, LockPolicy};
use crate::pass::PasswordStore;
use crate::types::managed_secret::{ManagedSecret, SecretDiff, SecretRef};
use crate::types::pass_secret::PassSecret;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What a handler did to the managed Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    /// The old target was deleted and the new one created
    Moved,
    Deleted,
    /// Target already matched, or was already gone on delete
    Unchanged,
    /// Target data differs but the target is immutable
    ImmutableSkipped,
    /// The event was not admitted to its queue
    Dropped,
}

pub struct SecretSyncer {
    secrets: Arc<dyn SecretStore>,
    password_store: Arc<PasswordStore>,
    queues: Arc<EventQueues>,
    max_backlog: usize,
}

impl SecretSyncer {
    pub fn new(
        secrets: Arc<dyn SecretStore>,
        password_store: Arc<PasswordStore>,
        queues: Arc<EventQueues>,
        max_backlog: usize,
    ) -> Self {
        Self {
            secrets,
            password_store,
            queues,
            max_backlog,
        }
    }

    pub fn queues(&self) -> &Arc<EventQueues> {
        &self.queues
    }

    /// Policy for watch events: queue up behind earlier events
    pub fn strict(&self) -> LockPolicy {
        LockPolicy::wait(self.max_backlog)
    }

    /// Policy for reconcile ticks: skip when anything else is in line
    pub fn best_effort(&self) -> LockPolicy {
        LockPolicy::skip_if_busy(self.max_backlog)
    }

    pub async fn on_create(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        self.serialized(ps, self.strict(), || self.create(ps)).await
    }

    pub async fn on_update(&self, old: &PassSecret, new: &PassSecret) -> Result<SyncOutcome> {
        self.serialized(new, self.strict(), || self.update(old, new)).await
    }

    pub async fn on_delete(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        self.serialized(ps, self.strict(), || self.delete(ps)).await
    }

    pub async fn on_resume(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        self.serialized(ps, self.strict(), || self.resume(ps)).await
    }

    pub async fn on_reconcile_tick(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        self.serialized(ps, self.best_effort(), || self.reconcile(ps)).await
    }

    async fn serialized<F, Fut>(&self, ps: &PassSecret, policy: LockPolicy, handler: F) -> Result<SyncOutcome>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SyncOutcome>>,
    {
        Ok(self
            .queues
            .with_lock(&ps.event_key(), policy, handler)
            .await?
            .unwrap_or(SyncOutcome::Dropped))
    }

    /// Handle a watch event. The caller must already hold the event's queue slot.
    pub(crate) async fn handle(&self, event: &SyncEvent) -> Result<SyncOutcome> {
        match event {
            SyncEvent::Created(ps) => self.create(ps).await,
            SyncEvent::Updated { old, new } => self.update(old, new).await,
            SyncEvent::Deleted(ps) => self.delete(ps).await,
            SyncEvent::Resumed(ps) => self.resume(ps).await,
        }
    }

    /// Decrypt the desired secret. The password store is only held while
    /// decrypting, never across API calls.
    async fn desired(&self, ps: &PassSecret) -> Result<ManagedSecret> {
        let checkout = self.password_store.checkout().await?;
        ps.materialize(&checkout).await
    }

    #[instrument(skip(self, ps), fields(passsecret = %ps.event_key()))]
    pub(crate) async fn create(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        let target = ps.target()?;
        let desired = self.desired(ps).await?;
        self.secrets.create(&target, &desired).await?;
        info!("Created managed secret {}", target);
        Ok(SyncOutcome::Created)
    }

    #[instrument(skip(self, old, new), fields(passsecret = %new.event_key()))]
    pub(crate) async fn update(&self, old: &PassSecret, new: &PassSecret) -> Result<SyncOutcome> {
        let target = new.target()?;
        let desired = self.desired(new).await?;

        let previous = match old.target() {
            Ok(previous) => Some(previous),
            Err(e) => {
                debug!("Previous version has no usable target: {}", e);
                None
            }
        };

        match previous {
            Some(previous) if previous != target => {
                info!("Managed secret moved from {} to {}", previous, target);
                info!("Deleting {}", previous);
                self.remove(&previous).await?;
                info!("Creating {}", target);
                match self.secrets.create(&target, &desired).await {
                    Ok(()) => Ok(SyncOutcome::Moved),
                    Err(StoreError::AlreadyExists(_)) => self.adopt(new, &target, &desired).await,
                    Err(e) => Err(e.into()),
                }
            }
            _ => self.write_in_place(&target, &desired).await,
        }
    }

    /// Take over an existing rename target, but only one written for `ps`
    async fn adopt(&self, ps: &PassSecret, target: &SecretRef, desired: &ManagedSecret) -> Result<SyncOutcome> {
        let current = self.secrets.read(target).await?;
        if !ps.owns(&current) {
            warn!("Managed secret {} already exists and belongs to someone else", target);
            return Err(StoreError::AlreadyExists(target.to_string()).into());
        }

        debug!("Managed secret {} was written by an earlier attempt, taking it over", target);
        self.write_in_place(target, desired).await?;
        Ok(SyncOutcome::Moved)
    }

    #[instrument(skip(self, ps), fields(passsecret = %ps.event_key()))]
    pub(crate) async fn delete(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        let target = ps.target()?;
        if self.remove(&target).await? {
            Ok(SyncOutcome::Deleted)
        } else {
            Ok(SyncOutcome::Unchanged)
        }
    }

    /// Handle an object from the initial listing: create the target if it is
    /// missing, otherwise converge it like a tick
    #[instrument(skip(self, ps), fields(passsecret = %ps.event_key()))]
    pub(crate) async fn resume(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        let target = ps.target()?;
        let desired = self.desired(ps).await?;

        match self.secrets.read(&target).await {
            Ok(current) => self.converge(&target, &current, &desired).await,
            Err(StoreError::NotFound(_)) => {
                info!("Managed secret {} does not exist, creating", target);
                self.secrets.create(&target, &desired).await?;
                Ok(SyncOutcome::Created)
            }
            Err(StoreError::Invalid(_, e)) => {
                warn!("Managed secret {} is unreadable ({}), overwriting", target, e);
                self.write(&target, &desired).await
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, ps), fields(passsecret = %ps.event_key()))]
    pub(crate) async fn reconcile(&self, ps: &PassSecret) -> Result<SyncOutcome> {
        let target = ps.target()?;
        let desired = self.desired(ps).await?;

        match self.secrets.read(&target).await {
            Ok(current) => self.converge(&target, &current, &desired).await,
            Err(StoreError::Invalid(_, e)) => {
                warn!("Managed secret {} is unreadable ({}), overwriting", target, e);
                self.write(&target, &desired).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn converge(
        &self,
        target: &SecretRef,
        current: &ManagedSecret,
        desired: &ManagedSecret,
    ) -> Result<SyncOutcome> {
        match ManagedSecret::diff(current, desired) {
            SecretDiff::Equal => {
                debug!("Managed secret {} is up to date", target);
                Ok(SyncOutcome::Unchanged)
            }
            SecretDiff::DataChanged if current.immutable => {
                warn!(
                    "Managed secret {} is immutable and its data differs, not updating",
                    target
                );
                Ok(SyncOutcome::ImmutableSkipped)
            }
            SecretDiff::DataChanged => {
                info!("Managed secret {} data changed, updating", target);
                self.write(target, desired).await
            }
        }
    }

    /// Update the target in place, carrying metadata changes even when the data
    /// is unchanged. A missing target is created.
    async fn write_in_place(&self, target: &SecretRef, desired: &ManagedSecret) -> Result<SyncOutcome> {
        match self.secrets.read(target).await {
            Ok(current)
                if current.immutable
                    && ManagedSecret::diff(&current, desired) == SecretDiff::DataChanged =>
            {
                warn!(
                    "Managed secret {} is immutable and its data differs, not updating",
                    target
                );
                Ok(SyncOutcome::ImmutableSkipped)
            }
            Ok(_) | Err(StoreError::Invalid(..)) => self.write(target, desired).await,
            Err(StoreError::NotFound(_)) => {
                info!("Managed secret {} does not exist, creating", target);
                self.secrets.create(target, desired).await?;
                Ok(SyncOutcome::Created)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Patch the target, creating it if it vanished in the meantime
    async fn write(&self, target: &SecretRef, desired: &ManagedSecret) -> Result<SyncOutcome> {
        match self.secrets.patch(target, desired).await {
            Ok(()) => Ok(SyncOutcome::Updated),
            Err(StoreError::NotFound(_)) => {
                info!("Managed secret {} disappeared, creating", target);
                self.secrets.create(target, desired).await?;
                Ok(SyncOutcome::Created)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the target. Returns false if it was already gone.
    async fn remove(&self, target: &SecretRef) -> Result<bool> {
        match self.secrets.delete(target).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound(_)) => {
                info!("Managed secret {} already deleted", target);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
