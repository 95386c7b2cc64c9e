// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Run a handler under the per-object queue of its EventKey.

use super::queues::{Admission, EventId, EventKey, EventQueues};
use crate::error::Result;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

/// How a handler takes its place in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Wait behind earlier events; when false, skip if anything is queued
    pub wait: bool,
    /// Queue capacity for this call, 0 means unbounded
    pub max_backlog: usize,
}

impl LockPolicy {
    /// Strict-serial: queue up behind earlier events, waiting for room if full
    pub fn wait(max_backlog: usize) -> Self {
        Self {
            wait: true,
            max_backlog,
        }
    }

    /// Best effort: give up if another event is already in line
    pub fn skip_if_busy(max_backlog: usize) -> Self {
        Self {
            wait: false,
            max_backlog,
        }
    }
}

/// Outcome of a non-blocking attempt to take a place in a queue
pub enum Entry {
    Admitted(EventSlot),
    /// The queue is at capacity and the policy allows waiting for room
    Full,
    /// Dropped by the policy, or because the queue is draining
    Dropped,
}

/// A place in a queue, held from admission until the handler completes.
///
/// Dropping a slot whose handler never ran withdraws the event, so a cancelled
/// waiter never wedges the queue.
pub struct EventSlot {
    queues: Arc<EventQueues>,
    key: EventKey,
    id: EventId,
    running: bool,
    released: bool,
}

impl EventSlot {
    pub fn key(&self) -> &EventKey {
        &self.key
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    /// Wait until every earlier event for the key has completed, then run
    /// `handler`. Handler errors are returned untouched; a release out of order
    /// takes precedence over the handler's result.
    pub async fn run<F, Fut, T>(mut self, handler: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.queues.wait_for_head(&self.key, self.id).await;
        self.running = true;

        let outcome = handler().await;
        self.released = true;
        self.queues.release(&self.key, self.id)?;
        outcome
    }
}

impl Drop for EventSlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if !self.running {
            self.queues.withdraw(&self.key, self.id);
            return;
        }
        if let Err(e) = self.queues.release(&self.key, self.id) {
            error!("{}", e);
            if !std::thread::panicking() {
                panic!("{e}");
            }
        }
    }
}

impl EventQueues {
    /// Run `handler` once every earlier event for `key` has completed.
    ///
    /// Returns `Ok(None)` when the event was dropped by the policy or because
    /// the queue is draining; the handler is not called in that case.
    pub async fn with_lock<F, Fut, T>(
        self: &Arc<Self>,
        key: &EventKey,
        policy: LockPolicy,
        handler: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let Some(slot) = self.enter(key, policy).await else {
            return Ok(None);
        };
        slot.run(handler).await.map(Some)
    }

    /// Take a place at the tail of the queue for `key`.
    ///
    /// Admission order is submission order: callers that must keep events in
    /// sequence enter before handing the slot to a task. With `policy.wait` a
    /// full queue is waited on; `None` means the event was dropped.
    pub async fn enter(self: &Arc<Self>, key: &EventKey, policy: LockPolicy) -> Option<EventSlot> {
        let id = Uuid::new_v4();
        loop {
            match self.admit_as(key, id, policy) {
                Entry::Admitted(slot) => return Some(slot),
                Entry::Dropped => return None,
                Entry::Full => {}
            }

            // A full queue is never evicted, so it is normally still there
            let Some(changed) = self.notifier(key) else {
                continue;
            };
            let notified = changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_full(key, &changed, policy.max_backlog) {
                debug!("Backlog for {} is full, event {} waiting for room", key, id);
                notified.await;
            }
        }
    }

    /// Like `enter`, but reports a full queue instead of waiting for room
    pub fn try_enter(self: &Arc<Self>, key: &EventKey, policy: LockPolicy) -> Entry {
        self.admit_as(key, Uuid::new_v4(), policy)
    }

    fn admit_as(self: &Arc<Self>, key: &EventKey, id: EventId, policy: LockPolicy) -> Entry {
        match self.admit(key, id, policy.wait, policy.max_backlog) {
            Admission::Admitted => Entry::Admitted(EventSlot {
                queues: self.clone(),
                key: key.clone(),
                id,
                running: false,
                released: false,
            }),
            Admission::Busy => {
                info!("{} is already being handled, skipping event {}", key, id);
                Entry::Dropped
            }
            Admission::Full if !policy.wait => {
                info!(
                    "Backlog for {} is full ({} events), skipping event {}",
                    key, policy.max_backlog, id
                );
                Entry::Dropped
            }
            Admission::Full => Entry::Full,
            Admission::Locked => {
                info!("Queue for {} is draining, dropping event {}", key, id);
                Entry::Dropped
            }
        }
    }

    async fn wait_for_head(&self, key: &EventKey, id: EventId) {
        // The slot keeps its queue alive; a missing queue surfaces on release
        let Some(changed) = self.notifier(key) else {
            return;
        };
        loop {
            let notified = changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_head(key, id) {
                return;
            }
            debug!("{} is already blocked, event {} waiting", key, id);
            notified.await;
        }
    }
}
