// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-object FIFO queues of in-flight event ids.
//!
//! Every handler that touches a PassSecret takes a place in the queue for that
//! object and only runs once its id reaches the head. Queues for distinct
//! objects are independent.

use crate::error::{PassOperatorError, Result};
use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

pub type EventId = Uuid;

/// Identity of one logical object's serialization domain
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl EventKey {
    pub fn new(kind: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} \"{}\" in namespace \"{}\"", self.kind, self.name, self.namespace)
    }
}

/// Result of trying to take a place in a queue
#[derive(Debug)]
pub(crate) enum Admission {
    Admitted,
    /// Another event is already queued and the caller asked not to wait
    Busy,
    /// The queue is at capacity
    Full,
    /// The queue is draining for shutdown
    Locked,
}

#[derive(Debug, Default)]
struct Queue {
    event_ids: VecDeque<EventId>,
    locked: bool,
    changed: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Registry {
    queues: HashMap<EventKey, Queue>,
    /// Set by `drain_all`; keys seen for the first time afterwards are refused
    closed: bool,
}

/// Registry of event queues, one per EventKey.
///
/// Queues are created on first reference and dropped again once they are empty,
/// so the registry only ever holds objects with work in flight.
#[derive(Debug)]
pub struct EventQueues {
    registry: Mutex<Registry>,
    maxsize: usize,
}

impl Default for EventQueues {
    fn default() -> Self {
        Self::new(0)
    }
}

impl EventQueues {
    /// `maxsize` bounds every queue; 0 means unbounded
    pub fn new(maxsize: usize) -> Self {
        Self {
            registry: Mutex::new(Registry::default()),
            maxsize,
        }
    }

    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Place an event id at the tail of the queue. Returns false if the queue is
    /// locked or full.
    pub fn put(&self, key: &EventKey, event_id: EventId) -> bool {
        matches!(
            self.admit(key, event_id, true, self.maxsize),
            Admission::Admitted
        )
    }

    pub(crate) fn admit(
        &self,
        key: &EventKey,
        event_id: EventId,
        wait: bool,
        maxsize: usize,
    ) -> Admission {
        let mut registry = self.registry();
        if registry.closed && !registry.queues.contains_key(key) {
            return Admission::Locked;
        }

        let queue = registry.queues.entry(key.clone()).or_default();
        if queue.locked {
            return Admission::Locked;
        }
        if !wait && !queue.event_ids.is_empty() {
            return Admission::Busy;
        }
        if maxsize > 0 && queue.event_ids.len() >= maxsize {
            return Admission::Full;
        }

        debug!("Queueing event {} for {}", event_id, key);
        queue.event_ids.push_back(event_id);
        Admission::Admitted
    }

    /// Notification handle that fires whenever the queue for `key` changes.
    /// `None` when the key has no queue.
    pub(crate) fn notifier(&self, key: &EventKey) -> Option<Arc<Notify>> {
        self.registry().queues.get(key).map(|q| q.changed.clone())
    }

    /// True while the queue behind `changed` is still registered for `key` and
    /// holds at least `maxsize` events
    pub(crate) fn is_full(&self, key: &EventKey, changed: &Arc<Notify>, maxsize: usize) -> bool {
        self.registry().queues.get(key).is_some_and(|q| {
            Arc::ptr_eq(&q.changed, changed) && maxsize > 0 && q.event_ids.len() >= maxsize
        })
    }

    /// True iff the queue is non-empty and `event_id` is at its head
    pub fn is_head(&self, key: &EventKey, event_id: EventId) -> bool {
        self.registry()
            .queues
            .get(key)
            .and_then(|q| q.event_ids.front())
            .is_some_and(|head| *head == event_id)
    }

    pub fn qsize(&self, key: &EventKey) -> usize {
        self.registry()
            .queues
            .get(key)
            .map_or(0, |q| q.event_ids.len())
    }

    /// Keys that currently have a queue
    pub fn keys(&self) -> Vec<EventKey> {
        self.registry().queues.keys().cloned().collect()
    }

    /// Pop the head of the queue, which must be `event_id`.
    ///
    /// Anything else means handlers completed out of order and is reported as a
    /// fatal error. The offending id is still removed so the queue cannot wedge.
    pub fn release(&self, key: &EventKey, event_id: EventId) -> Result<()> {
        debug!("Lifting block on {}", key);
        let mut registry = self.registry();
        let Some(queue) = registry.queues.get_mut(key) else {
            return Err(order_violation(key, event_id, None));
        };

        let head = queue.event_ids.pop_front();
        let result = match head {
            Some(id) if id == event_id => Ok(()),
            other => {
                if let Some(id) = other {
                    queue.event_ids.push_front(id);
                }
                queue.event_ids.retain(|id| *id != event_id);
                Err(order_violation(key, event_id, other))
            }
        };

        queue.changed.notify_waiters();
        Self::evict_if_idle(&mut registry, key);
        result
    }

    /// Remove an event that never reached the head, e.g. a cancelled waiter
    pub(crate) fn withdraw(&self, key: &EventKey, event_id: EventId) {
        let mut registry = self.registry();
        if let Some(queue) = registry.queues.get_mut(key) {
            queue.event_ids.retain(|id| *id != event_id);
            queue.changed.notify_waiters();
        }
        Self::evict_if_idle(&mut registry, key);
    }

    fn evict_if_idle(registry: &mut Registry, key: &EventKey) {
        if registry
            .queues
            .get(key)
            .is_some_and(|q| q.event_ids.is_empty() && !q.locked)
        {
            registry.queues.remove(key);
        }
    }

    /// Refuse further events for `key` until the process exits
    pub fn lock(&self, key: &EventKey) {
        debug!("Locking queue for {}", key);
        let mut registry = self.registry();
        registry.queues.entry(key.clone()).or_default().locked = true;
    }

    /// Wait until a locked queue is empty
    pub async fn drain(&self, key: &EventKey) {
        let Some(changed) = self.notifier(key) else {
            return;
        };
        loop {
            let notified = changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.qsize(key) == 0 {
                debug!("Successfully drained queue for {}", key);
                return;
            }
            notified.await;
        }
    }

    /// Lock every known queue and wait for all of them to empty. New keys are
    /// refused from here on.
    pub async fn drain_all(&self) {
        let keys = {
            let mut registry = self.registry();
            registry.closed = true;
            for queue in registry.queues.values_mut() {
                queue.locked = true;
            }
            registry.queues.keys().cloned().collect::<Vec<_>>()
        };

        join_all(keys.iter().map(|key| self.drain(key))).await;
    }
}

fn order_violation(key: &EventKey, expected: EventId, found: Option<EventId>) -> PassOperatorError {
    PassOperatorError::QueueOrderViolation {
        key: key.clone(),
        expected: expected.to_string(),
        found: found.map(|id| id.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn key(name: &str) -> EventKey {
        EventKey::new("PassSecret", name, "default")
    }

    #[test]
    fn test_put_preserves_arrival_order() {
        let queues = EventQueues::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(queues.put(&key("db"), a));
        assert!(queues.put(&key("db"), b));

        assert!(queues.is_head(&key("db"), a));
        assert!(!queues.is_head(&key("db"), b));
        queues.release(&key("db"), a).unwrap();
        assert!(queues.is_head(&key("db"), b));
    }

    #[test]
    fn test_put_respects_maxsize() {
        let queues = EventQueues::new(2);

        assert!(queues.put(&key("db"), Uuid::new_v4()));
        assert!(queues.put(&key("db"), Uuid::new_v4()));
        assert!(!queues.put(&key("db"), Uuid::new_v4()));
        assert_eq!(queues.qsize(&key("db")), 2);

        // Other keys are unaffected
        assert!(queues.put(&key("api"), Uuid::new_v4()));
    }

    #[test]
    fn test_locked_queue_refuses_events() {
        let queues = EventQueues::default();
        queues.lock(&key("db"));

        assert!(!queues.put(&key("db"), Uuid::new_v4()));
    }

    #[test]
    fn test_release_out_of_order_is_a_violation() {
        let queues = EventQueues::default();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queues.put(&key("db"), a);
        queues.put(&key("db"), b);

        let err = queues.release(&key("db"), b).unwrap_err();

        assert!(err.is_fatal());
        // The head stays in place
        assert!(queues.is_head(&key("db"), a));
        assert_eq!(queues.qsize(&key("db")), 1);
    }

    #[test]
    fn test_release_on_unknown_key_is_a_violation() {
        let queues = EventQueues::default();
        let err = queues.release(&key("db"), Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, PassOperatorError::QueueOrderViolation { found: None, .. }));
    }

    #[test]
    fn test_empty_queues_are_evicted() {
        let queues = EventQueues::default();
        let id = Uuid::new_v4();
        queues.put(&key("db"), id);
        assert_eq!(queues.keys(), vec![key("db")]);

        queues.release(&key("db"), id).unwrap();

        assert!(queues.keys().is_empty());
    }

    #[test]
    fn test_withdraw_removes_waiting_event() {
        let queues = EventQueues::default();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        queues.put(&key("db"), a);
        queues.put(&key("db"), b);
        queues.put(&key("db"), c);

        queues.withdraw(&key("db"), b);
        queues.release(&key("db"), a).unwrap();

        assert!(queues.is_head(&key("db"), c));
    }

    #[tokio::test]
    async fn test_drain_all_waits_for_in_flight_events() {
        let queues = Arc::new(EventQueues::default());
        let id = Uuid::new_v4();
        queues.put(&key("db"), id);

        let draining = {
            let queues = queues.clone();
            tokio::spawn(async move { queues.drain_all().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!draining.is_finished());
        // Draining queues and unknown keys refuse new events
        assert!(!queues.put(&key("db"), Uuid::new_v4()));
        assert!(!queues.put(&key("api"), Uuid::new_v4()));

        queues.release(&key("db"), id).unwrap();
        tokio::time::timeout(Duration::from_secs(1), draining)
            .await
            .expect("drain should finish once the queue is empty")
            .unwrap();
    }

    #[tokio::test]
    async fn test_read_only_calls_leave_no_queue_behind() {
        let queues = EventQueues::default();

        assert!(queues.notifier(&key("db")).is_none());
        queues.drain(&key("db")).await;
        assert!(!queues.is_head(&key("db"), Uuid::new_v4()));
        assert_eq!(queues.qsize(&key("db")), 0);

        assert!(queues.keys().is_empty());
    }
}
