// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Central coordinator: dispatches watch events and reconcile ticks to the
//! SecretSyncer and redelivers retryable failures.

use super::secrets::{SecretSyncer, SyncOutcome};
use crate::config::Config;
use crate::error::{PassOperatorError, Result, Severity};
use crate::locks::{Entry, EventKey, EventSlot};
use crate::types::pass_secret::PassSecret;
use kube::ResourceExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Events the watcher sends to the SyncManager
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A PassSecret appeared after the initial listing
    Created(PassSecret),
    /// The spec of a known PassSecret changed
    Updated { old: PassSecret, new: PassSecret },
    /// A PassSecret was deleted, or vanished between two listings
    Deleted(PassSecret),
    /// A PassSecret seen in a (re-)listing
    Resumed(PassSecret),
}

impl SyncEvent {
    /// The most recent version of the PassSecret the event is about
    pub fn resource(&self) -> &PassSecret {
        match self {
            SyncEvent::Created(ps) | SyncEvent::Deleted(ps) | SyncEvent::Resumed(ps) => ps,
            SyncEvent::Updated { new, .. } => new,
        }
    }

    pub fn key(&self) -> EventKey {
        self.resource().event_key()
    }

    fn name(&self) -> &'static str {
        match self {
            SyncEvent::Created(_) => "create",
            SyncEvent::Updated { .. } => "update",
            SyncEvent::Deleted(_) => "delete",
            SyncEvent::Resumed(_) => "resume",
        }
    }
}

#[derive(Debug)]
struct Delivery {
    event: SyncEvent,
    attempt: u32,
}

/// Dispatches events and ticks. Handlers run in their own tasks, serialized
/// per PassSecret by the syncer's event queues. The dispatch loop itself never
/// waits on a queue.
pub struct SyncManager {
    syncer: Arc<SecretSyncer>,
    interval: Duration,
    initial_delay: Duration,
    retry_delay: Duration,
    event_rx: mpsc::Receiver<Delivery>,
    retry_tx: mpsc::Sender<Delivery>,
    /// Latest version of every PassSecret, the set reconcile ticks walk over
    known: HashMap<EventKey, PassSecret>,
    /// Events waiting for room in the queue of their PassSecret, in arrival order
    parked: HashMap<EventKey, VecDeque<Delivery>>,
    tasks: JoinSet<Result<()>>,
}

/// Handle to send events to the SyncManager
#[derive(Clone)]
pub struct SyncManagerHandle {
    event_tx: mpsc::Sender<Delivery>,
}

impl SyncManagerHandle {
    pub async fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.send(Delivery { event, attempt: 0 }).await {
            error!("Failed to send event to SyncManager: {}", e);
        }
    }
}

impl SyncManager {
    pub fn new(syncer: Arc<SecretSyncer>, config: &Config) -> (Self, SyncManagerHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);

        let manager = Self {
            syncer,
            interval: config.interval,
            initial_delay: config.initial_delay,
            retry_delay: config.retry_delay,
            event_rx,
            retry_tx: event_tx.clone(),
            known: HashMap::new(),
            parked: HashMap::new(),
            tasks: JoinSet::new(),
        };

        let handle = SyncManagerHandle { event_tx };
        (manager, handle)
    }

    /// Run until a handler hits a fatal error
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "SyncManager started, reconciling every {:?} after {:?}",
            self.interval, self.initial_delay
        );
        let mut ticker = interval_at(Instant::now() + self.initial_delay, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(delivery) = self.event_rx.recv() => self.dispatch(delivery),
                _ = ticker.tick() => {
                    self.unpark();
                    self.tick();
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    reap(joined)?;
                    self.unpark();
                }
            }
        }
    }

    fn observe(&mut self, event: &SyncEvent) {
        let key = event.key();
        match event {
            SyncEvent::Deleted(_) => {
                self.known.remove(&key);
            }
            _ => {
                self.known.insert(key, event.resource().clone());
            }
        }
    }

    /// A retry is stale once a newer version of its PassSecret has been seen
    fn is_stale(&self, event: &SyncEvent) -> bool {
        let known = self.known.get(&event.key());
        match event {
            SyncEvent::Deleted(_) => known.is_some(),
            _ => known.map(|ps| ps.resource_version()) != Some(event.resource().resource_version()),
        }
    }

    fn dispatch(&mut self, delivery: Delivery) {
        let key = delivery.event.key();
        if delivery.attempt == 0 {
            self.observe(&delivery.event);
        } else if self.is_stale(&delivery.event) {
            info!(
                "Dropping retry {} of {} for {}, superseded by a newer version",
                delivery.attempt,
                delivery.event.name(),
                key
            );
            return;
        }

        // Stay behind events that are already waiting for this key
        if let Some(waiting) = self.parked.get_mut(&key) {
            waiting.push_back(delivery);
            return;
        }

        // Take the queue slot here so handlers start in arrival order
        match self.syncer.queues().try_enter(&key, self.syncer.strict()) {
            Entry::Admitted(slot) => self.spawn_handler(slot, delivery),
            Entry::Full => {
                debug!("Backlog for {} is full, parking {}", key, delivery.event.name());
                self.parked.entry(key).or_default().push_back(delivery);
            }
            Entry::Dropped => {}
        }
    }

    /// Admit parked events into queues that have made room
    fn unpark(&mut self) {
        let keys: Vec<EventKey> = self.parked.keys().cloned().collect();
        for key in keys {
            let Some(mut waiting) = self.parked.remove(&key) else {
                continue;
            };
            while let Some(delivery) = waiting.pop_front() {
                match self.syncer.queues().try_enter(&key, self.syncer.strict()) {
                    Entry::Admitted(slot) => self.spawn_handler(slot, delivery),
                    Entry::Full => {
                        waiting.push_front(delivery);
                        break;
                    }
                    Entry::Dropped => {}
                }
            }
            if !waiting.is_empty() {
                self.parked.insert(key, waiting);
            }
        }
    }

    fn spawn_handler(&mut self, slot: EventSlot, delivery: Delivery) {
        let syncer = self.syncer.clone();
        let retry_tx = self.retry_tx.clone();
        let retry_delay = self.retry_delay;
        self.tasks.spawn(async move {
            let key = slot.key().clone();
            let result = slot.run(|| syncer.handle(&delivery.event)).await;
            let Some(e) = settle(&key, delivery.event.name(), result)? else {
                return Ok(());
            };

            warn!(
                "Retry {} of {} for {} in {:?}: {}",
                delivery.attempt + 1,
                delivery.event.name(),
                key,
                retry_delay,
                e
            );
            // Wait outside the handler set so the queue's parked events move on
            tokio::spawn(async move {
                sleep(retry_delay).await;
                let retry = Delivery {
                    event: delivery.event,
                    attempt: delivery.attempt + 1,
                };
                if let Err(e) = retry_tx.send(retry).await {
                    error!("Failed to requeue event for {}: {}", key, e);
                }
            });
            Ok(())
        });
    }

    fn tick(&mut self) {
        debug!("Reconcile tick for {} PassSecrets", self.known.len());
        for (key, ps) in &self.known {
            let Entry::Admitted(slot) = self.syncer.queues().try_enter(key, self.syncer.best_effort()) else {
                continue;
            };

            let syncer = self.syncer.clone();
            let key = key.clone();
            let ps = ps.clone();
            self.tasks.spawn(async move {
                let result = slot.run(|| syncer.reconcile(&ps)).await;
                if let Some(e) = settle(&key, "reconcile", result)? {
                    warn!("reconcile for {} failed, retrying on the next tick: {}", key, e);
                }
                Ok(())
            });
        }
    }
}

/// Log a handler result. Fatal errors are returned, a retryable error is handed
/// back for redelivery.
fn settle(
    key: &EventKey,
    handler: &str,
    result: Result<SyncOutcome>,
) -> Result<Option<PassOperatorError>> {
    match result {
        Ok(outcome) => {
            debug!("{} for {} finished: {:?}", handler, key, outcome);
            Ok(None)
        }
        Err(e) => match e.severity() {
            Severity::Fatal => {
                error!("{} for {} failed fatally: {}", handler, key, e);
                Err(e)
            }
            Severity::Permanent => {
                error!("{} for {} failed permanently, not retrying: {}", handler, key, e);
                Ok(None)
            }
            Severity::Retryable => Ok(Some(e)),
        },
    }
}

fn reap(joined: std::result::Result<Result<()>, JoinError>) -> anyhow::Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(e) if e.is_panic() => Err(anyhow::anyhow!("Handler task panicked: {}", e)),
        Err(e) => {
            debug!("Handler task cancelled: {}", e);
            Ok(())
        }
    }
}
