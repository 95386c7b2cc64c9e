// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! PassSecret watcher - turns the watch stream into create/update/delete/resume
//! events for the sync manager.

use crate::locks::EventKey;
use crate::sync::{SyncEvent, SyncManagerHandle};
use crate::types::pass_secret::PassSecret;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, WatchStreamExt};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

pub struct PassSecretWatcher {
    client: Client,
    namespace: String,
    sync_handle: SyncManagerHandle,
}

impl PassSecretWatcher {
    pub fn new(client: Client, namespace: &str, sync_handle: SyncManagerHandle) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
            sync_handle,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let pass_secrets: Api<PassSecret> = Api::namespaced(self.client.clone(), &self.namespace);
        info!("Watching PassSecrets in namespace {}", self.namespace);

        let mut cache = WatchCache::default();
        let mut stream = watcher(pass_secrets, watcher::Config::default())
            .default_backoff()
            .boxed();

        while let Some(event) = stream.next().await {
            match event {
                Ok(event) => {
                    for sync_event in cache.apply(event) {
                        self.sync_handle.send(sync_event).await;
                    }
                }
                Err(e) => warn!("PassSecret watch error: {}", e),
            }
        }

        Ok(())
    }
}

/// Last seen version of every PassSecret, used to tell creates from updates and
/// to find objects that vanished while the watch was down
#[derive(Default)]
struct WatchCache {
    objects: HashMap<EventKey, PassSecret>,
    /// Keys seen in the listing in progress
    listing: Option<HashSet<EventKey>>,
}

impl WatchCache {
    fn apply(&mut self, event: watcher::Event<PassSecret>) -> Vec<SyncEvent> {
        match event {
            watcher::Event::Init => {
                debug!("PassSecret listing started");
                self.listing = Some(HashSet::new());
                vec![]
            }
            watcher::Event::InitApply(ps) => {
                let key = ps.event_key();
                if let Some(listing) = self.listing.as_mut() {
                    listing.insert(key.clone());
                }
                match self.objects.insert(key, ps.clone()) {
                    Some(old) if old.spec != ps.spec => vec![SyncEvent::Updated { old, new: ps }],
                    _ => vec![SyncEvent::Resumed(ps)],
                }
            }
            watcher::Event::InitDone => {
                let listed = self.listing.take().unwrap_or_default();
                let gone: Vec<EventKey> = self
                    .objects
                    .keys()
                    .filter(|key| !listed.contains(*key))
                    .cloned()
                    .collect();
                debug!(
                    "PassSecret listing done, {} present, {} gone",
                    listed.len(),
                    gone.len()
                );
                gone.into_iter()
                    .filter_map(|key| self.objects.remove(&key))
                    .map(SyncEvent::Deleted)
                    .collect()
            }
            watcher::Event::Apply(ps) => {
                let key = ps.event_key();
                match self.objects.insert(key.clone(), ps.clone()) {
                    None => vec![SyncEvent::Created(ps)],
                    Some(old) if old.spec != ps.spec => vec![SyncEvent::Updated { old, new: ps }],
                    Some(_) => {
                        debug!("{} changed without a spec change, ignoring", key);
                        vec![]
                    }
                }
            }
            watcher::Event::Delete(ps) => {
                self.objects.remove(&ps.event_key());
                vec![SyncEvent::Deleted(ps)]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::make_pass_secret;
    use watcher::Event;

    fn db(target: &str) -> PassSecret {
        make_pass_secret("db", &[("db", "infra/db-pass")], target, "default")
    }

    fn api() -> PassSecret {
        make_pass_secret("api", &[("token", "infra/api-token")], "api", "default")
    }

    fn names(events: &[SyncEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e {
                SyncEvent::Created(ps) => format!("created {}", ps.event_key().name),
                SyncEvent::Updated { new, .. } => format!("updated {}", new.event_key().name),
                SyncEvent::Deleted(ps) => format!("deleted {}", ps.event_key().name),
                SyncEvent::Resumed(ps) => format!("resumed {}", ps.event_key().name),
            })
            .collect()
    }

    #[test]
    fn test_initial_listing_resumes_objects() {
        let mut cache = WatchCache::default();

        assert!(cache.apply(Event::Init).is_empty());
        let events = cache.apply(Event::InitApply(db("db")));
        assert!(cache.apply(Event::InitDone).is_empty());

        assert_eq!(names(&events), vec!["resumed db"]);
    }

    #[test]
    fn test_apply_distinguishes_create_update_and_noop() {
        let mut cache = WatchCache::default();

        assert_eq!(names(&cache.apply(Event::Apply(db("db")))), vec!["created db"]);

        let mut relabelled = db("db");
        relabelled.metadata.labels = Some([("team".to_string(), "platform".to_string())].into());
        assert!(cache.apply(Event::Apply(relabelled)).is_empty());

        let events = cache.apply(Event::Apply(db("db-renamed")));
        assert_eq!(names(&events), vec!["updated db"]);
        let SyncEvent::Updated { old, new } = &events[0] else {
            panic!("expected an update");
        };
        assert_eq!(old.spec.managed_secret.metadata.name, "db");
        assert_eq!(new.spec.managed_secret.metadata.name, "db-renamed");
    }

    #[test]
    fn test_relist_reports_missed_deletes_and_updates() {
        let mut cache = WatchCache::default();
        cache.apply(Event::Apply(db("db")));
        cache.apply(Event::Apply(api()));

        // The watch restarted: api is gone and db moved while it was down
        cache.apply(Event::Init);
        let resumed = cache.apply(Event::InitApply(db("db-renamed")));
        let gone = cache.apply(Event::InitDone);

        assert_eq!(names(&resumed), vec!["updated db"]);
        assert_eq!(names(&gone), vec!["deleted api"]);
        assert_eq!(names(&cache.apply(Event::Apply(api()))), vec!["created api"]);
    }

    #[test]
    fn test_delete_forgets_object() {
        let mut cache = WatchCache::default();
        cache.apply(Event::Apply(db("db")));

        assert_eq!(names(&cache.apply(Event::Delete(db("db")))), vec!["deleted db"]);
        assert_eq!(names(&cache.apply(Event::Apply(db("db")))), vec!["created db"]);
    }
}
