// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{error, info, warn};

use pass_operator::config::Config;
use pass_operator::kubernetes::{wait_for_pass_secret_crd, KubeSecretStore};
use pass_operator::locks::EventQueues;
use pass_operator::pass::{GitMirror, GpgDecryptor, PasswordStore};
use pass_operator::reconcilers::PassSecretWatcher;
use pass_operator::sync::{SecretSyncer, SyncManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing, honouring RUST_LOG
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting pass-operator");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config);

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    // Clone the password store and make sure it is encrypted for our key
    let decryptor = GpgDecryptor::new(config.gnupg_home.clone());
    let password_store = Arc::new(PasswordStore::new(
        config.pass_directory.clone(),
        &config.gpg_key_id,
        &config.gpg_passphrase,
        Arc::new(decryptor),
    ));
    let mirror = GitMirror::new(&config.git_url, &config.git_branch, password_store.clone());
    mirror.clone_store().await?;
    password_store.verify_key_identity().await?;

    // Wait for the PassSecret CRD before starting the watcher
    info!("Waiting for PassSecret CRD to become available...");
    wait_for_pass_secret_crd(&client).await?;

    let queues = Arc::new(EventQueues::new(config.max_backlog));
    let syncer = Arc::new(SecretSyncer::new(
        Arc::new(KubeSecretStore::new(client.clone())),
        password_store,
        queues.clone(),
        config.max_backlog,
    ));

    // Create the sync manager and get a handle for the watcher
    let (sync_manager, sync_handle) = SyncManager::new(syncer, &config);
    let watcher = PassSecretWatcher::new(client, &config.namespace, sync_handle);

    info!("Starting watcher...");

    let services = async {
        tokio::try_join!(
            sync_manager.run(),
            watcher.run(),
            mirror.pull_forever(config.git_interval)
        )
        .map(|_| ())
    };
    tokio::pin!(services);

    tokio::select! {
        result = &mut services => {
            if let Err(e) = &result {
                error!("Shutting down: {}", e);
            }
            result
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Received shutdown signal");

            // Keep handlers running while the queues drain, refusing new events
            info!("Draining event queues (grace period {:?})", config.shutdown_grace);
            tokio::select! {
                _ = queues.drain_all() => info!("All event queues drained"),
                _ = tokio::time::sleep(config.shutdown_grace) => {
                    warn!("Event queues not drained within the grace period");
                }
                result = &mut services => return result,
            }
            Ok(())
        }
    }
}
