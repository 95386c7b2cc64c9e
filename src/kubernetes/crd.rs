// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Startup gate on the PassSecret CRD being installed

use crate::constants::crd::{GROUP, KIND, POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS, VERSION};
use crate::error::Result;
use kube::{discovery::Discovery, Client};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Block until the API server serves PassSecrets. The first recheck happens
/// after POLL_INTERVAL_SECS, doubling up to POLL_MAX_INTERVAL_SECS.
pub async fn wait_for_pass_secret_crd(client: &Client) -> Result<()> {
    let mut delay = POLL_INTERVAL_SECS;

    loop {
        match pass_secrets_served(client).await {
            Ok(true) => {
                info!("API server serves {} as {}/{}", KIND, GROUP, VERSION);
                return Ok(());
            }
            Ok(false) => info!(
                "{}/{} {} is not installed yet, next check in {}s",
                GROUP, VERSION, KIND, delay
            ),
            Err(e) => warn!("Discovery of {} failed, next check in {}s: {}", GROUP, delay, e),
        }

        sleep(Duration::from_secs(delay)).await;
        delay = next_interval(delay);
    }
}

fn next_interval(delay: u64) -> u64 {
    (delay * 2).min(POLL_MAX_INTERVAL_SECS)
}

async fn pass_secrets_served(client: &Client) -> Result<bool> {
    let discovery = Discovery::new(client.clone()).filter(&[GROUP]).run().await?;

    let served = discovery
        .get(GROUP)
        .map(|group| group.recommended_resources())
        .unwrap_or_default()
        .iter()
        .any(|(ar, _)| ar.kind == KIND && ar.version == VERSION);
    debug!("{} served by {}: {}", KIND, GROUP, served);
    Ok(served)
}
