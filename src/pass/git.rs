// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Keeps the local password store in step with its git remote.

use super::store::PasswordStore;
use crate::error::{PassOperatorError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};

#[derive(Debug, Clone)]
pub struct GitMirror {
    url: String,
    branch: String,
    store: Arc<PasswordStore>,
}

impl GitMirror {
    pub fn new(url: &str, branch: &str, store: Arc<PasswordStore>) -> Self {
        Self {
            url: url.to_string(),
            branch: branch.to_string(),
            store,
        }
    }

    fn is_cloned(&self) -> bool {
        self.store.root().join(".git").is_dir()
    }

    /// Clone the store once. A tree that is already a checkout is left alone.
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn clone_store(&self) -> Result<()> {
        let _tree = self.store.exclusive().await;
        if self.is_cloned() {
            info!(
                "Repository {} already cloned to {}, skipping",
                self.url,
                self.store.root().display()
            );
            return Ok(());
        }

        if let Some(parent) = self.store.root().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PassOperatorError::Git(format!("Failed to create {}: {}", parent.display(), e)))?;
        }

        let root = self.store.root().to_string_lossy().to_string();
        run_git(
            None,
            &["clone", "--branch", &self.branch, "--single-branch", &self.url, &root],
        )
        .await?;

        info!(
            "Successfully cloned repo {} to password store {}",
            self.url,
            self.store.root().display()
        );
        Ok(())
    }

    /// Fetch and fast-forward the working tree to the remote branch
    pub async fn pull(&self) -> Result<()> {
        let _tree = self.store.exclusive().await;
        info!("Updating local password store at {}", self.store.root().display());
        run_git(
            Some(self.store.root()),
            &["pull", "--ff-only", "origin", &self.branch],
        )
        .await
    }

    /// Pull on an interval until the process exits, logging and carrying on
    /// past failed pulls
    pub async fn pull_forever(self, interval: Duration) -> anyhow::Result<()> {
        let mut tries: u64 = 0;
        loop {
            sleep(interval).await;
            match self.pull().await {
                Ok(()) => tries = 0,
                Err(e) => {
                    error!("Retry {} git pull: {}", tries, e);
                    tries += 1;
                }
            }
        }
    }
}

async fn run_git(dir: Option<&Path>, args: &[&str]) -> Result<()> {
    let mut cmd = Command::new("git");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.args(args).env("GIT_TERMINAL_PROMPT", "0");

    debug!("Running git {}", args.join(" "));
    let output = cmd
        .output()
        .await
        .map_err(|e| PassOperatorError::Git(format!("Failed to run git: {}", e)))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(PassOperatorError::Git(format!(
            "git {} exited with {}: {}",
            args.first().copied().unwrap_or_default(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}
