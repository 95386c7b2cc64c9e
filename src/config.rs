// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Operator configuration loaded from environment variables
#[derive(Clone)]
pub struct Config {
    /// Interval between reconciliation ticks for every known PassSecret
    pub interval: Duration,
    /// Delay before the first reconciliation tick
    pub initial_delay: Duration,
    /// Namespace watched for PassSecrets
    pub namespace: String,
    /// Maximum queued events per PassSecret, 0 disables the bound
    pub max_backlog: usize,
    /// Delay before a retryable failure is redelivered
    pub retry_delay: Duration,
    /// Time in-flight handlers get to finish on shutdown
    pub shutdown_grace: Duration,
    /// Root of the password store working tree
    pub pass_directory: PathBuf,
    pub gpg_key_id: String,
    pub gpg_passphrase: String,
    /// GNUPGHOME for the gpg binary, gpg's own default when unset
    pub gnupg_home: Option<PathBuf>,
    pub git_url: String,
    pub git_branch: String,
    /// Interval between git pulls of the password store
    pub git_interval: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("interval", &self.interval)
            .field("initial_delay", &self.initial_delay)
            .field("namespace", &self.namespace)
            .field("max_backlog", &self.max_backlog)
            .field("retry_delay", &self.retry_delay)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("pass_directory", &self.pass_directory)
            .field("gpg_key_id", &self.gpg_key_id)
            .field("gpg_passphrase", &"<redacted>")
            .field("gnupg_home", &self.gnupg_home)
            .field("git_url", &self.git_url)
            .field("git_branch", &self.git_branch)
            .field("git_interval", &self.git_interval)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let interval = Duration::from_secs(parse_or(&lookup, "OPERATOR_INTERVAL", 60)?);
        if interval.is_zero() {
            bail!("OPERATOR_INTERVAL must be greater than zero");
        }

        let gpg_key_id = lookup("PASS_GPG_KEY_ID")
            .filter(|v| !v.trim().is_empty())
            .context("PASS_GPG_KEY_ID environment variable not set")?;
        let git_url = lookup("PASS_GIT_URL")
            .filter(|v| !v.trim().is_empty())
            .context("Must provide a valid git URL (PASS_GIT_URL)")?;

        let git_interval = match lookup("PASS_GIT_INTERVAL") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("PASS_GIT_INTERVAL is not a number: {v}"))?,
            ),
            None => interval,
        };
        if git_interval.is_zero() {
            bail!("PASS_GIT_INTERVAL must be greater than zero");
        }

        Ok(Config {
            interval,
            initial_delay: Duration::from_secs(parse_or(&lookup, "OPERATOR_INITIAL_DELAY", 3)?),
            namespace: lookup("OPERATOR_NAMESPACE").unwrap_or_else(|| "default".to_string()),
            max_backlog: parse_or(&lookup, "OPERATOR_MAX_BACKLOG", 10)?,
            retry_delay: Duration::from_secs(parse_or(&lookup, "OPERATOR_RETRY_DELAY", 15)?),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "OPERATOR_SHUTDOWN_GRACE", 30)?),
            pass_directory: lookup("PASS_DIRECTORY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/opt/pass-operator/repo")),
            gpg_key_id: gpg_key_id.trim().to_string(),
            gpg_passphrase: lookup("PASS_GPG_PASSPHRASE").unwrap_or_default(),
            gnupg_home: lookup("PASS_GNUPG_HOME").map(PathBuf::from),
            git_url,
            git_branch: lookup("PASS_GIT_BRANCH").unwrap_or_else(|| "main".to_string()),
            git_interval,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .with_context(|| format!("{key} is not a valid value: {v}")),
        None => Ok(default),
    }
}
