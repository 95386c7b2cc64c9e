// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Decryption of password store entries with GnuPG.

use crate::constants::store::ENCRYPTED_SUFFIX;
use crate::error::{PassOperatorError, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Turns a password store entry into plaintext
#[async_trait]
pub trait Decryptor: Send + Sync {
    /// Decrypt the entry at `path`, given without its on-disk suffix
    async fn decrypt(&self, path: &Path, passphrase: &str) -> Result<String>;
}

/// Decrypts entries by running the `gpg` binary
#[derive(Debug, Clone)]
pub struct GpgDecryptor {
    binary: PathBuf,
    home: Option<PathBuf>,
}

impl GpgDecryptor {
    pub fn new(home: Option<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("gpg"),
            home,
        }
    }

    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = binary;
        self
    }
}

/// On-disk location of an entry
pub fn encrypted_path(path: &Path) -> PathBuf {
    let mut file: OsString = path.as_os_str().to_owned();
    file.push(ENCRYPTED_SUFFIX);
    PathBuf::from(file)
}

#[async_trait]
impl Decryptor for GpgDecryptor {
    #[instrument(skip(self, passphrase), fields(path = %path.display()))]
    async fn decrypt(&self, path: &Path, passphrase: &str) -> Result<String> {
        let file = encrypted_path(path);
        if !tokio::fs::try_exists(&file).await.unwrap_or(false) {
            return Err(PassOperatorError::Gpg(format!(
                "{} does not exist",
                file.display()
            )));
        }

        let mut cmd = Command::new(&self.binary);
        if let Some(home) = &self.home {
            cmd.env("GNUPGHOME", home);
        }
        cmd.arg("--batch")
            .arg("--quiet")
            .arg("--yes")
            .arg("--pinentry-mode")
            .arg("loopback")
            .arg("--passphrase-fd")
            .arg("0")
            .arg("--decrypt")
            .arg(&file)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| PassOperatorError::Gpg(format!("Failed to spawn gpg: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{passphrase}\n").as_bytes())
                .await
                .map_err(|e| PassOperatorError::Gpg(format!("Failed to write passphrase: {}", e)))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| PassOperatorError::Gpg(format!("Failed to close stdin: {}", e)))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| PassOperatorError::Gpg(format!("Failed to wait for gpg: {}", e)))?;

        if !output.status.success() {
            return Err(PassOperatorError::Gpg(format!(
                "gpg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        debug!("Decrypted {}", file.display());
        String::from_utf8(output.stdout)
            .map_err(|_| PassOperatorError::Gpg(format!("{} is not valid UTF-8", file.display())))
    }
}
