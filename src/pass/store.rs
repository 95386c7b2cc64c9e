// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The local password store working tree.
//!
//! Reads (key identity check plus decryption) and git pulls are mutually
//! exclusive: a `Checkout` holds the read side of the tree lock for as long as
//! it lives, `GitMirror` takes the write side for every clone and pull.

use super::gpg::Decryptor;
use crate::constants::store::GPG_ID_FILE;
use crate::error::{PassOperatorError, Result};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error};

pub struct PasswordStore {
    root: PathBuf,
    key_id: String,
    passphrase: String,
    decryptor: Arc<dyn Decryptor>,
    tree: RwLock<()>,
}

impl std::fmt::Debug for PasswordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordStore")
            .field("root", &self.root)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl PasswordStore {
    pub fn new(
        root: PathBuf,
        key_id: &str,
        passphrase: &str,
        decryptor: Arc<dyn Decryptor>,
    ) -> Self {
        Self {
            root,
            key_id: key_id.to_string(),
            passphrase: passphrase.to_string(),
            decryptor,
            tree: RwLock::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Confirm the `.gpg-id` marker at the store root names the configured key.
    ///
    /// A missing or different marker means the tree was re-initialised under
    /// another trust root; both are fatal.
    pub async fn verify_key_identity(&self) -> Result<()> {
        let path = self.root.join(GPG_ID_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                error!(".gpg-id at {} does not exist", path.display());
                return Err(PassOperatorError::KeyIdentityMissing(path));
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                return Err(PassOperatorError::KeyIdentityMissing(path));
            }
        };

        let found = contents.trim_end();
        if found != self.key_id {
            error!(
                "PASS_GPG_KEY_ID ({}) does not equal .gpg-id contained in {}: {}",
                self.key_id,
                path.display(),
                found
            );
            return Err(PassOperatorError::KeyIdentityMismatch {
                expected: self.key_id.clone(),
                found: found.to_string(),
                path,
            });
        }

        debug!("Key identity {} confirmed", self.key_id);
        Ok(())
    }

    /// Shared access to a verified tree, blocking git pulls while held
    pub async fn checkout(&self) -> Result<Checkout<'_>> {
        let guard = self.tree.read().await;
        self.verify_key_identity().await?;
        Ok(Checkout {
            store: self,
            _guard: guard,
        })
    }

    /// Exclusive access for rewriting the tree
    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.tree.write().await
    }
}

/// A consistent, key-verified view of the password store
pub struct Checkout<'a> {
    store: &'a PasswordStore,
    _guard: RwLockReadGuard<'a, ()>,
}

impl Checkout<'_> {
    /// Decrypt the entry at `entry`, relative to the store root
    pub async fn decrypt(&self, entry: &str) -> Result<String> {
        let path = self.resolve(entry)?;
        self.store
            .decryptor
            .decrypt(&path, &self.store.passphrase)
            .await
    }

    fn resolve(&self, entry: &str) -> Result<PathBuf> {
        let relative = Path::new(entry);
        let safe = !entry.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(PassOperatorError::InvalidResource(format!(
                "path '{}' must be relative to the password store",
                entry
            )));
        }
        Ok(self.store.root.join(relative))
    }
}
