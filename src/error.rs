// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;
use thiserror::Error;

use crate::locks::EventKey;

/// How the caller should treat a failed handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Trusted state or an ordering invariant was violated, the process must stop
    Fatal,
    /// The event can never succeed as-is, do not redeliver it
    Permanent,
    /// The event may succeed later (store not synced yet, API conflict, transport error)
    Retryable,
}

#[derive(Error, Debug)]
pub enum PassOperatorError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid PassSecret: {0}")]
    InvalidResource(String),

    #[error("Invalid managed secret: {0}")]
    InvalidSecret(#[from] ModelError),

    #[error("Failed to decrypt '{path}' for key '{key}': {reason}")]
    DecryptionFailed {
        key: String,
        path: String,
        reason: String,
    },

    #[error("Secret store error: {0}")]
    Store(#[from] StoreError),

    #[error("gpg error: {0}")]
    Gpg(String),

    #[error("git error: {0}")]
    Git(String),

    #[error("PASS_GPG_KEY_ID ({expected}) does not equal .gpg-id contained in {}: {found}", .path.display())]
    KeyIdentityMismatch {
        expected: String,
        found: String,
        path: PathBuf,
    },

    #[error(".gpg-id at {} does not exist", .0.display())]
    KeyIdentityMissing(PathBuf),

    #[error("Event queue for {key} released {found:?} while {expected} completed")]
    QueueOrderViolation {
        key: EventKey,
        expected: String,
        found: Option<String>,
    },
}

impl PassOperatorError {
    pub fn severity(&self) -> Severity {
        match self {
            PassOperatorError::KeyIdentityMismatch { .. }
            | PassOperatorError::KeyIdentityMissing(_)
            | PassOperatorError::QueueOrderViolation { .. } => Severity::Fatal,
            PassOperatorError::InvalidResource(_) | PassOperatorError::InvalidSecret(_) => {
                Severity::Permanent
            }
            PassOperatorError::Store(StoreError::Invalid(..)) => Severity::Permanent,
            PassOperatorError::KubeError(_)
            | PassOperatorError::DecryptionFailed { .. }
            | PassOperatorError::Store(_)
            | PassOperatorError::Gpg(_)
            | PassOperatorError::Git(_) => Severity::Retryable,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

/// Errors from building a managed secret out of data/stringData
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("managed secret {0} expects at least one of 'data', 'stringData' to be set")]
    Empty(String),

    #[error("key '{0}' differs between 'data' and 'stringData'")]
    Mismatch(String),

    #[error("key '{0}' is not valid base64: {1}")]
    InvalidBase64(String, String),

    #[error("key '{0}' is not valid UTF-8")]
    InvalidUtf8(String),
}

/// Outcomes of the Secret object store that callers branch on
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("secret {0} already exists")]
    AlreadyExists(String),

    #[error("secret {0} not found")]
    NotFound(String),

    #[error("secret {0} holds data that cannot be read back: {1}")]
    Invalid(String, ModelError),

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

pub type Result<T> = std::result::Result<T, PassOperatorError>;
