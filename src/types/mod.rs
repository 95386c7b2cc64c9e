// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
pub mod managed_secret;
pub mod pass_secret;

pub use managed_secret::{ManagedSecret, SecretDiff, SecretMetadata, SecretRef};
pub use pass_secret::{PassSecret, PassSecretSpec};
