// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes access: CRD discovery and the managed Secret store.

pub mod crd;
pub mod secrets;

pub use crd::wait_for_pass_secret_crd;
pub use secrets::{KubeSecretStore, SecretStore};
