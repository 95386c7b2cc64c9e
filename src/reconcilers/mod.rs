// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes watchers that feed events to the sync manager.

pub mod pass_secret;

pub use pass_secret::PassSecretWatcher;
