// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! PassSecret to Secret synchronization.

pub mod manager;
pub mod secrets;

pub use manager::{SyncEvent, SyncManager, SyncManagerHandle};
pub use secrets::{SecretSyncer, SyncOutcome};
