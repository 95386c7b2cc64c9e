// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-object event ordering: handlers touching the same PassSecret run one at a
//! time in arrival order, handlers for different objects run in parallel.

pub mod guard;
pub mod queues;

pub use guard::{Entry, EventSlot, LockPolicy};
pub use queues::{EventId, EventKey, EventQueues};
