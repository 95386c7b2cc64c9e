// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The git-backed password store: mirror, key identity and decryption.

pub mod git;
pub mod gpg;
pub mod store;

pub use git::GitMirror;
pub use gpg::{Decryptor, GpgDecryptor};
pub use store::{Checkout, PasswordStore};
