// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys written by the operator
pub mod annotations {
    /// Marks a Secret as managed by a PassSecret
    pub const MANAGED: &str = "secrets.premiscale.com/managed";
    /// `<namespace>/<name>` of the PassSecret that wrote the Secret
    pub const OWNER: &str = "secrets.premiscale.com/owner";
}

/// The operator name used as field manager and in log output
pub const OPERATOR_NAME: &str = "pass-operator";

/// PassSecret custom resource coordinates
pub mod crd {
    pub const GROUP: &str = "secrets.premiscale.com";
    pub const VERSION: &str = "v1alpha1";
    pub const KIND: &str = "PassSecret";

    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Password store layout
pub mod store {
    /// Key identity marker written by `pass init` at the store root
    pub const GPG_ID_FILE: &str = ".gpg-id";
    /// Suffix of every encrypted entry on disk
    pub const ENCRYPTED_SUFFIX: &str = ".gpg";
}

/// Defaults for Secret fields left unset on a PassSecret
pub mod secret {
    pub const DEFAULT_NAMESPACE: &str = "default";
    pub const DEFAULT_TYPE: &str = "Opaque";
}
