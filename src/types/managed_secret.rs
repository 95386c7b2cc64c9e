// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The managed Secret representation: keeps `data` and `stringData` in agreement
//! and converts to and from the wire `Secret`.

use crate::constants::{annotations, secret as defaults};
use crate::error::ModelError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Metadata of a managed Secret as declared on a PassSecret
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

impl SecretMetadata {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            annotations: None,
            labels: None,
        }
    }

    pub fn target(&self) -> SecretRef {
        SecretRef {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

pub(crate) fn default_namespace() -> String {
    defaults::DEFAULT_NAMESPACE.to_string()
}

pub(crate) fn default_type() -> String {
    defaults::DEFAULT_TYPE.to_string()
}

/// Name and namespace of a target Secret
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SecretRef {
    pub name: String,
    pub namespace: String,
}

impl SecretRef {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }
}

impl fmt::Display for SecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Result of comparing a live Secret against the desired one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretDiff {
    Equal,
    DataChanged,
}

/// Desired (or observed) contents of a managed Secret.
///
/// Both maps are always populated and agree with each other: every `data`
/// value is the base64 encoding of the `string_data` value under the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManagedSecret {
    pub metadata: SecretMetadata,
    data: BTreeMap<String, String>,
    string_data: BTreeMap<String, String>,
    pub immutable: bool,
    pub type_: String,
}

impl ManagedSecret {
    /// Build a managed secret from either or both representations of its data.
    ///
    /// Missing keys on one side are derived from the other. Values are trimmed of
    /// trailing whitespace before encoding, so `"s3cr3t\n"` and `"s3cr3t"` are the
    /// same secret. A key present on both sides with disagreeing values is an error.
    pub fn new(
        metadata: SecretMetadata,
        data: Option<BTreeMap<String, String>>,
        string_data: Option<BTreeMap<String, String>>,
        immutable: bool,
        type_: &str,
    ) -> Result<Self, ModelError> {
        let data = data.unwrap_or_default();
        let string_data = string_data.unwrap_or_default();

        if data.is_empty() && string_data.is_empty() {
            return Err(ModelError::Empty(metadata.target().to_string()));
        }

        let mut merged_data = BTreeMap::new();
        let mut merged_string_data = BTreeMap::new();

        for (key, value) in &string_data {
            let plain = value.trim_end().to_string();
            let encoded = b64_encode(&plain);
            if let Some(existing) = data.get(key) {
                if existing.trim() != encoded && b64_decode(key, existing)? != plain {
                    return Err(ModelError::Mismatch(key.clone()));
                }
            }
            merged_data.insert(key.clone(), encoded);
            merged_string_data.insert(key.clone(), plain);
        }

        for (key, value) in &data {
            if merged_string_data.contains_key(key) {
                continue;
            }
            let plain = b64_decode(key, value)?;
            merged_data.insert(key.clone(), b64_encode(&plain));
            merged_string_data.insert(key.clone(), plain);
        }

        Ok(Self {
            metadata,
            data: merged_data,
            string_data: merged_string_data,
            immutable,
            type_: type_.to_string(),
        })
    }

    /// Read back a live Secret, taking `data` as the source of truth
    pub fn from_secret(secret: &Secret) -> Result<Self, ModelError> {
        let metadata = SecretMetadata {
            name: secret.name_any(),
            namespace: secret.namespace().unwrap_or_else(default_namespace),
            annotations: secret.metadata.annotations.clone(),
            labels: secret.metadata.labels.clone(),
        };

        let data = secret.data.as_ref().map(|d| {
            d.iter()
                .map(|(k, v)| (k.clone(), STANDARD.encode(&v.0)))
                .collect::<BTreeMap<_, _>>()
        });

        Self::new(
            metadata,
            data,
            secret.string_data.clone(),
            secret.immutable.unwrap_or(false),
            secret.type_.as_deref().unwrap_or(defaults::DEFAULT_TYPE),
        )
    }

    pub fn target(&self) -> SecretRef {
        self.metadata.target()
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn string_data(&self) -> &BTreeMap<String, String> {
        &self.string_data
    }

    /// True iff the `data` contents are exactly the same
    pub fn data_equals(&self, other: &ManagedSecret) -> bool {
        self.data == other.data
    }

    /// Compare only `data`; annotation and label drift never triggers convergence
    pub fn diff(current: &ManagedSecret, desired: &ManagedSecret) -> SecretDiff {
        if current.data_equals(desired) {
            SecretDiff::Equal
        } else {
            SecretDiff::DataChanged
        }
    }

    /// Wire representation handed to the API server.
    ///
    /// Only `stringData` is sent so the API server performs the one canonical
    /// base64 encoding.
    pub fn to_secret(&self) -> Secret {
        let mut annotations = self.metadata.annotations.clone().unwrap_or_default();
        annotations.insert(annotations::MANAGED.to_string(), "true".to_string());

        Secret {
            metadata: ObjectMeta {
                name: Some(self.metadata.name.clone()),
                namespace: Some(self.metadata.namespace.clone()),
                annotations: Some(annotations),
                labels: self.metadata.labels.clone(),
                ..Default::default()
            },
            data: None,
            string_data: Some(self.string_data.clone()),
            type_: Some(self.type_.clone()),
            immutable: self.immutable.then_some(true),
        }
    }
}

fn b64_encode(value: &str) -> String {
    STANDARD.encode(value.as_bytes())
}

fn b64_decode(key: &str, value: &str) -> Result<String, ModelError> {
    let bytes = STANDARD
        .decode(value.trim())
        .map_err(|e| ModelError::InvalidBase64(key.to_string(), e.to_string()))?;
    let plain = String::from_utf8(bytes).map_err(|_| ModelError::InvalidUtf8(key.to_string()))?;
    Ok(plain.trim_end().to_string())
}
