// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use super::managed_secret::{default_type, ManagedSecret, SecretMetadata, SecretRef};
use crate::constants::annotations;
use crate::constants::crd::KIND;
use crate::error::{PassOperatorError, Result};
use crate::locks::EventKey;
use crate::pass::Checkout;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::error;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[kube(group = "secrets.premiscale.com", version = "v1alpha1", kind = "PassSecret")]
#[kube(namespaced)]
#[serde(rename_all = "camelCase")]
pub struct PassSecretSpec {
    /// Secret key to password store path, without the `.gpg` suffix
    pub encrypted_data: BTreeMap<String, String>,
    pub managed_secret: ManagedSecretTemplate,
}

/// The Secret a PassSecret manages, before its data is decrypted
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSecretTemplate {
    pub metadata: SecretMetadata,
    #[serde(default = "default_type", rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub immutable: bool,
}

impl PassSecret {
    /// Queue identity shared by every handler acting on this PassSecret
    pub fn event_key(&self) -> EventKey {
        EventKey::new(
            KIND,
            &self.name_any(),
            &self.namespace().unwrap_or_default(),
        )
    }

    /// Value of the owner annotation on Secrets written for this PassSecret
    pub fn owner(&self) -> String {
        format!("{}/{}", self.namespace().unwrap_or_default(), self.name_any())
    }

    /// True if `secret` was written for this PassSecret
    pub fn owns(&self, secret: &ManagedSecret) -> bool {
        secret
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(annotations::OWNER))
            .is_some_and(|owner| *owner == self.owner())
    }

    /// Name and namespace of the managed Secret, without decrypting anything
    pub fn target(&self) -> Result<SecretRef> {
        let metadata = &self.spec.managed_secret.metadata;
        if metadata.name.trim().is_empty() {
            return Err(PassOperatorError::InvalidResource(format!(
                "PassSecret {} has no managed secret name",
                self.name_any()
            )));
        }
        if metadata.namespace.trim().is_empty() {
            return Err(PassOperatorError::InvalidResource(format!(
                "PassSecret {} has an empty managed secret namespace",
                self.name_any()
            )));
        }
        Ok(metadata.target())
    }

    /// Decrypt every referenced entry into the desired managed Secret.
    ///
    /// All or nothing: a single failing entry fails the whole secret.
    pub async fn materialize(&self, checkout: &Checkout<'_>) -> Result<ManagedSecret> {
        self.target()?;
        if self.spec.encrypted_data.is_empty() {
            return Err(PassOperatorError::InvalidResource(format!(
                "PassSecret {} has no encryptedData",
                self.name_any()
            )));
        }

        let mut string_data = BTreeMap::new();
        for (key, path) in &self.spec.encrypted_data {
            match checkout.decrypt(path).await {
                Ok(plain) => {
                    string_data.insert(key.clone(), plain);
                }
                Err(e @ PassOperatorError::InvalidResource(_)) => return Err(e),
                Err(e) => {
                    error!("Failed to decrypt secret at path: {}", path);
                    return Err(PassOperatorError::DecryptionFailed {
                        key: key.clone(),
                        path: path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let template = &self.spec.managed_secret;
        let mut metadata = template.metadata.clone();
        metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(annotations::OWNER.to_string(), self.owner());

        Ok(ManagedSecret::new(
            metadata,
            None,
            Some(string_data),
            template.immutable,
            &template.type_,
        )?)
    }
}
