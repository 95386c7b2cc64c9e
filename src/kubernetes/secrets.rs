// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRUD access to managed Secrets.

use crate::constants::OPERATOR_NAME;
use crate::error::StoreError;
use crate::types::managed_secret::{ManagedSecret, SecretRef};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, PostParams},
    Api, Client,
};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument};

/// The object store holding managed Secrets
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Create the target. An existing object is `AlreadyExists`.
    async fn create(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError>;

    /// Replace the contents of an existing target. A missing object is `NotFound`.
    async fn patch(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError>;

    /// Delete the target. A missing object is `NotFound`.
    async fn delete(&self, target: &SecretRef) -> Result<(), StoreError>;

    /// Read the target back as a managed secret. A missing object is `NotFound`.
    async fn read(&self, target: &SecretRef) -> Result<ManagedSecret, StoreError>;
}

/// `SecretStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            field_manager: Some(OPERATOR_NAME.to_string()),
            ..Default::default()
        }
    }

    fn api(&self, target: &SecretRef) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &target.namespace)
    }

    async fn get(&self, target: &SecretRef) -> Result<Secret, StoreError> {
        match self.api(target).get(&target.name).await {
            Ok(secret) => Ok(secret),
            Err(kube::Error::Api(err)) if err.code == 404 => {
                Err(StoreError::NotFound(target.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    #[instrument(skip(self, secret), fields(secret = %target))]
    async fn create(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError> {
        match self
            .api(target)
            .create(&Self::post_params(), &secret.to_secret())
            .await
        {
            Ok(_) => {
                info!("Created secret {}", target);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 409 => {
                Err(StoreError::AlreadyExists(target.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replaces rather than merges, so keys dropped from the desired secret are
    /// removed from the target. Annotations and labels set by others survive.
    #[instrument(skip(self, secret), fields(secret = %target))]
    async fn patch(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError> {
        let current = self.get(target).await?;

        let mut desired = secret.to_secret();
        desired.metadata.resource_version = current.metadata.resource_version.clone();
        desired.metadata.annotations = merge(
            current.metadata.annotations,
            desired.metadata.annotations.take(),
        );
        desired.metadata.labels = merge(current.metadata.labels, desired.metadata.labels.take());

        match self
            .api(target)
            .replace(&target.name, &Self::post_params(), &desired)
            .await
        {
            Ok(_) => {
                info!("Updated secret {}", target);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                Err(StoreError::NotFound(target.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(secret = %target))]
    async fn delete(&self, target: &SecretRef) -> Result<(), StoreError> {
        match self
            .api(target)
            .delete(&target.name, &DeleteParams::default())
            .await
        {
            Ok(_) => {
                info!("Deleted secret {}", target);
                Ok(())
            }
            Err(kube::Error::Api(err)) if err.code == 404 => {
                Err(StoreError::NotFound(target.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, target: &SecretRef) -> Result<ManagedSecret, StoreError> {
        let secret = self.get(target).await?;
        debug!("Read secret {}", target);
        ManagedSecret::from_secret(&secret).map_err(|e| StoreError::Invalid(target.to_string(), e))
    }
}

fn merge(
    current: Option<BTreeMap<String, String>>,
    desired: Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (current, desired) {
        (None, None) => None,
        (current, desired) => {
            let mut merged = current.unwrap_or_default();
            merged.extend(desired.unwrap_or_default());
            Some(merged)
        }
    }
}
