// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked Kubernetes API, an in-memory Secret store and a
//! password store fixture with canned decryptions.

use crate::error::{PassOperatorError, StoreError};
use crate::kubernetes::SecretStore;
use crate::pass::{Decryptor, PasswordStore};
use crate::types::managed_secret::{ManagedSecret, SecretMetadata, SecretRef};
use crate::types::pass_secret::{ManagedSecretTemplate, PassSecret, PassSecretSpec};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::api::ObjectMeta;
use kube::client::Body;
use kube::Client;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tempfile::TempDir;
use tower::Service;

pub const TEST_KEY_ID: &str = "0123456789ABCDEF";

/// A request seen by the MockService
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Requests received so far, in arrival order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                body: String::from_utf8_lossy(&bytes).to_string(),
            });

            let (status, body) = response.unwrap_or_else(|| (404, status_json(404, "NotFound")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// A Status response with the given code and reason
pub fn status_json(code: u16, reason: &str) -> String {
    let status = if code < 400 { "Success" } else { "Failure" };
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": status,
        "message": reason,
        "reason": reason,
        "code": code
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// A Secret as returned by the API server, `data` given in plaintext
pub fn secret_json(
    name: &str,
    namespace: &str,
    data: &[(&str, &str)],
    annotation: Option<(&str, &str)>,
) -> String {
    let data: BTreeMap<_, _> = data
        .iter()
        .map(|(k, v)| (k.to_string(), STANDARD.encode(v.as_bytes())))
        .collect();
    let annotations: BTreeMap<_, _> = annotation
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "resourceVersion": "1",
            "uid": "test-uid",
            "annotations": annotations
        },
        "data": data,
        "type": "Opaque"
    })
    .to_string()
}

fn to_map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn make_managed_secret(name: &str, namespace: &str, data: &[(&str, &str)]) -> ManagedSecret {
    ManagedSecret::new(
        SecretMetadata::new(name, namespace),
        None,
        Some(to_map(data)),
        false,
        "Opaque",
    )
    .unwrap()
}

/// A PassSecret in namespace `default` mapping keys to store paths
pub fn make_pass_secret(
    name: &str,
    encrypted_data: &[(&str, &str)],
    target_name: &str,
    target_namespace: &str,
) -> PassSecret {
    let mut ps = PassSecret::new(
        name,
        PassSecretSpec {
            encrypted_data: to_map(encrypted_data),
            managed_secret: ManagedSecretTemplate {
                metadata: SecretMetadata::new(target_name, target_namespace),
                type_: "Opaque".to_string(),
                immutable: false,
            },
        },
    );
    ps.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        resource_version: Some("1".to_string()),
        ..Default::default()
    };
    ps
}

/// Decryptor that serves canned plaintext keyed by entry path
#[derive(Debug, Default)]
pub struct FakeDecryptor {
    entries: HashMap<PathBuf, String>,
}

#[async_trait]
impl Decryptor for FakeDecryptor {
    async fn decrypt(&self, path: &Path, _passphrase: &str) -> crate::error::Result<String> {
        self.entries
            .get(path)
            .cloned()
            .ok_or_else(|| PassOperatorError::Gpg(format!("{}.gpg does not exist", path.display())))
    }
}

/// A password store rooted in a temp dir with a valid `.gpg-id`. Keep the
/// `TempDir` alive for the duration of the test.
pub fn password_store(entries: &[(&str, &str)]) -> (TempDir, Arc<PasswordStore>) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".gpg-id"), format!("{}\n", TEST_KEY_ID)).unwrap();

    let decryptor = FakeDecryptor {
        entries: entries
            .iter()
            .map(|(path, plain)| (dir.path().join(path), plain.to_string()))
            .collect(),
    };
    let store = PasswordStore::new(
        dir.path().to_path_buf(),
        TEST_KEY_ID,
        "",
        Arc::new(decryptor),
    );
    (dir, Arc::new(store))
}

/// A call made against the FakeSecretStore
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Create(SecretRef, BTreeMap<String, String>),
    Patch(SecretRef, BTreeMap<String, String>),
    Delete(SecretRef),
    Read(SecretRef),
}

pub fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    })
}

/// In-memory SecretStore recording every call
#[derive(Debug, Default)]
pub struct FakeSecretStore {
    secrets: Mutex<BTreeMap<SecretRef, ManagedSecret>>,
    calls: Mutex<Vec<StoreCall>>,
    failing_creates: AtomicUsize,
}

impl FakeSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(self, secret: ManagedSecret) -> Self {
        self.secrets.lock().unwrap().insert(secret.target(), secret);
        self
    }

    /// Fail the next `n` creates with a server error
    pub fn fail_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    pub fn get(&self, target: &SecretRef) -> Option<ManagedSecret> {
        self.secrets.lock().unwrap().get(target).cloned()
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls that change state, i.e. everything except reads
    pub fn mutations(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, StoreCall::Read(_)))
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SecretStore for FakeSecretStore {
    async fn create(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError> {
        self.record(StoreCall::Create(target.clone(), secret.string_data().clone()));
        let failing = self.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_creates.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Api(api_error(500, "InternalError")));
        }

        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(target) {
            return Err(StoreError::AlreadyExists(target.to_string()));
        }
        secrets.insert(target.clone(), secret.clone());
        Ok(())
    }

    async fn patch(&self, target: &SecretRef, secret: &ManagedSecret) -> Result<(), StoreError> {
        self.record(StoreCall::Patch(target.clone(), secret.string_data().clone()));
        let mut secrets = self.secrets.lock().unwrap();
        match secrets.get(target) {
            None => Err(StoreError::NotFound(target.to_string())),
            Some(current) if current.immutable && !current.data_equals(secret) => {
                Err(StoreError::Api(api_error(422, "Invalid")))
            }
            Some(_) => {
                secrets.insert(target.clone(), secret.clone());
                Ok(())
            }
        }
    }

    async fn delete(&self, target: &SecretRef) -> Result<(), StoreError> {
        self.record(StoreCall::Delete(target.clone()));
        match self.secrets.lock().unwrap().remove(target) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(target.to_string())),
        }
    }

    async fn read(&self, target: &SecretRef) -> Result<ManagedSecret, StoreError> {
        self.record(StoreCall::Read(target.clone()));
        self.get(target)
            .ok_or_else(|| StoreError::NotFound(target.to_string()))
    }
}
