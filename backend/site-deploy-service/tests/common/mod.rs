// In-memory collaborators for deploy and trust tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use resilience::{RetryConfig, ServiceConfig, TimeoutConfig};
use site_deploy_service::config::SiteConfig;
use site_deploy_service::error::{EdgeCacheError, StorageError, TrustError};
use site_deploy_service::services::{
    CredentialIssuer, DeployCredentials, DeployInvalidator, DeployOptions, EdgeCache,
    IdentityToken, InvalidationPlanner, InvalidationRequest, StorageTarget,
};
use site_deploy_service::snapshot::AssetSnapshot;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Millisecond backoff so retry tests stay fast
pub fn fast_policy(max_retries: u32) -> ServiceConfig {
    ServiceConfig {
        timeout: TimeoutConfig {
            duration: Duration::from_secs(5),
        },
        retry: RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        },
    }
}

pub fn fast_options() -> DeployOptions {
    DeployOptions {
        upload_concurrency: 4,
        upload: fast_policy(2),
        invalidation: fast_policy(3),
        ..DeployOptions::default()
    }
}

pub fn snapshot(files: &[(&str, &str)]) -> AssetSnapshot {
    let mut builder = AssetSnapshot::builder("index.html");
    for (path, content) in files {
        builder = builder
            .file(path, content.to_string())
            .expect("valid snapshot path");
    }
    builder.build()
}

pub fn deployer(
    storage: Arc<MemoryStorage>,
    edge: Arc<RecordingEdgeCache>,
    options: DeployOptions,
) -> DeployInvalidator {
    DeployInvalidator::new(
        storage,
        edge,
        InvalidationPlanner::new(Arc::new(SiteConfig::default()), 3000),
        options,
    )
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    /// Fail every attempt with a non-retryable error
    Permanent,
    /// Fail every attempt with a retryable error
    Transient,
    /// Fail this many attempts with a retryable error, then succeed
    TransientTimes(usize),
}

/// Origin bucket held in memory with per-key failure injection
pub struct MemoryStorage {
    id: String,
    objects: Mutex<BTreeMap<String, (Bytes, String)>>,
    put_failures: Mutex<HashMap<String, Failure>>,
    delete_failures: Mutex<HashMap<String, Failure>>,
    put_attempts: Mutex<HashMap<String, usize>>,
    put_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            put_failures: Mutex::new(HashMap::new()),
            delete_failures: Mutex::new(HashMap::new()),
            put_attempts: Mutex::new(HashMap::new()),
            put_delay: None,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_put_delay(mut self, delay: Duration) -> Self {
        self.put_delay = Some(delay);
        self
    }

    pub fn fail_put(&self, key: &str, failure: Failure) {
        self.put_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
    }

    pub fn fail_delete(&self, key: &str, failure: Failure) {
        self.delete_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
    }

    pub fn insert(&self, key: &str, body: &str) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            (Bytes::from(body.to_string()), "text/plain".to_string()),
        );
    }

    pub fn object(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(key).map(|(b, _)| b.clone())
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects.lock().unwrap().get(key).map(|(_, t)| t.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn put_attempts(&self, key: &str) -> usize {
        self.put_attempts
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn injected(failures: &Mutex<HashMap<String, Failure>>, key: &str) -> Option<StorageError> {
        let mut failures = failures.lock().unwrap();
        let failure = failures.get_mut(key)?;
        match failure {
            Failure::Permanent => Some(StorageError::Request {
                message: format!("access denied: {}", key),
                retryable: false,
            }),
            Failure::Transient => Some(StorageError::Request {
                message: format!("slow down: {}", key),
                retryable: true,
            }),
            Failure::TransientTimes(0) => None,
            Failure::TransientTimes(n) => {
                *n -= 1;
                Some(StorageError::Request {
                    message: format!("slow down: {}", key),
                    retryable: true,
                })
            }
        }
    }
}

#[async_trait]
impl StorageTarget for MemoryStorage {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn put(&self, path: &str, body: Bytes, content_type: &str) -> Result<(), StorageError> {
        *self
            .put_attempts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = Self::injected(&self.put_failures, path) {
            return Err(err);
        }

        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), (body, content_type.to_string()));
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Bytes>, StorageError> {
        Ok(self.object(path))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        if let Some(err) = Self::injected(&self.delete_failures, path) {
            return Err(err);
        }
        self.objects.lock().unwrap().remove(path);
        Ok(())
    }
}

/// Edge cache that records every request and can fail on demand
#[derive(Default)]
pub struct RecordingEdgeCache {
    requests: Mutex<Vec<InvalidationRequest>>,
    failures: Mutex<VecDeque<EdgeCacheError>>,
    fail_always: Mutex<Option<bool>>,
}

impl RecordingEdgeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue errors returned by the next calls, in order
    pub fn fail_next(&self, err: EdgeCacheError) {
        self.failures.lock().unwrap().push_back(err);
    }

    /// Fail every call; `retryable` picks the error kind
    pub fn fail_always(&self, retryable: bool) {
        *self.fail_always.lock().unwrap() = Some(retryable);
    }

    pub fn requests(&self) -> Vec<InvalidationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl EdgeCache for RecordingEdgeCache {
    async fn invalidate(&self, request: &InvalidationRequest) -> Result<String, EdgeCacheError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        if let Some(retryable) = *self.fail_always.lock().unwrap() {
            return Err(if retryable {
                EdgeCacheError::Request {
                    message: "TooManyInvalidationsInProgress".into(),
                    retryable: true,
                }
            } else {
                EdgeCacheError::InvalidRequest("NoSuchDistribution".into())
            });
        }

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(format!("I{}", call))
    }
}

/// Credential issuer that records calls; clones share state
#[derive(Clone, Default)]
pub struct StubIssuer {
    calls: Arc<Mutex<Vec<(String, Duration)>>>,
    failures: Arc<Mutex<VecDeque<TrustError>>>,
}

impl StubIssuer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: TrustError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> Vec<(String, Duration)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialIssuer for StubIssuer {
    async fn issue(
        &self,
        _token: &IdentityToken,
        session_name: &str,
        duration: Duration,
    ) -> Result<DeployCredentials, TrustError> {
        self.calls
            .lock()
            .unwrap()
            .push((session_name.to_string(), duration));

        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }

        Ok(DeployCredentials {
            access_key_id: "ASIATESTKEY".into(),
            secret_access_key: "test-secret".into(),
            session_token: "test-session".into(),
            expires_at: Utc::now() + chrono::Duration::seconds(duration.as_secs() as i64),
        })
    }
}
