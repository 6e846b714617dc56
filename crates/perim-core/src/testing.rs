//! In-memory backends for tests.
//!
//! The fakes keep just enough state to reproduce the provider behaviors the
//! domain layer depends on: duplicate/not-attached errors, delete refusal
//! while a policy is still attached, access denial, and paging. Every call
//! is appended to a log so tests can assert on call order.

use crate::backend::{BackendFactory, IdentityProvider, ObjectStore, OrganizationsApi, StoredObject};
use crate::credentials::CredentialBundle;
use crate::error::{PerimeterError, PerimeterResult};
use async_trait::async_trait;
use bytes::Bytes;
use perim_aws::cognito::AuthStep;
use perim_aws::organizations::{Policy, PolicySummary, PolicyTarget, PolicyType, Root};
use perim_aws::s3::{Bucket, Object, ObjectMetadata};
use perim_aws::{AwsCredentials, AwsError, AwsRegion, PaginatedResponse};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};

fn provider_error(service: &str, code: &str, message: &str, status: u16) -> PerimeterError {
    AwsError::new(service, code, message, status).into()
}

/// Slice `items` into a page starting at the numeric offset in `token`.
fn page_of<T: Clone>(items: &[T], token: Option<String>, page_size: usize) -> PaginatedResponse<T> {
    let start: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
    let size = page_size.max(1);
    let end = (start + size).min(items.len());
    let next = (end < items.len()).then(|| end.to_string());
    PaginatedResponse::new(items[start.min(end)..end].to_vec(), next)
}

// ── Organizations ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct StoredPolicy {
    summary: PolicySummary,
    content: String,
}

#[derive(Debug, Default)]
struct OrgState {
    policies: Vec<StoredPolicy>,
    attachments: BTreeSet<(String, String)>,
    next_id: usize,
}

/// Organizations fake with a single root `r-root`.
#[derive(Debug)]
pub struct FakeOrganizations {
    state: Mutex<OrgState>,
    roots: Vec<Root>,
    page_size: usize,
    calls: Mutex<Vec<String>>,
    failures: Mutex<BTreeMap<String, PerimeterError>>,
}

impl Default for FakeOrganizations {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeOrganizations {
    pub const ROOT_ID: &'static str = "r-root";

    pub fn new() -> Self {
        Self {
            state: Mutex::new(OrgState::default()),
            roots: vec![Root {
                id: Self::ROOT_ID.to_string(),
                arn: None,
                name: Some("Root".to_string()),
            }],
            page_size: 2,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn without_roots(mut self) -> Self {
        self.roots.clear();
        self
    }

    /// Seed a policy of the given type.
    pub fn with_policy(self, name: &str, policy_type: PolicyType, content: &str) -> Self {
        self.insert_policy(name, policy_type, content, "");
        self
    }

    /// Make every call to `action` fail with `error`.
    pub fn fail(&self, action: &str, error: PerimeterError) {
        lock(&self.failures).insert(action.to_string(), error);
    }

    pub fn attach_directly(&self, name: &str, target_id: &str) {
        if let Some(id) = self.policy_id(name) {
            lock(&self.state).attachments.insert((id, target_id.to_string()));
        }
    }

    pub fn policy_id(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .policies
            .iter()
            .find(|p| p.summary.name == name)
            .map(|p| p.summary.id.clone())
    }

    pub fn policy_content(&self, name: &str) -> Option<String> {
        lock(&self.state)
            .policies
            .iter()
            .find(|p| p.summary.name == name)
            .map(|p| p.content.clone())
    }

    pub fn is_attached(&self, name: &str, target_id: &str) -> bool {
        match self.policy_id(name) {
            Some(id) => lock(&self.state).attachments.contains(&(id, target_id.to_string())),
            None => false,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Calls whose action name is `action`.
    pub fn count(&self, action: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(':').next() == Some(action))
            .count()
    }

    fn record(&self, call: String) -> PerimeterResult<()> {
        let action = call.split(':').next().unwrap_or_default().to_string();
        lock(&self.calls).push(call);
        match lock(&self.failures).get(&action) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn insert_policy(&self, name: &str, policy_type: PolicyType, content: &str, description: &str) -> PolicySummary {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let summary = PolicySummary {
            id: format!("p-{:04}", state.next_id),
            arn: None,
            name: name.to_string(),
            description: Some(description.to_string()),
            policy_type: Some(policy_type.as_str().to_string()),
            aws_managed: false,
        };
        state.policies.push(StoredPolicy {
            summary: summary.clone(),
            content: content.to_string(),
        });
        summary
    }
}

#[async_trait]
impl OrganizationsApi for FakeOrganizations {
    async fn list_policies_page(
        &self,
        policy_type: PolicyType,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicySummary>> {
        self.record(format!("ListPolicies:{}", policy_type.as_str()))?;
        let matching: Vec<PolicySummary> = lock(&self.state)
            .policies
            .iter()
            .filter(|p| p.summary.policy_type.as_deref() == Some(policy_type.as_str()))
            .map(|p| p.summary.clone())
            .collect();
        Ok(page_of(&matching, next_token, self.page_size))
    }

    async fn list_roots_page(&self, next_token: Option<String>) -> PerimeterResult<PaginatedResponse<Root>> {
        self.record("ListRoots".to_string())?;
        Ok(page_of(&self.roots, next_token, self.page_size))
    }

    async fn list_targets_page(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicyTarget>> {
        self.record(format!("ListTargetsForPolicy:{}", policy_id))?;
        let targets: Vec<PolicyTarget> = lock(&self.state)
            .attachments
            .iter()
            .filter(|(p, _)| p == policy_id)
            .map(|(_, t)| PolicyTarget {
                target_id: t.clone(),
                arn: None,
                name: None,
                target_type: Some("ROOT".to_string()),
            })
            .collect();
        Ok(page_of(&targets, next_token, self.page_size))
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()> {
        self.record(format!("AttachPolicy:{}:{}", policy_id, target_id))?;
        let mut state = lock(&self.state);
        if !state.policies.iter().any(|p| p.summary.id == policy_id) {
            return Err(provider_error("organizations", "PolicyNotFoundException", "no such policy", 400));
        }
        if !state.attachments.insert((policy_id.to_string(), target_id.to_string())) {
            return Err(provider_error(
                "organizations",
                "DuplicatePolicyAttachmentException",
                "policy already attached",
                400,
            ));
        }
        Ok(())
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()> {
        self.record(format!("DetachPolicy:{}:{}", policy_id, target_id))?;
        let mut state = lock(&self.state);
        if !state.attachments.remove(&(policy_id.to_string(), target_id.to_string())) {
            return Err(provider_error(
                "organizations",
                "PolicyNotAttachedException",
                "policy not attached",
                400,
            ));
        }
        Ok(())
    }

    async fn create_policy(
        &self,
        name: &str,
        description: &str,
        content: &str,
        policy_type: PolicyType,
    ) -> PerimeterResult<PolicySummary> {
        self.record(format!("CreatePolicy:{}", name))?;
        if self.policy_id(name).is_some() {
            return Err(provider_error("organizations", "DuplicatePolicyException", "name in use", 400));
        }
        Ok(self.insert_policy(name, policy_type, content, description))
    }

    async fn describe_policy(&self, policy_id: &str) -> PerimeterResult<Policy> {
        self.record(format!("DescribePolicy:{}", policy_id))?;
        lock(&self.state)
            .policies
            .iter()
            .find(|p| p.summary.id == policy_id)
            .map(|p| Policy {
                summary: p.summary.clone(),
                content: p.content.clone(),
            })
            .ok_or_else(|| provider_error("organizations", "PolicyNotFoundException", "no such policy", 400))
    }

    async fn delete_policy(&self, policy_id: &str) -> PerimeterResult<()> {
        self.record(format!("DeletePolicy:{}", policy_id))?;
        let mut state = lock(&self.state);
        if state.attachments.iter().any(|(p, _)| p == policy_id) {
            return Err(provider_error("organizations", "PolicyInUseException", "policy is attached", 400));
        }
        let before = state.policies.len();
        state.policies.retain(|p| p.summary.id != policy_id);
        if state.policies.len() == before {
            return Err(provider_error("organizations", "PolicyNotFoundException", "no such policy", 400));
        }
        Ok(())
    }
}

// ── Object store ────────────────────────────────────────────────────────

/// S3 fake keyed by bucket then object key.
#[derive(Debug)]
pub struct FakeObjectStore {
    buckets: Mutex<BTreeMap<String, BTreeMap<String, StoredObject>>>,
    rejected: Mutex<BTreeMap<String, (String, u16)>>,
    page_size: usize,
    calls: Mutex<Vec<String>>,
}

impl Default for FakeObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeObjectStore {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            rejected: Mutex::new(BTreeMap::new()),
            page_size: 2,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_bucket(self, bucket: &str) -> Self {
        lock(&self.buckets).entry(bucket.to_string()).or_default();
        self
    }

    pub fn with_object(self, bucket: &str, key: &str, content_type: &str, body: &[u8]) -> Self {
        lock(&self.buckets).entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body: Bytes::copy_from_slice(body),
                content_type: Some(content_type.to_string()),
            },
        );
        self
    }

    /// Every call touching `bucket` fails with AccessDenied.
    pub fn deny(self, bucket: &str) -> Self {
        self.reject(bucket, "AccessDenied", 403)
    }

    /// Every call touching `bucket` fails with the given S3 error code.
    pub fn reject(self, bucket: &str, code: &str, status: u16) -> Self {
        lock(&self.rejected).insert(bucket.to_string(), (code.to_string(), status));
        self
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        lock(&self.buckets).get(bucket).and_then(|b| b.get(key)).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn count(&self, action: &str) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.split(':').next() == Some(action))
            .count()
    }

    fn record(&self, action: &str, bucket: &str, key: Option<&str>) -> PerimeterResult<()> {
        let call = match key {
            Some(k) => format!("{}:{}/{}", action, bucket, k),
            None => format!("{}:{}", action, bucket),
        };
        lock(&self.calls).push(call);
        if let Some((code, status)) = lock(&self.rejected).get(bucket).cloned() {
            return Err(provider_error("s3", &code, "request rejected", status));
        }
        if !bucket.is_empty() && !lock(&self.buckets).contains_key(bucket) {
            return Err(provider_error("s3", "NoSuchBucket", "The specified bucket does not exist", 404));
        }
        Ok(())
    }

    fn missing_key() -> PerimeterError {
        provider_error("s3", "NoSuchKey", "The specified key does not exist.", 404)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list_buckets(&self) -> PerimeterResult<Vec<Bucket>> {
        self.record("ListBuckets", "", None)?;
        Ok(lock(&self.buckets)
            .keys()
            .map(|name| Bucket {
                name: name.clone(),
                creation_date: "2024-01-01T00:00:00.000Z".to_string(),
            })
            .collect())
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<Object>> {
        self.record("ListObjectsV2", bucket, None)?;
        let objects: Vec<Object> = lock(&self.buckets)
            .get(bucket)
            .map(|b| {
                b.iter()
                    .map(|(key, obj)| Object {
                        key: key.clone(),
                        size: obj.body.len() as u64,
                        last_modified: "2024-01-01T00:00:00.000Z".to_string(),
                        etag: "\"etag\"".to_string(),
                        storage_class: Some("STANDARD".to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(page_of(&objects, next_token, self.page_size))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> PerimeterResult<ObjectMetadata> {
        self.record("HeadObject", bucket, Some(key))?;
        let obj = self.object(bucket, key).ok_or_else(Self::missing_key)?;
        Ok(ObjectMetadata {
            key: key.to_string(),
            content_length: obj.body.len() as u64,
            content_type: obj.content_type,
            etag: None,
            last_modified: None,
        })
    }

    async fn get_object(&self, bucket: &str, key: &str) -> PerimeterResult<StoredObject> {
        self.record("GetObject", bucket, Some(key))?;
        self.object(bucket, key).ok_or_else(Self::missing_key)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> PerimeterResult<()> {
        self.record("PutObject", bucket, Some(key))?;
        lock(&self.buckets).entry(bucket.to_string()).or_default().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.map(|s| s.to_string()),
            },
        );
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> PerimeterResult<()> {
        self.record("DeleteObject", bucket, Some(key))?;
        if let Some(b) = lock(&self.buckets).get_mut(bucket) {
            b.remove(key);
        }
        Ok(())
    }

    fn presign_get(&self, bucket: &str, key: &str, expires_in_secs: u64) -> PerimeterResult<String> {
        Ok(format!(
            "https://{}.s3.fake/{}?X-Amz-Expires={}",
            bucket, key, expires_in_secs
        ))
    }
}

// ── Identity ────────────────────────────────────────────────────────────

/// Cognito fake that replays a scripted sequence of auth steps: the first
/// answers InitiateAuth, each following one answers the next challenge
/// response.
#[derive(Debug)]
pub struct FakeIdentity {
    steps: Mutex<VecDeque<AuthStep>>,
    credentials: AwsCredentials,
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<BTreeMap<String, String>>>,
}

impl FakeIdentity {
    pub const IDENTITY_ID: &'static str = "us-east-1:00000000-0000-0000-0000-000000000001";

    pub fn new(steps: Vec<AuthStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            credentials: AwsCredentials::new_temporary("ASIAFAKE", "fake-secret", "fake-session", None),
            calls: Mutex::new(Vec::new()),
            responses: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Challenge responses received, in order.
    pub fn responses(&self) -> Vec<BTreeMap<String, String>> {
        lock(&self.responses).clone()
    }

    fn next_step(&self) -> PerimeterResult<AuthStep> {
        lock(&self.steps).pop_front().ok_or_else(|| {
            provider_error("cognito-idp", "NotAuthorizedException", "Incorrect username or password.", 400)
        })
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn initiate_auth(
        &self,
        client_id: &str,
        auth_flow: &str,
        parameters: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep> {
        lock(&self.calls).push(format!("InitiateAuth:{}:{}", client_id, auth_flow));
        if !parameters.contains_key("SRP_A") {
            return Err(provider_error("cognito-idp", "InvalidParameterException", "SRP_A missing", 400));
        }
        self.next_step()
    }

    async fn respond_to_auth_challenge(
        &self,
        client_id: &str,
        challenge_name: &str,
        _session: Option<&str>,
        responses: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep> {
        lock(&self.calls).push(format!("RespondToAuthChallenge:{}:{}", client_id, challenge_name));
        lock(&self.responses).push(responses.clone());
        self.next_step()
    }

    async fn get_id(
        &self,
        identity_pool_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<String> {
        let keys: Vec<&str> = logins.keys().map(|k| k.as_str()).collect();
        lock(&self.calls).push(format!("GetId:{}:{}", identity_pool_id, keys.join(",")));
        Ok(Self::IDENTITY_ID.to_string())
    }

    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        _logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<AwsCredentials> {
        lock(&self.calls).push(format!("GetCredentialsForIdentity:{}", identity_id));
        Ok(self.credentials.clone())
    }
}

// ── Factory ─────────────────────────────────────────────────────────────

/// Hands out the same shared fakes regardless of credentials.
#[derive(Clone)]
pub struct FakeBackend {
    pub organizations: Arc<FakeOrganizations>,
    pub objects: Arc<FakeObjectStore>,
    pub identity: Arc<FakeIdentity>,
}

impl FakeBackend {
    pub fn new(organizations: FakeOrganizations, objects: FakeObjectStore, identity: FakeIdentity) -> Self {
        Self {
            organizations: Arc::new(organizations),
            objects: Arc::new(objects),
            identity: Arc::new(identity),
        }
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new(FakeOrganizations::new(), FakeObjectStore::new(), FakeIdentity::new(Vec::new()))
    }
}

impl BackendFactory for FakeBackend {
    fn organizations(&self, _credentials: &CredentialBundle) -> Arc<dyn OrganizationsApi> {
        self.organizations.clone()
    }

    fn object_store(&self, _credentials: &CredentialBundle) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }

    fn identity(&self, _region: &AwsRegion) -> Arc<dyn IdentityProvider> {
        self.identity.clone()
    }
}

/// Credentials accepted by every fake.
pub fn test_credentials() -> CredentialBundle {
    match CredentialBundle::new("ASIATEST", "test-secret", Some("test-token"), "us-east-1") {
        Ok(bundle) => bundle,
        Err(err) => panic!("test credentials rejected: {}", err),
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
