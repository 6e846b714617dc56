//! Seams between the domain operations and AWS.
//!
//! Each trait mirrors the handful of provider calls one area needs, one page
//! at a time; draining pages is the domain layer's job. [`SdkBackend`] wires
//! the traits to the `perim-aws` clients, and tests swap in the in-memory
//! fakes from [`crate::testing`].

use crate::credentials::CredentialBundle;
use crate::error::PerimeterResult;
use async_trait::async_trait;
use bytes::Bytes;
use perim_aws::cognito::{AuthStep, CognitoIdentityClient, CognitoIdpClient};
use perim_aws::organizations::{OrganizationsClient, Policy, PolicySummary, PolicyTarget, PolicyType, Root};
use perim_aws::s3::{Bucket, Object, ObjectMetadata, S3Client};
use perim_aws::{AwsClient, AwsCredentials, AwsRegion, PaginatedResponse, RetryConfig};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An object body together with its stored content type.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
}

#[async_trait]
pub trait OrganizationsApi: Send + Sync {
    async fn list_policies_page(
        &self,
        policy_type: PolicyType,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicySummary>>;

    async fn list_roots_page(&self, next_token: Option<String>) -> PerimeterResult<PaginatedResponse<Root>>;

    async fn list_targets_page(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicyTarget>>;

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()>;

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()>;

    async fn create_policy(
        &self,
        name: &str,
        description: &str,
        content: &str,
        policy_type: PolicyType,
    ) -> PerimeterResult<PolicySummary>;

    async fn describe_policy(&self, policy_id: &str) -> PerimeterResult<Policy>;

    async fn delete_policy(&self, policy_id: &str) -> PerimeterResult<()>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> PerimeterResult<Vec<Bucket>>;

    async fn list_objects_page(
        &self,
        bucket: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<Object>>;

    async fn head_object(&self, bucket: &str, key: &str) -> PerimeterResult<ObjectMetadata>;

    async fn get_object(&self, bucket: &str, key: &str) -> PerimeterResult<StoredObject>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> PerimeterResult<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> PerimeterResult<()>;

    fn presign_get(&self, bucket: &str, key: &str, expires_in_secs: u64) -> PerimeterResult<String>;
}

/// Cognito user pool and identity pool calls. None of them carry AWS
/// credentials.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn initiate_auth(
        &self,
        client_id: &str,
        auth_flow: &str,
        parameters: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep>;

    async fn respond_to_auth_challenge(
        &self,
        client_id: &str,
        challenge_name: &str,
        session: Option<&str>,
        responses: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep>;

    async fn get_id(
        &self,
        identity_pool_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<String>;

    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<AwsCredentials>;
}

/// Builds backends for a request's credentials.
pub trait BackendFactory: Send + Sync {
    fn organizations(&self, credentials: &CredentialBundle) -> Arc<dyn OrganizationsApi>;

    fn object_store(&self, credentials: &CredentialBundle) -> Arc<dyn ObjectStore>;

    fn identity(&self, region: &AwsRegion) -> Arc<dyn IdentityProvider>;
}

// ── AWS-backed implementation ───────────────────────────────────────────

/// Factory over the real AWS clients.
#[derive(Debug, Clone, Default)]
pub struct SdkBackend {
    retry: RetryConfig,
    endpoint_override: Option<String>,
}

impl SdkBackend {
    pub fn new(retry: RetryConfig, endpoint_override: Option<String>) -> Self {
        Self {
            retry,
            endpoint_override,
        }
    }

    fn signed_client(&self, credentials: &CredentialBundle) -> AwsClient {
        AwsClient::new(
            credentials.credentials().clone(),
            credentials.region().clone(),
            self.retry.clone(),
            self.endpoint_override.clone(),
        )
    }
}

impl BackendFactory for SdkBackend {
    fn organizations(&self, credentials: &CredentialBundle) -> Arc<dyn OrganizationsApi> {
        Arc::new(SdkOrganizations(OrganizationsClient::new(self.signed_client(credentials))))
    }

    fn object_store(&self, credentials: &CredentialBundle) -> Arc<dyn ObjectStore> {
        Arc::new(SdkObjectStore(S3Client::new(self.signed_client(credentials))))
    }

    fn identity(&self, region: &AwsRegion) -> Arc<dyn IdentityProvider> {
        let client = AwsClient::anonymous(region.clone(), self.retry.clone(), self.endpoint_override.clone());
        Arc::new(SdkIdentity {
            user_pool: CognitoIdpClient::new(client.clone()),
            identity_pool: CognitoIdentityClient::new(client),
        })
    }
}

struct SdkOrganizations(OrganizationsClient);

#[async_trait]
impl OrganizationsApi for SdkOrganizations {
    async fn list_policies_page(
        &self,
        policy_type: PolicyType,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicySummary>> {
        Ok(self.0.list_policies_page(policy_type, next_token.as_deref()).await?)
    }

    async fn list_roots_page(&self, next_token: Option<String>) -> PerimeterResult<PaginatedResponse<Root>> {
        Ok(self.0.list_roots_page(next_token.as_deref()).await?)
    }

    async fn list_targets_page(
        &self,
        policy_id: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<PolicyTarget>> {
        Ok(self
            .0
            .list_targets_for_policy_page(policy_id, next_token.as_deref())
            .await?)
    }

    async fn attach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()> {
        Ok(self.0.attach_policy(policy_id, target_id).await?)
    }

    async fn detach_policy(&self, policy_id: &str, target_id: &str) -> PerimeterResult<()> {
        Ok(self.0.detach_policy(policy_id, target_id).await?)
    }

    async fn create_policy(
        &self,
        name: &str,
        description: &str,
        content: &str,
        policy_type: PolicyType,
    ) -> PerimeterResult<PolicySummary> {
        let policy = self.0.create_policy(name, description, content, policy_type).await?;
        Ok(policy.summary)
    }

    async fn describe_policy(&self, policy_id: &str) -> PerimeterResult<Policy> {
        Ok(self.0.describe_policy(policy_id).await?)
    }

    async fn delete_policy(&self, policy_id: &str) -> PerimeterResult<()> {
        Ok(self.0.delete_policy(policy_id).await?)
    }
}

struct SdkObjectStore(S3Client);

#[async_trait]
impl ObjectStore for SdkObjectStore {
    async fn list_buckets(&self) -> PerimeterResult<Vec<Bucket>> {
        Ok(self.0.list_buckets().await?)
    }

    async fn list_objects_page(
        &self,
        bucket: &str,
        next_token: Option<String>,
    ) -> PerimeterResult<PaginatedResponse<Object>> {
        let page = self.0.list_objects_v2(bucket, None, next_token.as_deref()).await?;
        let next = if page.is_truncated {
            page.next_continuation_token
        } else {
            None
        };
        Ok(PaginatedResponse::new(page.contents, next))
    }

    async fn head_object(&self, bucket: &str, key: &str) -> PerimeterResult<ObjectMetadata> {
        Ok(self.0.head_object(bucket, key).await?)
    }

    async fn get_object(&self, bucket: &str, key: &str) -> PerimeterResult<StoredObject> {
        let out = self.0.get_object(bucket, key).await?;
        Ok(StoredObject {
            body: out.body,
            content_type: out.metadata.content_type,
        })
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> PerimeterResult<()> {
        self.0.put_object(bucket, key, body, content_type).await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> PerimeterResult<()> {
        Ok(self.0.delete_object(bucket, key).await?)
    }

    fn presign_get(&self, bucket: &str, key: &str, expires_in_secs: u64) -> PerimeterResult<String> {
        Ok(self.0.presign_get(bucket, key, expires_in_secs)?)
    }
}

struct SdkIdentity {
    user_pool: CognitoIdpClient,
    identity_pool: CognitoIdentityClient,
}

#[async_trait]
impl IdentityProvider for SdkIdentity {
    async fn initiate_auth(
        &self,
        client_id: &str,
        auth_flow: &str,
        parameters: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep> {
        Ok(self.user_pool.initiate_auth(client_id, auth_flow, parameters).await?)
    }

    async fn respond_to_auth_challenge(
        &self,
        client_id: &str,
        challenge_name: &str,
        session: Option<&str>,
        responses: &BTreeMap<String, String>,
    ) -> PerimeterResult<AuthStep> {
        Ok(self
            .user_pool
            .respond_to_auth_challenge(client_id, challenge_name, session, responses)
            .await?)
    }

    async fn get_id(
        &self,
        identity_pool_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<String> {
        Ok(self.identity_pool.get_id(identity_pool_id, logins).await?)
    }

    async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> PerimeterResult<AwsCredentials> {
        Ok(self
            .identity_pool
            .get_credentials_for_identity(identity_id, logins)
            .await?)
    }
}
