//! Organization policy lookup, attach/detach toggling, and lifecycle.
//!
//! Every multi-call sequence here (delete, modify) is applied step by step;
//! if a later step fails the earlier ones stay applied.

pub mod document;
pub mod template;

pub use document::{describe_document, PolicyDescription};
pub use template::{render, PerimeterTemplate, PolicyParams};

use crate::backend::OrganizationsApi;
use crate::error::{PerimeterError, PerimeterResult};
use perim_aws::drain_pages;
use perim_aws::organizations::{PolicyType, DUPLICATE_POLICY_ATTACHMENT, POLICY_NOT_ATTACHED};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a policy exists and is attached to the organization root.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentStatus {
    pub exists: bool,
    pub attached: bool,
}

/// Policy operations against one organization.
#[derive(Clone)]
pub struct PolicyManager {
    org: Arc<dyn OrganizationsApi>,
}

impl PolicyManager {
    pub fn new(org: Arc<dyn OrganizationsApi>) -> Self {
        Self { org }
    }

    /// Resolve a policy name to its id by scanning every policy of
    /// `policy_type`. A missing policy is logged and returned as `None`.
    pub async fn find_policy_id(&self, name: &str, policy_type: PolicyType) -> PerimeterResult<Option<String>> {
        let org = &self.org;
        let policies = drain_pages(|token| async move { org.list_policies_page(policy_type, token).await }).await?;
        let found = policies.into_iter().find(|p| p.name == name).map(|p| p.id);
        if found.is_none() {
            log::info!("no {} named '{}'", policy_type.as_str(), name);
        }
        Ok(found)
    }

    /// Id of the organization root. Organizations have exactly one.
    pub async fn organization_root_id(&self) -> PerimeterResult<String> {
        let org = &self.org;
        let roots = drain_pages(|token| async move { org.list_roots_page(token).await }).await?;
        roots
            .into_iter()
            .next()
            .map(|r| r.id)
            .ok_or_else(|| PerimeterError::not_found("organization root", "(none)"))
    }

    /// Attach (`attach = true`) or detach the named policy at the root.
    ///
    /// Returns `false` when the policy does not exist. Reaching a state that
    /// already holds counts as success.
    pub async fn toggle(&self, name: &str, policy_type: PolicyType, attach: bool) -> PerimeterResult<bool> {
        let policy_id = match self.find_policy_id(name, policy_type).await? {
            Some(id) => id,
            None => return Ok(false),
        };
        let root_id = self.organization_root_id().await?;

        let result = if attach {
            self.org.attach_policy(&policy_id, &root_id).await
        } else {
            self.org.detach_policy(&policy_id, &root_id).await
        };

        match result {
            Ok(()) => {
                log::info!(
                    "{} policy '{}' ({}) {} root {}",
                    policy_type.as_str(),
                    name,
                    policy_id,
                    if attach { "attached to" } else { "detached from" },
                    root_id
                );
                Ok(true)
            }
            Err(e) if attach && e.is_provider_code(DUPLICATE_POLICY_ATTACHMENT) => {
                log::debug!("policy '{}' already attached to {}", name, root_id);
                Ok(true)
            }
            Err(e) if !attach && e.is_provider_code(POLICY_NOT_ATTACHED) => {
                log::debug!("policy '{}' already detached from {}", name, root_id);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Attachment state of the named policy at the root.
    pub async fn is_attached_to_root(&self, name: &str, policy_type: PolicyType) -> PerimeterResult<AttachmentStatus> {
        let policy_id = match self.find_policy_id(name, policy_type).await? {
            Some(id) => id,
            None => {
                return Ok(AttachmentStatus {
                    exists: false,
                    attached: false,
                })
            }
        };
        let root_id = self.organization_root_id().await?;
        let org = &self.org;
        let policy_ref = policy_id.as_str();
        let targets =
            drain_pages(|token| async move { org.list_targets_page(policy_ref, token).await }).await?;
        Ok(AttachmentStatus {
            exists: true,
            attached: targets.iter().any(|t| t.target_id == root_id),
        })
    }

    /// Create the catalog policy from `params`. Validation failures are
    /// returned before any provider call.
    pub async fn create(&self, template: PerimeterTemplate, params: &PolicyParams) -> PerimeterResult<bool> {
        let content = render(template, params)?;
        let summary = self
            .org
            .create_policy(
                template.policy_name(),
                template.description(),
                &content,
                template.policy_type(),
            )
            .await?;
        log::info!("created policy '{}' ({})", summary.name, summary.id);
        Ok(true)
    }

    /// Detach the named policy from the root, then delete it.
    ///
    /// Returns `false` when the policy cannot be resolved.
    pub async fn delete(&self, name: &str, policy_type: PolicyType) -> PerimeterResult<bool> {
        if !self.toggle(name, policy_type, false).await? {
            log::info!("policy '{}' was not detached; it may never have existed", name);
        }
        let policy_id = match self.find_policy_id(name, policy_type).await? {
            Some(id) => id,
            None => return Ok(false),
        };
        self.org.delete_policy(&policy_id).await?;
        log::info!("deleted policy '{}' ({})", name, policy_id);
        Ok(true)
    }

    /// Structured view of the named policy's first statement.
    pub async fn describe(&self, name: &str, policy_type: PolicyType) -> PerimeterResult<PolicyDescription> {
        let policy_id = self
            .find_policy_id(name, policy_type)
            .await?
            .ok_or_else(|| PerimeterError::not_found("policy", name))?;
        let policy = self.org.describe_policy(&policy_id).await?;
        describe_document(&policy.content)
    }

    /// Replace the catalog policy: delete it (if present), recreate it from
    /// `params`, and attach it to the root when `attach` is set.
    pub async fn modify(
        &self,
        template: PerimeterTemplate,
        params: &PolicyParams,
        attach: bool,
    ) -> PerimeterResult<bool> {
        render(template, params)?;
        self.delete(template.policy_name(), template.policy_type()).await?;
        self.create(template, params).await?;
        if attach {
            return self
                .toggle(template.policy_name(), template.policy_type(), true)
                .await;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerimeterErrorKind;
    use crate::testing::FakeOrganizations;
    use perim_aws::AwsError;

    const SCP: &str = "network-perimeter-scp";
    const CONTENT: &str = r#"{"Version":"2012-10-17","Statement":[{"Sid":"S","Effect":"Deny","Action":"s3:*","Resource":"*"}]}"#;

    fn setup(org: FakeOrganizations) -> (Arc<FakeOrganizations>, PolicyManager) {
        let org = Arc::new(org);
        (org.clone(), PolicyManager::new(org))
    }

    fn seeded() -> FakeOrganizations {
        FakeOrganizations::new()
            .with_policy("FullAWSAccess", PolicyType::ServiceControlPolicy, "{}")
            .with_policy("other-a", PolicyType::ServiceControlPolicy, "{}")
            .with_policy(SCP, PolicyType::ServiceControlPolicy, CONTENT)
            .with_policy("rcp-x", PolicyType::ResourceControlPolicy, "{}")
    }

    fn params() -> PolicyParams {
        PolicyParams {
            sid: Some("Edited".into()),
            effect: "Deny".into(),
            actions: vec!["s3:GetObject".into()],
            resources: vec!["*".into()],
            source_ips: vec!["192.0.2.0/24".into()],
            source_vpcs: vec![],
        }
    }

    #[tokio::test]
    async fn find_policy_scans_every_page() {
        let (org, mgr) = setup(seeded());
        let id = mgr.find_policy_id(SCP, PolicyType::ServiceControlPolicy).await.unwrap();
        assert_eq!(id, org.policy_id(SCP));
        // three SCPs at two per page
        assert_eq!(org.count("ListPolicies"), 2);
        assert!(mgr.find_policy_id(SCP, PolicyType::ResourceControlPolicy).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn toggle_is_idempotent() {
        let (org, mgr) = setup(seeded());
        let scp = PolicyType::ServiceControlPolicy;

        assert!(mgr.toggle(SCP, scp, true).await.unwrap());
        assert!(mgr.toggle(SCP, scp, true).await.unwrap());
        assert!(org.is_attached(SCP, FakeOrganizations::ROOT_ID));

        assert!(mgr.toggle(SCP, scp, false).await.unwrap());
        assert!(mgr.toggle(SCP, scp, false).await.unwrap());
        assert!(!org.is_attached(SCP, FakeOrganizations::ROOT_ID));
        assert_eq!(org.count("AttachPolicy"), 2);
        assert_eq!(org.count("DetachPolicy"), 2);
    }

    #[tokio::test]
    async fn toggle_unknown_policy_returns_false() {
        let (org, mgr) = setup(seeded());
        assert!(!mgr.toggle("missing", PolicyType::ServiceControlPolicy, true).await.unwrap());
        assert_eq!(org.count("ListRoots"), 0);
        assert_eq!(org.count("AttachPolicy"), 0);
    }

    #[tokio::test]
    async fn toggle_propagates_other_failures() {
        let (org, mgr) = setup(seeded());
        org.fail(
            "AttachPolicy",
            AwsError::new("organizations", "ConstraintViolationException", "limit", 400).into(),
        );
        let err = mgr.toggle(SCP, PolicyType::ServiceControlPolicy, true).await.unwrap_err();
        assert!(err.is_provider_code("ConstraintViolationException"));
    }

    #[tokio::test]
    async fn toggle_without_root_is_not_found() {
        let (_, mgr) = setup(seeded().without_roots());
        let err = mgr.toggle(SCP, PolicyType::ServiceControlPolicy, true).await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::NotFound);
    }

    #[tokio::test]
    async fn delete_detaches_before_deleting() {
        let (org, mgr) = setup(seeded());
        org.attach_directly(SCP, FakeOrganizations::ROOT_ID);
        let id = org.policy_id(SCP).unwrap();

        assert!(mgr.delete(SCP, PolicyType::ServiceControlPolicy).await.unwrap());

        let calls = org.calls();
        let detach = calls.iter().position(|c| c.starts_with("DetachPolicy")).unwrap();
        let delete = calls.iter().position(|c| c == &format!("DeletePolicy:{}", id)).unwrap();
        assert!(detach < delete);
        assert!(org.policy_id(SCP).is_none());
    }

    #[tokio::test]
    async fn delete_missing_policy_skips_delete_call() {
        let (org, mgr) = setup(seeded());
        assert!(!mgr.delete("missing", PolicyType::ServiceControlPolicy).await.unwrap());
        assert_eq!(org.count("DeletePolicy"), 0);
    }

    #[tokio::test]
    async fn describe_normalizes_and_reports_missing() {
        let (_, mgr) = setup(seeded());
        let d = mgr.describe(SCP, PolicyType::ServiceControlPolicy).await.unwrap();
        assert_eq!(d.action, vec!["s3:*"]);
        assert_eq!(d.resource, vec!["*"]);

        let err = mgr.describe("missing", PolicyType::ServiceControlPolicy).await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_rejects_wildcard_without_calls() {
        let (org, mgr) = setup(FakeOrganizations::new());
        let mut p = params();
        p.actions = vec!["*".into()];
        let err = mgr.create(PerimeterTemplate::Network2, &p).await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Validation);
        assert!(org.calls().is_empty());
    }

    #[tokio::test]
    async fn create_stores_rendered_document() {
        let (org, mgr) = setup(FakeOrganizations::new());
        assert!(mgr.create(PerimeterTemplate::Network2, &params()).await.unwrap());
        let content = org.policy_content("network-perimeter-rcp").unwrap();
        assert!(content.contains("\"Principal\":\"*\""));
    }

    #[tokio::test]
    async fn modify_replaces_and_reattaches() {
        let (org, mgr) = setup(seeded());
        org.attach_directly(SCP, FakeOrganizations::ROOT_ID);
        let old_id = org.policy_id(SCP).unwrap();

        assert!(mgr.modify(PerimeterTemplate::Network1, &params(), true).await.unwrap());

        let new_id = org.policy_id(SCP).unwrap();
        assert_ne!(old_id, new_id);
        assert!(org.is_attached(SCP, FakeOrganizations::ROOT_ID));
        let d = mgr.describe(SCP, PolicyType::ServiceControlPolicy).await.unwrap();
        assert_eq!(d.sid.as_deref(), Some("Edited"));
        assert_eq!(d.source_ips, vec!["192.0.2.0/24"]);
    }

    #[tokio::test]
    async fn modify_validates_before_deleting() {
        let (org, mgr) = setup(seeded());
        let mut p = params();
        p.effect = "Maybe".into();
        assert!(mgr.modify(PerimeterTemplate::Network1, &p, false).await.is_err());
        assert_eq!(org.count("DeletePolicy"), 0);
        assert!(org.policy_id(SCP).is_some());
    }

    #[tokio::test]
    async fn is_attached_to_root_reflects_root() {
        let (org, mgr) = setup(seeded());
        let scp = PolicyType::ServiceControlPolicy;
        assert_eq!(
            mgr.is_attached_to_root(SCP, scp).await.unwrap(),
            AttachmentStatus { exists: true, attached: false }
        );
        org.attach_directly(SCP, FakeOrganizations::ROOT_ID);
        assert!(mgr.is_attached_to_root(SCP, scp).await.unwrap().attached);
        assert!(!mgr.is_attached_to_root("missing", scp).await.unwrap().exists);
    }
}
