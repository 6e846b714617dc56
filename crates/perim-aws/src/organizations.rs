//! AWS Organizations client.
//!
//! JSON 1.1 protocol with target prefix `AWSOrganizationsV20161128`. Only
//! the policy lifecycle calls are covered: list, create, describe, delete,
//! attach, detach, plus root and target lookups. List calls return one page;
//! callers drain them with [`crate::pagination::drain_pages`].
//!
//! Reference: <https://docs.aws.amazon.com/organizations/latest/APIReference/>

use crate::client::AwsClient;
use crate::error::{AwsError, AwsResult};
use crate::pagination::PaginatedResponse;
use serde::{Deserialize, Serialize};

const SERVICE: &str = "organizations";
const TARGET_PREFIX: &str = "AWSOrganizationsV20161128";

/// Error codes the policy workflows branch on.
pub const DUPLICATE_POLICY_ATTACHMENT: &str = "DuplicatePolicyAttachmentException";
pub const POLICY_NOT_ATTACHED: &str = "PolicyNotAttachedException";
pub const POLICY_NOT_FOUND: &str = "PolicyNotFoundException";

// ── Types ───────────────────────────────────────────────────────────────

/// Organization policy kinds used by the perimeter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PolicyType {
    #[serde(rename = "SERVICE_CONTROL_POLICY")]
    ServiceControlPolicy,
    #[serde(rename = "RESOURCE_CONTROL_POLICY")]
    ResourceControlPolicy,
}

impl PolicyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::ServiceControlPolicy => "SERVICE_CONTROL_POLICY",
            PolicyType::ResourceControlPolicy => "RESOURCE_CONTROL_POLICY",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicySummary {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Arn", default)]
    pub arn: Option<String>,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description", default)]
    pub description: Option<String>,
    #[serde(rename = "Type", default)]
    pub policy_type: Option<String>,
    #[serde(rename = "AwsManaged", default)]
    pub aws_managed: bool,
}

/// A policy with its JSON document (as the raw string AWS returns).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    #[serde(rename = "PolicySummary")]
    pub summary: PolicySummary,
    #[serde(rename = "Content")]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Root {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Arn", default)]
    pub arn: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyTarget {
    #[serde(rename = "TargetId")]
    pub target_id: String,
    #[serde(rename = "Arn", default)]
    pub arn: Option<String>,
    #[serde(rename = "Name", default)]
    pub name: Option<String>,
    #[serde(rename = "Type", default)]
    pub target_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PolicyEnvelope {
    #[serde(rename = "Policy")]
    policy: Policy,
}

// ── Client ──────────────────────────────────────────────────────────────

/// Organizations service client.
#[derive(Debug, Clone)]
pub struct OrganizationsClient {
    client: AwsClient,
}

impl OrganizationsClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> AwsResult<String> {
        let target = format!("{}.{}", TARGET_PREFIX, action);
        let response = self
            .client
            .json_request(SERVICE, &target, &body.to_string())
            .await?;
        Ok(response.text())
    }

    /// ListPolicies, one page.
    pub async fn list_policies_page(
        &self,
        filter: PolicyType,
        next_token: Option<&str>,
    ) -> AwsResult<PaginatedResponse<PolicySummary>> {
        let mut body = serde_json::json!({ "Filter": filter.as_str() });
        if let Some(nt) = next_token {
            body["NextToken"] = serde_json::Value::String(nt.to_string());
        }
        let text = self.call("ListPolicies", body).await?;
        PaginatedResponse::from_json_page(SERVICE, &text, "NextToken")
    }

    /// ListRoots, one page.
    pub async fn list_roots_page(&self, next_token: Option<&str>) -> AwsResult<PaginatedResponse<Root>> {
        let mut body = serde_json::json!({});
        if let Some(nt) = next_token {
            body["NextToken"] = serde_json::Value::String(nt.to_string());
        }
        let text = self.call("ListRoots", body).await?;
        PaginatedResponse::from_json_page(SERVICE, &text, "NextToken")
    }

    /// ListTargetsForPolicy, one page.
    pub async fn list_targets_for_policy_page(
        &self,
        policy_id: &str,
        next_token: Option<&str>,
    ) -> AwsResult<PaginatedResponse<PolicyTarget>> {
        let mut body = serde_json::json!({ "PolicyId": policy_id });
        if let Some(nt) = next_token {
            body["NextToken"] = serde_json::Value::String(nt.to_string());
        }
        let text = self.call("ListTargetsForPolicy", body).await?;
        PaginatedResponse::from_json_page(SERVICE, &text, "NextToken")
    }

    pub async fn attach_policy(&self, policy_id: &str, target_id: &str) -> AwsResult<()> {
        self.call(
            "AttachPolicy",
            serde_json::json!({ "PolicyId": policy_id, "TargetId": target_id }),
        )
        .await?;
        Ok(())
    }

    pub async fn detach_policy(&self, policy_id: &str, target_id: &str) -> AwsResult<()> {
        self.call(
            "DetachPolicy",
            serde_json::json!({ "PolicyId": policy_id, "TargetId": target_id }),
        )
        .await?;
        Ok(())
    }

    /// CreatePolicy. `content` is the serialized policy document.
    pub async fn create_policy(
        &self,
        name: &str,
        description: &str,
        content: &str,
        policy_type: PolicyType,
    ) -> AwsResult<Policy> {
        let text = self
            .call(
                "CreatePolicy",
                serde_json::json!({
                    "Name": name,
                    "Description": description,
                    "Content": content,
                    "Type": policy_type.as_str(),
                }),
            )
            .await?;
        parse_policy(&text)
    }

    pub async fn describe_policy(&self, policy_id: &str) -> AwsResult<Policy> {
        let text = self
            .call("DescribePolicy", serde_json::json!({ "PolicyId": policy_id }))
            .await?;
        parse_policy(&text)
    }

    pub async fn delete_policy(&self, policy_id: &str) -> AwsResult<()> {
        self.call("DeletePolicy", serde_json::json!({ "PolicyId": policy_id }))
            .await?;
        Ok(())
    }
}

fn parse_policy(text: &str) -> AwsResult<Policy> {
    serde_json::from_str::<PolicyEnvelope>(text)
        .map(|env| env.policy)
        .map_err(|e| AwsError::parse(SERVICE, &format!("invalid policy response: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&PolicyType::ResourceControlPolicy).unwrap(),
            "\"RESOURCE_CONTROL_POLICY\""
        );
        assert_eq!(PolicyType::ServiceControlPolicy.as_str(), "SERVICE_CONTROL_POLICY");
    }

    #[test]
    fn parse_list_policies_page() {
        let body = r#"{
            "Policies": [
                {"Id":"p-FullAWSAccess","Arn":"arn:aws:organizations::aws:policy/service_control_policy/p-FullAWSAccess","Name":"FullAWSAccess","Description":"Allows access","Type":"SERVICE_CONTROL_POLICY","AwsManaged":true},
                {"Id":"p-abc123","Name":"network-perimeter-scp","Type":"SERVICE_CONTROL_POLICY","AwsManaged":false}
            ],
            "NextToken": "tok-2"
        }"#;
        let page: PaginatedResponse<PolicySummary> =
            PaginatedResponse::from_json_page(SERVICE, body, "NextToken").unwrap();
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[1].name, "network-perimeter-scp");
        assert!(page.items[0].aws_managed);
        assert_eq!(page.next_token.as_deref(), Some("tok-2"));
    }

    #[test]
    fn parse_describe_policy() {
        let body = r#"{"Policy":{"PolicySummary":{"Id":"p-1","Name":"network-perimeter-rcp","Type":"RESOURCE_CONTROL_POLICY","AwsManaged":false},"Content":"{\"Version\":\"2012-10-17\",\"Statement\":[]}"}}"#;
        let policy = parse_policy(body).unwrap();
        assert_eq!(policy.summary.id, "p-1");
        assert!(policy.content.contains("2012-10-17"));
    }

    #[test]
    fn parse_policy_rejects_garbage() {
        assert_eq!(parse_policy("{}").unwrap_err().code, "ParseError");
    }

    #[test]
    fn parse_roots_page() {
        let body = r#"{"Roots":[{"Id":"r-ab12","Arn":"arn:aws:organizations::111111111111:root/o-x/r-ab12","Name":"Root","PolicyTypes":[]}]}"#;
        // nested PolicyTypes arrays are not item lists
        let page = PaginatedResponse::<Root>::from_json_page(SERVICE, body, "NextToken").unwrap();
        assert_eq!(page.items[0].id, "r-ab12");
        assert!(page.next_token.is_none());
    }
}
