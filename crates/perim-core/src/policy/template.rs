//! The perimeter policy catalog and the JSON document each entry renders.

use crate::error::{PerimeterError, PerimeterResult};
use perim_aws::organizations::PolicyType;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const NOT_IP_IF_EXISTS: &str = "NotIpAddressIfExists";
pub const STRING_NOT_EQUALS_IF_EXISTS: &str = "StringNotEqualsIfExists";
pub const SOURCE_IP_KEY: &str = "aws:SourceIp";
pub const SOURCE_VPC_KEY: &str = "aws:SourceVpc";

/// Policies the tool manages, one per perimeter control.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PerimeterTemplate {
    /// Network perimeter on identities (SCP).
    Network1,
    /// Network perimeter on resources (RCP).
    Network2,
}

impl PerimeterTemplate {
    pub const ALL: [PerimeterTemplate; 2] = [PerimeterTemplate::Network1, PerimeterTemplate::Network2];

    pub fn policy_name(&self) -> &'static str {
        match self {
            PerimeterTemplate::Network1 => "network-perimeter-scp",
            PerimeterTemplate::Network2 => "network-perimeter-rcp",
        }
    }

    pub fn policy_type(&self) -> PolicyType {
        match self {
            PerimeterTemplate::Network1 => PolicyType::ServiceControlPolicy,
            PerimeterTemplate::Network2 => PolicyType::ResourceControlPolicy,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PerimeterTemplate::Network1 => {
                "Denies calls made with organization credentials from outside the expected networks"
            }
            PerimeterTemplate::Network2 => {
                "Denies access to organization resources from outside the expected networks"
            }
        }
    }

    fn default_sid(&self) -> &'static str {
        match self {
            PerimeterTemplate::Network1 => "EnforceNetworkPerimeterOnIdentities",
            PerimeterTemplate::Network2 => "EnforceNetworkPerimeterOnResources",
        }
    }

    /// RCPs must name a principal; SCPs must not.
    fn has_principal(&self) -> bool {
        matches!(self, PerimeterTemplate::Network2)
    }

    /// Whether a bare `*` action list is refused for this template.
    fn rejects_wildcard_actions(&self) -> bool {
        matches!(self, PerimeterTemplate::Network2)
    }
}

/// Caller-supplied statement fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyParams {
    #[serde(default)]
    pub sid: Option<String>,
    #[serde(default = "default_effect")]
    pub effect: String,
    pub actions: Vec<String>,
    pub resources: Vec<String>,
    #[serde(default)]
    pub source_ips: Vec<String>,
    #[serde(default)]
    pub source_vpcs: Vec<String>,
}

fn default_effect() -> String {
    "Deny".to_string()
}

impl PolicyParams {
    fn validate(&self, template: PerimeterTemplate) -> PerimeterResult<()> {
        if self.effect != "Allow" && self.effect != "Deny" {
            return Err(PerimeterError::validation(format!(
                "effect must be Allow or Deny, got '{}'",
                self.effect
            )));
        }
        if self.actions.iter().all(|a| a.trim().is_empty()) {
            return Err(PerimeterError::validation("at least one action is required"));
        }
        if self.resources.iter().all(|r| r.trim().is_empty()) {
            return Err(PerimeterError::validation("at least one resource is required"));
        }
        if template.rejects_wildcard_actions() && self.actions.len() == 1 && self.actions[0].trim() == "*" {
            return Err(PerimeterError::validation(format!(
                "'*' is not allowed as the action list of {}",
                template.policy_name()
            )));
        }
        Ok(())
    }
}

/// Render the policy document for `template`, validating `params` first.
pub fn render(template: PerimeterTemplate, params: &PolicyParams) -> PerimeterResult<String> {
    params.validate(template)?;

    let mut condition = Map::new();
    if !params.source_ips.is_empty() {
        condition.insert(
            NOT_IP_IF_EXISTS.to_string(),
            keyed(SOURCE_IP_KEY, &params.source_ips),
        );
    }
    if !params.source_vpcs.is_empty() {
        condition.insert(
            STRING_NOT_EQUALS_IF_EXISTS.to_string(),
            keyed(SOURCE_VPC_KEY, &params.source_vpcs),
        );
    }

    let mut statement = Map::new();
    statement.insert(
        "Sid".to_string(),
        Value::String(
            params
                .sid
                .clone()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| template.default_sid().to_string()),
        ),
    );
    statement.insert("Effect".to_string(), Value::String(params.effect.clone()));
    if template.has_principal() {
        statement.insert("Principal".to_string(), Value::String("*".to_string()));
    }
    statement.insert("Action".to_string(), json!(params.actions));
    statement.insert("Resource".to_string(), json!(params.resources));
    if !condition.is_empty() {
        statement.insert("Condition".to_string(), Value::Object(condition));
    }

    let document = json!({
        "Version": POLICY_VERSION,
        "Statement": [Value::Object(statement)],
    });
    Ok(serde_json::to_string(&document)?)
}

fn keyed(key: &str, values: &[String]) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), json!(values));
    Value::Object(map)
}
