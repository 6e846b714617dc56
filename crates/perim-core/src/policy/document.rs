//! Projection of a stored policy document back into structured fields.

use super::template::{NOT_IP_IF_EXISTS, SOURCE_IP_KEY, SOURCE_VPC_KEY, STRING_NOT_EQUALS_IF_EXISTS};
use crate::error::{PerimeterError, PerimeterResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The first statement of a policy, as the UI edits it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDescription {
    pub sid: Option<String>,
    pub effect: Option<String>,
    pub action: Vec<String>,
    pub resource: Vec<String>,
    pub source_ips: Vec<String>,
    pub source_vpcs: Vec<String>,
}

/// Parse `content` and project out its first statement. Scalar `Action`,
/// `Resource`, and condition values come back as one-element arrays.
pub fn describe_document(content: &str) -> PerimeterResult<PolicyDescription> {
    let doc: Value = serde_json::from_str(content)?;
    let statement = match doc.get("Statement") {
        Some(Value::Array(items)) => items.first(),
        Some(obj @ Value::Object(_)) => Some(obj),
        _ => None,
    }
    .ok_or_else(|| PerimeterError::parse("policy document has no statement"))?;

    let condition = statement.get("Condition");
    Ok(PolicyDescription {
        sid: statement.get("Sid").and_then(Value::as_str).map(str::to_string),
        effect: statement.get("Effect").and_then(Value::as_str).map(str::to_string),
        action: string_list(statement.get("Action")),
        resource: string_list(statement.get("Resource")),
        source_ips: string_list(condition_value(condition, NOT_IP_IF_EXISTS, SOURCE_IP_KEY)),
        source_vpcs: string_list(condition_value(condition, STRING_NOT_EQUALS_IF_EXISTS, SOURCE_VPC_KEY)),
    })
}

fn condition_value<'a>(condition: Option<&'a Value>, operator: &str, key: &str) -> Option<&'a Value> {
    condition?.get(operator)?.get(key)
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}
