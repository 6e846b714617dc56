//! Region handling, credentials, and retry configuration.
//!
//! Regions are always explicit, validated inputs: every client is built from
//! an [`AwsRegion`] that has passed [`AwsRegion::is_valid`] at the request
//! boundary or at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Regions ─────────────────────────────────────────────────────────────

/// All standard AWS regions as of 2025.
pub const AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ca-central-1",
    "ca-west-1",
    "eu-central-1",
    "eu-central-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "eu-south-1",
    "eu-south-2",
    "eu-north-1",
    "il-central-1",
    "me-south-1",
    "me-central-1",
    "sa-east-1",
    // GovCloud
    "us-gov-east-1",
    "us-gov-west-1",
    // China
    "cn-north-1",
    "cn-northwest-1",
];

/// AWS region configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AwsRegion {
    /// Region code (e.g., "us-east-1").
    pub name: String,
}

impl AwsRegion {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Parse and validate a region code. Whitespace is trimmed; casing is
    /// not corrected, so "US-East-1" is rejected rather than guessed at.
    pub fn parse(name: &str) -> Option<Self> {
        let region = Self::new(name.trim());
        region.is_valid().then_some(region)
    }

    /// Derive the region from a Cognito pool identifier such as
    /// `us-east-1_AbCdEf` (user pool) or `us-east-1:0000-...` (identity pool).
    pub fn from_pool_id(pool_id: &str) -> Option<Self> {
        let prefix = pool_id.split(['_', ':']).next()?;
        Self::parse(prefix)
    }

    /// Return the service endpoint for a given service in this region.
    pub fn endpoint(&self, service: &str) -> String {
        match service {
            // S3 path-style URLs
            "s3" => format!("https://s3.{}.{}", self.name, self.dns_suffix()),
            // Organizations is a global service fronted from us-east-1
            "organizations" if self.partition() == "aws" => {
                "https://organizations.us-east-1.amazonaws.com".to_string()
            }
            "organizations" if self.partition() == "aws-us-gov" => {
                "https://organizations.us-gov-west-1.amazonaws.com".to_string()
            }
            "iam" => "https://iam.amazonaws.com".to_string(),
            _ => format!("https://{}.{}.{}", service, self.name, self.dns_suffix()),
        }
    }

    fn dns_suffix(&self) -> &'static str {
        if self.name.starts_with("cn-") {
            "amazonaws.com.cn"
        } else {
            "amazonaws.com"
        }
    }

    /// The region SigV4 must be computed for. Global services sign in their
    /// home region rather than the caller's.
    pub fn signing_region(&self, service: &str) -> String {
        match (service, self.partition()) {
            ("organizations" | "iam", "aws") => "us-east-1".to_string(),
            ("organizations" | "iam", "aws-us-gov") => "us-gov-west-1".to_string(),
            ("organizations" | "iam", "aws-cn") => "cn-northwest-1".to_string(),
            _ => self.name.clone(),
        }
    }

    pub fn is_valid(&self) -> bool {
        AWS_REGIONS.contains(&self.name.as_str())
    }

    /// Return the partition for this region (aws, aws-cn, aws-us-gov).
    pub fn partition(&self) -> &str {
        if self.name.starts_with("cn-") {
            "aws-cn"
        } else if self.name.starts_with("us-gov-") {
            "aws-us-gov"
        } else {
            "aws"
        }
    }
}

impl Default for AwsRegion {
    fn default() -> Self {
        Self {
            name: "us-east-1".to_string(),
        }
    }
}

impl std::fmt::Display for AwsRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

// ── Credentials ─────────────────────────────────────────────────────────

/// Temporary or long-term AWS credentials.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsCredentials {
    /// Access key ID (AKIA* for long-term, ASIA* for temporary).
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Present for temporary credentials issued by STS or Cognito.
    pub session_token: Option<String>,
    /// When these credentials expire (None for long-term IAM credentials).
    pub expiration: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

impl AwsCredentials {
    pub fn new(access_key_id: &str, secret_access_key: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: None,
            expiration: None,
        }
    }

    pub fn new_temporary(
        access_key_id: &str,
        secret_access_key: &str,
        session_token: &str,
        expiration: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: Some(session_token.to_string()),
            expiration,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expiration.map(|exp| Utc::now() > exp).unwrap_or(false)
    }

    pub fn is_temporary(&self) -> bool {
        self.session_token.is_some()
    }
}

// ── Retry Configuration ─────────────────────────────────────────────────

/// Retry configuration following the AWS SDK retry modes.
///
/// The default issues every call exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub mode: RetryMode,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            mode: RetryMode::Standard,
            initial_backoff_ms: 500,
            max_backoff_ms: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum RetryMode {
    /// Exponential backoff with full jitter.
    Standard,
    /// Exponential backoff without jitter.
    Legacy,
}
