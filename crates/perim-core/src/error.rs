//! One result type for every domain operation.

use perim_aws::AwsError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PerimeterErrorKind {
    MissingCredentials,
    InvalidRegion,
    Validation,
    NotFound,
    AccessDenied,
    Unsupported,
    Provider,
    Parse,
    Io,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PerimeterError {
    pub kind: PerimeterErrorKind,
    pub message: String,
    /// Provider error code, when the failure came from AWS.
    pub code: Option<String>,
}

impl PerimeterError {
    pub fn new(kind: PerimeterErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn missing_credentials(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::MissingCredentials, msg)
    }

    pub fn invalid_region(region: &str) -> Self {
        Self::new(
            PerimeterErrorKind::InvalidRegion,
            format!("'{}' is not a known AWS region", region),
        )
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::Validation, msg)
    }

    pub fn not_found(what: &str, name: &str) -> Self {
        Self::new(PerimeterErrorKind::NotFound, format!("{} '{}' not found", what, name))
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::Unsupported, msg)
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::Parse, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::Io, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(PerimeterErrorKind::Timeout, msg)
    }

    pub fn is_provider_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for PerimeterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(ref code) => write!(f, "[{:?}] {}: {}", self.kind, code, self.message),
            None => write!(f, "[{:?}] {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for PerimeterError {}

impl From<AwsError> for PerimeterError {
    fn from(err: AwsError) -> Self {
        let kind = if err.is_access_denied() {
            PerimeterErrorKind::AccessDenied
        } else if err.code == "ParseError" {
            PerimeterErrorKind::Parse
        } else if err.code == "CredentialError" {
            PerimeterErrorKind::MissingCredentials
        } else {
            PerimeterErrorKind::Provider
        };
        Self {
            kind,
            message: err.message,
            code: Some(err.code),
        }
    }
}

impl From<serde_json::Error> for PerimeterError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}

pub type PerimeterResult<T> = Result<T, PerimeterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_denied_maps_to_kind() {
        let err: PerimeterError = AwsError::new("s3", "AccessDenied", "Access Denied", 403).into();
        assert_eq!(err.kind, PerimeterErrorKind::AccessDenied);
        assert_eq!(err.code.as_deref(), Some("AccessDenied"));
    }

    #[test]
    fn other_provider_errors_keep_code() {
        let err: PerimeterError =
            AwsError::new("organizations", "PolicyNotAttachedException", "not attached", 400).into();
        assert_eq!(err.kind, PerimeterErrorKind::Provider);
        assert!(err.is_provider_code("PolicyNotAttachedException"));
        assert!(err.to_string().contains("PolicyNotAttachedException"));
    }

    #[test]
    fn display_without_code() {
        let err = PerimeterError::not_found("policy", "network-perimeter-scp");
        assert_eq!(err.to_string(), "[NotFound] policy 'network-perimeter-scp' not found");
    }
}
