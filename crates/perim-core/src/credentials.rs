//! Credential value object built once per request.

use crate::error::{PerimeterError, PerimeterResult};
use perim_aws::{AwsCredentials, AwsRegion};
use serde::{Deserialize, Serialize};

/// Temporary AWS credentials plus the region they are used against.
///
/// Fields are private so a bundle can only exist once validated.
#[derive(Clone, PartialEq)]
pub struct CredentialBundle {
    credentials: AwsCredentials,
    region: AwsRegion,
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("credentials", &self.credentials)
            .field("region", &self.region.name)
            .finish()
    }
}

impl CredentialBundle {
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        session_token: Option<&str>,
        region: &str,
    ) -> PerimeterResult<Self> {
        if access_key_id.trim().is_empty() || secret_access_key.trim().is_empty() {
            return Err(PerimeterError::missing_credentials(
                "accessKeyId and secretAccessKey are required",
            ));
        }
        let region = AwsRegion::parse(region).ok_or_else(|| PerimeterError::invalid_region(region))?;
        let credentials = match session_token.map(str::trim).filter(|t| !t.is_empty()) {
            Some(token) => AwsCredentials::new_temporary(
                access_key_id.trim(),
                secret_access_key.trim(),
                token,
                None,
            ),
            None => AwsCredentials::new(access_key_id.trim(), secret_access_key.trim()),
        };
        Ok(Self {
            credentials,
            region,
        })
    }

    /// Wrap credentials already issued by a provider (e.g. an identity pool).
    pub fn from_aws(credentials: AwsCredentials, region: AwsRegion) -> Self {
        Self {
            credentials,
            region,
        }
    }

    pub fn credentials(&self) -> &AwsCredentials {
        &self.credentials
    }

    pub fn region(&self) -> &AwsRegion {
        &self.region
    }

    pub fn access_key_id(&self) -> &str {
        &self.credentials.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.credentials.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.credentials.session_token.as_deref()
    }
}

/// The credential triple as the front-end stores it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialTriple {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
}

impl From<&CredentialBundle> for CredentialTriple {
    fn from(bundle: &CredentialBundle) -> Self {
        Self {
            access_key_id: bundle.access_key_id().to_string(),
            secret_access_key: bundle.secret_access_key().to_string(),
            session_token: bundle.session_token().unwrap_or_default().to_string(),
        }
    }
}

/// Operator profile handed to the client after login. The client owns
/// persistence; the server never stores profiles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    pub credentials: CredentialTriple,
    pub buckets: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PerimeterErrorKind;

    #[test]
    fn rejects_missing_keys() {
        let err = CredentialBundle::new("", "secret", Some("tok"), "us-east-1").unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::MissingCredentials);
        let err = CredentialBundle::new("AKIA", "  ", None, "us-east-1").unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::MissingCredentials);
    }

    #[test]
    fn rejects_unknown_region() {
        let err = CredentialBundle::new("AKIA", "secret", None, "US-East-1").unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::InvalidRegion);
    }

    #[test]
    fn blank_session_token_is_dropped() {
        let bundle = CredentialBundle::new("AKIA", "secret", Some(""), "eu-west-1").unwrap();
        assert!(bundle.session_token().is_none());
        assert_eq!(bundle.region().name, "eu-west-1");
    }

    #[test]
    fn debug_hides_secret() {
        let bundle = CredentialBundle::new("ASIA1", "hunter2", Some("tok"), "us-east-1").unwrap();
        assert!(!format!("{:?}", bundle).contains("hunter2"));
    }

    #[test]
    fn triple_serializes_camel_case() {
        let bundle = CredentialBundle::new("ASIA1", "sk", Some("st"), "us-east-1").unwrap();
        let json = serde_json::to_value(CredentialTriple::from(&bundle)).unwrap();
        assert_eq!(json["accessKeyId"], "ASIA1");
        assert_eq!(json["sessionToken"], "st");
    }
}
