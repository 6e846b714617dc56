//! Amazon Cognito clients: user pools (`cognito-idp`) and identity pools
//! (`cognito-identity`).
//!
//! Both speak JSON 1.1. The calls used here are unauthenticated, so the
//! clients are expected to wrap an [`AwsClient::anonymous`] instance.
//!
//! Reference: <https://docs.aws.amazon.com/cognito-user-identity-pools/latest/APIReference/>

use crate::client::AwsClient;
use crate::config::AwsCredentials;
use crate::error::{AwsError, AwsResult};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

const IDP_SERVICE: &str = "cognito-idp";
const IDP_TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const IDENTITY_SERVICE: &str = "cognito-identity";
const IDENTITY_TARGET_PREFIX: &str = "AWSCognitoIdentityService";

pub const USER_SRP_AUTH: &str = "USER_SRP_AUTH";
pub const PASSWORD_VERIFIER: &str = "PASSWORD_VERIFIER";
pub const NEW_PASSWORD_REQUIRED: &str = "NEW_PASSWORD_REQUIRED";

// ── Types ───────────────────────────────────────────────────────────────

/// Tokens issued once a user pool sign-in completes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthenticationResult {
    #[serde(rename = "IdToken")]
    pub id_token: String,
    #[serde(rename = "AccessToken", default)]
    pub access_token: Option<String>,
    #[serde(rename = "RefreshToken", default)]
    pub refresh_token: Option<String>,
    #[serde(rename = "ExpiresIn", default)]
    pub expires_in: Option<i64>,
    #[serde(rename = "TokenType", default)]
    pub token_type: Option<String>,
}

/// A challenge the user pool wants answered before issuing tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthChallenge {
    pub name: String,
    pub session: Option<String>,
    pub parameters: HashMap<String, String>,
}

/// Outcome of InitiateAuth or RespondToAuthChallenge.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthStep {
    Challenge(AuthChallenge),
    Authenticated(AuthenticationResult),
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "ChallengeName", default)]
    challenge_name: Option<String>,
    #[serde(rename = "Session", default)]
    session: Option<String>,
    #[serde(rename = "ChallengeParameters", default)]
    challenge_parameters: HashMap<String, String>,
    #[serde(rename = "AuthenticationResult", default)]
    authentication_result: Option<AuthenticationResult>,
}

impl AuthResponse {
    fn into_step(self) -> AwsResult<AuthStep> {
        if let Some(result) = self.authentication_result {
            return Ok(AuthStep::Authenticated(result));
        }
        match self.challenge_name {
            Some(name) => Ok(AuthStep::Challenge(AuthChallenge {
                name,
                session: self.session,
                parameters: self.challenge_parameters,
            })),
            None => Err(AwsError::parse(
                IDP_SERVICE,
                "response has neither a challenge nor tokens",
            )),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityCredentials {
    #[serde(rename = "AccessKeyId")]
    access_key_id: String,
    #[serde(rename = "SecretKey")]
    secret_key: String,
    #[serde(rename = "SessionToken")]
    session_token: String,
    /// Epoch seconds, possibly fractional.
    #[serde(rename = "Expiration", default)]
    expiration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CredentialsForIdentityResponse {
    #[serde(rename = "Credentials")]
    credentials: IdentityCredentials,
}

/// Key under which a user pool's ID token is presented to an identity pool.
pub fn user_pool_login_key(region: &str, user_pool_id: &str) -> String {
    format!("cognito-idp.{}.amazonaws.com/{}", region, user_pool_id)
}

// ── User pools ──────────────────────────────────────────────────────────

/// Cognito user pool client.
#[derive(Debug, Clone)]
pub struct CognitoIdpClient {
    client: AwsClient,
}

impl CognitoIdpClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> AwsResult<AuthStep> {
        let target = format!("{}.{}", IDP_TARGET_PREFIX, action);
        let response = self
            .client
            .json_request(IDP_SERVICE, &target, &body.to_string())
            .await?;
        serde_json::from_slice::<AuthResponse>(&response.body)
            .map_err(|e| AwsError::parse(IDP_SERVICE, &format!("invalid {} response: {}", action, e)))?
            .into_step()
    }

    /// InitiateAuth.
    pub async fn initiate_auth(
        &self,
        client_id: &str,
        auth_flow: &str,
        auth_parameters: &BTreeMap<String, String>,
    ) -> AwsResult<AuthStep> {
        self.call(
            "InitiateAuth",
            serde_json::json!({
                "ClientId": client_id,
                "AuthFlow": auth_flow,
                "AuthParameters": auth_parameters,
            }),
        )
        .await
    }

    /// RespondToAuthChallenge.
    pub async fn respond_to_auth_challenge(
        &self,
        client_id: &str,
        challenge_name: &str,
        session: Option<&str>,
        responses: &BTreeMap<String, String>,
    ) -> AwsResult<AuthStep> {
        let mut body = serde_json::json!({
            "ClientId": client_id,
            "ChallengeName": challenge_name,
            "ChallengeResponses": responses,
        });
        if let Some(s) = session {
            body["Session"] = serde_json::Value::String(s.to_string());
        }
        self.call("RespondToAuthChallenge", body).await
    }
}

// ── Identity pools ──────────────────────────────────────────────────────

/// Cognito identity pool client.
#[derive(Debug, Clone)]
pub struct CognitoIdentityClient {
    client: AwsClient,
}

impl CognitoIdentityClient {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    async fn call(&self, action: &str, body: serde_json::Value) -> AwsResult<Vec<u8>> {
        let target = format!("{}.{}", IDENTITY_TARGET_PREFIX, action);
        let response = self
            .client
            .json_request(IDENTITY_SERVICE, &target, &body.to_string())
            .await?;
        Ok(response.body.to_vec())
    }

    /// GetId. Returns the identity id for the given logins.
    pub async fn get_id(
        &self,
        identity_pool_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> AwsResult<String> {
        let body = self
            .call(
                "GetId",
                serde_json::json!({ "IdentityPoolId": identity_pool_id, "Logins": logins }),
            )
            .await?;
        let value: serde_json::Value = serde_json::from_slice(&body)
            .map_err(|e| AwsError::parse(IDENTITY_SERVICE, &e.to_string()))?;
        value
            .get("IdentityId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| AwsError::parse(IDENTITY_SERVICE, "GetId response has no IdentityId"))
    }

    /// GetCredentialsForIdentity.
    pub async fn get_credentials_for_identity(
        &self,
        identity_id: &str,
        logins: &BTreeMap<String, String>,
    ) -> AwsResult<AwsCredentials> {
        let body = self
            .call(
                "GetCredentialsForIdentity",
                serde_json::json!({ "IdentityId": identity_id, "Logins": logins }),
            )
            .await?;
        parse_identity_credentials(&body)
    }
}

fn parse_identity_credentials(body: &[u8]) -> AwsResult<AwsCredentials> {
    let resp: CredentialsForIdentityResponse = serde_json::from_slice(body).map_err(|e| {
        AwsError::parse(IDENTITY_SERVICE, &format!("invalid credentials response: {}", e))
    })?;
    let creds = resp.credentials;
    let expiration = creds.expiration.and_then(|secs| {
        Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
    });
    Ok(AwsCredentials::new_temporary(
        &creds.access_key_id,
        &creds.secret_key,
        &creds.session_token,
        expiration,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_key_format() {
        assert_eq!(
            user_pool_login_key("eu-west-1", "eu-west-1_Ab12"),
            "cognito-idp.eu-west-1.amazonaws.com/eu-west-1_Ab12"
        );
    }

    #[test]
    fn challenge_response_becomes_step() {
        let body = r#"{"ChallengeName":"PASSWORD_VERIFIER","ChallengeParameters":{"SALT":"ab","SRP_B":"cd","SECRET_BLOCK":"ZZ==","USER_ID_FOR_SRP":"sub-1","USERNAME":"sub-1"}}"#;
        let step = serde_json::from_str::<AuthResponse>(body).unwrap().into_step().unwrap();
        match step {
            AuthStep::Challenge(c) => {
                assert_eq!(c.name, PASSWORD_VERIFIER);
                assert_eq!(c.parameters["USER_ID_FOR_SRP"], "sub-1");
                assert!(c.session.is_none());
            }
            other => panic!("expected challenge, got {:?}", other),
        }
    }

    #[test]
    fn tokens_win_over_challenge_fields() {
        let body = r#"{"ChallengeParameters":{},"AuthenticationResult":{"IdToken":"id.jwt","AccessToken":"acc","ExpiresIn":3600,"TokenType":"Bearer"}}"#;
        let step = serde_json::from_str::<AuthResponse>(body).unwrap().into_step().unwrap();
        assert!(matches!(step, AuthStep::Authenticated(ref r) if r.id_token == "id.jwt"));
    }

    #[test]
    fn empty_auth_response_is_parse_error() {
        let err = serde_json::from_str::<AuthResponse>("{}").unwrap().into_step().unwrap_err();
        assert_eq!(err.code, "ParseError");
    }

    #[test]
    fn identity_credentials_parse() {
        let body = br#"{"IdentityId":"us-east-1:abc","Credentials":{"AccessKeyId":"ASIAXYZ","SecretKey":"sk","SessionToken":"st","Expiration":1.7e9}}"#;
        let creds = parse_identity_credentials(body).unwrap();
        assert_eq!(creds.access_key_id, "ASIAXYZ");
        assert_eq!(creds.session_token.as_deref(), Some("st"));
        assert_eq!(creds.expiration.unwrap().timestamp(), 1_700_000_000);
    }
}
