//! Cognito sign-in: user pool SRP authentication followed by the identity
//! pool exchange for temporary AWS credentials.

use crate::backend::{BackendFactory, IdentityProvider};
use crate::credentials::{CredentialBundle, CredentialTriple, Profile};
use crate::error::{PerimeterError, PerimeterResult};
use chrono::Utc;
use perim_aws::cognito::{
    user_pool_login_key, AuthChallenge, AuthStep, AuthenticationResult, NEW_PASSWORD_REQUIRED,
    PASSWORD_VERIFIER, USER_SRP_AUTH,
};
use perim_aws::srp::SrpClient;
use perim_aws::AwsRegion;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SMS_MFA: &str = "SMS_MFA";

/// Upper bound on challenge round trips for one sign-in.
const MAX_CHALLENGES: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub user_pool_id: String,
    pub identity_pool_id: String,
    /// Used when the pool demands a password change; the current password
    /// is resubmitted otherwise.
    #[serde(default)]
    pub new_password: Option<String>,
}

impl LoginRequest {
    fn validate(&self) -> PerimeterResult<()> {
        let fields = [
            ("username", &self.username),
            ("password", &self.password),
            ("clientId", &self.client_id),
            ("userPoolId", &self.user_pool_id),
            ("identityPoolId", &self.identity_pool_id),
        ];
        for (name, value) in fields {
            if value.trim().is_empty() {
                return Err(PerimeterError::validation(format!("{} is required", name)));
            }
        }
        Ok(())
    }
}

/// Tokens, identity, and the profile the client keeps after sign-in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResult {
    pub id_token: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub identity_id: String,
    pub region: String,
    /// RFC 3339 expiry of the issued credentials, when reported.
    pub expiration: Option<String>,
    pub profile: Profile,
}

/// Sign in and exchange the resulting ID token for AWS credentials.
pub async fn login(backend: &dyn BackendFactory, request: &LoginRequest) -> PerimeterResult<LoginResult> {
    request.validate()?;
    let pool_region = AwsRegion::from_pool_id(&request.user_pool_id)
        .ok_or_else(|| PerimeterError::invalid_region(&request.user_pool_id))?;
    let identity_region = AwsRegion::from_pool_id(&request.identity_pool_id)
        .ok_or_else(|| PerimeterError::invalid_region(&request.identity_pool_id))?;

    let tokens = authenticate(backend.identity(&pool_region).as_ref(), request).await?;
    log::info!("user pool sign-in succeeded for {}", request.username);

    let mut logins = BTreeMap::new();
    logins.insert(
        user_pool_login_key(&pool_region.name, &request.user_pool_id),
        tokens.id_token.clone(),
    );
    let identity = backend.identity(&identity_region);
    let identity_id = identity.get_id(&request.identity_pool_id, &logins).await?;
    let credentials = identity
        .get_credentials_for_identity(&identity_id, &logins)
        .await?;
    let expiration = credentials.expiration.map(|t| t.to_rfc3339());
    let bundle = CredentialBundle::from_aws(credentials, identity_region.clone());

    Ok(LoginResult {
        id_token: tokens.id_token,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        identity_id,
        region: identity_region.name,
        expiration,
        profile: Profile {
            name: request.username.clone(),
            credentials: CredentialTriple::from(&bundle),
            buckets: Vec::new(),
        },
    })
}

async fn authenticate(
    idp: &dyn IdentityProvider,
    request: &LoginRequest,
) -> PerimeterResult<AuthenticationResult> {
    let srp = SrpClient::new(&request.user_pool_id)?;
    let mut params = BTreeMap::new();
    params.insert("USERNAME".to_string(), request.username.clone());
    params.insert("SRP_A".to_string(), srp.public_a_hex());

    let mut step = idp
        .initiate_auth(&request.client_id, USER_SRP_AUTH, &params)
        .await?;

    for _ in 0..MAX_CHALLENGES {
        let challenge = match step {
            AuthStep::Authenticated(result) => return Ok(result),
            AuthStep::Challenge(challenge) => challenge,
        };
        log::debug!("answering {} challenge", challenge.name);
        let responses = match challenge.name.as_str() {
            PASSWORD_VERIFIER => password_verifier_responses(&srp, &challenge, request)?,
            NEW_PASSWORD_REQUIRED => new_password_responses(&challenge, request),
            SMS_MFA => {
                return Err(PerimeterError::unsupported(
                    "SMS multi-factor authentication is not supported",
                ))
            }
            other => {
                return Err(PerimeterError::unsupported(format!(
                    "authentication challenge {} is not supported",
                    other
                )))
            }
        };
        step = idp
            .respond_to_auth_challenge(
                &request.client_id,
                &challenge.name,
                challenge.session.as_deref(),
                &responses,
            )
            .await?;
    }

    match step {
        AuthStep::Authenticated(result) => Ok(result),
        AuthStep::Challenge(c) => Err(PerimeterError::unsupported(format!(
            "sign-in did not complete after {} challenges (last: {})",
            MAX_CHALLENGES, c.name
        ))),
    }
}

fn challenge_param<'a>(challenge: &'a AuthChallenge, key: &str) -> PerimeterResult<&'a str> {
    challenge
        .parameters
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| PerimeterError::parse(format!("{} challenge is missing {}", challenge.name, key)))
}

fn challenge_user<'a>(challenge: &'a AuthChallenge, request: &'a LoginRequest) -> &'a str {
    challenge
        .parameters
        .get("USER_ID_FOR_SRP")
        .or_else(|| challenge.parameters.get("USERNAME"))
        .map(String::as_str)
        .unwrap_or(&request.username)
}

fn password_verifier_responses(
    srp: &SrpClient,
    challenge: &AuthChallenge,
    request: &LoginRequest,
) -> PerimeterResult<BTreeMap<String, String>> {
    let user_id = challenge_user(challenge, request);
    let secret_block = challenge_param(challenge, "SECRET_BLOCK")?;
    let claim = srp.password_claim(
        user_id,
        &request.password,
        challenge_param(challenge, "SALT")?,
        challenge_param(challenge, "SRP_B")?,
        secret_block,
        Utc::now(),
    )?;

    let mut responses = BTreeMap::new();
    responses.insert("USERNAME".to_string(), user_id.to_string());
    responses.insert("PASSWORD_CLAIM_SECRET_BLOCK".to_string(), secret_block.to_string());
    responses.insert("PASSWORD_CLAIM_SIGNATURE".to_string(), claim.signature);
    responses.insert("TIMESTAMP".to_string(), claim.timestamp);
    Ok(responses)
}

fn new_password_responses(challenge: &AuthChallenge, request: &LoginRequest) -> BTreeMap<String, String> {
    let new_password = request
        .new_password
        .as_deref()
        .filter(|p| !p.is_empty())
        .unwrap_or(&request.password);
    let mut responses = BTreeMap::new();
    responses.insert("USERNAME".to_string(), challenge_user(challenge, request).to_string());
    responses.insert("NEW_PASSWORD".to_string(), new_password.to_string());
    responses
}
