use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use perim_aws::organizations::PolicyType;
use perim_aws::{AwsRegion, RetryConfig};
use perim_core::{
    login, BackendFactory, CredentialBundle, LoginRequest, PerimeterError, PerimeterErrorKind,
    PerimeterTemplate, PolicyManager, PolicyParams, ResourceManager, SdkBackend,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use crate::cli::CliBridge;
use crate::perimeter_state::{FilePerimeterState, MemoryPerimeterState, PerimeterStateStore};
use crate::settings::Settings;

#[derive(Clone)]
pub struct ApiService {
    pub backend: Arc<dyn BackendFactory>,
    pub perimeter: Arc<dyn PerimeterStateStore>,
    pub cli: CliBridge,
    pub default_region: AwsRegion,
    pub max_upload_bytes: usize,
}

impl ApiService {
    pub fn new(
        backend: Arc<dyn BackendFactory>,
        perimeter: Arc<dyn PerimeterStateStore>,
        cli: CliBridge,
        default_region: AwsRegion,
    ) -> Self {
        Self {
            backend,
            perimeter,
            cli,
            default_region,
            max_upload_bytes: Settings::default().max_upload_bytes,
        }
    }

    /// Wire the AWS-backed service described by `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, PerimeterError> {
        let backend = SdkBackend::new(RetryConfig::default(), settings.endpoint_url.clone());
        let perimeter: Arc<dyn PerimeterStateStore> = match settings.state_path {
            Some(ref path) => Arc::new(FilePerimeterState::new(path)),
            None => Arc::new(MemoryPerimeterState::new()),
        };
        let cli = CliBridge::new(
            &settings.cli_program,
            Duration::from_secs(settings.cli_timeout_secs),
        );
        let mut service = Self::new(Arc::new(backend), perimeter, cli, settings.default_region()?);
        service.max_upload_bytes = settings.max_upload_bytes;
        Ok(service)
    }

    pub async fn start_server(
        self: Arc<Self>,
        addr: std::net::SocketAddr,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();

        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("data perimeter API listening on http://{}", addr);
        axum::serve(listener, app).await?;

        Ok(())
    }

    pub fn create_router(self: Arc<Self>) -> Router {
        let upload_limit = self.max_upload_bytes;
        Router::new()
            .route("/health", get(health_check))
            // Authentication
            .route("/api/login", post(login_handler))
            // Resources
            .route("/api/resource", post(list_resources))
            .route(
                "/api/resource/add",
                post(add_resource).layer(DefaultBodyLimit::max(upload_limit)),
            )
            .route("/api/resource/delete", post(delete_resource))
            .route("/api/resource/compliance", post(check_compliance))
            .route("/api/resources/send", post(transfer_resource))
            .route("/api/buckets_list", post(list_buckets))
            // Perimeter flag
            .route("/api/data_perimeter", get(get_data_perimeter))
            .route("/api/toggle_data_perimeter", post(toggle_data_perimeter))
            // Policies
            .route("/api/perimeter/toggle", post(toggle_policy))
            .route("/api/perimeter/getNetwork1Info", post(get_network1_info))
            .route("/api/perimeter/getNetwork2Info", post(get_network2_info))
            .route("/api/perimeter/getNetwork1Status", post(get_network1_status))
            .route("/api/perimeter/getNetwork2Status", post(get_network2_status))
            .route("/api/perimeter/modifyNetwork1", post(modify_network1))
            .route("/api/perimeter/modifyNetwork2", post(modify_network2))
            // CLI
            .route("/api/cli", post(run_cli))
            .layer(TraceLayer::new_for_http())
            .with_state(self)
    }

    fn credentials(&self, fields: &CredentialFields) -> Result<CredentialBundle, PerimeterError> {
        let region = fields
            .region
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(&self.default_region.name);
        CredentialBundle::new(
            &fields.access_key_id,
            &fields.secret_access_key,
            fields.session_token.as_deref(),
            region,
        )
    }

    fn resources(&self, fields: &CredentialFields) -> Result<ResourceManager, PerimeterError> {
        let bundle = self.credentials(fields)?;
        Ok(ResourceManager::new(self.backend.object_store(&bundle)))
    }

    fn policies(&self, fields: &CredentialFields) -> Result<PolicyManager, PerimeterError> {
        let bundle = self.credentials(fields)?;
        Ok(PolicyManager::new(self.backend.organizations(&bundle)))
    }
}

// ── Errors ──────────────────────────────────────────────────────────────

/// Handler error rendered as `{success: false, error, kind}`.
#[derive(Debug)]
pub struct ApiError(pub PerimeterError);

impl From<PerimeterError> for ApiError {
    fn from(err: PerimeterError) -> Self {
        Self(err)
    }
}

pub fn status_for(kind: PerimeterErrorKind) -> StatusCode {
    match kind {
        PerimeterErrorKind::MissingCredentials
        | PerimeterErrorKind::InvalidRegion
        | PerimeterErrorKind::Validation
        | PerimeterErrorKind::Unsupported => StatusCode::BAD_REQUEST,
        PerimeterErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        PerimeterErrorKind::NotFound => StatusCode::NOT_FOUND,
        PerimeterErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        PerimeterErrorKind::Provider
        | PerimeterErrorKind::Parse
        | PerimeterErrorKind::Io => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.0.kind);
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::warn!("request rejected: {}", self.0);
        }
        let mut body = json!({
            "success": false,
            "error": self.0.message,
            "kind": self.0.kind,
        });
        if let Some(code) = self.0.code {
            body["code"] = Value::String(code);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ── Request bodies ──────────────────────────────────────────────────────

/// The credential triple every provider-backed request carries.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialFields {
    #[serde(default)]
    access_key_id: String,
    #[serde(default)]
    secret_access_key: String,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    region: Option<String>,
}

impl CredentialFields {
    fn is_present(&self) -> bool {
        !self.access_key_id.trim().is_empty() || !self.secret_access_key.trim().is_empty()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(default)]
    bucket_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteResourceRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(default)]
    bucket_name: String,
    #[serde(default)]
    object_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(default)]
    source_bucket_name: String,
    #[serde(default)]
    destination_bucket_name: String,
    #[serde(default)]
    object_name: String,
    #[serde(default)]
    object_type: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToggleFlagRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(default)]
    enabled: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TogglePolicyRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    name: String,
    policy_type: PolicyType,
    attach: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModifyPolicyRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(flatten)]
    params: PolicyParams,
    #[serde(default)]
    attach: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliRequest {
    #[serde(flatten)]
    credentials: CredentialFields,
    #[serde(default)]
    command: String,
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "data-perimeter",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn login_handler(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult {
    let result = login(services.backend.as_ref(), &req).await?;
    let mut body = serde_json::to_value(result).map_err(PerimeterError::from)?;
    body["success"] = Value::Bool(true);
    Ok(Json(body))
}

async fn list_resources(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<BucketRequest>,
) -> ApiResult {
    let resources = services
        .resources(&req.credentials)?
        .list_resources(&req.bucket_name)
        .await?;
    Ok(Json(json!({ "success": true, "resources": resources })))
}

async fn add_resource(State(services): State<Arc<ApiService>>, mut multipart: Multipart) -> ApiResult {
    let mut fields: BTreeMap<String, String> = BTreeMap::new();
    let mut file: Option<(String, Option<String>, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| PerimeterError::validation(format!("invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let content_type = field.content_type().map(|ct| ct.to_string());
            let data = field
                .bytes()
                .await
                .map_err(|e| PerimeterError::validation(format!("unreadable file part: {}", e)))?;
            file = Some((file_name, content_type, data));
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| PerimeterError::validation(format!("unreadable field '{}': {}", name, e)))?;
            fields.insert(name, text);
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| PerimeterError::validation("multipart body has no 'file' part"))?;
    let field = |key: &str| fields.get(key).cloned().unwrap_or_default();
    let credentials = CredentialFields {
        access_key_id: field("accessKeyId"),
        secret_access_key: field("secretAccessKey"),
        session_token: fields.get("sessionToken").cloned(),
        region: fields.get("region").cloned(),
    };

    let uploaded = services
        .resources(&credentials)?
        .add_resource(
            &field("bucketName"),
            fields.get("filePath").map(String::as_str),
            &file_name,
            data,
            content_type.as_deref(),
        )
        .await?;
    Ok(Json(json!({
        "success": true,
        "key": uploaded.key,
        "url": uploaded.url,
        "expiresIn": uploaded.expires_in,
    })))
}

async fn delete_resource(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<DeleteResourceRequest>,
) -> ApiResult {
    services
        .resources(&req.credentials)?
        .delete_resource(&req.bucket_name, &req.object_key)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn transfer_resource(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<TransferRequest>,
) -> ApiResult {
    services
        .resources(&req.credentials)?
        .transfer_resource(
            &req.source_bucket_name,
            &req.destination_bucket_name,
            &req.object_name,
            &req.object_type,
        )
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn check_compliance(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<BucketRequest>,
) -> ApiResult {
    let report = services
        .resources(&req.credentials)?
        .check_compliance(&req.bucket_name)
        .await?;
    Ok(Json(json!({
        "success": true,
        "compliant": report.compliant,
        "message": report.message,
    })))
}

async fn list_buckets(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CredentialFields>,
) -> ApiResult {
    let buckets = services.resources(&req)?.list_buckets().await?;
    Ok(Json(json!({ "success": true, "buckets": buckets })))
}

async fn get_data_perimeter(State(services): State<Arc<ApiService>>) -> ApiResult {
    let enabled = services.perimeter.get().await?;
    Ok(Json(json!({ "enabled": enabled })))
}

/// Set the flag (or flip it when `enabled` is absent). With credentials the
/// catalog policies are attached or detached to match before it is stored.
async fn toggle_data_perimeter(
    State(services): State<Arc<ApiService>>,
    body: Bytes,
) -> ApiResult {
    let req = parse_optional_body::<ToggleFlagRequest>(&body)?;
    let requested = req.as_ref().and_then(|r| r.enabled);
    let enabled = match requested {
        Some(v) => v,
        None => !services.perimeter.get().await?,
    };

    let mut policies = serde_json::Map::new();
    if let Some(req) = req.as_ref().filter(|r| r.credentials.is_present()) {
        let manager = services.policies(&req.credentials)?;
        for template in PerimeterTemplate::ALL {
            let applied = manager
                .toggle(template.policy_name(), template.policy_type(), enabled)
                .await?;
            policies.insert(template.policy_name().to_string(), Value::Bool(applied));
        }
    }

    services.perimeter.set(enabled).await?;
    tracing::info!("data perimeter {}", if enabled { "enabled" } else { "disabled" });
    Ok(Json(json!({
        "success": true,
        "enabled": enabled,
        "policies": policies,
    })))
}

/// An absent or blank body is `None`; anything else must decode.
fn parse_optional_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<Option<T>, ApiError> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError(PerimeterError::validation(format!("invalid request body: {}", e))))
}

async fn toggle_policy(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<TogglePolicyRequest>,
) -> ApiResult {
    let applied = services
        .policies(&req.credentials)?
        .toggle(&req.name, req.policy_type, req.attach)
        .await?;
    if !applied {
        return Err(PerimeterError::not_found("policy", &req.name).into());
    }
    Ok(Json(json!({ "success": true, "attached": req.attach })))
}

async fn describe(services: &ApiService, fields: &CredentialFields, template: PerimeterTemplate) -> ApiResult {
    let description = services
        .policies(fields)?
        .describe(template.policy_name(), template.policy_type())
        .await?;
    Ok(Json(json!({
        "success": true,
        "name": template.policy_name(),
        "policy": description,
    })))
}

async fn status(services: &ApiService, fields: &CredentialFields, template: PerimeterTemplate) -> ApiResult {
    let status = services
        .policies(fields)?
        .is_attached_to_root(template.policy_name(), template.policy_type())
        .await?;
    Ok(Json(json!({
        "success": true,
        "name": template.policy_name(),
        "exists": status.exists,
        "attached": status.attached,
    })))
}

async fn modify(services: &ApiService, req: &ModifyPolicyRequest, template: PerimeterTemplate) -> ApiResult {
    services
        .policies(&req.credentials)?
        .modify(template, &req.params, req.attach)
        .await?;
    Ok(Json(json!({
        "success": true,
        "name": template.policy_name(),
        "attached": req.attach,
    })))
}

async fn get_network1_info(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CredentialFields>,
) -> ApiResult {
    describe(&services, &req, PerimeterTemplate::Network1).await
}

async fn get_network2_info(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CredentialFields>,
) -> ApiResult {
    describe(&services, &req, PerimeterTemplate::Network2).await
}

async fn get_network1_status(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CredentialFields>,
) -> ApiResult {
    status(&services, &req, PerimeterTemplate::Network1).await
}

async fn get_network2_status(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CredentialFields>,
) -> ApiResult {
    status(&services, &req, PerimeterTemplate::Network2).await
}

async fn modify_network1(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<ModifyPolicyRequest>,
) -> ApiResult {
    modify(&services, &req, PerimeterTemplate::Network1).await
}

async fn modify_network2(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<ModifyPolicyRequest>,
) -> ApiResult {
    modify(&services, &req, PerimeterTemplate::Network2).await
}

async fn run_cli(
    State(services): State<Arc<ApiService>>,
    Json(req): Json<CliRequest>,
) -> ApiResult {
    let bundle = services.credentials(&req.credentials)?;
    let output = services.cli.run(&req.command, &bundle).await?;
    Ok(Json(json!({
        "success": output.success(),
        "stdout": output.stdout,
        "stderr": output.stderr,
        "exitCode": output.exit_code,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_status() {
        assert_eq!(status_for(PerimeterErrorKind::MissingCredentials), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(PerimeterErrorKind::Unsupported), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(PerimeterErrorKind::AccessDenied), StatusCode::FORBIDDEN);
        assert_eq!(status_for(PerimeterErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(PerimeterErrorKind::Timeout), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(PerimeterErrorKind::Provider), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn modify_body_flattens_params() {
        let req: ModifyPolicyRequest = serde_json::from_value(json!({
            "accessKeyId": "AKIA",
            "secretAccessKey": "s",
            "sessionToken": "t",
            "actions": ["s3:GetObject"],
            "resources": ["*"],
            "sourceIps": ["192.0.2.0/24"],
            "attach": true,
        }))
        .unwrap();
        assert_eq!(req.credentials.access_key_id, "AKIA");
        assert_eq!(req.params.effect, "Deny");
        assert_eq!(req.params.source_ips, vec!["192.0.2.0/24"]);
        assert!(req.attach);
    }
}
