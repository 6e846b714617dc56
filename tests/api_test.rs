use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use perim_aws::cognito::{AuthChallenge, AuthStep, AuthenticationResult};
use perim_aws::organizations::PolicyType;
use perim_aws::AwsRegion;
use perim_core::testing::{FakeBackend, FakeIdentity, FakeObjectStore, FakeOrganizations};
use perimeter_lib::api::ApiService;
use perimeter_lib::cli::CliBridge;
use perimeter_lib::perimeter_state::MemoryPerimeterState;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];
const SCP: &str = "network-perimeter-scp";
const RCP: &str = "network-perimeter-rcp";

fn router(backend: FakeBackend) -> Router {
    let service = ApiService::new(
        Arc::new(backend),
        Arc::new(MemoryPerimeterState::new()),
        CliBridge::new("aws", Duration::from_secs(5)),
        AwsRegion::new("us-east-1"),
    );
    Arc::new(service).create_router()
}

fn with_objects(objects: FakeObjectStore) -> FakeBackend {
    FakeBackend::new(FakeOrganizations::new(), objects, FakeIdentity::new(Vec::new()))
}

fn with_org(org: FakeOrganizations) -> FakeBackend {
    FakeBackend::new(org, FakeObjectStore::new(), FakeIdentity::new(Vec::new()))
}

fn creds(extra: Value) -> Value {
    let mut body = json!({
        "accessKeyId": "ASIATEST",
        "secretAccessKey": "test-secret",
        "sessionToken": "test-token",
    });
    if let (Some(target), Value::Object(fields)) = (body.as_object_mut(), extra) {
        target.extend(fields);
    }
    body
}

async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = router(FakeBackend::default());
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn resource_listing_inlines_images_only() {
    let app = router(with_objects(
        FakeObjectStore::new()
            .with_object("media", "notes.txt", "text/plain", b"hello")
            .with_object("media", "photo.jpg", "image/jpeg", JPEG),
    ));

    let (status, body) = post(&app, "/api/resource", creds(json!({ "bucketName": "media" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(
        body["resources"],
        json!([
            { "name": "notes.txt", "type": "file", "src": null },
            { "name": "photo.jpg", "type": "image", "src": format!("data:image/jpeg;base64,{}", BASE64.encode(JPEG)) },
        ])
    );
}

#[tokio::test]
async fn empty_bucket_is_success() {
    let app = router(with_objects(FakeObjectStore::new().with_bucket("empty")));
    let (status, body) = post(&app, "/api/resource", creds(json!({ "bucketName": "empty" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "success": true, "resources": [] }));
}

#[tokio::test]
async fn missing_credentials_are_rejected() {
    let app = router(FakeBackend::default());
    let (status, body) = post(&app, "/api/resource", json!({ "bucketName": "media" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "MissingCredentials");
}

#[tokio::test]
async fn unknown_region_is_rejected() {
    let app = router(FakeBackend::default());
    let (status, body) = post(
        &app,
        "/api/buckets_list",
        creds(json!({ "region": "US-EAST-1" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "InvalidRegion");
}

#[tokio::test]
async fn non_image_transfer_writes_nothing() {
    let backend = with_objects(
        FakeObjectStore::new()
            .with_object("src", "doc.pdf", "application/pdf", b"%PDF")
            .with_bucket("dst"),
    );
    let objects = backend.objects.clone();
    let app = router(backend);

    let (status, body) = post(
        &app,
        "/api/resources/send",
        creds(json!({
            "sourceBucketName": "src",
            "destinationBucketName": "dst",
            "objectName": "doc.pdf",
            "objectType": "file",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], "Unsupported");
    assert_eq!(objects.count("PutObject"), 0);
    assert!(objects.object("dst", "doc.pdf").is_none());
}

#[tokio::test]
async fn image_transfer_copies_object() {
    let backend = with_objects(
        FakeObjectStore::new()
            .with_object("src", "p.jpg", "image/jpeg", JPEG)
            .with_bucket("dst"),
    );
    let objects = backend.objects.clone();
    let app = router(backend);

    let (status, _) = post(
        &app,
        "/api/resources/send",
        creds(json!({
            "sourceBucketName": "src",
            "destinationBucketName": "dst",
            "objectName": "p.jpg",
            "objectType": "image",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(objects.object("dst", "p.jpg").unwrap().body.as_ref(), JPEG);
}

#[tokio::test]
async fn multipart_upload_returns_presigned_link() {
    let backend = with_objects(FakeObjectStore::new().with_bucket("uploads"));
    let objects = backend.objects.clone();
    let app = router(backend);

    let boundary = "perimeter-boundary";
    let mut body = Vec::new();
    for (name, value) in [
        ("accessKeyId", "ASIATEST"),
        ("secretAccessKey", "test-secret"),
        ("sessionToken", "test-token"),
        ("bucketName", "uploads"),
        ("filePath", "images/"),
    ] {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                boundary, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"cat.jpg\"\r\nContent-Type: image/jpeg\r\n\r\n",
            boundary
        )
        .as_bytes(),
    );
    body.extend_from_slice(JPEG);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/api/resource/add")
        .header("content-type", format!("multipart/form-data; boundary={}", boundary))
        .body(Body::from(body))
        .unwrap();
    let (status, body) = send(&app, request).await;

    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["key"], "images/cat.jpg");
    assert_eq!(body["expiresIn"], 3600);
    assert!(body["url"].as_str().unwrap().contains("X-Amz-Expires=3600"));
    let stored = objects.object("uploads", "images/cat.jpg").unwrap();
    assert_eq!(stored.content_type.as_deref(), Some("image/jpeg"));
}

#[tokio::test]
async fn delete_and_compliance() {
    let backend = with_objects(
        FakeObjectStore::new()
            .with_object("open", "k.txt", "text/plain", b"x")
            .deny("locked"),
    );
    let objects = backend.objects.clone();
    let app = router(backend);

    let (status, _) = post(
        &app,
        "/api/resource/delete",
        creds(json!({ "bucketName": "open", "objectKey": "k.txt" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(objects.object("open", "k.txt").is_none());

    let (_, body) = post(&app, "/api/resource/compliance", creds(json!({ "bucketName": "open" }))).await;
    assert_eq!(body["compliant"], true);
    let (_, body) = post(&app, "/api/resource/compliance", creds(json!({ "bucketName": "locked" }))).await;
    assert_eq!(body["compliant"], false);
}

#[tokio::test]
async fn denied_listing_maps_to_forbidden() {
    let app = router(with_objects(FakeObjectStore::new().deny("locked")));
    let (status, body) = post(&app, "/api/resource", creds(json!({ "bucketName": "locked" }))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "AccessDenied");
}

#[tokio::test]
async fn buckets_list_counts_objects() {
    let app = router(with_objects(
        FakeObjectStore::new()
            .with_bucket("alpha")
            .with_object("beta", "1", "text/plain", b"x")
            .with_object("beta", "2", "text/plain", b"x")
            .with_object("beta", "3", "text/plain", b"x"),
    ));
    let (status, body) = post(&app, "/api/buckets_list", creds(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["buckets"][0]["name"], "alpha");
    assert_eq!(body["buckets"][0]["objectCount"], 0);
    assert_eq!(body["buckets"][1]["objectCount"], 3);
    assert!(body["buckets"][1]["creationDate"].is_string());
}

#[tokio::test]
async fn perimeter_flag_flips_and_sets() {
    let app = router(FakeBackend::default());
    let get = || Request::builder().uri("/api/data_perimeter").body(Body::empty()).unwrap();

    let (_, body) = send(&app, get()).await;
    assert_eq!(body["enabled"], false);

    let request = Request::builder()
        .method("POST")
        .uri("/api/toggle_data_perimeter")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["enabled"], true);

    let (_, body) = post(&app, "/api/toggle_data_perimeter", json!({ "enabled": true })).await;
    assert_eq!(body["enabled"], true);
    let (_, body) = send(&app, get()).await;
    assert_eq!(body["enabled"], true);
}

#[tokio::test]
async fn perimeter_flag_rejects_malformed_body() {
    let app = router(FakeBackend::default());

    let (status, body) = post(&app, "/api/toggle_data_perimeter", json!({ "enabled": "yes" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "Validation");

    let request = Request::builder()
        .method("POST")
        .uri("/api/toggle_data_perimeter")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder().uri("/api/data_perimeter").body(Body::empty()).unwrap();
    let (_, body) = send(&app, request).await;
    assert_eq!(body["enabled"], false);
}

#[tokio::test]
async fn perimeter_flag_with_credentials_attaches_catalog() {
    let org = FakeOrganizations::new()
        .with_policy(SCP, PolicyType::ServiceControlPolicy, "{}")
        .with_policy(RCP, PolicyType::ResourceControlPolicy, "{}");
    let backend = with_org(org);
    let organizations = backend.organizations.clone();
    let app = router(backend);

    let (status, body) = post(&app, "/api/toggle_data_perimeter", creds(json!({ "enabled": true }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policies"][SCP], true);
    assert_eq!(body["policies"][RCP], true);
    assert!(organizations.is_attached(SCP, FakeOrganizations::ROOT_ID));
    assert!(organizations.is_attached(RCP, FakeOrganizations::ROOT_ID));

    post(&app, "/api/toggle_data_perimeter", creds(json!({ "enabled": false }))).await;
    assert!(!organizations.is_attached(SCP, FakeOrganizations::ROOT_ID));
}

#[tokio::test]
async fn policy_toggle_is_idempotent_over_http() {
    let backend = with_org(FakeOrganizations::new().with_policy(SCP, PolicyType::ServiceControlPolicy, "{}"));
    let app = router(backend);
    let body = creds(json!({ "name": SCP, "policyType": "SERVICE_CONTROL_POLICY", "attach": true }));

    let (first, _) = post(&app, "/api/perimeter/toggle", body.clone()).await;
    let (second, _) = post(&app, "/api/perimeter/toggle", body).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::OK);

    let (status, body) = post(
        &app,
        "/api/perimeter/toggle",
        creds(json!({ "name": "missing", "policyType": "SERVICE_CONTROL_POLICY", "attach": true })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NotFound");
}

#[tokio::test]
async fn network_policy_describe_modify_status() {
    let stored = r#"{"Version":"2012-10-17","Statement":[{"Sid":"Old","Effect":"Deny","Action":"s3:*","Resource":"*"}]}"#;
    let backend = with_org(FakeOrganizations::new().with_policy(SCP, PolicyType::ServiceControlPolicy, stored));
    let organizations = backend.organizations.clone();
    let app = router(backend);

    let (status, body) = post(&app, "/api/perimeter/getNetwork1Info", creds(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"]["action"], json!(["s3:*"]));
    assert_eq!(body["policy"]["sourceIps"], json!([]));

    let (status, _) = post(
        &app,
        "/api/perimeter/modifyNetwork1",
        creds(json!({
            "sid": "New",
            "actions": ["s3:GetObject"],
            "resources": ["*"],
            "sourceIps": ["198.51.100.0/24"],
            "sourceVpcs": ["vpc-0123"],
            "attach": true,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(organizations.is_attached(SCP, FakeOrganizations::ROOT_ID));

    let (_, body) = post(&app, "/api/perimeter/getNetwork1Info", creds(json!({}))).await;
    assert_eq!(body["policy"]["sid"], "New");
    assert_eq!(body["policy"]["sourceVpcs"], json!(["vpc-0123"]));

    let (_, body) = post(&app, "/api/perimeter/getNetwork1Status", creds(json!({}))).await;
    assert_eq!(body["exists"], true);
    assert_eq!(body["attached"], true);

    let (status, body) = post(&app, "/api/perimeter/getNetwork2Info", creds(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn network2_rejects_wildcard_actions() {
    let backend = with_org(FakeOrganizations::new());
    let organizations = backend.organizations.clone();
    let app = router(backend);

    let (status, body) = post(
        &app,
        "/api/perimeter/modifyNetwork2",
        creds(json!({ "actions": ["*"], "resources": ["*"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "Validation");
    assert!(organizations.calls().is_empty());
}

#[tokio::test]
async fn login_returns_profile() {
    let steps = vec![
        AuthStep::Challenge(AuthChallenge {
            name: "PASSWORD_VERIFIER".into(),
            session: None,
            parameters: HashMap::from([
                ("USER_ID_FOR_SRP".to_string(), "user-sub".to_string()),
                ("SALT".to_string(), "0a1b2c".to_string()),
                ("SRP_B".to_string(), "1234abcd".to_string()),
                ("SECRET_BLOCK".to_string(), BASE64.encode(b"block")),
            ]),
        }),
        AuthStep::Authenticated(AuthenticationResult {
            id_token: "id".into(),
            access_token: Some("access".into()),
            refresh_token: None,
            expires_in: Some(3600),
            token_type: Some("Bearer".into()),
        }),
    ];
    let app = router(FakeBackend::new(
        FakeOrganizations::new(),
        FakeObjectStore::new(),
        FakeIdentity::new(steps),
    ));

    let (status, body) = post(
        &app,
        "/api/login",
        json!({
            "username": "operator",
            "password": "pw",
            "clientId": "client",
            "userPoolId": "eu-west-1_Pool",
            "identityPoolId": "eu-west-1:abcd",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["region"], "eu-west-1");
    assert_eq!(body["profile"]["credentials"]["accessKeyId"], "ASIAFAKE");
    assert_eq!(body["profile"]["buckets"], json!([]));
}

#[tokio::test]
async fn failed_login_is_server_error() {
    let app = router(FakeBackend::default());
    let (status, body) = post(
        &app,
        "/api/login",
        json!({
            "username": "operator",
            "password": "wrong",
            "clientId": "client",
            "userPoolId": "us-east-1_Pool",
            "identityPoolId": "us-east-1:abcd",
        }),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "NotAuthorizedException");
}

#[tokio::test]
async fn cli_rejects_empty_command() {
    let app = router(FakeBackend::default());
    let (status, body) = post(&app, "/api/cli", creds(json!({ "command": "aws" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "Validation");
}
