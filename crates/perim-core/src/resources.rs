//! S3 object operations surfaced to the resource browser.
//!
//! Listing inlines every image object as a base64 data URI and transfer
//! copies through memory; neither streams nor caps object size.

use crate::backend::ObjectStore;
use crate::error::{PerimeterError, PerimeterErrorKind, PerimeterResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use perim_aws::drain_pages;
use perim_aws::s3::Object;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifetime of the download link returned after an upload.
pub const PRESIGNED_URL_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Image,
    File,
}

impl ResourceKind {
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        match content_type {
            Some(ct) if ct.trim().to_ascii_lowercase().starts_with("image/") => ResourceKind::Image,
            _ => ResourceKind::File,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "image" => Some(ResourceKind::Image),
            "file" => Some(ResourceKind::File),
            _ => None,
        }
    }
}

/// One object as the browser renders it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    /// `data:` URI for images, `null` otherwise.
    pub src: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadedResource {
    pub key: String,
    pub url: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub compliant: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BucketSummary {
    pub name: String,
    pub creation_date: String,
    pub object_count: usize,
}

/// Object key for an upload: `file_path` when it names a key, the file name
/// under it when it ends in `/`, the bare file name when it is blank.
pub fn upload_key(file_path: Option<&str>, file_name: &str) -> PerimeterResult<String> {
    let name = file_name.trim();
    let key = match file_path.map(|p| p.trim().trim_start_matches('/')) {
        Some(path) if path.is_empty() => name.to_string(),
        Some(path) if path.ends_with('/') => format!("{}{}", path, name),
        Some(path) => path.to_string(),
        None => name.to_string(),
    };
    if key.is_empty() || key.ends_with('/') {
        return Err(PerimeterError::validation("an object key or file name is required"));
    }
    require_key(&key, "filePath")?;
    Ok(key)
}

fn require(value: &str, field: &str) -> PerimeterResult<()> {
    if value.trim().is_empty() {
        return Err(PerimeterError::validation(format!("{} is required", field)));
    }
    Ok(())
}

/// Keys with `.` or `..` segments are normalised away by URL parsing and
/// would address a different object than the one named.
fn require_key(key: &str, field: &str) -> PerimeterResult<()> {
    require(key, field)?;
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(PerimeterError::validation(format!(
            "{} must not contain '.' or '..' path segments",
            field
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ResourceManager {
    store: Arc<dyn ObjectStore>,
}

impl ResourceManager {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    async fn all_objects(&self, bucket: &str) -> PerimeterResult<Vec<Object>> {
        let store = &self.store;
        drain_pages(|token| async move { store.list_objects_page(bucket, token).await }).await
    }

    /// Every object in `bucket`, images inlined. An empty bucket is an empty
    /// list, not an error.
    pub async fn list_resources(&self, bucket: &str) -> PerimeterResult<Vec<Resource>> {
        require(bucket, "bucketName")?;
        let objects = self.all_objects(bucket).await?;
        let mut resources = Vec::with_capacity(objects.len());

        for object in objects {
            let meta = self.store.head_object(bucket, &object.key).await?;
            let kind = ResourceKind::from_content_type(meta.content_type.as_deref());
            let src = match kind {
                ResourceKind::Image => {
                    let stored = self.store.get_object(bucket, &object.key).await?;
                    let content_type = stored
                        .content_type
                        .or(meta.content_type)
                        .unwrap_or_else(|| "application/octet-stream".to_string());
                    Some(format!("data:{};base64,{}", content_type, BASE64.encode(&stored.body)))
                }
                ResourceKind::File => None,
            };
            resources.push(Resource {
                name: object.key,
                kind,
                src,
            });
        }

        log::debug!("listed {} resources in {}", resources.len(), bucket);
        Ok(resources)
    }

    /// Store an upload and hand back a one-hour download link.
    pub async fn add_resource(
        &self,
        bucket: &str,
        file_path: Option<&str>,
        file_name: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> PerimeterResult<UploadedResource> {
        require(bucket, "bucketName")?;
        let key = upload_key(file_path, file_name)?;
        let size = body.len();
        self.store.put_object(bucket, &key, body, content_type).await?;
        let url = self.store.presign_get(bucket, &key, PRESIGNED_URL_TTL_SECS)?;
        log::info!("uploaded {} bytes to s3://{}/{}", size, bucket, key);
        Ok(UploadedResource {
            key,
            url,
            expires_in: PRESIGNED_URL_TTL_SECS,
        })
    }

    pub async fn delete_resource(&self, bucket: &str, key: &str) -> PerimeterResult<()> {
        require(bucket, "bucketName")?;
        require_key(key, "objectKey")?;
        self.store.delete_object(bucket, key).await?;
        log::info!("deleted s3://{}/{}", bucket, key);
        Ok(())
    }

    /// Copy `object_name` between buckets. Only images are transferred;
    /// anything else is refused before touching either bucket.
    pub async fn transfer_resource(
        &self,
        source_bucket: &str,
        destination_bucket: &str,
        object_name: &str,
        object_type: &str,
    ) -> PerimeterResult<()> {
        if ResourceKind::parse(object_type) != Some(ResourceKind::Image) {
            return Err(PerimeterError::unsupported(format!(
                "transfer of '{}' objects is not supported",
                object_type
            )));
        }
        require(source_bucket, "sourceBucketName")?;
        require(destination_bucket, "destinationBucketName")?;
        require_key(object_name, "objectName")?;

        let object = self.store.get_object(source_bucket, object_name).await?;
        self.store
            .put_object(
                destination_bucket,
                object_name,
                object.body,
                object.content_type.as_deref(),
            )
            .await?;
        log::info!(
            "transferred {} from {} to {}",
            object_name,
            source_bucket,
            destination_bucket
        );
        Ok(())
    }

    /// Probe whether the caller's credentials may list `bucket`.
    pub async fn check_compliance(&self, bucket: &str) -> PerimeterResult<ComplianceReport> {
        require(bucket, "bucketName")?;
        let report = match self.store.list_objects_page(bucket, None).await {
            Ok(_) => ComplianceReport {
                compliant: true,
                message: "Access granted".to_string(),
            },
            Err(e) if e.kind == PerimeterErrorKind::AccessDenied => ComplianceReport {
                compliant: false,
                message: "Access denied: request is outside the data perimeter".to_string(),
            },
            Err(e) => ComplianceReport {
                compliant: false,
                message: e.code.unwrap_or(e.message),
            },
        };
        log::info!("compliance check on {}: {}", bucket, report.compliant);
        Ok(report)
    }

    /// Buckets visible to the caller with their object counts.
    pub async fn list_buckets(&self) -> PerimeterResult<Vec<BucketSummary>> {
        let buckets = self.store.list_buckets().await?;
        let mut summaries = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let object_count = self.all_objects(&bucket.name).await?.len();
            summaries.push(BucketSummary {
                name: bucket.name,
                creation_date: bucket.creation_date,
                object_count,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeObjectStore;

    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0];

    fn setup(store: FakeObjectStore) -> (Arc<FakeObjectStore>, ResourceManager) {
        let store = Arc::new(store);
        (store.clone(), ResourceManager::new(store))
    }

    #[tokio::test]
    async fn empty_bucket_lists_nothing() {
        let (_, mgr) = setup(FakeObjectStore::new().with_bucket("empty"));
        assert!(mgr.list_resources("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn images_are_inlined_files_are_not() {
        let (store, mgr) = setup(
            FakeObjectStore::new()
                .with_object("b", "notes.txt", "text/plain", b"hello")
                .with_object("b", "photo.jpg", "image/jpeg", JPEG),
        );
        let resources = mgr.list_resources("b").await.unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind, ResourceKind::File);
        assert!(resources[0].src.is_none());
        assert_eq!(resources[1].kind, ResourceKind::Image);
        assert_eq!(
            resources[1].src.as_deref(),
            Some(format!("data:image/jpeg;base64,{}", BASE64.encode(JPEG)).as_str())
        );
        assert_eq!(store.count("GetObject"), 1);
    }

    #[tokio::test]
    async fn listing_spans_pages() {
        let mut store = FakeObjectStore::new();
        for i in 0..5 {
            store = store.with_object("b", &format!("k{}", i), "text/plain", b"x");
        }
        let (store, mgr) = setup(store);
        assert_eq!(mgr.list_resources("b").await.unwrap().len(), 5);
        assert_eq!(store.count("ListObjectsV2"), 3);
    }

    #[test]
    fn upload_key_rules() {
        assert_eq!(upload_key(None, "a.png").unwrap(), "a.png");
        assert_eq!(upload_key(Some(""), "a.png").unwrap(), "a.png");
        assert_eq!(upload_key(Some("/img/"), "a.png").unwrap(), "img/a.png");
        assert_eq!(upload_key(Some("img/b.png"), "a.png").unwrap(), "img/b.png");
        assert!(upload_key(Some("img/"), " ").is_err());
        assert!(upload_key(Some("../other/"), "a.png").is_err());
        assert!(upload_key(Some("img/./b.png"), "a.png").is_err());
        assert_eq!(upload_key(Some("img/..b.png"), "a.png").unwrap(), "img/..b.png");
    }

    #[tokio::test]
    async fn dot_segments_are_rejected_before_any_call() {
        let (store, mgr) = setup(
            FakeObjectStore::new()
                .with_object("media", "secret.txt", "text/plain", b"x")
                .with_object("media", "p.jpg", "image/jpeg", JPEG)
                .with_bucket("dst"),
        );
        let err = mgr.delete_resource("media", "reports/../secret.txt").await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Validation);
        let err = mgr.transfer_resource("media", "dst", "./p.jpg", "image").await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Validation);
        let err = mgr
            .add_resource("media", Some("a/../secret.txt"), "x", Bytes::from_static(b"y"), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Validation);
        assert!(store.calls().is_empty());
        assert!(store.object("media", "secret.txt").is_some());
    }

    #[tokio::test]
    async fn add_returns_hour_long_link() {
        let (store, mgr) = setup(FakeObjectStore::new().with_bucket("b"));
        let out = mgr
            .add_resource("b", Some("up/"), "a.png", Bytes::from_static(JPEG), Some("image/png"))
            .await
            .unwrap();
        assert_eq!(out.key, "up/a.png");
        assert!(out.url.contains("X-Amz-Expires=3600"));
        let stored = store.object("b", "up/a.png").unwrap();
        assert_eq!(stored.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn delete_requires_key() {
        let (store, mgr) = setup(FakeObjectStore::new().with_object("b", "k", "text/plain", b"x"));
        assert!(mgr.delete_resource("b", "").await.is_err());
        mgr.delete_resource("b", "k").await.unwrap();
        assert!(store.object("b", "k").is_none());
    }

    #[tokio::test]
    async fn transfer_copies_images() {
        let (store, mgr) = setup(
            FakeObjectStore::new()
                .with_object("src", "p.jpg", "image/jpeg", JPEG)
                .with_bucket("dst"),
        );
        mgr.transfer_resource("src", "dst", "p.jpg", "image").await.unwrap();
        let copy = store.object("dst", "p.jpg").unwrap();
        assert_eq!(copy.body.as_ref(), JPEG);
        assert_eq!(copy.content_type.as_deref(), Some("image/jpeg"));
    }

    #[tokio::test]
    async fn transfer_refuses_other_types_without_calls() {
        let (store, mgr) = setup(
            FakeObjectStore::new()
                .with_object("src", "n.txt", "text/plain", b"x")
                .with_bucket("dst"),
        );
        let err = mgr.transfer_resource("src", "dst", "n.txt", "file").await.unwrap_err();
        assert_eq!(err.kind, PerimeterErrorKind::Unsupported);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn compliance_maps_denial() {
        let (_, mgr) = setup(FakeObjectStore::new().with_bucket("ok").deny("blocked"));
        assert!(mgr.check_compliance("ok").await.unwrap().compliant);

        let denied = mgr.check_compliance("blocked").await.unwrap();
        assert!(!denied.compliant);
        assert!(denied.message.starts_with("Access denied"));

        let missing = mgr.check_compliance("nope").await.unwrap();
        assert_eq!(missing.message, "NoSuchBucket");
    }

    #[tokio::test]
    async fn compliance_reports_credential_failures_by_code() {
        let (_, mgr) = setup(FakeObjectStore::new().reject("media", "InvalidAccessKeyId", 403));
        let report = mgr.check_compliance("media").await.unwrap();
        assert!(!report.compliant);
        assert_eq!(report.message, "InvalidAccessKeyId");
    }

    #[tokio::test]
    async fn bucket_summaries_count_objects() {
        let (_, mgr) = setup(
            FakeObjectStore::new()
                .with_bucket("a")
                .with_object("b", "1", "text/plain", b"x")
                .with_object("b", "2", "text/plain", b"x")
                .with_object("b", "3", "text/plain", b"x"),
        );
        let buckets = mgr.list_buckets().await.unwrap();
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].object_count, 0);
        assert_eq!(buckets[1].name, "b");
        assert_eq!(buckets[1].object_count, 3);
    }
}
