//! Amazon S3 client.
//!
//! S3 uses a REST API with XML responses for listings and raw bytes for
//! object bodies. All requests are path-style (`/{bucket}/{key}`), with the
//! key URI-encoded once per path segment before signing.
//!
//! Reference: <https://docs.aws.amazon.com/AmazonS3/latest/API/>

use crate::client::{self, AwsClient, AwsResponse};
use crate::error::AwsResult;
use crate::signing::{uri_encode, uri_encode_path};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SERVICE: &str = "s3";

// ── Types ───────────────────────────────────────────────────────────────

/// S3 Bucket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bucket {
    pub name: String,
    pub creation_date: String,
}

/// One entry of a ListObjectsV2 page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Object {
    pub key: String,
    pub size: u64,
    pub last_modified: String,
    pub etag: String,
    pub storage_class: Option<String>,
}

/// Object details from HeadObject or GetObject response headers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObjectMetadata {
    pub key: String,
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl ObjectMetadata {
    fn from_response(key: &str, response: &AwsResponse, fallback_length: u64) -> Self {
        Self {
            key: key.to_string(),
            content_length: response
                .header("content-length")
                .and_then(|v| v.parse().ok())
                .unwrap_or(fallback_length),
            content_type: response.header("content-type").map(|s| s.to_string()),
            etag: response.header("etag").map(|s| s.to_string()),
            last_modified: response.header("last-modified").map(|s| s.to_string()),
        }
    }
}

/// A downloaded object.
#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    pub body: Bytes,
    pub metadata: ObjectMetadata,
}

/// ListObjectsV2 output (one page).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListObjectsV2Output {
    pub name: String,
    pub prefix: Option<String>,
    pub is_truncated: bool,
    pub contents: Vec<Object>,
    pub next_continuation_token: Option<String>,
    pub key_count: u32,
}

impl ListObjectsV2Output {
    fn from_xml(bucket: &str, xml: &str) -> Self {
        let contents = client::xml_blocks(xml, "Contents")
            .iter()
            .filter_map(|block| {
                let key = client::xml_text(block, "Key")?;
                Some(Object {
                    key,
                    size: client::xml_text(block, "Size")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0),
                    last_modified: client::xml_text(block, "LastModified").unwrap_or_default(),
                    etag: client::xml_text(block, "ETag").unwrap_or_default(),
                    storage_class: client::xml_text(block, "StorageClass"),
                })
            })
            .collect();

        Self {
            name: client::xml_text(xml, "Name").unwrap_or_else(|| bucket.to_string()),
            prefix: client::xml_text(xml, "Prefix").filter(|p| !p.is_empty()),
            is_truncated: client::xml_text(xml, "IsTruncated")
                .map(|v| v == "true")
                .unwrap_or(false),
            contents,
            next_continuation_token: client::xml_text(xml, "NextContinuationToken"),
            key_count: client::xml_text(xml, "KeyCount")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
        }
    }
}

/// Path-style resource path for an object, encoded once per segment.
pub fn object_path(bucket: &str, key: &str) -> String {
    format!("/{}/{}", uri_encode(bucket), uri_encode_path(key))
}

// ── Client ──────────────────────────────────────────────────────────────

/// S3 service client.
#[derive(Debug, Clone)]
pub struct S3Client {
    client: AwsClient,
}

impl S3Client {
    pub fn new(client: AwsClient) -> Self {
        Self { client }
    }

    /// ListBuckets.
    pub async fn list_buckets(&self) -> AwsResult<Vec<Bucket>> {
        let response = self
            .client
            .rest_request(SERVICE, "GET", "/", &BTreeMap::new(), BTreeMap::new(), Bytes::new())
            .await?;

        let body = response.text();
        Ok(client::xml_blocks(&body, "Bucket")
            .iter()
            .filter_map(|block| {
                Some(Bucket {
                    name: client::xml_text(block, "Name")?,
                    creation_date: client::xml_text(block, "CreationDate").unwrap_or_default(),
                })
            })
            .collect())
    }

    /// ListObjectsV2, one page.
    pub async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation_token: Option<&str>,
    ) -> AwsResult<ListObjectsV2Output> {
        let mut query = BTreeMap::new();
        query.insert("list-type".to_string(), "2".to_string());
        if let Some(p) = prefix {
            query.insert("prefix".to_string(), p.to_string());
        }
        if let Some(t) = continuation_token {
            query.insert("continuation-token".to_string(), t.to_string());
        }

        let path = format!("/{}", uri_encode(bucket));
        let response = self
            .client
            .rest_request(SERVICE, "GET", &path, &query, BTreeMap::new(), Bytes::new())
            .await?;

        Ok(ListObjectsV2Output::from_xml(bucket, &response.text()))
    }

    /// HeadObject.
    pub async fn head_object(&self, bucket: &str, key: &str) -> AwsResult<ObjectMetadata> {
        let response = self
            .client
            .rest_request(
                SERVICE,
                "HEAD",
                &object_path(bucket, key),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        Ok(ObjectMetadata::from_response(key, &response, 0))
    }

    /// GetObject. The body is returned as raw bytes.
    pub async fn get_object(&self, bucket: &str, key: &str) -> AwsResult<GetObjectOutput> {
        let response = self
            .client
            .rest_request(
                SERVICE,
                "GET",
                &object_path(bucket, key),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        let metadata = ObjectMetadata::from_response(key, &response, response.body.len() as u64);
        Ok(GetObjectOutput {
            body: response.body,
            metadata,
        })
    }

    /// PutObject. Returns the ETag.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: Option<&str>,
    ) -> AwsResult<String> {
        let mut headers = BTreeMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }

        let response = self
            .client
            .rest_request(
                SERVICE,
                "PUT",
                &object_path(bucket, key),
                &BTreeMap::new(),
                headers,
                body,
            )
            .await?;

        Ok(response.header("etag").unwrap_or_default().to_string())
    }

    /// DeleteObject. S3 reports success for keys that do not exist.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> AwsResult<()> {
        self.client
            .rest_request(
                SERVICE,
                "DELETE",
                &object_path(bucket, key),
                &BTreeMap::new(),
                BTreeMap::new(),
                Bytes::new(),
            )
            .await?;
        Ok(())
    }

    /// Pre-signed GET URL for an object.
    pub fn presign_get(&self, bucket: &str, key: &str, expires_in_secs: u64) -> AwsResult<String> {
        self.client
            .presign(SERVICE, "GET", &object_path(bucket, key), expires_in_secs)
    }
}
