//! Base AWS HTTP client with SigV4 signing.
//!
//! Every service module in this crate goes through [`AwsClient`]. Two wire
//! styles are supported: the JSON 1.1 protocol (Organizations, Cognito) and
//! REST with XML responses (S3). Clients built with
//! [`AwsClient::anonymous`] skip signing entirely, which is what the
//! unauthenticated Cognito calls expect.

use crate::config::{AwsCredentials, AwsRegion, RetryConfig, RetryMode};
use crate::error::{AwsError, AwsResult};
use crate::signing::SigV4Signer;
use bytes::Bytes;
use chrono::Utc;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

/// Base AWS client that handles signing, retries, and HTTP communication.
#[derive(Debug, Clone)]
pub struct AwsClient {
    http: Client,
    /// `None` for unsigned clients.
    credentials: Option<AwsCredentials>,
    region: AwsRegion,
    retry_config: RetryConfig,
    /// Custom endpoint URL override (LocalStack, MinIO, test servers).
    endpoint_override: Option<String>,
    user_agent: String,
}

/// Response from an AWS API call.
#[derive(Debug, Clone)]
pub struct AwsResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
    pub request_id: Option<String>,
}

impl AwsResponse {
    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

impl AwsClient {
    /// Create a client that signs every request with `credentials`.
    pub fn new(
        credentials: AwsCredentials,
        region: AwsRegion,
        retry_config: RetryConfig,
        endpoint_override: Option<String>,
    ) -> Self {
        Self::build(Some(credentials), region, retry_config, endpoint_override)
    }

    /// Create a client that sends requests unsigned.
    pub fn anonymous(
        region: AwsRegion,
        retry_config: RetryConfig,
        endpoint_override: Option<String>,
    ) -> Self {
        Self::build(None, region, retry_config, endpoint_override)
    }

    fn build(
        credentials: Option<AwsCredentials>,
        region: AwsRegion,
        retry_config: RetryConfig,
        endpoint_override: Option<String>,
    ) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            credentials,
            region,
            retry_config,
            endpoint_override: endpoint_override.map(|u| u.trim_end_matches('/').to_string()),
            user_agent: format!("data-perimeter/{} perim-aws", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Get the base endpoint for a service.
    pub fn endpoint(&self, service: &str) -> String {
        if let Some(ref url) = self.endpoint_override {
            url.clone()
        } else {
            self.region.endpoint(service)
        }
    }

    pub fn region(&self) -> &AwsRegion {
        &self.region
    }

    pub fn region_name(&self) -> &str {
        &self.region.name
    }

    pub fn credentials(&self) -> Option<&AwsCredentials> {
        self.credentials.as_ref()
    }

    /// Execute an AWS JSON 1.1 request (`X-Amz-Target` dispatch).
    pub async fn json_request(
        &self,
        service: &str,
        target: &str,
        json_body: &str,
    ) -> AwsResult<AwsResponse> {
        let endpoint = self.endpoint(service);
        let url = format!("{}/", endpoint);

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), extract_host(&endpoint));
        headers.insert("content-type".to_string(), "application/x-amz-json-1.1".to_string());
        headers.insert("x-amz-target".to_string(), target.to_string());

        let action = target.rsplit('.').next().unwrap_or(target);
        self.execute_with_retry(service, "POST", &url, headers, Bytes::from(json_body.to_string()))
            .await
            .map_err(|e| e.with_action(action))
    }

    /// Execute a REST request. `path` must already be URI-encoded.
    pub async fn rest_request(
        &self,
        service: &str,
        method: &str,
        path: &str,
        query_params: &BTreeMap<String, String>,
        extra_headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> AwsResult<AwsResponse> {
        let url = self.rest_url(service, path, query_params);
        let mut headers = extra_headers;
        headers.insert("host".to_string(), extract_host(&self.endpoint(service)));

        self.execute_with_retry(service, method, &url, headers, body)
            .await
    }

    /// Build a pre-signed URL for `path` that stays valid for
    /// `expires_in_secs` seconds. Requires credentials.
    pub fn presign(
        &self,
        service: &str,
        method: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> AwsResult<String> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            AwsError::credential_error("pre-signing requires credentials")
        })?;
        let url = self.rest_url(service, path, &BTreeMap::new());
        let signer = self.signer(credentials, service);
        Ok(signer.presign_url(method, &url, expires_in_secs, Utc::now()))
    }

    fn rest_url(&self, service: &str, path: &str, query_params: &BTreeMap<String, String>) -> String {
        let base = self.endpoint(service);
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        if query_params.is_empty() {
            format!("{}{}", base, path)
        } else {
            format!(
                "{}{}?{}",
                base,
                path,
                crate::signing::build_query_string(query_params)
            )
        }
    }

    fn signer(&self, credentials: &AwsCredentials, service: &str) -> SigV4Signer {
        SigV4Signer::new(
            &credentials.access_key_id,
            &credentials.secret_access_key,
            credentials.session_token.as_deref(),
            &self.region.signing_region(service),
            service,
        )
    }

    /// Execute an HTTP request with SigV4 signing and retry logic.
    async fn execute_with_retry(
        &self,
        service: &str,
        method: &str,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
    ) -> AwsResult<AwsResponse> {
        let max_attempts = self.retry_config.max_attempts.max(1);

        for attempt in 0..max_attempts {
            match self.execute_once(service, method, url, &headers, &body).await {
                Ok(response) => {
                    if (200..300).contains(&response.status) {
                        return Ok(response);
                    }

                    let error = error_from_response(service, &response);

                    if error.retryable && attempt + 1 < max_attempts {
                        let delay = self.calculate_backoff(attempt);
                        log::warn!(
                            "AWS {} retryable error (attempt {}/{}): {} - retrying in {}ms",
                            service,
                            attempt + 1,
                            max_attempts,
                            error.code,
                            delay
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }

                    log::debug!("AWS {} {} {} failed: {}", service, method, url, error);
                    return Err(error);
                }
                Err(e) => {
                    if e.retryable && attempt + 1 < max_attempts {
                        let delay = self.calculate_backoff(attempt);
                        log::warn!(
                            "AWS {} HTTP error (attempt {}/{}): {} - retrying in {}ms",
                            service,
                            attempt + 1,
                            max_attempts,
                            e.message,
                            delay
                        );
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                        continue;
                    }
                    return Err(e);
                }
            }
        }

        Err(AwsError::new(
            service,
            "MaxRetriesExceeded",
            &format!("Request failed after {} attempts", max_attempts),
            0,
        ))
    }

    /// Execute a single HTTP request, signing it when credentials are set.
    async fn execute_once(
        &self,
        service: &str,
        method: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: &Bytes,
    ) -> AwsResult<AwsResponse> {
        let final_headers = match self.credentials {
            Some(ref creds) => {
                self.signer(creds, service)
                    .sign_request(method, url, headers, body, Utc::now())
                    .headers
            }
            None => headers.clone(),
        };

        let http_method: reqwest::Method = method.parse().map_err(|_| {
            AwsError::validation(service, &format!("Invalid HTTP method: {}", method))
        })?;
        let mut req = self.http.request(http_method, url);

        for (key, value) in &final_headers {
            // reqwest derives Host from the URL
            if key == "host" {
                continue;
            }
            req = req.header(key.as_str(), value.as_str());
        }
        req = req.header("user-agent", &self.user_agent);
        if !body.is_empty() {
            req = req.body(body.clone());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AwsError::from(e).with_service(service))?;

        let status = resp.status().as_u16();
        let mut resp_headers = BTreeMap::new();
        for (key, value) in resp.headers() {
            if let Ok(v) = value.to_str() {
                resp_headers.insert(key.as_str().to_string(), v.to_string());
            }
        }
        let request_id = resp_headers
            .get("x-amz-request-id")
            .or_else(|| resp_headers.get("x-amzn-requestid"))
            .cloned();
        let resp_body = resp
            .bytes()
            .await
            .map_err(|e| AwsError::from(e).with_service(service))?;

        Ok(AwsResponse {
            status,
            headers: resp_headers,
            body: resp_body,
            request_id,
        })
    }

    /// Calculate exponential backoff with jitter.
    fn calculate_backoff(&self, attempt: u32) -> u64 {
        let base = self.retry_config.initial_backoff_ms;
        let max = self.retry_config.max_backoff_ms;
        let exponential = base.saturating_mul(2u64.saturating_pow(attempt));
        let capped = exponential.min(max);

        match self.retry_config.mode {
            RetryMode::Standard => {
                use rand::Rng;
                rand::thread_rng().gen_range(0..=capped)
            }
            RetryMode::Legacy => capped,
        }
    }
}

/// Fold a non-2xx response into an [`AwsError`], picking the envelope by
/// service and body shape.
fn error_from_response(service: &str, response: &AwsResponse) -> AwsError {
    let body = response.text();
    let mut error = if service == "s3" || body.trim_start().starts_with('<') {
        AwsError::parse_xml_error(service, response.status, &body)
    } else {
        AwsError::parse_json_error(service, response.status, &body)
    };
    if error.request_id.is_none() {
        error.request_id = response.request_id.clone();
    }
    error
}

/// Extract the host (and explicit port, if any) from a URL string.
fn extract_host(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.host_str().map(|h| match u.port() {
                Some(port) => format!("{}:{}", h, port),
                None => h.to_string(),
            })
        })
        .unwrap_or_else(|| "amazonaws.com".to_string())
}

/// Simple XML value extractor for AWS responses. Entities are decoded.
pub fn xml_text(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = xml.find(&open)?;
    let content_start = start + open.len();
    let end = xml[content_start..].find(&close)?;
    Some(xml_unescape(&xml[content_start..content_start + end]))
}

/// Extract all XML blocks (including nested content) for a given tag.
pub fn xml_blocks(xml: &str, tag: &str) -> Vec<String> {
    let mut results = Vec::new();
    let open_exact = format!("<{}>", tag);
    let open_attr = format!("<{} ", tag);
    let close = format!("</{}>", tag);
    let mut search_from = 0;
    loop {
        let rest = &xml[search_from..];
        let start = match (rest.find(&open_exact), rest.find(&open_attr)) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => break,
        };
        let abs_start = search_from + start;
        if let Some(end) = xml[abs_start..].find(&close) {
            let full_end = abs_start + end + close.len();
            results.push(xml[abs_start..full_end].to_string());
            search_from = full_end;
        } else {
            break;
        }
    }
    results
}

/// Decode the predefined XML entities and numeric character references
/// (`&#13;`, `&#x1F;`). S3 uses the latter for control characters in keys.
pub fn xml_unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let decoded = tail
            .find(';')
            .and_then(|end| xml_entity(&tail[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn xml_entity(name: &str) -> Option<char> {
    match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "amp" => Some('&'),
        _ => {
            let reference = name.strip_prefix('#')?;
            let code = match reference.strip_prefix('x').or_else(|| reference.strip_prefix('X')) {
                Some(hex) if !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit()) => {
                    u32::from_str_radix(hex, 16).ok()?
                }
                Some(_) => return None,
                None if !reference.is_empty() && reference.chars().all(|c| c.is_ascii_digit()) => {
                    reference.parse().ok()?
                }
                None => return None,
            };
            char::from_u32(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_host_https() {
        assert_eq!(
            extract_host("https://organizations.us-east-1.amazonaws.com"),
            "organizations.us-east-1.amazonaws.com"
        );
    }

    #[test]
    fn extract_host_keeps_port() {
        assert_eq!(extract_host("http://localhost:4566"), "localhost:4566");
    }

    #[test]
    fn endpoint_override_wins() {
        let client = AwsClient::anonymous(
            AwsRegion::new("eu-west-1"),
            RetryConfig::default(),
            Some("http://localhost:4566/".into()),
        );
        assert_eq!(client.endpoint("s3"), "http://localhost:4566");
        assert!(client.credentials().is_none());
    }

    #[test]
    fn rest_url_appends_sorted_query() {
        let client = AwsClient::anonymous(AwsRegion::new("us-west-2"), RetryConfig::default(), None);
        let mut q = BTreeMap::new();
        q.insert("prefix".to_string(), "a b".to_string());
        q.insert("list-type".to_string(), "2".to_string());
        assert_eq!(
            client.rest_url("s3", "/bucket", &q),
            "https://s3.us-west-2.amazonaws.com/bucket?list-type=2&prefix=a%20b"
        );
    }

    #[test]
    fn presign_requires_credentials() {
        let client = AwsClient::anonymous(AwsRegion::default(), RetryConfig::default(), None);
        let err = client.presign("s3", "GET", "/b/k", 60).unwrap_err();
        assert_eq!(err.code, "CredentialError");
    }

    #[test]
    fn presign_uses_region_endpoint() {
        let client = AwsClient::new(
            AwsCredentials::new("AKIDEXAMPLE", "secret"),
            AwsRegion::new("eu-central-1"),
            RetryConfig::default(),
            None,
        );
        let url = client.presign("s3", "GET", "/b/photo.png", 3600).unwrap();
        assert!(url.starts_with("https://s3.eu-central-1.amazonaws.com/b/photo.png?"));
        assert!(url.contains("%2Feu-central-1%2Fs3%2F"));
    }

    #[test]
    fn xml_text_simple() {
        let xml = "<Response><Key>a&amp;b.txt</Key></Response>";
        assert_eq!(xml_text(xml, "Key"), Some("a&b.txt".to_string()));
        assert_eq!(xml_text(xml, "Missing"), None);
    }

    #[test]
    fn xml_unescape_numeric_references() {
        assert_eq!(xml_unescape("line&#13;break"), "line\rbreak");
        assert_eq!(xml_unescape("tab&#x9;x&#X41;"), "tab\txA");
        assert_eq!(xml_unescape("&amp;lt;"), "&lt;");
        assert_eq!(xml_unescape("a & b &#xZZ; &#;"), "a & b &#xZZ; &#;");
        let xml = "<Contents><Key>logs/a&#13;b.txt</Key></Contents>";
        assert_eq!(xml_text(xml, "Key").as_deref(), Some("logs/a\rb.txt"));
    }

    #[test]
    fn xml_blocks_multiple() {
        let xml = r#"<Root><Contents><Key>1</Key></Contents><Contents><Key>2</Key></Contents><ContentsX/></Root>"#;
        let blocks = xml_blocks(xml, "Contents");
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].contains("<Key>2</Key>"));
    }

    #[test]
    fn error_from_empty_head_response() {
        let resp = AwsResponse {
            status: 403,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            request_id: Some("r-1".into()),
        };
        let err = error_from_response("s3", &resp);
        assert!(err.is_access_denied());
        assert_eq!(err.request_id.as_deref(), Some("r-1"));
    }
}
