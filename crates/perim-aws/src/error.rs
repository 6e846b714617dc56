//! Provider error model shared by every client in this crate.
//!
//! AWS answers failures in one of two envelopes: the XML `<Error>` document
//! (S3) or a JSON object carrying `__type` (Organizations, Cognito). Both
//! are folded into a single [`AwsError`] so callers branch on `code` and
//! never on the wire format.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error returned by any AWS call made through [`crate::client::AwsClient`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsError {
    /// The AWS error code (e.g., "AccessDenied", "PolicyNotFoundException").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// The HTTP status code returned by the AWS API (0 if none was received).
    pub status_code: u16,
    /// AWS request ID, when the service returned one.
    pub request_id: Option<String>,
    /// The AWS service that returned the error (e.g., "s3", "organizations").
    pub service: String,
    /// The specific API action that failed.
    pub action: Option<String>,
    /// Whether this error is retryable.
    pub retryable: bool,
}

impl fmt::Display for AwsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AWS {} error [{}]: {} (HTTP {})",
            self.service, self.code, self.message, self.status_code
        )?;
        if let Some(ref req_id) = self.request_id {
            write!(f, " [RequestId: {}]", req_id)?;
        }
        Ok(())
    }
}

impl std::error::Error for AwsError {}

impl AwsError {
    pub fn new(service: &str, code: &str, message: &str, status_code: u16) -> Self {
        let retryable = Self::is_retryable_code(code, status_code);
        Self {
            code: code.to_string(),
            message: message.to_string(),
            status_code,
            request_id: None,
            service: service.to_string(),
            action: None,
            retryable,
        }
    }

    /// Create from a generic string error with a service context.
    pub fn internal(service: &str, msg: &str) -> Self {
        Self {
            code: "InternalError".to_string(),
            message: msg.to_string(),
            status_code: 500,
            request_id: None,
            service: service.to_string(),
            action: None,
            retryable: false,
        }
    }

    /// A response arrived but could not be decoded.
    pub fn parse(service: &str, message: &str) -> Self {
        Self {
            code: "ParseError".to_string(),
            message: message.to_string(),
            status_code: 200,
            request_id: None,
            service: service.to_string(),
            action: None,
            retryable: false,
        }
    }

    pub fn credential_error(message: &str) -> Self {
        Self {
            code: "CredentialError".to_string(),
            message: message.to_string(),
            status_code: 401,
            request_id: None,
            service: "sts".to_string(),
            action: None,
            retryable: false,
        }
    }

    pub fn validation(service: &str, message: &str) -> Self {
        Self {
            code: "ValidationError".to_string(),
            message: message.to_string(),
            status_code: 400,
            request_id: None,
            service: service.to_string(),
            action: None,
            retryable: false,
        }
    }

    pub fn with_request_id(mut self, id: String) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    pub fn with_action(mut self, action: &str) -> Self {
        self.action = Some(action.to_string());
        self
    }

    /// True when the service reported exactly this error code.
    pub fn is_code(&self, code: &str) -> bool {
        self.code == code
    }

    /// True for the family of authorization failures, regardless of which
    /// service produced them. A bare 403 with no body is coded `AccessDenied`
    /// by the parsers; other 403 codes such as `InvalidAccessKeyId` are not
    /// authorization failures.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self.code.as_str(),
            "AccessDenied" | "AccessDeniedException" | "AllAccessDisabled"
        )
    }

    /// Determine if an error code/status is retryable per AWS SDK retry policy.
    fn is_retryable_code(code: &str, status_code: u16) -> bool {
        if status_code == 429 || status_code == 502 || status_code == 503 || status_code == 504 {
            return true;
        }
        matches!(
            code,
            "Throttling"
                | "ThrottlingException"
                | "TooManyRequestsException"
                | "ConcurrentModificationException"
                | "RequestLimitExceeded"
                | "SlowDown"
                | "InternalError"
                | "InternalFailure"
                | "ServiceException"
                | "ServiceUnavailable"
                | "RequestTimeout"
                | "RequestTimeoutException"
        )
    }

    /// Parse an AWS XML error response.
    ///
    /// ```xml
    /// <Error>
    ///   <Code>AccessDenied</Code>
    ///   <Message>Access Denied</Message>
    ///   <RequestId>abc-123</RequestId>
    /// </Error>
    /// ```
    ///
    /// HEAD responses have no body at all, so the code falls back to one
    /// derived from the status.
    pub fn parse_xml_error(service: &str, status_code: u16, body: &str) -> Self {
        let code = Self::extract_xml_tag(body, "Code")
            .unwrap_or_else(|| Self::code_for_status(status_code).to_string());
        let message = Self::extract_xml_tag(body, "Message")
            .unwrap_or_else(|| format!("HTTP {} from {}", status_code, service));
        let request_id = Self::extract_xml_tag(body, "RequestId")
            .or_else(|| Self::extract_xml_tag(body, "RequestID"));

        let mut err = Self::new(service, &code, &message, status_code);
        if let Some(id) = request_id {
            err.request_id = Some(id);
        }
        err
    }

    /// Parse an AWS JSON error response.
    ///
    /// ```json
    /// {
    ///   "__type": "com.amazonaws.organizations#PolicyNotFoundException",
    ///   "Message": "We can't find a policy with the PolicyId that you specified."
    /// }
    /// ```
    pub fn parse_json_error(service: &str, status_code: u16, body: &str) -> Self {
        if let Ok(val) = serde_json::from_str::<serde_json::Value>(body) {
            let code = val
                .get("__type")
                .or_else(|| val.get("code"))
                .or_else(|| val.get("Code"))
                .and_then(|v| v.as_str())
                .map(|s| s.rsplit('#').next().unwrap_or(s).to_string())
                .unwrap_or_else(|| Self::code_for_status(status_code).to_string());
            let message = val
                .get("message")
                .or_else(|| val.get("Message"))
                .and_then(|v| v.as_str())
                .unwrap_or("Unknown error")
                .to_string();
            Self::new(service, &code, &message, status_code)
        } else {
            let snippet: String = body.chars().take(200).collect();
            Self::new(
                service,
                Self::code_for_status(status_code),
                &format!("Failed to parse error response: {}", snippet),
                status_code,
            )
        }
    }

    fn code_for_status(status_code: u16) -> &'static str {
        match status_code {
            403 => "AccessDenied",
            404 => "NotFound",
            _ => "UnknownError",
        }
    }

    /// Simple XML tag extractor (avoids full XML parse for error handling).
    fn extract_xml_tag(xml: &str, tag: &str) -> Option<String> {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        if let Some(start) = xml.find(&open) {
            let content_start = start + open.len();
            if let Some(end) = xml[content_start..].find(&close) {
                return Some(xml[content_start..content_start + end].to_string());
            }
        }
        None
    }
}

impl From<reqwest::Error> for AwsError {
    fn from(err: reqwest::Error) -> Self {
        Self {
            code: "HttpError".to_string(),
            message: err.to_string(),
            status_code: err.status().map(|s| s.as_u16()).unwrap_or(0),
            request_id: None,
            service: "http".to_string(),
            action: None,
            retryable: err.is_timeout() || err.is_connect(),
        }
    }
}

/// Convenience result type for AWS operations.
pub type AwsResult<T> = Result<T, AwsError>;
