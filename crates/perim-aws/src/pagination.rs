//! Cursor pagination shared by every list operation.
//!
//! AWS list calls return one page plus an opaque continuation token
//! (`NextToken` for JSON services, `NextContinuationToken` for S3). The
//! helpers here turn a single-page fetcher into the complete, ordered item
//! sequence.

use crate::error::{AwsError, AwsResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    /// Token for the next page; `None` (or empty) on the last page.
    pub next_token: Option<String>,
}

impl<T> PaginatedResponse<T> {
    pub fn new(items: Vec<T>, next_token: Option<String>) -> Self {
        Self {
            items,
            next_token: next_token.filter(|t| !t.is_empty()),
        }
    }

    pub fn last(items: Vec<T>) -> Self {
        Self::new(items, None)
    }
}

impl<T: DeserializeOwned> PaginatedResponse<T> {
    /// Decode a JSON-protocol page. The item list is the single
    /// array-valued member of the response object; pages with zero or
    /// several array members are rejected rather than guessed at.
    pub fn from_json_page(service: &str, body: &str, token_field: &str) -> AwsResult<Self> {
        let value: serde_json::Value = serde_json::from_str(body)
            .map_err(|e| AwsError::parse(service, &format!("invalid JSON page: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| AwsError::parse(service, "page is not a JSON object"))?;

        let mut arrays = object.iter().filter(|(_, v)| v.is_array());
        let (field, items) = match (arrays.next(), arrays.next()) {
            (Some(only), None) => only,
            (None, _) => return Err(AwsError::parse(service, "page has no item list")),
            (Some(_), Some(_)) => {
                return Err(AwsError::parse(service, "page has more than one item list"))
            }
        };

        let items: Vec<T> = serde_json::from_value(items.clone()).map_err(|e| {
            AwsError::parse(service, &format!("invalid items in '{}': {}", field, e))
        })?;
        let next_token = object
            .get(token_field)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(Self::new(items, next_token))
    }
}

/// Fetch every page and concatenate the items in page order.
///
/// The first error aborts the walk. A token that repeats the one just sent
/// ends the walk instead of looping forever.
pub async fn drain_pages<T, E, F, Fut>(mut fetch: F) -> Result<Vec<T>, E>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<PaginatedResponse<T>, E>>,
{
    let mut all = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let page = fetch(token.clone()).await?;
        pages += 1;
        all.extend(page.items);

        match page.next_token.filter(|t| !t.is_empty()) {
            Some(next) if token.as_deref() != Some(next.as_str()) => token = Some(next),
            Some(_) => {
                log::warn!("pagination token repeated after {} pages, stopping", pages);
                break;
            }
            None => break,
        }
    }

    log::debug!("drained {} items over {} pages", all.len(), pages);
    Ok(all)
}
