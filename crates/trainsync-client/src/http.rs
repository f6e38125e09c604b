//! Shared HTTP plumbing: one `reqwest` client per service and the mapping
//! from transport failures and status codes onto [`SyncError`].

use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, error};
use trainsync_core::{SyncError, SyncResult};

#[derive(Debug, Clone)]
pub(crate) struct HttpService {
    client: Client,
    base_url: String,
}

impl HttpService {
    pub(crate) fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub(crate) fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` joined with percent-encoded path segments.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| SyncError::Config(format!("invalid base URL '{}': {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| SyncError::Config(format!("base URL '{}' cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub(crate) fn get(&self, segments: &[&str]) -> SyncResult<RequestBuilder> {
        Ok(self.client.get(self.endpoint(segments)?))
    }

    pub(crate) fn post(&self, segments: &[&str]) -> SyncResult<RequestBuilder> {
        Ok(self.client.post(self.endpoint(segments)?))
    }

    /// Send and classify. Only 2xx responses come back as `Ok`.
    pub(crate) async fn send(&self, request: RequestBuilder, op: &str) -> SyncResult<Response> {
        let response = request.send().await.map_err(|e| {
            error!(error = %e, base_url = %self.base_url, op, "request failed");
            classify_transport(&e, op, &self.base_url)
        })?;

        let status = response.status();
        if status.is_success() {
            debug!(op, %status, "request succeeded");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!(op, %status, body = %body, "service returned error status");
        Err(classify_status(status, &body))
    }

    pub(crate) async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, op: &str) -> SyncResult<T> {
        let response = self.send(request, op).await?;
        decode_json(response, op).await
    }
}

pub(crate) async fn decode_json<T: DeserializeOwned>(response: Response, op: &str) -> SyncResult<T> {
    let text = response.text().await.map_err(|e| {
        error!(error = %e, op, "failed to read response body");
        SyncError::MalformedResponse(format!("{op}: {e}"))
    })?;
    serde_json::from_str(&text).map_err(|e| {
        error!(error = %e, op, "failed to parse response");
        SyncError::MalformedResponse(format!("{op}: {e}"))
    })
}

pub(crate) fn classify_transport(err: &reqwest::Error, op: &str, base_url: &str) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(format!("{op} did not answer in time"))
    } else if err.is_connect() {
        SyncError::ServiceUnavailable(format!("{base_url} is not reachable ({op})"))
    } else if err.is_decode() {
        SyncError::MalformedResponse(format!("{op}: {err}"))
    } else {
        SyncError::ServiceUnavailable(format!("{op}: {err}"))
    }
}

pub(crate) fn classify_status(status: StatusCode, body: &str) -> SyncError {
    let message = extract_detail(body).unwrap_or_else(|| {
        status.canonical_reason().unwrap_or("unknown error").to_string()
    });
    if status.is_client_error() {
        SyncError::RemoteRejected { status: status.as_u16(), message }
    } else {
        SyncError::RemoteFault { status: status.as_u16(), message }
    }
}

/// The service reports errors as `{"detail": ...}`, sometimes mirrored into
/// `error` and `message`. Validation failures carry a list under `detail`.
pub(crate) fn extract_detail(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) else {
        return Some(trimmed.to_string());
    };
    for field in ["detail", "error", "message"] {
        match value.get(field) {
            Some(serde_json::Value::String(s)) => return Some(s.clone()),
            Some(serde_json::Value::Array(items)) if !items.is_empty() => {
                let parts: Vec<String> = items
                    .iter()
                    .map(|item| {
                        item.get("msg")
                            .and_then(serde_json::Value::as_str)
                            .map_or_else(|| item.to_string(), str::to_string)
                    })
                    .collect();
                return Some(parts.join("; "));
            }
            Some(serde_json::Value::Null) | None => {}
            Some(other) => return Some(other.to_string()),
        }
    }
    Some(trimmed.to_string())
}
