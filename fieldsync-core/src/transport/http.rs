//! HTTP transport for the fieldsync server.
//!
//! Each operation is a `POST /operations` with the operation id in the
//! `Idempotency-Key` header. Status codes map onto delivery outcomes:
//!
//! | Status | Outcome |
//! |---|---|
//! | 2xx | applied |
//! | 409 | already applied |
//! | 408, 425, 429, 5xx | retryable |
//! | other 4xx | terminal |
//! | anything else | unclassified |

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use super::{Delivery, ErrorClass, Transport, TransportError};
use crate::operation::{OperationId, OperationKind};

/// Header carrying the operation id.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Default per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct OperationBody<'a> {
    kind: OperationKind,
    resource: &'a str,
    payload: &'a Value,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_timeout(server_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        server_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}

/// Builds an HTTP URL for `path`, converting ws(s) schemes and bare hosts
/// to http(s).
pub(crate) fn build_http_url(server_url: &str, path: &str) -> String {
    let base_url = if let Some(rest) = server_url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = server_url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
        format!("http://{}", server_url)
    } else {
        server_url.to_string()
    };

    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Maps a response status to a delivery outcome.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> Result<Delivery, TransportError> {
    if status.is_success() {
        return Ok(Delivery::Applied);
    }
    if status == StatusCode::CONFLICT {
        return Ok(Delivery::AlreadyApplied);
    }

    let message = if body.trim().is_empty() {
        format!("server returned {}", status)
    } else {
        format!("server returned {}: {}", status, body.trim())
    };

    // 408 Request Timeout, 425 Too Early, 429 Too Many Requests
    let class = match status.as_u16() {
        408 | 425 | 429 => ErrorClass::Retryable,
        500..=599 => ErrorClass::Retryable,
        400..=499 => ErrorClass::Terminal,
        _ => ErrorClass::Unclassified,
    };

    Err(TransportError::new(class, message))
}

/// Maps a request failure to a transport error.
fn classify_request_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::retryable(format!("request timed out: {}", e))
    } else if e.is_connect() || e.is_request() {
        TransportError::retryable(format!("connection failed: {}", e))
    } else {
        TransportError::unclassified(e.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn perform(
        &self,
        idempotency_key: &OperationId,
        kind: OperationKind,
        resource: &str,
        payload: &Value,
    ) -> Result<Delivery, TransportError> {
        let url = build_http_url(&self.server_url, "/operations");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header(IDEMPOTENCY_HEADER, idempotency_key.to_string())
            .json(&OperationBody {
                kind,
                resource,
                payload,
            })
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;

        let status = response.status();
        // A body we fail to read only degrades the error message
        let body = response.text().await.unwrap_or_default();

        classify_status(status, &body)
    }
}
