//! HTTP plumbing shared by the adapters
//!
//! Maps transport failures and non-success responses onto [`PublishError`]:
//! 401 means expired credentials, 429 a rate limit (with its `Retry-After`),
//! 5xx and transport failures are network errors, any other 4xx is a rejection.

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use postflow_core::PublishError;

const HTTP_TIMEOUT_SECS: u64 = 60;
const MAX_DIAGNOSTIC_CHARS: usize = 2000;

pub fn build_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .user_agent(concat!("postflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")
}

pub fn network_error(context: &str, e: reqwest::Error) -> PublishError {
    PublishError::NetworkError(format!("{}: {}", context, e))
}

/// `Retry-After` in delta-seconds form.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Response body as JSON when it parses, as a bounded string otherwise.
pub fn diagnostic(body: &str) -> serde_json::Value {
    serde_json::from_str(body).unwrap_or_else(|_| {
        serde_json::Value::String(body.chars().take(MAX_DIAGNOSTIC_CHARS).collect())
    })
}

pub fn classify_status(
    context: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
) -> PublishError {
    match status {
        StatusCode::UNAUTHORIZED => {
            PublishError::AuthExpired(format!("{}: {} {}", context, status, body.trim()))
        }
        StatusCode::TOO_MANY_REQUESTS => PublishError::RateLimited {
            retry_after: retry_after(headers),
            message: format!("{}: {}", context, status),
        },
        s if s.is_server_error() => {
            PublishError::NetworkError(format!("{}: {} {}", context, status, body.trim()))
        }
        _ => PublishError::rejected(Some(status.as_u16()), diagnostic(body)),
    }
}

/// Pass successful responses through; turn the rest into a classified error.
pub async fn check_response(context: &str, response: Response) -> Result<Response, PublishError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let headers = response.headers().clone();
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(
        context = context,
        status = %status,
        "Platform returned an error response"
    );
    Err(classify_status(context, status, &headers, &body))
}

/// Decode a successful response. An undecodable body is a rejection, not a
/// transient failure: the platform may already have acted on the request.
pub async fn read_json<T: DeserializeOwned>(
    context: &str,
    response: Response,
) -> Result<T, PublishError> {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .map_err(|e| network_error(context, e))?;
    serde_json::from_str(&body).map_err(|e| {
        PublishError::rejected(
            Some(status),
            serde_json::json!({
                "error": format!("{}: unexpected response: {}", context, e),
                "body": diagnostic(&body),
            }),
        )
    })
}
