//! Shared HTTP plumbing for the service adapters.

use std::time::Duration;

use reqwest::{Response, StatusCode};
use tracing::warn;

use super::ExternalError;

/// Longest response body excerpt kept in an error message
const BODY_EXCERPT: usize = 300;

/// Build a client with a request timeout. The retry helper applies its own
/// per-attempt timeout on top of this, so a default client still has a bound.
pub fn client(timeout: Duration) -> reqwest::Client {
    match reqwest::Client::builder().timeout(timeout).build() {
        Ok(client) => client,
        Err(e) => {
            warn!(
                error = %e,
                timeout_ms = timeout.as_millis() as u64,
                "Failed to build HTTP client with timeout, using defaults"
            );
            reqwest::Client::new()
        }
    }
}

/// Map a transport-level failure
pub fn transport_error(err: reqwest::Error) -> ExternalError {
    if err.is_timeout() {
        ExternalError::Transport(format!("request timed out: {}", err))
    } else if err.is_connect() {
        ExternalError::Unavailable(format!("connection failed: {}", err))
    } else {
        ExternalError::Transport(err.to_string())
    }
}

/// Generic status mapping: 401/403, 429, other 4xx, 5xx
pub fn status_error(status: StatusCode, body: &str) -> ExternalError {
    let message = excerpt(body);
    match status.as_u16() {
        401 | 403 => ExternalError::Unauthorized(message),
        429 => ExternalError::RateLimited(message),
        code @ 400..=499 => ExternalError::ClientError {
            status: code,
            message,
        },
        code => ExternalError::ServerError {
            status: code,
            message,
        },
    }
}

/// Return the response if successful, otherwise the mapped error
pub async fn check(response: Response) -> Result<Response, ExternalError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(status_error(status, &body))
}

/// Decode a JSON body, treating a shape mismatch as an invalid response
pub async fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, ExternalError> {
    response
        .json::<T>()
        .await
        .map_err(|e| ExternalError::InvalidResponse(e.to_string()))
}

pub fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= BODY_EXCERPT {
        return trimmed.to_string();
    }
    let mut end = BODY_EXCERPT;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

/// Join a base endpoint and a path without doubling slashes
pub fn join(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
