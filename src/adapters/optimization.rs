//! HTTP client for the SEO optimization service.
//!
//! Endpoint: POST {endpoint}/optimize
//! Body: `{"text": "...", "keywords": [...]}`
//! Response: `{"optimized_text": "..."}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http;
use super::{ExternalError, OptimizationService};

pub struct HttpOptimizationService {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct OptimizeRequest<'a> {
    text: &'a str,
    keywords: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OptimizeResponse {
    optimized_text: Option<String>,
}

impl HttpOptimizationService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: http::client(timeout),
        }
    }
}

#[async_trait]
impl OptimizationService for HttpOptimizationService {
    async fn optimize(&self, text: &str, keywords: &[String]) -> Result<String, ExternalError> {
        let response = self
            .client
            .post(http::join(&self.endpoint, "optimize"))
            .json(&OptimizeRequest { text, keywords })
            .send()
            .await
            .map_err(http::transport_error)?;

        let response = http::check(response).await.map_err(|e| match e {
            ExternalError::ServerError { message, .. } | ExternalError::RateLimited(message) => {
                ExternalError::Unavailable(message)
            }
            ExternalError::ClientError { message, .. } => ExternalError::InvalidResponse(message),
            other => other,
        })?;

        let body: OptimizeResponse = http::json(response).await?;
        body.optimized_text
            .ok_or_else(|| ExternalError::InvalidResponse("missing optimized_text".to_string()))
    }
}
