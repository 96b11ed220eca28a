//! Language-model generation over an OpenAI-compatible chat completions API.
//!
//! Endpoint: POST {endpoint}/chat/completions
//! Auth: Bearer token read from the secret store on every call

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http;
use super::{ExternalError, GenerationService, QualityTier, SecretStore};

pub struct HttpGenerationService {
    endpoint: String,
    fast_model: String,
    quality_model: String,
    api_key_secret: String,
    secrets: Arc<dyn SecretStore>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpGenerationService {
    pub fn new(
        endpoint: impl Into<String>,
        fast_model: impl Into<String>,
        quality_model: impl Into<String>,
        api_key_secret: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            fast_model: fast_model.into(),
            quality_model: quality_model.into(),
            api_key_secret: api_key_secret.into(),
            secrets,
            client: http::client(timeout),
        }
    }

    fn model_for(&self, tier: QualityTier) -> &str {
        match tier {
            QualityTier::Fast => &self.fast_model,
            QualityTier::High => &self.quality_model,
        }
    }
}

/// Generation-specific status mapping
fn map_error(err: ExternalError) -> ExternalError {
    match err {
        ExternalError::RateLimited(message) if message.to_lowercase().contains("quota") => {
            ExternalError::QuotaExceeded(message)
        }
        ExternalError::RateLimited(message) => ExternalError::Unavailable(message),
        ExternalError::ClientError { message, .. } => ExternalError::InvalidRequest(message),
        ExternalError::ServerError { message, .. } => ExternalError::Unavailable(message),
        other => other,
    }
}

#[async_trait]
impl GenerationService for HttpGenerationService {
    async fn generate(&self, prompt: &str, tier: QualityTier) -> Result<String, ExternalError> {
        let api_key = self
            .secrets
            .get_secret(&self.api_key_secret)
            .await?
            .ok_or_else(|| {
                ExternalError::Unauthorized(format!("secret '{}' is not set", self.api_key_secret))
            })?;

        let request = ChatRequest {
            model: self.model_for(tier),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(http::join(&self.endpoint, "chat/completions"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .map_err(http::transport_error)?;

        let response = http::check(response).await.map_err(map_error)?;
        let body: ChatResponse = http::json(response).await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ExternalError::InvalidResponse("no completion text".to_string()))
    }
}
