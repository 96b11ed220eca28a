//! Adapter interfaces for external systems.
//!
//! Each external collaborator (research, generation, optimization, the
//! content-management endpoint, the secret store) is a trait so stages can
//! be driven by HTTP clients in production and by fakes in tests.

pub mod cms;
pub mod generation;
pub mod http;
pub mod optimization;
pub mod research;
pub mod secrets;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ErrorKind, RankedTopic, Theme};

pub use cms::HttpCmsClient;
pub use generation::HttpGenerationService;
pub use optimization::HttpOptimizationService;
pub use research::HttpResearchService;
pub use secrets::{ChainedSecretStore, DirSecretStore, EnvSecretStore};

/// Failure of an external call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExternalError {
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("Client error {status}: {message}")]
    ClientError { status: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ExternalError {
    /// Classify for retry and fallback purposes
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_)
            | Self::RateLimited(_)
            | Self::ServerError { .. }
            | Self::Timeout(_)
            | Self::Transport(_) => ErrorKind::TransientExternal,
            Self::InvalidRequest(_)
            | Self::QuotaExceeded(_)
            | Self::InvalidResponse(_)
            | Self::Unauthorized(_)
            | Self::ClientError { .. } => ErrorKind::PermanentExternal,
        }
    }
}

/// Generation quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// Cheap model for outlines
    Fast,

    /// Higher-quality model for the final draft
    High,
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fast => f.write_str("fast"),
            Self::High => f.write_str("high"),
        }
    }
}

/// A post to create on the content-management endpoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRequest {
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
}

/// A post as known by the content-management endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePost {
    pub post_id: String,
    pub url: String,
}

/// Trend/research service
#[async_trait]
pub trait ResearchService: Send + Sync {
    /// Rank candidate topics and gather supporting signals
    async fn query(&self, topics: &[String], theme: &Theme) -> Result<Vec<RankedTopic>, ExternalError>;
}

/// Language-model generation service
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, prompt: &str, tier: QualityTier) -> Result<String, ExternalError>;
}

/// SEO optimization service
#[async_trait]
pub trait OptimizationService: Send + Sync {
    async fn optimize(&self, text: &str, keywords: &[String]) -> Result<String, ExternalError>;
}

/// Content-management REST endpoint
#[async_trait]
pub trait ContentManagement: Send + Sync {
    async fn create_post(&self, post: &PostRequest) -> Result<RemotePost, ExternalError>;

    /// Look up an existing post carrying `tag`
    async fn find_post_by_tag(&self, tag: &str) -> Result<Option<RemotePost>, ExternalError>;
}

/// Secret lookup; `Ok(None)` means the secret is not defined
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ExternalError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(
            ExternalError::ServerError {
                status: 503,
                message: String::new()
            }
            .kind(),
            ErrorKind::TransientExternal
        );
        assert_eq!(
            ExternalError::ClientError {
                status: 404,
                message: String::new()
            }
            .kind(),
            ErrorKind::PermanentExternal
        );
        assert_eq!(
            ExternalError::RateLimited(String::new()).kind(),
            ErrorKind::TransientExternal
        );
        assert_eq!(
            ExternalError::QuotaExceeded(String::new()).kind(),
            ErrorKind::PermanentExternal
        );
        assert_eq!(
            ExternalError::Timeout(Duration::from_secs(1)).kind(),
            ErrorKind::TransientExternal
        );
    }
}
