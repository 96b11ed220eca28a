//! HTTP client for the trend/research service.
//!
//! Endpoint: POST {endpoint}/query
//! Body: `{"topics": [...], "theme": "...", "style": {...}}`
//! Response: `{"topics": [{"topic": "...", "score": 0.8, "data_points": [...]}]}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http;
use super::{ExternalError, ResearchService};
use crate::domain::{RankedTopic, Theme};

pub struct HttpResearchService {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    topics: &'a [String],
    theme: &'a str,
    style: &'a std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    topics: Vec<RankedTopic>,
}

impl HttpResearchService {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: http::client(timeout),
        }
    }
}

#[async_trait]
impl ResearchService for HttpResearchService {
    async fn query(&self, topics: &[String], theme: &Theme) -> Result<Vec<RankedTopic>, ExternalError> {
        let request = QueryRequest {
            topics,
            theme: &theme.description,
            style: &theme.style,
        };

        let response = self
            .client
            .post(http::join(&self.endpoint, "query"))
            .json(&request)
            .send()
            .await
            .map_err(http::transport_error)?;

        // The research service only distinguishes "try later" from "slow down"
        let response = http::check(response).await.map_err(|e| match e {
            ExternalError::ServerError { message, .. } => ExternalError::Unavailable(message),
            other => other,
        })?;

        let body: QueryResponse = http::json(response).await?;
        Ok(body.topics)
    }
}
