//! Content-management REST client.
//!
//! Endpoints:
//! - POST {endpoint}/posts  `{"title", "body", "tags", "status": "publish"}` -> `{"id", "url"}`
//! - GET  {endpoint}/posts?tag=<tag>  -> `[{"id", "url"}]`
//!
//! Auth: Bearer token scoped to post creation, read from the secret store on
//! every call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::http;
use super::{ContentManagement, ExternalError, PostRequest, RemotePost, SecretStore};

pub struct HttpCmsClient {
    endpoint: String,
    token_secret: String,
    secrets: Arc<dyn SecretStore>,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreatePostBody<'a> {
    title: &'a str,
    body: &'a str,
    tags: &'a [String],
    status: &'a str,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    #[serde(deserialize_with = "id_as_string")]
    id: String,
    url: String,
}

/// Post ids come back as numbers from some CMSes and strings from others
fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("unexpected post id: {}", other))),
    }
}

impl From<PostResponse> for RemotePost {
    fn from(post: PostResponse) -> Self {
        Self {
            post_id: post.id,
            url: post.url,
        }
    }
}

impl HttpCmsClient {
    pub fn new(
        endpoint: impl Into<String>,
        token_secret: impl Into<String>,
        secrets: Arc<dyn SecretStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_secret: token_secret.into(),
            secrets,
            client: http::client(timeout),
        }
    }

    async fn token(&self) -> Result<String, ExternalError> {
        self.secrets
            .get_secret(&self.token_secret)
            .await?
            .ok_or_else(|| {
                ExternalError::Unauthorized(format!("secret '{}' is not set", self.token_secret))
            })
    }
}

#[async_trait]
impl ContentManagement for HttpCmsClient {
    async fn create_post(&self, post: &PostRequest) -> Result<RemotePost, ExternalError> {
        let token = self.token().await?;

        let response = self
            .client
            .post(http::join(&self.endpoint, "posts"))
            .bearer_auth(token)
            .json(&CreatePostBody {
                title: &post.title,
                body: &post.body,
                tags: &post.tags,
                status: "publish",
            })
            .send()
            .await
            .map_err(http::transport_error)?;

        let response = http::check(response).await?;
        let created: PostResponse = http::json(response).await?;
        Ok(created.into())
    }

    async fn find_post_by_tag(&self, tag: &str) -> Result<Option<RemotePost>, ExternalError> {
        let token = self.token().await?;

        let response = self
            .client
            .get(http::join(&self.endpoint, "posts"))
            .bearer_auth(token)
            .query(&[("tag", tag)])
            .send()
            .await
            .map_err(http::transport_error)?;

        let response = http::check(response).await?;
        let posts: Vec<PostResponse> = http::json(response).await?;
        Ok(posts.into_iter().next().map(RemotePost::from))
    }
}
