//! Publish stage: content -> remote post + publish record.
//!
//! Duplicate-post protection checks the local result record first (no
//! external call), then asks the CMS for a post tagged with the run id. The
//! create-post call is retried on server-side failures only; client errors,
//! 429 included, are terminal and recorded in the result. Before each retry
//! the tag lookup runs again, since a failed create may still have stored
//! the post.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::results::ResultsLogger;
use super::{PipelineContext, Stage, StageOutcome};
use crate::adapters::{ExternalError, PostRequest};
use crate::core::retry::{call_with_policy, CallFailure};
use crate::core::store::read_document;
use crate::domain::{
    ArtifactKind, ContentArtifact, ErrorDetail, PublishRecord, ResultPayload, RunRef, StageError,
    StageName,
};

pub struct PublishStage {
    ctx: Arc<PipelineContext>,
    results: ResultsLogger,
}

impl PublishStage {
    pub fn new(ctx: Arc<PipelineContext>, results: ResultsLogger) -> Self {
        Self { ctx, results }
    }

    /// Record a terminal failure, then hand it back to the caller
    async fn fail(&self, run: &RunRef, error: StageError) -> StageError {
        let payload = ResultPayload::failure(error.stage, ErrorDetail::from(&error));
        if let Err(e) = self.results.submit(run, payload).await {
            warn!(error = %e, "Failed to record publish failure");
        }
        error
    }

    fn external_error(failure: CallFailure, action: &str) -> StageError {
        StageError::new(
            StageName::Publish,
            failure.kind(),
            format!("{}: {}", action, failure),
        )
    }

    async fn record(&self, run: &RunRef, record: PublishRecord) -> Result<(), StageError> {
        self.results
            .submit(run, ResultPayload::published(record))
            .await
            .map(|_| ())
            .map_err(|e| StageError::storage(StageName::Publish, e))
    }

    /// Body plus the boilerplate snippet, if one is configured and set
    async fn body_with_boilerplate(&self, body: &str) -> Result<String, StageError> {
        let Some(name) = self.ctx.settings.boilerplate_secret.as_deref() else {
            return Ok(body.to_string());
        };

        let secrets = &self.ctx.services.secrets;
        let snippet = call_with_policy(&self.ctx.settings.secret_retry, "secrets.get", |_| {
            secrets.get_secret(name)
        })
        .await
        .map_err(|f| Self::external_error(f, "boilerplate lookup failed"))?;

        match snippet.value {
            Some(snippet) if !snippet.trim().is_empty() => {
                Ok(format!("{}\n\n{}", body.trim_end(), snippet.trim()))
            }
            _ => {
                warn!(secret = name, "Boilerplate secret not set, publishing without it");
                Ok(body.to_string())
            }
        }
    }
}

/// Every 4xx from the CMS is terminal. Rate limiting is the one client
/// error the adapters classify as transient, so it is reclassified here.
fn terminal_client_error(error: ExternalError) -> ExternalError {
    match error {
        ExternalError::RateLimited(message) => ExternalError::ClientError {
            status: 429,
            message,
        },
        other => other,
    }
}

fn post_tags(run: &RunRef, content: &ContentArtifact) -> Vec<String> {
    let mut tags = vec![run.run_id.post_tag(), content.topic.clone()];
    tags.dedup();
    tags
}

#[async_trait]
impl Stage for PublishStage {
    fn name(&self) -> StageName {
        StageName::Publish
    }

    #[instrument(skip(self), fields(blog = %run.blog, run_id = %run.run_id))]
    async fn run(&self, run: &RunRef) -> Result<StageOutcome, StageError> {
        let stage = self.name();
        let store = self.ctx.store.as_ref();

        let content: ContentArtifact = match read_document(store, run)
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            Some(content) => content,
            None => {
                return Ok(StageOutcome::NotReady {
                    missing: ArtifactKind::Content,
                })
            }
        };

        let current = self
            .results
            .current(run)
            .await
            .map_err(|e| StageError::storage(stage, e))?;
        if let Some(publish) = current.as_ref().and_then(|r| r.publish.as_ref()) {
            info!(
                reason = "AlreadyDone",
                post_id = %publish.post_id,
                "Publish record exists, skipping"
            );
            return Ok(StageOutcome::AlreadyDone);
        }

        let cms = &self.ctx.services.cms;
        let policy = &self.ctx.settings.publish_retry;
        let tag = run.run_id.post_tag();

        let existing = match call_with_policy(policy, "cms.find_post", |_| {
            let tag = &tag;
            async move { cms.find_post_by_tag(tag).await.map_err(terminal_client_error) }
        })
        .await
        {
            Ok(found) => found.value,
            Err(failure) => {
                let error = Self::external_error(failure, "duplicate check failed");
                return Err(self.fail(run, error).await);
            }
        };

        if let Some(post) = existing {
            info!(
                reason = "AlreadyDone",
                post_id = %post.post_id,
                "Post for this run already exists remotely, recording it"
            );
            self.record(
                run,
                PublishRecord {
                    post_id: post.post_id,
                    url: post.url,
                    attempts: 0,
                    reused_existing: true,
                    published_at: Utc::now(),
                },
            )
            .await?;
            return Ok(StageOutcome::AlreadyDone);
        }

        let body = match self.body_with_boilerplate(&content.body).await {
            Ok(body) => body,
            Err(error) => return Err(self.fail(run, error).await),
        };

        let request = PostRequest {
            title: content.title.clone(),
            body,
            tags: post_tags(run, &content),
        };

        let created = match call_with_policy(policy, "cms.create_post", |attempt| {
            let request = &request;
            let tag = &tag;
            async move {
                if attempt > 1 {
                    if let Some(post) = cms
                        .find_post_by_tag(tag)
                        .await
                        .map_err(terminal_client_error)?
                    {
                        warn!(
                            post_id = %post.post_id,
                            "Earlier create attempt stored the post, adopting it"
                        );
                        return Ok((post, true));
                    }
                }
                cms.create_post(request)
                    .await
                    .map(|post| (post, false))
                    .map_err(terminal_client_error)
            }
        })
        .await
        {
            Ok(created) => created,
            Err(failure) => {
                let error = Self::external_error(failure, "create post failed");
                return Err(self.fail(run, error).await);
            }
        };
        let attempts = created.attempts;
        let (post, adopted) = created.value;

        info!(
            post_id = %post.post_id,
            url = %post.url,
            attempts,
            adopted,
            "Post published"
        );

        self.record(
            run,
            PublishRecord {
                post_id: post.post_id,
                url: post.url,
                attempts,
                reused_existing: adopted,
                published_at: Utc::now(),
            },
        )
        .await?;

        Ok(StageOutcome::Completed { degraded: false })
    }
}
