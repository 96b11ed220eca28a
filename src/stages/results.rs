//! Results logger and the final "record" stage.
//!
//! The logger owns the `result` artifact. Submissions from stages, the
//! orchestrator or operators are merged under the store's exclusive update,
//! so concurrent and duplicate submissions never lose data.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::{PipelineContext, Stage, StageOutcome};
use crate::core::store::{read_document, ArtifactStore, StoreError};
use crate::domain::{
    ArtifactKey, ArtifactKind, ContentArtifact, ResearchArtifact, ResultPayload, ResultStatus,
    RunRef, RunResult, StageError, StageName, StageStatus,
};

#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Unknown run: {0}")]
    UnknownRun(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Acknowledgement returned to the submitter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultAck {
    pub run: String,
    pub status: ResultStatus,
    pub failed_stage: Option<StageName>,
    pub submissions: u64,
    pub errors: usize,
}

impl ResultAck {
    fn new(run: &RunRef, result: &RunResult) -> Self {
        Self {
            run: run.to_string(),
            status: result.status,
            failed_stage: result.failed_stage,
            submissions: result.submissions,
            errors: result.errors.len(),
        }
    }
}

/// Create-or-merge writer for `result` artifacts
#[derive(Clone)]
pub struct ResultsLogger {
    store: Arc<dyn ArtifactStore>,
}

impl ResultsLogger {
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store }
    }

    /// Merge `payload` into the run's result, creating it if needed
    #[instrument(skip(self, payload), fields(blog = %run.blog, run_id = %run.run_id))]
    pub async fn submit(
        &self,
        run: &RunRef,
        payload: ResultPayload,
    ) -> Result<ResultAck, ResultsError> {
        if !self
            .store
            .exists(&ArtifactKey::new(run, ArtifactKind::Marker))
            .await?
        {
            return Err(ResultsError::UnknownRun(run.to_string()));
        }

        let key = ArtifactKey::new(run, ArtifactKind::Result);
        let key_name = key.to_string();
        let at = Utc::now();

        let bytes = self
            .store
            .update(
                &key,
                Box::new(move |current| {
                    let mut result = match current {
                        // An unreadable record is never replaced: it may hold
                        // error detail nobody has seen yet.
                        Some(bytes) => serde_json::from_slice::<RunResult>(&bytes).map_err(|e| {
                            StoreError::Corrupt {
                                key: key_name.clone(),
                                message: e.to_string(),
                            }
                        })?,
                        None => RunResult::new(at),
                    };
                    result.merge(payload, at);
                    serde_json::to_vec_pretty(&result).map_err(|e| StoreError::Corrupt {
                        key: key_name,
                        message: e.to_string(),
                    })
                }),
            )
            .await?;

        let result: RunResult =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        debug!(
            status = ?result.status,
            submissions = result.submissions,
            "Result merged"
        );
        Ok(ResultAck::new(run, &result))
    }

    /// Current result record, if any
    pub async fn current(&self, run: &RunRef) -> Result<Option<RunResult>, StoreError> {
        read_document(self.store.as_ref(), run).await
    }
}

/// Published -> Recorded: submits the run's final metrics
pub struct RecordStage {
    ctx: Arc<PipelineContext>,
    results: ResultsLogger,
}

impl RecordStage {
    pub fn new(ctx: Arc<PipelineContext>, results: ResultsLogger) -> Self {
        Self { ctx, results }
    }
}

/// Metrics gathered from the run's artifacts
fn run_metrics(
    research: Option<&ResearchArtifact>,
    content: Option<&ContentArtifact>,
    result: &RunResult,
) -> Map<String, Value> {
    let mut metrics = Map::new();

    if let Some(research) = research {
        metrics.insert("topic".to_string(), json!(research.topic));
        metrics.insert("research_degraded".to_string(), json!(research.degraded));
    }
    if let Some(content) = content {
        metrics.insert("word_count".to_string(), json!(content.word_count));
        metrics.insert("optimized".to_string(), json!(content.optimized));
    }
    if let Some(publish) = &result.publish {
        metrics.insert("publish_attempts".to_string(), json!(publish.attempts));
        metrics.insert("post_url".to_string(), json!(publish.url));
    }
    metrics.insert("error_count".to_string(), json!(result.errors.len()));

    metrics
}

#[async_trait]
impl Stage for RecordStage {
    fn name(&self) -> StageName {
        StageName::Results
    }

    #[instrument(skip(self), fields(blog = %run.blog, run_id = %run.run_id))]
    async fn run(&self, run: &RunRef) -> Result<StageOutcome, StageError> {
        let stage = self.name();
        let store = self.ctx.store.as_ref();

        let result = self
            .results
            .current(run)
            .await
            .map_err(|e| StageError::storage(stage, e))?;

        let result = match result {
            Some(result) if result.is_recorded() => {
                info!(reason = "AlreadyDone", "Results already recorded, skipping");
                return Ok(StageOutcome::AlreadyDone);
            }
            Some(result) if result.publish.is_some() => result,
            _ => {
                return Ok(StageOutcome::NotReady {
                    missing: ArtifactKind::Result,
                })
            }
        };

        let research: Option<ResearchArtifact> = read_document(store, run)
            .await
            .map_err(|e| StageError::storage(stage, e))?;
        let content: Option<ContentArtifact> = read_document(store, run)
            .await
            .map_err(|e| StageError::storage(stage, e))?;

        let payload = ResultPayload::stage_completed(stage, StageStatus::Completed)
            .with_metrics(run_metrics(research.as_ref(), content.as_ref(), &result));

        self.results
            .submit(run, payload)
            .await
            .map_err(|e| StageError::storage(stage, e))?;

        info!("Run metrics recorded");
        Ok(StageOutcome::Completed { degraded: false })
    }
}
