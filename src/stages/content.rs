//! Content stage: research -> content + recommendations.
//!
//! Two generation passes (fast outline, high-quality refinement), then an
//! optimization pass whose output is only used if it looks like a real
//! article. Any optimization failure falls back to the refined draft.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use super::prompts;
use super::{PipelineContext, Stage, StageOutcome};
use crate::adapters::QualityTier;
use crate::core::retry::{call_with_policy, CallFailure};
use crate::core::store::{create_document, read_document, CreateOutcome};
use crate::domain::{
    ArtifactKey, ArtifactKind, ContentArtifact, ErrorKind, Recommendations, ResearchArtifact,
    RunRef, StageError, StageName,
};

pub struct ContentStage {
    ctx: Arc<PipelineContext>,
}

impl ContentStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    fn generation_error(failure: CallFailure, pass: &str) -> StageError {
        StageError::new(
            StageName::Content,
            failure.kind(),
            format!("{} generation failed: {}", pass, failure),
        )
    }

    /// Ask the optimizer for a variant; `None` means keep the draft
    async fn optimize(&self, draft: &str, keywords: &[String]) -> Option<String> {
        let optimization = &self.ctx.services.optimization;
        let result = call_with_policy(
            &self.ctx.settings.optimization_retry,
            "optimization.optimize",
            |_| optimization.optimize(draft, keywords),
        )
        .await;

        match result {
            Ok(optimized) => {
                let text = optimized.value.trim().to_string();
                if self.accepts(draft, &text) {
                    Some(text)
                } else {
                    warn!(
                        draft_chars = draft.chars().count(),
                        optimized_chars = text.chars().count(),
                        "Optimized text rejected, keeping draft"
                    );
                    None
                }
            }
            Err(failure) => {
                warn!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Optimization failed, keeping draft"
                );
                None
            }
        }
    }

    /// Optimized text must be non-empty and not much shorter than the draft
    fn accepts(&self, draft: &str, optimized: &str) -> bool {
        let settings = &self.ctx.settings;
        let draft_chars = draft.chars().count();
        let chars = optimized.chars().count();

        chars > 0
            && chars >= settings.min_optimized_chars.min(draft_chars)
            && chars as f64 >= draft_chars as f64 * settings.min_optimized_ratio
    }
}

#[async_trait]
impl Stage for ContentStage {
    fn name(&self) -> StageName {
        StageName::Content
    }

    #[instrument(skip(self), fields(blog = %run.blog, run_id = %run.run_id))]
    async fn run(&self, run: &RunRef) -> Result<StageOutcome, StageError> {
        let stage = self.name();
        let store = self.ctx.store.as_ref();

        if store
            .exists(&ArtifactKey::new(run, ArtifactKind::Content))
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            info!(reason = "AlreadyDone", "Content already exists, skipping");
            return Ok(StageOutcome::AlreadyDone);
        }

        let research: ResearchArtifact = match read_document(store, run)
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            Some(research) => research,
            None => {
                return Ok(StageOutcome::NotReady {
                    missing: ArtifactKind::Research,
                })
            }
        };

        let blog = self
            .ctx
            .blogs
            .load(&run.blog)
            .map_err(|e| StageError::config(stage, e))?;

        let generation = &self.ctx.services.generation;
        let policy = &self.ctx.settings.generation_retry;

        let outline_prompt = prompts::outline_prompt(&research, &blog);
        let outline = call_with_policy(policy, "generation.outline", |_| {
            generation.generate(&outline_prompt, QualityTier::Fast)
        })
        .await
        .map_err(|f| Self::generation_error(f, "outline"))?;
        debug!(attempts = outline.attempts, "Outline generated");

        let refine_prompt = prompts::refine_prompt(&outline.value, &research, &blog);
        let draft = call_with_policy(policy, "generation.refine", |_| {
            generation.generate(&refine_prompt, QualityTier::High)
        })
        .await
        .map_err(|f| Self::generation_error(f, "refine"))?;

        let (title, draft_body) = prompts::split_title(&draft.value, &research.topic);
        if draft_body.trim().is_empty() {
            return Err(StageError::new(
                stage,
                ErrorKind::PermanentExternal,
                "generation returned an empty draft",
            ));
        }

        let keywords = research.keywords();
        let optimized = self.optimize(&draft_body, &keywords).await;
        let is_optimized = optimized.is_some();
        let body = optimized.unwrap_or_else(|| draft_body.clone());

        let now = Utc::now();
        let content = ContentArtifact {
            title,
            word_count: prompts::word_count(&body),
            body,
            topic: research.topic.clone(),
            keywords,
            optimized: is_optimized,
            draft_fingerprint: prompts::fingerprint(&draft_body),
            generated_at: now,
        };

        // Recommendations go first: once content exists the stage is never
        // re-run, so anything written after it could be lost to a crash.
        let recommendations = Recommendations::derive(&research, now);
        create_document(store, run, &recommendations)
            .await
            .map_err(|e| StageError::storage(stage, e))?;

        match create_document(store, run, &content)
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            CreateOutcome::Created => {
                info!(
                    title = %content.title,
                    words = content.word_count,
                    optimized = is_optimized,
                    "Content written"
                );
                Ok(StageOutcome::Completed {
                    degraded: !is_optimized,
                })
            }
            CreateOutcome::AlreadyExists => {
                info!(reason = "AlreadyDone", "Lost content race to another worker");
                Ok(StageOutcome::AlreadyDone)
            }
        }
    }
}
