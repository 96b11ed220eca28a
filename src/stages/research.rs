//! Research stage: marker -> research.
//!
//! Ranks the blog's topics with the trend service. When the service stays
//! unavailable the stage still writes a research artifact, marked degraded,
//! with a topic picked from the blog's own list.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use super::{PipelineContext, Stage, StageOutcome};
use crate::core::retry::call_with_policy;
use crate::core::store::{create_document, CreateOutcome};
use crate::domain::{
    ArtifactKey, ArtifactKind, BlogConfig, RankedTopic, ResearchArtifact, RunId, RunRef,
    StageError, StageName,
};

pub struct ResearchStage {
    ctx: Arc<PipelineContext>,
}

impl ResearchStage {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }
}

/// Topic used when no trend data is available.
///
/// Derived from the run suffix so replays of the same run pick the same topic
/// while different runs rotate through the list.
pub fn fallback_topic(topics: &[String], run_id: &RunId) -> Option<String> {
    if topics.is_empty() {
        return None;
    }
    let seed = u64::from_str_radix(run_id.suffix(), 16).unwrap_or(0);
    let index = (seed % topics.len() as u64) as usize;
    Some(topics[index].clone())
}

/// Build the research artifact from ranked topics, best first
fn from_ranking(mut ranked: Vec<RankedTopic>, blog: &BlogConfig) -> Option<ResearchArtifact> {
    ranked.retain(|t| !t.topic.trim().is_empty());
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut ranked = ranked.into_iter();
    let selected = ranked.next()?;

    Some(ResearchArtifact {
        topic: selected.topic,
        theme: blog.theme.description.clone(),
        data_points: selected.data_points,
        related_topics: ranked.collect(),
        degraded: false,
        researched_at: Utc::now(),
    })
}

fn degraded(blog: &BlogConfig, run_id: &RunId) -> Option<ResearchArtifact> {
    Some(ResearchArtifact {
        topic: fallback_topic(&blog.topics, run_id)?,
        theme: blog.theme.description.clone(),
        data_points: Vec::new(),
        related_topics: Vec::new(),
        degraded: true,
        researched_at: Utc::now(),
    })
}

#[async_trait]
impl Stage for ResearchStage {
    fn name(&self) -> StageName {
        StageName::Research
    }

    #[instrument(skip(self), fields(blog = %run.blog, run_id = %run.run_id))]
    async fn run(&self, run: &RunRef) -> Result<StageOutcome, StageError> {
        let stage = self.name();
        let store = self.ctx.store.as_ref();

        if store
            .exists(&ArtifactKey::new(run, ArtifactKind::Research))
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            info!(reason = "AlreadyDone", "Research already exists, skipping");
            return Ok(StageOutcome::AlreadyDone);
        }

        if !store
            .exists(&ArtifactKey::new(run, ArtifactKind::Marker))
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            return Ok(StageOutcome::NotReady {
                missing: ArtifactKind::Marker,
            });
        }

        let blog = self
            .ctx
            .blogs
            .load(&run.blog)
            .map_err(|e| StageError::config(stage, e))?;

        let research = &self.ctx.services.research;
        let query = call_with_policy(&self.ctx.settings.research_retry, "research.query", |_| {
            research.query(&blog.topics, &blog.theme)
        })
        .await;

        let artifact = match query {
            Ok(ranked) => match from_ranking(ranked.value, &blog) {
                Some(artifact) => Some(artifact),
                None => {
                    warn!("Research service returned no topics, using fallback topic");
                    degraded(&blog, &run.run_id)
                }
            },
            Err(failure) => {
                warn!(
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Research unavailable, continuing without trend data"
                );
                degraded(&blog, &run.run_id)
            }
        }
        .ok_or_else(|| StageError::config(stage, "blog has no topics"))?;

        let is_degraded = artifact.degraded;
        match create_document(store, run, &artifact)
            .await
            .map_err(|e| StageError::storage(stage, e))?
        {
            CreateOutcome::Created => {
                info!(topic = %artifact.topic, degraded = is_degraded, "Research written");
                Ok(StageOutcome::Completed {
                    degraded: is_degraded,
                })
            }
            CreateOutcome::AlreadyExists => {
                info!(reason = "AlreadyDone", "Lost research race to another worker");
                Ok(StageOutcome::AlreadyDone)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DataPoint;

    fn blog() -> BlogConfig {
        serde_yaml::from_str("topics: [a, b, c]\ntheme:\n  description: t\nfrequency: { daily: 1 }\n")
            .unwrap()
    }

    fn ranked(topic: &str, score: f64) -> RankedTopic {
        RankedTopic {
            topic: topic.to_string(),
            score,
            data_points: vec![DataPoint {
                keyword: format!("{}-kw", topic),
                score,
                source: None,
            }],
        }
    }

    #[test]
    fn test_highest_score_is_selected() {
        let artifact =
            from_ranking(vec![ranked("b", 0.2), ranked("c", 0.9), ranked("", 1.0)], &blog())
                .unwrap();
        assert_eq!(artifact.topic, "c");
        assert_eq!(artifact.data_points[0].keyword, "c-kw");
        assert_eq!(artifact.related_topics.len(), 1);
        assert!(!artifact.degraded);

        assert!(from_ranking(vec![], &blog()).is_none());
    }

    #[test]
    fn test_fallback_topic_is_stable_per_run() {
        let topics = blog().topics;
        let run_id: RunId = "20261016T120000Z-0000000a".parse().unwrap();

        // 0xa % 3 == 1
        assert_eq!(fallback_topic(&topics, &run_id).as_deref(), Some("b"));
        assert_eq!(
            fallback_topic(&topics, &run_id),
            fallback_topic(&topics, &run_id)
        );
        assert!(fallback_topic(&[], &run_id).is_none());
    }
}
