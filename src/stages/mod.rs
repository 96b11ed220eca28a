//! Pipeline stages.
//!
//! Each stage is a stateless handler: given a run, it loads what already
//! exists in the artifact store, does its work and creates its own artifact.
//! Replaying a stage whose output exists is a no-op that makes no external
//! calls.

pub mod content;
pub mod prompts;
pub mod publish;
pub mod research;
pub mod results;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::{
    ContentManagement, GenerationService, OptimizationService, ResearchService, SecretStore,
};
use crate::config::{BlogConfigSource, PipelineSettings};
use crate::core::store::ArtifactStore;
use crate::domain::{ArtifactKind, RunRef, StageError, StageName};

pub use content::ContentStage;
pub use publish::PublishStage;
pub use research::ResearchStage;
pub use results::{RecordStage, ResultAck, ResultsError, ResultsLogger};

/// External collaborators used by the stages
#[derive(Clone)]
pub struct Services {
    pub research: Arc<dyn ResearchService>,
    pub generation: Arc<dyn GenerationService>,
    pub optimization: Arc<dyn OptimizationService>,
    pub cms: Arc<dyn ContentManagement>,
    pub secrets: Arc<dyn SecretStore>,
}

/// Everything a stage needs, shared by all stages and runs
#[derive(Clone)]
pub struct PipelineContext {
    pub store: Arc<dyn ArtifactStore>,
    pub blogs: Arc<dyn BlogConfigSource>,
    pub services: Services,
    pub settings: PipelineSettings,
}

/// What a stage invocation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Output written. `degraded` when a fallback was used.
    Completed { degraded: bool },

    /// Output already existed; nothing was done
    AlreadyDone,

    /// The input artifact is missing
    NotReady { missing: ArtifactKind },
}

impl StageOutcome {
    pub fn made_progress(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::AlreadyDone)
    }
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { degraded: false } => f.write_str("completed"),
            Self::Completed { degraded: true } => f.write_str("completed (degraded)"),
            Self::AlreadyDone => f.write_str("already done"),
            Self::NotReady { missing } => write!(f, "not ready (missing {})", missing),
        }
    }
}

/// A stateless stage handler
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    async fn run(&self, run: &RunRef) -> Result<StageOutcome, StageError>;
}
