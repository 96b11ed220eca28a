//! Main orchestrator for the blog pipeline.
//!
//! Wires the stages to the store and services and drives runs forward:
//! `advance` derives a run's state from its artifacts and invokes the next
//! stage until nothing more can happen; `tick` schedules every blog and
//! advances its pending runs. Stage failures are submitted to the results
//! logger, so the orchestrator doubles as the pipeline's monitor.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use super::scheduler::{ScheduleOutcome, Scheduler, SchedulerError};
use super::store::{present_artifacts, ArtifactStore, FsArtifactStore, StoreError};
use crate::adapters::{
    ChainedSecretStore, DirSecretStore, EnvSecretStore, HttpCmsClient, HttpGenerationService,
    HttpOptimizationService, HttpResearchService, SecretStore,
};
use crate::config::{BlogDirectory, ResolvedConfig};
use crate::domain::{
    ArtifactKey, ArtifactKind, ErrorDetail, ErrorKind, ResultPayload, RunRef, RunResult, RunState,
    StageError, StageName,
};
use crate::stages::{
    ContentStage, PipelineContext, PublishStage, RecordStage, ResearchStage, ResultAck,
    ResultsError, ResultsLogger, Services, Stage, StageOutcome,
};

/// What one `advance` call did
#[derive(Debug, Clone)]
pub struct AdvanceReport {
    pub run: RunRef,
    pub steps: Vec<(StageName, StageOutcome)>,
    pub failure: Option<StageError>,
    /// `None` if the run has no marker
    pub final_state: Option<RunState>,
}

/// Summary of one `tick`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub blogs: usize,
    pub scheduled: Vec<RunRef>,
    pub advanced: usize,
    pub failed: usize,
    pub errors: usize,
}

impl TickReport {
    fn absorb(&mut self, other: TickReport) {
        self.blogs += other.blogs;
        self.scheduled.extend(other.scheduled);
        self.advanced += other.advanced;
        self.failed += other.failed;
        self.errors += other.errors;
    }
}

/// Current state of a run as shown to operators
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub run: String,
    pub state: RunState,
    pub artifacts: Vec<ArtifactKind>,
    pub result: Option<RunResult>,
}

/// Whether a polling tick should re-invoke a run.
///
/// Failed runs are retried on the next tick only when every recorded error
/// for the failing stage was transient; permanent failures wait for an
/// explicit `advance`.
pub fn resumable_on_tick(state: &RunState, result: Option<&RunResult>) -> bool {
    if state.is_finished() {
        return false;
    }
    match state {
        RunState::Failed { stage } => result
            .map(|r| {
                r.errors
                    .iter()
                    .filter(|e| e.stage == *stage)
                    .all(|e| e.kind == ErrorKind::TransientExternal)
            })
            .unwrap_or(true),
        _ => true,
    }
}

/// Main pipeline orchestrator
pub struct Orchestrator {
    ctx: Arc<PipelineContext>,
    scheduler: Scheduler,
    results: ResultsLogger,
    research: ResearchStage,
    content: ContentStage,
    publish: PublishStage,
    record: RecordStage,
}

impl Orchestrator {
    /// Create an orchestrator over an existing context
    pub fn new(ctx: PipelineContext) -> Self {
        let ctx = Arc::new(ctx);
        let results = ResultsLogger::new(Arc::clone(&ctx.store));

        Self {
            scheduler: Scheduler::new(Arc::clone(&ctx.store), Arc::clone(&ctx.blogs)),
            research: ResearchStage::new(Arc::clone(&ctx)),
            content: ContentStage::new(Arc::clone(&ctx)),
            publish: PublishStage::new(Arc::clone(&ctx), results.clone()),
            record: RecordStage::new(Arc::clone(&ctx), results.clone()),
            results,
            ctx,
        }
    }

    /// Production wiring: filesystem store, blog directory, HTTP services
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.store));
        let secrets: Arc<dyn SecretStore> = Arc::new(ChainedSecretStore::new(vec![
            Arc::new(EnvSecretStore::default()),
            Arc::new(DirSecretStore::new(&config.secrets)),
        ]));

        let s = &config.services;
        let services = Services {
            research: Arc::new(HttpResearchService::new(
                &s.research.url,
                Duration::from_secs(s.research.timeout_seconds),
            )),
            generation: Arc::new(HttpGenerationService::new(
                &s.generation.url,
                &s.generation.fast_model,
                &s.generation.quality_model,
                &s.generation.api_key_secret,
                Arc::clone(&secrets),
                Duration::from_secs(s.generation.timeout_seconds),
            )),
            optimization: Arc::new(HttpOptimizationService::new(
                &s.optimization.url,
                Duration::from_secs(s.optimization.timeout_seconds),
            )),
            cms: Arc::new(HttpCmsClient::new(
                &s.cms.url,
                &s.cms.token_secret,
                Arc::clone(&secrets),
                Duration::from_secs(s.cms.timeout_seconds),
            )),
            secrets,
        };

        Self::new(PipelineContext {
            store,
            blogs: Arc::new(BlogDirectory::new(&config.blogs)),
            services,
            settings: config.pipeline.clone(),
        })
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn results(&self) -> &ResultsLogger {
        &self.results
    }

    fn stage(&self, name: StageName) -> Option<&dyn Stage> {
        match name {
            StageName::Schedule => None,
            StageName::Research => Some(&self.research),
            StageName::Content => Some(&self.content),
            StageName::Publish => Some(&self.publish),
            StageName::Results => Some(&self.record),
        }
    }

    /// Invoke one stage for a run, recording a failure in the run's result
    pub async fn run_stage(
        &self,
        run: &RunRef,
        name: StageName,
    ) -> Result<StageOutcome, StageError> {
        let stage = self.stage(name).ok_or_else(|| {
            StageError::config(name, "scheduling is per blog, not per run")
        })?;

        match stage.run(run).await {
            Ok(outcome) => {
                info!(run = %run, stage = %name, outcome = %outcome, "Stage finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(run = %run, stage = %name, kind = %e.kind, error = %e.message, "Stage failed");
                let payload = ResultPayload::failure(name, ErrorDetail::from(&e));
                if let Err(submit_err) = self.results.submit(run, payload).await {
                    warn!(run = %run, error = %submit_err, "Could not record stage failure");
                }
                Err(e)
            }
        }
    }

    async fn inspect(
        &self,
        run: &RunRef,
    ) -> Result<Option<(RunState, Option<RunResult>)>, StoreError> {
        let store = self.ctx.store.as_ref();
        let present = present_artifacts(store, run).await?;
        if !present.contains(&ArtifactKind::Marker) {
            return Ok(None);
        }

        let result = self.results.current(run).await?;
        let state = RunState::derive(
            present.contains(&ArtifactKind::Research),
            present.contains(&ArtifactKind::Content),
            result.as_ref(),
        );
        Ok(Some((state, result)))
    }

    /// Derived state of a run; `None` if the run does not exist
    pub async fn run_state(&self, run: &RunRef) -> Result<Option<RunState>, StoreError> {
        Ok(self.inspect(run).await?.map(|(state, _)| state))
    }

    /// Invoke successive stages until the run stops making progress
    #[instrument(skip(self), fields(run = %run))]
    pub async fn advance(&self, run: &RunRef) -> Result<AdvanceReport, StoreError> {
        let mut report = AdvanceReport {
            run: run.clone(),
            steps: Vec::new(),
            failure: None,
            final_state: None,
        };

        for _ in 0..self.ctx.settings.max_advance_steps {
            let Some(state) = self.run_state(run).await? else {
                warn!("Run has no marker, nothing to advance");
                return Ok(report);
            };
            let Some(next) = state.next_stage() else {
                break;
            };

            match self.run_stage(run, next).await {
                Ok(outcome) => {
                    report.steps.push((next, outcome));
                    if !outcome.made_progress() {
                        break;
                    }
                }
                Err(e) => {
                    report.failure = Some(e);
                    break;
                }
            }
        }

        report.final_state = self.run_state(run).await?;
        Ok(report)
    }

    /// Schedule one blog, then advance its unfinished runs
    async fn tick_blog(&self, blog: &str, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport {
            blogs: 1,
            ..Default::default()
        };

        match self.scheduler.schedule(blog, now).await {
            Ok(ScheduleOutcome::Created(run)) => report.scheduled.push(run),
            Ok(_) => {}
            Err(SchedulerError::Config(e)) => {
                // Misconfiguration blocks new runs, not the ones in flight
                warn!(blog, error = %e, "Blog configuration invalid, not scheduling");
                report.errors += 1;
            }
            Err(e) => {
                error!(blog, error = %e, "Scheduling failed");
                report.errors += 1;
            }
        }

        let runs = match self.ctx.store.list_runs(blog).await {
            Ok(runs) => runs,
            Err(e) => {
                error!(blog, error = %e, "Failed to list runs");
                report.errors += 1;
                return report;
            }
        };

        for run_id in runs {
            let run = RunRef::new(blog, run_id);
            match self.inspect(&run).await {
                Ok(Some((state, result))) if resumable_on_tick(&state, result.as_ref()) => {}
                Ok(_) => continue,
                Err(e) => {
                    error!(run = %run, error = %e, "Failed to read run state");
                    report.errors += 1;
                    continue;
                }
            }

            match self.advance(&run).await {
                Ok(advanced) => {
                    if advanced.failure.is_some() {
                        report.failed += 1;
                    } else if advanced.steps.iter().any(|(_, o)| o.made_progress()) {
                        report.advanced += 1;
                    }
                }
                Err(e) => {
                    error!(run = %run, error = %e, "Advance failed");
                    report.errors += 1;
                }
            }
        }

        report
    }

    /// One polling pass over every configured blog. Blogs are processed
    /// concurrently; an error in one never stops the others.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        let blogs = match self.ctx.blogs.list() {
            Ok(blogs) => blogs,
            Err(e) => {
                error!(error = %e, "Failed to list blogs");
                report.errors += 1;
                return report;
            }
        };

        let mut tasks = JoinSet::new();
        for blog in blogs {
            let this = Arc::clone(self);
            tasks.spawn(async move { this.tick_blog(&blog, now).await });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(blog_report) => report.absorb(blog_report),
                Err(e) => {
                    error!(error = %e, "Blog task panicked");
                    report.errors += 1;
                }
            }
        }

        info!(
            blogs = report.blogs,
            scheduled = report.scheduled.len(),
            advanced = report.advanced,
            failed = report.failed,
            "Tick complete"
        );
        report
    }

    pub async fn submit_result(
        &self,
        run: &RunRef,
        payload: ResultPayload,
    ) -> Result<ResultAck, ResultsError> {
        self.results.submit(run, payload).await
    }

    pub async fn status(&self, run: &RunRef) -> Result<Option<RunStatus>, StoreError> {
        let Some((state, result)) = self.inspect(run).await? else {
            return Ok(None);
        };
        let artifacts = present_artifacts(self.ctx.store.as_ref(), run).await?;

        Ok(Some(RunStatus {
            run: run.to_string(),
            state,
            artifacts,
            result,
        }))
    }

    /// Runs of a blog with their derived state, oldest first
    pub async fn list_runs(&self, blog: &str) -> Result<Vec<(RunRef, RunState)>, StoreError> {
        let mut runs = Vec::new();
        for run_id in self.ctx.store.list_runs(blog).await? {
            let run = RunRef::new(blog, run_id);
            if let Some(state) = self.run_state(&run).await? {
                runs.push((run, state));
            }
        }
        Ok(runs)
    }

    /// True if the marker for `run` exists
    pub async fn run_exists(&self, run: &RunRef) -> Result<bool, StoreError> {
        self.ctx
            .store
            .exists(&ArtifactKey::new(run, ArtifactKind::Marker))
            .await
    }
}
