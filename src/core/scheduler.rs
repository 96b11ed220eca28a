//! Run scheduler.
//!
//! Decides whether a blog is due for a new run and creates the run's marker.
//! The "last run" is read from the store on every call. Scheduled runs use a
//! deterministic id per frequency slot, so two schedulers ticking in the same
//! slot race on the same marker key and exactly one of them creates it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use super::store::{ArtifactStore, CreateOutcome, StoreError};
use crate::config::{BlogConfigSource, ConfigError};
use crate::domain::{ArtifactKey, ArtifactKind, BlogConfig, RunId, RunRef};

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pure scheduling decision for one blog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// The blog's `ready` gate is off
    NotReady,

    /// The current slot already has a run
    NotDue { latest: RunId },

    /// A run should start with this id
    Due { run_id: RunId },
}

/// Decide whether a new run is due at `now`.
///
/// Due when there is no run yet or the latest run started before the current
/// slot did.
pub fn decide(config: &BlogConfig, latest: Option<&RunId>, now: DateTime<Utc>) -> ScheduleDecision {
    if !config.ready {
        return ScheduleDecision::NotReady;
    }

    let slot_start = config.frequency.slot_start(now);
    match latest {
        Some(latest) if latest.timestamp() >= slot_start => ScheduleDecision::NotDue {
            latest: latest.clone(),
        },
        _ => ScheduleDecision::Due {
            run_id: RunId::for_slot(&config.id, slot_start),
        },
    }
}

/// What a scheduling attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// Blog not ready; nothing created
    NotReady,

    /// Current slot already covered by this run
    NotDue(RunRef),

    /// Marker created for a new run
    Created(RunRef),

    /// Another scheduler created the same marker first
    AlreadyExists(RunRef),
}

impl ScheduleOutcome {
    pub fn run(&self) -> Option<&RunRef> {
        match self {
            Self::NotReady => None,
            Self::NotDue(run) | Self::Created(run) | Self::AlreadyExists(run) => Some(run),
        }
    }
}

pub struct Scheduler {
    store: Arc<dyn ArtifactStore>,
    blogs: Arc<dyn BlogConfigSource>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ArtifactStore>, blogs: Arc<dyn BlogConfigSource>) -> Self {
        Self { store, blogs }
    }

    /// Start a run for `blog` if one is due at `now`
    #[instrument(skip(self))]
    pub async fn schedule(
        &self,
        blog: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let config = self.blogs.load(blog)?;
        let runs = self.store.list_runs(blog).await?;

        match decide(&config, runs.last(), now) {
            ScheduleDecision::NotReady => {
                debug!("Blog not ready, skipping");
                Ok(ScheduleOutcome::NotReady)
            }
            ScheduleDecision::NotDue { latest } => {
                debug!(latest = %latest, "Current slot already has a run");
                Ok(ScheduleOutcome::NotDue(RunRef::new(blog, latest)))
            }
            ScheduleDecision::Due { run_id } => self.start_run(RunRef::new(blog, run_id)).await,
        }
    }

    /// Start a run now regardless of the frequency slot. The ready gate
    /// still applies.
    #[instrument(skip(self))]
    pub async fn force(
        &self,
        blog: &str,
        now: DateTime<Utc>,
    ) -> Result<ScheduleOutcome, SchedulerError> {
        let config = self.blogs.load(blog)?;
        if !config.ready {
            return Ok(ScheduleOutcome::NotReady);
        }
        self.start_run(RunRef::new(blog, RunId::random(now))).await
    }

    /// Create the marker for `run` if absent
    pub async fn start_run(&self, run: RunRef) -> Result<ScheduleOutcome, SchedulerError> {
        let key = ArtifactKey::new(&run, ArtifactKind::Marker);
        match self.store.create_if_absent(&key, Vec::new()).await? {
            CreateOutcome::Created => {
                info!(run = %run, "Run scheduled");
                Ok(ScheduleOutcome::Created(run))
            }
            CreateOutcome::AlreadyExists => {
                info!(run = %run, reason = "AlreadyDone", "Run already scheduled");
                Ok(ScheduleOutcome::AlreadyExists(run))
            }
        }
    }
}
