//! The per-run result record and its merge rules.
//!
//! Unlike other artifacts, `result` is create-or-merge. Merging only ever
//! adds information: statuses move forward by precedence, errors are
//! appended, metrics are merged key-wise and the first publish record wins.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::artifact::{ArtifactDocument, ArtifactKind};
use super::errors::{ErrorKind, StageError};
use super::run::StageName;

/// Overall status of a run's result.
///
/// Declaration order is merge precedence: a merge keeps the greater value,
/// so the outcome does not depend on submission order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    #[default]
    Pending,
    Failed,
    Published,
}

/// Status reported for a single stage (merge keeps the greater value)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Failed,
    Skipped,
    Degraded,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub status: StageStatus,
    pub at: DateTime<Utc>,
}

/// A recorded failure. Never removed once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Remote post created (or found) for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub post_id: String,
    pub url: String,

    /// Create-post attempts used; 0 when an existing post was adopted
    pub attempts: u32,

    /// True when the post was found remotely rather than created
    #[serde(default)]
    pub reused_existing: bool,

    pub published_at: DateTime<Utc>,
}

/// Error detail in a submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<&StageError> for ErrorDetail {
    fn from(err: &StageError) -> Self {
        Self::new(err.kind, err.message.clone())
    }
}

/// A status/metric submission for one run.
///
/// All fields are optional so operators can send partial payloads, e.g.
/// `{"metrics": {"page_views": 120}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub stage: Option<StageName>,

    #[serde(default)]
    pub status: Option<ResultStatus>,

    #[serde(default)]
    pub stage_status: Option<StageStatus>,

    #[serde(default)]
    pub error: Option<ErrorDetail>,

    #[serde(default)]
    pub metrics: Map<String, Value>,

    #[serde(default)]
    pub publish: Option<PublishRecord>,
}

impl ResultPayload {
    pub fn failure(stage: StageName, error: ErrorDetail) -> Self {
        Self {
            stage: Some(stage),
            status: Some(ResultStatus::Failed),
            stage_status: Some(StageStatus::Failed),
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn stage_completed(stage: StageName, status: StageStatus) -> Self {
        Self {
            stage: Some(stage),
            stage_status: Some(status),
            ..Default::default()
        }
    }

    pub fn published(record: PublishRecord) -> Self {
        Self {
            stage: Some(StageName::Publish),
            status: Some(ResultStatus::Published),
            stage_status: Some(StageStatus::Completed),
            publish: Some(record),
            ..Default::default()
        }
    }

    pub fn with_metrics(mut self, metrics: Map<String, Value>) -> Self {
        self.metrics.extend(metrics);
        self
    }
}

/// Merged result document for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub status: ResultStatus,

    /// Latest pipeline stage that reported a failure
    #[serde(default)]
    pub failed_stage: Option<StageName>,

    #[serde(default)]
    pub stages: BTreeMap<StageName, StageRecord>,

    #[serde(default)]
    pub errors: Vec<ErrorRecord>,

    #[serde(default)]
    pub metrics: Map<String, Value>,

    #[serde(default)]
    pub publish: Option<PublishRecord>,

    #[serde(default)]
    pub submissions: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtifactDocument for RunResult {
    const KIND: ArtifactKind = ArtifactKind::Result;
}

impl RunResult {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            status: ResultStatus::Pending,
            failed_stage: None,
            stages: BTreeMap::new(),
            errors: Vec::new(),
            metrics: Map::new(),
            publish: None,
            submissions: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fold a submission into this record without discarding anything
    pub fn merge(&mut self, payload: ResultPayload, at: DateTime<Utc>) {
        self.submissions += 1;
        self.updated_at = self.updated_at.max(at);

        let stage = payload.stage.unwrap_or(StageName::Results);

        if let Some(status) = payload.status {
            self.status = self.status.max(status);
            if status == ResultStatus::Failed {
                self.failed_stage = self.failed_stage.max(Some(stage));
            }
        }

        if let Some(stage_status) = payload.stage_status {
            let keep_existing = self
                .stages
                .get(&stage)
                .map(|existing| existing.status >= stage_status)
                .unwrap_or(false);
            if !keep_existing {
                self.stages.insert(
                    stage,
                    StageRecord {
                        status: stage_status,
                        at,
                    },
                );
            }
        }

        if let Some(error) = payload.error {
            let duplicate = self.errors.iter().any(|e| {
                e.stage == stage && e.kind == error.kind && e.message == error.message
            });
            if !duplicate {
                self.errors.push(ErrorRecord {
                    stage,
                    kind: error.kind,
                    message: error.message,
                    at,
                });
            }
        }

        self.metrics.extend(payload.metrics);

        if self.publish.is_none() {
            self.publish = payload.publish;
        }
    }

    /// True once the results stage has recorded final metrics
    pub fn is_recorded(&self) -> bool {
        self.stages
            .get(&StageName::Results)
            .map(|r| r.status == StageStatus::Completed)
            .unwrap_or(false)
    }

    pub fn has_failure_for(&self, stage: StageName) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}
