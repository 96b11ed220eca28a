//! Run identity and the per-run state machine.
//!
//! A Run is one execution of the pipeline for one blog. Its state is never
//! stored; it is derived from which artifacts exist under the run's prefix.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use super::result::RunResult;

/// Timestamp portion of a run id, e.g. `20261016T120000Z`
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Length of the hex suffix that follows the timestamp
const SUFFIX_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid run id '{0}'")]
pub struct RunIdError(pub String);

/// Sortable run identifier: `<UTC timestamp>-<8 hex chars>`.
///
/// Ordering follows the timestamp first, so the lexicographic order of the
/// rendered ids is the chronological order of the runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunId {
    timestamp: DateTime<Utc>,
    suffix: String,
}

impl RunId {
    /// Build a run id from its parts
    pub fn new(timestamp: DateTime<Utc>, suffix: &str) -> Result<Self, RunIdError> {
        let valid = suffix.len() == SUFFIX_LEN
            && suffix
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
        if !valid {
            return Err(RunIdError(format!(
                "{}-{}",
                timestamp.format(TIMESTAMP_FORMAT),
                suffix
            )));
        }

        Ok(Self {
            timestamp: timestamp.trunc_subsecs(0),
            suffix: suffix.to_string(),
        })
    }

    /// Run id with a random suffix (manual runs)
    pub fn random(at: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string()[..SUFFIX_LEN].to_string();
        Self {
            timestamp: at.trunc_subsecs(0),
            suffix,
        }
    }

    /// Deterministic run id for a blog's scheduling slot.
    ///
    /// Every scheduler computing the same slot for the same blog gets the same
    /// key, so concurrent ticks collapse onto a single marker.
    pub fn for_slot(blog: &str, slot_start: DateTime<Utc>) -> Self {
        let slot_start = slot_start.trunc_subsecs(0);
        let mut hasher = Sha256::new();
        hasher.update(blog.as_bytes());
        hasher.update(b"|");
        hasher.update(slot_start.to_rfc3339().as_bytes());
        let digest = hasher.finalize();

        Self {
            timestamp: slot_start,
            suffix: hex::encode(&digest[..SUFFIX_LEN / 2]),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Tag attached to remote posts created for this run
    pub fn post_tag(&self) -> String {
        format!("run-{}", self)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.timestamp.format(TIMESTAMP_FORMAT), self.suffix)
    }
}

impl FromStr for RunId {
    type Err = RunIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ts, suffix) = s.split_once('-').ok_or_else(|| RunIdError(s.to_string()))?;
        let naive = chrono::NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT)
            .map_err(|_| RunIdError(s.to_string()))?;
        Self::new(Utc.from_utc_datetime(&naive), suffix).map_err(|_| RunIdError(s.to_string()))
    }
}

impl TryFrom<String> for RunId {
    type Error = RunIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunId> for String {
    fn from(id: RunId) -> Self {
        id.to_string()
    }
}

/// A run addressed within its blog
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunRef {
    pub blog: String,
    pub run_id: RunId,
}

impl RunRef {
    pub fn new(blog: impl Into<String>, run_id: RunId) -> Self {
        Self {
            blog: blog.into(),
            run_id,
        }
    }
}

impl fmt::Display for RunRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.blog, self.run_id)
    }
}

/// Pipeline stages, in chain order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Schedule,
    Research,
    Content,
    Publish,
    Results,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Research => "research",
            Self::Content => "content",
            Self::Publish => "publish",
            Self::Results => "results",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "research" => Ok(Self::Research),
            "content" => Ok(Self::Content),
            "publish" => Ok(Self::Publish),
            "results" => Ok(Self::Results),
            other => Err(format!("Unknown stage '{}'", other)),
        }
    }
}

/// State of a run, derived from its artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum RunState {
    /// Marker exists, nothing else
    Created,

    /// Research artifact written
    Researched,

    /// Content artifact written
    Drafted,

    /// Remote post recorded in the result
    Published,

    /// Final metrics recorded
    Recorded,

    /// The next stage has a recorded failure and its output is still missing.
    /// Re-invoking that stage resumes the run.
    Failed { stage: StageName },
}

impl RunState {
    /// Derive the state from artifact presence and the current result record
    pub fn derive(has_research: bool, has_content: bool, result: Option<&RunResult>) -> Self {
        let published = result.map(|r| r.publish.is_some()).unwrap_or(false);
        let recorded = result.map(RunResult::is_recorded).unwrap_or(false);

        let progress = if published && recorded {
            Self::Recorded
        } else if published {
            Self::Published
        } else if has_content {
            Self::Drafted
        } else if has_research {
            Self::Researched
        } else {
            Self::Created
        };

        if let (Some(next), Some(result)) = (progress.next_stage(), result) {
            if result.has_failure_for(next) {
                return Self::Failed { stage: next };
            }
        }

        progress
    }

    /// Stage that moves the run forward from this state
    pub fn next_stage(&self) -> Option<StageName> {
        match self {
            Self::Created => Some(StageName::Research),
            Self::Researched => Some(StageName::Content),
            Self::Drafted => Some(StageName::Publish),
            Self::Published => Some(StageName::Results),
            Self::Recorded => None,
            Self::Failed { stage } => Some(*stage),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Recorded)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Researched => f.write_str("researched"),
            Self::Drafted => f.write_str("drafted"),
            Self::Published => f.write_str("published"),
            Self::Recorded => f.write_str("recorded"),
            Self::Failed { stage } => write!(f, "failed({})", stage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::domain::result::{ErrorDetail, ResultPayload};

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_run_id_roundtrip_and_format() {
        let id = RunId::new(at("2026-10-16T12:00:00Z"), "0a1b2c3d").unwrap();
        assert_eq!(id.to_string(), "20261016T120000Z-0a1b2c3d");

        let parsed: RunId = "20261016T120000Z-0a1b2c3d".parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.post_tag(), "run-20261016T120000Z-0a1b2c3d");
    }

    #[test]
    fn test_run_id_rejects_bad_input() {
        assert!("not-a-run".parse::<RunId>().is_err());
        assert!("20261016T120000Z-XYZ".parse::<RunId>().is_err());
        assert!("20261016T120000Z-0a1b2c3d4".parse::<RunId>().is_err());
    }

    #[test]
    fn test_run_ids_sort_chronologically() {
        let early = RunId::random(at("2026-10-16T00:00:00Z"));
        let late = RunId::random(at("2026-10-16T12:00:00Z"));
        assert!(early < late);
        assert!(early.to_string() < late.to_string());
    }

    #[test]
    fn test_slot_id_is_deterministic_per_blog() {
        let slot = at("2026-10-16T12:00:00Z");
        assert_eq!(RunId::for_slot("cooking", slot), RunId::for_slot("cooking", slot));
        assert_ne!(RunId::for_slot("cooking", slot), RunId::for_slot("travel", slot));
    }

    #[test]
    fn test_serde_as_string() {
        let id = RunId::new(at("2026-10-16T12:00:00Z"), "deadbeef").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"20261016T120000Z-deadbeef\"");
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_state_progression() {
        assert_eq!(RunState::derive(false, false, None), RunState::Created);
        assert_eq!(RunState::derive(true, false, None), RunState::Researched);
        assert_eq!(RunState::derive(true, true, None), RunState::Drafted);
        assert_eq!(RunState::Drafted.next_stage(), Some(StageName::Publish));
        assert_eq!(RunState::Recorded.next_stage(), None);
    }

    #[test]
    fn test_failed_state_points_at_missing_stage() {
        let mut result = RunResult::new(Utc::now());
        result.merge(
            ResultPayload::failure(
                StageName::Content,
                ErrorDetail::new(ErrorKind::PermanentExternal, "quota exceeded"),
            ),
            Utc::now(),
        );

        let state = RunState::derive(true, false, Some(&result));
        assert_eq!(state, RunState::Failed { stage: StageName::Content });
        assert_eq!(state.next_stage(), Some(StageName::Content));

        // Once content exists the old failure no longer blocks progress
        let state = RunState::derive(true, true, Some(&result));
        assert_eq!(state, RunState::Drafted);
    }
}
