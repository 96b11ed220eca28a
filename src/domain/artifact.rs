//! Artifacts written under a run's prefix.
//!
//! Every artifact except `result` is created once and never updated. The
//! artifact documents are plain serde structs; the store only sees bytes.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::run::{RunId, RunRef};

/// Named artifacts a run can own
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Empty file that signals the run exists
    Marker,

    /// Selected topic and trend findings
    Research,

    /// Final article body and metadata
    Content,

    /// Topic suggestions for future runs
    Recommendations,

    /// Status, metrics and errors (create-or-merge)
    Result,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 5] = [
        Self::Marker,
        Self::Research,
        Self::Content,
        Self::Recommendations,
        Self::Result,
    ];

    /// File name inside the run directory
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Research => "research.json",
            Self::Content => "content.json",
            Self::Recommendations => "recommendations.json",
            Self::Result => "result.json",
        }
    }

    pub fn from_file_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_name() == name)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Marker => "marker",
            Self::Research => "research",
            Self::Content => "content",
            Self::Recommendations => "recommendations",
            Self::Result => "result",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full address of one artifact
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactKey {
    pub blog: String,
    pub run_id: RunId,
    pub kind: ArtifactKind,
}

impl ArtifactKey {
    pub fn new(run: &RunRef, kind: ArtifactKind) -> Self {
        Self {
            blog: run.blog.clone(),
            run_id: run.run_id.clone(),
            kind,
        }
    }

    /// `<blog>/<run_id>/<file>` relative to the store root
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.blog)
            .join(self.run_id.to_string())
            .join(self.kind.file_name())
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.blog, self.run_id, self.kind.file_name())
    }
}

/// A serde document stored as a specific artifact
pub trait ArtifactDocument: Serialize + DeserializeOwned + Send + Sync {
    const KIND: ArtifactKind;
}

/// One supporting signal for a topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub keyword: String,

    #[serde(default)]
    pub score: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// A topic as ranked by the research service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedTopic {
    pub topic: String,

    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub data_points: Vec<DataPoint>,
}

/// Output of the research stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchArtifact {
    /// Topic the article will be written about
    pub topic: String,

    /// Theme description copied from the blog config at research time
    pub theme: String,

    /// Signals supporting the selected topic
    pub data_points: Vec<DataPoint>,

    /// Other ranked candidates, best first
    #[serde(default)]
    pub related_topics: Vec<RankedTopic>,

    /// True when trend enrichment was unavailable
    #[serde(default)]
    pub degraded: bool,

    pub researched_at: DateTime<Utc>,
}

impl ArtifactDocument for ResearchArtifact {
    const KIND: ArtifactKind = ArtifactKind::Research;
}

impl ResearchArtifact {
    /// Keywords to hand to the optimizer: the topic plus its signal keywords
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords = vec![self.topic.clone()];
        for point in &self.data_points {
            if !keywords.iter().any(|k| k.eq_ignore_ascii_case(&point.keyword)) {
                keywords.push(point.keyword.clone());
            }
        }
        keywords
    }
}

/// Output of the content stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentArtifact {
    pub title: String,

    /// Markdown body
    pub body: String,

    pub topic: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Whether the body is the optimizer's variant or the refined draft
    pub optimized: bool,

    /// SHA256 prefix of the refined draft
    pub draft_fingerprint: String,

    pub word_count: usize,

    pub generated_at: DateTime<Utc>,
}

impl ArtifactDocument for ContentArtifact {
    const KIND: ArtifactKind = ArtifactKind::Content;
}

/// A topic suggested for a future run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendedTopic {
    pub topic: String,
    pub score: f64,
    pub reason: String,
}

/// Topic suggestions derived from research signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub source_topic: String,
    pub topics: Vec<RecommendedTopic>,
    pub generated_at: DateTime<Utc>,
}

impl ArtifactDocument for Recommendations {
    const KIND: ArtifactKind = ArtifactKind::Recommendations;
}

impl Recommendations {
    /// Maximum number of suggestions kept per run
    pub const LIMIT: usize = 5;

    /// Suggest the runner-up topics first, then the strongest signal keywords
    pub fn derive(research: &ResearchArtifact, now: DateTime<Utc>) -> Self {
        let mut topics: Vec<RecommendedTopic> = Vec::new();

        let mut push = |topic: &str, score: f64, reason: String| {
            let seen = topic.eq_ignore_ascii_case(&research.topic)
                || topics.iter().any(|t| t.topic.eq_ignore_ascii_case(topic));
            if !seen && !topic.trim().is_empty() {
                topics.push(RecommendedTopic {
                    topic: topic.to_string(),
                    score,
                    reason,
                });
            }
        };

        for ranked in &research.related_topics {
            push(&ranked.topic, ranked.score, "runner-up in trend ranking".to_string());
        }

        let mut points = research.data_points.clone();
        points.sort_by(|a, b| b.score.total_cmp(&a.score));
        for point in &points {
            push(
                &point.keyword,
                point.score,
                format!("trending signal for '{}'", research.topic),
            );
        }

        topics.truncate(Self::LIMIT);

        Self {
            source_topic: research.topic.clone(),
            topics,
            generated_at: now,
        }
    }
}
