//! Domain types for the blogsmith pipeline.
//!
//! This module contains the core data structures:
//! - Run: identifiers and the derived run state machine
//! - Artifact: artifact kinds, keys and the documents stages exchange
//! - Result: the create-or-merge result record
//! - Blog: per-blog configuration
//! - Errors: the failure taxonomy shared by every stage

pub mod artifact;
pub mod blog;
pub mod errors;
pub mod result;
pub mod run;

// Re-export commonly used types
pub use artifact::{
    ArtifactDocument, ArtifactKey, ArtifactKind, ContentArtifact, DataPoint, RankedTopic,
    RecommendedTopic, Recommendations, ResearchArtifact,
};
pub use blog::{BlogConfig, Frequency, Theme};
pub use errors::{ErrorKind, StageError};
pub use result::{
    ErrorDetail, ErrorRecord, PublishRecord, ResultPayload, ResultStatus, RunResult, StageRecord,
    StageStatus,
};
pub use run::{RunId, RunIdError, RunRef, RunState, StageName};
