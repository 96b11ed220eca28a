//! blogsmith - idempotent pipeline for recurring blog articles
//!
//! Each blog produces a sequence of runs. A run moves through independent
//! stages (research, content, publish, results) that communicate only
//! through an artifact store.
//!
//! # Architecture
//!
//! The artifact store is both the queue between stages and the durable log:
//! - Every artifact is created at most once (create-if-absent)
//! - A run's state is derived from which artifacts exist
//! - Any stage can be replayed safely; it skips when its output exists
//!
//! # Modules
//!
//! - `adapters`: External services (research, generation, optimization, CMS, secrets)
//! - `core`: Artifact store, retry helper, scheduler, orchestrator, watcher
//! - `domain`: Data structures (RunId, artifacts, result record, blog config)
//! - `stages`: The stage handlers and the results logger
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Schedule due runs and advance pending ones (run from cron)
//! blogsmith tick
//!
//! # Check run status
//! blogsmith status cooking 20261016T120000Z-1a2b3c4d
//!
//! # Resume a failed run
//! blogsmith advance cooking 20261016T120000Z-1a2b3c4d
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod stages;

// Re-export main types at crate root for convenience
pub use core::{ArtifactStore, FsArtifactStore, MemoryArtifactStore, Orchestrator};
pub use domain::{BlogConfig, ResultPayload, RunId, RunRef, RunResult, RunState, StageName};
pub use stages::{PipelineContext, ResultsLogger, Services, Stage, StageOutcome};
