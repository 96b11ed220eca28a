//! Core orchestration logic.
//!
//! This module contains:
//! - Store: the artifact store trait and its filesystem/in-memory backends
//! - Retry: retry policies and the shared external-call helper
//! - Scheduler: slot-based run scheduling
//! - Orchestrator: stage sequencing and the polling driver
//! - Watcher: the store-change driver

pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use orchestrator::{AdvanceReport, Orchestrator, RunStatus, TickReport};
pub use retry::{call_with_policy, Attempted, CallFailure, RetryPolicy};
pub use scheduler::{decide, ScheduleDecision, ScheduleOutcome, Scheduler, SchedulerError};
pub use store::{
    ArtifactStore, CreateOutcome, FsArtifactStore, MemoryArtifactStore, StoreError,
};
pub use watcher::{StoreWatcher, Trigger, WatchHandle};
