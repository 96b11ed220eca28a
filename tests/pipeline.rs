//! Pipeline Integration Tests
//!
//! End-to-end runs through the polling driver on a filesystem store.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use blogsmith::adapters::ExternalError;
use blogsmith::core::FsArtifactStore;
use blogsmith::domain::{ArtifactKind, ErrorKind, ResultStatus, RunState, StageName};

use common::{at, now, server_error, Harness, BLOG};

fn fs_harness() -> (TempDir, Harness) {
    let temp = TempDir::new().unwrap();
    let h = Harness::with_store(Arc::new(FsArtifactStore::new(temp.path())));
    (temp, h)
}

fn run_files(temp: &TempDir, run: &blogsmith::RunRef) -> BTreeSet<String> {
    std::fs::read_dir(temp.path().join(&run.blog).join(run.run_id.to_string()))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.ends_with(".lock"))
        .collect()
}

#[tokio::test]
async fn test_tick_runs_a_ready_blog_to_completion() {
    let (temp, h) = fs_harness();

    let report = h.orchestrator.tick(now()).await;
    assert_eq!(report.blogs, 1);
    assert_eq!(report.scheduled.len(), 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.errors, 0);

    let run = report.scheduled[0].clone();

    let expected: BTreeSet<String> = ArtifactKind::ALL
        .iter()
        .map(|k| k.file_name().to_string())
        .collect();
    assert_eq!(run_files(&temp, &run), expected);

    let status = h.orchestrator.status(&run).await.unwrap().unwrap();
    assert_eq!(status.state, RunState::Recorded);
    let result = status.result.unwrap();
    assert_eq!(result.status, ResultStatus::Published);
    assert!(result.errors.is_empty());
    assert!(result.metrics.contains_key("word_count"));
    assert_eq!(h.cms.posts().len(), 1);
}

#[tokio::test]
async fn test_second_tick_in_same_slot_does_nothing() {
    let (_temp, h) = fs_harness();

    h.orchestrator.tick(now()).await;
    let calls = h.external_calls();

    let report = h.orchestrator.tick(at("2026-10-16T10:30:00Z")).await;
    assert!(report.scheduled.is_empty());
    assert_eq!(report.advanced, 0);
    assert_eq!(h.external_calls(), calls);
    assert_eq!(h.store.list_runs(BLOG).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_next_slot_starts_a_new_run() {
    let (_temp, h) = fs_harness();

    h.orchestrator.tick(now()).await;
    let report = h.orchestrator.tick(at("2026-10-16T12:00:01Z")).await;

    assert_eq!(report.scheduled.len(), 1);
    let runs = h.orchestrator.list_runs(BLOG).await.unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|(_, state)| *state == RunState::Recorded));
    assert_eq!(h.cms.posts().len(), 2);
}

#[tokio::test]
async fn test_unavailable_research_degrades_but_completes() {
    let (_temp, h) = fs_harness();
    h.research.fail_with(server_error(503));

    let report = h.orchestrator.tick(now()).await;
    let run = report.scheduled[0].clone();

    // Default attempt limit for research
    assert_eq!(h.research.calls(), 3);

    let research: blogsmith::domain::ResearchArtifact =
        blogsmith::core::store::read_document(h.store.as_ref(), &run)
            .await
            .unwrap()
            .unwrap();
    assert!(research.degraded);
    assert!(research.data_points.is_empty());
    assert!(["topic-A", "topic-B"].contains(&research.topic.as_str()));

    let state = h.orchestrator.run_state(&run).await.unwrap().unwrap();
    assert_eq!(state, RunState::Recorded);
}

#[tokio::test]
async fn test_slow_research_times_out_and_degrades() {
    let h = Harness::new();
    h.research.delay_by(Duration::from_secs(2));

    let run = h.scheduled_run().await;
    let report = h.orchestrator.advance(&run).await.unwrap();

    assert!(report.failure.is_none());
    assert_eq!(report.final_state, Some(RunState::Recorded));
    assert_eq!(h.research.calls(), 3);
}

#[tokio::test]
async fn test_generation_quota_halts_run_at_content() {
    let (temp, h) = fs_harness();
    h.generation
        .fail_with(Some(ExternalError::QuotaExceeded("monthly cap".to_string())));

    let report = h.orchestrator.tick(now()).await;
    assert_eq!(report.failed, 1);
    let run = report.scheduled[0].clone();

    let files = run_files(&temp, &run);
    assert!(files.contains("research.json"));
    assert!(!files.contains("content.json"));

    let status = h.orchestrator.status(&run).await.unwrap().unwrap();
    assert_eq!(
        status.state,
        RunState::Failed {
            stage: StageName::Content
        }
    );
    let result = status.result.unwrap();
    assert_eq!(result.status, ResultStatus::Failed);
    assert_eq!(result.failed_stage, Some(StageName::Content));
    assert_eq!(result.errors[0].kind, ErrorKind::PermanentExternal);
    assert!(h.cms.posts().is_empty());
}

#[tokio::test]
async fn test_permanent_failure_waits_for_explicit_advance() {
    let (_temp, h) = fs_harness();
    h.generation
        .fail_with(Some(ExternalError::QuotaExceeded("monthly cap".to_string())));

    let report = h.orchestrator.tick(now()).await;
    let run = report.scheduled[0].clone();
    let calls = h.generation.calls();

    // Polling does not retry a permanent failure
    h.orchestrator.tick(at("2026-10-16T10:00:00Z")).await;
    assert_eq!(h.generation.calls(), calls);

    // Quota restored; an operator resumes the run
    h.generation.fail_with(None);
    let advanced = h.orchestrator.advance(&run).await.unwrap();

    assert!(advanced.failure.is_none());
    assert_eq!(advanced.final_state, Some(RunState::Recorded));

    let result = h.orchestrator.results().current(&run).await.unwrap().unwrap();
    assert_eq!(result.status, ResultStatus::Published);
    // History of the earlier failure is kept
    assert_eq!(result.errors.len(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_resumed_by_next_tick() {
    let (_temp, h) = fs_harness();
    h.cms
        .script_failures(vec![server_error(503), server_error(503), server_error(503)]);

    let first = h.orchestrator.tick(now()).await;
    assert_eq!(first.failed, 1);
    let run = first.scheduled[0].clone();
    assert_eq!(
        h.orchestrator.run_state(&run).await.unwrap(),
        Some(RunState::Failed {
            stage: StageName::Publish
        })
    );

    let second = h.orchestrator.tick(at("2026-10-16T10:00:00Z")).await;
    assert_eq!(second.advanced, 1);
    assert_eq!(
        h.orchestrator.run_state(&run).await.unwrap(),
        Some(RunState::Recorded)
    );
    assert_eq!(h.cms.posts().len(), 1);
}

#[tokio::test]
async fn test_invalid_blog_does_not_block_others() {
    let (_temp, h) = fs_harness();
    let mut broken = common::blog_config("broken", true);
    broken.topics.clear();
    h.blogs.insert(broken);

    let report = h.orchestrator.tick(now()).await;

    assert_eq!(report.blogs, 2);
    assert_eq!(report.errors, 1);
    assert!(h.store.list_runs("broken").await.unwrap().is_empty());
    let healthy = h.orchestrator.list_runs(BLOG).await.unwrap();
    assert_eq!(healthy.len(), 1);
    assert_eq!(healthy[0].1, RunState::Recorded);
}
