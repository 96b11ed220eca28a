//! Results Logger Integration Tests
//!
//! Submissions are merged, never overwritten: order and concurrency must not
//! change the final record.

mod common;

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use blogsmith::core::FsArtifactStore;
use blogsmith::domain::{
    ErrorDetail, ErrorKind, ResultPayload, ResultStatus, RunId, RunRef, RunResult, StageName,
};
use blogsmith::stages::{ResultsError, ResultsLogger};

use common::{now, Harness, BLOG};

fn metrics(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn quota_failure() -> ResultPayload {
    ResultPayload::failure(
        StageName::Content,
        ErrorDetail::new(ErrorKind::PermanentExternal, "quota exceeded"),
    )
}

fn page_views() -> ResultPayload {
    ResultPayload {
        metrics: metrics(json!({"page_views": 120, "source": "analytics"})),
        ..Default::default()
    }
}

type Comparable = (
    ResultStatus,
    Option<StageName>,
    Vec<(StageName, ErrorKind, String)>,
    Map<String, Value>,
    u64,
);

/// Fields that do not depend on submission time
fn comparable(result: &RunResult) -> Comparable {
    let mut errors: Vec<_> = result
        .errors
        .iter()
        .map(|e| (e.stage, e.kind, e.message.clone()))
        .collect();
    errors.sort_by(|a, b| a.2.cmp(&b.2));
    (
        result.status,
        result.failed_stage,
        errors,
        result.metrics.clone(),
        result.submissions,
    )
}

async fn merged(order: [ResultPayload; 2]) -> RunResult {
    let h = Harness::new();
    let run = h.scheduled_run().await;
    for payload in order {
        h.orchestrator.submit_result(&run, payload).await.unwrap();
    }
    h.orchestrator.results().current(&run).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_merge_is_independent_of_order() {
    let ab = merged([quota_failure(), page_views()]).await;
    let ba = merged([page_views(), quota_failure()]).await;

    assert_eq!(comparable(&ab), comparable(&ba));
    assert_eq!(ab.status, ResultStatus::Failed);
    assert_eq!(ab.failed_stage, Some(StageName::Content));
    assert_eq!(ab.metrics.get("page_views"), Some(&json!(120)));
    assert_eq!(ab.errors.len(), 1);
}

#[tokio::test]
async fn test_duplicate_error_is_recorded_once() {
    let h = Harness::new();
    let run = h.scheduled_run().await;

    h.orchestrator.submit_result(&run, quota_failure()).await.unwrap();
    let ack = h.orchestrator.submit_result(&run, quota_failure()).await.unwrap();

    assert_eq!(ack.submissions, 2);
    assert_eq!(ack.errors, 1);
}

#[tokio::test]
async fn test_submission_for_unknown_run_is_rejected() {
    let h = Harness::new();
    let run = RunRef::new(BLOG, RunId::random(now()));

    let err = h
        .orchestrator
        .submit_result(&run, page_views())
        .await
        .unwrap_err();
    assert!(matches!(err, ResultsError::UnknownRun(_)));
}

#[tokio::test]
async fn test_concurrent_submissions_on_fs_store_lose_nothing() {
    let temp = TempDir::new().unwrap();
    let h = Harness::with_store(Arc::new(FsArtifactStore::new(temp.path())));
    let run = h.scheduled_run().await;
    let logger = ResultsLogger::new(Arc::clone(&h.store));

    let mut handles = Vec::new();
    for i in 0..16 {
        let logger = logger.clone();
        let run = run.clone();
        handles.push(tokio::spawn(async move {
            let mut payload = ResultPayload::default();
            payload.metrics.insert(format!("worker_{}", i), json!(i));
            if i % 4 == 0 {
                payload.stage = Some(StageName::Publish);
                payload.status = Some(ResultStatus::Failed);
                payload.error = Some(ErrorDetail::new(
                    ErrorKind::TransientExternal,
                    format!("attempt {} timed out", i),
                ));
            }
            logger.submit(&run, payload).await.unwrap()
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let result = logger.current(&run).await.unwrap().unwrap();
    assert_eq!(result.submissions, 16);
    assert_eq!(result.metrics.len(), 16);
    assert_eq!(result.errors.len(), 4);
    assert_eq!(result.status, ResultStatus::Failed);
}

#[tokio::test]
async fn test_corrupt_result_is_never_overwritten() {
    let temp = TempDir::new().unwrap();
    let h = Harness::with_store(Arc::new(FsArtifactStore::new(temp.path())));
    let run = h.scheduled_run().await;

    let path = temp
        .path()
        .join(&run.blog)
        .join(run.run_id.to_string())
        .join("result.json");
    std::fs::write(&path, b"{ not json").unwrap();

    let err = h
        .orchestrator
        .submit_result(&run, page_views())
        .await
        .unwrap_err();
    assert!(matches!(err, ResultsError::Store(_)));
    assert_eq!(std::fs::read(&path).unwrap(), b"{ not json");
}
