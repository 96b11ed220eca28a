//! Artifact-store watcher.
//!
//! Watches the store root and turns newly created artifacts into stage
//! triggers: a `marker` triggers research, `research.json` triggers content
//! and `content.json` triggers publish. The stages re-check existence
//! themselves, so duplicate or spurious events are harmless.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use notify::RecursiveMode;
use notify_debouncer_mini::new_debouncer;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::orchestrator::Orchestrator;
use crate::domain::{ArtifactKind, RunId, RunRef, StageName};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A stage to invoke for a run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Trigger {
    pub run: RunRef,
    pub stage: StageName,
}

/// Map a path under the store root to the stage its creation triggers
pub fn trigger_for_path(root: &Path, path: &Path) -> Option<Trigger> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;

    let [blog, run_id, file] = parts.as_slice() else {
        return None;
    };

    let stage = match ArtifactKind::from_file_name(file)? {
        ArtifactKind::Marker => StageName::Research,
        ArtifactKind::Research => StageName::Content,
        ArtifactKind::Content => StageName::Publish,
        _ => return None,
    };
    let run_id: RunId = run_id.parse().ok()?;

    Some(Trigger {
        run: RunRef::new(*blog, run_id),
        stage,
    })
}

/// Run the triggered stage. A successful publish also records final metrics.
pub async fn dispatch(orchestrator: &Orchestrator, trigger: &Trigger) {
    let outcome = match orchestrator.run_stage(&trigger.run, trigger.stage).await {
        Ok(outcome) => outcome,
        // Already logged and recorded by the orchestrator
        Err(_) => return,
    };

    if trigger.stage == StageName::Publish && outcome.made_progress() {
        let _ = orchestrator
            .run_stage(&trigger.run, StageName::Results)
            .await;
    }
}

/// Watches the artifact store for new artifacts
pub struct StoreWatcher {
    root: PathBuf,
    debounce: Duration,
}

impl StoreWatcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce: Duration::from_secs(2),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching. Triggers arrive on the returned channel until the
    /// handle is stopped.
    pub fn watch(&self) -> Result<(mpsc::Receiver<Trigger>, WatchHandle), WatcherError> {
        std::fs::create_dir_all(&self.root)?;

        let (trigger_tx, trigger_rx) = mpsc::channel::<Trigger>(100);
        let stop = Arc::new(AtomicBool::new(false));

        let root = self.root.clone();
        let debounce = self.debounce;
        let stop_flag = Arc::clone(&stop);

        // notify delivers on a std channel, so the loop lives on a blocking thread
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = run_watcher(&root, debounce, &trigger_tx, &stop_flag) {
                tracing::error!("Watcher error: {}", e);
            }
        });

        Ok((trigger_rx, WatchHandle { stop, task }))
    }
}

/// Handle to control the watcher
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher and wait for its thread to exit
    pub async fn stop(self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Watcher thread ended abnormally");
        }
    }
}

fn run_watcher(
    root: &Path,
    debounce: Duration,
    trigger_tx: &mpsc::Sender<Trigger>,
    stop: &AtomicBool,
) -> Result<(), WatcherError> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer = new_debouncer(debounce, tx)?;
    debouncer.watcher().watch(root, RecursiveMode::Recursive)?;

    info!("Watching {} for new artifacts", root.display());

    while !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(500)) {
            Ok(Ok(events)) => {
                let triggers: BTreeSet<Trigger> = events
                    .iter()
                    .filter(|event| event.path.is_file())
                    .filter_map(|event| trigger_for_path(root, &event.path))
                    .collect();

                for trigger in triggers {
                    debug!(run = %trigger.run, stage = %trigger.stage, "Artifact trigger");
                    if trigger_tx.blocking_send(trigger).is_err() {
                        // Receiver dropped: nobody is listening anymore
                        return Ok(());
                    }
                }
            }
            Ok(Err(e)) => {
                warn!("Watcher error: {:?}", e);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                tracing::error!("Watcher channel disconnected");
                break;
            }
        }
    }

    info!("Watcher stopping...");
    Ok(())
}
