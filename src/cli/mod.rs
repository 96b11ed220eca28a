//! Command-line interface for blogsmith.
//!
//! Provides commands for the polling and watch drivers, invoking single
//! stages, submitting results and inspecting runs.

use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::time::Interval;

use crate::config;
use crate::core::watcher::{self, StoreWatcher};
use crate::core::{Orchestrator, ScheduleOutcome};
use crate::domain::{ResultPayload, RunId, RunRef, StageName};

/// blogsmith - idempotent blog article pipeline
#[derive(Parser, Debug)]
#[command(name = "blogsmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Schedule every blog, then advance every pending run
    Tick,

    /// Start a run for a blog if one is due
    Schedule {
        /// Blog id (directory name under the blogs directory)
        blog: String,

        /// Start a run now even if the current slot already has one
        #[arg(short, long)]
        force: bool,
    },

    /// Run the research stage for a run
    Research { blog: String, run_id: String },

    /// Run the content stage for a run
    Content { blog: String, run_id: String },

    /// Run the publish stage for a run
    Publish { blog: String, run_id: String },

    /// Invoke successive stages until the run stops making progress
    Advance { blog: String, run_id: String },

    /// Merge a status/metrics payload into a run's result
    SubmitResult {
        blog: String,
        run_id: String,

        /// JSON payload, or "-" to read it from stdin
        #[arg(long)]
        json: String,
    },

    /// Show the state of a run
    Status {
        blog: String,
        run_id: String,

        /// Print the full status as JSON
        #[arg(long)]
        json: bool,
    },

    /// List runs of a blog
    Runs {
        blog: String,

        /// Maximum number of runs to show (most recent first)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Watch the artifact store and trigger stages as artifacts appear
    Watch {
        /// Also run a polling tick every N seconds
        #[arg(long)]
        tick_interval: Option<u64>,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Tick => tick().await,
            Commands::Schedule { blog, force } => schedule(&blog, force).await,
            Commands::Research { blog, run_id } => {
                run_stage(&blog, &run_id, StageName::Research).await
            }
            Commands::Content { blog, run_id } => {
                run_stage(&blog, &run_id, StageName::Content).await
            }
            Commands::Publish { blog, run_id } => {
                run_stage(&blog, &run_id, StageName::Publish).await
            }
            Commands::Advance { blog, run_id } => advance(&blog, &run_id).await,
            Commands::SubmitResult { blog, run_id, json } => {
                submit_result(&blog, &run_id, &json).await
            }
            Commands::Status { blog, run_id, json } => show_status(&blog, &run_id, json).await,
            Commands::Runs { blog, limit } => list_runs(&blog, limit).await,
            Commands::Watch { tick_interval } => watch(tick_interval).await,
            Commands::Config => show_config(),
        }
    }
}

fn orchestrator() -> Result<Arc<Orchestrator>> {
    let cfg = config::config()?;
    Ok(Arc::new(Orchestrator::from_config(cfg)))
}

fn run_ref(blog: &str, run_id: &str) -> Result<RunRef> {
    let run_id: RunId = run_id
        .parse()
        .with_context(|| format!("Invalid run ID: {}", run_id))?;
    Ok(RunRef::new(blog, run_id))
}

async fn require_run(orchestrator: &Orchestrator, run: &RunRef) -> Result<()> {
    if !orchestrator.run_exists(run).await? {
        anyhow::bail!("Run not found: {}", run);
    }
    Ok(())
}

async fn tick() -> Result<()> {
    let report = orchestrator()?.tick(Utc::now()).await;

    for run in &report.scheduled {
        println!("scheduled {}", run);
    }
    println!(
        "blogs: {}  scheduled: {}  advanced: {}  failed: {}  errors: {}",
        report.blogs,
        report.scheduled.len(),
        report.advanced,
        report.failed,
        report.errors
    );
    Ok(())
}

async fn schedule(blog: &str, force: bool) -> Result<()> {
    let orchestrator = orchestrator()?;
    let now = Utc::now();

    let scheduled = if force {
        orchestrator.scheduler().force(blog, now).await
    } else {
        orchestrator.scheduler().schedule(blog, now).await
    };
    let outcome = scheduled.with_context(|| format!("Failed to schedule blog '{}'", blog))?;

    match outcome {
        ScheduleOutcome::NotReady => println!("{}: not ready, nothing scheduled", blog),
        ScheduleOutcome::NotDue(run) => println!("{}: not due (latest run {})", blog, run.run_id),
        ScheduleOutcome::Created(run) => println!("{}", run.run_id),
        ScheduleOutcome::AlreadyExists(run) => {
            println!("{} (already scheduled)", run.run_id)
        }
    }
    Ok(())
}

async fn run_stage(blog: &str, run_id: &str, stage: StageName) -> Result<()> {
    let orchestrator = orchestrator()?;
    let run = run_ref(blog, run_id)?;
    require_run(&orchestrator, &run).await?;

    let outcome = orchestrator.run_stage(&run, stage).await?;
    println!("{} {}: {}", run, stage, outcome);
    Ok(())
}

async fn advance(blog: &str, run_id: &str) -> Result<()> {
    let orchestrator = orchestrator()?;
    let run = run_ref(blog, run_id)?;
    require_run(&orchestrator, &run).await?;

    let report = orchestrator.advance(&run).await?;

    for (stage, outcome) in &report.steps {
        println!("  {}: {}", stage, outcome);
    }
    if let Some(state) = report.final_state {
        println!("{}: {}", run, state);
    }
    if let Some(failure) = report.failure {
        anyhow::bail!("{}", failure);
    }
    Ok(())
}

async fn submit_result(blog: &str, run_id: &str, json: &str) -> Result<()> {
    let orchestrator = orchestrator()?;
    let run = run_ref(blog, run_id)?;

    let raw = if json == "-" {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        json.to_string()
    };

    let payload: ResultPayload =
        serde_json::from_str(&raw).context("Invalid result payload")?;
    let ack = orchestrator.submit_result(&run, payload).await?;

    println!("{}", serde_json::to_string_pretty(&ack)?);
    Ok(())
}

async fn show_status(blog: &str, run_id: &str, as_json: bool) -> Result<()> {
    let orchestrator = orchestrator()?;
    let run = run_ref(blog, run_id)?;

    let status = orchestrator
        .status(&run)
        .await?
        .with_context(|| format!("Run not found: {}", run))?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Run: {}", status.run);
    println!("State: {}", status.state);
    println!(
        "Artifacts: {}",
        status
            .artifacts
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Some(result) = &status.result {
        println!("Result: {:?}", result.status);
        if let Some(publish) = &result.publish {
            println!("Post: {} ({})", publish.url, publish.post_id);
        }
        if !result.errors.is_empty() {
            println!("\nErrors:");
            for e in &result.errors {
                println!(
                    "  [{}] {} {}: {}",
                    e.at.format("%Y-%m-%d %H:%M:%S"),
                    e.stage,
                    e.kind,
                    e.message
                );
            }
        }
    }

    Ok(())
}

async fn list_runs(blog: &str, limit: usize) -> Result<()> {
    let orchestrator = orchestrator()?;
    let runs = orchestrator.list_runs(blog).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<28} {:<20}", "RUN ID", "STATE");
    println!("{}", "-".repeat(48));

    for (run, state) in runs.iter().rev().take(limit) {
        println!("{:<28} {:<20}", run.run_id, state.to_string());
    }

    Ok(())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn watch(tick_interval: Option<u64>) -> Result<()> {
    let cfg = config::config()?;
    let orchestrator = Arc::new(Orchestrator::from_config(cfg));

    let (mut triggers, handle) = StoreWatcher::new(&cfg.store)
        .watch()
        .context("Failed to start store watcher")?;

    let mut ticker = tick_interval.map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));

    eprintln!("Watching {} (Ctrl-C to stop)", cfg.store.display());

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(trigger) = triggers.recv() => {
                let orchestrator = Arc::clone(&orchestrator);
                tokio::spawn(async move {
                    watcher::dispatch(&orchestrator, &trigger).await;
                });
            }
            _ = next_tick(&mut ticker) => {
                orchestrator.tick(Utc::now()).await;
            }
            _ = &mut shutdown => break,
        }
    }

    handle.stop().await;
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("blogsmith configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Blogs:    {}", cfg.blogs.display());
    println!("  Store:    {}", cfg.store.display());
    println!("  Secrets:  {}", cfg.secrets.display());
    println!();
    println!("Services:");
    println!("  Research:      {}", cfg.services.research.url);
    println!(
        "  Generation:    {} ({} / {})",
        cfg.services.generation.url,
        cfg.services.generation.fast_model,
        cfg.services.generation.quality_model
    );
    println!("  Optimization:  {}", cfg.services.optimization.url);
    println!("  CMS:           {}", cfg.services.cms.url);
    println!();
    println!("Pipeline:");
    println!("{}", serde_yaml::to_string(&cfg.pipeline)?);

    Ok(())
}
