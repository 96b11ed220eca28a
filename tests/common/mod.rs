//! Shared fixtures for integration tests: in-process fake services that count
//! their calls, an in-memory blog source and a harness wiring them into an
//! orchestrator.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use blogsmith::adapters::{
    ContentManagement, ExternalError, GenerationService, OptimizationService, PostRequest,
    QualityTier, RemotePost, ResearchService, SecretStore,
};
use blogsmith::config::{BlogConfigSource, ConfigError, PipelineSettings};
use blogsmith::core::{ArtifactStore, MemoryArtifactStore, Orchestrator, RetryPolicy, ScheduleOutcome};
use blogsmith::domain::{BlogConfig, DataPoint, RankedTopic, RunRef, Theme};
use blogsmith::stages::{PipelineContext, Services};

pub const BLOG: &str = "cooking";
pub const DRAFT_TITLE: &str = "Weeknight Pasta, Faster";
pub const DRAFT_BODY: &str = "Good pasta does not need an hour. Start the water before anything \
else, salt it well, and build the sauce while the pasta cooks. Reserve a cup of the cooking \
water: its starch turns butter and cheese into a glossy sauce that clings to every strand.";
pub const OUTLINE: &str = "# Weeknight Pasta\n- water first\n- sauce while it cooks";

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// A fixed tick time used by most tests
pub fn now() -> DateTime<Utc> {
    at("2026-10-16T09:00:00Z")
}

pub fn blog_config(id: &str, ready: bool) -> BlogConfig {
    BlogConfig {
        id: id.to_string(),
        topics: vec!["topic-A".to_string(), "topic-B".to_string()],
        theme: Theme {
            description: "Quick home cooking".to_string(),
            style: BTreeMap::from([("tone".to_string(), "friendly".to_string())]),
        },
        frequency: blogsmith::domain::Frequency { daily: 2 },
        ready,
    }
}

fn fast_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
        timeout_ms: 500,
        ..Default::default()
    }
}

/// Production settings with millisecond backoff
pub fn fast_settings() -> PipelineSettings {
    PipelineSettings {
        research_retry: fast_policy(3),
        generation_retry: fast_policy(3),
        optimization_retry: fast_policy(2),
        publish_retry: fast_policy(3),
        secret_retry: fast_policy(2),
        ..Default::default()
    }
}

// ============================================================================
// Fake services
// ============================================================================

#[derive(Default)]
pub struct FakeResearch {
    pub calls: AtomicU32,
    failure: Mutex<Option<ExternalError>>,
    delay: Mutex<Option<Duration>>,
}

impl FakeResearch {
    pub fn fail_with(&self, error: ExternalError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn delay_by(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResearchService for FakeResearch {
    async fn query(&self, _topics: &[String], _theme: &Theme) -> Result<Vec<RankedTopic>, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        Ok(vec![
            RankedTopic {
                topic: "topic-B".to_string(),
                score: 0.9,
                data_points: vec![DataPoint {
                    keyword: "one-pot pasta".to_string(),
                    score: 0.8,
                    source: Some("trends".to_string()),
                }],
            },
            RankedTopic {
                topic: "topic-A".to_string(),
                score: 0.4,
                data_points: vec![],
            },
        ])
    }
}

#[derive(Default)]
pub struct FakeGeneration {
    pub calls: AtomicU32,
    failure: Mutex<Option<ExternalError>>,
}

impl FakeGeneration {
    pub fn fail_with(&self, error: Option<ExternalError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationService for FakeGeneration {
    async fn generate(&self, _prompt: &str, tier: QualityTier) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(match tier {
            QualityTier::Fast => OUTLINE.to_string(),
            QualityTier::High => format!("# {}\n\n{}", DRAFT_TITLE, DRAFT_BODY),
        })
    }
}

#[derive(Debug, Clone)]
pub enum OptimizeMode {
    /// Append a keyword line to the text
    Append,
    Fail(ExternalError),
    Return(String),
}

pub struct FakeOptimization {
    pub calls: AtomicU32,
    mode: Mutex<OptimizeMode>,
}

impl Default for FakeOptimization {
    fn default() -> Self {
        Self {
            calls: AtomicU32::new(0),
            mode: Mutex::new(OptimizeMode::Append),
        }
    }
}

impl FakeOptimization {
    pub fn set_mode(&self, mode: OptimizeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OptimizationService for FakeOptimization {
    async fn optimize(&self, text: &str, keywords: &[String]) -> Result<String, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            OptimizeMode::Append => Ok(format!("{}\n\nKeywords: {}", text, keywords.join(", "))),
            OptimizeMode::Fail(error) => Err(error),
            OptimizeMode::Return(text) => Ok(text),
        }
    }
}

/// CMS fake. Scripted errors are returned by create_post before it succeeds.
/// Errors scripted as "after store" are returned once the post is stored,
/// like a CMS that commits and then fails to answer.
#[derive(Default)]
pub struct FakeCms {
    pub create_calls: AtomicU32,
    pub find_calls: AtomicU32,
    script: Mutex<VecDeque<ExternalError>>,
    after_store: Mutex<VecDeque<ExternalError>>,
    posts: Mutex<Vec<(PostRequest, RemotePost)>>,
}

impl FakeCms {
    pub fn script_failures(&self, errors: Vec<ExternalError>) {
        self.script.lock().unwrap().extend(errors);
    }

    pub fn script_failures_after_store(&self, errors: Vec<ExternalError>) {
        self.after_store.lock().unwrap().extend(errors);
    }

    pub fn posts(&self) -> Vec<(PostRequest, RemotePost)> {
        self.posts.lock().unwrap().clone()
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn find_calls(&self) -> u32 {
        self.find_calls.load(Ordering::SeqCst)
    }
}

pub fn server_error(status: u16) -> ExternalError {
    ExternalError::ServerError {
        status,
        message: "try again".to_string(),
    }
}

#[async_trait]
impl ContentManagement for FakeCms {
    async fn create_post(&self, post: &PostRequest) -> Result<RemotePost, ExternalError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.script.lock().unwrap().pop_front() {
            return Err(error);
        }

        let mut posts = self.posts.lock().unwrap();
        let id = format!("post-{}", posts.len() + 1);
        let remote = RemotePost {
            url: format!("https://blog.test/{}", id),
            post_id: id,
        };
        posts.push((post.clone(), remote.clone()));
        if let Some(error) = self.after_store.lock().unwrap().pop_front() {
            return Err(error);
        }
        Ok(remote)
    }

    async fn find_post_by_tag(&self, tag: &str) -> Result<Option<RemotePost>, ExternalError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .posts
            .lock()
            .unwrap()
            .iter()
            .find(|(request, _)| request.tags.iter().any(|t| t == tag))
            .map(|(_, remote)| remote.clone()))
    }
}

#[derive(Default)]
pub struct FakeSecrets {
    pub calls: AtomicU32,
    values: HashMap<String, String>,
}

impl FakeSecrets {
    pub fn with(values: &[(&str, &str)]) -> Self {
        Self {
            calls: AtomicU32::new(0),
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretStore for FakeSecrets {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ExternalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.values.get(name).cloned())
    }
}

/// Blog configuration held in memory; edits apply to the next load
#[derive(Default)]
pub struct StaticBlogs {
    blogs: Mutex<BTreeMap<String, BlogConfig>>,
}

impl StaticBlogs {
    pub fn insert(&self, config: BlogConfig) {
        self.blogs.lock().unwrap().insert(config.id.clone(), config);
    }
}

impl BlogConfigSource for StaticBlogs {
    fn load(&self, blog: &str) -> Result<BlogConfig, ConfigError> {
        let config = self
            .blogs
            .lock()
            .unwrap()
            .get(blog)
            .cloned()
            .ok_or_else(|| ConfigError::NotFound(blog.to_string()))?;
        config.validate().map_err(|message| ConfigError::Invalid {
            blog: blog.to_string(),
            message,
        })?;
        Ok(config)
    }

    fn list(&self) -> Result<Vec<String>, ConfigError> {
        Ok(self.blogs.lock().unwrap().keys().cloned().collect())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<dyn ArtifactStore>,
    pub blogs: Arc<StaticBlogs>,
    pub research: Arc<FakeResearch>,
    pub generation: Arc<FakeGeneration>,
    pub optimization: Arc<FakeOptimization>,
    pub cms: Arc<FakeCms>,
    pub secrets: Arc<FakeSecrets>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    /// In-memory store, one ready blog
    pub fn new() -> Self {
        Self::build(Arc::new(MemoryArtifactStore::new()), Arc::new(FakeCms::default()))
    }

    pub fn with_store(store: Arc<dyn ArtifactStore>) -> Self {
        Self::build(store, Arc::new(FakeCms::default()))
    }

    /// Fresh store sharing an existing CMS
    pub fn with_cms(cms: Arc<FakeCms>) -> Self {
        Self::build(Arc::new(MemoryArtifactStore::new()), cms)
    }

    fn build(store: Arc<dyn ArtifactStore>, cms: Arc<FakeCms>) -> Self {
        let blogs = Arc::new(StaticBlogs::default());
        blogs.insert(blog_config(BLOG, true));

        let research = Arc::new(FakeResearch::default());
        let generation = Arc::new(FakeGeneration::default());
        let optimization = Arc::new(FakeOptimization::default());
        let secrets = Arc::new(FakeSecrets::with(&[("monetization", "<div class=\"ad\"></div>")]));

        let ctx = PipelineContext {
            store: Arc::clone(&store),
            blogs: blogs.clone(),
            services: Services {
                research: research.clone(),
                generation: generation.clone(),
                optimization: optimization.clone(),
                cms: cms.clone(),
                secrets: secrets.clone(),
            },
            settings: fast_settings(),
        };

        Self {
            store,
            blogs,
            research,
            generation,
            optimization,
            cms,
            secrets,
            orchestrator: Arc::new(Orchestrator::new(ctx)),
        }
    }

    /// Total calls made to any external service
    pub fn external_calls(&self) -> u32 {
        self.research.calls()
            + self.generation.calls()
            + self.optimization.calls()
            + self.cms.create_calls()
            + self.cms.find_calls()
            + self.secrets.calls()
    }

    /// Schedule the test blog at the fixed tick time and return the run
    pub async fn scheduled_run(&self) -> RunRef {
        match self.orchestrator.scheduler().schedule(BLOG, now()).await.unwrap() {
            ScheduleOutcome::Created(run) | ScheduleOutcome::AlreadyExists(run) => run,
            other => panic!("expected a scheduled run, got {:?}", other),
        }
    }
}
