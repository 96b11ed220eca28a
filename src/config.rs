//! Configuration for blogsmith.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (BLOGSMITH_HOME, BLOGSMITH_BLOGS)
//! 2. Config file (.blogsmith/config.yaml)
//! 3. Defaults (~/.blogsmith)
//!
//! Config file discovery:
//! - Searches current directory and parents for .blogsmith/config.yaml
//! - `home` is relative to the .blogsmith/ directory, other paths to the
//!   project root (the directory containing .blogsmith/)
//!
//! Blog configuration is not part of this: it lives under the blogs
//! directory and is re-read on every invocation (see [`blogs`]).

pub mod blogs;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

pub use blogs::{BlogConfigSource, BlogDirectory, ConfigError};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub services: Option<ServicesConfig>,
    #[serde(default)]
    pub pipeline: Option<PipelineSettings>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .blogsmith/)
    pub home: Option<String>,
    /// Blog configuration directory (relative to project root)
    pub blogs: Option<String>,
    /// Artifact store root (relative to project root)
    pub store: Option<String>,
    /// Secrets directory (relative to project root)
    pub secrets: Option<String>,
}

/// Endpoint of a plain JSON service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub url: String,
    #[serde(default = "default_fast_model")]
    pub fast_model: String,
    #[serde(default = "default_quality_model")]
    pub quality_model: String,
    /// Secret holding the API key
    #[serde(default = "default_api_key_secret")]
    pub api_key_secret: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsConfig {
    pub url: String,
    /// Secret holding the publish-scoped token
    #[serde(default = "default_cms_token_secret")]
    pub token_secret: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// External service endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub research: EndpointConfig,
    pub generation: GenerationConfig,
    pub optimization: EndpointConfig,
    pub cms: CmsConfig,
}

fn default_timeout_seconds() -> u64 {
    30
}
fn default_generation_timeout() -> u64 {
    120
}
fn default_fast_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_quality_model() -> String {
    "gpt-4o".to_string()
}
fn default_api_key_secret() -> String {
    "generation-api-key".to_string()
}
fn default_cms_token_secret() -> String {
    "cms-token".to_string()
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            research: EndpointConfig {
                url: "http://localhost:8081".to_string(),
                timeout_seconds: default_timeout_seconds(),
            },
            generation: GenerationConfig {
                url: "https://api.openai.com/v1".to_string(),
                fast_model: default_fast_model(),
                quality_model: default_quality_model(),
                api_key_secret: default_api_key_secret(),
                timeout_seconds: default_generation_timeout(),
            },
            optimization: EndpointConfig {
                url: "http://localhost:8082".to_string(),
                timeout_seconds: 60,
            },
            cms: CmsConfig {
                url: "http://localhost:8080/api".to_string(),
                token_secret: default_cms_token_secret(),
                timeout_seconds: default_timeout_seconds(),
            },
        }
    }
}

/// Retry policies and thresholds used by the stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub research_retry: RetryPolicy,
    pub generation_retry: RetryPolicy,
    pub optimization_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    pub secret_retry: RetryPolicy,

    /// Optimized text shorter than this is rejected
    pub min_optimized_chars: usize,

    /// Optimized text shorter than this fraction of the draft is rejected
    pub min_optimized_ratio: f64,

    /// Secret appended to every published body, if set
    pub boilerplate_secret: Option<String>,

    /// Upper bound on stage invocations per `advance`
    pub max_advance_steps: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            research_retry: RetryPolicy::default()
                .with_initial_delay_ms(500)
                .with_timeout_ms(30_000),
            generation_retry: RetryPolicy::default().with_timeout_ms(120_000),
            optimization_retry: RetryPolicy::default()
                .with_max_attempts(2)
                .with_timeout_ms(60_000),
            publish_retry: RetryPolicy::default().with_timeout_ms(30_000),
            secret_retry: RetryPolicy::default()
                .with_max_attempts(2)
                .with_initial_delay_ms(200)
                .with_timeout_ms(10_000),
            min_optimized_chars: 200,
            min_optimized_ratio: 0.5,
            boilerplate_secret: Some("monetization".to_string()),
            max_advance_steps: 8,
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to blogsmith home (state)
    pub home: PathBuf,
    /// Directory holding one sub-directory per blog
    pub blogs: PathBuf,
    /// Artifact store root
    pub store: PathBuf,
    /// Directory-backed secret store
    pub secrets: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub services: ServicesConfig,
    pub pipeline: PipelineSettings,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".blogsmith").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".blogsmith");

    let config_file = find_config_file();

    let file = match config_file {
        Some(ref path) => Some(load_config_file(path)?),
        None => None,
    };

    let dot_dir = config_file.as_deref().and_then(Path::parent);
    let base_dir = dot_dir.and_then(Path::parent).unwrap_or(Path::new("."));
    let paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    let home = if let Ok(env_home) = std::env::var("BLOGSMITH_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(dir), Some(home_path)) = (dot_dir, paths.home.as_ref()) {
        resolve_path(dir, home_path)
    } else {
        default_home
    };

    let blogs = if let Ok(env_blogs) = std::env::var("BLOGSMITH_BLOGS") {
        PathBuf::from(env_blogs)
    } else if let Some(ref blogs_path) = paths.blogs {
        resolve_path(base_dir, blogs_path)
    } else {
        home.join("blogs")
    };

    let store = paths
        .store
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("runs"));

    let secrets = paths
        .secrets
        .as_deref()
        .map(|p| resolve_path(base_dir, p))
        .unwrap_or_else(|| home.join("secrets"));

    let (services, pipeline) = match file {
        Some(f) => (
            f.services.unwrap_or_default(),
            f.pipeline.unwrap_or_default(),
        ),
        None => (ServicesConfig::default(), PipelineSettings::default()),
    };

    Ok(ResolvedConfig {
        home,
        blogs,
        store,
        secrets,
        config_file,
        services,
        pipeline,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the blogsmith home directory.
pub fn blogsmith_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the artifact store root
pub fn store_dir() -> Result<PathBuf> {
    Ok(config()?.store.clone())
}

/// Get the blogs directory
pub fn blogs_dir() -> Result<PathBuf> {
    Ok(config()?.blogs.clone())
}
