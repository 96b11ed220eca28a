//! Per-blog configuration documents.
//!
//! Layout: `<blogs>/<blog-id>/blog.yaml`, optionally with `theme.md` next to
//! it. When present, `theme.md` replaces the theme description from the
//! YAML. Nothing here is cached: every call reads the files again so an
//! operator's edit applies to the next invocation.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::BlogConfig;

const BLOG_FILE: &str = "blog.yaml";
const THEME_FILE: &str = "theme.md";

/// Errors loading blog configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Blog not found: {0}")]
    NotFound(String),

    #[error("Invalid blog id: {0}")]
    InvalidId(String),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Blog '{blog}' is misconfigured: {message}")]
    Invalid { blog: String, message: String },
}

/// Source of blog configuration
pub trait BlogConfigSource: Send + Sync {
    /// Load and validate one blog's configuration
    fn load(&self, blog: &str) -> Result<BlogConfig, ConfigError>;

    /// Ids of all configured blogs, sorted
    fn list(&self) -> Result<Vec<String>, ConfigError>;
}

/// Blog configuration read from a directory tree
pub struct BlogDirectory {
    root: PathBuf,
}

impl BlogDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blog_dir(&self, blog: &str) -> Result<PathBuf, ConfigError> {
        if blog.is_empty() || blog.starts_with('.') || blog.contains(['/', '\\']) {
            return Err(ConfigError::InvalidId(blog.to_string()));
        }
        Ok(self.root.join(blog))
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl BlogConfigSource for BlogDirectory {
    fn load(&self, blog: &str) -> Result<BlogConfig, ConfigError> {
        let dir = self.blog_dir(blog)?;
        let path = dir.join(BLOG_FILE);

        let content =
            read_optional(&path)?.ok_or_else(|| ConfigError::NotFound(blog.to_string()))?;

        let mut config: BlogConfig =
            serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        config.id = blog.to_string();

        if let Some(theme) = read_optional(&dir.join(THEME_FILE))? {
            let theme = theme.trim();
            if !theme.is_empty() {
                config.theme.description = theme.to_string();
            }
        }

        config.validate().map_err(|message| ConfigError::Invalid {
            blog: blog.to_string(),
            message,
        })?;

        Ok(config)
    }

    fn list(&self) -> Result<Vec<String>, ConfigError> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut blogs = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.join(BLOG_FILE).is_file() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if !name.starts_with('.') {
                    blogs.push(name.to_string());
                }
            }
        }
        blogs.sort();
        Ok(blogs)
    }
}
