//! Secret stores: environment variables, a secrets directory, or both.
//!
//! Secrets are looked up on every call and never cached, so a rotated
//! credential takes effect on the next invocation.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ExternalError, SecretStore};

/// Reads `<PREFIX><NAME>` with the name upper-cased and `-`/`.` mapped to `_`
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub const DEFAULT_PREFIX: &'static str = "BLOGSMITH_SECRET_";

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn variable_name(&self, name: &str) -> String {
        let normalized: String = name
            .chars()
            .map(|c| match c {
                '-' | '.' | ' ' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }
}

impl Default for EnvSecretStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PREFIX)
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ExternalError> {
        Ok(std::env::var(self.variable_name(name)).ok())
    }
}

/// One file per secret under a directory; trailing newlines are trimmed
pub struct DirSecretStore {
    dir: PathBuf,
}

impl DirSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretStore for DirSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ExternalError> {
        if name.contains('/') || name.contains("..") {
            return Err(ExternalError::InvalidRequest(format!(
                "invalid secret name '{}'",
                name
            )));
        }

        match tokio::fs::read_to_string(self.dir.join(name)).await {
            Ok(value) => Ok(Some(value.trim_end_matches(['\n', '\r']).to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExternalError::Unavailable(format!(
                "failed to read secret '{}': {}",
                name, e
            ))),
        }
    }
}

/// Tries each store in order and returns the first hit
pub struct ChainedSecretStore {
    stores: Vec<Arc<dyn SecretStore>>,
}

impl ChainedSecretStore {
    pub fn new(stores: Vec<Arc<dyn SecretStore>>) -> Self {
        Self { stores }
    }
}

#[async_trait]
impl SecretStore for ChainedSecretStore {
    async fn get_secret(&self, name: &str) -> Result<Option<String>, ExternalError> {
        for store in &self.stores {
            if let Some(value) = store.get_secret(name).await? {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}
