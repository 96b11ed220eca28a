//! Error taxonomy shared by every stage.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::run::StageName;

/// How a failure is treated by retry and fallback logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network, 5xx, timeout: retried per stage policy
    TransientExternal,

    /// 4xx, invalid shape: never retried
    PermanentExternal,

    /// Idempotency short-circuit, logged as a skip
    AlreadyDone,

    /// Missing or malformed blog configuration, fatal for the run
    ConfigurationInvalid,

    /// The artifact store could not be read or written
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientExternal => "transient_external",
            Self::PermanentExternal => "permanent_external",
            Self::AlreadyDone => "already_done",
            Self::ConfigurationInvalid => "configuration_invalid",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified stage failure
#[derive(Debug, Clone, Error)]
#[error("{stage} stage failed ({kind}): {message}")]
pub struct StageError {
    pub stage: StageName,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageError {
    pub fn new(stage: StageName, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn storage(stage: StageName, err: impl fmt::Display) -> Self {
        Self::new(stage, ErrorKind::Storage, err.to_string())
    }

    pub fn config(stage: StageName, err: impl fmt::Display) -> Self {
        Self::new(stage, ErrorKind::ConfigurationInvalid, err.to_string())
    }
}
