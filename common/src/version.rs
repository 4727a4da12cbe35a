//! Version handshake between `rstage` and its `rstaged` workers.

use serde::{Deserialize, Serialize};

/// Identifies the build on either side of a worker connection.
///
/// Only `semantic` takes part in compatibility checks; the git fields are there for
/// debugging mismatched deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub semantic: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub git_describe: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub git_hash: Option<String>,
}

impl ProtocolVersion {
    /// Version of this build, git details are filled in by build.rs when available.
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("RSTAGE_GIT_DESCRIBE").map(String::from),
            git_hash: option_env!("RSTAGE_GIT_HASH").map(String::from),
        }
    }

    /// Workers must run exactly the same release as the coordinator.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.semantic == other.semantic
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self).map_err(|e| anyhow::anyhow!("failed to serialize version: {e:#}"))
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json.trim())
            .map_err(|e| anyhow::anyhow!("failed to parse version {json:?}: {e:#}"))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.git_describe {
            Some(describe) => write!(f, "{} ({})", self.semantic, describe),
            None => write!(f, "{}", self.semantic),
        }
    }
}
