//! Configuration types for runtime settings, transfer options and the JSON run file

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::task::Direction;

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
}

pub const DEFAULT_STAGING_SUFFIX: &str = ".filepart";
pub const DEFAULT_LOCK_RETRY_COUNT: u32 = 3;
pub const DEFAULT_LOCK_RETRY_DELAY_SECONDS: u64 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferMode {
    /// rename to staging name, transfer, clean up, rename to final name
    #[default]
    Staged,
    /// transfer under the final name, no staging artifacts
    Direct,
}

/// Per-job option set, keyed in the run file by the PascalCase option names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TransferOptions {
    pub overwrite_destination: bool,
    /// Only consulted by [`TransferMode::Direct`]; staged transfers always clean up the source.
    pub remove_source_after_transfer: bool,
    pub error_when_path_not_found: bool,
    pub remove_orphaned_staging_artifacts: bool,
    pub file_extension_allow_list: Vec<String>,
    pub staging_suffix: String,
    pub lock_retry_count: u32,
    pub lock_retry_delay_seconds: u64,
    pub transfer_mode: TransferMode,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            overwrite_destination: false,
            remove_source_after_transfer: false,
            error_when_path_not_found: false,
            remove_orphaned_staging_artifacts: false,
            file_extension_allow_list: Vec::new(),
            staging_suffix: DEFAULT_STAGING_SUFFIX.to_string(),
            lock_retry_count: DEFAULT_LOCK_RETRY_COUNT,
            lock_retry_delay_seconds: DEFAULT_LOCK_RETRY_DELAY_SECONDS,
            transfer_mode: TransferMode::Staged,
        }
    }
}

impl TransferOptions {
    pub fn lock_retry_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lock_retry_delay_seconds)
    }

    /// Validate configuration and return errors if invalid
    pub fn validate(&self) -> Result<(), String> {
        if self.staging_suffix.is_empty() {
            return Err("StagingSuffix must not be empty".to_string());
        }
        if self.staging_suffix.contains('/') || self.staging_suffix.contains('\\') {
            return Err(format!(
                "StagingSuffix {:?} must not contain path separators",
                self.staging_suffix
            ));
        }
        if self.file_extension_allow_list.iter().any(|e| e.trim().is_empty()) {
            return Err("FileExtensionAllowList must not contain empty entries".to_string());
        }
        Ok(())
    }
}

/// Option overrides as they appear in the run file; unset fields fall back to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct OptionsFile {
    pub overwrite_destination: Option<bool>,
    pub remove_source_after_transfer: Option<bool>,
    pub error_when_path_not_found: Option<bool>,
    pub remove_orphaned_staging_artifacts: Option<bool>,
    pub file_extension_allow_list: Option<Vec<String>>,
    pub staging_suffix: Option<String>,
    pub lock_retry_count: Option<u32>,
    pub lock_retry_delay_seconds: Option<u64>,
    pub transfer_mode: Option<TransferMode>,
}

impl OptionsFile {
    pub fn apply(&self, base: &TransferOptions) -> TransferOptions {
        TransferOptions {
            overwrite_destination: self
                .overwrite_destination
                .unwrap_or(base.overwrite_destination),
            remove_source_after_transfer: self
                .remove_source_after_transfer
                .unwrap_or(base.remove_source_after_transfer),
            error_when_path_not_found: self
                .error_when_path_not_found
                .unwrap_or(base.error_when_path_not_found),
            remove_orphaned_staging_artifacts: self
                .remove_orphaned_staging_artifacts
                .unwrap_or(base.remove_orphaned_staging_artifacts),
            file_extension_allow_list: self
                .file_extension_allow_list
                .clone()
                .unwrap_or_else(|| base.file_extension_allow_list.clone()),
            staging_suffix: self
                .staging_suffix
                .clone()
                .unwrap_or_else(|| base.staging_suffix.clone()),
            lock_retry_count: self.lock_retry_count.unwrap_or(base.lock_retry_count),
            lock_retry_delay_seconds: self
                .lock_retry_delay_seconds
                .unwrap_or(base.lock_retry_delay_seconds),
            transfer_mode: self.transfer_mode.unwrap_or(base.transfer_mode),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct JobFile {
    pub name: String,
    pub direction: Direction,
    pub endpoint: String,
    pub user: String,
    /// Name of the environment variable holding the secret.
    pub secret_env: Option<String>,
    pub remote_path: String,
    pub local_path: String,
    /// Remote host to execute this job on; runs in-process when unset.
    pub worker: Option<String>,
    #[serde(default)]
    pub options: OptionsFile,
}

/// The JSON run file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
pub struct RunFile {
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default)]
    pub defaults: OptionsFile,
    pub jobs: Vec<JobFile>,
}

fn default_max_concurrent_jobs() -> usize {
    1
}

/// Remote endpoint address, e.g. `file:///mnt/share` or `ssh://host:22`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointTarget {
    pub address: String,
}

impl EndpointTarget {
    pub fn scheme(&self) -> Option<&str> {
        self.address.split_once("://").map(|(scheme, _)| scheme)
    }

    pub fn location(&self) -> &str {
        self.address
            .split_once("://")
            .map_or(self.address.as_str(), |(_, rest)| rest)
    }
}

impl std::fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub secret: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// A fully resolved job, ready to be dispatched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    pub direction: Direction,
    pub endpoint: EndpointTarget,
    pub credentials: Credentials,
    pub remote_path: String,
    pub local_path: String,
    pub options: TransferOptions,
    pub worker: Option<String>,
}

/// Resolved run: capacity plus the ordered job queue.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_concurrent_jobs: usize,
    pub jobs: Vec<Job>,
}

/// Endpoint schemes the connectors know how to open.
pub const KNOWN_SCHEMES: &[&str] = &["file", "ssh"];

impl RunFile {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("failed to parse run file: {e}")))
    }

    pub async fn load(path: &std::path::Path) -> Result<Self, Error> {
        let json = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Configuration(format!("failed to read run file {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Resolve secrets and options and validate every job; nothing is opened here.
    pub fn resolve(
        &self,
        secret_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<RunConfig, Error> {
        if self.max_concurrent_jobs == 0 {
            return Err(Error::Configuration(
                "MaxConcurrentJobs must be at least 1".to_string(),
            ));
        }
        let defaults = self.defaults.apply(&TransferOptions::default());
        let mut names = std::collections::HashSet::new();
        let mut jobs = Vec::with_capacity(self.jobs.len());
        for job in &self.jobs {
            let job = resolve_job(job, &defaults, &secret_lookup)?;
            if !names.insert(job.name.clone()) {
                return Err(Error::Configuration(format!(
                    "duplicate job name {:?}",
                    job.name
                )));
            }
            jobs.push(job);
        }
        Ok(RunConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            jobs,
        })
    }
}

fn require(job: &str, field: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Configuration(format!(
            "job {job:?}: required field {field} is missing"
        )));
    }
    Ok(())
}

fn resolve_job(
    job: &JobFile,
    defaults: &TransferOptions,
    secret_lookup: &impl Fn(&str) -> Option<String>,
) -> Result<Job, Error> {
    require("<unnamed>", "Name", &job.name)?;
    require(&job.name, "Endpoint", &job.endpoint)?;
    require(&job.name, "User", &job.user)?;
    require(&job.name, "RemotePath", &job.remote_path)?;
    require(&job.name, "LocalPath", &job.local_path)?;
    let endpoint = EndpointTarget {
        address: job.endpoint.clone(),
    };
    match endpoint.scheme() {
        Some(scheme) if KNOWN_SCHEMES.contains(&scheme) => {}
        _ => {
            return Err(Error::Configuration(format!(
                "job {:?}: unsupported endpoint {:?}, expected one of {:?}",
                job.name, job.endpoint, KNOWN_SCHEMES
            )));
        }
    }
    let secret = match &job.secret_env {
        Some(var) => Some(secret_lookup(var).ok_or_else(|| {
            Error::Configuration(format!(
                "job {:?}: secret variable {var} is not set",
                job.name
            ))
        })?),
        None => None,
    };
    let options = job.options.apply(defaults);
    options
        .validate()
        .map_err(|e| Error::Configuration(format!("job {:?}: {e}", job.name)))?;
    Ok(Job {
        name: job.name.clone(),
        direction: job.direction,
        endpoint,
        credentials: Credentials {
            user: job.user.clone(),
            secret,
        },
        remote_path: job.remote_path.clone(),
        local_path: job.local_path.clone(),
        options,
        worker: job.worker.clone().filter(|w| !w.trim().is_empty()),
    })
}
