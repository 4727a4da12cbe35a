//! Messages exchanged with an `rstaged` worker over its stdin/stdout.
//!
//! The coordinator writes one [`WorkerRequest`] as JSON and closes stdin; the worker runs the
//! job and prints one [`WorkerResponse`] as JSON on stdout. Logs go to stderr.

use serde::{Deserialize, Serialize};

use common::config::Job;
use common::ledger::ResultRecord;
use common::version::ProtocolVersion;

/// Command line settings passed through to the worker process.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct WorkerConfig {
    pub verbose: u8,
    pub max_workers: usize,
    pub max_blocking_threads: usize,
}

impl WorkerConfig {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--max-workers={}", self.max_workers),
            format!("--max-blocking-threads={}", self.max_blocking_threads),
        ];
        if self.verbose > 0 {
            args.push(format!("-{}", "v".repeat(self.verbose as usize)));
        }
        args
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WorkerRequest {
    pub version: ProtocolVersion,
    pub job: Job,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct WorkerResponse {
    pub version: ProtocolVersion,
    pub records: Vec<ResultRecord>,
}

impl WorkerRequest {
    pub fn new(job: Job) -> Self {
        Self {
            version: ProtocolVersion::current(),
            job,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_args() {
        let config = WorkerConfig {
            verbose: 2,
            max_workers: 4,
            max_blocking_threads: 0,
        };
        assert_eq!(
            config.to_args(),
            vec!["--max-workers=4", "--max-blocking-threads=0", "-vv"]
        );
        assert!(!WorkerConfig::default().to_args().contains(&"-v".to_string()));
    }

    #[test]
    fn request_carries_secret_and_version() -> anyhow::Result<()> {
        let json = r#"{
            "version": {"semantic": "0.4.0"},
            "job": {
                "name": "pull",
                "direction": "Download",
                "endpoint": {"address": "file:///srv/share"},
                "credentials": {"user": "svc", "secret": "s3cret"},
                "remote_path": "/out",
                "local_path": "/data",
                "options": {
                    "OverwriteDestination": false,
                    "RemoveSourceAfterTransfer": false,
                    "ErrorWhenPathNotFound": true,
                    "RemoveOrphanedStagingArtifacts": false,
                    "FileExtensionAllowList": [".txt"],
                    "StagingSuffix": ".filepart",
                    "LockRetryCount": 3,
                    "LockRetryDelaySeconds": 5,
                    "TransferMode": "Staged"
                },
                "worker": "edge01"
            }
        }"#;
        let request: WorkerRequest = serde_json::from_str(json)?;
        assert_eq!(request.job.credentials.secret.as_deref(), Some("s3cret"));
        assert!(request.job.options.error_when_path_not_found);
        let again: WorkerRequest = serde_json::from_str(&serde_json::to_string(&request)?)?;
        assert_eq!(again.job.name, "pull");
        Ok(())
    }
}
