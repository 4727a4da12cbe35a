//! Execution strategies: run a job in this process, or hand it to an `rstaged` worker on
//! another host over ssh.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::instrument;

use common::clock::{Sleep, TokioSleep};
use common::config::Job;
use common::endpoint::Connector;
use common::error::Error;
use common::ledger::{Ledger, ResultRecord};
use common::version::ProtocolVersion;

use crate::connector::DefaultConnector;
use crate::protocol::{WorkerConfig, WorkerRequest, WorkerResponse};

/// Runs one job to completion. Failures are reported as records, never returned.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &Job) -> Ledger;
}

/// Runs jobs in the current process.
#[derive(Clone)]
pub struct LocalExecutor {
    connector: Arc<dyn Connector>,
    sleep: Arc<dyn Sleep>,
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new(Arc::new(DefaultConnector), Arc::new(TokioSleep))
    }
}

impl LocalExecutor {
    pub fn new(connector: Arc<dyn Connector>, sleep: Arc<dyn Sleep>) -> Self {
        Self { connector, sleep }
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn execute(&self, job: &Job) -> Ledger {
        common::job::run_job(job, self.connector.as_ref(), self.sleep.as_ref()).await
    }
}

/// Launches `rstaged` on the job's worker host and collects its records.
#[derive(Debug, Clone)]
pub struct WorkerExecutor {
    binary: String,
    config: WorkerConfig,
}

impl WorkerExecutor {
    pub fn new(binary: &str, config: WorkerConfig) -> Self {
        Self {
            binary: binary.to_string(),
            config,
        }
    }

    async fn check_version(
        &self,
        session: &openssh::Session,
        host: &str,
    ) -> Result<(), Error> {
        let output = session
            .command(&self.binary)
            .arg("--protocol-version")
            .output()
            .await
            .map_err(|error| Error::Connection {
                target: host.to_string(),
                source: anyhow::Error::new(error).context(format!("failed to run {}", self.binary)),
            })?;
        if !output.status.success() {
            return Err(Error::Connection {
                target: host.to_string(),
                source: anyhow::anyhow!(
                    "{} --protocol-version failed: {}",
                    self.binary,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        let remote = ProtocolVersion::from_json(&String::from_utf8_lossy(&output.stdout))
            .map_err(|source| Error::Connection {
                target: host.to_string(),
                source,
            })?;
        ensure_compatible(host, &remote)
    }

    async fn run_worker(
        &self,
        session: &openssh::Session,
        host: &str,
        job: &Job,
    ) -> Result<Vec<ResultRecord>, Error> {
        let mut request = WorkerRequest::new(job.clone());
        request.job.worker = None;
        let payload = serde_json::to_vec(&request)
            .map_err(|e| Error::Unexpected(anyhow::anyhow!("failed to encode job: {e}")))?;
        let mut child = session
            .command(&self.binary)
            .args(self.config.to_args())
            .stdin(openssh::Stdio::piped())
            .stdout(openssh::Stdio::piped())
            .stderr(openssh::Stdio::piped())
            .spawn()
            .await
            .map_err(|error| Error::Connection {
                target: host.to_string(),
                source: anyhow::Error::new(error).context("failed to spawn worker"),
            })?;
        let worker_io = |what: &str| {
            let what = what.to_string();
            move |error: std::io::Error| Error::Unexpected(anyhow::anyhow!("worker {what}: {error}"))
        };
        let mut stdin = child
            .stdin()
            .take()
            .ok_or_else(|| Error::Unexpected(anyhow::anyhow!("worker stdin unavailable")))?;
        let mut stdout = child
            .stdout()
            .take()
            .ok_or_else(|| Error::Unexpected(anyhow::anyhow!("worker stdout unavailable")))?;
        let mut stderr = child
            .stderr()
            .take()
            .ok_or_else(|| Error::Unexpected(anyhow::anyhow!("worker stderr unavailable")))?;
        stdin.write_all(&payload).await.map_err(worker_io("stdin"))?;
        stdin.shutdown().await.map_err(worker_io("stdin"))?;
        drop(stdin);
        let read_stdout = async {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).await.map(|_| buf)
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            buf
        };
        let (stdout_data, stderr_data) = tokio::join!(read_stdout, read_stderr);
        let status = child.wait().await.map_err(|error| Error::Connection {
            target: host.to_string(),
            source: anyhow::Error::new(error).context("failed waiting for worker"),
        })?;
        if !stderr_data.is_empty() {
            tracing::debug!(
                "worker {} stderr:\n{}",
                host,
                String::from_utf8_lossy(&stderr_data)
            );
        }
        if !status.success() {
            return Err(Error::Unexpected(anyhow::anyhow!(
                "worker on {} exited with {:?}: {}",
                host,
                status.code(),
                String::from_utf8_lossy(&stderr_data).trim()
            )));
        }
        let stdout_data = stdout_data.map_err(worker_io("stdout"))?;
        let response: WorkerResponse = serde_json::from_slice(&stdout_data).map_err(|e| {
            Error::Unexpected(anyhow::anyhow!("malformed worker response from {host}: {e}"))
        })?;
        ensure_compatible(host, &response.version)?;
        Ok(response.records)
    }
}

fn ensure_compatible(host: &str, remote: &ProtocolVersion) -> Result<(), Error> {
    let local = ProtocolVersion::current();
    if local.is_compatible_with(remote) {
        return Ok(());
    }
    Err(Error::Connection {
        target: host.to_string(),
        source: anyhow::anyhow!("worker runs version {remote}, this build is {local}"),
    })
}

#[async_trait]
impl Executor for WorkerExecutor {
    #[instrument(skip(self, job), fields(job = %job.name))]
    async fn execute(&self, job: &Job) -> Ledger {
        let mut ledger = Ledger::new();
        let Some(host) = job.worker.as_deref() else {
            ledger.push(ResultRecord::job_failure(
                job,
                &Error::Configuration(format!("job {:?} has no worker host", job.name)),
            ));
            return ledger;
        };
        let destination = if host.starts_with("ssh://") {
            host.to_string()
        } else {
            format!("ssh://{host}")
        };
        tracing::info!("dispatching job {} to worker {}", job.name, host);
        let session = match crate::ssh::connect_session(&destination).await {
            Ok(session) => session,
            Err(source) => {
                ledger.push(ResultRecord::job_failure(
                    job,
                    &Error::Connection {
                        target: host.to_string(),
                        source,
                    },
                ));
                return ledger;
            }
        };
        let result = match self.check_version(&session, host).await {
            Ok(()) => self.run_worker(&session, host, job).await,
            Err(error) => Err(error),
        };
        if let Err(error) = session.close().await {
            tracing::warn!("closing ssh session to worker {} failed: {:#}", host, error);
        }
        match result {
            Ok(records) => ledger.merge(records),
            Err(error) => {
                tracing::error!("worker for job {} failed: {}", job.name, error);
                ledger.push(ResultRecord::job_failure(job, &error));
            }
        }
        ledger
    }
}

/// Sends jobs that name a worker host to that worker and runs the rest locally.
pub struct RoutingExecutor {
    local: Arc<dyn Executor>,
    worker: Arc<dyn Executor>,
}

impl RoutingExecutor {
    pub fn new(local: Arc<dyn Executor>, worker: Arc<dyn Executor>) -> Self {
        Self { local, worker }
    }
}

#[async_trait]
impl Executor for RoutingExecutor {
    async fn execute(&self, job: &Job) -> Ledger {
        if job.worker.is_some() {
            self.worker.execute(job).await
        } else {
            self.local.execute(job).await
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use common::config::{Credentials, EndpointTarget, TransferOptions};
    use common::ledger::RecordKind;
    use common::task::Direction;

    pub(crate) fn job(name: &str, worker: Option<&str>) -> Job {
        Job {
            name: name.into(),
            direction: Direction::Upload,
            endpoint: EndpointTarget {
                address: "file:///nonexistent".into(),
            },
            credentials: Credentials {
                user: "svc".into(),
                secret: None,
            },
            remote_path: "/in".into(),
            local_path: "/data".into(),
            options: TransferOptions::default(),
            worker: worker.map(String::from),
        }
    }

    struct Tagging(&'static str);

    #[async_trait]
    impl Executor for Tagging {
        async fn execute(&self, job: &Job) -> Ledger {
            let mut ledger = Ledger::new();
            ledger.push(ResultRecord::job_failure(
                job,
                &Error::Configuration(self.0.to_string()),
            ));
            ledger
        }
    }

    #[tokio::test]
    async fn routes_by_worker_field() {
        let routing = RoutingExecutor::new(Arc::new(Tagging("local")), Arc::new(Tagging("worker")));
        let here = routing.execute(&job("a", None)).await;
        let there = routing.execute(&job("b", Some("edge01"))).await;
        assert!(here.records()[0].error.as_deref().unwrap().contains("local"));
        assert!(there.records()[0].error.as_deref().unwrap().contains("worker"));
    }

    #[tokio::test]
    async fn local_executor_reports_connection_failure() -> anyhow::Result<()> {
        let local = tempfile::tempdir()?;
        tokio::fs::write(local.path().join("a.txt"), "a").await?;
        let mut job = job("a", None);
        job.local_path = local.path().to_str().unwrap().to_string();
        let ledger = LocalExecutor::default().execute(&job).await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.records()[0].kind, RecordKind::Job);
        assert!(local.path().join("a.txt").exists());
        Ok(())
    }

    #[test]
    fn version_mismatch_is_a_connection_error() {
        let remote = ProtocolVersion {
            semantic: "0.0.1".into(),
            git_describe: None,
            git_hash: None,
        };
        let error = ensure_compatible("edge01", &remote).unwrap_err();
        assert!(matches!(error, Error::Connection { .. }));
        assert!(ensure_compatible("edge01", &ProtocolVersion::current()).is_ok());
    }
}
