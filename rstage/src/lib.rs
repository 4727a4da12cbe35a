//! Run orchestration shared by the `rstage` and `rstaged` binaries.

use std::sync::Arc;

use tracing::instrument;

use common::config::{RunConfig, RunFile};
use common::error::Error;
use common::ledger::{Ledger, ResultRecord};
use common::version::ProtocolVersion;
use remote::Executor;
use remote::protocol::{WorkerRequest, WorkerResponse};

/// Load and validate the run file, applying the command line capacity override.
///
/// Secrets are looked up with `secret_lookup`; nothing is opened here.
pub async fn load_config(
    path: &std::path::Path,
    max_concurrent_jobs: Option<usize>,
    secret_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RunConfig, Error> {
    let mut run_file = RunFile::load(path).await?;
    if let Some(max) = max_concurrent_jobs {
        run_file.max_concurrent_jobs = max;
    }
    run_file.resolve(secret_lookup)
}

/// Run every job of `config` through `executor` and return the merged ledger.
#[instrument(skip_all, fields(jobs = config.jobs.len()))]
pub async fn run(config: RunConfig, executor: Arc<dyn Executor>) -> Ledger {
    let scheduler = remote::Scheduler::new(config.max_concurrent_jobs, executor);
    let ledger = scheduler.run(config.jobs).await;
    tracing::info!(
        "run finished: {} records, at most {} jobs in parallel",
        ledger.len(),
        scheduler.peak()
    );
    ledger
}

/// Write the records as a JSON array for the reporting side.
pub async fn write_records(path: &std::path::Path, ledger: &Ledger) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(ledger.records())?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| anyhow::anyhow!("failed to write records to {:?}: {:#}", path, e))
}

/// Execute one worker request. Incompatible coordinators get a job failure record back.
#[instrument(skip_all, fields(job = %request.job.name))]
pub async fn serve_request(request: WorkerRequest, executor: &dyn Executor) -> WorkerResponse {
    let current = ProtocolVersion::current();
    let records = if current.is_compatible_with(&request.version) {
        executor.execute(&request.job).await.into_records()
    } else {
        let error = Error::Connection {
            target: "coordinator".to_string(),
            source: anyhow::anyhow!(
                "coordinator runs version {}, this worker is {}",
                request.version,
                current
            ),
        };
        tracing::error!("{}", error);
        vec![ResultRecord::job_failure(&request.job, &error)]
    };
    WorkerResponse {
        version: current,
        records,
    }
}
