//! Recovery sweep for staging artifacts left behind by an interrupted run.
//!
//! Staging is the exclusive first step of every transfer, so an artifact that bears the
//! staging suffix when a job starts can only be residue of an earlier run. The sweep removes
//! every such artifact on the given side and reports each removal as its own record.

use tracing::instrument;

use crate::config::Job;
use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::ledger::ResultRecord;

#[instrument(skip(job, side), fields(job = %job.name, side = side.label()))]
pub async fn sweep(
    job: &Job,
    side: &dyn Endpoint,
    dir: &str,
    local_side: bool,
) -> Vec<ResultRecord> {
    let suffix = &job.options.staging_suffix;
    let entries = match side.list_entries(dir).await {
        Ok(entries) => entries,
        Err(error) => {
            tracing::error!("cannot scan {} for orphans: {:#}", dir, error);
            return vec![ResultRecord::sweep(
                job,
                local_side,
                "",
                Err(Error::Unexpected(anyhow::Error::new(error).context(format!(
                    "failed scanning {dir} for orphaned staging artifacts"
                )))),
            )];
        }
    };
    let mut records = Vec::new();
    for entry in entries.into_iter().filter(|e| e.name.ends_with(suffix.as_str())) {
        let path = side.join(dir, &entry.name);
        tracing::info!("removing orphaned staging artifact {}", path);
        let result = side
            .remove(&path)
            .await
            .map_err(|error| Error::cleanup(path.clone(), error));
        if let Err(error) = &result {
            tracing::error!("{}", error);
        }
        records.push(ResultRecord::sweep(job, local_side, &entry.name, result));
    }
    if records.is_empty() {
        tracing::debug!("no orphaned staging artifacts in {}", dir);
    }
    records
}
