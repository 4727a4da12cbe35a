//! Dispatches the job queue with at most `MaxConcurrentJobs` jobs running at once.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::instrument;

use common::config::Job;
use common::error::Error;
use common::ledger::{Ledger, ResultRecord};

use crate::executor::Executor;

pub struct Scheduler {
    slots: throttle::Slots,
    executor: Arc<dyn Executor>,
}

impl Scheduler {
    pub fn new(max_concurrent_jobs: usize, executor: Arc<dyn Executor>) -> Self {
        Self {
            slots: throttle::Slots::new(max_concurrent_jobs),
            executor,
        }
    }

    /// Highest number of jobs that ran at the same time so far.
    pub fn peak(&self) -> usize {
        self.slots.peak()
    }

    /// Start jobs in queue order as slots free up and merge each job's records as it finishes.
    #[instrument(skip_all, fields(jobs = jobs.len(), capacity = self.slots.capacity()))]
    pub async fn run(&self, jobs: Vec<Job>) -> Ledger {
        let mut ledger = Ledger::new();
        let mut join_set = tokio::task::JoinSet::new();
        let mut running = HashMap::new();
        for job in jobs {
            let slot = self.slots.acquire().await;
            tracing::info!("starting job {}", job.name);
            let executor = self.executor.clone();
            let spawned = job.clone();
            let handle = join_set.spawn(async move {
                let _slot = slot;
                executor.execute(&spawned).await
            });
            running.insert(handle.id(), job);
            while let Some(finished) = join_set.try_join_next_with_id() {
                merge_finished(&mut ledger, &mut running, finished);
            }
        }
        while let Some(finished) = join_set.join_next_with_id().await {
            merge_finished(&mut ledger, &mut running, finished);
        }
        ledger
    }
}

fn merge_finished(
    ledger: &mut Ledger,
    running: &mut HashMap<tokio::task::Id, Job>,
    finished: Result<(tokio::task::Id, Ledger), tokio::task::JoinError>,
) {
    match finished {
        Ok((id, records)) => {
            if let Some(job) = running.remove(&id) {
                tracing::info!("job {} finished with {} records", job.name, records.len());
            }
            ledger.merge_job(records);
        }
        Err(join_error) => {
            let id = join_error.id();
            match running.remove(&id) {
                Some(job) => {
                    let mut failed = Ledger::new();
                    failed.push(ResultRecord::job_failure(
                        &job,
                        &Error::Unexpected(anyhow::anyhow!("job task failed: {join_error}")),
                    ));
                    ledger.merge_job(failed);
                }
                None => tracing::error!("unknown job task failed: {}", join_error),
            }
        }
    }
}
