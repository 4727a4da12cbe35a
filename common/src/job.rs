//! Job runner: one session, one directory pair, candidates processed in order.

use tracing::instrument;

use crate::clock::Sleep;
use crate::config::Job;
use crate::endpoint::{Connector, Endpoint, Entry};
use crate::error::{Error, ErrorScope};
use crate::ledger::{Ledger, ResultRecord};
use crate::local::LocalFs;
use crate::selector::Selector;
use crate::session::Session;
use crate::staging::StagingEngine;
use crate::sweeper;
use crate::task::{Direction, TransferTask};

/// Run `job` to completion. Job-level failures become a single record in the returned ledger.
#[instrument(skip_all, fields(job = %job.name, direction = %job.direction))]
pub async fn run_job(job: &Job, connector: &dyn Connector, sleep: &dyn Sleep) -> Ledger {
    let mut ledger = Ledger::new();
    tracing::info!(
        "{} {} <-> {}{}",
        job.name,
        job.local_path,
        job.endpoint,
        job.remote_path
    );
    let result = match job.direction {
        Direction::Upload => run_upload(job, connector, sleep, &mut ledger).await,
        Direction::Download => run_download(job, connector, sleep, &mut ledger).await,
    };
    // anything returned here stopped the job, whatever its class
    if let Err(error) = result {
        tracing::error!(
            "job {} failed ({:?} scope): {}",
            job.name,
            ErrorScope::Job,
            error
        );
        ledger.push(ResultRecord::job_failure(job, &error));
    }
    ledger
}

async fn run_upload(
    job: &Job,
    connector: &dyn Connector,
    sleep: &dyn Sleep,
    ledger: &mut Ledger,
) -> Result<(), Error> {
    let local = LocalFs::new();
    let selector = Selector::new(
        &job.options.staging_suffix,
        &job.options.file_extension_allow_list,
    );
    ensure_dir(job, &local, &job.local_path).await?;
    if job.options.remove_orphaned_staging_artifacts {
        ledger.merge(sweeper::sweep(job, &local, &job.local_path, true).await);
    }
    let candidates = selector
        .select(&local, &job.local_path)
        .await
        .map_err(|error| listing_failed(&job.local_path, error))?;
    if candidates.is_empty() {
        tracing::info!("nothing to upload from {}", job.local_path);
        return Ok(());
    }
    let mut session = Session::open(connector, &job.endpoint, &job.credentials).await?;
    let result = async {
        ensure_dir(job, &session, &job.remote_path).await?;
        if job.options.remove_orphaned_staging_artifacts {
            ledger.merge(sweeper::sweep(job, &session, &job.remote_path, false).await);
        }
        process(job, &session, &local, sleep, candidates, ledger).await;
        Ok::<_, Error>(())
    }
    .await;
    session.close().await;
    result
}

async fn run_download(
    job: &Job,
    connector: &dyn Connector,
    sleep: &dyn Sleep,
    ledger: &mut Ledger,
) -> Result<(), Error> {
    let local = LocalFs::new();
    let selector = Selector::new(
        &job.options.staging_suffix,
        &job.options.file_extension_allow_list,
    );
    let mut session = Session::open(connector, &job.endpoint, &job.credentials).await?;
    let result = async {
        ensure_dir(job, &session, &job.remote_path).await?;
        ensure_dir(job, &local, &job.local_path).await?;
        if job.options.remove_orphaned_staging_artifacts {
            ledger.merge(sweeper::sweep(job, &session, &job.remote_path, false).await);
            ledger.merge(sweeper::sweep(job, &local, &job.local_path, true).await);
        }
        let candidates = selector
            .select(&session, &job.remote_path)
            .await
            .map_err(|error| listing_failed(&job.remote_path, error))?;
        if candidates.is_empty() {
            tracing::info!("nothing to download from {}", job.remote_path);
        }
        process(job, &session, &local, sleep, candidates, ledger).await;
        Ok::<_, Error>(())
    }
    .await;
    session.close().await;
    result
}

async fn process(
    job: &Job,
    session: &Session,
    local: &LocalFs,
    sleep: &dyn Sleep,
    candidates: Vec<Entry>,
    ledger: &mut Ledger,
) {
    let engine = StagingEngine::new(session, local, &job.options, sleep);
    let (source_dir, destination_dir) = match job.direction {
        Direction::Upload => (&job.local_path, &job.remote_path),
        Direction::Download => (&job.remote_path, &job.local_path),
    };
    for entry in candidates {
        let mut task = TransferTask::new(
            job.direction,
            source_dir,
            destination_dir,
            &entry.name,
            entry.size,
            &job.options.staging_suffix,
        );
        engine.process(&mut task).await;
        ledger.push(ResultRecord::from_task(job, task));
    }
}

/// Make sure `dir` exists on `side`: missing is fatal with ErrorWhenPathNotFound, otherwise
/// the directory is created.
async fn ensure_dir(job: &Job, side: &dyn Endpoint, dir: &str) -> Result<(), Error> {
    let exists = side.exists(dir).await.map_err(|error| {
        Error::Unexpected(
            anyhow::Error::new(error)
                .context(format!("failed checking {} path {dir}", side.label())),
        )
    })?;
    if exists {
        return Ok(());
    }
    if job.options.error_when_path_not_found {
        return Err(Error::PathNotFound(format!("{} {dir}", side.label())));
    }
    tracing::warn!("{} path {} does not exist, creating it", side.label(), dir);
    side.create_dir(dir).await.map_err(|error| {
        Error::Unexpected(
            anyhow::Error::new(error)
                .context(format!("failed creating {} path {dir}", side.label())),
        )
    })
}

fn listing_failed(dir: &str, error: crate::error::OpError) -> Error {
    Error::Unexpected(anyhow::Error::new(error).context(format!("failed listing {dir}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use crate::ledger::{RecordKind, RunOutcome};
    use crate::task::{Action, TaskState};
    use crate::testutils::{self, MemoryConnector, RecordingSleep};
    use tracing_test::traced_test;

    struct Local {
        _tmp: tempfile::TempDir,
        dir: String,
    }

    fn local_dir() -> Local {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("data").to_str().unwrap().to_string();
        Local { _tmp: tmp, dir }
    }

    #[tokio::test]
    #[traced_test]
    async fn upload_three_files() -> Result<(), anyhow::Error> {
        let local = local_dir();
        tokio::fs::create_dir(&local.dir).await?;
        for (name, body) in [("a.txt", "1"), ("b.txt", "22"), ("c.txt", "333")] {
            tokio::fs::write(std::path::Path::new(&local.dir).join(name), body).await?;
        }
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        remote.add_dir("/in");
        let mut job = testutils::job(Direction::Upload);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.outcome(), RunOutcome::Success);
        assert_eq!(ledger.summary().bytes_transferred, 6);
        assert_eq!(remote.file_names("/in"), vec!["a.txt", "b.txt", "c.txt"]);
        let mut left = tokio::fs::read_dir(&local.dir).await?;
        assert!(left.next_entry().await?.is_none());
        assert_eq!(connector.stats().opened, 1);
        assert_eq!(connector.stats().closed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn download_with_allow_list() -> Result<(), anyhow::Error> {
        let local = local_dir();
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        remote.add_file("/out/a.txt", b"a");
        remote.add_file("/out/b.csv", b"b");
        remote.add_file("/out/c.TXT", b"c");
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        job.options.file_extension_allow_list = vec![".txt".into()];
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        let names: Vec<_> = ledger.records().iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "c.TXT"]);
        assert!(ledger.records().iter().all(|r| r.success));
        assert_eq!(remote.file_names("/out"), vec!["b.csv"]);
        assert!(std::path::Path::new(&local.dir).join("c.TXT").exists());
        Ok(())
    }

    #[tokio::test]
    async fn empty_upload_opens_no_session() -> Result<(), anyhow::Error> {
        let local = local_dir();
        tokio::fs::create_dir(&local.dir).await?;
        tokio::fs::write(std::path::Path::new(&local.dir).join("x.json"), "{}").await?;
        let connector = MemoryConnector::default();
        let mut job = testutils::job(Direction::Upload);
        job.local_path = local.dir.clone();
        job.options.file_extension_allow_list = vec![".txt".into()];
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert!(ledger.is_empty());
        assert_eq!(connector.stats().opened, 0);
        Ok(())
    }

    #[tokio::test]
    async fn empty_download_closes_session() {
        let local = local_dir();
        let connector = MemoryConnector::default();
        connector.transport().add_dir("/out");
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert!(ledger.is_empty());
        assert_eq!(connector.stats().opened, 1);
        assert_eq!(connector.stats().closed, 1);
        assert!(std::path::Path::new(&local.dir).is_dir());
    }

    #[tokio::test]
    async fn missing_remote_path_is_fatal_when_requested() {
        let local = local_dir();
        let connector = MemoryConnector::default();
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        job.options.error_when_path_not_found = true;
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert_eq!(ledger.len(), 1);
        let record = &ledger.records()[0];
        assert_eq!(record.kind, RecordKind::Job);
        assert_eq!(record.error_class, Some(ErrorClass::PathNotFound));
        assert_eq!(ledger.outcome().exit_code(), 2);
        assert_eq!(connector.stats().closed, 1);
    }

    #[tokio::test]
    async fn missing_remote_path_is_created_otherwise() -> Result<(), anyhow::Error> {
        let local = local_dir();
        tokio::fs::create_dir(&local.dir).await?;
        tokio::fs::write(std::path::Path::new(&local.dir).join("a.txt"), "a").await?;
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        let mut job = testutils::job(Direction::Upload);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert_eq!(ledger.outcome(), RunOutcome::Success);
        assert_eq!(remote.file_names("/in"), vec!["a.txt"]);
        Ok(())
    }

    #[tokio::test]
    async fn connection_failure_is_one_job_record() -> Result<(), anyhow::Error> {
        let local = local_dir();
        tokio::fs::create_dir(&local.dir).await?;
        tokio::fs::write(std::path::Path::new(&local.dir).join("a.txt"), "a").await?;
        let connector = MemoryConnector::default();
        connector.fail_connect("host unreachable");
        let mut job = testutils::job(Direction::Upload);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.records()[0].error_class, Some(ErrorClass::Connection));
        assert!(std::path::Path::new(&local.dir).join("a.txt").exists());
        Ok(())
    }

    #[tokio::test]
    async fn orphans_are_swept_before_selection() {
        let local = local_dir();
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        remote.add_file("/out/a.txt", b"a");
        remote.add_file("/out/old.txt.filepart", b"stale");
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        job.options.remove_orphaned_staging_artifacts = true;
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        let kinds: Vec<_> = ledger.records().iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![RecordKind::Sweep, RecordKind::Task]);
        assert_eq!(ledger.summary().orphans_removed, 1);
        assert!(remote.file_names("/out").is_empty());
    }

    #[tokio::test]
    async fn one_bad_file_does_not_stop_the_job() {
        let local = local_dir();
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        remote.add_file("/out/a.txt", b"a");
        remote.add_file("/out/b.txt", b"b");
        remote.add_file("/out/c.txt", b"c");
        remote.fail_transfer("/out/b.txt.filepart");
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        let states: Vec<_> = ledger.records().iter().map(|r| r.state).collect();
        assert_eq!(
            states,
            vec![
                Some(TaskState::Completed),
                Some(TaskState::TransferFailed),
                Some(TaskState::Completed)
            ]
        );
        assert_eq!(
            ledger.records()[1].action_log,
            vec![Action::Staged, Action::StagingReverted]
        );
        assert_eq!(ledger.outcome(), RunOutcome::CompletedWithErrors);
        assert_eq!(remote.file_names("/out"), vec!["b.txt"]);
        assert_eq!(connector.stats().opened, 1);
        assert_eq!(connector.stats().closed, 1);
    }

    #[tokio::test]
    #[traced_test]
    async fn remote_listing_failure_is_one_job_record() {
        let local = local_dir();
        let connector = MemoryConnector::default();
        let remote = connector.transport();
        remote.add_file("/out/a.txt", b"a");
        remote.fail_list("/out");
        let mut job = testutils::job(Direction::Download);
        job.local_path = local.dir.clone();
        let ledger = run_job(&job, &connector, &RecordingSleep::default()).await;
        assert_eq!(ledger.len(), 1);
        let record = &ledger.records()[0];
        assert_eq!(record.kind, RecordKind::Job);
        assert_eq!(record.error_class, Some(ErrorClass::Unexpected));
        assert!(record.error.as_deref().unwrap().contains("/out"));
        assert_eq!(remote.file_names("/out"), vec!["a.txt"]);
        assert_eq!(connector.stats().opened, 1);
        assert_eq!(connector.stats().closed, 1);
        assert!(logs_contain("Job scope"));
    }
}
