//! Result ledger: one immutable record per task outcome, orphan sweep and job-level failure.

use serde::{Deserialize, Serialize};

use crate::config::Job;
use crate::error::{Error, ErrorClass};
use crate::task::{Action, Direction, TaskState, TransferTask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordKind {
    /// Outcome of one file transfer.
    Task,
    /// Removal (or failed removal) of an orphaned staging artifact.
    Sweep,
    /// Job-level failure standing in for all remaining candidates.
    Job,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub job: String,
    pub kind: RecordKind,
    pub direction: Direction,
    pub local_path: String,
    pub remote_path: String,
    pub file_name: String,
    pub byte_length: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub state: Option<TaskState>,
    pub action_log: Vec<Action>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_class: Option<ErrorClass>,
}

impl ResultRecord {
    /// Record for a task that reached a terminal state.
    pub fn from_task(job: &Job, mut task: TransferTask) -> Self {
        let (local_dir, remote_dir) = match task.direction {
            Direction::Upload => (task.source_dir.clone(), task.destination_dir.clone()),
            Direction::Download => (task.destination_dir.clone(), task.source_dir.clone()),
        };
        let error = task.take_error();
        Self {
            timestamp: chrono::Utc::now(),
            job: job.name.clone(),
            kind: RecordKind::Task,
            direction: task.direction,
            local_path: local_dir,
            remote_path: remote_dir,
            file_name: task.file_name.clone(),
            byte_length: task.byte_length,
            success: task.state() == TaskState::Completed,
            state: Some(task.state()),
            action_log: task.action_log().to_vec(),
            error_class: error.as_ref().map(Error::class),
            error: error.map(|e| format!("{e:#}")),
        }
    }

    /// Record for one orphaned staging artifact found by the sweeper.
    pub fn sweep(job: &Job, local_side: bool, file_name: &str, result: Result<(), Error>) -> Self {
        let (error, error_class, action_log) = match result {
            Ok(()) => (None, None, vec![Action::OrphanRemoved]),
            Err(error) => (Some(format!("{error:#}")), Some(error.class()), vec![]),
        };
        Self {
            timestamp: chrono::Utc::now(),
            job: job.name.clone(),
            kind: RecordKind::Sweep,
            direction: job.direction,
            local_path: if local_side {
                job.local_path.clone()
            } else {
                String::new()
            },
            remote_path: if local_side {
                String::new()
            } else {
                job.remote_path.clone()
            },
            file_name: file_name.to_string(),
            byte_length: 0,
            success: error.is_none(),
            state: None,
            action_log,
            error,
            error_class,
        }
    }

    /// Synthetic record for a failure that stopped the whole job.
    pub fn job_failure(job: &Job, error: &Error) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            job: job.name.clone(),
            kind: RecordKind::Job,
            direction: job.direction,
            local_path: job.local_path.clone(),
            remote_path: job.remote_path.clone(),
            file_name: String::new(),
            byte_length: 0,
            success: false,
            state: None,
            action_log: vec![],
            error: Some(format!("{error:#}")),
            error_class: Some(error.class()),
        }
    }
}

/// Append-only collection of records.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Ledger {
    records: Vec<ResultRecord>,
    /// Jobs whose ledgers were merged in with [`Ledger::merge_job`].
    #[serde(default)]
    jobs: usize,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ResultRecord) {
        if record.success {
            tracing::debug!(
                "{} [{:?}] {} ok",
                record.job,
                record.kind,
                record.file_name
            );
        } else {
            tracing::warn!(
                "{} [{:?}] {} failed: {}",
                record.job,
                record.kind,
                record.file_name,
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        self.records.push(record);
    }

    /// Append all records of `other`, keeping their order.
    pub fn merge(&mut self, other: impl IntoIterator<Item = ResultRecord>) {
        self.records.extend(other);
    }

    /// Append the ledger of one finished job, counting the job even when it produced no records.
    pub fn merge_job(&mut self, job: Ledger) {
        self.jobs += 1;
        self.records.extend(job.records);
    }

    /// Number of jobs merged in with [`Ledger::merge_job`].
    pub fn jobs(&self) -> usize {
        self.jobs
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<ResultRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn summary(&self) -> Summary {
        self.records
            .iter()
            .map(Summary::of)
            .fold(Summary::default(), |acc, s| acc + s)
    }

    /// Classify the run for the process exit indicator.
    ///
    /// The run is fatal only when nothing was processed and every merged job failed at job
    /// level. A job that finished without records (nothing to transfer) counts as completed.
    pub fn outcome(&self) -> RunOutcome {
        if self.records.iter().all(|r| r.success) {
            return RunOutcome::Success;
        }
        let processed_anything = self.records.iter().any(|r| r.kind != RecordKind::Job);
        let failed_jobs: std::collections::HashSet<&str> = self
            .records
            .iter()
            .filter(|r| r.kind == RecordKind::Job)
            .map(|r| r.job.as_str())
            .collect();
        if !processed_anything && failed_jobs.len() >= self.jobs {
            return RunOutcome::Fatal;
        }
        RunOutcome::CompletedWithErrors
    }
}

impl IntoIterator for Ledger {
    type Item = ResultRecord;
    type IntoIter = std::vec::IntoIter<ResultRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    /// Processing ran but some files or jobs failed.
    CompletedWithErrors,
    /// Configuration or connection failure before anything was processed.
    Fatal,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::CompletedWithErrors => 1,
            RunOutcome::Fatal => 2,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_completed: usize,
    pub files_failed: usize,
    pub orphans_removed: usize,
    pub orphans_failed: usize,
    pub jobs_failed: usize,
}

impl Summary {
    fn of(record: &ResultRecord) -> Self {
        match (record.kind, record.success) {
            (RecordKind::Task, true) => Self {
                bytes_transferred: record.byte_length,
                files_completed: 1,
                ..Default::default()
            },
            (RecordKind::Task, false) => Self {
                files_failed: 1,
                ..Default::default()
            },
            (RecordKind::Sweep, true) => Self {
                orphans_removed: 1,
                ..Default::default()
            },
            (RecordKind::Sweep, false) => Self {
                orphans_failed: 1,
                ..Default::default()
            },
            (RecordKind::Job, _) => Self {
                jobs_failed: 1,
                ..Default::default()
            },
        }
    }
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_completed: self.files_completed + other.files_completed,
            files_failed: self.files_failed + other.files_failed,
            orphans_removed: self.orphans_removed + other.orphans_removed,
            orphans_failed: self.orphans_failed + other.orphans_failed,
            jobs_failed: self.jobs_failed + other.jobs_failed,
        }
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes transferred: {}\n\
            files completed: {}\n\
            files failed: {}\n\
            orphans removed: {}\n\
            orphan removals failed: {}\n\
            jobs failed: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.files_completed,
            self.files_failed,
            self.orphans_removed,
            self.orphans_failed,
            self.jobs_failed,
        )
    }
}
