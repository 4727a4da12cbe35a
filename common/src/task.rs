//! Per-file transfer state.
//!
//! A [`TransferTask`] moves one file between the local filesystem and the remote endpoint.
//! It only moves forward through [`TaskState`]; the action log records completed steps and is
//! never reordered.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Local filesystem is the source, remote endpoint the destination.
    Upload,
    /// Remote endpoint is the source, local filesystem the destination.
    Download,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Upload => write!(f, "upload"),
            Direction::Download => write!(f, "download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Selected,
    Staging,
    Transferring,
    Finalizing,
    Completed,
    StagingFailed,
    TransferFailed,
    FinalizeFailed,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed
                | TaskState::StagingFailed
                | TaskState::TransferFailed
                | TaskState::FinalizeFailed
        )
    }

    // position along the happy path; failure exits rank just after the step they leave
    fn rank(&self) -> u8 {
        match self {
            TaskState::Selected => 0,
            TaskState::Staging => 1,
            TaskState::StagingFailed => 2,
            TaskState::Transferring => 2,
            TaskState::TransferFailed => 3,
            TaskState::Finalizing => 3,
            TaskState::FinalizeFailed => 4,
            TaskState::Completed => 4,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Selected => "selected",
            TaskState::Staging => "staging",
            TaskState::Transferring => "transferring",
            TaskState::Finalizing => "finalizing",
            TaskState::Completed => "completed",
            TaskState::StagingFailed => "staging-failed",
            TaskState::TransferFailed => "transfer-failed",
            TaskState::FinalizeFailed => "finalize-failed",
        };
        write!(f, "{name}")
    }
}

/// Tags recorded in the action log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    Staged,
    Transferred,
    SourceRemoved,
    RenamedAtDestination,
    TransferComplete,
    StagingReverted,
    OrphanRemoved,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Action::Staged => "staged",
            Action::Transferred => "transferred",
            Action::SourceRemoved => "source-removed",
            Action::RenamedAtDestination => "renamed-at-destination",
            Action::TransferComplete => "transfer-complete",
            Action::StagingReverted => "staging-reverted",
            Action::OrphanRemoved => "orphan-removed",
        };
        write!(f, "{tag}")
    }
}

/// One file to move.
#[derive(Debug)]
pub struct TransferTask {
    pub direction: Direction,
    /// Directory holding the file on the source side.
    pub source_dir: String,
    /// Directory receiving the file on the destination side.
    pub destination_dir: String,
    pub file_name: String,
    pub staging_name: String,
    pub byte_length: u64,
    state: TaskState,
    action_log: Vec<Action>,
    error: Option<Error>,
}

impl TransferTask {
    pub fn new(
        direction: Direction,
        source_dir: &str,
        destination_dir: &str,
        file_name: &str,
        byte_length: u64,
        staging_suffix: &str,
    ) -> Self {
        Self {
            direction,
            source_dir: source_dir.to_string(),
            destination_dir: destination_dir.to_string(),
            file_name: file_name.to_string(),
            staging_name: format!("{file_name}{staging_suffix}"),
            byte_length,
            state: TaskState::Selected,
            action_log: Vec::new(),
            error: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn action_log(&self) -> &[Action] {
        &self.action_log
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Move to `next`; re-entering the current state is allowed only for the lock-retry loop.
    pub fn advance(&mut self, next: TaskState) {
        debug_assert!(
            !self.state.is_terminal(),
            "task {} already terminal in {}",
            self.file_name,
            self.state
        );
        debug_assert!(
            next.rank() > self.state.rank() || (next == TaskState::Staging && self.state == next),
            "task {} cannot go from {} to {}",
            self.file_name,
            self.state,
            next
        );
        tracing::trace!("{}: {} -> {}", self.file_name, self.state, next);
        self.state = next;
    }

    pub fn record(&mut self, action: Action) {
        self.action_log.push(action);
    }

    /// Terminate in a failure state. The first error wins.
    pub fn fail(&mut self, state: TaskState, error: Error) {
        debug_assert!(matches!(
            state,
            TaskState::StagingFailed | TaskState::TransferFailed | TaskState::FinalizeFailed
        ));
        self.advance(state);
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    pub fn complete(&mut self) {
        self.record(Action::TransferComplete);
        self.advance(TaskState::Completed);
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}
