//! Staging transfer engine.
//!
//! Every file goes through `Selected -> Staging -> Transferring -> Finalizing -> Completed`:
//!
//! 1. **Staging** renames the source file to `<name><suffix>` in place. A rename refused because
//!    the file is in use is retried `LockRetryCount` times with a fixed delay between attempts.
//! 2. **Transferring** copies the staged file across under the staging name. Without overwrite,
//!    an existing destination object (staging or final name) fails the task with a collision.
//!    If this step fails the source is renamed back so it is picked up again by the next run.
//! 3. **Finalizing** removes the staged source and renames the destination copy to its final
//!    name. The destination rename is attempted even when the source removal failed, so the
//!    destination never keeps only a staging-named copy while the source is still staged.
//!
//! The machine is symmetric: direction only decides which side is the source.

use tracing::instrument;

use crate::clock::Sleep;
use crate::config::{TransferMode, TransferOptions};
use crate::endpoint::Endpoint;
use crate::error::{Error, OpError};
use crate::local::LocalFs;
use crate::session::Session;
use crate::task::{Action, Direction, TaskState, TransferTask};

pub struct StagingEngine<'a> {
    session: &'a Session,
    local: &'a LocalFs,
    options: &'a TransferOptions,
    sleep: &'a dyn Sleep,
}

impl<'a> StagingEngine<'a> {
    pub fn new(
        session: &'a Session,
        local: &'a LocalFs,
        options: &'a TransferOptions,
        sleep: &'a dyn Sleep,
    ) -> Self {
        Self {
            session,
            local,
            options,
            sleep,
        }
    }

    /// (source, destination) endpoints for `direction`.
    fn sides(&self, direction: Direction) -> (&'a dyn Endpoint, &'a dyn Endpoint) {
        match direction {
            Direction::Upload => (self.local, self.session),
            Direction::Download => (self.session, self.local),
        }
    }

    /// Drive `task` to a terminal state. Never fails: errors are stored on the task.
    #[instrument(skip(self, task), fields(file = %task.file_name, direction = %task.direction))]
    pub async fn process(&self, task: &mut TransferTask) {
        match self.options.transfer_mode {
            TransferMode::Staged => self.process_staged(task).await,
            TransferMode::Direct => self.process_direct(task).await,
        }
        if task.state() == TaskState::Completed {
            tracing::info!("{} completed ({} bytes)", task.file_name, task.byte_length);
        } else if let Some(error) = task.error() {
            tracing::error!(
                "{} ended in {} ({:?} scope): {}",
                task.file_name,
                task.state(),
                error.scope(),
                error
            );
        }
    }

    async fn process_staged(&self, task: &mut TransferTask) {
        let (source, destination) = self.sides(task.direction);
        let source_path = source.join(&task.source_dir, &task.file_name);
        let source_staged = source.join(&task.source_dir, &task.staging_name);
        task.advance(TaskState::Staging);
        if let Err(error) = self.stage(task, source, &source_path).await {
            task.fail(TaskState::StagingFailed, error);
            return;
        }
        task.record(Action::Staged);
        task.advance(TaskState::Transferring);
        let staging_name = task.staging_name.clone();
        let file_name = task.file_name.clone();
        let transferred = match self
            .check_collision(
                destination,
                &task.destination_dir,
                &[staging_name.as_str(), file_name.as_str()],
            )
            .await
        {
            Ok(()) => self.copy_across(task, &staging_name).await,
            Err(error) => Err(error),
        };
        match transferred {
            Ok(bytes) => {
                self.note_size(task, bytes);
                task.record(Action::Transferred);
            }
            Err(error) => {
                self.revert_staging(task, source, &source_staged).await;
                task.fail(TaskState::TransferFailed, error);
                return;
            }
        }
        task.advance(TaskState::Finalizing);
        let mut failure = None;
        match source.remove(&source_staged).await {
            Ok(()) => task.record(Action::SourceRemoved),
            Err(error) => {
                tracing::warn!("staged source {} not removed: {}", source_staged, error);
                failure = Some(Error::cleanup(source_staged.clone(), error));
            }
        }
        match self.rename_at_destination(task, destination).await {
            Ok(()) => task.record(Action::RenamedAtDestination),
            Err(error) => {
                tracing::warn!("{}", error);
                failure.get_or_insert(error);
            }
        }
        match failure {
            Some(error) => task.fail(TaskState::FinalizeFailed, error),
            None => task.complete(),
        }
    }

    async fn process_direct(&self, task: &mut TransferTask) {
        let (source, destination) = self.sides(task.direction);
        let source_path = source.join(&task.source_dir, &task.file_name);
        task.advance(TaskState::Transferring);
        let file_name = task.file_name.clone();
        let transferred = match self
            .check_collision(destination, &task.destination_dir, &[file_name.as_str()])
            .await
        {
            Ok(()) => self.copy_across(task, &file_name).await,
            Err(error) => Err(error),
        };
        match transferred {
            Ok(bytes) => {
                self.note_size(task, bytes);
                task.record(Action::Transferred);
            }
            Err(error) => {
                task.fail(TaskState::TransferFailed, error);
                return;
            }
        }
        if self.options.remove_source_after_transfer {
            task.advance(TaskState::Finalizing);
            if let Err(error) = source.remove(&source_path).await {
                task.fail(
                    TaskState::FinalizeFailed,
                    Error::cleanup(source_path, error),
                );
                return;
            }
            task.record(Action::SourceRemoved);
        }
        task.complete();
    }

    /// Rename the source file to its staging name, retrying while it is locked.
    async fn stage(
        &self,
        task: &mut TransferTask,
        source: &dyn Endpoint,
        source_path: &str,
    ) -> Result<(), Error> {
        let retries = self.options.lock_retry_count;
        let delay = self.options.lock_retry_delay();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match source.rename(source_path, &task.staging_name).await {
                Ok(()) => {
                    tracing::debug!("staged {} as {}", source_path, task.staging_name);
                    return Ok(());
                }
                Err(OpError::Locked { .. }) if attempt <= retries => {
                    tracing::warn!(
                        "{} is locked (attempt {} of {}), retrying in {:?}",
                        source_path,
                        attempt,
                        retries + 1,
                        delay
                    );
                    self.sleep.sleep(delay).await;
                    task.advance(TaskState::Staging);
                }
                Err(OpError::Locked { .. }) => {
                    return Err(Error::LockContention {
                        path: source_path.to_string(),
                        attempts: attempt,
                    });
                }
                Err(OpError::AlreadyExists(staged)) => {
                    return Err(Error::Unexpected(anyhow::anyhow!(
                        "cannot stage {}: {} already exists on the {} side",
                        source_path,
                        staged,
                        source.label()
                    )));
                }
                Err(error) => {
                    return Err(Error::Unexpected(
                        anyhow::Error::new(error).context(format!("failed staging {source_path}")),
                    ));
                }
            }
        }
    }

    async fn check_collision(
        &self,
        destination: &dyn Endpoint,
        dir: &str,
        names: &[&str],
    ) -> Result<(), Error> {
        if self.options.overwrite_destination {
            return Ok(());
        }
        for name in names {
            let path = destination.join(dir, name);
            match destination.exists(&path).await {
                Ok(false) => {}
                Ok(true) => return Err(Error::Collision(path)),
                Err(error) => return Err(Error::transfer(path, error)),
            }
        }
        Ok(())
    }

    /// Copy `name` from the source directory into the destination directory.
    async fn copy_across(&self, task: &TransferTask, name: &str) -> Result<u64, Error> {
        let overwrite = self.options.overwrite_destination;
        let result = match task.direction {
            Direction::Upload => {
                let local_path = self.local.join(&task.source_dir, name);
                tracing::debug!("put {} -> {}", local_path, task.destination_dir);
                self.session
                    .put(
                        std::path::Path::new(&local_path),
                        &task.destination_dir,
                        overwrite,
                    )
                    .await
            }
            Direction::Download => {
                let remote_path = self.session.join(&task.source_dir, name);
                let local_path = self.local.join(&task.destination_dir, name);
                tracing::debug!("get {} -> {}", remote_path, local_path);
                self.session
                    .get(&remote_path, std::path::Path::new(&local_path), overwrite)
                    .await
            }
        };
        let (_, destination) = self.sides(task.direction);
        result.map_err(|error| match error {
            OpError::AlreadyExists(path) => Error::Collision(path),
            other => Error::transfer(destination.join(&task.destination_dir, name), other),
        })
    }

    async fn rename_at_destination(
        &self,
        task: &TransferTask,
        destination: &dyn Endpoint,
    ) -> Result<(), Error> {
        let staged = destination.join(&task.destination_dir, &task.staging_name);
        let target = destination.join(&task.destination_dir, &task.file_name);
        if self.options.overwrite_destination {
            match destination.exists(&target).await {
                Ok(true) => {
                    tracing::info!("replacing existing {}", target);
                    destination
                        .remove(&target)
                        .await
                        .map_err(|error| Error::cleanup(target.clone(), error))?;
                }
                Ok(false) => {}
                Err(error) => return Err(Error::cleanup(target, error)),
            }
        }
        destination
            .rename(&staged, &task.file_name)
            .await
            .map_err(|error| Error::cleanup(staged, error))
    }

    async fn revert_staging(&self, task: &mut TransferTask, source: &dyn Endpoint, staged: &str) {
        match source.rename(staged, &task.file_name).await {
            Ok(()) => task.record(Action::StagingReverted),
            Err(error) => tracing::error!(
                "transfer failed and staged source {} could not be restored: {}",
                staged,
                error
            ),
        }
    }

    fn note_size(&self, task: &mut TransferTask, bytes: u64) {
        if bytes != task.byte_length {
            tracing::debug!(
                "{} changed size during listing: {} -> {} bytes",
                task.file_name,
                task.byte_length,
                bytes
            );
            task.byte_length = bytes;
        }
    }
}
