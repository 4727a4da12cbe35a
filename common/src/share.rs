//! `file://` transport for endpoints reachable as a mounted directory (NFS, SMB, removable
//! media). Remote paths are slash separated and resolved under the mount root.

use async_trait::async_trait;

use crate::endpoint::{Endpoint, Entry, Transport, join_slash};
use crate::error::OpError;
use crate::local;

#[derive(Debug)]
pub struct ShareTransport {
    root: std::path::PathBuf,
    connected: bool,
}

impl ShareTransport {
    /// Open the share rooted at `root`; the root itself must exist.
    pub async fn connect(root: &std::path::Path) -> anyhow::Result<Self> {
        let metadata = tokio::fs::metadata(root)
            .await
            .map_err(|error| anyhow::anyhow!("share root {:?} is not reachable: {}", root, error))?;
        if !metadata.is_dir() {
            anyhow::bail!("share root {:?} is not a directory", root);
        }
        tracing::debug!("share {:?} connected", root);
        Ok(Self {
            root: root.to_path_buf(),
            connected: true,
        })
    }

    fn resolve(&self, remote: &str) -> std::path::PathBuf {
        let relative = remote.trim_start_matches('/');
        if relative.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }
}

#[async_trait]
impl Endpoint for ShareTransport {
    fn label(&self) -> &'static str {
        "remote"
    }

    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError> {
        local::list_dir(&self.resolve(dir)).await.map_err(|error| match error {
            OpError::NotFound(_) => OpError::NotFound(dir.to_string()),
            other => other,
        })
    }

    async fn exists(&self, path: &str) -> Result<bool, OpError> {
        tokio::fs::try_exists(self.resolve(path))
            .await
            .map_err(|error| OpError::from_io(path, error))
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError> {
        local::rename_in_place(&self.resolve(path), new_name).await
    }

    async fn remove(&self, path: &str) -> Result<(), OpError> {
        tokio::fs::remove_file(self.resolve(path))
            .await
            .map_err(|error| OpError::from_io(path, error))
    }

    async fn create_dir(&self, path: &str) -> Result<(), OpError> {
        tokio::fs::create_dir_all(self.resolve(path))
            .await
            .map_err(|error| OpError::from_io(path, error))
    }
}

#[async_trait]
impl Transport for ShareTransport {
    async fn get(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        local::copy_file(&self.resolve(remote_path), local_path, overwrite).await
    }

    async fn put(
        &self,
        local_path: &std::path::Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        let name = local_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("{:?} has no file name", local_path))?;
        let target = self.resolve(remote_dir).join(name);
        local::copy_file(local_path, &target, overwrite).await
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        if self.connected {
            tracing::debug!("share {:?} disconnected", self.root);
            self.connected = false;
        }
        Ok(())
    }
}

/// Name of the file a `put` of `local_path` creates, as seen on the remote side.
pub fn put_target(local_path: &std::path::Path, remote_dir: &str) -> Option<String> {
    let name = local_path.file_name()?.to_str()?;
    Some(join_slash(remote_dir, name))
}
