//! Endpoint abstraction shared by the local filesystem and remote transports.
//!
//! The staging engine never cares which side is local: it talks to an [`Endpoint`] for
//! the source and one for the destination, and only the byte copy itself goes through the
//! [`Transport`] (`get`/`put`).

use async_trait::async_trait;

use crate::config::{Credentials, EndpointTarget};
use crate::error::OpError;

/// A plain file found while listing a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub size: u64,
}

/// Directory-level operations available on both sides of a transfer.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Short label used in logs ("local", "remote").
    fn label(&self) -> &'static str;

    /// Join a directory and a file name using this side's separator.
    fn join(&self, dir: &str, name: &str) -> String {
        join_slash(dir, name)
    }

    /// List plain files directly inside `dir`. Subdirectories are not reported.
    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError>;

    async fn exists(&self, path: &str) -> Result<bool, OpError>;

    /// Rename `path` to `new_name` within the same directory.
    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError>;

    async fn remove(&self, path: &str) -> Result<(), OpError>;

    /// Create `path` and any missing parents.
    async fn create_dir(&self, path: &str) -> Result<(), OpError>;
}

/// A connected remote client.
#[async_trait]
pub trait Transport: Endpoint {
    /// Copy `remote_path` to the local file `local_path`; returns bytes copied.
    async fn get(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        overwrite: bool,
    ) -> Result<u64, OpError>;

    /// Copy the local file into `remote_dir`, keeping its file name; returns bytes copied.
    async fn put(
        &self,
        local_path: &std::path::Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<u64, OpError>;

    async fn disconnect(&mut self) -> anyhow::Result<()>;
}

/// Opens transports for a target.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &EndpointTarget,
        credentials: &Credentials,
    ) -> anyhow::Result<Box<dyn Transport>>;
}

pub fn join_slash(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last component of a slash separated path.
pub fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// Everything up to the last slash; empty for a bare name.
pub fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => "",
    }
}
