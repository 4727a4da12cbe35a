//! In-memory transport and connector with fault injection, shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::clock::Sleep;
use crate::config::{Credentials, EndpointTarget, Job, TransferOptions};
use crate::endpoint::{Connector, Endpoint, Entry, Transport, base_name, join_slash, parent_dir};
use crate::error::OpError;
use crate::task::Direction;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub opened: usize,
    pub closed: usize,
    pub gets: usize,
    pub puts: usize,
}

#[derive(Debug, Default)]
struct State {
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    locked: HashMap<String, u32>,
    failing_renames: HashSet<String>,
    failing_removals: HashSet<String>,
    failing_transfers: HashSet<String>,
    failing_listings: HashSet<String>,
    stats: Stats,
}

impl State {
    fn add_dir(&mut self, dir: &str) {
        let mut current = dir.trim_end_matches('/').to_string();
        while !current.is_empty() && current != "/" {
            let parent = parent_dir(&current).to_string();
            self.dirs.insert(current);
            current = parent;
        }
        self.dirs.insert("/".to_string());
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.dirs.contains(path.trim_end_matches('/'))
    }
}

/// Remote side kept in memory. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<State>>,
}

impl MemoryTransport {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn add_file(&self, path: &str, bytes: &[u8]) {
        let mut state = self.lock();
        state.add_dir(parent_dir(path));
        state.files.insert(path.to_string(), bytes.to_vec());
    }

    pub fn add_dir(&self, dir: &str) {
        self.lock().add_dir(dir);
    }

    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.lock().files.get(path).cloned()
    }

    /// Sorted names of the files directly inside `dir`.
    pub fn file_names(&self, dir: &str) -> Vec<String> {
        let dir = dir.trim_end_matches('/');
        self.lock()
            .files
            .keys()
            .filter(|path| parent_dir(path) == dir)
            .map(|path| base_name(path).to_string())
            .collect()
    }

    /// Refuse the next `times` renames of `path` as locked.
    pub fn lock_rename(&self, path: &str, times: u32) {
        self.lock().locked.insert(path.to_string(), times);
    }

    pub fn fail_rename(&self, path: &str) {
        self.lock().failing_renames.insert(path.to_string());
    }

    pub fn fail_remove(&self, path: &str) {
        self.lock().failing_removals.insert(path.to_string());
    }

    /// Fail `get` of this remote path, or `put` whose remote target is this path.
    pub fn fail_transfer(&self, path: &str) {
        self.lock().failing_transfers.insert(path.to_string());
    }

    pub fn fail_list(&self, dir: &str) {
        self.lock().failing_listings.insert(dir.to_string());
    }

    pub fn stats(&self) -> Stats {
        self.lock().stats
    }
}

#[async_trait]
impl Endpoint for MemoryTransport {
    fn label(&self) -> &'static str {
        "memory"
    }

    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError> {
        let state = self.lock();
        let dir = dir.trim_end_matches('/');
        if state.failing_listings.contains(dir) {
            return Err(anyhow::anyhow!("listing {dir} refused").into());
        }
        if !state.dirs.contains(dir) {
            return Err(OpError::NotFound(dir.to_string()));
        }
        Ok(state
            .files
            .iter()
            .filter(|(path, _)| parent_dir(path) == dir)
            .map(|(path, bytes)| Entry {
                name: base_name(path).to_string(),
                size: bytes.len() as u64,
            })
            .collect())
    }

    async fn exists(&self, path: &str) -> Result<bool, OpError> {
        Ok(self.lock().exists(path))
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError> {
        let mut state = self.lock();
        if let Some(remaining) = state.locked.get_mut(path)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(OpError::Locked {
                path: path.to_string(),
                source: anyhow::anyhow!("sharing violation"),
            });
        }
        if state.failing_renames.contains(path) {
            return Err(anyhow::anyhow!("rename of {path} refused").into());
        }
        let target = join_slash(parent_dir(path), new_name);
        if state.exists(&target) {
            return Err(OpError::AlreadyExists(target));
        }
        let bytes = state
            .files
            .remove(path)
            .ok_or_else(|| OpError::NotFound(path.to_string()))?;
        state.files.insert(target, bytes);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), OpError> {
        let mut state = self.lock();
        if state.failing_removals.contains(path) {
            return Err(anyhow::anyhow!("removal of {path} refused").into());
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| OpError::NotFound(path.to_string()))
    }

    async fn create_dir(&self, path: &str) -> Result<(), OpError> {
        self.lock().add_dir(path);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn get(
        &self,
        remote_path: &str,
        local_path: &std::path::Path,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        let bytes = {
            let mut state = self.lock();
            state.stats.gets += 1;
            if state.failing_transfers.contains(remote_path) {
                return Err(anyhow::anyhow!("connection reset while reading {remote_path}").into());
            }
            state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| OpError::NotFound(remote_path.to_string()))?
        };
        let display = local_path.display().to_string();
        if !overwrite && tokio::fs::try_exists(local_path).await.unwrap_or(false) {
            return Err(OpError::AlreadyExists(display));
        }
        tokio::fs::write(local_path, &bytes)
            .await
            .map_err(|error| OpError::from_io(display, error))?;
        Ok(bytes.len() as u64)
    }

    async fn put(
        &self,
        local_path: &std::path::Path,
        remote_dir: &str,
        overwrite: bool,
    ) -> Result<u64, OpError> {
        let display = local_path.display().to_string();
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|error| OpError::from_io(display.clone(), error))?;
        let name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| OpError::Other(anyhow::anyhow!("{display} has no file name")))?;
        let target = join_slash(remote_dir, name);
        let mut state = self.lock();
        state.stats.puts += 1;
        if state.failing_transfers.contains(&target) {
            return Err(anyhow::anyhow!("connection reset while writing {target}").into());
        }
        if !state.dirs.contains(remote_dir.trim_end_matches('/')) {
            return Err(OpError::NotFound(remote_dir.to_string()));
        }
        if !overwrite && state.exists(&target) {
            return Err(OpError::AlreadyExists(target));
        }
        let size = bytes.len() as u64;
        state.files.insert(target, bytes);
        Ok(size)
    }

    async fn disconnect(&mut self) -> anyhow::Result<()> {
        self.lock().stats.closed += 1;
        Ok(())
    }
}

/// Hands out handles to one shared [`MemoryTransport`].
#[derive(Debug, Default)]
pub struct MemoryConnector {
    transport: MemoryTransport,
    connect_error: Mutex<Option<String>>,
}

impl MemoryConnector {
    pub fn transport(&self) -> MemoryTransport {
        self.transport.clone()
    }

    pub fn fail_connect(&self, message: &str) {
        *self.connect_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn stats(&self) -> Stats {
        self.transport.stats()
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _target: &EndpointTarget,
        _credentials: &Credentials,
    ) -> anyhow::Result<Box<dyn Transport>> {
        if let Some(message) = self.connect_error.lock().unwrap().clone() {
            anyhow::bail!("{message}");
        }
        self.transport.lock().stats.opened += 1;
        Ok(Box::new(self.transport.clone()))
    }
}

pub fn target() -> EndpointTarget {
    EndpointTarget {
        address: "mem://share".into(),
    }
}

/// Job against the memory endpoint: uploads go to `/in`, downloads come from `/out`.
pub fn job(direction: Direction) -> Job {
    Job {
        name: format!("{direction}-job"),
        direction,
        endpoint: target(),
        credentials: Credentials {
            user: "svc".into(),
            secret: None,
        },
        remote_path: match direction {
            Direction::Upload => "/in".into(),
            Direction::Download => "/out".into(),
        },
        local_path: "/data".into(),
        options: TransferOptions::default(),
        worker: None,
    }
}

/// Records requested delays instead of waiting.
#[derive(Debug, Default)]
pub struct RecordingSleep {
    delays: Mutex<Vec<std::time::Duration>>,
}

impl RecordingSleep {
    pub fn delays(&self) -> Vec<std::time::Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleep for RecordingSleep {
    async fn sleep(&self, duration: std::time::Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}
