//! Local filesystem side of a transfer, built on `tokio::fs`.

use async_trait::async_trait;

use crate::endpoint::{Endpoint, Entry};
use crate::error::OpError;

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl LocalFs {
    pub fn new() -> Self {
        Self
    }
}

fn display(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

#[async_trait]
impl Endpoint for LocalFs {
    fn label(&self) -> &'static str {
        "local"
    }

    fn join(&self, dir: &str, name: &str) -> String {
        display(&std::path::Path::new(dir).join(name))
    }

    async fn list_entries(&self, dir: &str) -> Result<Vec<Entry>, OpError> {
        list_dir(std::path::Path::new(dir)).await
    }

    async fn exists(&self, path: &str) -> Result<bool, OpError> {
        tokio::fs::try_exists(path)
            .await
            .map_err(|error| OpError::from_io(path, error))
    }

    async fn rename(&self, path: &str, new_name: &str) -> Result<(), OpError> {
        rename_in_place(std::path::Path::new(path), new_name).await
    }

    async fn remove(&self, path: &str) -> Result<(), OpError> {
        tracing::debug!("removing local file {}", path);
        tokio::fs::remove_file(path)
            .await
            .map_err(|error| OpError::from_io(path, error))
    }

    async fn create_dir(&self, path: &str) -> Result<(), OpError> {
        tracing::info!("creating local directory {}", path);
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|error| OpError::from_io(path, error))
    }
}

/// List the plain files of `dir`, following symlinks; names that are not valid UTF-8 are skipped.
pub async fn list_dir(dir: &std::path::Path) -> Result<Vec<Entry>, OpError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|error| OpError::from_io(display(dir), error))?;
    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|error| OpError::from_io(display(dir), error))?
    {
        let path = entry.path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            // vanished between readdir and stat
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => continue,
            Err(error) => return Err(OpError::from_io(display(&path), error)),
        };
        if !metadata.is_file() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => files.push(Entry {
                name,
                size: metadata.len(),
            }),
            Err(name) => tracing::warn!("skipping non UTF-8 file name {:?} in {:?}", name, dir),
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Rename within the parent directory. Refuses to replace an existing target.
pub async fn rename_in_place(path: &std::path::Path, new_name: &str) -> Result<(), OpError> {
    let target = match path.parent() {
        Some(parent) => parent.join(new_name),
        None => std::path::PathBuf::from(new_name),
    };
    if tokio::fs::try_exists(&target)
        .await
        .map_err(|error| OpError::from_io(display(&target), error))?
    {
        return Err(OpError::AlreadyExists(display(&target)));
    }
    tracing::debug!("renaming {:?} -> {:?}", path, target);
    tokio::fs::rename(path, &target)
        .await
        .map_err(|error| OpError::from_io(display(path), error))
}

/// Copy a single file. Without `overwrite` the destination is created exclusively.
pub async fn copy_file(
    src: &std::path::Path,
    dst: &std::path::Path,
    overwrite: bool,
) -> Result<u64, OpError> {
    let mut reader = tokio::fs::File::open(src)
        .await
        .map_err(|error| OpError::from_io(display(src), error))?;
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    let mut writer = options
        .open(dst)
        .await
        .map_err(|error| OpError::from_io(display(dst), error))?;
    let copied = tokio::io::copy(&mut reader, &mut writer)
        .await
        .map_err(|error| OpError::from_io(display(dst), error))?;
    writer
        .sync_all()
        .await
        .map_err(|error| OpError::from_io(display(dst), error))?;
    Ok(copied)
}
