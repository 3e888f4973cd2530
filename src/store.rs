//! Directory-backed [`ContentStore`].
//!
//! Object keys are `/`-separated paths under a root directory. Digests are
//! computed on listing by streaming each file through the core hasher, so
//! they are directly comparable with digests of remote content.
//!
//! Writes go to a hidden sibling file first and are renamed into place, so a
//! failed put never leaves a truncated object behind.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use bucket_sync_core::contract::{ByteStream, ContentStore};
use bucket_sync_core::error::StoreError;
use bucket_sync_core::hasher::digest_stream;

const STAGING_PREFIX: &str = ".bucket-sync-";

pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        info!(root = %root.display(), "Initialized FsContentStore");
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(StoreError::InvalidKey(key.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }

    /// Every stored key starting with `prefix`, with its file path.
    async fn keys_under(&self, prefix: &str) -> Result<Vec<(String, PathBuf)>, StoreError> {
        let mut found = Vec::new();
        if !fs::try_exists(&self.root)
            .await
            .map_err(|e| unavailable(&self.root.display().to_string(), e))?
        {
            debug!(root = %self.root.display(), "Store root missing, treating as empty");
            return Ok(found);
        }

        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, dir_key)) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| unavailable(&dir_key, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| unavailable(&dir_key, e))?
            {
                let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                    warn!(path = %entry.path().display(), "Skipping non UTF-8 file name");
                    continue;
                };
                if name.starts_with(STAGING_PREFIX) {
                    continue;
                }
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| unavailable(&name, e))?;
                if file_type.is_dir() {
                    let child_key = format!("{dir_key}{name}/");
                    // Only descend where keys can still match the prefix.
                    if prefix.starts_with(&child_key) || child_key.starts_with(prefix) {
                        pending.push((entry.path(), child_key));
                    }
                } else if file_type.is_file() {
                    let key = format!("{dir_key}{name}");
                    if key.starts_with(prefix) {
                        found.push((key, entry.path()));
                    }
                }
            }
        }
        Ok(found)
    }
}

fn unavailable(key: &str, e: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{key}: {e}"))
}

#[async_trait]
impl ContentStore for FsContentStore {
    async fn list_by_prefix(&self, prefix: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut digests = HashMap::new();
        for (key, path) in self.keys_under(prefix).await? {
            let file = File::open(&path).await.map_err(|e| unavailable(&key, e))?;
            let digest = digest_stream(Box::pin(ReaderStream::new(file)))
                .await
                .map_err(|e| unavailable(&key, e))?;
            let name = key[prefix.len()..].to_string();
            digests.insert(name, digest);
        }
        info!(prefix, count = digests.len(), "Listed stored objects");
        Ok(digests)
    }

    async fn get(&self, key: &str) -> Result<ByteStream, StoreError> {
        let path = self.path_for(key)?;
        let file = File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => StoreError::NotFound(key.to_string()),
            _ => unavailable(key, e),
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn put(&self, key: &str, mut content: ByteStream) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(StoreError::InvalidKey(key.to_string()));
        };
        fs::create_dir_all(parent)
            .await
            .map_err(|e| unavailable(key, e))?;
        let staging = parent.join(format!(
            "{STAGING_PREFIX}{}.tmp",
            file_name.to_string_lossy()
        ));

        let written = async {
            let mut file = File::create(&staging)
                .await
                .map_err(|e| unavailable(key, e))?;
            let mut size: u64 = 0;
            while let Some(chunk) = content.next().await {
                let chunk = chunk.map_err(|e| StoreError::Interrupted {
                    key: key.to_string(),
                    reason: e.to_string(),
                })?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| unavailable(key, e))?;
                size += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| unavailable(key, e))?;
            fs::rename(&staging, &path)
                .await
                .map_err(|e| unavailable(key, e))?;
            Ok::<u64, StoreError>(size)
        }
        .await;

        match written {
            Ok(size) => {
                debug!(key, size, "Stored object");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_file(&staging).await {
                    if cleanup.kind() != ErrorKind::NotFound {
                        warn!(key, error = %cleanup, "Failed to remove staging file");
                    }
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(unavailable(key, e)),
        }
    }
}
