use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::{LogStore, StoreError};
use crate::build_id::BuildId;

/// One append-only file per build under a data directory.
pub struct FileLogStore {
    dir: PathBuf,
    /// Flush each chunk to disk before `append` returns.
    sync: bool,
}

impl FileLogStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "opened file log store");
        Ok(Self { dir, sync: true })
    }

    /// Skip the per-append fsync. Appends stay ordered but may be lost on crash.
    pub fn without_sync(mut self) -> Self {
        self.sync = false;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, build: BuildId) -> PathBuf {
        self.dir.join(build.log_file_name())
    }
}

#[async_trait]
impl LogStore for FileLogStore {
    async fn read(&self, build: BuildId) -> Result<Bytes, StoreError> {
        match fs::read(self.path_for(build)).await {
            Ok(log) => Ok(Bytes::from(log)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Bytes::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn append(&self, build: BuildId, chunk: &[u8]) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(build))
            .await?;
        file.write_all(chunk).await?;
        file.flush().await?;
        if self.sync {
            file.sync_data().await?;
        }
        Ok(())
    }
}
