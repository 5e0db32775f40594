use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{LogStore, StoreError};
use crate::build_id::BuildId;

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryLogStore {
    logs: Mutex<HashMap<BuildId, Vec<u8>>>,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a build's log with raw bytes, replacing anything stored.
    pub fn insert(&self, build: BuildId, log: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        let mut logs = self.lock()?;
        logs.insert(build, log.into());
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<BuildId, Vec<u8>>>, StoreError> {
        self.logs
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn read(&self, build: BuildId) -> Result<Bytes, StoreError> {
        let logs = self.lock()?;
        Ok(logs
            .get(&build)
            .map(|log| Bytes::copy_from_slice(log))
            .unwrap_or_default())
    }

    async fn append(&self, build: BuildId, chunk: &[u8]) -> Result<(), StoreError> {
        let mut logs = self.lock()?;
        logs.entry(build).or_default().extend_from_slice(chunk);
        Ok(())
    }
}
