//! Durable keyed append log holding each build's persisted output.
//!
//! The fan-out treats stored bytes as opaque: a build log is whatever
//! concatenation of chunks was appended for that build, in call order.

use async_trait::async_trait;
use bytes::Bytes;

use crate::build_id::BuildId;

mod file;
mod memory;

pub use file::FileLogStore;
pub use memory::MemoryLogStore;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Unavailable(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "log store io error: {}", e),
            StoreError::Unavailable(e) => write!(f, "log store unavailable: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Unavailable(_) => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e)
    }
}

/// Append/read byte service keyed by build.
///
/// Within one build, a read returns every chunk whose append completed
/// before the read began, in append order. A build that was never
/// appended to reads as empty.
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Read all bytes appended so far for `build`.
    async fn read(&self, build: BuildId) -> Result<Bytes, StoreError>;

    /// Atomically append one chunk to `build`'s log.
    async fn append(&self, build: BuildId, chunk: &[u8]) -> Result<(), StoreError>;
}
