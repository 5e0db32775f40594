//! LogFanout: persists one build's log messages and streams them to viewers.
//!
//! A single async mutex serializes every state transition. `write_message`
//! appends to the store before broadcasting, and `attach` holds the lock from
//! the backlog read through registration, so a viewer sees each message
//! exactly once: either in its backfill or in a live broadcast, never both.

use serde_json::value::RawValue;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::build_id::BuildId;
use crate::sink::{Sink, SinkError};
use crate::store::{LogStore, StoreError};

mod backlog;
mod legacy;

pub use backlog::Backlog;
pub use legacy::{emit_backwards_compatible, LegacyFrames, LEGACY_CHUNK_SIZE, LEGACY_HANDSHAKE};

#[derive(Debug)]
pub enum FanoutError {
    Store(StoreError),
    Sink(SinkError),
    SendTimeout(Duration),
    ClosedTwice,
}

impl std::fmt::Display for FanoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FanoutError::Store(e) => write!(f, "persist failed: {}", e),
            FanoutError::Sink(e) => write!(f, "send failed: {}", e),
            FanoutError::SendTimeout(d) => write!(f, "send timed out after {:?}", d),
            FanoutError::ClosedTwice => write!(f, "close twice"),
        }
    }
}

impl std::error::Error for FanoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FanoutError::Store(e) => Some(e),
            FanoutError::Sink(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for FanoutError {
    fn from(e: StoreError) -> Self {
        FanoutError::Store(e)
    }
}

/// Fan-out tuning.
#[derive(Clone, Debug)]
pub struct FanoutConfig {
    /// Upper bound on any single send to a sink. A broadcast send that runs
    /// over drops the sink; a backfill send that runs over fails the attach.
    /// `None` waits forever.
    pub send_timeout: Option<Duration>,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            send_timeout: Some(Duration::from_secs(10)),
        }
    }
}

struct FanoutState {
    sinks: Vec<Box<dyn Sink>>,
    /// Monotonic. While set, `sinks` stays empty.
    closed: bool,
}

pub struct LogFanout {
    build: BuildId,
    store: Arc<dyn LogStore>,
    config: FanoutConfig,
    state: Mutex<FanoutState>,
}

impl LogFanout {
    pub fn new(build: BuildId, store: Arc<dyn LogStore>) -> Self {
        Self::with_config(build, store, FanoutConfig::default())
    }

    pub fn with_config(build: BuildId, store: Arc<dyn LogStore>, config: FanoutConfig) -> Self {
        Self {
            build,
            store,
            config,
            state: Mutex::new(FanoutState {
                sinks: Vec::new(),
                closed: false,
            }),
        }
    }

    pub fn build_id(&self) -> BuildId {
        self.build
    }

    /// Persist `msg`, then push it to every live sink.
    ///
    /// Only persistence failures are returned. Sinks that fail or time out are
    /// dropped from the live set and closed; the rest keep their order.
    pub async fn write_message(&self, msg: &RawValue) -> Result<(), FanoutError> {
        let mut state = self.state.lock().await;

        self.store.append(self.build, &stored_form(msg)).await?;

        let sinks = std::mem::take(&mut state.sinks);
        let mut live = Vec::with_capacity(sinks.len());
        for mut sink in sinks {
            match bounded(self.config.send_timeout, sink.send_structured(msg)).await {
                Ok(()) => live.push(sink),
                Err(e) => {
                    debug!(build_id = %self.build, error = %e, "dropping sink");
                    self.close_quietly(sink.as_mut()).await;
                }
            }
        }
        state.sinks = live;

        Ok(())
    }

    /// Replay the persisted backlog to `sink`, then register it for live
    /// broadcasts, or close it if the fan-out has already been closed.
    ///
    /// A failed backlog read counts as an empty backlog. A failed backfill
    /// send is returned and the sink is closed without being registered.
    pub async fn attach(&self, mut sink: Box<dyn Sink>) -> Result<(), FanoutError> {
        let mut state = self.state.lock().await;

        match self.store.read(self.build).await {
            Ok(log) => {
                if let Err(e) = self.replay(sink.as_mut(), Backlog::decode(log)).await {
                    debug!(build_id = %self.build, error = %e, "backfill failed");
                    self.close_quietly(sink.as_mut()).await;
                    return Err(e);
                }
            }
            Err(e) => {
                warn!(
                    build_id = %self.build,
                    error = %e,
                    "failed to read build log, skipping backfill"
                );
            }
        }

        if state.closed {
            self.close_quietly(sink.as_mut()).await;
        } else {
            state.sinks.push(sink);
            debug!(build_id = %self.build, sinks = state.sinks.len(), "sink attached");
        }

        Ok(())
    }

    /// Close every live sink and stop registering new ones. A second call
    /// fails with `FanoutError::ClosedTwice` and changes nothing.
    pub async fn close(&self) -> Result<(), FanoutError> {
        let mut state = self.state.lock().await;

        if state.closed {
            return Err(FanoutError::ClosedTwice);
        }

        let sinks = std::mem::take(&mut state.sinks);
        info!(build_id = %self.build, sinks = sinks.len(), "closing log fanout");
        for mut sink in sinks {
            self.close_quietly(sink.as_mut()).await;
        }
        state.closed = true;

        Ok(())
    }

    /// Number of sinks currently receiving live broadcasts.
    pub async fn live_sinks(&self) -> usize {
        self.state.lock().await.sinks.len()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn replay(&self, sink: &mut dyn Sink, backlog: Backlog) -> Result<(), FanoutError> {
        match backlog {
            Backlog::Structured(messages) => {
                for msg in &messages {
                    bounded(self.config.send_timeout, sink.send_structured(msg)).await?;
                }
                debug!(build_id = %self.build, messages = messages.len(), "backfill complete");
            }
            Backlog::Legacy(log) => {
                info!(build_id = %self.build, bytes = log.len(), "replaying legacy build log");
                emit_backwards_compatible(sink, &log, self.config.send_timeout).await;
            }
        }
        Ok(())
    }

    async fn close_quietly(&self, sink: &mut dyn Sink) {
        if let Err(e) = bounded(self.config.send_timeout, sink.close()).await {
            debug!(build_id = %self.build, error = %e, "sink close failed");
        }
    }
}

/// Bytes appended for one message. The trailing newline keeps scalars like
/// `1` and `2` from running together into `12` in the stored log.
fn stored_form(msg: &RawValue) -> Vec<u8> {
    let mut chunk = Vec::with_capacity(msg.get().len() + 1);
    chunk.extend_from_slice(msg.get().as_bytes());
    chunk.push(b'\n');
    chunk
}

/// Run one sink operation under the optional send timeout.
pub(crate) async fn bounded<F>(limit: Option<Duration>, op: F) -> Result<(), FanoutError>
where
    F: Future<Output = Result<(), SinkError>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, op).await {
            Ok(result) => result.map_err(FanoutError::Sink),
            Err(_) => Err(FanoutError::SendTimeout(limit)),
        },
        None => op.await.map_err(FanoutError::Sink),
    }
}
