//! Registry of fan-outs, one per tracked build.
//!
//! A build's fan-out is created on first use and moves to the finished set
//! when the build's log stream is closed. Later lookups of a finished build
//! return that same closed instance: viewers still receive the full backlog
//! but are never left waiting on a stream that has ended, and writes keep
//! going through the build's single lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::build_id::BuildId;
use crate::fanout::{FanoutConfig, FanoutError, LogFanout};
use crate::store::LogStore;

#[derive(Default)]
struct Builds {
    live: HashMap<BuildId, Arc<LogFanout>>,
    finished: HashMap<BuildId, Arc<LogFanout>>,
}

pub struct FanoutRegistry {
    store: Arc<dyn LogStore>,
    config: FanoutConfig,
    builds: Mutex<Builds>,
}

impl FanoutRegistry {
    pub fn new(store: Arc<dyn LogStore>, config: FanoutConfig) -> Self {
        Self {
            store,
            config,
            builds: Mutex::new(Builds::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LogStore> {
        &self.store
    }

    /// The one fan-out for `build`: the finished instance if the build has
    /// ended, otherwise the live one, created on first use.
    pub fn get_or_create(&self, build: BuildId) -> Arc<LogFanout> {
        let mut builds = self.lock();
        if let Some(fanout) = builds.finished.get(&build) {
            return fanout.clone();
        }
        builds
            .live
            .entry(build)
            .or_insert_with(|| {
                debug!(build_id = %build, "tracking build log");
                Arc::new(LogFanout::with_config(
                    build,
                    self.store.clone(),
                    self.config.clone(),
                ))
            })
            .clone()
    }

    /// Live fan-out for `build`, if one is tracked.
    pub fn get(&self, build: BuildId) -> Option<Arc<LogFanout>> {
        self.lock().live.get(&build).cloned()
    }

    /// Close `build`'s live fan-out and keep it as the build's finished one.
    ///
    /// Returns `Ok(false)` and records nothing when the build was never
    /// tracked, and `FanoutError::ClosedTwice` when it already finished.
    pub async fn close(&self, build: BuildId) -> Result<bool, FanoutError> {
        let fanout = {
            let mut builds = self.lock();
            if builds.finished.contains_key(&build) {
                return Err(FanoutError::ClosedTwice);
            }
            match builds.live.remove(&build) {
                Some(fanout) => {
                    builds.finished.insert(build, fanout.clone());
                    fanout
                }
                None => return Ok(false),
            }
        };

        fanout.close().await?;
        Ok(true)
    }

    /// Close every live fan-out, e.g. on server shutdown.
    pub async fn close_all(&self) {
        let fanouts: Vec<_> = {
            let mut builds = self.lock();
            let live: Vec<_> = builds.live.drain().collect();
            builds
                .finished
                .extend(live.iter().map(|(build, fanout)| (*build, fanout.clone())));
            live.into_iter().map(|(_, fanout)| fanout).collect()
        };
        for fanout in fanouts {
            if let Err(e) = fanout.close().await {
                debug!(build_id = %fanout.build_id(), error = %e, "fanout already closed");
            }
        }
    }

    pub fn is_finished(&self, build: BuildId) -> bool {
        self.lock().finished.contains_key(&build)
    }

    /// Number of live fan-outs.
    pub fn len(&self) -> usize {
        self.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // The maps hold no invariants a panicking holder could break.
    fn lock(&self) -> MutexGuard<'_, Builds> {
        self.builds.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
