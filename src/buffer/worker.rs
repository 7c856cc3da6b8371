//! Background Buffer Worker
//!
//! Single consumer of the manager's work queue. Each item is checked against
//! the tiers first (it may have been cached or promoted since it was
//! queued), then handed to the [`ChunkProcessor`] and stored in the tier its
//! priority names. Failures are logged and the item dropped; a later
//! planning pass re-queues anything still wanted.
//!
//! # Lifecycle
//!
//! ```text
//! Stopped --start()--> Running --stop()--> Stopping --(in-flight done)--> Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::manager::{BufferManager, Coverage};
use super::queue::WorkItem;
use crate::error::{Error, Result};
use crate::processor::ChunkProcessor;

/// Poll interval used by [`BufferWorker::wait_idle`]
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Stopped,
    Running,
    Stopping,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Drains the prefetch queue in the background
pub struct BufferWorker {
    manager: Arc<BufferManager>,
    processor: Arc<dyn ChunkProcessor>,
    state: Mutex<WorkerState>,
    cancel: Mutex<Option<CancellationToken>>,
    handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BufferWorker {
    /// Create a stopped worker
    pub fn new(manager: Arc<BufferManager>, processor: Arc<dyn ChunkProcessor>) -> Self {
        Self {
            manager,
            processor,
            state: Mutex::new(WorkerState::Stopped),
            cancel: Mutex::new(None),
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == WorkerState::Running
    }

    /// Spawn the drain loop on the current tokio runtime
    pub fn start(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != WorkerState::Stopped {
            return Err(Error::WorkerState(format!("cannot start worker while {}", *state)));
        }

        // Held by stop() while it joins the previous task
        let mut slot = self
            .handle
            .try_lock()
            .map_err(|_| Error::WorkerState("previous run is still shutting down".to_string()))?;

        let token = CancellationToken::new();
        *slot = Some(tokio::spawn(run(
            Arc::clone(&self.manager),
            Arc::clone(&self.processor),
            token.clone(),
        )));
        *self.cancel.lock() = Some(token);

        *state = WorkerState::Running;
        self.manager.worker_health().set_running(true);
        info!(pending = self.manager.pending_work(), "Buffer worker started");
        Ok(())
    }

    /// Signal cancellation and wait for the in-flight item to finish.
    ///
    /// Safe to call in any state.
    pub async fn stop(&self) -> Result<()> {
        let mut handle = self.handle.lock().await;

        {
            let mut state = self.state.lock();
            if *state == WorkerState::Running {
                *state = WorkerState::Stopping;
            }
        }
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }

        let result = match handle.take() {
            Some(join) => join
                .await
                .map_err(|e| Error::Internal(format!("buffer worker task failed: {}", e))),
            None => Ok(()),
        };

        *self.state.lock() = WorkerState::Stopped;
        self.manager.worker_health().set_running(false);
        info!(pending = self.manager.pending_work(), "Buffer worker stopped");
        result
    }

    /// Wait until the queue is empty and nothing is in flight.
    ///
    /// Returns false if `timeout` elapsed first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let queue = self.manager.queue();
        let idle = async {
            while !queue.is_idle() {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, idle).await.is_ok()
    }
}

impl Drop for BufferWorker {
    fn drop(&mut self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }
}

impl std::fmt::Debug for BufferWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferWorker")
            .field("state", &self.state())
            .field("in_progress", &self.manager.queue().in_progress())
            .finish()
    }
}

async fn run(
    manager: Arc<BufferManager>,
    processor: Arc<dyn ChunkProcessor>,
    cancel: CancellationToken,
) {
    debug!("Buffer worker loop entered");
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = manager.queue().next() => item,
        };

        process_item(&manager, processor.as_ref(), item).await;
        manager.queue().finish();
    }
    debug!("Buffer worker loop exited");
}

async fn process_item(manager: &BufferManager, processor: &dyn ChunkProcessor, item: WorkItem) {
    let key = item.key();
    let metrics = manager.metrics();
    let health = manager.worker_health();

    let coverage = manager.cover(key, item.priority(), item.probability());
    if coverage != Coverage::Missing {
        metrics.record_skipped();
        trace!(%key, ?coverage, "Work item already satisfied");
        return;
    }

    let result = processor
        .process(key.track_id(), key.chunk_index(), key.preset(), key.intensity())
        .await;

    match result {
        Ok(data) => {
            let size = data.len() as u64;
            match manager.store(&item, data) {
                Ok(()) => {
                    metrics.record_processed(size);
                    health.record_success();
                    trace!(%key, tier = %item.priority(), size, "Chunk processed");
                }
                Err(e) => {
                    metrics.record_failed();
                    health.record_failure();
                    error!(
                        %key,
                        tier = %item.priority(),
                        error = %e,
                        "Processed chunk could not be stored"
                    );
                }
            }
        }
        Err(e) => {
            metrics.record_failed();
            health.record_failure();
            warn!(%key, error = %e, "Chunk processing failed, dropping work item");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::tier::TierLevel;
    use crate::config::BufferConfig;
    use crate::predict::Preset;
    use crate::processor::SyntheticProcessor;
    use assert_matches::assert_matches;

    fn manager() -> Arc<BufferManager> {
        Arc::new(BufferManager::new(BufferConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let worker = BufferWorker::new(manager(), Arc::new(SyntheticProcessor::new(8)));
        assert_eq!(worker.state(), WorkerState::Stopped);

        worker.start().unwrap();
        assert!(worker.is_running());
        assert_matches!(worker.start(), Err(Error::WorkerState(_)));

        worker.stop().await.unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Stop is idempotent and restart works
        worker.stop().await.unwrap();
        worker.start().unwrap();
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_drains_queue_into_tiers() {
        let manager = manager();
        let worker = BufferWorker::new(Arc::clone(&manager), Arc::new(SyntheticProcessor::new(64)));

        manager.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        worker.start().unwrap();
        assert!(worker.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(manager.check("t", 0, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.check("t", 1, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.check("t", 6, Preset::Adaptive), Some(TierLevel::Cold));
        assert!(manager.health().last_success.is_some());

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_worker() {
        let manager = manager();
        let processor = Arc::new(SyntheticProcessor::new(16).failing_on(0));
        let worker = BufferWorker::new(Arc::clone(&manager), processor);

        manager.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        worker.start().unwrap();
        assert!(worker.wait_idle(Duration::from_secs(5)).await);

        assert_eq!(manager.check("t", 0, Preset::Adaptive), None);
        assert_eq!(manager.check("t", 1, Preset::Adaptive), Some(TierLevel::Hot));
        assert!(manager.metrics().failed() > 0);
        assert!(worker.is_running());

        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_lets_in_flight_item_finish() {
        let manager = manager();
        let processor =
            Arc::new(SyntheticProcessor::new(16).with_latency(Duration::from_millis(100)));
        let worker = BufferWorker::new(
            Arc::clone(&manager),
            Arc::clone(&processor) as Arc<dyn ChunkProcessor>,
        );

        manager.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        let queued = manager.pending_work();
        worker.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        worker.stop().await.unwrap();
        assert_eq!(processor.calls(), 1);
        assert_eq!(manager.check("t", 0, Preset::Adaptive), Some(TierLevel::Hot));
        assert_eq!(manager.pending_work(), queued - 1);
        assert!(!manager.health().worker_running);
    }

    #[tokio::test]
    async fn test_skips_items_already_cached() {
        let manager = manager();
        let processor = Arc::new(SyntheticProcessor::new(16));
        let worker = BufferWorker::new(
            Arc::clone(&manager),
            Arc::clone(&processor) as Arc<dyn ChunkProcessor>,
        );

        manager.update_position("t", 0.0, Preset::Adaptive, 1.0).unwrap();
        let queued = manager.pending_work() as u64;
        manager
            .insert(
                crate::buffer::ChunkKey::new("t", 0, Preset::Adaptive, 1.0),
                bytes::Bytes::from_static(b"pcm"),
                TierLevel::Hot,
                1.0,
            )
            .unwrap();

        worker.start().unwrap();
        assert!(worker.wait_idle(Duration::from_secs(5)).await);
        worker.stop().await.unwrap();

        assert_eq!(manager.metrics().skipped(), 1);
        assert_eq!(processor.calls(), queued - 1);
    }
}
