//! Serialized access to the shared inference pipeline

use image::DynamicImage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::{GenerationParams, TextToImage};
use crate::error::{AppError, Result};

/// Shared handle to the pipeline.
///
/// Every [`run`](SerialPipeline::run) takes the same lock, so at most one
/// inference executes at any time and the rest wait their turn. Inference is
/// moved to the blocking thread pool; the async runtime (and `/health`) stays
/// responsive while the lock is held. There is no timeout: a hung inference
/// holds the lock forever.
#[derive(Clone)]
pub struct SerialPipeline {
    name: Arc<str>,
    inner: Arc<Mutex<Box<dyn TextToImage>>>,
    stats: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    pending: AtomicU64,
    completed: AtomicU64,
}

/// Counts one request as pending until dropped.
///
/// Owned by the blocking closure, so the counters settle even when inference
/// panics after the awaiting request has gone away.
struct InFlight(Arc<Counters>);

impl InFlight {
    fn enter(stats: Arc<Counters>) -> Self {
        stats.pending.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }

    fn pending(&self) -> u64 {
        self.0.pending.load(Ordering::Relaxed)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let pending = self.0.pending.fetch_sub(1, Ordering::Relaxed) - 1;
        let completed = self.0.completed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(pending, completed, "Inference slot released");
    }
}

/// Pipeline usage counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineStats {
    /// Requests waiting for or holding the lock
    pub pending: u64,
    /// Inferences that have finished, successfully or not
    pub completed: u64,
}

impl SerialPipeline {
    pub fn new(pipeline: Box<dyn TextToImage>) -> Self {
        Self {
            name: Arc::from(pipeline.name()),
            inner: Arc::new(Mutex::new(pipeline)),
            stats: Arc::new(Counters::default()),
        }
    }

    /// Name of the wrapped pipeline
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one inference, waiting for any in-flight inference to finish first
    pub async fn run(&self, params: GenerationParams) -> Result<DynamicImage> {
        let in_flight = InFlight::enter(self.stats.clone());
        debug!(pipeline = %self.name, pending = in_flight.pending(), "Inference queued");

        let inner = self.inner.clone();
        let task = tokio::task::spawn_blocking(move || {
            let _in_flight = in_flight;
            let mut pipeline = inner.lock();
            let start = Instant::now();
            let result = pipeline.generate(&params);
            drop(pipeline);

            debug!(elapsed_ms = start.elapsed().as_millis() as u64, "Inference finished");
            result
        });

        task.await
            .map_err(|e| AppError::Internal(format!("Inference task failed: {}", e)))?
    }

    /// Snapshot of the usage counters
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            pending: self.stats.pending.load(Ordering::Relaxed),
            completed: self.stats.completed.load(Ordering::Relaxed),
        }
    }
}
