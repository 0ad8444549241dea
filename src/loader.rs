//! Chunk loading - per-chunk fetch with retry, cancellation and progress
//!
//! Every chunk of a load cycle runs [`load_chunk`] on the caller's task. The
//! only suspension points are the fetch and the retry sleep, both raced
//! against the cycle's [`CancelToken`]. Grid writes happen under the grid's
//! write lock, after the token has been re-checked, so nothing is written
//! once a cycle has been cancelled.

use crate::codec::ImageDecoder;
use crate::error::{CubeError, Result};
use crate::grid::VoxelGrid;
use crate::io::TileSource;
use crate::layout::ChunkSpec;
use crate::types::PixelBuffer;
use crate::utils::percent;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

/// A grid shared between a volume, its chunk tasks and readers
pub type SharedGrid = Arc<RwLock<VoxelGrid>>;

/// Attempts per chunk: the first fetch plus one retry
pub const MAX_ATTEMPTS: u32 = 2;

/// Cooperative cancellation flag for one load cycle
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancel; returns `false` if the token was already cancelled
    pub fn cancel(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // sender gone, can never fire
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Settled / total chunk counters for the running cycle
#[derive(Debug, Default)]
pub struct ProgressTracker {
    settled: AtomicUsize,
    total: AtomicUsize,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a cycle of `total` chunks
    pub fn start(&self, total: usize) {
        self.settled.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
    }

    /// Count one chunk as finished, successfully or not
    pub fn settle(&self) {
        self.settled.fetch_add(1, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.start(0);
    }

    /// `(settled, total)`
    pub fn snapshot(&self) -> (usize, usize) {
        (
            self.settled.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    /// Fraction settled, `0.0` when nothing is outstanding
    pub fn fraction(&self) -> f64 {
        match self.snapshot() {
            (_, 0) => 0.0,
            (settled, total) => (settled as f64 / total as f64).min(1.0),
        }
    }
}

/// URLs currently being fetched
#[derive(Debug, Default)]
pub struct PendingRequests {
    requests: Mutex<HashMap<Uuid, String>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `url` until the returned guard is dropped
    pub fn track(&self, url: &str) -> PendingGuard<'_> {
        let id = Uuid::new_v4();
        self.requests.lock().insert(id, url.to_string());
        PendingGuard { table: self, id }
    }

    /// In-flight URLs, sorted
    pub fn urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.requests.lock().values().cloned().collect();
        urls.sort();
        urls
    }

    pub fn len(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.requests.lock().clear();
    }
}

/// Removes a pending request when dropped
pub struct PendingGuard<'a> {
    table: &'a PendingRequests,
    id: Uuid,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.requests.lock().remove(&self.id);
    }
}

/// How one chunk ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Written to the grid after `attempts` tries
    Loaded { attempts: u32 },
    /// Every attempt failed; the region stays zero
    Failed,
    /// The cycle was cancelled first
    Cancelled,
}

/// Summary of a completed load cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub cycle_id: Uuid,
    /// Chunks written
    pub loaded: usize,
    /// Chunks that failed every attempt
    pub failed: usize,
    /// Chunks that needed a retry, whatever the final result
    pub retried: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LoadReport {
    /// Tally chunk outcomes into a report
    pub fn from_outcomes(
        cycle_id: Uuid,
        outcomes: &[ChunkOutcome],
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let mut report = Self {
            cycle_id,
            loaded: 0,
            failed: 0,
            retried: 0,
            started_at,
            finished_at,
        };
        for outcome in outcomes {
            match outcome {
                ChunkOutcome::Loaded { attempts } => {
                    report.loaded += 1;
                    if *attempts > 1 {
                        report.retried += 1;
                    }
                }
                ChunkOutcome::Failed => {
                    report.failed += 1;
                    report.retried += 1;
                }
                ChunkOutcome::Cancelled => {}
            }
        }
        report
    }

    pub fn total(&self) -> usize {
        self.loaded + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// Everything a chunk task borrows from its cycle
pub struct ChunkContext<'a> {
    pub source: &'a dyn TileSource,
    pub decoder: &'a dyn ImageDecoder,
    pub token: &'a CancelToken,
    pub pending: &'a PendingRequests,
    pub progress: &'a ProgressTracker,
    pub retry_delay: Duration,
}

/// Fetch, decode and write one chunk, retrying once on failure.
///
/// Non-cancelled outcomes settle one unit of progress.
pub async fn load_chunk(
    ctx: &ChunkContext<'_>,
    grid: &SharedGrid,
    spec: &ChunkSpec,
) -> ChunkOutcome {
    let outcome = fetch_with_retry(ctx, grid, spec).await;
    if outcome != ChunkOutcome::Cancelled {
        ctx.progress.settle();
        debug!(
            url = %spec.url,
            ?outcome,
            progress = percent(ctx.progress.fraction()),
            "chunk settled"
        );
    }
    outcome
}

async fn fetch_with_retry(
    ctx: &ChunkContext<'_>,
    grid: &SharedGrid,
    spec: &ChunkSpec,
) -> ChunkOutcome {
    let mut attempt = 1;
    loop {
        let error = match attempt_chunk(ctx, grid, spec).await {
            Ok(()) => return ChunkOutcome::Loaded { attempts: attempt },
            Err(e) if e.is_cancelled() => return ChunkOutcome::Cancelled,
            Err(e) => e,
        };

        if attempt >= MAX_ATTEMPTS {
            warn!(url = %spec.url, attempt, error = %error, "chunk failed, leaving region empty");
            return ChunkOutcome::Failed;
        }
        warn!(url = %spec.url, attempt, error = %error, "chunk failed, retrying");

        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return ChunkOutcome::Cancelled,
            _ = tokio::time::sleep(ctx.retry_delay) => {}
        }
        attempt += 1;
    }
}

async fn attempt_chunk(ctx: &ChunkContext<'_>, grid: &SharedGrid, spec: &ChunkSpec) -> Result<()> {
    let payload = {
        let _pending = ctx.pending.track(&spec.url);
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => return Err(CubeError::Cancelled),
            payload = ctx.source.fetch(&spec.url) => payload?,
        }
    };

    let images = payload.into_images();
    if images.len() > spec.depth {
        return Err(CubeError::Decode(format!(
            "{} images for a bundle of {} slices",
            images.len(),
            spec.depth
        )));
    }

    let planes = images
        .iter()
        .map(|encoded| ctx.decoder.decode(encoded))
        .collect::<Result<Vec<PixelBuffer>>>()?;
    for plane in &planes {
        if plane.width > spec.width || plane.height > spec.height {
            return Err(CubeError::InvalidDimensions(format!(
                "{}x{} tile for a {}x{} chunk",
                plane.width, plane.height, spec.width, spec.height
            )));
        }
    }

    let mut grid = grid.write();
    if ctx.token.is_cancelled() {
        return Err(CubeError::Cancelled);
    }
    for (slot, plane) in planes.iter().enumerate() {
        grid.decode_pixel_buffer(&plane.data, plane.width, spec.slot_offset(slot))?;
    }
    Ok(())
}
