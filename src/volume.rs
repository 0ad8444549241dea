//! Volume - a channel grid and a segmentation grid loaded together
//!
//! A [`Volume`] owns (or leases) both grids, runs load cycles against a
//! [`TileSource`], and exposes picking and rendering over the loaded data.

use crate::codec::{ImageCrateDecoder, ImageDecoder};
use crate::compositor::{self, RenderSurface};
use crate::config::VolumeConfig;
use crate::error::{CubeError, Result};
use crate::grid::VoxelGrid;
use crate::io::TileSource;
use crate::layout::ChunkLayout;
use crate::loader::{
    load_chunk, CancelToken, ChunkContext, LoadReport, PendingRequests, ProgressTracker,
    SharedGrid,
};
use crate::selection::SegmentSelection;
use crate::types::{Axis, PixelBuffer};
use chrono::Utc;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// Where the volume is in its load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    #[default]
    Idle,
    Loading,
    Completed,
    Aborted,
}

impl fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoadPhase::Idle => "idle",
            LoadPhase::Loading => "loading",
            LoadPhase::Completed => "completed",
            LoadPhase::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct CycleState {
    phase: LoadPhase,
    cycle_id: Option<Uuid>,
    token: Option<CancelToken>,
}

/// Channel and segmentation grids with their loader state
pub struct Volume {
    config: VolumeConfig,
    layout: ChunkLayout,
    channel: SharedGrid,
    segmentation: SharedGrid,
    source: Arc<dyn TileSource>,
    decoder: Arc<dyn ImageDecoder>,
    selection: RwLock<SegmentSelection>,
    cycle: Mutex<CycleState>,
    progress: ProgressTracker,
    pending: PendingRequests,
}

impl Volume {
    /// Create a volume with freshly allocated, zeroed grids
    pub fn new(config: VolumeConfig, source: Arc<dyn TileSource>) -> Result<Self> {
        config.validate()?;
        let channel = VoxelGrid::new(config.channel.extent, config.channel.voxel_width)?;
        let segmentation =
            VoxelGrid::new(config.segmentation.extent, config.segmentation.voxel_width)?;

        Self::from_grids(
            config,
            Arc::new(RwLock::new(channel)),
            Arc::new(RwLock::new(segmentation)),
            source,
        )
    }

    /// Create a volume over existing grids.
    ///
    /// The grids' own extents and widths are used; the config only supplies
    /// ids and chunking. Both grids must cover the chunk layout.
    pub fn from_grids(
        config: VolumeConfig,
        channel: SharedGrid,
        segmentation: SharedGrid,
        source: Arc<dyn TileSource>,
    ) -> Result<Self> {
        let layout = config.layout()?;
        let covered = layout.covered_extent();

        for (name, grid) in [("channel", &channel), ("segmentation", &segmentation)] {
            let extent = grid.read().extent();
            if extent.x < covered.x || extent.y < covered.y || extent.z < covered.z {
                return Err(CubeError::Configuration(format!(
                    "{} grid {} is smaller than the chunk layout {}",
                    name, extent, covered
                )));
            }
        }

        Ok(Self {
            config,
            layout,
            channel,
            segmentation,
            source,
            decoder: Arc::new(ImageCrateDecoder),
            selection: RwLock::new(SegmentSelection::new()),
            cycle: Mutex::new(CycleState::default()),
            progress: ProgressTracker::new(),
            pending: PendingRequests::new(),
        })
    }

    /// Replace the image decoder used for tiles
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &VolumeConfig {
        &self.config
    }

    pub fn layout(&self) -> &ChunkLayout {
        &self.layout
    }

    pub fn channel(&self) -> SharedGrid {
        Arc::clone(&self.channel)
    }

    pub fn segmentation(&self) -> SharedGrid {
        Arc::clone(&self.segmentation)
    }

    /// Load every chunk of both grids.
    ///
    /// Chunks are fetched concurrently on the calling task. Failed chunks are
    /// retried once and then left empty. Returns [`CubeError::Cancelled`] if
    /// [`Volume::abort`] was called, and [`CubeError::AlreadyLoading`] if a
    /// cycle is already running.
    pub async fn load(&self) -> Result<LoadReport> {
        let cycle_id = Uuid::new_v4();
        let token = self.begin_cycle(cycle_id)?;

        self.run_cycle(cycle_id, token)
            .instrument(info_span!("load_cycle", cycle = %cycle_id))
            .await
    }

    fn begin_cycle(&self, cycle_id: Uuid) -> Result<CancelToken> {
        let mut cycle = self.cycle.lock();
        if cycle.phase == LoadPhase::Loading {
            return Err(CubeError::AlreadyLoading);
        }
        let token = CancelToken::new();
        cycle.phase = LoadPhase::Loading;
        cycle.cycle_id = Some(cycle_id);
        cycle.token = Some(token.clone());
        Ok(token)
    }

    async fn run_cycle(&self, cycle_id: Uuid, token: CancelToken) -> Result<LoadReport> {
        let guard = CycleGuard::new(self, cycle_id);
        let started_at = Utc::now();

        for grid in [&self.channel, &self.segmentation] {
            let mut grid = grid.write();
            if !grid.is_clean() || grid.is_loaded() {
                grid.clear();
            }
        }

        let channel_specs = self.layout.specs(&self.config.channel.id);
        let segmentation_specs = self.layout.specs(&self.config.segmentation.id);
        self.progress.start(channel_specs.len() + segmentation_specs.len());
        info!(
            chunks = channel_specs.len() + segmentation_specs.len(),
            channel = %self.config.channel.id,
            segmentation = %self.config.segmentation.id,
            "load cycle started"
        );

        let ctx = ChunkContext {
            source: self.source.as_ref(),
            decoder: self.decoder.as_ref(),
            token: &token,
            pending: &self.pending,
            progress: &self.progress,
            retry_delay: self.config.retry_delay(),
        };
        let tasks = channel_specs
            .iter()
            .map(|spec| (&self.channel, spec))
            .chain(segmentation_specs.iter().map(|spec| (&self.segmentation, spec)))
            .map(|(grid, spec)| load_chunk(&ctx, grid, spec));
        let outcomes = join_all(tasks).await;

        let mut cycle = self.cycle.lock();
        if token.is_cancelled() {
            drop(cycle);
            guard.finish(LoadPhase::Aborted);
            self.progress.reset();
            info!("load cycle aborted");
            return Err(CubeError::Cancelled);
        }
        // under the cycle lock so an abort cannot slip in between
        self.channel.write().mark_loaded();
        self.segmentation.write().mark_loaded();
        cycle.phase = LoadPhase::Completed;
        drop(cycle);
        guard.finish(LoadPhase::Completed);

        let report = LoadReport::from_outcomes(cycle_id, &outcomes, started_at, Utc::now());
        info!(
            loaded = report.loaded,
            failed = report.failed,
            retried = report.retried,
            "load cycle completed"
        );
        Ok(report)
    }

    /// Cancel the running cycle.
    ///
    /// Once this returns, no chunk of the cancelled cycle writes to either
    /// grid. Returns whether a cycle was running.
    pub fn abort(&self) -> bool {
        let active = {
            let mut cycle = self.cycle.lock();
            if cycle.phase != LoadPhase::Loading {
                false
            } else {
                if let Some(token) = &cycle.token {
                    token.cancel();
                }
                cycle.phase = LoadPhase::Aborted;
                true
            }
        };
        if !active {
            return false;
        }

        self.pending.clear();
        // wait out any chunk that is mid-write
        drop(self.channel.write());
        drop(self.segmentation.write());
        self.progress.reset();
        info!("load cycle abort requested");
        true
    }

    /// Fraction of the current cycle that has settled, `1.0` once loaded and
    /// `0.0` after an abort
    pub fn progress(&self) -> f64 {
        if self.channel.read().is_loaded() && self.segmentation.read().is_loaded() {
            return 1.0;
        }
        if self.phase() == LoadPhase::Aborted {
            return 0.0;
        }
        self.progress.fraction()
    }

    pub fn phase(&self) -> LoadPhase {
        self.cycle.lock().phase
    }

    pub fn is_loaded(&self) -> bool {
        self.phase() == LoadPhase::Completed
    }

    /// URLs of fetches currently in flight
    pub fn pending_requests(&self) -> Vec<String> {
        self.pending.urls()
    }

    /// Selected segment ids, ascending
    pub fn selected_segments(&self) -> Vec<u32> {
        self.selection.read().iter().collect()
    }

    /// Flip a segment in or out of the selection
    pub fn toggle_segment(&self, id: u32) -> bool {
        self.selection.write().toggle(id)
    }

    pub fn clear_selection(&self) {
        self.selection.write().clear();
    }

    /// Select the segment under a normalized slice position, returning its id
    pub fn pick(&self, axis: Axis, index: i64, norm_x: f64, norm_y: f64) -> Result<u32> {
        let segmentation = self.segmentation.read();
        let mut selection = self.selection.write();
        compositor::pick(&segmentation, &mut selection, axis, index, norm_x, norm_y)
    }

    /// Grayscale channel slice with the current selection highlighted
    pub fn render_channel_slice(&self, axis: Axis, index: i64) -> Result<PixelBuffer> {
        let channel = self.channel.read();
        let segmentation = self.segmentation.read();
        let selection = self.selection.read();
        compositor::render_channel_slice(&channel, &segmentation, &selection, axis, index)
    }

    /// Render a slice and hand it to `surface`
    pub fn render_to<S: RenderSurface + ?Sized>(
        &self,
        axis: Axis,
        index: i64,
        surface: &mut S,
    ) -> Result<()> {
        let pixels = self.render_channel_slice(axis, index)?;
        surface.blit(&pixels)
    }

    pub fn summary(&self) -> String {
        format!(
            "volume {}/{} ({}): channel {}, segmentation {}",
            self.config.channel.id,
            self.config.segmentation.id,
            self.phase(),
            self.channel.read().summary(),
            self.segmentation.read().summary()
        )
    }
}

/// Resets the cycle if `load()` is dropped before it finishes
struct CycleGuard<'a> {
    volume: &'a Volume,
    cycle_id: Uuid,
    armed: bool,
}

impl<'a> CycleGuard<'a> {
    fn new(volume: &'a Volume, cycle_id: Uuid) -> Self {
        Self {
            volume,
            cycle_id,
            armed: true,
        }
    }

    fn finish(mut self, phase: LoadPhase) {
        self.armed = false;
        let mut cycle = self.volume.cycle.lock();
        if cycle.cycle_id == Some(self.cycle_id) {
            cycle.phase = phase;
            cycle.token = None;
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut cycle = self.volume.cycle.lock();
            if cycle.cycle_id != Some(self.cycle_id) {
                return;
            }
            if let Some(token) = cycle.token.take() {
                token.cancel();
            }
            if cycle.phase == LoadPhase::Loading {
                cycle.phase = LoadPhase::Aborted;
            }
        }
        self.volume.pending.clear();
        self.volume.progress.reset();
        info!(cycle = %self.cycle_id, "load cycle dropped");
    }
}
