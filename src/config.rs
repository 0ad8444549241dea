//! Volume configuration

use crate::error::{CubeError, Result};
use crate::layout::{ChunkLayout, BUNDLE_SIZE, CHUNK_SIZE};
use crate::types::{Extent, VoxelWidth};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default pause before the single retry of a failed chunk
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// One grid of a volume: where its tiles live and how it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridConfig {
    /// Volume id on the tile server
    pub id: String,

    /// Grid size in voxels
    pub extent: Extent,

    /// Bytes per voxel (1, 2 or 4)
    pub voxel_width: usize,
}

impl GridConfig {
    pub fn new(id: impl Into<String>, extent: Extent, voxel_width: usize) -> Self {
        Self {
            id: id.into(),
            extent,
            voxel_width,
        }
    }
}

/// Everything needed to build and load a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Tile server root, e.g. `http://cache.eyewire.org`
    pub base_url: String,

    /// Image channel
    pub channel: GridConfig,

    /// Segment labels
    pub segmentation: GridConfig,

    /// Macro-block edge length
    pub chunk_size: usize,

    /// Z planes per request
    pub bundle_size: usize,

    /// Resolution level requested from the server
    pub mip_level: u32,

    /// Delay before retrying a failed chunk, in milliseconds
    pub retry_delay_ms: u64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://cache.eyewire.org".to_string(),
            channel: GridConfig::new("", Extent::cube(256), 1),
            segmentation: GridConfig::new("", Extent::cube(256), 2),
            chunk_size: CHUNK_SIZE,
            bundle_size: BUNDLE_SIZE,
            mip_level: 0,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl VolumeConfig {
    /// Default configuration for a channel / segmentation id pair
    pub fn new(channel_id: impl Into<String>, segmentation_id: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.channel.id = channel_id.into();
        config.segmentation.id = segmentation_id.into();
        config
    }

    /// Set the tile server root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set chunk and bundle sizes
    pub fn with_chunking(mut self, chunk_size: usize, bundle_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self.bundle_size = bundle_size;
        self
    }

    /// Set the extent of both grids
    pub fn with_extent(mut self, extent: Extent) -> Self {
        self.channel.extent = extent;
        self.segmentation.extent = extent;
        self
    }

    /// Set voxel widths of the channel and segmentation grids
    pub fn with_voxel_widths(mut self, channel: usize, segmentation: usize) -> Self {
        self.channel.voxel_width = channel;
        self.segmentation.voxel_width = segmentation;
        self
    }

    /// Set the mip level
    pub fn with_mip_level(mut self, mip_level: u32) -> Self {
        self.mip_level = mip_level;
        self
    }

    /// Set the retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Chunk topology shared by both grids
    pub fn layout(&self) -> Result<ChunkLayout> {
        Ok(ChunkLayout::new(&self.base_url, self.chunk_size, self.bundle_size)?
            .with_mip_level(self.mip_level))
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<()> {
        let layout = self.layout()?;
        let covered = layout.covered_extent();

        for (name, grid) in [("channel", &self.channel), ("segmentation", &self.segmentation)] {
            VoxelWidth::try_from(grid.voxel_width)
                .map_err(|e| CubeError::Configuration(format!("{} grid: {}", name, e)))?;

            if grid.extent.is_empty() {
                return Err(CubeError::Configuration(format!(
                    "{} grid extent must be positive, got {}",
                    name, grid.extent
                )));
            }
            if grid.extent.x < covered.x || grid.extent.y < covered.y || grid.extent.z < covered.z {
                return Err(CubeError::Configuration(format!(
                    "{} grid {} is smaller than the chunk layout {}",
                    name, grid.extent, covered
                )));
            }
        }

        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON configuration file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
