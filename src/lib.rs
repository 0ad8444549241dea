//! Datacube - voxel volumes for biological image stacks
//!
//! A volume pairs an image channel with a segmentation, each stored as a dense
//! 3D grid of 1, 2 or 4 byte voxels. Grids are filled by fetching bundles of
//! encoded Z slices from a tile server, then read back as axis-aligned slices.
//!
//! # Features
//!
//! - Flat voxel grids with X, Y and Z slicing and RGBA encode/decode
//! - Deterministic chunk planning for the tile server's URL scheme
//! - Concurrent loading on one task, with retry, cancellation and progress
//! - Segment picking and selection highlighting on rendered slices
//! - File system tile backend, HTTP behind the `http-client` feature
//!
//! # Example
//!
//! ```rust,ignore
//! use datacube::{Axis, FileSystemTileSource, Volume, VolumeConfig};
//! use std::sync::Arc;
//!
//! # async fn example() -> datacube::Result<()> {
//! let config = VolumeConfig::load("volume.json").await?;
//! let volume = Volume::new(config, Arc::new(FileSystemTileSource::new("/data/tiles")))?;
//!
//! let report = volume.load().await?;
//! println!("{} chunks loaded, {} failed", report.loaded, report.failed);
//!
//! volume.pick(Axis::Z, 128, 0.5, 0.5)?;
//! let pixels = volume.render_channel_slice(Axis::Z, 128)?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod color;
pub mod compositor;
pub mod config;
pub mod error;
pub mod grid;
pub mod io;
pub mod layout;
pub mod loader;
pub mod selection;
pub mod types;
pub mod utils;
pub mod volume;

// Re-exports
pub use codec::{ImageCrateDecoder, ImageDecoder, TilePayload};
pub use color::ByteOrder;
pub use compositor::{pick, render_channel_slice, RenderSurface};
pub use config::{GridConfig, VolumeConfig};
pub use error::{CubeError, Result};
pub use grid::{SliceData, VoxelGrid};
pub use io::{create_tile_source, FileSystemTileSource, SourceScheme, TileSource};
pub use layout::{generate_specs, ChunkLayout, ChunkSpec};
pub use loader::{CancelToken, LoadReport, SharedGrid};
pub use selection::SegmentSelection;
pub use types::{Axis, ColorMode, Extent, Offset, PixelBuffer, VoxelWidth};
pub use volume::{LoadPhase, Volume};

#[cfg(feature = "http-client")]
pub use io::HttpTileSource;

/// Version of the datacube crate
pub const DATACUBE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!DATACUBE_VERSION.is_empty());
    }
}
