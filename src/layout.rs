//! Chunk layout - how a grid is divided into fetchable sub-volumes
//!
//! A grid is covered by a fixed 2 x 2 x 2 arrangement of cubic macro-blocks of
//! edge `chunk_size`. Each macro-block is fetched as a run of Z-bundles of
//! `bundle_size` planes, one request per bundle.

use crate::error::{CubeError, Result};
use crate::types::{Extent, Offset};
use serde::{Deserialize, Serialize};

/// Macro-blocks per axis
pub const MACRO_BLOCKS: usize = 2;

/// Default macro-block edge length
pub const CHUNK_SIZE: usize = 128;

/// Default Z depth of one request; results in ~130kb downloads
pub const BUNDLE_SIZE: usize = 64;

/// One fetchable sub-region of a grid
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub url: String,
    pub x: usize,
    pub y: usize,
    pub z: usize,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl ChunkSpec {
    /// Destination of the `slot`-th plane of the bundle
    pub fn slot_offset(&self, slot: usize) -> Offset {
        Offset::new(self.x, self.y, self.z).shifted_z(slot)
    }
}

/// Chunk topology shared by every grid of a volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkLayout {
    base_url: String,
    mip_level: u32,
    chunk_size: usize,
    bundle_size: usize,
}

impl ChunkLayout {
    /// Create a new layout.
    ///
    /// `chunk_size` must be a positive multiple of `bundle_size`.
    pub fn new(base_url: impl Into<String>, chunk_size: usize, bundle_size: usize) -> Result<Self> {
        if chunk_size == 0 || bundle_size == 0 {
            return Err(CubeError::Configuration(
                "chunk and bundle sizes must be positive".to_string(),
            ));
        }
        if chunk_size % bundle_size != 0 {
            return Err(CubeError::Configuration(format!(
                "chunk size {} is not a multiple of bundle size {}",
                chunk_size, bundle_size
            )));
        }

        let base_url = base_url.into();
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            mip_level: 0,
            chunk_size,
            bundle_size,
        })
    }

    /// Set the mip level requested from the server
    pub fn with_mip_level(mut self, mip_level: u32) -> Self {
        self.mip_level = mip_level;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bundle_size(&self) -> usize {
        self.bundle_size
    }

    /// Bundles per macro-block
    pub fn bundles_per_chunk(&self) -> usize {
        self.chunk_size.div_ceil(self.bundle_size)
    }

    /// Number of specs produced for one grid
    pub fn spec_count(&self) -> usize {
        MACRO_BLOCKS.pow(3) * self.bundles_per_chunk()
    }

    /// Region written by a full load
    pub fn covered_extent(&self) -> Extent {
        Extent::cube(MACRO_BLOCKS * self.chunk_size)
    }

    /// URL of one bundle of macro-block `(bx, by, bz)`
    pub fn chunk_url(&self, identity: &str, block: [usize; 3], range: (usize, usize)) -> String {
        format!(
            "{}/volume/{}/chunk/{}/{}/{}/{}/tile/xy/{}:{}",
            self.base_url, identity, self.mip_level, block[0], block[1], block[2], range.0, range.1
        )
    }

    /// Every spec for `identity`, ordered by x, y, z block then bundle
    pub fn specs(&self, identity: &str) -> Vec<ChunkSpec> {
        let mut specs = Vec::with_capacity(self.spec_count());

        for bx in 0..MACRO_BLOCKS {
            for by in 0..MACRO_BLOCKS {
                for bz in 0..MACRO_BLOCKS {
                    for range in (0..self.chunk_size).step_by(self.bundle_size) {
                        let slices = (range, range + self.bundle_size);
                        specs.push(ChunkSpec {
                            url: self.chunk_url(identity, [bx, by, bz], slices),
                            x: bx * self.chunk_size,
                            y: by * self.chunk_size,
                            z: bz * self.chunk_size + range,
                            width: self.chunk_size,
                            height: self.chunk_size,
                            depth: self.bundle_size,
                        });
                    }
                }
            }
        }

        specs
    }

    /// Summary string of the layout
    pub fn summary(&self) -> String {
        format!(
            "{} specs per grid ({}^3 blocks of {}, {}-plane bundles) from {}",
            self.spec_count(),
            MACRO_BLOCKS,
            self.chunk_size,
            self.bundle_size,
            self.base_url
        )
    }
}

/// Enumerate the chunk specs needed to populate one grid
pub fn generate_specs(
    base_url: &str,
    identity: &str,
    chunk_size: usize,
    bundle_size: usize,
) -> Result<Vec<ChunkSpec>> {
    Ok(ChunkLayout::new(base_url, chunk_size, bundle_size)?.specs(identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn create_test_layout() -> ChunkLayout {
        ChunkLayout::new("http://cache.example.org/", CHUNK_SIZE, BUNDLE_SIZE).unwrap()
    }

    #[test]
    fn test_spec_count() {
        let layout = create_test_layout();
        assert_eq!(layout.bundles_per_chunk(), 2);
        assert_eq!(layout.spec_count(), 16);

        let specs = layout.specs("2988");
        assert_eq!(specs.len(), 2 * 2 * 2 * (128 / 64));
    }

    #[test]
    fn test_spec_offsets_unique_and_in_range() {
        let specs = create_test_layout().specs("2988");
        let offsets: HashSet<_> = specs.iter().map(|s| (s.x, s.y, s.z)).collect();
        assert_eq!(offsets.len(), specs.len());

        for spec in &specs {
            assert!(spec.x == 0 || spec.x == 128);
            assert!(spec.y == 0 || spec.y == 128);
            assert!(spec.z + spec.depth <= 256);
            assert_eq!((spec.width, spec.height, spec.depth), (128, 128, 64));
        }
    }

    #[test]
    fn test_spec_order_and_urls() {
        let specs = create_test_layout().specs("2988");

        assert_eq!(
            specs[0].url,
            "http://cache.example.org/volume/2988/chunk/0/0/0/0/tile/xy/0:64"
        );
        assert_eq!(
            specs[1].url,
            "http://cache.example.org/volume/2988/chunk/0/0/0/0/tile/xy/64:128"
        );
        assert_eq!((specs[1].x, specs[1].y, specs[1].z), (0, 0, 64));
        // z block varies before y
        assert_eq!((specs[2].x, specs[2].y, specs[2].z), (0, 0, 128));
        assert_eq!((specs[4].x, specs[4].y, specs[4].z), (0, 128, 0));
        assert_eq!(
            specs[15].url,
            "http://cache.example.org/volume/2988/chunk/0/1/1/1/tile/xy/64:128"
        );
    }

    #[test]
    fn test_specs_are_deterministic() {
        let layout = create_test_layout();
        assert_eq!(layout.specs("15656"), layout.specs("15656"));
        assert_eq!(
            generate_specs("http://cache.example.org", "15656", 128, 64).unwrap(),
            layout.specs("15656")
        );
    }

    #[test]
    fn test_mip_level_in_url() {
        let layout = ChunkLayout::new("http://h", 4, 4).unwrap().with_mip_level(2);
        let specs = layout.specs("7");
        assert_eq!(specs.len(), 8);
        assert_eq!(specs[0].url, "http://h/volume/7/chunk/2/0/0/0/tile/xy/0:4");
    }

    #[test]
    fn test_invalid_layouts() {
        assert!(ChunkLayout::new("http://h", 128, 48).is_err());
        assert!(ChunkLayout::new("http://h", 0, 64).is_err());
        assert!(ChunkLayout::new("http://h", 128, 0).is_err());
    }

    #[test]
    fn test_slot_offset() {
        let spec = &create_test_layout().specs("1")[3];
        assert_eq!(spec.slot_offset(5), Offset::new(0, 0, 192 + 5));
    }
}
