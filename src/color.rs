//! Endian-aware packing between RGBA8 pixels and stored voxels
//!
//! Pixel buffers are read and written as native `u32` words, so the position
//! of each color channel inside a word depends on the host byte order. Voxels
//! are stored in a canonical `0xRRGGBBAA` packing, truncated from the low end
//! to the voxel width: one byte keeps R, two bytes keep R and G, four keep all.

use crate::types::VoxelWidth;

/// Host byte order, as determined by [`ByteOrder::detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// Runtime check: store `0xff` in a word and look at its first byte.
    pub fn detect() -> Self {
        let word: u32 = 0xff;
        if word.to_ne_bytes()[0] == 0xff {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }

    /// Native word read from RGBA bytes -> canonical `0xRRGGBBAA`.
    ///
    /// On little-endian hosts the word reads back as `0xAABBGGRR`.
    #[inline]
    pub fn to_canonical(self, native: u32) -> u32 {
        match self {
            ByteOrder::Little => native.swap_bytes(),
            ByteOrder::Big => native,
        }
    }

    /// Native word whose `to_ne_bytes` is `[r, g, b, a]`
    #[inline]
    pub fn pack_rgba(self, r: u8, g: u8, b: u8, a: u8) -> u32 {
        let (r, g, b, a) = (r as u32, g as u32, b as u32, a as u32);
        match self {
            ByteOrder::Little => r | g << 8 | b << 16 | a << 24,
            ByteOrder::Big => r << 24 | g << 16 | b << 8 | a,
        }
    }

    /// Mask over a native pixel word that drops the alpha byte
    #[inline]
    pub fn rgb_mask(self) -> u32 {
        match self {
            ByteOrder::Little => 0x00ff_ffff,
            ByteOrder::Big => 0xffff_ff00,
        }
    }
}

impl Default for ByteOrder {
    fn default() -> Self {
        Self::detect()
    }
}

/// `(mask, right shift)` extracting one 8-bit channel from a stored voxel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMask {
    pub mask: u32,
    pub shift: u32,
}

impl ChannelMask {
    const NONE: ChannelMask = ChannelMask { mask: 0, shift: 0 };

    const fn new(mask: u32, shift: u32) -> Self {
        Self { mask, shift }
    }

    #[inline]
    pub fn extract(&self, voxel: u32) -> u8 {
        ((voxel & self.mask) >> self.shift) as u8
    }
}

/// Channel layout of a stored voxel of a given width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMasks {
    pub r: ChannelMask,
    pub g: ChannelMask,
    pub b: ChannelMask,
    pub a: ChannelMask,
}

impl ChannelMasks {
    pub const fn for_width(width: VoxelWidth) -> Self {
        match width {
            VoxelWidth::One => Self {
                r: ChannelMask::new(0xff, 0),
                g: ChannelMask::NONE,
                b: ChannelMask::NONE,
                a: ChannelMask::NONE,
            },
            VoxelWidth::Two => Self {
                r: ChannelMask::new(0xff00, 8),
                g: ChannelMask::new(0x00ff, 0),
                b: ChannelMask::NONE,
                a: ChannelMask::NONE,
            },
            VoxelWidth::Four => Self {
                r: ChannelMask::new(0xff00_0000, 24),
                g: ChannelMask::new(0x00ff_0000, 16),
                b: ChannelMask::new(0x0000_ff00, 8),
                a: ChannelMask::new(0x0000_00ff, 0),
            },
        }
    }

    /// True if the voxel width carries its own alpha channel
    pub fn has_alpha(&self) -> bool {
        self.a.mask != 0
    }
}
