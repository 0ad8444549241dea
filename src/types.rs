//! Core data types for the data cube

use crate::error::{CubeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Axis of the cube. Slicing along an axis yields the plane orthogonal to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Convert from usize index
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Axis::X),
            1 => Some(Axis::Y),
            2 => Some(Axis::Z),
            _ => None,
        }
    }

    /// Convert to usize index
    pub fn to_index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        f.write_str(name)
    }
}

impl FromStr for Axis {
    type Err = CubeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "x" | "X" => Ok(Axis::X),
            "y" | "Y" => Ok(Axis::Y),
            "z" | "Z" => Ok(Axis::Z),
            other => Err(CubeError::InvalidAxis(other.to_string())),
        }
    }
}

/// Size of a grid along each axis, in voxels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Extent {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// A cube with the same size on every axis
    pub fn cube(size: usize) -> Self {
        Self::new(size, size, size)
    }

    /// Size along `axis`
    pub fn get(&self, axis: Axis) -> usize {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }

    /// Total number of voxels
    pub fn voxel_count(&self) -> usize {
        self.x * self.y * self.z
    }

    pub fn is_empty(&self) -> bool {
        self.voxel_count() == 0
    }

    /// `(width, height)` of the plane produced by slicing along `axis`.
    ///
    /// Width is always the fastest-varying axis of the slice layout:
    /// X slices are `(z, y)`, Y slices `(x, z)`, Z slices `(x, y)`.
    pub fn plane_dims(&self, axis: Axis) -> (usize, usize) {
        match axis {
            Axis::X => (self.z, self.y),
            Axis::Y => (self.x, self.z),
            Axis::Z => (self.x, self.y),
        }
    }

    /// Number of voxels in one plane orthogonal to `axis`
    pub fn plane_len(&self, axis: Axis) -> usize {
        let (w, h) = self.plane_dims(axis);
        w * h
    }

    /// True if the coordinate lies inside the grid
    pub fn contains(&self, x: i64, y: i64, z: i64) -> bool {
        in_range(x, self.x) && in_range(y, self.y) && in_range(z, self.z)
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {} x {}", self.x, self.y, self.z)
    }
}

pub(crate) fn in_range(value: i64, size: usize) -> bool {
    value >= 0 && (value as u64) < size as u64
}

/// Whether `len` cells starting at `start` stay within `size`
pub(crate) fn span_fits(start: usize, len: usize, size: usize) -> bool {
    start.checked_add(len).is_some_and(|end| end <= size)
}

/// Voxel offset of a write into the grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Offset {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Offset {
    pub fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Same offset moved `dz` planes further along Z
    pub fn shifted_z(self, dz: usize) -> Self {
        Self {
            z: self.z + dz,
            ..self
        }
    }
}

/// Bytes stored per voxel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum VoxelWidth {
    One = 1,
    Two = 2,
    Four = 4,
}

impl VoxelWidth {
    pub fn bytes(&self) -> usize {
        *self as usize
    }

    /// Right shift that reduces a canonical `0xRRGGBBAA` word to this width
    pub fn color_shift(&self) -> u32 {
        32 - 8 * self.bytes() as u32
    }
}

impl TryFrom<usize> for VoxelWidth {
    type Error = CubeError;

    fn try_from(bytes: usize) -> Result<Self> {
        match bytes {
            1 => Ok(VoxelWidth::One),
            2 => Ok(VoxelWidth::Two),
            4 => Ok(VoxelWidth::Four),
            other => Err(CubeError::InvalidWidth(other)),
        }
    }
}

impl From<VoxelWidth> for usize {
    fn from(width: VoxelWidth) -> Self {
        width.bytes()
    }
}

/// How a slice is turned into display pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorMode {
    /// Emit the stored R/G/B(/A) channels
    #[default]
    Color,
    /// Replicate the red channel into R, G and B
    Grayscale,
}

/// Interleaved RGBA8 pixels with their dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// A fully transparent black buffer
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0; width * height * 4],
        }
    }

    /// Wrap existing RGBA8 bytes, checking the length
    pub fn from_rgba(width: usize, height: usize, data: Vec<u8>) -> Result<Self> {
        if data.len() != width * height * 4 {
            return Err(CubeError::InvalidDimensions(format!(
                "RGBA buffer of {} bytes does not match {}x{}",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// RGBA bytes of pixel `(col, row)`
    pub fn pixel(&self, col: usize, row: usize) -> [u8; 4] {
        let i = (row * self.width + col) * 4;
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Copy into an `image` buffer, e.g. for saving to disk
    pub fn to_image(&self) -> Option<image::RgbaImage> {
        image::RgbaImage::from_raw(self.width as u32, self.height as u32, self.data.clone())
    }
}
