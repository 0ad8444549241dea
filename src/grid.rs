//! Voxel grid - flat, row-major storage of one 3D scalar field
//!
//! A grid is a dense `sx * sy * sz` buffer with x varying fastest, then y,
//! then z. Voxels are 1, 2 or 4 bytes wide; the width is fixed when the grid
//! is built and selects one of three monomorphized [`Cube`] buffers, so the
//! per-voxel loops never branch on width.

use crate::color::{ByteOrder, ChannelMasks};
use crate::error::{CubeError, Result};
use crate::types::{
    in_range, span_fits, Axis, ColorMode, Extent, Offset, PixelBuffer, VoxelWidth,
};
use crate::utils::format_bytes;
use ndarray::Array2;
use num_traits::{AsPrimitive, PrimInt, Unsigned};
use std::borrow::Cow;
use std::fmt;

/// Integer type usable as a voxel
pub trait Voxel:
    PrimInt + Unsigned + AsPrimitive<u32> + Default + Send + Sync + fmt::Debug + 'static
{
    const WIDTH: VoxelWidth;

    /// Narrow a 32-bit word to this voxel type, keeping the low bits
    fn from_word(word: u32) -> Self;

    #[inline]
    fn to_word(self) -> u32 {
        AsPrimitive::<u32>::as_(self)
    }
}

macro_rules! impl_voxel {
    ($t:ty, $width:expr) => {
        impl Voxel for $t {
            const WIDTH: VoxelWidth = $width;

            #[inline]
            fn from_word(word: u32) -> Self {
                AsPrimitive::<$t>::as_(word)
            }
        }
    };
}

impl_voxel!(u8, VoxelWidth::One);
impl_voxel!(u16, VoxelWidth::Two);
impl_voxel!(u32, VoxelWidth::Four);

/// Typed voxel storage for one width
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cube<T: Voxel> {
    extent: Extent,
    data: Vec<T>,
}

impl<T: Voxel> Cube<T> {
    // This is an expensive operation for full-size volumes.
    fn new(extent: Extent) -> Self {
        Self {
            extent,
            data: vec![T::zero(); extent.voxel_count()],
        }
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        x + self.extent.x * (y + self.extent.y * z)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    fn fill_zero(&mut self) {
        self.data.fill(T::zero());
    }

    fn write_plane(&mut self, values: &[u32], row_width: usize, offset: Offset) {
        for (row, src) in values.chunks(row_width).enumerate() {
            let start = self.index(offset.x, offset.y + row, offset.z);
            for (dst, &value) in self.data[start..start + src.len()].iter_mut().zip(src) {
                *dst = T::from_word(value);
            }
        }
    }

    fn write_subcube(&mut self, values: &[u32], dims: Extent, offset: Offset) {
        for (i, src) in values.chunks_exact(dims.x).enumerate() {
            let y = offset.y + i % dims.y;
            let z = offset.z + i / dims.y;
            let start = self.index(offset.x, y, z);
            for (dst, &value) in self.data[start..start + dims.x].iter_mut().zip(src) {
                *dst = T::from_word(value);
            }
        }
    }

    fn decode_pixels(&mut self, pixels: &[u8], src_width: usize, offset: Offset, order: ByteOrder) {
        let shift = T::WIDTH.color_shift();
        for (row, src) in pixels.chunks(src_width * 4).enumerate() {
            let start = self.index(offset.x, offset.y + row, offset.z);
            let len = src.len() / 4;
            for (dst, px) in self.data[start..start + len]
                .iter_mut()
                .zip(src.chunks_exact(4))
            {
                let native = u32::from_ne_bytes([px[0], px[1], px[2], px[3]]);
                *dst = T::from_word(order.to_canonical(native) >> shift);
            }
        }
    }

    #[inline]
    fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.data[self.index(x, y, z)]
    }

    fn slice(&self, axis: Axis, index: usize) -> Cow<'_, [T]> {
        let Extent {
            x: sx,
            y: sy,
            z: sz,
        } = self.extent;

        match axis {
            // contiguous: a plain sub-slice of the buffer
            Axis::Z => {
                let plane = sx * sy;
                Cow::Borrowed(&self.data[plane * index..plane * (index + 1)])
            }
            // every output row is one contiguous x-run, copied as a block
            Axis::Y => {
                let mut square = Vec::with_capacity(sx * sz);
                for z in 0..sz {
                    let start = self.index(0, index, z);
                    square.extend_from_slice(&self.data[start..start + sx]);
                }
                Cow::Owned(square)
            }
            Axis::X => {
                let mut square = Vec::with_capacity(sy * sz);
                let z_stride = sx * sy;
                for y in 0..sy {
                    let base = self.index(index, y, 0);
                    square.extend((0..sz).map(|z| self.data[base + z * z_stride]));
                }
                Cow::Owned(square)
            }
        }
    }
}

fn encode_voxels<T: Voxel>(
    voxels: &[T],
    masks: &ChannelMasks,
    order: ByteOrder,
    mode: ColorMode,
    out: &mut [u8],
) {
    for (px, &voxel) in out.chunks_exact_mut(4).zip(voxels) {
        let v = voxel.to_word();
        let r = masks.r.extract(v);
        let word = match mode {
            ColorMode::Grayscale => order.pack_rgba(r, r, r, 255),
            ColorMode::Color => {
                let a = if masks.has_alpha() {
                    masks.a.extract(v)
                } else {
                    255
                };
                order.pack_rgba(r, masks.g.extract(v), masks.b.extract(v), a)
            }
        };
        px.copy_from_slice(&word.to_ne_bytes());
    }
}

/// Width-tagged voxel storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoxelBuffer {
    U8(Cube<u8>),
    U16(Cube<u16>),
    U32(Cube<u32>),
}

macro_rules! dispatch {
    ($buffer:expr, $cube:ident => $body:expr) => {
        match $buffer {
            VoxelBuffer::U8($cube) => $body,
            VoxelBuffer::U16($cube) => $body,
            VoxelBuffer::U32($cube) => $body,
        }
    };
}

impl VoxelBuffer {
    fn new(extent: Extent, width: VoxelWidth) -> Self {
        match width {
            VoxelWidth::One => VoxelBuffer::U8(Cube::new(extent)),
            VoxelWidth::Two => VoxelBuffer::U16(Cube::new(extent)),
            VoxelWidth::Four => VoxelBuffer::U32(Cube::new(extent)),
        }
    }

    pub fn len(&self) -> usize {
        dispatch!(self, cube => cube.data.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One axis-aligned plane of a grid, in the grid's own voxel type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SliceData<'a> {
    U8(Cow<'a, [u8]>),
    U16(Cow<'a, [u16]>),
    U32(Cow<'a, [u32]>),
}

impl SliceData<'_> {
    pub fn len(&self) -> usize {
        match self {
            SliceData::U8(s) => s.len(),
            SliceData::U16(s) => s.len(),
            SliceData::U32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Voxel `i` widened to 32 bits
    pub fn get(&self, i: usize) -> u32 {
        match self {
            SliceData::U8(s) => s[i] as u32,
            SliceData::U16(s) => s[i] as u32,
            SliceData::U32(s) => s[i],
        }
    }

    /// True when the slice is a view into the grid rather than a copy
    pub fn is_borrowed(&self) -> bool {
        match self {
            SliceData::U8(s) => matches!(s, Cow::Borrowed(_)),
            SliceData::U16(s) => matches!(s, Cow::Borrowed(_)),
            SliceData::U32(s) => matches!(s, Cow::Borrowed(_)),
        }
    }

    pub fn to_words(&self) -> Vec<u32> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

/// A 3D grid of fixed-width integer voxels
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    extent: Extent,
    width: VoxelWidth,
    byte_order: ByteOrder,
    buffer: VoxelBuffer,
    clean: bool,
    loaded: bool,
}

impl VoxelGrid {
    /// Create a zero-filled grid.
    ///
    /// Fails with [`CubeError::InvalidWidth`] unless `voxel_width` is 1, 2 or 4.
    pub fn new(extent: Extent, voxel_width: usize) -> Result<Self> {
        let width = VoxelWidth::try_from(voxel_width)?;
        if extent.is_empty() {
            return Err(CubeError::Configuration(format!(
                "grid extent must be positive on every axis, got {}",
                extent
            )));
        }

        Ok(Self {
            extent,
            width,
            byte_order: ByteOrder::detect(),
            buffer: VoxelBuffer::new(extent, width),
            clean: true,
            loaded: false,
        })
    }

    /// Override the detected byte order used by decode and encode
    pub fn with_byte_order(mut self, byte_order: ByteOrder) -> Self {
        self.byte_order = byte_order;
        self
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn voxel_width(&self) -> VoxelWidth {
        self.width
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn buffer(&self) -> &VoxelBuffer {
        &self.buffer
    }

    /// No data written since the last clear
    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// A full load cycle has completed
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Zero every voxel and reset the clean/loaded flags
    pub fn clear(&mut self) {
        dispatch!(&mut self.buffer, cube => cube.fill_zero());
        self.clean = true;
        self.loaded = false;
    }

    /// Write `values` as rows of `row_width` into the XY plane at `offset.z`.
    ///
    /// Values are narrowed to the voxel width. Writes that would leave the
    /// grid fail with [`CubeError::OutOfBounds`] and leave it untouched.
    pub fn write_plane(&mut self, values: &[u32], row_width: usize, offset: Offset) -> Result<()> {
        self.check_plane_write(values.len(), row_width, offset)?;
        dispatch!(&mut self.buffer, cube => cube.write_plane(values, row_width, offset));
        self.clean = false;
        Ok(())
    }

    /// Write an XYZ-aligned block of `dims` voxels (x fastest) at `offset`
    pub fn write_subcube(&mut self, values: &[u32], dims: Extent, offset: Offset) -> Result<()> {
        if values.len() != dims.voxel_count() {
            return Err(CubeError::InvalidDimensions(format!(
                "sub-cube {} needs {} values, got {}",
                dims,
                dims.voxel_count(),
                values.len()
            )));
        }
        if dims.is_empty() {
            self.clean = false;
            return Ok(());
        }
        if !span_fits(offset.x, dims.x, self.extent.x)
            || !span_fits(offset.y, dims.y, self.extent.y)
            || !span_fits(offset.z, dims.z, self.extent.z)
        {
            return Err(CubeError::OutOfBounds(format!(
                "sub-cube {} at ({}, {}, {}) exceeds grid {}",
                dims, offset.x, offset.y, offset.z, self.extent
            )));
        }

        dispatch!(&mut self.buffer, cube => cube.write_subcube(values, dims, offset));
        self.clean = false;
        Ok(())
    }

    /// Decode interleaved RGBA8 pixels, `src_width` per row, into the XY plane
    /// at `offset.z`.
    ///
    /// Each pixel becomes one voxel holding the leading `voxel_width` channels.
    pub fn decode_pixel_buffer(
        &mut self,
        pixels: &[u8],
        src_width: usize,
        offset: Offset,
    ) -> Result<()> {
        if pixels.len() % 4 != 0 {
            return Err(CubeError::Decode(format!(
                "pixel buffer length {} is not a multiple of 4",
                pixels.len()
            )));
        }
        self.check_plane_write(pixels.len() / 4, src_width, offset)?;

        let order = self.byte_order;
        dispatch!(&mut self.buffer, cube => cube.decode_pixels(pixels, src_width, offset, order));
        self.clean = false;
        Ok(())
    }

    /// Voxel at `(x, y, z)`
    pub fn get(&self, x: i64, y: i64, z: i64) -> Result<u32> {
        if !self.extent.contains(x, y, z) {
            return Err(CubeError::OutOfBounds(format!(
                "({}, {}, {}) is outside grid {}",
                x, y, z, self.extent
            )));
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        Ok(dispatch!(&self.buffer, cube => cube.get(x, y, z).to_word()))
    }

    /// The plane orthogonal to `axis` at `index`.
    ///
    /// Layouts: X gives `y` rows of `z`, Y gives `z` rows of `x`, Z gives `y`
    /// rows of `x`. Z slices borrow the buffer; X and Y copy.
    pub fn slice(&self, axis: Axis, index: i64) -> Result<SliceData<'_>> {
        let index = self.check_index(axis, index)?;
        Ok(match &self.buffer {
            VoxelBuffer::U8(cube) => SliceData::U8(cube.slice(axis, index)),
            VoxelBuffer::U16(cube) => SliceData::U16(cube.slice(axis, index)),
            VoxelBuffer::U32(cube) => SliceData::U32(cube.slice(axis, index)),
        })
    }

    /// Slice as a `(height, width)` array
    pub fn slice_array(&self, axis: Axis, index: i64) -> Result<Array2<u32>> {
        let words = self.slice(axis, index)?.to_words();
        let (width, height) = self.extent.plane_dims(axis);
        Array2::from_shape_vec((height, width), words)
            .map_err(|e| CubeError::InvalidDimensions(e.to_string()))
    }

    /// Render a slice into RGBA8 pixels of `plane_dims(axis)`
    pub fn encode_slice_rgba(
        &self,
        axis: Axis,
        index: i64,
        mode: ColorMode,
    ) -> Result<PixelBuffer> {
        let index = self.check_index(axis, index)?;
        let (width, height) = self.extent.plane_dims(axis);
        let mut pixels = PixelBuffer::new(width, height);
        let masks = ChannelMasks::for_width(self.width);
        let order = self.byte_order;

        dispatch!(&self.buffer, cube => {
            let square = cube.slice(axis, index);
            encode_voxels(&square, &masks, order, mode, &mut pixels.data);
        });
        Ok(pixels)
    }

    /// Copy of every voxel, widened to 32 bits, in storage order
    pub fn to_words(&self) -> Vec<u32> {
        dispatch!(&self.buffer, cube => cube.as_slice().iter().map(|v| v.to_word()).collect())
    }

    pub fn size_in_bytes(&self) -> usize {
        self.extent.voxel_count() * self.width.bytes()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} grid, {}-byte voxels, {} ({})",
            self.extent,
            self.width.bytes(),
            format_bytes(self.size_in_bytes()),
            if self.loaded {
                "loaded"
            } else if self.clean {
                "clean"
            } else {
                "partial"
            }
        )
    }

    fn check_index(&self, axis: Axis, index: i64) -> Result<usize> {
        let size = self.extent.get(axis);
        if !in_range(index, size) {
            return Err(CubeError::OutOfBounds(format!(
                "{} is out of bounds for axis {} (size {})",
                index, axis, size
            )));
        }
        Ok(index as usize)
    }

    fn check_plane_write(&self, len: usize, row_width: usize, offset: Offset) -> Result<()> {
        if row_width == 0 {
            return Err(CubeError::InvalidDimensions(
                "row width must be positive".to_string(),
            ));
        }
        if len == 0 {
            return Ok(());
        }

        let rows = len.div_ceil(row_width);
        let cols = row_width.min(len);
        if !span_fits(offset.x, cols, self.extent.x)
            || !span_fits(offset.y, rows, self.extent.y)
            || offset.z >= self.extent.z
        {
            return Err(CubeError::OutOfBounds(format!(
                "{}x{} plane at ({}, {}, {}) exceeds grid {}",
                cols, rows, offset.x, offset.y, offset.z, self.extent
            )));
        }
        Ok(())
    }
}
