//! Segment picking and highlighted slice rendering
//!
//! Both operations take the grids and the selection explicitly, so they can
//! run against any pair of grids, including ones still being loaded.

use crate::error::{CubeError, Result};
use crate::grid::VoxelGrid;
use crate::selection::SegmentSelection;
use crate::types::{Axis, ColorMode, PixelBuffer};

/// Color blended over selected segments
pub const HIGHLIGHT_RGB: [u8; 3] = [0x00, 0xff, 0xff];

/// Blend weight of [`HIGHLIGHT_RGB`]
pub const HIGHLIGHT_ALPHA: f32 = 0.25;

/// Anything that can display a packed RGBA8 buffer
pub trait RenderSurface {
    fn blit(&mut self, pixels: &PixelBuffer) -> Result<()>;
}

impl<F> RenderSurface for F
where
    F: FnMut(&PixelBuffer) -> Result<()>,
{
    fn blit(&mut self, pixels: &PixelBuffer) -> Result<()> {
        self(pixels)
    }
}

/// Grid coordinate of pixel `(col, row)` on the `axis` slice at `index`
pub fn plane_to_grid(axis: Axis, index: i64, col: i64, row: i64) -> (i64, i64, i64) {
    match axis {
        Axis::X => (index, row, col),
        Axis::Y => (col, index, row),
        Axis::Z => (col, row, index),
    }
}

fn normalized_to_pixel(norm: f64, size: usize) -> Result<i64> {
    if !norm.is_finite() || !(0.0..=1.0).contains(&norm) {
        return Err(CubeError::OutOfBounds(format!(
            "normalized coordinate {} is outside [0, 1]",
            norm
        )));
    }
    Ok((norm * size.saturating_sub(1) as f64).round() as i64)
}

/// Read the segment under a normalized position on a rendered slice.
///
/// Non-zero ids are added to `selection`. The id (possibly 0) is returned.
pub fn pick(
    segmentation: &VoxelGrid,
    selection: &mut SegmentSelection,
    axis: Axis,
    index: i64,
    norm_x: f64,
    norm_y: f64,
) -> Result<u32> {
    let (width, height) = segmentation.extent().plane_dims(axis);
    let col = normalized_to_pixel(norm_x, width)?;
    let row = normalized_to_pixel(norm_y, height)?;

    let (x, y, z) = plane_to_grid(axis, index, col, row);
    let id = segmentation.get(x, y, z)?;
    if id > 0 {
        selection.insert(id);
    }
    Ok(id)
}

/// Grayscale channel slice with selected segments tinted.
///
/// The segmentation is sampled nearest-neighbour when its extent differs from
/// the channel's. Black (background) pixels are never tinted.
pub fn render_channel_slice(
    channel: &VoxelGrid,
    segmentation: &VoxelGrid,
    selection: &SegmentSelection,
    axis: Axis,
    index: i64,
) -> Result<PixelBuffer> {
    let mut pixels = channel.encode_slice_rgba(axis, index, ColorMode::Grayscale)?;
    if selection.is_empty() {
        return Ok(pixels);
    }

    let channel_size = channel.extent().get(axis);
    let seg_size = segmentation.extent().get(axis);
    let seg_index = (index as usize * seg_size / channel_size) as i64;
    let labels = segmentation.slice(axis, seg_index)?;

    let (width, height) = (pixels.width, pixels.height);
    let (seg_width, seg_height) = segmentation.extent().plane_dims(axis);
    let rgb_mask = channel.byte_order().rgb_mask();

    for (i, px) in pixels.data.chunks_exact_mut(4).enumerate() {
        let (col, row) = (i % width, i / width);
        let seg_col = col * seg_width / width;
        let seg_row = row * seg_height / height;

        if !selection.contains(labels.get(seg_row * seg_width + seg_col)) {
            continue;
        }
        // channel data is never pure black, so zero RGB is background
        if u32::from_ne_bytes([px[0], px[1], px[2], px[3]]) & rgb_mask == 0 {
            continue;
        }

        for (c, &tint) in px.iter_mut().zip(&HIGHLIGHT_RGB) {
            let blended = *c as f32 * (1.0 - HIGHLIGHT_ALPHA) + tint as f32 * HIGHLIGHT_ALPHA;
            *c = blended.round() as u8;
        }
    }

    Ok(pixels)
}
