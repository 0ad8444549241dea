//! Example: load a small synthetic volume from disk and render a slice
//!
//! Run with: RUST_LOG=debug cargo run --example load_volume

use datacube::codec::{encode_png, encode_png_data_url};
use datacube::utils::percent;
use datacube::{Axis, Extent, FileSystemTileSource, PixelBuffer, Volume, VolumeConfig};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const CHUNK: usize = 16;
const BUNDLE: usize = 8;

/// A sphere of segment ids on a gradient background
fn tile(id: &str, x0: usize, y0: usize, z: usize) -> PixelBuffer {
    let center = CHUNK as f64;
    let mut pixels = PixelBuffer::new(CHUNK, CHUNK);
    for (i, px) in pixels.data.chunks_exact_mut(4).enumerate() {
        let (x, y) = (x0 + i % CHUNK, y0 + i / CHUNK);
        let d = ((x as f64 - center).powi(2)
            + (y as f64 - center).powi(2)
            + (z as f64 - center).powi(2))
        .sqrt();
        let value = if id == "segmentation" {
            // two-byte id in R and G
            if d < 10.0 { [0, 42] } else { [0, 0] }
        } else {
            [(40 + x * 6) as u8, 0]
        };
        px.copy_from_slice(&[value[0], value[1], 0, 255]);
    }
    pixels
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Datacube Volume Loading Demo");
    println!("============================\n");

    let temp_dir = tempfile::TempDir::new()?;
    let config = VolumeConfig::new("channel", "segmentation")
        .with_base_url("file:///cache")
        .with_chunking(CHUNK, BUNDLE)
        .with_extent(Extent::cube(2 * CHUNK))
        .with_retry_delay(Duration::from_millis(100));
    config.validate()?;

    let layout = config.layout()?;
    println!("Layout: {}", layout.summary());

    // Write one JSON bundle of PNG data URLs per chunk spec
    let source = FileSystemTileSource::new(temp_dir.path());
    for id in [&config.channel.id, &config.segmentation.id] {
        for spec in layout.specs(id) {
            let images = (0..spec.depth)
                .map(|slot| encode_png_data_url(&tile(id, spec.x, spec.y, spec.z + slot)))
                .collect::<datacube::Result<Vec<_>>>()?;
            let path = source.path_for(&spec.url);
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, serde_json::to_vec(&images)?).await?;
        }
    }
    println!("Wrote tiles under {}\n", temp_dir.path().display());

    let volume = Volume::new(config, Arc::new(source))?;
    let report = volume.load().await?;
    println!(
        "Loaded {} chunks ({} failed, {} retried) in {} ms, progress {}%",
        report.loaded,
        report.failed,
        report.retried,
        report.duration().num_milliseconds(),
        percent(volume.progress())
    );
    println!("{}\n", volume.summary());

    let id = volume.pick(Axis::Z, CHUNK as i64, 0.5, 0.5)?;
    println!("Picked segment {} at the volume center", id);
    println!("Selection: {:?}", volume.selected_segments());

    let out = temp_dir.path().join("slice.png");
    let mut surface = |pixels: &PixelBuffer| -> datacube::Result<()> {
        std::fs::write(&out, encode_png(pixels)?)?;
        Ok(())
    };
    volume.render_to(Axis::Z, CHUNK as i64, &mut surface)?;
    println!("Rendered highlighted slice to {}", out.display());

    Ok(())
}
