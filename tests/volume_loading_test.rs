//! End-to-end load cycles against scripted and file system tile sources

use async_trait::async_trait;
use bytes::Bytes;
use datacube::codec::encode_png_data_url;
use datacube::{
    Axis, ChunkSpec, CubeError, Extent, FileSystemTileSource, LoadPhase, PixelBuffer, SourceScheme,
    TilePayload, TileSource, Volume, VolumeConfig,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CHUNK: usize = 4;
const BUNDLE: usize = 2;

fn config() -> VolumeConfig {
    VolumeConfig::new("ch", "seg")
        .with_base_url("mem://tiles")
        .with_chunking(CHUNK, BUNDLE)
        .with_extent(Extent::cube(2 * CHUNK))
}

/// Value stored in every voxel of plane `z`
fn plane_value(z: usize) -> u8 {
    z as u8 + 1
}

/// JSON bundle for `spec`, one PNG per slot
fn bundle_body(spec: &ChunkSpec) -> String {
    let images: Vec<String> = (0..spec.depth)
        .map(|slot| {
            let v = plane_value(spec.z + slot);
            let rgba = [v, v, 0, 255].repeat(spec.width * spec.height);
            let plane = PixelBuffer::from_rgba(spec.width, spec.height, rgba).unwrap();
            encode_png_data_url(&plane).unwrap()
        })
        .collect();
    serde_json::to_string(&images).unwrap()
}

enum Step {
    Fail,
    Hang,
}

/// Serves generated bundles, following a per-URL script first
struct ScriptedSource {
    specs: HashMap<String, ChunkSpec>,
    script: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<HashMap<String, usize>>,
    fetches: AtomicUsize,
}

impl ScriptedSource {
    fn new(config: &VolumeConfig) -> Self {
        let layout = config.layout().unwrap();
        let specs = [&config.channel.id, &config.segmentation.id]
            .into_iter()
            .flat_map(|id| layout.specs(id))
            .map(|spec| (spec.url.clone(), spec))
            .collect();
        Self {
            specs,
            script: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    fn script(self, url: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.script
            .lock()
            .insert(url.to_string(), steps.into_iter().collect());
        self
    }

    fn calls(&self, url: &str) -> usize {
        self.calls.lock().get(url).copied().unwrap_or(0)
    }
}

#[async_trait]
impl TileSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> datacube::Result<TilePayload> {
        *self.calls.lock().entry(url.to_string()).or_default() += 1;
        let fetch = self.fetches.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().get_mut(url).and_then(|steps| steps.pop_front());

        // stagger completions so chunks settle across several polls
        for _ in 0..fetch % 4 {
            tokio::task::yield_now().await;
        }

        match step {
            Some(Step::Fail) => Err(CubeError::fetch_failed(url, "503 Service Unavailable")),
            Some(Step::Hang) => std::future::pending().await,
            None => {
                let spec = self
                    .specs
                    .get(url)
                    .ok_or_else(|| CubeError::fetch_failed(url, "404 Not Found"))?;
                TilePayload::from_response(Bytes::from(bundle_body(spec)))
            }
        }
    }

    fn scheme(&self) -> SourceScheme {
        SourceScheme::Http
    }
}

fn first_channel_spec(config: &VolumeConfig) -> ChunkSpec {
    config.layout().unwrap().specs(&config.channel.id).remove(0)
}

/// Channel voxels inside `spec`'s region, then outside it
fn region_values(volume: &Volume, spec: &ChunkSpec) -> (Vec<u32>, Vec<u32>) {
    let grid = volume.channel();
    let grid = grid.read();
    let extent = grid.extent();
    let (mut inside, mut outside) = (Vec::new(), Vec::new());
    for z in 0..extent.z {
        for y in 0..extent.y {
            for x in 0..extent.x {
                let v = grid.get(x as i64, y as i64, z as i64).unwrap();
                let hit = (spec.x..spec.x + spec.width).contains(&x)
                    && (spec.y..spec.y + spec.height).contains(&y)
                    && (spec.z..spec.z + spec.depth).contains(&z);
                if hit {
                    inside.push(v);
                } else {
                    outside.push(v);
                }
            }
        }
    }
    (inside, outside)
}

#[tokio::test]
async fn test_full_load() {
    let config = config();
    let volume = Volume::new(config.clone(), Arc::new(ScriptedSource::new(&config))).unwrap();

    let report = volume.load().await.unwrap();
    assert_eq!(report.loaded, 32);
    assert_eq!(report.failed, 0);
    assert!(report.finished_at >= report.started_at);
    assert_eq!(volume.progress(), 1.0);

    let channel = volume.channel();
    let segmentation = volume.segmentation();
    for z in 0..8 {
        let v = plane_value(z) as u32;
        let plane = channel.read().slice(Axis::Z, z as i64).unwrap().to_words();
        assert!(plane.iter().all(|&w| w == v), "channel plane {}", z);
        assert_eq!(segmentation.read().get(3, 5, z as i64).unwrap(), v << 8 | v);
    }
}

#[tokio::test(start_paused = true)]
async fn test_chunk_retried_once_then_loaded() {
    let config = config();
    let spec = first_channel_spec(&config);
    let source = Arc::new(ScriptedSource::new(&config).script(&spec.url, [Step::Fail]));
    let volume = Volume::new(config, source.clone()).unwrap();

    let started = tokio::time::Instant::now();
    let report = volume.load().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(1000));
    assert_eq!(source.calls(&spec.url), 2);
    assert_eq!((report.loaded, report.failed, report.retried), (32, 0, 1));
    assert_eq!(volume.progress(), 1.0);

    let (inside, _) = region_values(&volume, &spec);
    assert!(inside.iter().all(|&v| v == 1 || v == 2));
}

#[tokio::test(start_paused = true)]
async fn test_chunk_failing_twice_stays_empty() {
    let config = config();
    let spec = first_channel_spec(&config);
    let source =
        Arc::new(ScriptedSource::new(&config).script(&spec.url, [Step::Fail, Step::Fail]));
    let volume = Volume::new(config, source.clone()).unwrap();

    let report = volume.load().await.unwrap();

    assert_eq!(source.calls(&spec.url), 2);
    assert_eq!((report.loaded, report.failed, report.retried), (31, 1, 1));
    assert!(!report.is_complete());
    assert_eq!(volume.phase(), LoadPhase::Completed);
    assert!(volume.channel().read().is_loaded());
    assert_eq!(volume.progress(), 1.0);

    let (inside, outside) = region_values(&volume, &spec);
    assert!(inside.iter().all(|&v| v == 0));
    assert!(outside.iter().all(|&v| v > 0));
}

#[tokio::test]
async fn test_abort_mid_load() {
    let config = config();
    let spec = first_channel_spec(&config);
    let source = Arc::new(ScriptedSource::new(&config).script(&spec.url, [Step::Hang]));
    let volume = Volume::new(config, source).unwrap();

    let aborter = async {
        while volume.pending_requests() != vec![spec.url.clone()] {
            tokio::task::yield_now().await;
        }
        let before = volume.channel().read().to_words();
        assert!(volume.abort());
        assert!(!volume.abort());
        before
    };
    let (result, before) = tokio::join!(volume.load(), aborter);

    assert!(matches!(result, Err(CubeError::Cancelled)));
    assert_eq!(volume.phase(), LoadPhase::Aborted);
    assert!(volume.pending_requests().is_empty());

    let channel = volume.channel();
    let channel = channel.read();
    assert_eq!(channel.to_words(), before);
    assert!(!channel.is_loaded());
    assert!(!volume.segmentation().read().is_loaded());
    assert_eq!(volume.progress(), 0.0);
}

#[tokio::test]
async fn test_load_while_loading() {
    let config = config();
    let spec = first_channel_spec(&config);
    let source = Arc::new(ScriptedSource::new(&config).script(&spec.url, [Step::Hang]));
    let volume = Volume::new(config, source).unwrap();

    let second = async {
        while volume.phase() != LoadPhase::Loading {
            tokio::task::yield_now().await;
        }
        let err = volume.load().await.unwrap_err();
        volume.abort();
        err
    };
    let (first, second) = tokio::join!(volume.load(), second);

    assert!(matches!(second, CubeError::AlreadyLoading));
    assert!(matches!(first, Err(CubeError::Cancelled)));
}

#[tokio::test]
async fn test_progress_is_monotonic() {
    let config = config();
    let volume = Volume::new(config.clone(), Arc::new(ScriptedSource::new(&config))).unwrap();

    let mut samples = Vec::new();
    let watcher = async {
        loop {
            samples.push(volume.progress());
            if volume.phase() == LoadPhase::Completed {
                break;
            }
            tokio::task::yield_now().await;
        }
    };
    let (report, _) = tokio::join!(volume.load(), watcher);
    report.unwrap();

    assert!(samples.windows(2).all(|w| w[0] <= w[1]), "{:?}", samples);
    assert!(samples.iter().any(|&p| p > 0.0 && p < 1.0), "{:?}", samples);
    assert_eq!(samples.last().copied(), Some(1.0));
}

#[tokio::test]
async fn test_reload_after_abort() {
    let config = config();
    let spec = first_channel_spec(&config);
    let source = Arc::new(ScriptedSource::new(&config).script(&spec.url, [Step::Hang]));
    let volume = Volume::new(config, source).unwrap();

    let aborter = async {
        while volume.pending_requests().is_empty() {
            tokio::task::yield_now().await;
        }
        volume.abort();
    };
    let (first, _) = tokio::join!(volume.load(), aborter);
    assert!(first.is_err());

    // the script is used up, so this cycle completes
    let report = volume.load().await.unwrap();
    assert_eq!(report.loaded, 32);
    let (inside, _) = region_values(&volume, &spec);
    assert!(inside.iter().all(|&v| v == 1 || v == 2));
}

#[tokio::test(start_paused = true)]
async fn test_file_system_volume() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let config = config().with_base_url("file:///tiles");
    let source = FileSystemTileSource::new(temp_dir.path());

    let layout = config.layout().unwrap();
    let mut missing = None;
    for id in [&config.channel.id, &config.segmentation.id] {
        for spec in layout.specs(id) {
            // leave one segmentation bundle out
            if id == &config.segmentation.id && spec.z == CHUNK {
                missing.get_or_insert(spec);
                continue;
            }
            let path = source.path_for(&spec.url);
            tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
            tokio::fs::write(&path, bundle_body(&spec)).await.unwrap();
        }
    }
    let missing = missing.unwrap();

    let json = config.to_json().unwrap();
    let config = VolumeConfig::from_json(&json).unwrap();
    let volume = Volume::new(config, Arc::new(source)).unwrap();

    let report = volume.load().await.unwrap();
    assert_eq!(report.failed, 4);
    assert_eq!(report.loaded, 28);

    let segmentation = volume.segmentation();
    let (x, y) = (missing.x as i64, missing.y as i64);
    assert_eq!(segmentation.read().get(x, y, CHUNK as i64).unwrap(), 0);
    assert_eq!(segmentation.read().get(0, 0, 0).unwrap(), 0x0101);

    let id = volume.pick(Axis::Y, 2, 0.0, 0.0).unwrap();
    assert_eq!(id, 0x0101);
    let pixels = volume.render_channel_slice(Axis::Y, 2).unwrap();
    assert_eq!((pixels.width, pixels.height), (8, 8));
    // row 0 of a Y slice is z = 0, which carries the selected segment
    assert_ne!(pixels.pixel(0, 0), [1, 1, 1, 255]);
    assert_eq!(pixels.pixel(0, 1), [2, 2, 2, 255]);
}
