use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use datacube::{Axis, ColorMode, Extent, Offset, VoxelGrid};
use std::hint::black_box;

fn filled_grid(size: usize, width: usize) -> VoxelGrid {
    let extent = Extent::cube(size);
    let mut grid = VoxelGrid::new(extent, width).unwrap();
    let values: Vec<u32> = (0..extent.voxel_count() as u32).collect();
    grid.write_subcube(&values, extent, Offset::default()).unwrap();
    grid
}

pub fn bench_slice_each_axis(c: &mut Criterion) {
    let mut group = c.benchmark_group("slice");
    for width in [1, 2, 4] {
        let grid = filled_grid(256, width);
        for axis in Axis::ALL {
            group.bench_with_input(
                BenchmarkId::new(format!("{}", axis), width),
                &axis,
                |b, &axis| b.iter(|| black_box(grid.slice(axis, 128).unwrap().len())),
            );
        }
    }
    group.finish();
}

pub fn bench_encode_slice(c: &mut Criterion) {
    let grid = filled_grid(256, 2);
    let mut group = c.benchmark_group("encode_slice_rgba");
    for axis in Axis::ALL {
        group.bench_function(format!("{}", axis), |b| {
            b.iter(|| black_box(grid.encode_slice_rgba(axis, 128, ColorMode::Color).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_slice_each_axis, bench_encode_slice);
criterion_main!(benches);
