use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use image::{Rgb, RgbImage};
use imgembed::{BatchCoordinator, PipelineConfig};
use std::hint::black_box;
use std::path::Path;
use tempfile::TempDir;

fn fixtures(dir: &Path, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("img{i}.png"));
            RgbImage::from_fn(64, 64, |x, y| {
                let v = ((x + y + i as u32 * 13) % 256) as u8;
                Rgb([v, 255 - v, v / 2])
            })
            .save(&path)
            .expect("fixture should be written");
            path.to_string_lossy().into_owned()
        })
        .collect()
}

fn start(
    rt: &tokio::runtime::Runtime,
    mode: &str,
    workers: usize,
) -> (BatchCoordinator, TempDir) {
    let staging = tempfile::tempdir().expect("staging dir");
    let mut config = PipelineConfig::default();
    config.staging.dir = staging.path().to_path_buf();
    config.fetch.workers = workers;
    config.fetch.allow_remote = false;
    config.semantic.mode = mode.to_string();
    let coordinator = rt
        .block_on(BatchCoordinator::start(&config))
        .expect("pipeline should start");
    (coordinator, staging)
}

/// End-to-end batch latency for the two asset-free models
fn bench_batch_sizes(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let images = tempfile::tempdir().expect("image dir");
    let sources = fixtures(images.path(), 64);

    let mut group = c.benchmark_group("batch");
    for mode in ["fast", "thumbnail"] {
        let (coordinator, _staging) = start(&rt, mode, 4);
        for size in [1usize, 8, 32, 64] {
            let batch = sources[..size].to_vec();
            group.throughput(Throughput::Elements(size as u64));
            group.bench_with_input(BenchmarkId::new(mode, size), &batch, |b, batch| {
                b.to_async(&rt).iter(|| async {
                    let results = coordinator
                        .handle_batch(batch.clone())
                        .await
                        .expect("batch should complete");
                    black_box(results)
                });
            });
        }
        rt.block_on(coordinator.shutdown()).expect("shutdown");
    }
    group.finish();
}

/// How the fetch pool width affects a fixed batch
fn bench_fetch_workers(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let images = tempfile::tempdir().expect("image dir");
    let batch = fixtures(images.path(), 32);

    let mut group = c.benchmark_group("fetch_workers");
    group.throughput(Throughput::Elements(batch.len() as u64));
    for workers in [1usize, 2, 4, 8] {
        let (coordinator, _staging) = start(&rt, "thumbnail", workers);
        group.bench_function(format!("{workers}_workers"), |b| {
            b.to_async(&rt).iter(|| async {
                black_box(
                    coordinator
                        .handle_batch(batch.clone())
                        .await
                        .expect("batch should complete"),
                )
            });
        });
        rt.block_on(coordinator.shutdown()).expect("shutdown");
    }
    group.finish();
}

criterion_group!(benches, bench_batch_sizes, bench_fetch_workers);
criterion_main!(benches);
