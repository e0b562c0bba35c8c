//! Performance Benchmarks for Windowed Flow Training
//!
//! Run with: cargo bench
//!
//! Benchmarks cover:
//! - Sampler passes (random, fair, sequential)
//! - Window materialization and batch assembly
//! - Classifier forward pass

use candle_core::{Device, ModuleT, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nids_window::{
    transform::one_hot, BatchLoader, FairSlidingWindowSampler, ModelConfig, PipelineBuilder,
    RandomSlidingWindowSampler, RecordStore, SequentialWindowSampler, WindowClassifier,
    WindowLoader, WindowSampler,
};

const NUMERIC: usize = 29;
const CATEGORICAL: usize = 11;
const LEVELS: usize = 32;

fn synthetic_store(n: usize) -> RecordStore {
    let numeric: Vec<f32> = (0..n * NUMERIC).map(|i| (i % 97) as f32 / 97.0).collect();
    let categorical: Vec<u32> = (0..n * CATEGORICAL).map(|i| (i % LEVELS) as u32).collect();
    let labels: Vec<f32> = (0..n).map(|i| if i % 7 == 0 { 1.0 } else { 0.0 }).collect();
    let mut store = RecordStore::new(numeric, NUMERIC, categorical, CATEGORICAL, labels)
        .expect("synthetic store");
    let mut encoding = PipelineBuilder::new();
    encoding.add_step("categorical_one_hot", 1, one_hot(LEVELS));
    store.set_categorical_transform(encoding.build());
    store
}

// ═══════════════════════════════════════════════════════════════════════════
// SAMPLER BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn bench_sampler_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("sampler_pass");
    for n in [1_000usize, 10_000, 100_000] {
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("random", n), &n, |b, &n| {
            let mut sampler = RandomSlidingWindowSampler::new(n, 8).expect("sampler");
            b.iter(|| black_box(sampler.sample_epoch()))
        });

        let labels: Vec<f32> = (0..n).map(|i| if i % 7 == 0 { 1.0 } else { 0.0 }).collect();
        group.bench_with_input(BenchmarkId::new("fair", n), &labels, |b, labels| {
            let mut sampler = FairSlidingWindowSampler::new(labels, 0.0, 8).expect("sampler");
            b.iter(|| black_box(sampler.sample_epoch()))
        });

        group.bench_with_input(BenchmarkId::new("sequential", n), &n, |b, &n| {
            let mut sampler = SequentialWindowSampler::new(n, 8).expect("sampler");
            b.iter(|| black_box(sampler.sample_epoch()))
        });
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// BATCH BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn bench_window_materialization(c: &mut Criterion) {
    let store = synthetic_store(1_000);
    let mut sampler = SequentialWindowSampler::new(store.len(), 8).expect("sampler");
    let windows = sampler.sample_epoch();

    c.bench_function("window_materialization", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % windows.len();
            black_box(store.window(&windows[i]).expect("window"))
        })
    });
}

fn bench_batch_assembly(c: &mut Criterion) {
    let store = synthetic_store(2_000);
    let mut group = c.benchmark_group("batch_assembly");
    for batch_size in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            &batch_size,
            |b, &batch_size| {
                let sampler = RandomSlidingWindowSampler::new(store.len(), 8).expect("sampler");
                let mut loader = WindowLoader::new(&store, sampler, batch_size).expect("loader");
                b.iter(|| {
                    let batch = loader.batches().next().expect("batch").expect("assembled");
                    black_box(batch)
                })
            },
        );
    }
    group.finish();
}

// ═══════════════════════════════════════════════════════════════════════════
// MODEL BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════

fn bench_classifier_forward(c: &mut Criterion) {
    let device = Device::Cpu;
    let input_dim = NUMERIC + CATEGORICAL * LEVELS;
    let (model, _varmap) =
        WindowClassifier::new_random(input_dim, ModelConfig::default(), &device).expect("model");

    let mut group = c.benchmark_group("classifier_forward");
    for window in [4usize, 8, 16] {
        let xs = Tensor::randn(0f32, 1.0, (64, window, input_dim), &device).expect("input");
        group.bench_with_input(BenchmarkId::from_parameter(window), &xs, |b, xs| {
            b.iter(|| black_box(model.forward_t(xs, false).expect("forward")))
        });
    }
    group.finish();
}

criterion_group!(samplers, bench_sampler_pass);
criterion_group!(batches, bench_window_materialization, bench_batch_assembly);
criterion_group!(model, bench_classifier_forward);
criterion_main!(samplers, batches, model);
