//! Prediction benchmarks.
//!
//! Covers the regime boundaries: single row vs batch, few trees vs many,
//! and the float8 bulk kernels.
//!
//! ```bash
//! cargo bench
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::prelude::*;

use canopy::data::RowMatrix;
use canopy::float8::{F8E4M3, Quantizer};
use canopy::inference::Predictor;
use canopy::repr::NodeMode;
use canopy::FlatEnsemble;

/// Build a synthetic ensemble of depth-3 trees over `num_features` columns.
fn synthetic_ensemble(num_trees: usize, num_features: usize, seed: u64) -> FlatEnsemble<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut ens = FlatEnsemble::<f32> {
        n_targets: 1,
        ..Default::default()
    };
    for t in 0..num_trees as i64 {
        // Seven branches + eight leaves in heap order.
        let n = 15i64;
        let base = t * n;
        for node in 0..n {
            let is_leaf = node >= 7;
            ens.nodes_treeids.push(t);
            ens.nodes_nodeids.push(base + node);
            ens.nodes_featureids
                .push(if is_leaf { 0 } else { rng.gen_range(0..num_features as i64) });
            ens.nodes_modes.push(if is_leaf {
                NodeMode::Leaf
            } else {
                NodeMode::BranchLeq
            });
            ens.nodes_values
                .push(if is_leaf { 0.0 } else { rng.gen_range(-1.0..1.0) });
            ens.nodes_truenodeids
                .push(if is_leaf { 0 } else { base + node * 2 + 1 });
            ens.nodes_falsenodeids
                .push(if is_leaf { 0 } else { base + node * 2 + 2 });
            if is_leaf {
                ens.target_treeids.push(t);
                ens.target_nodeids.push(base + node);
                ens.target_ids.push(0);
                ens.target_weights.push(rng.gen_range(-1.0..1.0));
            }
        }
    }
    ens
}

fn random_input(num_rows: usize, num_features: usize, seed: u64) -> RowMatrix<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..num_rows * num_features)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    RowMatrix::from_vec(data, num_rows, num_features)
}

fn bench_batch_sizes(c: &mut Criterion) {
    let forest = synthetic_ensemble(100, 16, 7).compile().unwrap();
    let predictor = Predictor::new(&forest);

    let mut group = c.benchmark_group("predict/batch_size");
    for &num_rows in &[1usize, 10, 100, 1_000, 10_000] {
        let x = random_input(num_rows, 16, 11);
        group.throughput(Throughput::Elements(num_rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(num_rows), &x, |b, x| {
            b.iter(|| black_box(predictor.predict(x).unwrap()));
        });
    }
    group.finish();
}

fn bench_tree_counts(c: &mut Criterion) {
    let mut group = c.benchmark_group("predict/tree_count");
    for &num_trees in &[10usize, 100, 1_000] {
        let forest = synthetic_ensemble(num_trees, 16, 13).compile().unwrap();
        let predictor = Predictor::new(&forest);
        let x = random_input(256, 16, 17);
        group.throughput(Throughput::Elements(256));
        group.bench_with_input(
            BenchmarkId::from_parameter(num_trees),
            &x,
            |b, x| {
                b.iter(|| black_box(predictor.predict(x).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_quantize(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(19);
    let data: Vec<f32> = (0..1 << 16).map(|_| rng.gen_range(-400.0..400.0)).collect();
    let quantizer = Quantizer::new(1.0, F8E4M3::ZERO, true).unwrap();

    let mut group = c.benchmark_group("float8");
    group.throughput(Throughput::Elements(data.len() as u64));
    group.bench_function("quantize_e4m3", |b| {
        b.iter(|| black_box(quantizer.quantize(&data)));
    });
    let codes = quantizer.quantize(&data);
    group.bench_function("dequantize_e4m3", |b| {
        b.iter(|| black_box(quantizer.dequantize(&codes)));
    });
    group.finish();
}

criterion_group!(benches, bench_batch_sizes, bench_tree_counts, bench_quantize);
criterion_main!(benches);
