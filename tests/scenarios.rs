//! End-to-end scenarios exercising the public API: compile a description,
//! evaluate batches, check codec behavior at the boundaries.

use approx::assert_abs_diff_eq;
use canopy::data::RowMatrix;
use canopy::float8::{F8E4M3, Quantizer};
use canopy::inference::{ClassLabels, Classifier, Labels, Predictor};
use canopy::repr::NodeMode::{self, *};
use canopy::repr::{Aggregate, PostTransform};
use canopy::{FlatEnsemble, RecursiveEnsemble};

fn stump(missing_goes_true: bool) -> FlatEnsemble<f32> {
    FlatEnsemble {
        aggregate: Aggregate::Sum,
        n_targets: 1,
        nodes_treeids: vec![0, 0, 0],
        nodes_nodeids: vec![0, 1, 2],
        nodes_featureids: vec![0, 0, 0],
        nodes_modes: vec![BranchLeq, Leaf, Leaf],
        nodes_values: vec![0.5, 0.0, 0.0],
        nodes_truenodeids: vec![1, 0, 0],
        nodes_falsenodeids: vec![2, 0, 0],
        nodes_missing_value_tracks_true: if missing_goes_true {
            vec![1, 0, 0]
        } else {
            vec![]
        },
        target_treeids: vec![0, 0],
        target_nodeids: vec![1, 2],
        target_ids: vec![0, 0],
        target_weights: vec![1.0, -1.0],
        ..Default::default()
    }
}

#[test]
fn single_stump_sum() {
    let forest = stump(false).compile().unwrap();
    let predictor = Predictor::new(&forest);
    let x = RowMatrix::from_vec(vec![0.4f32, 0.6], 2, 1);
    let out = predictor.predict(&x).unwrap();
    assert_eq!(out.as_slice(), &[1.0, -1.0]);
}

#[test]
fn missing_track_routes_nan_to_true() {
    let forest = stump(true).compile().unwrap();
    let predictor = Predictor::new(&forest);
    let x = RowMatrix::single_row(vec![f32::NAN]);
    let out = predictor.predict(&x).unwrap();
    assert_eq!(out.as_slice(), &[1.0]);
}

#[test]
fn categorical_chain_folds_to_bitmask() {
    // BRANCH_EQ on categories 1, 3, 5, all sharing the +1 leaf; the false
    // chain ends at the -1 leaf.
    let ens = FlatEnsemble::<f32> {
        n_targets: 1,
        nodes_treeids: vec![0; 5],
        nodes_nodeids: vec![0, 1, 2, 3, 4],
        nodes_featureids: vec![0; 5],
        nodes_modes: vec![BranchEq, BranchEq, BranchEq, Leaf, Leaf],
        nodes_values: vec![1.0, 3.0, 5.0, 0.0, 0.0],
        nodes_truenodeids: vec![3, 3, 3, 0, 0],
        nodes_falsenodeids: vec![1, 2, 4, 0, 0],
        target_treeids: vec![0, 0],
        target_nodeids: vec![3, 4],
        target_ids: vec![0, 0],
        target_weights: vec![1.0, -1.0],
        ..Default::default()
    };
    let forest = ens.compile().unwrap();

    // A single membership node with mask 0b10101 = 21.
    let members: Vec<_> = forest
        .nodes()
        .iter()
        .filter(|n| n.mode() == NodeMode::BranchMember)
        .collect();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].value().to_bits(), 21);

    let predictor = Predictor::new(&forest);
    let x = RowMatrix::from_vec(vec![3.0f32, 2.0, 5.0], 3, 1);
    let out = predictor.predict(&x).unwrap();
    assert_eq!(out.as_slice(), &[1.0, -1.0, 1.0]);
}

#[test]
fn binary_classifier_all_positive_weights() {
    let ens = FlatEnsemble::<f32> {
        post_transform: PostTransform::Logistic,
        n_targets: 2,
        nodes_treeids: vec![0, 0, 0],
        nodes_nodeids: vec![0, 1, 2],
        nodes_featureids: vec![0, 0, 0],
        nodes_modes: vec![BranchLeq, Leaf, Leaf],
        nodes_values: vec![0.5, 0.0, 0.0],
        nodes_truenodeids: vec![1, 0, 0],
        nodes_falsenodeids: vec![2, 0, 0],
        target_treeids: vec![0, 0],
        target_nodeids: vec![1, 2],
        target_ids: vec![1, 1],
        target_weights: vec![0.7, 0.2],
        ..Default::default()
    };
    let forest = ens.compile().unwrap();
    assert!(forest.binary_case());
    assert!(forest.weights_all_positive());

    let clf = Classifier::new(&forest, ClassLabels::Int64(vec![0, 1])).unwrap();
    let x = RowMatrix::from_vec(vec![0.1f32], 1, 1);
    let (scores, labels) = clf.predict(&x).unwrap();

    let sigma = 1.0f32 / (1.0 + (-0.7f32).exp());
    assert_abs_diff_eq!(scores.row(0)[1], sigma, epsilon = 1e-6);
    assert_abs_diff_eq!(scores.row(0)[0], 1.0 - sigma, epsilon = 1e-6);
    assert_eq!(labels, Labels::Int64(vec![1]));
}

#[test]
fn tree_parallel_merge_is_exact_under_sum() {
    // 1000 trees, 256 rows, integer leaf weights: the tree-partitioned
    // regime must match the serial result exactly.
    let mut ens = FlatEnsemble::<f32> {
        n_targets: 1,
        ..Default::default()
    };
    for t in 0..1000i64 {
        let base = t * 3;
        ens.nodes_treeids.extend([t; 3]);
        ens.nodes_nodeids.extend([base, base + 1, base + 2]);
        ens.nodes_featureids.extend([0, 0, 0]);
        ens.nodes_modes.extend([BranchLeq, Leaf, Leaf]);
        ens.nodes_values.extend([2.0, 0.0, 0.0]);
        ens.nodes_truenodeids.extend([base + 1, 0, 0]);
        ens.nodes_falsenodeids.extend([base + 2, 0, 0]);
        ens.target_treeids.extend([t; 2]);
        ens.target_nodeids.extend([base + 1, base + 2]);
        ens.target_ids.extend([0, 0]);
        ens.target_weights.extend([1.0, -1.0]);
    }
    let forest = ens.compile().unwrap();

    let n_rows = 256;
    let data: Vec<i64> = (0..n_rows as i64).map(|i| i % 5).collect();
    let x = RowMatrix::from_vec(data, n_rows, 1);

    let serial = Predictor::new(&forest)
        .with_row_parallel_threshold(usize::MAX)
        .predict(&x)
        .unwrap();
    let parallel = Predictor::new(&forest)
        .with_row_parallel_threshold(1)
        .predict(&x)
        .unwrap();
    assert_eq!(serial.as_slice(), parallel.as_slice());
    for (i, v) in serial.as_slice().iter().enumerate() {
        let expected = if (i as i64 % 5) <= 2 { 1000.0 } else { -1000.0 };
        assert_eq!(*v, expected);
    }
}

#[test]
fn quantize_saturation_modes() {
    let saturating = Quantizer::new(1.0, F8E4M3::ZERO, true).unwrap();
    let out = saturating.dequantize(&saturating.quantize(&[1e6f32]));
    assert_eq!(out, vec![448.0]);

    let overflowing = Quantizer::new(1.0, F8E4M3::ZERO, false).unwrap();
    let out = overflowing.dequantize(&overflowing.quantize(&[1e6f32]));
    assert!(out[0].is_nan());
}

// =============================================================================
// Broader end-to-end coverage
// =============================================================================

#[test]
fn recursive_schema_membership_roundtrip() {
    let ens = RecursiveEnsemble::<f32> {
        n_targets: 1,
        tree_roots: vec![0],
        nodes_modes: vec![6],
        nodes_featureids: vec![0],
        nodes_splits: vec![0.0],
        nodes_truenodeids: vec![0],
        nodes_trueleafs: vec![1],
        nodes_falsenodeids: vec![1],
        nodes_falseleafs: vec![1],
        membership_values: vec![1.0, 3.0, 5.0, f32::NAN],
        leaf_targetids: vec![0, 0],
        leaf_weights: vec![1.0, -1.0],
        ..Default::default()
    };
    let forest = ens.compile().unwrap();
    let predictor = Predictor::new(&forest);
    for (input, expected) in [(1.0f32, 1.0f32), (2.0, -1.0), (3.0, 1.0), (5.0, 1.0), (9.0, -1.0)] {
        let out = predictor.predict(&RowMatrix::single_row(vec![input])).unwrap();
        assert_eq!(out.as_slice(), &[expected], "category {input}");
    }
}

#[test]
fn folded_member_matches_unfolded_chain_on_every_category() {
    // The folded membership node must agree with the equality-chain
    // semantics on every category the mask can express, and on the ones it
    // cannot.
    let folded = FlatEnsemble::<f32> {
        n_targets: 1,
        nodes_treeids: vec![0; 5],
        nodes_nodeids: vec![0, 1, 2, 3, 4],
        nodes_featureids: vec![0; 5],
        nodes_modes: vec![BranchEq, BranchEq, BranchEq, Leaf, Leaf],
        nodes_values: vec![2.0, 7.0, 31.0, 0.0, 0.0],
        nodes_truenodeids: vec![3, 3, 3, 0, 0],
        nodes_falsenodeids: vec![1, 2, 4, 0, 0],
        target_treeids: vec![0, 0],
        target_nodeids: vec![3, 4],
        target_ids: vec![0, 0],
        target_weights: vec![1.0, -1.0],
        ..Default::default()
    }
    .compile()
    .unwrap();
    assert!(folded
        .nodes()
        .iter()
        .any(|n| n.mode() == NodeMode::BranchMember));

    let predictor = Predictor::new(&folded);
    for category in 0..=33 {
        let x = RowMatrix::single_row(vec![category as f32]);
        let out = predictor.predict(&x).unwrap();
        let expected = if matches!(category, 2 | 7 | 31) { 1.0 } else { -1.0 };
        assert_eq!(out.as_slice(), &[expected], "category {category}");
    }
}

#[test]
fn sum_is_reorder_invariant_within_accumulator_precision() {
    let build = |tree_order: &[i64]| {
        let mut ens = FlatEnsemble::<f32> {
            n_targets: 1,
            ..Default::default()
        };
        for &t in tree_order {
            let base = t * 3;
            ens.nodes_treeids.extend([t; 3]);
            ens.nodes_nodeids.extend([base, base + 1, base + 2]);
            ens.nodes_featureids.extend([0, 0, 0]);
            ens.nodes_modes.extend([BranchLeq, Leaf, Leaf]);
            ens.nodes_values.extend([0.5, 0.0, 0.0]);
            ens.nodes_truenodeids.extend([base + 1, 0, 0]);
            ens.nodes_falsenodeids.extend([base + 2, 0, 0]);
            ens.target_treeids.extend([t; 2]);
            ens.target_nodeids.extend([base + 1, base + 2]);
            ens.target_ids.extend([0, 0]);
            ens.target_weights
                .extend([0.1 + t as f32 * 0.01, -0.2 - t as f32 * 0.01]);
        }
        ens.compile().unwrap()
    };

    let forward = build(&(0..40).collect::<Vec<_>>());
    let backward = build(&(0..40).rev().collect::<Vec<_>>());

    let x = RowMatrix::from_vec(vec![0.2f32, 0.8], 2, 1);
    let a = Predictor::new(&forward).predict(&x).unwrap();
    let b = Predictor::new(&backward).predict(&x).unwrap();
    for (&u, &v) in a.as_slice().iter().zip(b.as_slice()) {
        assert_abs_diff_eq!(u, v, epsilon = 1e-5);
    }
}

#[test]
fn logistic_outputs_stay_in_open_unit_interval() {
    let mut ens = stump(false);
    ens.post_transform = PostTransform::Logistic;
    let forest = ens.compile().unwrap();
    let predictor = Predictor::new(&forest);
    let data: Vec<f32> = (0..100).map(|i| i as f32 / 50.0 - 1.0).collect();
    let x = RowMatrix::from_vec(data, 100, 1);
    let out = predictor.predict(&x).unwrap();
    for &v in out.as_slice() {
        assert!(v > 0.0 && v < 1.0);
    }
}

#[test]
fn softmax_zero_keeps_zero_classes_at_zero() {
    // Single-leaf trees give class 0 and class 2 non-zero scores; class 1
    // never receives a contribution and must stay zero.
    let ens = FlatEnsemble::<f32> {
        post_transform: PostTransform::SoftmaxZero,
        n_targets: 3,
        nodes_treeids: vec![0],
        nodes_nodeids: vec![0],
        nodes_featureids: vec![0],
        nodes_modes: vec![Leaf],
        nodes_values: vec![0.0],
        nodes_truenodeids: vec![0],
        nodes_falsenodeids: vec![0],
        target_treeids: vec![0, 0],
        target_nodeids: vec![0, 0],
        target_ids: vec![0, 2],
        target_weights: vec![2.0, 1.0],
        ..Default::default()
    };
    let forest = ens.compile().unwrap();
    let clf = Classifier::new(&forest, ClassLabels::Int64(vec![0, 1, 2])).unwrap();
    let x = RowMatrix::single_row(vec![0.0f32]);
    let (scores, labels) = clf.predict(&x).unwrap();
    assert_eq!(scores.row(0)[1], 0.0);
    let sum: f32 = scores.row(0).iter().sum();
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    assert_eq!(labels, Labels::Int64(vec![0]));
}

#[test]
fn flat_schema_deserializes_from_json() {
    let ens: FlatEnsemble<f32> = serde_json::from_str(
        r#"{
            "aggregate": "SUM",
            "post_transform": "NONE",
            "n_targets": 1,
            "nodes_treeids": [0, 0, 0],
            "nodes_nodeids": [0, 1, 2],
            "nodes_featureids": [0, 0, 0],
            "nodes_modes": ["BRANCH_LEQ", "LEAF", "LEAF"],
            "nodes_values": [0.5, 0.0, 0.0],
            "nodes_truenodeids": [1, 0, 0],
            "nodes_falsenodeids": [2, 0, 0],
            "target_treeids": [0, 0],
            "target_nodeids": [1, 2],
            "target_ids": [0, 0],
            "target_weights": [1.0, -1.0]
        }"#,
    )
    .unwrap();
    let forest = ens.compile().unwrap();
    let out = Predictor::new(&forest)
        .predict(&RowMatrix::from_vec(vec![0.4f32, 0.6], 2, 1))
        .unwrap();
    assert_eq!(out.as_slice(), &[1.0, -1.0]);
}

#[test]
fn quantized_input_batches_evaluate_through_the_codec() {
    let forest = stump(false).compile().unwrap();
    let predictor = Predictor::new(&forest);
    let x = RowMatrix::from_vec(
        vec![F8E4M3::from_f32(0.4375), F8E4M3::from_f32(0.625)],
        2,
        1,
    );
    let out = predictor.predict(&x).unwrap();
    assert_eq!(out.as_slice(), &[1.0, -1.0]);
}

#[test]
fn forest_is_shareable_across_threads() {
    let forest = stump(false).compile().unwrap();
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let predictor = Predictor::new(&forest);
                let x = RowMatrix::from_vec(vec![0.4f32, 0.6], 2, 1);
                let out = predictor.predict(&x).unwrap();
                assert_eq!(out.as_slice(), &[1.0, -1.0]);
            });
        }
    });
}
