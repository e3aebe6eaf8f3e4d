use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::{arr2, Array2};
use std::sync::Arc;

use crate::graph::{BinaryKind, Clamp, UnaryKind};
use crate::kernels::cpu::{sigmoid_scalar, CpuKernels};
use crate::kernels::engine::KernelEngine;
use crate::kernels::quantize::{quantize_matrix_q4_0, quantize_matrix_q8};
use crate::tensor::WeightData;

fn f32_weight(w: Array2<f32>) -> WeightData {
    WeightData::F32(Arc::new(w))
}

#[test]
fn fully_connected_f32_basic() {
    // Weights [[1, 2], [3, 4]], input [1, 1] -> [1*1 + 1*2, 1*3 + 1*4].
    let filter = f32_weight(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
    let mut out = [0.0f32; 2];
    CpuKernels
        .fully_connected(&[1.0, 1.0], 1, &filter, None, Clamp::default(), &mut out)
        .unwrap();
    assert_eq!(out, [3.0, 7.0]);
}

#[test]
fn fully_connected_f32_batch_and_bias() {
    let filter = f32_weight(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
    let bias = [10.0f32, 20.0];
    let input = [1.0f32, 0.0, 0.0, 1.0];
    let mut out = [0.0f32; 4];
    CpuKernels
        .fully_connected(&input, 2, &filter, Some(&bias), Clamp::default(), &mut out)
        .unwrap();
    assert_eq!(out, [11.0, 23.0, 12.0, 24.0]);
}

#[test]
fn fully_connected_applies_clamp() {
    let filter = f32_weight(arr2(&[[1.0, 2.0], [3.0, 4.0]]));
    let mut out = [0.0f32; 2];
    CpuKernels
        .fully_connected(&[1.0, 1.0], 1, &filter, None, Clamp::new(0.0, 5.0), &mut out)
        .unwrap();
    assert_eq!(out, [3.0, 5.0]);
}

#[test]
fn fully_connected_rejects_bad_lengths() {
    let filter = f32_weight(arr2(&[[1.0, 2.0]]));
    let mut out = [0.0f32; 1];
    let err = CpuKernels.fully_connected(&[1.0], 1, &filter, None, Clamp::default(), &mut out);
    assert!(err.is_err());
}

#[test]
fn fully_connected_q8_tracks_f32() {
    let w = arr2(&[
        [0.12f32, -0.5, 0.33, 0.9],
        [-0.25, 0.75, -0.6, 0.1],
        [0.05, 0.4, -0.8, -0.15],
    ]);
    let input = [1.0f32, -2.0, 0.5, 3.0];
    let mut expect = [0.0f32; 3];
    CpuKernels
        .fully_connected(
            &input,
            1,
            &f32_weight(w.clone()),
            None,
            Clamp::default(),
            &mut expect,
        )
        .unwrap();

    let q8 = WeightData::Q8(Arc::new(quantize_matrix_q8(&w)));
    let mut out = [0.0f32; 3];
    CpuKernels
        .fully_connected(&input, 1, &q8, None, Clamp::default(), &mut out)
        .unwrap();
    for (a, b) in out.iter().zip(&expect) {
        assert_relative_eq!(*a, *b, max_relative = 0.02, epsilon = 0.02);
    }
}

#[test]
fn fully_connected_q4_with_padded_blocks() {
    // 3 columns force a padded final (and only) block per row.
    let w = arr2(&[[0.5f32, -0.25, 0.75], [-0.1, 0.6, 0.3]]);
    let input = [2.0f32, 1.0, -1.0];
    let mut expect = [0.0f32; 2];
    CpuKernels
        .fully_connected(
            &input,
            1,
            &f32_weight(w.clone()),
            None,
            Clamp::default(),
            &mut expect,
        )
        .unwrap();

    let q4 = WeightData::Q4(Arc::new(quantize_matrix_q4_0(&w)));
    let mut out = [0.0f32; 2];
    CpuKernels
        .fully_connected(&input, 1, &q4, None, Clamp::default(), &mut out)
        .unwrap();
    for (a, b) in out.iter().zip(&expect) {
        assert_abs_diff_eq!(*a, *b, epsilon = 0.3);
    }
}

#[test]
fn quantize_q4_round_trips_within_block_error() {
    let w = arr2(&[[0.7f32, -0.7, 0.1, 0.0, 0.35, -0.05]]);
    let q4 = quantize_matrix_q4_0(&w);
    assert_eq!(q4.blocks_per_row, 1);
    assert_eq!(q4.shape, [1, 6]);
    // Scale maps |0.7| to the integer edge (7), so the extremes are exact.
    let d = q4.blocks[0].d.to_f32();
    assert_relative_eq!(d * 7.0, 0.7, max_relative = 1e-2);
}

#[test]
fn quantize_q8_zero_row_has_zero_scale() {
    let w = arr2(&[[0.0f32, 0.0], [1.0, -1.0]]);
    let q8 = quantize_matrix_q8(&w);
    assert_eq!(q8.scales[0], 0.0);
    assert_eq!(&q8.qs[..2], &[0, 0]);
    assert_eq!(&q8.qs[2..], &[127, -127]);
}

#[test]
fn sigmoid_saturates() {
    assert_eq!(sigmoid_scalar(-30.0), 0.0);
    assert_eq!(sigmoid_scalar(30.0), 1.0);
    assert_abs_diff_eq!(sigmoid_scalar(0.0), 0.5, epsilon = 1e-6);
}

#[test]
fn unary_sigmoid_slice() {
    let mut out = [0.0f32; 3];
    CpuKernels
        .unary(UnaryKind::Sigmoid, &[0.0, 1.0, -1.0], &mut out)
        .unwrap();
    assert_abs_diff_eq!(out[0], 0.5, epsilon = 1e-6);
    assert_abs_diff_eq!(out[1], 1.0 / (1.0 + (-1.0f32).exp()), epsilon = 1e-6);
    assert_abs_diff_eq!(out[2], 1.0 - out[1], epsilon = 1e-6);
}

#[test]
fn binary_multiply_with_clamp() {
    let mut out = [0.0f32; 3];
    CpuKernels
        .binary(
            BinaryKind::Multiply,
            &[1.0, -2.0, 3.0],
            &[4.0, 5.0, 6.0],
            Clamp::new(-5.0, 10.0),
            &mut out,
        )
        .unwrap();
    assert_eq!(out, [4.0, -5.0, 10.0]);
}

#[test]
fn binary_rejects_length_mismatch() {
    let mut out = [0.0f32; 2];
    let err = CpuKernels.binary(
        BinaryKind::Multiply,
        &[1.0, 2.0],
        &[1.0],
        Clamp::default(),
        &mut out,
    );
    assert!(err.is_err());
}
