//! Reference CPU implementation of the kernel engine.
//!
//! Weight layout convention: filters are `[OutFeatures, InFeatures]`, so
//! the fully-connected kernel computes a transposed matrix multiplication.
//! Quantized filters are dequantized on the fly inside the dot product;
//! activations stay in f32 throughout.

use anyhow::{bail, Result};
use libm::expf;
use rayon::prelude::*;

use crate::graph::{BinaryKind, Clamp, UnaryKind};
use crate::kernels::engine::KernelEngine;
use crate::kernels::q_common::{Q4Matrix, Q8Matrix, QK4_0};
use crate::tensor::WeightData;

/// Minimum multiply-accumulate count before rows are dispatched to rayon.
pub const PARALLEL_THRESHOLD: usize = 16_384;

/// The built-in CPU kernel engine.
#[derive(Debug, Default)]
pub struct CpuKernels;

impl KernelEngine for CpuKernels {
    fn fully_connected(
        &self,
        input: &[f32],
        batch: usize,
        filter: &WeightData,
        bias: Option<&[f32]>,
        clamp: Clamp,
        output: &mut [f32],
    ) -> Result<()> {
        let [n, k] = filter.shape();
        if input.len() != batch * k {
            bail!("input length {} != batch {batch} * in features {k}", input.len());
        }
        if output.len() != batch * n {
            bail!("output length {} != batch {batch} * out features {n}", output.len());
        }
        if let Some(b) = bias {
            if b.len() != n {
                bail!("bias length {} != out features {n}", b.len());
            }
        }

        match filter {
            WeightData::F32(w) => {
                let Some(w) = w.as_slice() else {
                    bail!("f32 filter is not in standard row-major layout");
                };
                for_each_row(input, output, k, n, batch, |x, out| {
                    for (col, out_v) in out.iter_mut().enumerate() {
                        let row = &w[col * k..(col + 1) * k];
                        *out_v = row.iter().zip(x).map(|(a, b)| a * b).sum();
                    }
                });
            }
            WeightData::Q8(m) => {
                for_each_row(input, output, k, n, batch, |x, out| {
                    for (col, out_v) in out.iter_mut().enumerate() {
                        *out_v = dot_q8_row(m, col, x);
                    }
                });
            }
            WeightData::Q4(m) => {
                for_each_row(input, output, k, n, batch, |x, out| {
                    for (col, out_v) in out.iter_mut().enumerate() {
                        *out_v = dot_q4_row(m, col, x);
                    }
                });
            }
        }

        if let Some(b) = bias {
            for row in output.chunks_mut(n) {
                for (v, add) in row.iter_mut().zip(b) {
                    *v += add;
                }
            }
        }
        clamp.apply(output);
        Ok(())
    }

    fn unary(&self, kind: UnaryKind, input: &[f32], output: &mut [f32]) -> Result<()> {
        if input.len() != output.len() {
            bail!("unary length mismatch: {} vs {}", input.len(), output.len());
        }
        match kind {
            UnaryKind::Sigmoid => {
                for (out, &x) in output.iter_mut().zip(input) {
                    *out = sigmoid_scalar(x);
                }
            }
        }
        Ok(())
    }

    fn binary(
        &self,
        kind: BinaryKind,
        left: &[f32],
        right: &[f32],
        clamp: Clamp,
        output: &mut [f32],
    ) -> Result<()> {
        if left.len() != right.len() || left.len() != output.len() {
            bail!(
                "binary length mismatch: {} vs {} vs {}",
                left.len(),
                right.len(),
                output.len()
            );
        }
        match kind {
            BinaryKind::Multiply => {
                for ((out, &l), &r) in output.iter_mut().zip(left).zip(right) {
                    *out = l * r;
                }
            }
        }
        clamp.apply(output);
        Ok(())
    }
}

/// Runs `row_kernel` for every batch row, on rayon when the
/// multiply-accumulate count crosses [`PARALLEL_THRESHOLD`].
fn for_each_row(
    input: &[f32],
    output: &mut [f32],
    k: usize,
    n: usize,
    batch: usize,
    row_kernel: impl Fn(&[f32], &mut [f32]) + Send + Sync,
) {
    if batch * n * k >= PARALLEL_THRESHOLD {
        output
            .par_chunks_mut(n)
            .zip(input.par_chunks(k))
            .for_each(|(out, x)| row_kernel(x, out));
    } else {
        output
            .chunks_mut(n)
            .zip(input.chunks(k))
            .for_each(|(out, x)| row_kernel(x, out));
    }
}

#[inline(always)]
pub fn sigmoid_scalar(x: f32) -> f32 {
    if x <= -20.0 {
        0.0
    } else if x >= 20.0 {
        1.0
    } else {
        1.0 / (1.0 + expf(-x))
    }
}

/// Dequantizing dot product against one row of a Q8 matrix.
fn dot_q8_row(m: &Q8Matrix, row: usize, x: &[f32]) -> f32 {
    let k = m.shape[1];
    let qs = &m.qs[row * k..(row + 1) * k];
    let sum: f32 = qs.iter().zip(x).map(|(&q, &v)| q as f32 * v).sum();
    sum * m.scales[row]
}

/// Dequantizing dot product against one row of a Q4 matrix.
///
/// The final block of a row may be padded; iteration stops at the logical
/// column count.
fn dot_q4_row(m: &Q4Matrix, row: usize, x: &[f32]) -> f32 {
    let k = m.shape[1];
    let blocks = &m.blocks[row * m.blocks_per_row..(row + 1) * m.blocks_per_row];
    let mut sum = 0.0f32;
    for (block_idx, block) in blocks.iter().enumerate() {
        let d = block.d.to_f32();
        let base = block_idx * QK4_0;
        for (pair, &byte) in block.qs.iter().enumerate() {
            let j = base + pair * 2;
            if j >= k {
                break;
            }
            let q0 = (byte & 0x0F) as i32 - 8;
            sum += q0 as f32 * d * x[j];
            if j + 1 < k {
                let q1 = (byte >> 4) as i32 - 8;
                sum += q1 as f32 * d * x[j + 1];
            }
        }
    }
    sum
}
