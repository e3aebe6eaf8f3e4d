//! Weight quantization: F32 matrices into the Q8 / Q4 storage layouts.
//!
//! Quantization happens once, at weight definition time. The scale of
//! every channel (Q8) or block (Q4) is chosen so that the element with the
//! largest magnitude maps onto the edge of the integer range, which keeps
//! the relative reconstruction error bounded per channel/block.

use half::f16;
use ndarray::Array2;

use crate::kernels::q_common::{BlockQ4_0, Q4Matrix, Q8Matrix, QK4_0};

/// Quantizes an F32 weight matrix (rows = out features, cols = in
/// features) to 8 bits with one scale per output channel.
pub fn quantize_matrix_q8(data: &Array2<f32>) -> Q8Matrix {
    let (rows, cols) = data.dim();
    let mut qs = Vec::with_capacity(rows * cols);
    let mut scales = Vec::with_capacity(rows);

    for row in data.outer_iter() {
        let max_abs = row.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
        if max_abs == 0.0 {
            scales.push(0.0);
            qs.extend(std::iter::repeat_n(0i8, cols));
            continue;
        }
        let scale = max_abs / 127.0;
        let iscale = 1.0 / scale;
        scales.push(scale);
        for &val in row.iter() {
            qs.push((val * iscale).round().clamp(-127.0, 127.0) as i8);
        }
    }

    Q8Matrix {
        qs,
        scales,
        shape: [rows, cols],
    }
}

/// Quantizes an F32 weight matrix to 4-bit blocks of 32 elements.
///
/// Rows whose length is not a multiple of 32 pad their final block with
/// zeros; the logical shape is preserved so the matmul kernels stop at the
/// true column count.
pub fn quantize_matrix_q4_0(data: &Array2<f32>) -> Q4Matrix {
    let (rows, cols) = data.dim();
    let blocks_per_row = cols.div_ceil(QK4_0);
    if cols % QK4_0 != 0 {
        log::debug!(
            "q4 quantization: padding rows of {cols} columns to {} blocks",
            blocks_per_row
        );
    }
    let mut blocks = Vec::with_capacity(rows * blocks_per_row);

    for row in data.outer_iter() {
        let row: Vec<f32> = row.iter().copied().collect();
        for chunk in row.chunks(QK4_0) {
            let mut block = BlockQ4_0 {
                d: f16::from_f32(0.0),
                qs: [0u8; QK4_0 / 2],
            };
            let max_abs = chunk.iter().fold(0.0f32, |acc, &x| acc.max(x.abs()));
            if max_abs > 0.0 {
                let scale = max_abs / 7.0;
                let iscale = 1.0 / scale;
                block.d = f16::from_f32(scale);
                for (i, &val) in chunk.iter().enumerate() {
                    let q = (val * iscale).round().clamp(-8.0, 7.0) as i32 + 8;
                    let nibble = q as u8 & 0x0F;
                    if i % 2 == 0 {
                        block.qs[i / 2] = nibble;
                    } else {
                        block.qs[i / 2] |= nibble << 4;
                    }
                }
            } else {
                // All-zero chunk: q = 0 is stored as nibble 8 so the
                // decoder reconstructs 0 * d without a special case.
                for (i, _) in chunk.iter().enumerate() {
                    if i % 2 == 0 {
                        block.qs[i / 2] = 8;
                    } else {
                        block.qs[i / 2] |= 8 << 4;
                    }
                }
            }
            blocks.push(block);
        }
    }

    Q4Matrix {
        blocks,
        blocks_per_row,
        shape: [rows, cols],
    }
}
