//! Data structures shared by the quantized kernels.

use bytemuck::{Pod, Zeroable};
use half::f16;

/// Elements per 4-bit quantization block.
pub const QK4_0: usize = 32;

/// Bytes per [`BlockQ4_0`].
pub const BLOCK_Q4_0_BYTES: usize = std::mem::size_of::<BlockQ4_0>();

/// A 4-bit quantization block: one half-precision scale for 32 weights,
/// packed two per byte with the low nibble first. Stored nibbles are the
/// quantized value plus 8, so the representable range is [-8, 7].
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlockQ4_0 {
    /// Block scale factor.
    pub d: f16,
    /// Packed 4-bit weights.
    pub qs: [u8; QK4_0 / 2],
}

// Compile-time sanity check for the memory layout.
const _: () = assert!(std::mem::size_of::<BlockQ4_0>() == 18);

/// An 8-bit quantized weight matrix with one scale per output channel.
#[derive(Debug, Clone)]
pub struct Q8Matrix {
    /// Row-major quantized weights, `rows * cols` entries.
    pub qs: Vec<i8>,
    /// One scale per row.
    pub scales: Vec<f32>,
    /// `[rows, cols]` of the logical matrix.
    pub shape: [usize; 2],
}

/// A 4-bit block-quantized weight matrix.
///
/// Blocks never straddle rows: each row owns `ceil(cols / 32)` blocks and
/// the final block of a row is zero-padded when `cols` is not a multiple
/// of the block size.
#[derive(Debug, Clone)]
pub struct Q4Matrix {
    /// Row-major blocks, `rows * blocks_per_row` entries.
    pub blocks: Vec<BlockQ4_0>,
    /// Blocks in each row.
    pub blocks_per_row: usize,
    /// `[rows, cols]` of the logical matrix.
    pub shape: [usize; 2],
}
