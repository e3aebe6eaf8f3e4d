//! Numeric representations supported by the graph.

use crate::kernels::q_common::{BLOCK_Q4_0_BYTES, QK4_0};

/// Element type of a tensor value.
///
/// Quantized dtypes are confined to static weight storage; activations and
/// external buffers are always `F32`, so quantization error never
/// accumulates across operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    /// Standard 32-bit float.
    F32,
    /// 8-bit signed integer with one f32 scale per output channel (row).
    Q8,
    /// 4-bit integer in 32-element blocks, one f16 scale per block,
    /// packed two nibbles per byte.
    Q4,
}

impl DType {
    pub fn is_quantized(&self) -> bool {
        !matches!(self, DType::F32)
    }

    /// Required storage in bytes for a tensor of a given concrete shape.
    ///
    /// This correctly accounts for block-quantized layouts, where a plain
    /// `element size * count` computation would be wrong. Rows of a
    /// quantized matrix never share a block; a row whose length is not a
    /// multiple of the block size pads its final block.
    pub fn buffer_size_for_shape(&self, shape: &[usize]) -> usize {
        let num_elements = shape.iter().product::<usize>();
        match self {
            DType::F32 => num_elements * 4,
            DType::Q8 => {
                // One i8 per element plus one f32 scale per row.
                let rows = if shape.is_empty() { 1 } else { shape[0] };
                num_elements + rows * 4
            }
            DType::Q4 => {
                let cols = shape.last().copied().unwrap_or(0);
                let rows = if cols == 0 { 0 } else { num_elements / cols };
                let blocks_per_row = cols.div_ceil(QK4_0);
                rows * blocks_per_row * BLOCK_Q4_0_BYTES
            }
        }
    }
}
