//! Kernel execution engine: the narrow contract the runtime drives, plus
//! the reference CPU implementation and weight quantization helpers.

pub mod cpu;
pub mod engine;
pub mod q_common;
pub mod quantize;

#[cfg(test)]
mod tests;

pub use cpu::CpuKernels;
pub use engine::KernelEngine;
pub use q_common::{BlockQ4_0, Q4Matrix, Q8Matrix, QK4_0};
pub use quantize::{quantize_matrix_q4_0, quantize_matrix_q8};
