//! The contract between the runtime and a kernel execution engine.
//!
//! The runtime resolves every operator's inputs and output to plain f32
//! slices (dequantization of weight storage is the engine's concern) and
//! calls one of these entry points per operator, in compile-time order.
//! Engine failures are opaque to the runtime; they surface to the caller
//! as `KernelExecutionFailed` with the failing operator's identity.

use anyhow::Result;

use crate::graph::{BinaryKind, Clamp, UnaryKind};
use crate::tensor::WeightData;

/// Executes the three operator kinds of the catalog.
///
/// Implementations must be safe to share across runtimes; all entry points
/// take `&self` and the runtime never calls them concurrently for one
/// runtime instance.
pub trait KernelEngine: Send + Sync {
    /// `output = clamp(input @ filterᵀ + bias)`.
    ///
    /// `input` is `batch * k`, `filter` is `[n, k]` (possibly quantized),
    /// `bias` is `n` elements when present, `output` is `batch * n`.
    fn fully_connected(
        &self,
        input: &[f32],
        batch: usize,
        filter: &WeightData,
        bias: Option<&[f32]>,
        clamp: Clamp,
        output: &mut [f32],
    ) -> Result<()>;

    /// Element-preserving unary operator; `output.len() == input.len()`.
    fn unary(&self, kind: UnaryKind, input: &[f32], output: &mut [f32]) -> Result<()>;

    /// Elementwise binary operator over identically shaped inputs.
    fn binary(
        &self,
        kind: BinaryKind,
        left: &[f32],
        right: &[f32],
        clamp: Clamp,
        output: &mut [f32],
    ) -> Result<()>;
}
