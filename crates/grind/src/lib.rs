//! Staged computation-graph runtime for gated feed-forward inference
//! blocks.
//!
//! `grind` assembles a dependency-ordered graph of typed tensor values and
//! operators for the gated linear unit pattern
//! `out = Wdown @ (SiLU(Wgate @ x) * (Wup @ x))`, deduces shapes and
//! dtypes across mixed numeric precisions, and drives a multi-phase
//! runtime: define → compile → reshape → bind → execute.
//!
//! The building blocks:
//! - [`tensor`]: dtypes, shapes, roles and the per-subgraph value table
//! - [`graph`]: the operator catalog, the builder and the immutable
//!   [`Subgraph`]
//! - [`precision`]: full-precision, 8-bit and 4-bit weight variants
//! - [`block`]: the gated-unit assembly
//! - [`runtime`]: the lifecycle state machine
//! - [`kernels`]: the kernel engine contract and its CPU reference
//!   implementation
//!
//! # Example
//!
//! ```
//! use grind::{
//!     build_gated_block, BlockWeights, ExternalValue, GatedBlockConfig, Precision, Runtime,
//!     Workspace, INPUT_ID, OUTPUT_ID,
//! };
//!
//! # fn main() -> grind::Result<()> {
//! let config = GatedBlockConfig {
//!     input_dim: 3,
//!     inter_dim: 4,
//!     output_dim: 2,
//!     precision: Precision::FullPrecision,
//! };
//! let subgraph = build_gated_block(&config, &BlockWeights::ramp(3, 4, 2))?;
//!
//! let mut runtime = Runtime::compile(subgraph, Workspace::new())?;
//! runtime.reshape(&[(INPUT_ID, vec![1, 3]), (OUTPUT_ID, vec![1, 2])])?;
//! runtime.bind(vec![
//!     ExternalValue::new(INPUT_ID, vec![1.0, 2.0, 3.0]),
//!     ExternalValue::new(OUTPUT_ID, vec![0.0; 2]),
//! ])?;
//! runtime.execute()?;
//! assert_eq!(runtime.output(OUTPUT_ID)?.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! A subgraph is immutable once built and safe to share read-only across
//! concurrent runtimes; a runtime itself must be externally serialized.

pub mod block;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod precision;
pub mod runtime;
pub mod tensor;

pub use block::{build_gated_block, BlockWeights, GatedBlockConfig, INPUT_ID, OUTPUT_ID};
pub use error::{GraphError, Result};
pub use graph::{BinaryKind, Clamp, OpKind, Operator, Subgraph, SubgraphBuilder, UnaryKind};
pub use kernels::{CpuKernels, KernelEngine};
pub use precision::Precision;
pub use runtime::{ExternalValue, Runtime, Workspace};
pub use tensor::{DType, Dim, ExternalId, TensorValue, ValueId, ValueRole, WeightData};
