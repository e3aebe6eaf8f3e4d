//! Error types for graph construction and the runtime lifecycle.

use thiserror::Error;

use crate::graph::OpKind;
use crate::tensor::{Dim, ExternalId, ValueId};

/// Errors that can occur while building a subgraph or driving a runtime.
///
/// Construction errors (`InvalidShape`, `RoleConflict`, `CycleDetected`,
/// `IdentifierMismatch`) are unrecoverable for the current build attempt:
/// the partially built subgraph must be discarded. Lifecycle errors
/// (`ShapeMismatch` during reshape, `MissingBinding`, `BufferSizeMismatch`,
/// `NotBound`) are recoverable: correct the inputs and retry the same phase.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A dimension is zero, or a batch placeholder appears on a
    /// non-external tensor.
    #[error("invalid shape {shape:?}: {reason}")]
    InvalidShape { shape: Vec<Dim>, reason: String },

    /// Static data supplied for a non-weight value, or missing for a
    /// static weight. Quantized dtypes are also confined to weights.
    #[error("role conflict: {0}")]
    RoleConflict(String),

    /// Two shapes that must agree do not.
    #[error("shape mismatch at {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// The operator set is not a DAG.
    #[error("cycle detected in operator graph through value {0:?}")]
    CycleDetected(ValueId),

    /// Malformed operator parameters (bad clamp bounds, unknown value id,
    /// duplicate producer, dangling intermediate, out-of-order phase call).
    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    /// The precision selector is not one of the recognized variants.
    #[error(
        "unsupported precision '{0}' (expected full-precision, quantized-8bit or quantized-4bit)"
    )]
    UnsupportedPrecision(String),

    /// The subgraph's declared external value count does not match the
    /// external tensors actually defined.
    #[error("external identifier mismatch: {declared} declared, {found} defined")]
    IdentifierMismatch { declared: u32, found: u32 },

    /// An external value has no buffer attached.
    #[error("no buffer bound for external value {0:?}")]
    MissingBinding(ExternalId),

    /// A bound buffer is smaller than the shape computed during reshape.
    #[error("buffer for external value {id:?} holds {got} elements, shape requires {expected}")]
    BufferSizeMismatch {
        id: ExternalId,
        expected: usize,
        got: usize,
    },

    /// `execute` was called on a runtime that is not in the `Bound` state.
    #[error("runtime is not bound; reshape and bind before executing")]
    NotBound,

    /// The kernel engine reported a failure. The runtime stays bound and
    /// may be retried, but outputs are invalid until a successful execute.
    #[error("kernel execution failed at operator #{op_index} ({kind:?}): {source}")]
    KernelExecutionFailed {
        op_index: usize,
        kind: OpKind,
        #[source]
        source: anyhow::Error,
    },

    /// A subgraph release was requested while live runtimes still hold a
    /// reference to it.
    #[error("subgraph is still referenced by a live runtime")]
    SubgraphInUse,

    /// Any operation other than `release` was invoked on a released runtime.
    #[error("runtime has been released")]
    RuntimeReleased,
}

/// Result type for graph and runtime operations.
pub type Result<T> = std::result::Result<T, GraphError>;
