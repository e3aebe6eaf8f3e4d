//! Gated-unit (SwiGLU) block assembly.
//!
//! Builds the subgraph for `out = Wdown @ (SiLU(Wgate @ x) * (Wup @ x))`
//! with SiLU expressed as sigmoid followed by a multiply against the
//! pre-activation gate projection, exactly as the fused block is defined:
//!
//! ```text
//! gate_proj = x @ Wgateᵗ            [B, N]
//! up_proj   = x @ Wupᵗ              [B, N]
//! activated = sigmoid(gate_proj)    [B, N]
//! gated     = activated * gate_proj [B, N]   (SiLU)
//! combined  = gated * up_proj       [B, N]
//! out       = combined @ Wdownᵗ     [B, M]
//! ```
//!
//! The batch dimension stays a placeholder until the runtime's reshape
//! phase, so one subgraph serves every batch size.

use std::sync::Arc;

use ndarray::Array2;

use crate::error::{GraphError, Result};
use crate::graph::{BinaryKind, Clamp, Subgraph, SubgraphBuilder, UnaryKind};
use crate::precision::Precision;
use crate::tensor::{DType, Dim, ExternalId};

/// External id of the block input, `[B, K]`.
pub const INPUT_ID: ExternalId = ExternalId(0);
/// External id of the block output, `[B, M]`.
pub const OUTPUT_ID: ExternalId = ExternalId(1);

/// Dimensions and precision of one gated block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatedBlockConfig {
    /// Input feature count `K`.
    pub input_dim: usize,
    /// Intermediate width `N`.
    pub inter_dim: usize,
    /// Output width `M`.
    pub output_dim: usize,
    /// Weight storage precision. Does not affect topology.
    pub precision: Precision,
}

/// Weight matrices for one gated block, `[OutFeatures, InFeatures]` each.
///
/// The matrices are reference-counted so a caller may alias one backing
/// store for the gate and up projections (the reference configuration
/// does exactly that); the graph still gets two distinct weight values.
#[derive(Debug, Clone)]
pub struct BlockWeights {
    /// Gate projection `[N, K]`.
    pub gate: Arc<Array2<f32>>,
    /// Up projection `[N, K]`.
    pub up: Arc<Array2<f32>>,
    /// Down projection `[M, N]`.
    pub down: Arc<Array2<f32>>,
}

impl BlockWeights {
    pub fn new(gate: Array2<f32>, up: Array2<f32>, down: Array2<f32>) -> Self {
        Self {
            gate: Arc::new(gate),
            up: Arc::new(up),
            down: Arc::new(down),
        }
    }

    /// One backing store for both the gate and up projections.
    pub fn with_shared_gate_up(gate_up: Array2<f32>, down: Array2<f32>) -> Self {
        let gate = Arc::new(gate_up);
        Self {
            up: Arc::clone(&gate),
            gate,
            down: Arc::new(down),
        }
    }

    /// Deterministic ramp weights, `w[i, j] = (i*cols + j + 1) / (rows*cols)`,
    /// with the gate and up projections sharing storage. This matches the
    /// reference configuration and seeds the numeric regression tests.
    pub fn ramp(input_dim: usize, inter_dim: usize, output_dim: usize) -> Self {
        Self::with_shared_gate_up(
            ramp_matrix(inter_dim, input_dim),
            ramp_matrix(output_dim, inter_dim),
        )
    }
}

/// `w[i, j] = (i*cols + j + 1) / (rows*cols)`.
pub fn ramp_matrix(rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        (i * cols + j + 1) as f32 / (rows * cols) as f32
    })
}

/// Assembles the gated-unit subgraph for one configuration.
///
/// Fails with `InvalidShape` when any dimension is zero and with
/// `ShapeMismatch` when the weight matrices do not match the configured
/// dimensions.
pub fn build_gated_block(
    config: &GatedBlockConfig,
    weights: &BlockWeights,
) -> Result<Arc<Subgraph>> {
    let (k, n, m) = (config.input_dim, config.inter_dim, config.output_dim);
    if k == 0 || n == 0 || m == 0 {
        return Err(GraphError::InvalidShape {
            shape: vec![Dim::Fixed(k), Dim::Fixed(n), Dim::Fixed(m)],
            reason: "block dimensions must be at least 1".into(),
        });
    }
    check_weight_dims(&weights.gate, [n, k], "gate projection")?;
    check_weight_dims(&weights.up, [n, k], "up projection")?;
    check_weight_dims(&weights.down, [m, n], "down projection")?;

    let mut builder = SubgraphBuilder::new(2);

    let input = builder.define_external_input(
        vec![Dim::Batch, Dim::Fixed(k)],
        DType::F32,
        INPUT_ID,
    )?;
    let output = builder.define_external_output(
        vec![Dim::Batch, Dim::Fixed(m)],
        DType::F32,
        OUTPUT_ID,
    )?;

    let precision = config.precision;
    // Aliased backing storage is encoded once; the values stay distinct.
    let gate_data = precision.encode_weight(&weights.gate);
    let up_data = if Arc::ptr_eq(&weights.gate, &weights.up) {
        gate_data.clone()
    } else {
        precision.encode_weight(&weights.up)
    };
    let w_gate = builder.define_static_weight(gate_data)?;
    let w_up = builder.define_static_weight(up_data)?;

    let inter = vec![Dim::Fixed(1), Dim::Fixed(n)];
    let gate_proj = builder.define_internal(inter.clone(), DType::F32)?;
    let up_proj = builder.define_internal(inter.clone(), DType::F32)?;
    let activated = builder.define_internal(inter.clone(), DType::F32)?;
    let gated = builder.define_internal(inter.clone(), DType::F32)?;
    let combined = builder.define_internal(inter, DType::F32)?;

    builder.fully_connected(input, w_gate, None, gate_proj, Clamp::default())?;
    builder.fully_connected(input, w_up, None, up_proj, Clamp::default())?;
    builder.unary(UnaryKind::Sigmoid, gate_proj, activated)?;
    builder.binary(
        BinaryKind::Multiply,
        activated,
        gate_proj,
        gated,
        Clamp::default(),
    )?;
    builder.binary(
        BinaryKind::Multiply,
        gated,
        up_proj,
        combined,
        Clamp::default(),
    )?;

    let w_down = builder.define_static_weight(precision.encode_weight(&weights.down))?;
    builder.fully_connected(combined, w_down, None, output, Clamp::default())?;

    builder.finish()
}

fn check_weight_dims(w: &Array2<f32>, expected: [usize; 2], context: &str) -> Result<()> {
    let (r, c) = w.dim();
    if [r, c] != expected {
        return Err(GraphError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            got: vec![r, c],
        });
    }
    Ok(())
}
