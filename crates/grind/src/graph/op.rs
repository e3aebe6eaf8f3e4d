//! Graph operators and their shape inference rules.

use crate::error::{GraphError, Result};
use crate::tensor::ValueId;

/// Operator kind, used for dispatch and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    FullyConnected,
    Unary,
    Binary,
}

/// Unary activation selector. The activation is a parameter of the
/// operator, not a distinct operator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryKind {
    /// Logistic sigmoid, `1 / (1 + e^-x)`.
    Sigmoid,
}

/// Elementwise binary operator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    Multiply,
}

/// Output clamp applied after an operator, `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clamp {
    pub min: f32,
    pub max: f32,
}

impl Default for Clamp {
    fn default() -> Self {
        Self {
            min: f32::NEG_INFINITY,
            max: f32::INFINITY,
        }
    }
}

impl Clamp {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// `min > max` (or a NaN bound) is rejected with `InvalidParams`.
    pub fn validate(&self) -> Result<()> {
        if self.min.is_nan() || self.max.is_nan() || self.min > self.max {
            return Err(GraphError::InvalidParams(format!(
                "clamp bounds [{}, {}]",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn is_noop(&self) -> bool {
        self.min == f32::NEG_INFINITY && self.max == f32::INFINITY
    }

    pub(crate) fn apply(&self, data: &mut [f32]) {
        if self.is_noop() {
            return;
        }
        for v in data {
            *v = v.clamp(self.min, self.max);
        }
    }
}

/// One computation node. Arity is fixed per kind; every operator produces
/// exactly one value (single-producer invariant, enforced by the builder).
#[derive(Debug, Clone)]
pub enum Operator {
    /// `output = clamp(input @ filterᵀ + bias)`; input `[..., K]`, filter
    /// `[N, K]`, optional bias `[N]`, output `[..., N]`.
    FullyConnected {
        input: ValueId,
        filter: ValueId,
        bias: Option<ValueId>,
        output: ValueId,
        clamp: Clamp,
    },
    /// Element-preserving activation; output shape and dtype equal input.
    Unary {
        kind: UnaryKind,
        input: ValueId,
        output: ValueId,
    },
    /// Elementwise operator over identical shapes (no broadcasting).
    Binary {
        kind: BinaryKind,
        left: ValueId,
        right: ValueId,
        output: ValueId,
        clamp: Clamp,
    },
}

impl Operator {
    pub fn kind(&self) -> OpKind {
        match self {
            Operator::FullyConnected { .. } => OpKind::FullyConnected,
            Operator::Unary { .. } => OpKind::Unary,
            Operator::Binary { .. } => OpKind::Binary,
        }
    }

    pub fn output(&self) -> ValueId {
        match *self {
            Operator::FullyConnected { output, .. }
            | Operator::Unary { output, .. }
            | Operator::Binary { output, .. } => output,
        }
    }

    /// Ordered input ids, bias included when present.
    pub fn inputs(&self) -> Vec<ValueId> {
        match *self {
            Operator::FullyConnected {
                input,
                filter,
                bias,
                ..
            } => {
                let mut ids = vec![input, filter];
                if let Some(b) = bias {
                    ids.push(b);
                }
                ids
            }
            Operator::Unary { input, .. } => vec![input],
            Operator::Binary { left, right, .. } => vec![left, right],
        }
    }

    /// Infers the concrete output shape from concrete input shapes,
    /// applying the catalog rules. `shape_of` must return the resolved
    /// shape of any value this operator reads.
    pub(crate) fn infer_output_shape(
        &self,
        shape_of: &dyn Fn(ValueId) -> Result<Vec<usize>>,
    ) -> Result<Vec<usize>> {
        match self {
            Operator::FullyConnected {
                input,
                filter,
                bias,
                ..
            } => {
                let in_shape = shape_of(*input)?;
                let filter_shape = shape_of(*filter)?;
                if filter_shape.len() != 2 {
                    return Err(GraphError::ShapeMismatch {
                        context: "fully-connected filter rank".into(),
                        expected: vec![2],
                        got: vec![filter_shape.len()],
                    });
                }
                let (n, k) = (filter_shape[0], filter_shape[1]);
                match in_shape.last() {
                    Some(&last) if last == k => {}
                    _ => {
                        return Err(GraphError::ShapeMismatch {
                            context: "fully-connected contraction dimension".into(),
                            expected: vec![k],
                            got: in_shape,
                        });
                    }
                }
                if let Some(b) = bias {
                    let bias_shape = shape_of(*b)?;
                    if bias_shape != [n] {
                        return Err(GraphError::ShapeMismatch {
                            context: "fully-connected bias".into(),
                            expected: vec![n],
                            got: bias_shape,
                        });
                    }
                }
                let mut out = in_shape;
                *out.last_mut().expect("non-empty checked above") = n;
                Ok(out)
            }
            Operator::Unary { input, .. } => shape_of(*input),
            Operator::Binary { left, right, .. } => {
                let l = shape_of(*left)?;
                let r = shape_of(*right)?;
                if l != r {
                    return Err(GraphError::ShapeMismatch {
                        context: "elementwise binary inputs".into(),
                        expected: l,
                        got: r,
                    });
                }
                Ok(l)
            }
        }
    }
}
