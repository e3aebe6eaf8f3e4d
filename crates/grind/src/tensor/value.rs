//! The value table: every tensor participating in a subgraph.
//!
//! Values are registered through [`ValueTable::define`] and addressed by a
//! dense [`ValueId`] afterwards. The table owns static weight data for the
//! lifetime of the subgraph; external values own nothing and are attached
//! to caller buffers at bind time.

use std::sync::Arc;

use ndarray::Array2;

use crate::error::{GraphError, Result};
use crate::kernels::q_common::{Q4Matrix, Q8Matrix};
use crate::tensor::DType;

/// Dense identifier of a tensor value, unique within one subgraph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub(crate) u32);

impl ValueId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Identifier of an externally visible value, contiguous from 0.
///
/// By convention, id 0 is the sole input and id 1 the sole output of a
/// single-block configuration; multi-block compositions extend the
/// numbering contiguously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalId(pub u32);

impl From<u32> for ExternalId {
    fn from(id: u32) -> Self {
        ExternalId(id)
    }
}

/// One dimension of a tensor shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dim {
    /// A size known at definition time. Zero is rejected.
    Fixed(usize),
    /// A batch dimension resolved at reshape time. Only permitted on
    /// external tensors.
    Batch,
}

/// How a value participates in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRole {
    /// Caller supplies the buffer at bind time.
    ExternalInput,
    /// Caller supplies the buffer at bind time; an operator produces it.
    ExternalOutput,
    /// Weight data owned by the subgraph, immutable after definition.
    StaticWeight,
    /// Scratch tensor backed by the runtime workspace.
    Internal,
}

/// Static weight storage, shared so that two logically distinct weight
/// values may alias the same backing matrix (the gate/up reuse in the
/// reference configuration).
#[derive(Debug, Clone)]
pub enum WeightData {
    F32(Arc<Array2<f32>>),
    Q8(Arc<Q8Matrix>),
    Q4(Arc<Q4Matrix>),
}

impl WeightData {
    pub fn dtype(&self) -> DType {
        match self {
            WeightData::F32(_) => DType::F32,
            WeightData::Q8(_) => DType::Q8,
            WeightData::Q4(_) => DType::Q4,
        }
    }

    /// `[rows, cols]` of the logical (dequantized) matrix.
    pub fn shape(&self) -> [usize; 2] {
        match self {
            WeightData::F32(w) => {
                let (r, c) = w.dim();
                [r, c]
            }
            WeightData::Q8(m) => m.shape,
            WeightData::Q4(m) => m.shape,
        }
    }

    pub fn num_elements(&self) -> usize {
        let [r, c] = self.shape();
        r * c
    }

    /// Contiguous f32 view, available only for full-precision weights in
    /// standard layout.
    pub(crate) fn as_f32_slice(&self) -> Option<&[f32]> {
        match self {
            WeightData::F32(w) => w.as_slice(),
            _ => None,
        }
    }
}

/// One node in the graph: shape, dtype, role and optional static data.
#[derive(Debug, Clone)]
pub struct TensorValue {
    pub id: ValueId,
    pub shape: Vec<Dim>,
    pub dtype: DType,
    pub role: ValueRole,
    pub external_id: Option<ExternalId>,
    pub(crate) data: Option<WeightData>,
}

impl TensorValue {
    pub fn is_external(&self) -> bool {
        matches!(self.role, ValueRole::ExternalInput | ValueRole::ExternalOutput)
    }

    /// Static weight data, present exactly for `StaticWeight` values.
    pub fn static_data(&self) -> Option<&WeightData> {
        self.data.as_ref()
    }
}

/// Registry of every tensor value in one subgraph.
#[derive(Debug, Default)]
pub struct ValueTable {
    values: Vec<TensorValue>,
}

impl ValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a value and returns its dense id.
    ///
    /// Fails with `InvalidShape` for zero dimensions or a batch placeholder
    /// on a non-external value, and with `RoleConflict` when static data
    /// presence does not match the role, when an external id is supplied
    /// for a non-external role (or missing for an external one), or when a
    /// quantized dtype is requested for anything but a static weight.
    pub fn define(
        &mut self,
        shape: Vec<Dim>,
        dtype: DType,
        role: ValueRole,
        external_id: Option<ExternalId>,
        data: Option<WeightData>,
    ) -> Result<ValueId> {
        if shape.is_empty() {
            return Err(GraphError::InvalidShape {
                shape,
                reason: "rank zero tensors are not supported".into(),
            });
        }
        let is_external = matches!(role, ValueRole::ExternalInput | ValueRole::ExternalOutput);
        let bad_dim = shape.iter().find_map(|dim| match dim {
            Dim::Fixed(0) => Some("zero dimension"),
            Dim::Batch if !is_external => {
                Some("batch placeholder only permitted on external tensors")
            }
            _ => None,
        });
        if let Some(reason) = bad_dim {
            return Err(GraphError::InvalidShape {
                shape,
                reason: reason.into(),
            });
        }

        match (role, &data) {
            (ValueRole::StaticWeight, None) => {
                return Err(GraphError::RoleConflict(
                    "static weight defined without data".into(),
                ));
            }
            (ValueRole::StaticWeight, Some(_)) => {}
            (_, Some(_)) => {
                return Err(GraphError::RoleConflict(format!(
                    "static data supplied for {role:?} value"
                )));
            }
            (_, None) => {}
        }
        if is_external != external_id.is_some() {
            return Err(GraphError::RoleConflict(format!(
                "external id {} for {role:?} value",
                if external_id.is_some() { "supplied" } else { "missing" }
            )));
        }
        if dtype.is_quantized() && role != ValueRole::StaticWeight {
            return Err(GraphError::RoleConflict(format!(
                "quantized dtype {dtype:?} is only permitted on static weights"
            )));
        }

        if let Some(weight) = &data {
            if weight.dtype() != dtype {
                return Err(GraphError::RoleConflict(format!(
                    "static data is {:?} but value declares {dtype:?}",
                    weight.dtype()
                )));
            }
            let declared: usize = shape
                .iter()
                .map(|d| match d {
                    Dim::Fixed(n) => *n,
                    Dim::Batch => 0,
                })
                .product();
            if declared != weight.num_elements() {
                return Err(GraphError::ShapeMismatch {
                    context: "static weight definition".into(),
                    expected: vec![declared],
                    got: vec![weight.num_elements()],
                });
            }
        }

        let id = ValueId(self.values.len() as u32);
        self.values.push(TensorValue {
            id,
            shape,
            dtype,
            role,
            external_id,
            data,
        });
        Ok(id)
    }

    /// O(1) lookup. Never fails for ids issued by this table.
    pub fn get(&self, id: ValueId) -> &TensorValue {
        &self.values[id.index()]
    }

    pub fn contains(&self, id: ValueId) -> bool {
        id.index() < self.values.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TensorValue> {
        self.values.iter()
    }
}
