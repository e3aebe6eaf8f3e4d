//! Assembles tensor values and operators into a validated subgraph.
//!
//! The builder checks what it can at definition time (roles, dtypes,
//! clamp bounds, fixed-dimension agreement, the single-producer rule) and
//! defers batch-dependent checks to the runtime's reshape phase. The
//! final topology validation happens in [`SubgraphBuilder::finish`].

use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::op::{BinaryKind, Clamp, Operator, UnaryKind};
use crate::graph::subgraph::Subgraph;
use crate::tensor::{DType, Dim, ExternalId, ValueId, ValueRole, ValueTable, WeightData};

/// Builder for one subgraph. Create with the number of external values
/// the graph will expose, define values and operators in any order, then
/// call [`finish`](Self::finish).
pub struct SubgraphBuilder {
    values: ValueTable,
    ops: Vec<Operator>,
    external_count: u32,
    /// Producing operator per value, indexed by value id.
    producers: Vec<Option<usize>>,
}

impl SubgraphBuilder {
    pub fn new(external_count: u32) -> Self {
        Self {
            values: ValueTable::new(),
            ops: Vec::new(),
            external_count,
            producers: Vec::new(),
        }
    }

    /// Defines a caller-fed input tensor bound to `external_id`.
    pub fn define_external_input(
        &mut self,
        shape: Vec<Dim>,
        dtype: DType,
        external_id: ExternalId,
    ) -> Result<ValueId> {
        self.check_external_id(external_id)?;
        self.push_value(shape, dtype, ValueRole::ExternalInput, Some(external_id), None)
    }

    /// Defines a caller-read output tensor bound to `external_id`.
    pub fn define_external_output(
        &mut self,
        shape: Vec<Dim>,
        dtype: DType,
        external_id: ExternalId,
    ) -> Result<ValueId> {
        self.check_external_id(external_id)?;
        self.push_value(shape, dtype, ValueRole::ExternalOutput, Some(external_id), None)
    }

    /// Defines a static weight owned by the subgraph. The declared shape
    /// is taken from the data itself.
    pub fn define_static_weight(&mut self, data: WeightData) -> Result<ValueId> {
        let [rows, cols] = data.shape();
        let shape = vec![Dim::Fixed(rows), Dim::Fixed(cols)];
        let dtype = data.dtype();
        self.push_value(shape, dtype, ValueRole::StaticWeight, None, Some(data))
    }

    /// Defines a rank-1 static weight (bias vector).
    pub fn define_static_bias(&mut self, data: WeightData) -> Result<ValueId> {
        let shape = vec![Dim::Fixed(data.num_elements())];
        let dtype = data.dtype();
        self.push_value(shape, dtype, ValueRole::StaticWeight, None, Some(data))
    }

    /// Defines an intermediate tensor backed by the runtime workspace.
    /// Its declared shape is an initial estimate; the reshape phase
    /// recomputes it from the operator rules.
    pub fn define_internal(&mut self, shape: Vec<Dim>, dtype: DType) -> Result<ValueId> {
        self.push_value(shape, dtype, ValueRole::Internal, None, None)
    }

    /// Emits `output = clamp(input @ filterᵗ + bias)`.
    pub fn fully_connected(
        &mut self,
        input: ValueId,
        filter: ValueId,
        bias: Option<ValueId>,
        output: ValueId,
        clamp: Clamp,
    ) -> Result<()> {
        clamp.validate()?;
        let mut ids = vec![input, filter, output];
        ids.extend(bias);
        self.check_ids(&ids)?;

        self.expect_f32(input, "fully-connected input")?;
        self.expect_f32(output, "fully-connected output")?;
        if let Some(b) = bias {
            self.expect_f32(b, "fully-connected bias")?;
            if self.values.get(b).role != ValueRole::StaticWeight {
                return Err(GraphError::InvalidParams(
                    "fully-connected bias must be a static weight".into(),
                ));
            }
        }
        if self.values.get(filter).role != ValueRole::StaticWeight {
            return Err(GraphError::InvalidParams(
                "fully-connected filter must be a static weight".into(),
            ));
        }
        let filter_shape = self.values.get(filter).shape.clone();
        if filter_shape.len() != 2 {
            return Err(GraphError::InvalidParams(format!(
                "fully-connected filter must be rank 2, got rank {}",
                filter_shape.len()
            )));
        }
        // Fixed-dimension agreement; batch placeholders resolve later.
        let in_shape = &self.values.get(input).shape;
        if let (Some(Dim::Fixed(k_in)), Dim::Fixed(k_f)) = (in_shape.last(), filter_shape[1]) {
            if *k_in != k_f {
                return Err(GraphError::ShapeMismatch {
                    context: "fully-connected contraction dimension".into(),
                    expected: vec![k_f],
                    got: vec![*k_in],
                });
            }
        }
        let out_shape = &self.values.get(output).shape;
        if let (Some(Dim::Fixed(n_out)), Dim::Fixed(n_f)) = (out_shape.last(), filter_shape[0]) {
            if *n_out != n_f {
                return Err(GraphError::ShapeMismatch {
                    context: "fully-connected output width".into(),
                    expected: vec![n_f],
                    got: vec![*n_out],
                });
            }
        }

        self.push_op(Operator::FullyConnected {
            input,
            filter,
            bias,
            output,
            clamp,
        })
    }

    /// Emits an element-preserving activation.
    pub fn unary(&mut self, kind: UnaryKind, input: ValueId, output: ValueId) -> Result<()> {
        self.check_ids(&[input, output])?;
        self.expect_f32(input, "unary input")?;
        self.expect_f32(output, "unary output")?;
        self.check_same_fixed_dims(input, output, "unary operator")?;
        self.push_op(Operator::Unary { kind, input, output })
    }

    /// Emits an elementwise binary operator. Both inputs must have
    /// identical shapes; there is no broadcasting.
    pub fn binary(
        &mut self,
        kind: BinaryKind,
        left: ValueId,
        right: ValueId,
        output: ValueId,
        clamp: Clamp,
    ) -> Result<()> {
        clamp.validate()?;
        self.check_ids(&[left, right, output])?;
        self.expect_f32(left, "binary left input")?;
        self.expect_f32(right, "binary right input")?;
        self.expect_f32(output, "binary output")?;
        self.check_same_fixed_dims(left, right, "binary operator inputs")?;
        self.check_same_fixed_dims(left, output, "binary operator output")?;
        self.push_op(Operator::Binary {
            kind,
            left,
            right,
            output,
            clamp,
        })
    }

    /// Validates the assembled topology and freezes it into an immutable
    /// subgraph.
    ///
    /// Checks, in order: every declared external id is defined exactly
    /// once (`IdentifierMismatch`), the operator set is a DAG
    /// (`CycleDetected`), and no internal or static value dangles
    /// (`InvalidParams`). The returned subgraph stores the operators in a
    /// topological execution order.
    pub fn finish(self) -> Result<Arc<Subgraph>> {
        let Self {
            values,
            ops,
            external_count,
            producers,
        } = self;

        // External identifier completeness.
        let mut externals: Vec<Option<ValueId>> = vec![None; external_count as usize];
        let mut found = 0u32;
        for value in values.iter() {
            if let Some(ext) = value.external_id {
                found += 1;
                externals[ext.0 as usize] = Some(value.id);
            }
        }
        if found != external_count {
            return Err(GraphError::IdentifierMismatch {
                declared: external_count,
                found,
            });
        }
        let externals: Vec<ValueId> = externals
            .into_iter()
            .map(|v| v.ok_or(GraphError::IdentifierMismatch {
                declared: external_count,
                found,
            }))
            .collect::<Result<_>>()?;

        let order = toposort(&ops, &producers)?;

        // Dangling values: every internal must be produced and consumed,
        // every weight consumed, every external output produced.
        let mut consumed = vec![false; values.len()];
        for op in &ops {
            for id in op.inputs() {
                consumed[id.index()] = true;
            }
        }
        for value in values.iter() {
            let produced = producers[value.id.index()].is_some();
            match value.role {
                ValueRole::Internal => {
                    if !produced {
                        return Err(GraphError::InvalidParams(format!(
                            "internal value {:?} is never produced",
                            value.id
                        )));
                    }
                    if !consumed[value.id.index()] {
                        return Err(GraphError::InvalidParams(format!(
                            "internal value {:?} is never consumed",
                            value.id
                        )));
                    }
                }
                ValueRole::StaticWeight => {
                    if !consumed[value.id.index()] {
                        return Err(GraphError::InvalidParams(format!(
                            "static weight {:?} is never consumed",
                            value.id
                        )));
                    }
                }
                ValueRole::ExternalOutput => {
                    if !produced {
                        return Err(GraphError::InvalidParams(format!(
                            "external output {:?} is never produced",
                            value.id
                        )));
                    }
                }
                ValueRole::ExternalInput => {
                    if !consumed[value.id.index()] {
                        log::warn!("external input {:?} is never consumed", value.id);
                    }
                }
            }
        }

        Ok(Arc::new(Subgraph::new(
            values,
            ops,
            order,
            external_count,
            externals,
        )))
    }

    fn check_external_id(&self, external_id: ExternalId) -> Result<()> {
        if external_id.0 >= self.external_count {
            return Err(GraphError::InvalidParams(format!(
                "external id {} out of range (declared {})",
                external_id.0, self.external_count
            )));
        }
        if self
            .values
            .iter()
            .any(|v| v.external_id == Some(external_id))
        {
            return Err(GraphError::InvalidParams(format!(
                "external id {} already defined",
                external_id.0
            )));
        }
        Ok(())
    }

    fn push_value(
        &mut self,
        shape: Vec<Dim>,
        dtype: DType,
        role: ValueRole,
        external_id: Option<ExternalId>,
        data: Option<WeightData>,
    ) -> Result<ValueId> {
        let id = self.values.define(shape, dtype, role, external_id, data)?;
        self.producers.push(None);
        Ok(id)
    }

    fn push_op(&mut self, op: Operator) -> Result<()> {
        let output = op.output();
        match self.values.get(output).role {
            ValueRole::Internal | ValueRole::ExternalOutput => {}
            role => {
                return Err(GraphError::InvalidParams(format!(
                    "operator cannot produce a {role:?} value"
                )));
            }
        }
        let slot = &mut self.producers[output.index()];
        if slot.is_some() {
            return Err(GraphError::InvalidParams(format!(
                "value {output:?} already has a producer"
            )));
        }
        *slot = Some(self.ops.len());
        self.ops.push(op);
        Ok(())
    }

    fn check_ids(&self, ids: &[ValueId]) -> Result<()> {
        for id in ids {
            if !self.values.contains(*id) {
                return Err(GraphError::InvalidParams(format!(
                    "unknown value id {id:?}"
                )));
            }
        }
        Ok(())
    }

    fn expect_f32(&self, id: ValueId, context: &str) -> Result<()> {
        let dtype = self.values.get(id).dtype;
        if dtype != DType::F32 {
            return Err(GraphError::InvalidParams(format!(
                "{context} must be f32, got {dtype:?} (quantized values are only usable as fully-connected filters)"
            )));
        }
        Ok(())
    }

    /// Fixed dimensions of both values must agree; batch placeholders are
    /// compatible with anything until reshape.
    fn check_same_fixed_dims(&self, a: ValueId, b: ValueId, context: &str) -> Result<()> {
        let sa = &self.values.get(a).shape;
        let sb = &self.values.get(b).shape;
        if sa.len() != sb.len() {
            return Err(GraphError::InvalidParams(format!(
                "{context}: rank {} vs rank {}",
                sa.len(),
                sb.len()
            )));
        }
        for (da, db) in sa.iter().zip(sb) {
            if let (Dim::Fixed(x), Dim::Fixed(y)) = (da, db) {
                if x != y {
                    return Err(GraphError::ShapeMismatch {
                        context: context.into(),
                        expected: vec![*x],
                        got: vec![*y],
                    });
                }
            }
        }
        Ok(())
    }
}

/// Kahn's algorithm over the producer edges. Returns operator indices in
/// a deterministic topological order (ties broken by definition order).
fn toposort(ops: &[Operator], producers: &[Option<usize>]) -> Result<Vec<usize>> {
    let mut indegree = vec![0usize; ops.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (op_idx, op) in ops.iter().enumerate() {
        for input in op.inputs() {
            if let Some(producer) = producers[input.index()] {
                indegree[op_idx] += 1;
                dependents[producer].push(op_idx);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..ops.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(ops.len());
    while let Some(op_idx) = queue.pop_front() {
        order.push(op_idx);
        for &next in &dependents[op_idx] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != ops.len() {
        // Any operator still holding an in-edge sits on a cycle; report
        // through its output value.
        let stuck = indegree
            .iter()
            .position(|&d| d > 0)
            .map(|i| ops[i].output())
            .unwrap_or(ValueId(0));
        return Err(GraphError::CycleDetected(stuck));
    }
    Ok(order)
}
