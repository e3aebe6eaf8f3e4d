//! The executable runtime: a compiled subgraph plus scratch workspace,
//! driven through the reshape → bind → execute protocol.
//!
//! A runtime is not internally synchronized; callers must serialize
//! `reshape`/`bind`/`execute` per instance. Independent runtimes compiled
//! from the same subgraph may run concurrently, each with its own
//! workspace and buffers.

use std::sync::Arc;

use anyhow::anyhow;

use crate::error::{GraphError, Result};
use crate::graph::{Operator, Subgraph};
use crate::kernels::{CpuKernels, KernelEngine};
use crate::runtime::Workspace;
use crate::tensor::{Dim, ExternalId, ValueId, ValueRole};

/// Lifecycle states. `Released` is terminal and reachable from anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum State {
    Created,
    Reshaped,
    Bound,
    Executed,
    Released,
}

/// A caller-owned buffer attached to an external value at bind time.
///
/// Buffers move into the runtime at `bind` and move back out via
/// [`Runtime::take_buffer`]; the runtime never resizes them and a buffer
/// larger than the bound shape is accepted (only its prefix is used).
#[derive(Debug)]
pub struct ExternalValue {
    pub id: ExternalId,
    pub data: Vec<f32>,
}

impl ExternalValue {
    pub fn new(id: impl Into<ExternalId>, data: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A compiled, executable instance of one subgraph.
pub struct Runtime {
    subgraph: Arc<Subgraph>,
    engine: Box<dyn KernelEngine>,
    workspace: Workspace,
    state: State,
    /// Concrete shape per value id, filled in by `reshape`.
    resolved: Vec<Option<Vec<usize>>>,
    /// Bound buffer per external id.
    bindings: Vec<Option<Vec<f32>>>,
}

impl Runtime {
    /// Compiles a subgraph against a workspace, using the built-in CPU
    /// kernel engine.
    pub fn compile(subgraph: Arc<Subgraph>, workspace: Workspace) -> Result<Self> {
        Self::compile_with_engine(subgraph, workspace, Box::new(CpuKernels))
    }

    /// Compiles with a caller-supplied kernel engine.
    ///
    /// Fails with `IdentifierMismatch` when the subgraph's declared
    /// external count does not match its external tensors.
    pub fn compile_with_engine(
        subgraph: Arc<Subgraph>,
        workspace: Workspace,
        engine: Box<dyn KernelEngine>,
    ) -> Result<Self> {
        let declared = subgraph.external_count();
        let found = subgraph.values().iter().filter(|v| v.is_external()).count() as u32;
        if found != declared {
            return Err(GraphError::IdentifierMismatch { declared, found });
        }
        log::debug!(
            "compiled runtime: {} values, {} operators, {} externals",
            subgraph.values().len(),
            subgraph.ops().len(),
            declared
        );
        Ok(Self {
            resolved: vec![None; subgraph.values().len()],
            bindings: vec![None; declared as usize],
            workspace,
            engine,
            subgraph,
            state: State::Created,
        })
    }

    /// Resolves every external shape, propagates shapes through the
    /// operators and sizes the workspace.
    ///
    /// Re-invoking with identical shapes is a no-op that preserves the
    /// current state; different shapes transition the runtime back to
    /// `Reshaped`, dropping any bindings, so one runtime can be reused
    /// across batch sizes without recompiling the subgraph.
    pub fn reshape(&mut self, external_shapes: &[(ExternalId, Vec<usize>)]) -> Result<()> {
        self.check_not_released()?;

        let mut resolved: Vec<Option<Vec<usize>>> = vec![None; self.subgraph.values().len()];

        // Static weights resolve from their declared (fully fixed) shapes.
        for value in self.subgraph.values().iter() {
            if value.role == ValueRole::StaticWeight {
                let shape = value
                    .shape
                    .iter()
                    .map(|d| match d {
                        Dim::Fixed(n) => *n,
                        Dim::Batch => 0,
                    })
                    .collect();
                resolved[value.id.index()] = Some(shape);
            }
        }

        // Caller-supplied external shapes, checked against declarations.
        for (ext, shape) in external_shapes {
            let Some(value_id) = self.subgraph.external_value(*ext) else {
                return Err(GraphError::InvalidParams(format!(
                    "unknown external id {}",
                    ext.0
                )));
            };
            if resolved[value_id.index()].is_some() {
                return Err(GraphError::InvalidParams(format!(
                    "duplicate shape for external id {}",
                    ext.0
                )));
            }
            let declared = &self.subgraph.value(value_id).shape;
            if shape.len() != declared.len() {
                return Err(GraphError::ShapeMismatch {
                    context: format!("external value {} rank", ext.0),
                    expected: vec![declared.len()],
                    got: vec![shape.len()],
                });
            }
            for (given, decl) in shape.iter().zip(declared) {
                if *given == 0 {
                    return Err(GraphError::InvalidShape {
                        shape: shape.iter().map(|&d| Dim::Fixed(d)).collect(),
                        reason: format!("zero dimension for external value {}", ext.0),
                    });
                }
                if let Dim::Fixed(fixed) = decl {
                    if given != fixed {
                        return Err(GraphError::ShapeMismatch {
                            context: format!("external value {}", ext.0),
                            expected: vec![*fixed],
                            got: vec![*given],
                        });
                    }
                }
            }
            resolved[value_id.index()] = Some(shape.clone());
        }
        for ext in 0..self.subgraph.external_count() {
            let value_id = self
                .subgraph
                .external_value(ExternalId(ext))
                .ok_or(GraphError::IdentifierMismatch {
                    declared: self.subgraph.external_count(),
                    found: ext,
                })?;
            if resolved[value_id.index()].is_none() {
                return Err(GraphError::InvalidParams(format!(
                    "no shape supplied for external value {ext}"
                )));
            }
        }

        // Shape propagation in topological order.
        let subgraph = Arc::clone(&self.subgraph);
        for (_, op) in subgraph.ops_in_order() {
            let shape_of = |id: ValueId| -> Result<Vec<usize>> {
                resolved[id.index()].clone().ok_or_else(|| {
                    GraphError::InvalidParams(format!("value {id:?} has no resolved shape"))
                })
            };
            let out_shape = op.infer_output_shape(&shape_of)?;
            let out_id = op.output();
            match &resolved[out_id.index()] {
                Some(existing) => {
                    // External outputs carry a caller-pinned shape the
                    // inferred shape must reproduce.
                    if *existing != out_shape {
                        return Err(GraphError::ShapeMismatch {
                            context: format!("output of operator producing {out_id:?}"),
                            expected: existing.clone(),
                            got: out_shape,
                        });
                    }
                }
                None => resolved[out_id.index()] = Some(out_shape),
            }
        }

        // Identical shapes: nothing to do, state is preserved.
        if self.state != State::Created && resolved == self.resolved {
            return Ok(());
        }

        let sizes: Vec<usize> = subgraph
            .values()
            .iter()
            .map(|v| {
                if v.role == ValueRole::Internal {
                    resolved[v.id.index()]
                        .as_ref()
                        .map(|s| s.iter().product())
                        .unwrap_or(0)
                } else {
                    0
                }
            })
            .collect();
        self.workspace.layout(&sizes);
        log::debug!(
            "reshaped runtime: {} workspace elements",
            self.workspace.total_elements()
        );

        self.resolved = resolved;
        self.bindings.iter_mut().for_each(|b| *b = None);
        self.state = State::Reshaped;
        Ok(())
    }

    /// Attaches caller buffers to every external value.
    ///
    /// Fails with `MissingBinding` when any declared external value lacks
    /// a buffer and with `BufferSizeMismatch` when a buffer holds fewer
    /// elements than its reshaped shape requires.
    pub fn bind(&mut self, externals: Vec<ExternalValue>) -> Result<()> {
        self.check_not_released()?;
        if self.state == State::Created {
            return Err(GraphError::InvalidParams(
                "runtime must be reshaped before binding".into(),
            ));
        }

        let mut staged: Vec<Option<Vec<f32>>> = vec![None; self.bindings.len()];
        for external in externals {
            let ExternalValue { id, data } = external;
            let Some(value_id) = self.subgraph.external_value(id) else {
                return Err(GraphError::InvalidParams(format!(
                    "unknown external id {}",
                    id.0
                )));
            };
            let slot = &mut staged[id.0 as usize];
            if slot.is_some() {
                return Err(GraphError::InvalidParams(format!(
                    "duplicate buffer for external id {}",
                    id.0
                )));
            }
            let expected = self.value_len(value_id)?;
            if data.len() < expected {
                return Err(GraphError::BufferSizeMismatch {
                    id,
                    expected,
                    got: data.len(),
                });
            }
            *slot = Some(data);
        }
        for (idx, slot) in staged.iter().enumerate() {
            if slot.is_none() {
                return Err(GraphError::MissingBinding(ExternalId(idx as u32)));
            }
        }

        self.bindings = staged;
        self.state = State::Bound;
        Ok(())
    }

    /// Runs every operator in compile-time order through the kernel
    /// engine.
    ///
    /// Requires a bound runtime. A kernel failure surfaces as
    /// `KernelExecutionFailed` with the failing operator's identity and
    /// leaves the runtime bound; outputs are invalid until a subsequent
    /// execute succeeds.
    pub fn execute(&mut self) -> Result<()> {
        self.check_not_released()?;
        if !matches!(self.state, State::Bound | State::Executed) {
            return Err(GraphError::NotBound);
        }
        self.state = State::Bound;

        let subgraph = Arc::clone(&self.subgraph);
        for (op_index, op) in subgraph.ops_in_order() {
            let out_id = op.output();
            let out_len = self.value_len(out_id)?;
            let mut out_buf = self.take_out_buf(out_id)?;
            let result = self.run_op(op, &mut out_buf[..out_len]);
            self.put_out_buf(out_id, out_buf)?;
            result.map_err(|source| GraphError::KernelExecutionFailed {
                op_index,
                kind: op.kind(),
                source,
            })?;
        }

        self.state = State::Executed;
        Ok(())
    }

    /// View of an external output after a successful execute.
    pub fn output(&self, id: ExternalId) -> Result<&[f32]> {
        self.check_not_released()?;
        if self.state != State::Executed {
            return Err(GraphError::InvalidParams(
                "outputs are only valid after a successful execute".into(),
            ));
        }
        let value_id = self
            .subgraph
            .external_value(id)
            .ok_or_else(|| GraphError::InvalidParams(format!("unknown external id {}", id.0)))?;
        let len = self.value_len(value_id)?;
        self.bindings[id.0 as usize]
            .as_deref()
            .map(|b| &b[..len])
            .ok_or(GraphError::MissingBinding(id))
    }

    /// Concrete shape of an external value after reshape.
    pub fn external_shape(&self, id: ExternalId) -> Result<&[usize]> {
        self.check_not_released()?;
        let value_id = self
            .subgraph
            .external_value(id)
            .ok_or_else(|| GraphError::InvalidParams(format!("unknown external id {}", id.0)))?;
        self.resolved[value_id.index()]
            .as_deref()
            .ok_or_else(|| GraphError::InvalidParams("runtime has not been reshaped".into()))
    }

    /// Detaches and returns the buffer bound to `id`, handing ownership
    /// back to the caller. The runtime drops back to `Reshaped`.
    pub fn take_buffer(&mut self, id: ExternalId) -> Result<Vec<f32>> {
        self.check_not_released()?;
        if (id.0 as usize) >= self.bindings.len() {
            return Err(GraphError::InvalidParams(format!(
                "unknown external id {}",
                id.0
            )));
        }
        let buf = self.bindings[id.0 as usize]
            .take()
            .ok_or(GraphError::MissingBinding(id))?;
        if self.state > State::Reshaped && self.state != State::Released {
            self.state = State::Reshaped;
        }
        Ok(buf)
    }

    /// Total scratch elements allocated by the last reshape.
    pub fn workspace_elements(&self) -> usize {
        self.workspace.total_elements()
    }

    /// Frees the workspace and drops any remaining bindings. Callable
    /// from any state, idempotent; every other operation on a released
    /// runtime fails with `RuntimeReleased`.
    pub fn release(&mut self) {
        if self.state == State::Released {
            return;
        }
        log::debug!("releasing runtime");
        self.workspace.clear();
        self.bindings.iter_mut().for_each(|b| *b = None);
        self.state = State::Released;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> State {
        self.state
    }

    fn check_not_released(&self) -> Result<()> {
        if self.state == State::Released {
            return Err(GraphError::RuntimeReleased);
        }
        Ok(())
    }

    /// Resolved element count of a value.
    fn value_len(&self, id: ValueId) -> Result<usize> {
        self.resolved[id.index()]
            .as_ref()
            .map(|s| s.iter().product())
            .ok_or_else(|| {
                GraphError::InvalidParams(format!("value {id:?} has no resolved shape"))
            })
    }

    /// Read slice for an operator input, trimmed to its resolved length.
    fn input_slice(&self, id: ValueId) -> Result<&[f32]> {
        let value = self.subgraph.value(id);
        let len = self.value_len(id)?;
        match value.role {
            ValueRole::Internal => Ok(&self.workspace.slot(id.index())[..len]),
            ValueRole::ExternalInput | ValueRole::ExternalOutput => {
                let ext = value.external_id.ok_or_else(|| {
                    GraphError::InvalidParams(format!("external value {id:?} has no external id"))
                })?;
                self.bindings[ext.0 as usize]
                    .as_deref()
                    .map(|b| &b[..len])
                    .ok_or(GraphError::MissingBinding(ext))
            }
            ValueRole::StaticWeight => value
                .static_data()
                .and_then(|w| w.as_f32_slice())
                .ok_or_else(|| {
                    GraphError::InvalidParams(format!(
                        "value {id:?} is not usable as a plain f32 input"
                    ))
                }),
        }
    }

    /// Temporarily removes the output buffer of an operator so the engine
    /// can write it while reading sibling values.
    fn take_out_buf(&mut self, id: ValueId) -> Result<Vec<f32>> {
        let value = self.subgraph.value(id);
        match value.role {
            ValueRole::Internal => Ok(self.workspace.take_slot(id.index())),
            ValueRole::ExternalOutput => {
                let ext = value.external_id.ok_or_else(|| {
                    GraphError::InvalidParams(format!("external value {id:?} has no external id"))
                })?;
                self.bindings[ext.0 as usize]
                    .take()
                    .ok_or(GraphError::MissingBinding(ext))
            }
            role => Err(GraphError::InvalidParams(format!(
                "operator cannot produce a {role:?} value"
            ))),
        }
    }

    fn put_out_buf(&mut self, id: ValueId, buf: Vec<f32>) -> Result<()> {
        let value = self.subgraph.value(id);
        match value.role {
            ValueRole::Internal => {
                self.workspace.put_slot(id.index(), buf);
                Ok(())
            }
            ValueRole::ExternalOutput => {
                let ext = value.external_id.ok_or_else(|| {
                    GraphError::InvalidParams(format!("external value {id:?} has no external id"))
                })?;
                self.bindings[ext.0 as usize] = Some(buf);
                Ok(())
            }
            role => Err(GraphError::InvalidParams(format!(
                "operator cannot produce a {role:?} value"
            ))),
        }
    }

    /// Dispatches one operator to the kernel engine.
    fn run_op(&self, op: &Operator, out: &mut [f32]) -> anyhow::Result<()> {
        match op {
            Operator::FullyConnected {
                input,
                filter,
                bias,
                clamp,
                ..
            } => {
                let x = self.input_slice(*input)?;
                let filter_data = self
                    .subgraph
                    .value(*filter)
                    .static_data()
                    .ok_or_else(|| anyhow!("fully-connected filter must be a static weight"))?;
                let bias_slice = match bias {
                    Some(b) => Some(self.input_slice(*b)?),
                    None => None,
                };
                let [_, k] = filter_data.shape();
                let batch = if k == 0 { 0 } else { x.len() / k };
                self.engine
                    .fully_connected(x, batch, filter_data, bias_slice, *clamp, out)
            }
            Operator::Unary { kind, input, .. } => {
                let x = self.input_slice(*input)?;
                self.engine.unary(*kind, x, out)
            }
            Operator::Binary {
                kind,
                left,
                right,
                clamp,
                ..
            } => {
                let l = self.input_slice(*left)?;
                let r = self.input_slice(*right)?;
                self.engine.binary(*kind, l, r, *clamp, out)
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.release();
    }
}
