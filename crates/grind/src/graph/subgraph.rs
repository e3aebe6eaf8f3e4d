//! The compiled, immutable unit of work.

use std::sync::Arc;

use crate::error::{GraphError, Result};
use crate::graph::op::Operator;
use crate::tensor::{ExternalId, TensorValue, ValueId, ValueTable};

/// A validated operator DAG plus its value table.
///
/// Subgraphs are created once per distinct block configuration, never
/// mutated afterwards, and shared read-only (`Arc`) across any number of
/// runtimes. All static weight storage lives here for the subgraph's
/// lifetime.
#[derive(Debug)]
pub struct Subgraph {
    values: ValueTable,
    ops: Vec<Operator>,
    /// Operator indices in topological execution order.
    order: Vec<usize>,
    external_count: u32,
    /// Value ids indexed by external id.
    externals: Vec<ValueId>,
}

impl Subgraph {
    pub(crate) fn new(
        values: ValueTable,
        ops: Vec<Operator>,
        order: Vec<usize>,
        external_count: u32,
        externals: Vec<ValueId>,
    ) -> Self {
        Self {
            values,
            ops,
            order,
            external_count,
            externals,
        }
    }

    pub fn external_count(&self) -> u32 {
        self.external_count
    }

    /// Value id bound to an external id, if declared.
    pub fn external_value(&self, id: ExternalId) -> Option<ValueId> {
        self.externals.get(id.0 as usize).copied()
    }

    pub fn value(&self, id: ValueId) -> &TensorValue {
        self.values.get(id)
    }

    pub fn values(&self) -> &ValueTable {
        &self.values
    }

    /// Operators in definition order.
    pub fn ops(&self) -> &[Operator] {
        &self.ops
    }

    /// `(index, operator)` pairs in topological execution order.
    pub fn ops_in_order(&self) -> impl Iterator<Item = (usize, &Operator)> {
        self.order.iter().map(|&i| (i, &self.ops[i]))
    }

    /// Releases the subgraph, freeing its weight storage.
    ///
    /// Fails with `SubgraphInUse` when live runtimes (or other clones of
    /// the handle) still reference it; destroy those first.
    pub fn release(this: Arc<Self>) -> Result<()> {
        match Arc::try_unwrap(this) {
            Ok(subgraph) => {
                log::debug!(
                    "releasing subgraph: {} values, {} operators",
                    subgraph.values.len(),
                    subgraph.ops.len()
                );
                drop(subgraph);
                Ok(())
            }
            Err(_) => Err(GraphError::SubgraphInUse),
        }
    }
}
