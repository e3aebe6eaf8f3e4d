//! Tensor values: dtypes, shapes, roles and the per-subgraph value table.

pub mod dtype;
pub mod value;

#[cfg(test)]
mod tests;

pub use dtype::DType;
pub use value::{Dim, ExternalId, TensorValue, ValueId, ValueRole, ValueTable, WeightData};
