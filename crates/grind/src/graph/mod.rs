//! The operator catalog, the subgraph builder and the compiled subgraph.

pub mod builder;
pub mod op;
pub mod subgraph;

#[cfg(test)]
mod tests;

pub use builder::SubgraphBuilder;
pub use op::{BinaryKind, Clamp, OpKind, Operator, UnaryKind};
pub use subgraph::Subgraph;
