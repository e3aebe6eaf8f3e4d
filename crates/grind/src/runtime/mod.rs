//! The runtime lifecycle: compile, reshape, bind, execute, release.

pub mod runtime;
pub mod workspace;


pub use runtime::{ExternalValue, Runtime};
pub use workspace::Workspace;
