//! Dependency injection: process-wide injectable metadata plus a
//! per-framework-instance container with override bindings and a
//! singleton-per-scope cache.

mod container;
mod registry;

pub use container::{Container, Provide};
pub use registry::{injectable, DepKey, Deps, InjectableMetadata};
