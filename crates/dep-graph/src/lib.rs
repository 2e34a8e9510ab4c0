//! Generic dependency-graph engine (spec §4.A).
//!
//! Maps an intended configuration graph -- Items connected by
//! `ItemIsCreated` Dependencies -- onto Create/Modify/Delete/Recreate calls
//! against registered [`Configurator`]s, in topological order, via
//! [`Graph::sync`].

pub mod configurator;
pub mod dependency;
pub mod dot;
pub mod graph;
pub mod item;
pub mod node;

pub use configurator::{Configurator, ConfiguratorError, ConfiguratorResult};
pub use dependency::Dependency;
pub use graph::{Graph, NodeView, SyncReport};
pub use item::ItemValue;
pub use node::{LastOp, Node, NodeState};
