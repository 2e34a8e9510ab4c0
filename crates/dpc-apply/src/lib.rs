//! Applies the selected Device Port Config's physical ports to the
//! running system (spec §2 control flow, §4.A/§4.B glue): turns a
//! [`nim_shared_types::dpc::Dpc`]'s ports into dependency-graph items and
//! registers the Configurators that bring them up.

pub mod configurators;
pub mod project;
pub mod types;

pub use project::project_dpc;

use std::sync::Arc;

use nim_dep_graph::Graph;
use nim_ni_acl::ShellExec;

/// Registers every Configurator this crate provides with `graph`, wired
/// to the same shell-exec seam as the NI/ACL reconciler (spec §9
/// "reconcile all writes through a single owner task").
pub fn register_configurators(graph: &mut Graph, exec: Arc<dyn ShellExec>) {
    use configurators::*;

    graph.register_configurator(types::ITEM_TYPE_LINK, Arc::new(LinkConfigurator::new(exec.clone())));
    graph.register_configurator(types::ITEM_TYPE_ADDRESS, Arc::new(AddressConfigurator::new(exec.clone())));
    graph.register_configurator(types::ITEM_TYPE_ROUTE, Arc::new(RouteConfigurator::new(exec)));
}
