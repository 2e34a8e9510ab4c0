//! Projects a candidate [`Dpc`]'s ports onto the dependency graph (spec
//! §2 control flow step "apply the selected DPC"). Ports are kept in a
//! single cluster so switching the selected DPC tears down the previous
//! one's links, addresses and routes before the new one's are created.

use nim_dep_graph::item::ItemValue;
use nim_dep_graph::Graph;
use nim_shared_types::dpc::{DhcpMode, Dpc};

use crate::types::{address_item_name, link_item_name, route_item_name, AddressValue, LinkValue, RouteValue};

pub const CLUSTER_NAME: &str = "dpc-ports";

/// Replaces the graph's `dpc-ports` cluster with the items for `dpc`.
/// Calling this with a new candidate and then [`Graph::sync`]ing tears
/// down the ports of whichever DPC was previously selected.
pub fn project_dpc(graph: &mut Graph, dpc: &Dpc) {
    let mut items: Vec<(String, String, bool, Box<dyn ItemValue>)> = Vec::new();

    for port in &dpc.ports {
        items.push((
            link_item_name(&port.if_name),
            crate::types::ITEM_TYPE_LINK.to_string(),
            false,
            Box::new(LinkValue {
                if_name: port.if_name.clone(),
                l2_kind: port.l2_kind.clone(),
            }),
        ));

        if port.dhcp_mode != DhcpMode::None {
            items.push((
                address_item_name(&port.if_name),
                crate::types::ITEM_TYPE_ADDRESS.to_string(),
                false,
                Box::new(AddressValue {
                    if_name: port.if_name.clone(),
                    dhcp_mode: port.dhcp_mode,
                    addresses: port.static_addresses.clone(),
                }),
            ));
        }

        if let Some(gateway) = &port.static_gateway {
            items.push((
                route_item_name(&port.if_name),
                crate::types::ITEM_TYPE_ROUTE.to_string(),
                false,
                Box::new(RouteValue {
                    if_name: port.if_name.clone(),
                    gateway: gateway.clone(),
                }),
            ));
        }
    }

    graph.cluster_put(vec![CLUSTER_NAME.to_string()], items, Vec::new());
}

#[cfg(test)]
mockall::mock! {
    pub TestShellExec {}

    impl nim_ni_acl::ShellExec for TestShellExec {
        fn run(&self, program: &str, args: &[String]) -> Result<(), nim_ni_acl::exec::ExecError>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configurators::{AddressConfigurator, LinkConfigurator, RouteConfigurator};
    use chrono::Utc;
    use nim_shared_types::dpc::{DpcKey, Port};
    use nim_shared_types::network::IpAddress;
    use std::sync::Arc;

    fn registered_graph(exec: Arc<dyn nim_ni_acl::ShellExec>) -> Graph {
        let mut graph = Graph::new();
        graph.register_configurator(crate::types::ITEM_TYPE_LINK, Arc::new(LinkConfigurator::new(exec.clone())));
        graph.register_configurator(crate::types::ITEM_TYPE_ADDRESS, Arc::new(AddressConfigurator::new(exec.clone())));
        graph.register_configurator(crate::types::ITEM_TYPE_ROUTE, Arc::new(RouteConfigurator::new(exec)));
        graph
    }

    #[test]
    fn projecting_a_static_port_creates_link_address_and_route() {
        let mut mock = TestShellExec::new();
        mock.expect_run().returning(|_, _| Ok(()));
        let mut graph = registered_graph(Arc::new(mock));

        let mut port = Port::new("eth0", 0, true);
        port.dhcp_mode = DhcpMode::Static;
        port.static_addresses = vec!["192.168.1.5/24".parse::<IpAddress>().unwrap()];
        port.static_gateway = Some("192.168.1.1".parse::<IpAddress>().unwrap());
        let dpc = Dpc::new(DpcKey::from("controller"), Utc::now(), vec![port]);

        project_dpc(&mut graph, &dpc);
        let report = graph.sync();
        assert!(report.failures.is_empty());
        assert_eq!(report.created.len(), 3);
    }

    #[test]
    fn switching_candidate_tears_down_the_previous_ports() {
        let mut mock = TestShellExec::new();
        mock.expect_run().returning(|_, _| Ok(()));
        let mut graph = registered_graph(Arc::new(mock));

        let first = Dpc::new(DpcKey::from("first"), Utc::now(), vec![Port::new("eth0", 0, true)]);
        project_dpc(&mut graph, &first);
        graph.sync();

        let second = Dpc::new(DpcKey::from("second"), Utc::now(), vec![Port::new("eth1", 0, true)]);
        project_dpc(&mut graph, &second);
        let report = graph.sync();

        assert!(report.failures.is_empty());
        assert_eq!(report.deleted.len(), 1);
        assert_eq!(report.created.len(), 1);
        assert!(graph.get_node(&link_item_name("eth0")).is_none());
        assert!(graph.get_node(&link_item_name("eth1")).is_some());
    }
}
