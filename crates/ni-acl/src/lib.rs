//! NI/ACL reconciler (spec §4.E): turns Network Instance and app-VIF
//! configuration into bridges, VIFs, ipsets and the four-table packet-
//! filter chains that enforce them, and drives the changes through
//! [`nim_dep_graph::Graph`].

pub mod acl;
pub mod configurators;
pub mod connmark;
pub mod dhcp_dns;
pub mod essential;
pub mod exec;
pub mod iptables;
pub mod reconcile;
pub mod types;

pub use exec::{RealShellExec, ShellExec};
pub use reconcile::{reconcile_network_instance, AppIdAllocator, ReconcileError, UplinkBinding};

use std::sync::Arc;

use nim_dep_graph::Graph;
use nim_network_config::pmxcfs::PersistedStore;

/// Registers every Configurator this crate provides with `graph`, wired
/// to a single shared shell-exec seam and persisted-config store (spec
/// §9 "reconcile all writes through a single owner task").
pub fn register_configurators(graph: &mut Graph, exec: Arc<dyn ShellExec>, persisted: PersistedStore) {
    use configurators::*;

    graph.register_configurator(ITEM_TYPE_BRIDGE, Arc::new(BridgeConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_BRIDGE_ADDRESS, Arc::new(BridgeAddressConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_VIF_LINK, Arc::new(VifLinkConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_VIF_ADDRESS, Arc::new(VifAddressConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_UPLINK_NAT, Arc::new(UplinkNatConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_IPSET, Arc::new(IpSetConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_CHAIN, Arc::new(ChainConfigurator::new(exec.clone())));
    graph.register_configurator(ITEM_TYPE_RULE, Arc::new(RuleConfigurator::new(exec)));
    graph.register_configurator(ITEM_TYPE_DHCP_CONFIG, Arc::new(DhcpConfigConfigurator::new(persisted.clone())));
    graph.register_configurator(ITEM_TYPE_DNS_CONFIG, Arc::new(DnsConfigConfigurator::new(persisted)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::MockShellExec;
    use nim_shared_types::ni::{DhcpRange, IpType, NetworkInstanceConfig, NiType};
    use nim_shared_types::network::IpAddress;
    use uuid::Uuid;

    fn switch_ni() -> NetworkInstanceConfig {
        NetworkInstanceConfig {
            uuid: Uuid::nil(),
            ni_type: NiType::Switch,
            port_label: None,
            subnet: None,
            gateway: None,
            dhcp_range: None,
            dns_servers: vec![],
            ip_type: IpType::Ipv4,
            mtu: 1500,
            activate: true,
        }
    }

    fn local_ni() -> NetworkInstanceConfig {
        NetworkInstanceConfig {
            uuid: Uuid::nil(),
            ni_type: NiType::Local,
            port_label: None,
            subnet: Some(IpAddress::new("10.1.0.0".parse().unwrap(), Some(24))),
            gateway: Some("10.1.0.1".parse().unwrap()),
            dhcp_range: Some(DhcpRange { start: "10.1.0.10".parse().unwrap(), end: "10.1.0.250".parse().unwrap() }),
            dns_servers: vec!["8.8.8.8".parse().unwrap()],
            ip_type: IpType::Ipv4,
            mtu: 1500,
            activate: true,
        }
    }

    #[test]
    fn switch_ni_with_no_vifs_puts_only_the_bridge() {
        let mut graph = Graph::new();
        let mut ids = AppIdAllocator::new();
        reconcile_network_instance(&mut graph, &switch_ni(), 1, None, &[], &mut ids).unwrap();
        let exec: Arc<dyn ShellExec> = Arc::new(MockShellExec::new());
        register_configurators(&mut graph, exec, PersistedStore::mock());
        let report = graph.sync();
        assert!(report.failures.is_empty());
    }

    #[test]
    fn local_ni_reconcile_succeeds_and_is_idempotent() {
        let mut graph = Graph::new();
        let mut ids = AppIdAllocator::new();
        reconcile_network_instance(&mut graph, &local_ni(), 2, None, &[], &mut ids).unwrap();

        let mut mock = MockShellExec::new();
        mock.expect_run().returning(|_, _| Ok(()));
        let exec: Arc<dyn ShellExec> = Arc::new(mock);
        register_configurators(&mut graph, exec.clone(), PersistedStore::mock());

        let first = graph.sync();
        assert!(first.failures.is_empty());

        reconcile_network_instance(&mut graph, &local_ni(), 2, None, &[], &mut ids).unwrap();
        let second = graph.sync();
        assert!(second.failures.is_empty());
    }
}
