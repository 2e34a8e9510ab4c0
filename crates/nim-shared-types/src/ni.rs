//! Network-Instance and application-VIF configuration (spec §3, §4.E).

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::network::IpAddress;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NiType {
    /// Bridges a selected uplink port directly; no NAT.
    Switch,
    /// Owns a bridge and NATs to a selected uplink.
    Local,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum IpType {
    Ipv4,
    Ipv6,
    Dual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DhcpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

/// Per-NI configuration as delivered by `NetworkInstanceConfig` (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInstanceConfig {
    pub uuid: Uuid,
    pub ni_type: NiType,
    /// Logical uplink label the prober (out of scope, see spec §4.E) should
    /// resolve to a concrete interface; `None` means "any uplink".
    pub port_label: Option<String>,
    pub subnet: Option<IpAddress>,
    pub gateway: Option<IpAddr>,
    pub dhcp_range: Option<DhcpRange>,
    pub dns_servers: Vec<IpAddr>,
    pub ip_type: IpType,
    pub mtu: u16,
    pub activate: bool,
}

impl NetworkInstanceConfig {
    /// Name of the bridge item this NI owns: `bn<bridgeNum>`.
    pub fn bridge_name(&self, bridge_num: u32) -> String {
        format!("bn{bridge_num}")
    }
}

/// Match clauses understood by `parseUserACLRule` (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AclMatch {
    Ip(IpAddress),
    Protocol(AclProtocol),
    /// Remote (far-end) port; requires a protocol match in the same rule.
    FPort(u16),
    /// Local (VIF-side) port; requires a protocol match in the same rule.
    LPort(u16),
    /// DNS-name ipset reference.
    Host(String),
    /// Per-VIF ipset reference (endpoint ID set).
    EidSet,
    /// Restricts a PORTMAP action to uplinks sharing this logical label.
    Adapter(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AclProtocol {
    Tcp,
    Udp,
    Icmp,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RateUnit {
    Second,
    Minute,
    Hour,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AclAction {
    Drop,
    Limit { rate: u32, unit: RateUnit, burst: u32 },
    PortMap { target_port: u16 },
}

/// A single user-authored ACL rule, in source order (spec §4.E).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AclRule {
    pub id: u32,
    pub matches: Vec<AclMatch>,
    /// At most one action; absent means the implicit ALLOW.
    pub action: Option<AclAction>,
}

/// A single application virtual interface (spec §3 "App Network / VIF").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppNetworkConfig {
    pub app_uuid: Uuid,
    pub ni_uuid: Uuid,
    pub host_if_name: String,
    pub guest_mac: crate::network::MacAddr,
    pub guest_ip: Option<IpAddr>,
    pub acls: Vec<AclRule>,
}

/// The persisted/subscribed document combining every `NetworkInstanceConfig`
/// and `AppNetworkConfig` the agent currently knows about (spec §6
/// "Subscriptions consumed": `NetworkInstanceConfig`, `AppNetworkConfig`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NiAndAppConfig {
    pub network_instances: Vec<NetworkInstanceConfig>,
    pub app_networks: Vec<AppNetworkConfig>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_name_is_derived_from_bridge_num() {
        let ni = NetworkInstanceConfig {
            uuid: Uuid::nil(),
            ni_type: NiType::Local,
            port_label: None,
            subnet: None,
            gateway: None,
            dhcp_range: None,
            dns_servers: vec![],
            ip_type: IpType::Ipv4,
            mtu: 1500,
            activate: true,
        };
        assert_eq!(ni.bridge_name(3), "bn3");
    }
}
