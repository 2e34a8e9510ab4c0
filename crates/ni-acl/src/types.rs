//! Item payloads the reconciler puts into the dependency graph besides
//! the packet-filter types in [`crate::iptables`] (spec §4.E).

use std::net::IpAddr;

use mac_address::MacAddress;
use serde::{Deserialize, Serialize};

/// `bn<bridgeNum>` bridge item (spec §4.E "A bridge item... with a
/// generated MAC derived from bridgeNum").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeValue {
    pub name: String,
    pub mac: [u8; 6],
    /// Set for Switch NIs, where the bridge enslaves the uplink interface
    /// directly rather than NATing through it.
    pub enslaved_uplink: Option<String>,
}

/// Derive a locally-administered MAC from a bridge number, stable across
/// restarts (spec §4.E).
pub fn bridge_mac(bridge_num: u32) -> [u8; 6] {
    let b = bridge_num.to_be_bytes();
    // 0x02 sets the locally-administered bit and clears multicast.
    [0x02, 0x00, b[0], b[1], b[2], b[3]]
}

pub fn format_mac(mac: [u8; 6]) -> String {
    MacAddress::new(mac).to_string()
}

/// A bridge-side IPv4 assignment at the NI's gateway (Local NI only;
/// spec §4.E "A bridge-IP assignment at the NI's gateway").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BridgeAddressValue {
    pub bridge_name: String,
    pub address: IpAddr,
    pub prefix_len: u8,
}

/// The host-side tap/veth link for one app VIF (spec §4.E "Per VIF: a
/// host-side tap/veth link item").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VifLinkValue {
    pub host_if_name: String,
    pub bridge_name: String,
    pub guest_mac: [u8; 6],
}

/// An optional static IPv4 assignment for a VIF.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VifAddressValue {
    pub host_if_name: String,
    pub address: IpAddr,
}

/// Externally-observed uplink selection, produced by the uplink prober
/// (out of scope, spec §4.E) and consumed here as a plain external item
/// carrying the selected uplink's logical label and interface name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UplinkSelectionValue {
    pub logical_label: String,
    pub if_name: String,
}

/// SNAT-to-uplink item for a Local NI's bridged traffic (spec §4.E "NAT
/// rules to SNAT bridged traffic out the selected uplink").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UplinkNatValue {
    pub bridge_name: String,
    pub uplink_if_name: String,
}

/// Generated DHCP-server config file for a Local NI (spec §4.E "a
/// DHCP-server config file"). The configurator renders this into the
/// concrete daemon's file format and writes it atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DhcpConfigValue {
    pub ni_uuid: String,
    pub bridge_name: String,
    pub range_start: IpAddr,
    pub range_end: IpAddr,
    pub gateway: IpAddr,
    pub lease_time_secs: u32,
}

/// Generated DNS-forwarder config file for a Local NI (spec §4.E "a DNS-
/// forwarder config file").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DnsConfigValue {
    pub ni_uuid: String,
    pub bridge_name: String,
    pub upstream_servers: Vec<IpAddr>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_mac_is_locally_administered_and_deterministic() {
        let mac = bridge_mac(3);
        assert_eq!(mac[0] & 0x02, 0x02);
        assert_eq!(mac[0] & 0x01, 0);
        assert_eq!(bridge_mac(3), mac);
        assert_ne!(bridge_mac(3), bridge_mac(4));
    }
}
