//! Item payloads the DPC-port Configurators put into the dependency graph
//! (spec §3 "Port", §4.A).

use nim_shared_types::dpc::{DhcpMode, L2Kind};
use nim_shared_types::network::IpAddress;

/// The link-layer existence of one DPC port: a physical NIC brought up, a
/// VLAN sub-interface created on a parent, or a bond assembled from slaves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkValue {
    pub if_name: String,
    pub l2_kind: L2Kind,
}

/// A port's IP-layer configuration: either static addresses applied
/// directly, or a DHCP client started against the link.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressValue {
    pub if_name: String,
    pub dhcp_mode: DhcpMode,
    pub addresses: Vec<IpAddress>,
}

/// A port's default route, present only when a static gateway is given;
/// DHCP-assigned gateways are installed by the DHCP client itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteValue {
    pub if_name: String,
    pub gateway: IpAddress,
}

pub const ITEM_TYPE_LINK: &str = "dpc-link";
pub const ITEM_TYPE_ADDRESS: &str = "dpc-address";
pub const ITEM_TYPE_ROUTE: &str = "dpc-route";

pub fn link_item_name(if_name: &str) -> String {
    format!("dpc/{if_name}/link")
}

pub fn address_item_name(if_name: &str) -> String {
    format!("dpc/{if_name}/address")
}

pub fn route_item_name(if_name: &str) -> String {
    format!("dpc/{if_name}/route")
}
