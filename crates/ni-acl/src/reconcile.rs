//! Builds the dependency graph for one Network Instance and its VIFs
//! (spec §4.E "Reconcile"). This is the only place that knows how a
//! `NetworkInstanceConfig` + its `AppNetworkConfig`s turn into the
//! bridge/VIF/ipset/chain/rule items other modules in this crate define;
//! everything downstream (Configurators) only ever sees items by name.

use std::collections::HashMap;

use nim_dep_graph::Graph;
use nim_shared_types::ni::{AppNetworkConfig, NetworkInstanceConfig, NiType};
use thiserror::Error;
use uuid::Uuid;

use crate::acl::{compile_rule, egress_chain_name, ingress_chain_name, mangle_chain_name, validate_raw_action_count, AclCompileError, CompileContext};
use crate::connmark::ConnMark;
use crate::essential::{build_essential_mark_rules, build_essential_rules};
use crate::iptables::{Chain, HookChain, IpSet, IpSetType, Rule, RuleAction, Table};
use crate::types::{bridge_mac, BridgeAddressValue, BridgeValue, DhcpConfigValue, DnsConfigValue, UplinkNatValue, VifAddressValue, VifLinkValue};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("no more AppIDs available (8-bit AppID field exhausted)")]
    AppIdSpaceExhausted,
    #[error("acl rule {0} failed to compile: {1}")]
    AclCompile(u32, AclCompileError),
}

/// Stable App UUID -> 8-bit AppID assignment (spec §4.E "AppID: 8 bits").
/// AppID 0 is reserved for essential-protocol marks and is never handed
/// out to an app.
#[derive(Debug, Default)]
pub struct AppIdAllocator {
    assigned: HashMap<Uuid, u8>,
    next: u8,
}

impl AppIdAllocator {
    pub fn new() -> Self {
        Self { assigned: HashMap::new(), next: 1 }
    }

    pub fn allocate(&mut self, app_uuid: Uuid) -> Result<u8, ReconcileError> {
        if let Some(&id) = self.assigned.get(&app_uuid) {
            return Ok(id);
        }
        if self.next == 0 {
            return Err(ReconcileError::AppIdSpaceExhausted);
        }
        let id = self.next;
        self.assigned.insert(app_uuid, id);
        self.next = self.next.checked_add(1).unwrap_or(0);
        Ok(id)
    }
}

/// Where a Local NI's traffic should exit; produced by the uplink prober
/// (out of scope, spec §4.E) and supplied here as a plain value.
pub struct UplinkBinding {
    pub logical_label: String,
    pub if_name: String,
}

/// Assembles and `Put`s every item belonging to one NI/VIF set into
/// `graph`, returning the name of every item it put. Safe to call
/// repeatedly with an updated `vifs` list: items no longer present are
/// left for the caller to `del_item` by diffing the returned names against
/// the names returned on the previous call (this crate's reconciler is
/// called by a higher layer that diffs the full app-network list against
/// what it last reconciled, spec §4.E "Reconcile").
pub fn reconcile_network_instance(
    graph: &mut Graph,
    ni: &NetworkInstanceConfig,
    bridge_num: u32,
    uplink: Option<&UplinkBinding>,
    vifs: &[AppNetworkConfig],
    app_ids: &mut AppIdAllocator,
) -> Result<Vec<String>, ReconcileError> {
    let bridge_name = ni.bridge_name(bridge_num);
    let enslaved_uplink = match ni.ni_type {
        NiType::Switch => uplink.map(|u| u.if_name.clone()),
        NiType::Local => None,
    };

    let mut item_names = Vec::new();

    graph.put_item(
        bridge_name.clone(),
        crate::configurators::ITEM_TYPE_BRIDGE,
        false,
        BridgeValue {
            name: bridge_name.clone(),
            mac: bridge_mac(bridge_num),
            enslaved_uplink,
        },
    );
    item_names.push(bridge_name.clone());

    if let Some(subnet) = &ni.subnet {
        if let (Some(gateway), Some(prefix_len)) = (ni.gateway, subnet.prefix_len) {
            let name = format!("{bridge_name}/address");
            graph.put_item(
                name.clone(),
                crate::configurators::ITEM_TYPE_BRIDGE_ADDRESS,
                false,
                BridgeAddressValue { bridge_name: bridge_name.clone(), address: gateway, prefix_len },
            );
            item_names.push(name);
        }
    }

    if ni.ni_type == NiType::Local {
        if let Some(u) = uplink {
            let name = format!("{bridge_name}/nat");
            graph.put_item(
                name.clone(),
                crate::configurators::ITEM_TYPE_UPLINK_NAT,
                false,
                UplinkNatValue { bridge_name: bridge_name.clone(), uplink_if_name: u.if_name.clone() },
            );
            item_names.push(name);
        }
        if let (Some(range), Some(gateway)) = (&ni.dhcp_range, ni.gateway) {
            let name = format!("{bridge_name}/dhcp");
            graph.put_item(
                name.clone(),
                crate::configurators::ITEM_TYPE_DHCP_CONFIG,
                false,
                DhcpConfigValue {
                    ni_uuid: ni.uuid.to_string(),
                    bridge_name: bridge_name.clone(),
                    range_start: range.start,
                    range_end: range.end,
                    gateway,
                    lease_time_secs: 3600,
                },
            );
            item_names.push(name);
        }
        if !ni.dns_servers.is_empty() {
            let name = format!("{bridge_name}/dns");
            graph.put_item(
                name.clone(),
                crate::configurators::ITEM_TYPE_DNS_CONFIG,
                false,
                DnsConfigValue {
                    ni_uuid: ni.uuid.to_string(),
                    bridge_name: bridge_name.clone(),
                    upstream_servers: ni.dns_servers.clone(),
                },
            );
            item_names.push(name);
        }
    }

    for vif in vifs {
        item_names.extend(reconcile_vif(graph, ni, &bridge_name, vif, uplink, app_ids)?);
    }

    Ok(item_names)
}

fn reconcile_vif(
    graph: &mut Graph,
    ni: &NetworkInstanceConfig,
    bridge_name: &str,
    vif: &AppNetworkConfig,
    uplink: Option<&UplinkBinding>,
    app_ids: &mut AppIdAllocator,
) -> Result<Vec<String>, ReconcileError> {
    let mut item_names = Vec::new();
    let app_id = app_ids.allocate(vif.app_uuid)?;
    let vif_if_name = &vif.host_if_name;

    graph.put_item(
        vif_if_name.clone(),
        crate::configurators::ITEM_TYPE_VIF_LINK,
        false,
        VifLinkValue { host_if_name: vif_if_name.clone(), bridge_name: bridge_name.to_string(), guest_mac: vif.guest_mac.0.bytes() },
    );
    item_names.push(vif_if_name.clone());

    if let Some(addr) = vif.guest_ip {
        let name = format!("{vif_if_name}/address");
        graph.put_item(
            name.clone(),
            crate::configurators::ITEM_TYPE_VIF_ADDRESS,
            false,
            VifAddressValue { host_if_name: vif_if_name.clone(), address: addr },
        );
        item_names.push(name);
    }

    let subnet_match = ni
        .subnet
        .as_ref()
        .map(|s| format!("-d {}", s.addr))
        .unwrap_or_default();

    let egress_chain = egress_chain_name(vif_if_name);
    let ingress_chain = ingress_chain_name(vif_if_name);
    let mangle_chain = mangle_chain_name(vif_if_name);

    let raw_chain = Chain {
        table: Table::Raw,
        name: egress_chain.clone(),
        hook: HookChain::Forward,
        entry_match: format!("-i {vif_if_name}"),
        bridge_name: bridge_name.to_string(),
    };
    let filter_chain = Chain {
        table: Table::Filter,
        name: ingress_chain.clone(),
        hook: HookChain::Forward,
        entry_match: format!("-o {vif_if_name}"),
        bridge_name: bridge_name.to_string(),
    };
    let mangle_chain_item = Chain {
        table: Table::Mangle,
        name: mangle_chain.clone(),
        hook: HookChain::Prerouting,
        entry_match: format!("-i {vif_if_name}"),
        bridge_name: bridge_name.to_string(),
    };
    item_names.push(raw_chain.item_name());
    item_names.push(filter_chain.item_name());
    item_names.push(mangle_chain_item.item_name());
    graph.put_item(raw_chain.item_name(), crate::configurators::ITEM_TYPE_CHAIN, false, raw_chain);
    graph.put_item(filter_chain.item_name(), crate::configurators::ITEM_TYPE_CHAIN, false, filter_chain);
    graph.put_item(mangle_chain_item.item_name(), crate::configurators::ITEM_TYPE_CHAIN, false, mangle_chain_item);

    let (mut essential_raw, mut pos_e) = build_essential_rules(Table::Raw, &egress_chain, 0, ni.ni_type, &subnet_match);
    let (essential_filter, mut pos_i) = build_essential_rules(Table::Filter, &ingress_chain, 0, ni.ni_type, &subnet_match);
    let (mut essential_mark, mut pos_m) = build_essential_mark_rules(&mangle_chain, 0);

    let mut all_rules: Vec<Rule> = Vec::new();
    all_rules.append(&mut essential_raw);
    all_rules.extend(essential_filter);
    all_rules.append(&mut essential_mark);

    let ctx = CompileContext {
        ni_type: ni.ni_type,
        bridge_if_name: bridge_name,
        vif_if_name,
        guest_ip: vif.guest_ip,
        app_id,
    };

    let mut port_maps = Vec::new();
    for rule in &vif.acls {
        let raw_action_count = usize::from(rule.action.is_some());
        validate_raw_action_count(rule.id, raw_action_count).map_err(|e| ReconcileError::AclCompile(rule.id, e))?;

        let compiled = compile_rule(rule, &ctx, pos_e, pos_i, pos_m).map_err(|e| ReconcileError::AclCompile(rule.id, e))?;
        pos_e += compiled.egress.len() as u32;
        pos_i += compiled.ingress.len() as u32;
        pos_m += compiled.mangle.len() as u32;

        all_rules.extend(compiled.egress);
        all_rules.extend(compiled.ingress);
        all_rules.extend(compiled.mangle);

        if let Some(pm) = compiled.port_map {
            port_maps.push(pm);
        }
    }

    // Local NIs terminate the mangle chain with a default-drop mark so
    // unmatched traffic is still accounted for (spec §4.E "A default
    // drop-all mark is appended at the end for Local NIs").
    if ni.ni_type == NiType::Local {
        all_rules.push(Rule {
            table: Table::Mangle,
            chain_name: mangle_chain.clone(),
            position: pos_m,
            matches: String::new(),
            action: RuleAction::SetMark { mark: ConnMark::default_drop(app_id).encode() },
            counts_packets: false,
        });
        all_rules.push(Rule {
            table: Table::Raw,
            chain_name: egress_chain.clone(),
            position: pos_e,
            matches: String::new(),
            action: RuleAction::Drop,
            counts_packets: true,
        });
        all_rules.push(Rule {
            table: Table::Filter,
            chain_name: ingress_chain.clone(),
            position: pos_i,
            matches: String::new(),
            action: RuleAction::Drop,
            counts_packets: true,
        });
    }

    for rule in all_rules {
        item_names.push(rule.item_name());
        graph.put_item(rule.item_name(), crate::configurators::ITEM_TYPE_RULE, false, rule);
    }

    for (i, pm) in port_maps.into_iter().enumerate() {
        let target_uplink = match (&pm.adapter, uplink) {
            (Some(label), Some(u)) if &u.logical_label == label => Some(u),
            (None, Some(u)) => Some(u),
            _ => None,
        };
        if let Some(u) = target_uplink {
            let guest_ip = vif.guest_ip.expect("portmap rule requires a guest address");
            let proto_match = format!("-p {:?} --dport {}", pm.protocol, pm.external_port).to_lowercase();

            // Outside ingress: traffic arriving on the uplink (spec §4.E
            // "for both outside (-i <uplinkIf>) ... ingress").
            let outside_name = format!("{vif_if_name}/portmap/{i}/outside");
            graph.put_item(
                outside_name.clone(),
                crate::configurators::ITEM_TYPE_RULE,
                false,
                Rule {
                    table: Table::Nat,
                    chain_name: "PREROUTING".to_string(),
                    position: 2 * i as u32,
                    matches: format!("-i {} {proto_match}", u.if_name),
                    action: RuleAction::Dnat { to_ip: guest_ip, to_port: pm.target_port },
                    counts_packets: true,
                },
            );
            item_names.push(outside_name);
            // Same-NI ingress: another client on the same bridge reaching
            // the mapped port (spec §4.E "and same-NI (-i <brIf>) ingress").
            let same_ni_name = format!("{vif_if_name}/portmap/{i}/same-ni");
            graph.put_item(
                same_ni_name.clone(),
                crate::configurators::ITEM_TYPE_RULE,
                false,
                Rule {
                    table: Table::Nat,
                    chain_name: "PREROUTING".to_string(),
                    position: 2 * i as u32 + 1,
                    matches: format!("-i {bridge_name} {proto_match}"),
                    action: RuleAction::Dnat { to_ip: guest_ip, to_port: pm.target_port },
                    counts_packets: true,
                },
            );
            item_names.push(same_ni_name);
            // SNAT the reply on the bridge back to the bridge IP, so the
            // intra-NI client sees a consistent source (spec §4.E "SNAT
            // reply traffic ... back to the bridge IP").
            if let Some(bridge_ip) = ni.gateway {
                let reply_name = format!("{vif_if_name}/portmap/{i}/reply-snat");
                graph.put_item(
                    reply_name.clone(),
                    crate::configurators::ITEM_TYPE_RULE,
                    false,
                    Rule {
                        table: Table::Nat,
                        chain_name: "POSTROUTING".to_string(),
                        position: i as u32,
                        matches: format!("-o {bridge_name} -s {guest_ip} --sport {}", pm.target_port)
                            .to_lowercase(),
                        action: RuleAction::Snat { to_ip: bridge_ip, to_port: None },
                        counts_packets: true,
                    },
                );
                item_names.push(reply_name);
            }
        }
    }

    let eidset_members: Vec<String> = vif
        .acls
        .iter()
        .flat_map(|r| r.matches.iter())
        .filter_map(|m| match m {
            nim_shared_types::ni::AclMatch::EidSet => Some(vif.app_uuid.to_string()),
            _ => None,
        })
        .collect();
    if !eidset_members.is_empty() {
        let set = IpSet { name: format!("eidset_{vif_if_name}"), set_type: IpSetType::HashIp, members: eidset_members };
        item_names.push(set.item_name());
        graph.put_item(set.item_name(), crate::configurators::ITEM_TYPE_IPSET, false, set);
    }

    Ok(item_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mac_address::MacAddress;
    use nim_shared_types::network::{IpAddress, MacAddr};
    use nim_shared_types::ni::{AclAction, AclMatch, AclProtocol, AclRule, DhcpRange, IpType};

    /// Spec §8 scenario 4: a PORTMAP rule on a Local NI produces the
    /// outside and same-NI DNAT rules plus the POSTROUTING SNAT reply back
    /// to the bridge IP, and the whole NI reconciles cleanly.
    #[test]
    fn portmap_rule_produces_dnat_and_reply_snat() {
        let ni = NetworkInstanceConfig {
            uuid: Uuid::nil(),
            ni_type: NiType::Local,
            port_label: None,
            subnet: Some(IpAddress::new("10.1.0.0".parse().unwrap(), Some(24))),
            gateway: Some("10.1.0.1".parse().unwrap()),
            dhcp_range: Some(DhcpRange { start: "10.1.0.10".parse().unwrap(), end: "10.1.0.250".parse().unwrap() }),
            dns_servers: vec![],
            ip_type: IpType::Ipv4,
            mtu: 1500,
            activate: true,
        };
        let vif = AppNetworkConfig {
            app_uuid: Uuid::from_u128(1),
            ni_uuid: ni.uuid,
            host_if_name: "vif1.0".into(),
            guest_mac: MacAddr(MacAddress::new([2, 0, 0, 0, 0, 1])),
            guest_ip: Some("10.1.0.5".parse().unwrap()),
            acls: vec![AclRule {
                id: 7,
                matches: vec![AclMatch::Protocol(AclProtocol::Tcp), AclMatch::LPort(8080)],
                action: Some(AclAction::PortMap { target_port: 80 }),
            }],
        };
        let uplink = UplinkBinding { logical_label: "uplink".into(), if_name: "eth0".into() };

        let mut graph = Graph::new();
        let mut ids = AppIdAllocator::new();
        reconcile_network_instance(&mut graph, &ni, 1, Some(&uplink), std::slice::from_ref(&vif), &mut ids).unwrap();

        assert!(graph.get_node("vif1.0/portmap/0/outside").is_some());
        assert!(graph.get_node("vif1.0/portmap/0/same-ni").is_some());
        assert!(graph.get_node("vif1.0/portmap/0/reply-snat").is_some());

        let mut mock = crate::exec::MockShellExec::new();
        mock.expect_run().returning(|_, _| Ok(()));
        let exec: Arc<dyn crate::exec::ShellExec> = Arc::new(mock);
        crate::register_configurators(&mut graph, exec, nim_network_config::pmxcfs::PersistedStore::mock());
        let report = graph.sync();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
    }
}
