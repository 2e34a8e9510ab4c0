//! Essential-protocol allowances (spec §4.E item 1, glossary "Essential
//! protocol"): DHCP, DNS, ICMPv6, and the app metadata server are allowed
//! implicitly even without a matching user ACL rule.

use nim_shared_types::ni::NiType;

use crate::connmark::{ConnMark, EssentialAceId};
use crate::iptables::{Rule, RuleAction, Table};

/// Fixed match clause for one essential protocol, scoped to the NI's
/// addressing per spec §4.E ("for Local, constrained to NI subnet or
/// bridge IP").
fn essential_matches(id: EssentialAceId, ni_type: NiType, subnet_or_bridge_match: &str) -> String {
    let proto = match id {
        EssentialAceId::Dhcp => "-p udp -m multiport --dports 67,68,546,547",
        EssentialAceId::Dns => "-p udp --dport 53 -m mark --mark 0/0xffffffff",
        // DNS over UDP/TCP: emit a second rule for TCP in build_essential_rules.
        EssentialAceId::Icmpv6 => "-p icmpv6",
        EssentialAceId::MetadataServer => "-p tcp -d 169.254.169.254 --dport 80",
    };
    match ni_type {
        NiType::Switch => proto.to_string(),
        NiType::Local => format!("{proto} {subnet_or_bridge_match}"),
    }
}

/// Build the fixed-order essential-allowance rules entered at the start
/// of a VIF's raw/PREROUTING chain, starting at `position`. Returns the
/// rules and the next free position for user ACL rules.
pub fn build_essential_rules(
    table: Table,
    chain_name: &str,
    position: u32,
    ni_type: NiType,
    subnet_or_bridge_match: &str,
) -> (Vec<Rule>, u32) {
    let mut rules = Vec::new();
    let mut pos = position;

    let specs = [
        EssentialAceId::Dhcp,
        EssentialAceId::Dns,
        EssentialAceId::Icmpv6,
        EssentialAceId::MetadataServer,
    ];
    for id in specs {
        let matches = essential_matches(id, ni_type, subnet_or_bridge_match);
        rules.push(Rule {
            table,
            chain_name: chain_name.to_string(),
            position: pos,
            matches,
            action: RuleAction::Accept,
            counts_packets: true,
        });
        pos += 1;

        if matches!(id, EssentialAceId::Dns) {
            // DNS is allowed over both UDP and TCP.
            let tcp_matches = match ni_type {
                NiType::Switch => "-p tcp --dport 53".to_string(),
                NiType::Local => format!("-p tcp --dport 53 {subnet_or_bridge_match}"),
            };
            rules.push(Rule {
                table,
                chain_name: chain_name.to_string(),
                position: pos,
                matches: tcp_matches,
                action: RuleAction::Accept,
                counts_packets: true,
            });
            pos += 1;
        }
    }

    (rules, pos)
}

/// Mangle-table connmark rules for the essential allowances, so traffic
/// admitted implicitly is still accounted for by flow collectors.
pub fn build_essential_mark_rules(chain_name: &str, position: u32) -> (Vec<Rule>, u32) {
    let marks = [
        EssentialAceId::Dhcp,
        EssentialAceId::Dns,
        EssentialAceId::Icmpv6,
        EssentialAceId::MetadataServer,
    ];
    let mut rules = Vec::new();
    let mut pos = position;
    for id in marks {
        let mark = ConnMark::essential(id).encode();
        rules.push(Rule {
            table: Table::Mangle,
            chain_name: chain_name.to_string(),
            position: pos,
            matches: String::new(),
            action: RuleAction::SetMark { mark },
            counts_packets: false,
        });
        pos += 1;
    }
    (rules, pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn switch_ni_essential_rules_are_unscoped() {
        let (rules, next) = build_essential_rules(Table::Raw, "vif1.0", 0, NiType::Switch, "");
        // dhcp, dns(udp+tcp), icmpv6, metadata = 5 rules
        assert_eq!(rules.len(), 5);
        assert_eq!(next, 5);
        assert!(!rules[0].matches.contains("-d"));
    }

    #[test]
    fn local_ni_essential_rules_are_scoped_to_subnet() {
        let (rules, _) = build_essential_rules(Table::Raw, "vif1.0", 0, NiType::Local, "-d 10.1.0.0/24");
        assert!(rules.iter().all(|r| r.matches.contains("10.1.0.0/24")));
    }
}
