//! `parseUserACLRule` (spec §4.E "ACL compilation"): turns one
//! [`AclRule`] into the ordered packet-filter rules it contributes to a
//! VIF's raw, filter, nat and mangle chains.

use std::net::IpAddr;

use nim_shared_types::ni::{AclAction, AclMatch, AclProtocol, AclRule, NiType, RateUnit};
use thiserror::Error;

use crate::connmark::ConnMark;
use crate::iptables::{Rule, RuleAction, Table};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AclCompileError {
    #[error("rule {id} mixes more than one action (DROP/LIMIT/PORTMAP are mutually exclusive)")]
    MixedActions { id: u32 },
    #[error("rule {id}: fport/lport match requires a protocol match in the same rule")]
    PortMatchWithoutProtocol { id: u32 },
    #[error("rule {id}: PORTMAP requires a protocol match")]
    PortMapWithoutProtocol { id: u32 },
}

/// Parameters describing the VIF a rule is being compiled for, needed to
/// render concrete iptables match expressions.
pub struct CompileContext<'a> {
    pub ni_type: NiType,
    pub bridge_if_name: &'a str,
    pub vif_if_name: &'a str,
    pub guest_ip: Option<IpAddr>,
    pub app_id: u8,
}

fn rate_unit_str(unit: RateUnit) -> &'static str {
    match unit {
        RateUnit::Second => "sec",
        RateUnit::Minute => "min",
        RateUnit::Hour => "hour",
    }
}

/// Render an [`AclMatch`] list into a raw iptables match expression.
/// Validates that `fport`/`lport` never appear without an accompanying
/// `protocol` match (spec §4.E *Matches*).
fn render_matches(id: u32, matches: &[AclMatch]) -> Result<String, AclCompileError> {
    let has_protocol = matches.iter().any(|m| matches!(m, AclMatch::Protocol(_)));
    let mut parts = Vec::new();
    for m in matches {
        match m {
            AclMatch::Ip(ip) => parts.push(format!("-d {ip}")),
            AclMatch::Protocol(AclProtocol::Tcp) => parts.push("-p tcp".to_string()),
            AclMatch::Protocol(AclProtocol::Udp) => parts.push("-p udp".to_string()),
            AclMatch::Protocol(AclProtocol::Icmp) => parts.push("-p icmp".to_string()),
            AclMatch::FPort(p) => {
                if !has_protocol {
                    return Err(AclCompileError::PortMatchWithoutProtocol { id });
                }
                parts.push(format!("--dport {p}"));
            }
            AclMatch::LPort(p) => {
                if !has_protocol {
                    return Err(AclCompileError::PortMatchWithoutProtocol { id });
                }
                parts.push(format!("--sport {p}"));
            }
            AclMatch::Host(name) => parts.push(format!("-m set --match-set host_{name} dst")),
            AclMatch::EidSet => parts.push("-m set --match-set eidset src".to_string()),
            // `adapter` only constrains which uplinks a PORTMAP rule is
            // instantiated against (spec §4.E); it contributes no match
            // expression of its own in the raw/filter chains.
            AclMatch::Adapter(_) => {}
        }
    }
    Ok(parts.join(" "))
}

/// One user rule compiled into every table it contributes to.
pub struct CompiledAcl {
    pub egress: Vec<Rule>,
    pub ingress: Vec<Rule>,
    pub mangle: Vec<Rule>,
    /// Present only for a PORTMAP action; NAT rules are instantiated per
    /// selected uplink by the caller (spec §4.E "for each uplink selected
    /// by the rule's adapter match"), so this carries just the target
    /// port and optional adapter restriction.
    pub port_map: Option<PortMapSpec>,
}

pub struct PortMapSpec {
    pub protocol: AclProtocol,
    pub external_port: u16,
    pub target_port: u16,
    pub adapter: Option<String>,
}

/// Compile `rule` against `ctx`, appending rules starting at
/// `egress_position`/`ingress_position`/`mangle_position` (the caller
/// owns numbering across the whole chain, including the essential
/// allowances that precede user rules).
/// `AclRule::action` is modeled as `Option<AclAction>` rather than a list,
/// so "at most one action" is a compile-time invariant of the domain type
/// and can never be violated once a rule reaches [`compile_rule`]. The
/// wire format still carries an `actions` array (spec §8 scenario 4), so
/// [`validate_raw_action_count`] enforces the same rule at the
/// deserialization boundary, where more than one entry is still possible.
pub fn validate_raw_action_count(id: u32, raw_actions_len: usize) -> Result<(), AclCompileError> {
    if raw_actions_len > 1 {
        return Err(AclCompileError::MixedActions { id });
    }
    Ok(())
}

pub fn compile_rule(
    rule: &AclRule,
    ctx: &CompileContext,
    egress_position: u32,
    ingress_position: u32,
    mangle_position: u32,
) -> Result<CompiledAcl, AclCompileError> {
    if let Some(AclAction::PortMap { .. }) = &rule.action {
        if !rule.matches.iter().any(|m| matches!(m, AclMatch::Protocol(_))) {
            return Err(AclCompileError::PortMapWithoutProtocol { id: rule.id });
        }
    }

    let base_match = render_matches(rule.id, &rule.matches)?;

    let egress_chain = egress_chain_name(ctx.vif_if_name);
    let ingress_chain = ingress_chain_name(ctx.vif_if_name);
    let mangle_chain = mangle_chain_name(ctx.vif_if_name);

    let mut egress = Vec::new();
    let mut ingress = Vec::new();
    let mut mangle = Vec::new();
    let mut pos_e = egress_position;
    let mut pos_i = ingress_position;
    let mut pos_m = mangle_position;

    match &rule.action {
        Some(AclAction::Drop) => {
            // Local NI: packet-counting only, actual drop happens at the
            // routing stage via a blackhole route. Switch NI: terminal
            // DROP right here (spec §4.E item 2).
            let action = match ctx.ni_type {
                NiType::Local => RuleAction::Count,
                NiType::Switch => RuleAction::Drop,
            };
            egress.push(mk(Table::Raw, &egress_chain, pos_e, base_match.clone(), action.clone()));
            pos_e += 1;
            ingress.push(mk(Table::Filter, &ingress_chain, pos_i, base_match.clone(), action));
            pos_i += 1;

            let mark = ConnMark::user_rule(ctx.app_id, rule.id, true).encode();
            mangle.extend(mark_dance(&mangle_chain, pos_m, &base_match, mark));
            pos_m += 4;
        }
        Some(AclAction::Limit { rate, unit, burst }) => {
            let limited_match = format!(
                "{base_match} -m limit --limit {rate}/{unit} --limit-burst {burst}",
                unit = rate_unit_str(*unit)
            );
            egress.push(mk(Table::Raw, &egress_chain, pos_e, limited_match.clone(), RuleAction::Accept));
            pos_e += 1;
            egress.push(mk(Table::Raw, &egress_chain, pos_e, base_match.clone(), RuleAction::Drop));
            pos_e += 1;

            ingress.push(mk(Table::Filter, &ingress_chain, pos_i, limited_match, RuleAction::Accept));
            pos_i += 1;
            ingress.push(mk(Table::Filter, &ingress_chain, pos_i, base_match.clone(), RuleAction::Drop));
            pos_i += 1;

            let mark = ConnMark::user_rule(ctx.app_id, rule.id, false).encode();
            mangle.extend(mark_dance(&mangle_chain, pos_m, &base_match, mark));
            pos_m += 4;
        }
        Some(AclAction::PortMap { target_port }) => {
            egress.push(mk(Table::Raw, &egress_chain, pos_e, base_match.clone(), RuleAction::Accept));
            pos_e += 1;
            ingress.push(mk(Table::Filter, &ingress_chain, pos_i, base_match.clone(), RuleAction::Accept));
            pos_i += 1;

            let mark = ConnMark::user_rule(ctx.app_id, rule.id, false).encode();
            mangle.extend(mark_dance(&mangle_chain, pos_m, &base_match, mark));
            pos_m += 4;

            let protocol = rule
                .matches
                .iter()
                .find_map(|m| match m {
                    AclMatch::Protocol(p) => Some(*p),
                    _ => None,
                })
                .expect("validated above");
            let external_port = rule
                .matches
                .iter()
                .find_map(|m| match m {
                    AclMatch::FPort(p) => Some(*p),
                    AclMatch::LPort(p) => Some(*p),
                    _ => None,
                })
                .unwrap_or(*target_port);
            let adapter = rule.matches.iter().find_map(|m| match m {
                AclMatch::Adapter(a) => Some(a.clone()),
                _ => None,
            });

            return Ok(CompiledAcl {
                egress,
                ingress,
                mangle,
                port_map: Some(PortMapSpec {
                    protocol,
                    external_port,
                    target_port: *target_port,
                    adapter,
                }),
            });
        }
        None => {
            egress.push(mk(Table::Raw, &egress_chain, pos_e, base_match.clone(), RuleAction::Accept));
            pos_e += 1;
            ingress.push(mk(Table::Filter, &ingress_chain, pos_i, base_match.clone(), RuleAction::Accept));
            pos_i += 1;

            let mark = ConnMark::user_rule(ctx.app_id, rule.id, false).encode();
            mangle.extend(mark_dance(&mangle_chain, pos_m, &base_match, mark));
        }
    }

    Ok(CompiledAcl { egress, ingress, mangle, port_map: None })
}

/// Per-VIF chain names (spec §4.E "Per VIF: ... raw/filter/mangle
/// chains"), so rules from different VIFs never collide in the same
/// table.
pub fn egress_chain_name(vif_if_name: &str) -> String {
    format!("egress-{vif_if_name}")
}

pub fn ingress_chain_name(vif_if_name: &str) -> String {
    format!("ingress-{vif_if_name}")
}

pub fn mangle_chain_name(vif_if_name: &str) -> String {
    format!("mangle-{vif_if_name}")
}

fn mk(table: Table, chain_name: &str, position: u32, matches: String, action: RuleAction) -> Rule {
    Rule {
        table,
        chain_name: chain_name.to_string(),
        position,
        matches,
        action,
        counts_packets: true,
    }
}

/// The four-rule "restore mark / accept if already set / set mark /
/// restore+accept" dance that marks a connection's first packet exactly
/// once (spec §4.E "Each marking step is its own small chain that (a)
/// restores any pre-existing mark, (b) if already non-zero accepts,
/// (c) sets the computed mark, (d) restores and accepts").
fn mark_dance(chain_name: &str, start_position: u32, matches: &str, mark: u32) -> Vec<Rule> {
    vec![
        Rule {
            table: Table::Mangle,
            chain_name: chain_name.to_string(),
            position: start_position,
            matches: matches.to_string(),
            action: RuleAction::Jump { target: "CONNMARK --restore-mark".into() },
            counts_packets: false,
        },
        Rule {
            table: Table::Mangle,
            chain_name: chain_name.to_string(),
            position: start_position + 1,
            matches: format!("{matches} -m mark ! --mark 0/0xffffffff"),
            action: RuleAction::Accept,
            counts_packets: false,
        },
        Rule {
            table: Table::Mangle,
            chain_name: chain_name.to_string(),
            position: start_position + 2,
            matches: matches.to_string(),
            action: RuleAction::SetMark { mark },
            counts_packets: false,
        },
        Rule {
            table: Table::Mangle,
            chain_name: chain_name.to_string(),
            position: start_position + 3,
            matches: matches.to_string(),
            action: RuleAction::Jump { target: "CONNMARK --save-mark".into() },
            counts_packets: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use nim_shared_types::ni::AclRule;

    fn ctx() -> CompileContext<'static> {
        CompileContext {
            ni_type: NiType::Local,
            bridge_if_name: "bn1",
            vif_if_name: "vif1.0",
            guest_ip: Some("10.1.0.5".parse().unwrap()),
            app_id: 1,
        }
    }

    #[test]
    fn raw_wire_rule_with_two_actions_is_rejected_before_it_reaches_compile_rule() {
        assert_eq!(
            validate_raw_action_count(1, 2),
            Err(AclCompileError::MixedActions { id: 1 })
        );
        assert_eq!(validate_raw_action_count(1, 1), Ok(()));
        assert_eq!(validate_raw_action_count(1, 0), Ok(()));
    }

    #[test]
    fn fport_or_lport_without_protocol_is_a_compile_error() {
        let bad = AclRule {
            id: 2,
            matches: vec![AclMatch::FPort(80)],
            action: None,
        };
        assert_eq!(
            compile_rule(&bad, &ctx(), 0, 0, 0),
            Err(AclCompileError::PortMatchWithoutProtocol { id: 2 })
        );
    }

    #[test]
    fn portmap_requires_protocol_match() {
        let rule = AclRule {
            id: 3,
            matches: vec![AclMatch::LPort(8080)],
            action: Some(AclAction::PortMap { target_port: 80 }),
        };
        assert_eq!(
            compile_rule(&rule, &ctx(), 0, 0, 0),
            Err(AclCompileError::PortMapWithoutProtocol { id: 3 })
        );
    }

    /// Spec §8 scenario 4.
    #[test]
    fn portmap_rule_compiles_dnat_spec_and_expected_connmark() {
        let rule = AclRule {
            id: 7,
            matches: vec![AclMatch::Protocol(AclProtocol::Tcp), AclMatch::LPort(8080)],
            action: Some(AclAction::PortMap { target_port: 80 }),
        };
        let compiled = compile_rule(&rule, &ctx(), 0, 0, 0).unwrap();
        let pm = compiled.port_map.unwrap();
        assert_eq!(pm.target_port, 80);
        assert_eq!(pm.external_port, 8080);
        assert_eq!(pm.protocol, AclProtocol::Tcp);

        let set_mark = compiled
            .mangle
            .iter()
            .find_map(|r| match &r.action {
                RuleAction::SetMark { mark } => Some(*mark),
                _ => None,
            })
            .unwrap();
        assert_eq!(set_mark, (1u32 << 24) | (1 << 23) | (1 << 21) | 7);
    }

    #[test]
    fn drop_on_local_ni_is_count_only_not_a_real_drop() {
        let rule = AclRule {
            id: 9,
            matches: vec![AclMatch::Protocol(AclProtocol::Tcp)],
            action: Some(AclAction::Drop),
        };
        let compiled = compile_rule(&rule, &ctx(), 0, 0, 0).unwrap();
        assert!(matches!(compiled.egress[0].action, RuleAction::Count));
    }

    #[test]
    fn drop_on_switch_ni_is_terminal_drop() {
        let rule = AclRule {
            id: 9,
            matches: vec![AclMatch::Protocol(AclProtocol::Tcp)],
            action: Some(AclAction::Drop),
        };
        let mut c = ctx();
        c.ni_type = NiType::Switch;
        let compiled = compile_rule(&rule, &c, 0, 0, 0).unwrap();
        assert!(matches!(compiled.egress[0].action, RuleAction::Drop));
    }

    #[test]
    fn limit_expands_to_two_chained_rules_per_direction() {
        let rule = AclRule {
            id: 11,
            matches: vec![AclMatch::Protocol(AclProtocol::Tcp)],
            action: Some(AclAction::Limit { rate: 10, unit: RateUnit::Second, burst: 5 }),
        };
        let compiled = compile_rule(&rule, &ctx(), 0, 0, 0).unwrap();
        assert_eq!(compiled.egress.len(), 2);
        assert!(matches!(compiled.egress[1].action, RuleAction::Drop));
    }
}
