//! Packet-filter chain/rule value types (spec §4.E).
//!
//! These are the `ItemValue` payloads the reconciler puts into the
//! dependency graph; [`crate::configurators`] is what actually renders
//! and applies them via `iptables-restore`/`ipset`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Raw,
    Filter,
    Nat,
    Mangle,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum HookChain {
    Prerouting,
    Postrouting,
    Forward,
}

/// A named chain inside one table (spec §4.E "Four tables, with ordered
/// chains per VIF"). The chain item itself carries no rules; rules are
/// separate items that depend on it (`ItemIsCreated`), which is what lets
/// the dep-graph engine add/remove individual rules without recreating
/// the whole chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    pub table: Table,
    pub name: String,
    /// The built-in hook this chain is jumped to from, and the match
    /// expression that selects traffic into it (e.g. `-i br0 -m physdev
    /// --physdev-in vif1.0+`, or a destination-IP match for ingress).
    pub hook: HookChain,
    pub entry_match: String,
    /// The bridge this chain's traffic flows through; a chain cannot be
    /// created before its bridge exists.
    pub bridge_name: String,
}

/// Deterministic item name shared by a [`Chain`] and every [`Rule`] that
/// belongs to it, so a rule can name its dependency without holding a
/// reference to the `Chain` value.
pub fn chain_item_name(table: Table, chain_name: &str) -> String {
    format!("iptables-chain/{table:?}/{chain_name}")
}

/// A single ordered rule inside a [`Chain`] (spec §4.E compiled ACL
/// contents). `position` is the rule's index within its chain and is part
/// of the item's identity so reordering compiles to Delete+Create of the
/// moved rules rather than an in-place Modify (iptables rules have no
/// stable handle to modify in place).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub table: Table,
    pub chain_name: String,
    pub position: u32,
    /// Raw match expression, e.g. `-p udp --dport 67:68`.
    pub matches: String,
    pub action: RuleAction,
    /// Packet-counting rules with a DROP action still count packets
    /// (spec §3 invariant "every ACL rule compiles to at least one
    /// packet-counting rule even if its action is DROP").
    pub counts_packets: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RuleAction {
    Accept,
    Drop,
    /// `-j DNAT --to-destination <ip>:<port>`.
    Dnat { to_ip: std::net::IpAddr, to_port: u16 },
    /// `-j SNAT --to-source <ip>[:<port>]`.
    Snat { to_ip: std::net::IpAddr, to_port: Option<u16> },
    /// `-m limit --limit <rate>/<unit> --limit-burst <burst> -j ACCEPT`.
    Limit { rate: u32, unit: &'static str, burst: u32 },
    /// A connmark-setting step (spec §4.E "Mangle / PREROUTING"); see
    /// [`crate::connmark`].
    SetMark { mark: u32 },
    /// Jump to another chain, used for the restore-mark/accept dance and
    /// for per-VIF chain entry points.
    Jump { target: String },
    /// No-op rule whose only purpose is the packet/byte counter (spec §3
    /// invariant).
    Count,
}

impl Rule {
    /// Deterministic item name: unique within a table, stable across Syncs
    /// as long as the rule's position in its chain doesn't change.
    pub fn item_name(&self) -> String {
        format!("iptables/{:?}/{}/{:03}", self.table, self.chain_name, self.position)
    }
}

impl Chain {
    pub fn item_name(&self) -> String {
        chain_item_name(self.table, &self.name)
    }
}

/// An `ipset` used by ACL match clauses: `eidset` (per-VIF endpoint IDs)
/// or `host` (DNS-name resolved addresses) (spec §4.E "Per VIF: ... ipset
/// entries for `eidset` and `host` ACL rule references").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpSet {
    pub name: String,
    pub set_type: IpSetType,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IpSetType {
    HashIp,
    HashNet,
}

impl IpSet {
    pub fn item_name(&self) -> String {
        format!("ipset/{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_item_names_are_stable_and_ordered_lexicographically_by_position() {
        let r1 = Rule {
            table: Table::Raw,
            chain_name: "vif1.0".into(),
            position: 1,
            matches: String::new(),
            action: RuleAction::Accept,
            counts_packets: true,
        };
        let r2 = Rule { position: 2, ..r1.clone() };
        assert!(r1.item_name() < r2.item_name());
    }
}
