//! Last-resort DPC synthesis from observed physical interfaces (spec §4.C
//! "Last resort").

use nim_shared_types::dpc::{epoch_priority, DhcpMode, Dpc, DpcKey, Port};

/// Reserved name prefixes for virtual adapters that must never be
/// auto-selected as a last-resort management port (spec §4.C).
pub const RESERVED_VIRTUAL_PREFIXES: [&str; 4] = ["vif", "nbu", "nbo", "keth"];

/// The key used for the single synthesized last-resort candidate.
pub const LAST_RESORT_KEY: &str = "last-resort";

/// What the network monitor reports about one physical interface, reduced
/// to exactly what last-resort eligibility needs.
#[derive(Debug, Clone)]
pub struct ObservedInterface {
    pub name: String,
    pub is_loopback: bool,
    pub broadcast_capable: bool,
    pub enslaved: bool,
    pub held_by_guest: bool,
}

/// Whether `iface` may become a last-resort management port (spec §4.C
/// (a)-(e)).
pub fn is_eligible(iface: &ObservedInterface) -> bool {
    !iface.is_loopback
        && iface.broadcast_capable
        && !iface.enslaved
        && !iface.held_by_guest
        && !RESERVED_VIRTUAL_PREFIXES
            .iter()
            .any(|prefix| iface.name.starts_with(prefix))
}

/// Build the last-resort DPC: every eligible interface becomes a
/// DHCP-client, cost-0, management port, with `TimePriority = epoch` so it
/// always sorts behind any real candidate.
pub fn synthesize(interfaces: &[ObservedInterface]) -> Dpc {
    let ports = interfaces
        .iter()
        .filter(|iface| is_eligible(iface))
        .map(|iface| {
            let mut port = Port::new(&iface.name, 0, true);
            port.dhcp_mode = DhcpMode::Client;
            port
        })
        .collect();
    Dpc::new(DpcKey(LAST_RESORT_KEY.into()), epoch_priority(), ports)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, broadcast: bool, enslaved: bool, held_by_guest: bool) -> ObservedInterface {
        ObservedInterface {
            name: name.into(),
            is_loopback: false,
            broadcast_capable: broadcast,
            enslaved,
            held_by_guest,
        }
    }

    /// Spec §8 scenario 6.
    #[test]
    fn only_the_eligible_interface_is_selected() {
        let interfaces = vec![
            ObservedInterface {
                name: "lo".into(),
                is_loopback: true,
                broadcast_capable: false,
                enslaved: false,
                held_by_guest: false,
            },
            iface("eth0", true, false, false),
            iface("vif0", true, false, false),
            iface("keth1", true, false, false),
            iface("eth1", true, true, false),
        ];

        let dpc = synthesize(&interfaces);
        let names: Vec<&str> = dpc.ports.iter().map(|p| p.if_name.as_str()).collect();
        assert_eq!(names, vec!["eth0"]);
        assert_eq!(dpc.ports[0].cost, 0);
        assert!(dpc.ports[0].is_management);
        assert_eq!(dpc.ports[0].dhcp_mode, DhcpMode::Client);
    }

    #[test]
    fn held_by_guest_interface_is_excluded() {
        let interfaces = vec![iface("eth0", true, false, true)];
        assert!(synthesize(&interfaces).ports.is_empty());
    }
}
