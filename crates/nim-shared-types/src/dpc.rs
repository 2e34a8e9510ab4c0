//! Device-Port-Config data model (spec §3, §4.B).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::IpAddress;

/// Result of a probe, shared shape for both per-port and whole-DPC results.
///
/// `Update` merges timestamps so a success never erases a more recent
/// failure timestamp and vice versa -- this is what makes `HasError`
/// meaningful for the testable predicate in spec §4.B.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TestResults {
    pub last_failed: Option<DateTime<Utc>>,
    pub last_succeeded: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl TestResults {
    pub fn has_error(&self) -> bool {
        match (self.last_failed, self.last_succeeded) {
            (Some(failed), Some(succeeded)) => failed > succeeded,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn is_untested(&self) -> bool {
        self.last_failed.is_none() && self.last_succeeded.is_none()
    }

    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.last_succeeded = Some(at);
        self.last_error = None;
    }

    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.last_failed = Some(at);
        self.last_error = Some(error.into());
    }

    /// Merge `src` into `self`, keeping the newest of each timestamp
    /// independently so a late-arriving stale result cannot regress state.
    pub fn update(&mut self, src: &TestResults) {
        if let Some(t) = src.last_succeeded {
            if self.last_succeeded.map(|cur| t > cur).unwrap_or(true) {
                self.last_succeeded = Some(t);
            }
        }
        if let Some(t) = src.last_failed {
            if self.last_failed.map(|cur| t > cur).unwrap_or(true) {
                self.last_failed = Some(t);
                self.last_error = src.last_error.clone();
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum L2Kind {
    Plain,
    Vlan { parent: String, tag: u16 },
    Bond { slaves: Vec<String> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DhcpMode {
    #[default]
    None,
    Static,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Vec<String>,
    /// When set, a wpad.dat discovery URL is consulted by the connectivity
    /// tester's collaborator rather than a statically configured proxy.
    pub pac_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WirelessSsid {
    pub ssid: String,
    pub key_mgmt: String,
    pub eap: Option<String>,
    pub identity: Option<String>,
    /// Cipher-text as delivered by the controller; decrypted by the cipher
    /// collaborator (out of scope) before being interpolated into
    /// wpa_supplicant.conf.
    pub encrypted_password: Option<String>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct WirelessConfig {
    pub ssids: Vec<WirelessSsid>,
}

/// A single candidate port inside a DPC (spec §3 "Port").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Port {
    pub if_name: String,
    pub phy_label: String,
    pub logical_label: String,
    pub cost: u8,
    pub is_management: bool,
    pub l2_kind: L2Kind,
    pub dhcp_mode: DhcpMode,
    pub static_addresses: Vec<IpAddress>,
    pub static_gateway: Option<IpAddress>,
    pub dns_servers: Vec<IpAddress>,
    pub proxy: Option<ProxyConfig>,
    pub wireless: Option<WirelessConfig>,
}

impl Port {
    pub fn new(if_name: impl Into<String>, cost: u8, is_management: bool) -> Self {
        let if_name = if_name.into();
        Self {
            phy_label: if_name.clone(),
            logical_label: if_name.clone(),
            if_name,
            cost,
            is_management,
            l2_kind: L2Kind::Plain,
            dhcp_mode: DhcpMode::None,
            static_addresses: Vec::new(),
            static_gateway: None,
            dns_servers: Vec::new(),
            proxy: None,
            wireless: None,
        }
    }

    pub fn has_ip(&self) -> bool {
        match self.dhcp_mode {
            DhcpMode::Static => !self.static_addresses.is_empty(),
            DhcpMode::Client => true, // resolved at runtime by the network monitor
            DhcpMode::None => false,
        }
    }

    pub fn has_dns(&self) -> bool {
        !self.dns_servers.is_empty() || matches!(self.dhcp_mode, DhcpMode::Client)
    }
}

/// Uniquely identifies a DPC independent of its contents (spec §4.B dedup).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DpcKey(pub String);

impl std::fmt::Display for DpcKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DpcKey {
    fn from(s: &str) -> Self {
        DpcKey(s.to_string())
    }
}

impl From<String> for DpcKey {
    fn from(s: String) -> Self {
        DpcKey(s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DpcState {
    None,
    IntfWait,
    PciWait,
    IpDnsWait,
    AsyncWait,
    RemoteWait,
    FailWithIpAndDns,
    Fail,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct LastIpAndDns {
    pub per_port: HashMap<String, (bool, bool)>,
}

/// A candidate Device Port Config (spec §3 "DPC").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dpc {
    pub key: DpcKey,
    pub time_priority: DateTime<Utc>,
    pub state: DpcState,
    pub ports: Vec<Port>,
    pub test_results: TestResults,
    pub last_ip_and_dns: LastIpAndDns,
    /// Set when this DPC was read from an override file; the file is
    /// deleted once the DPC has been durably persisted into the list.
    pub origin_file: Option<String>,
}

impl Dpc {
    pub fn new(key: DpcKey, time_priority: DateTime<Utc>, ports: Vec<Port>) -> Self {
        Self {
            key,
            time_priority,
            state: DpcState::None,
            ports,
            test_results: TestResults::default(),
            last_ip_and_dns: LastIpAndDns::default(),
            origin_file: None,
        }
    }

    pub fn management_ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.iter().filter(|p| p.is_management)
    }

    /// Cheapest-first management ports, per spec §4.D step 3.
    pub fn management_ports_by_cost(&self) -> Vec<&Port> {
        let mut ports: Vec<&Port> = self.management_ports().collect();
        ports.sort_by_key(|p| p.cost);
        ports
    }
}

/// Epoch time-priority used to sort last-resort DPCs behind everything else.
pub fn epoch_priority() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is a valid timestamp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn has_error_when_failed_after_succeeded() {
        let now = Utc::now();
        let mut tr = TestResults::default();
        tr.record_success(now - Duration::minutes(10));
        tr.record_failure(now, "boom");
        assert!(tr.has_error());
    }

    #[test]
    fn update_never_regresses_a_newer_timestamp() {
        let now = Utc::now();
        let mut tr = TestResults::default();
        tr.record_success(now);
        let stale = TestResults {
            last_failed: Some(now - Duration::hours(1)),
            last_succeeded: None,
            last_error: Some("stale".into()),
        };
        tr.update(&stale);
        assert!(!tr.has_error());
    }

    #[test]
    fn untested_when_both_timestamps_absent() {
        assert!(TestResults::default().is_untested());
    }
}
