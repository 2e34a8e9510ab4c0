//! Per-port and whole-test result types (spec §4.D "Failure taxonomy").

use std::collections::BTreeMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a single port's probe failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortProbeError {
    #[error("port {port} has no DNS server configured")]
    DnsNotAvail { port: String },
    #[error("port {port} has no usable IP address")]
    IpAddrNotAvail { port: String },
    #[error("port {port}: {message}")]
    SendError { port: String, message: String },
    #[error("port {port}: controller reported a temporary failure")]
    RemoteTemporaryFailure { port: String },
}

impl PortProbeError {
    pub fn port(&self) -> &str {
        match self {
            Self::DnsNotAvail { port }
            | Self::IpAddrNotAvail { port }
            | Self::SendError { port, .. }
            | Self::RemoteTemporaryFailure { port } => port,
        }
    }

    fn is_not_ready(&self) -> bool {
        matches!(self, Self::DnsNotAvail { .. } | Self::IpAddrNotAvail { .. })
    }

    fn is_rtf(&self) -> bool {
        matches!(self, Self::RemoteTemporaryFailure { .. })
    }
}

/// Per-port outcome of one test pass, keyed by logical label.
pub type PerPortMap = BTreeMap<String, Result<(), PortProbeError>>;

/// Whole-test wrapper error (spec §4.D "Whole-test error wraps the
/// per-port map").
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TestError {
    /// Every port failed with `DnsNotAvail` or `IpAddrNotAvail` -- a hint to
    /// poll again shortly rather than fail the candidate.
    #[error("ports not ready: {}", ports.join(", "))]
    PortsNotReady { ports: Vec<String> },
    /// Every failing port reported the controller's documented "try later"
    /// signal. The DPC Manager keeps the current candidate on this error.
    #[error("controller reported a temporary failure")]
    RemoteTemporaryFailure,
    /// At least one hard failure occurred and fewer than
    /// `required_success_count` ports succeeded.
    #[error("connectivity test failed on {} port(s)", per_port.iter().filter(|(_, r)| r.is_err()).count())]
    Failed { per_port: PerPortMap },
}

/// Classify a per-port result map into the wrapper error, or `None` if
/// enough ports succeeded (spec §4.D: `requiredSuccessCount` fixed at 1).
pub fn classify(per_port: &PerPortMap, required_success_count: usize) -> Option<TestError> {
    let successes = per_port.values().filter(|r| r.is_ok()).count();
    if successes >= required_success_count {
        return None;
    }

    let failures: Vec<&PortProbeError> = per_port.values().filter_map(|r| r.as_ref().err()).collect();
    if failures.is_empty() {
        // No ports at all; nothing to report besides "not ready".
        return Some(TestError::PortsNotReady { ports: Vec::new() });
    }

    if failures.iter().all(|e| e.is_not_ready()) {
        return Some(TestError::PortsNotReady {
            ports: failures.iter().map(|e| e.port().to_string()).collect(),
        });
    }

    if failures.iter().all(|e| e.is_rtf()) {
        return Some(TestError::RemoteTemporaryFailure);
    }

    Some(TestError::Failed {
        per_port: per_port.clone(),
    })
}

/// One recorded step of a trace (spec §4.D "Tracing"): a DNS query,
/// connection attempt, TLS handshake, or header-only HTTP dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracedRequest {
    pub port: String,
    pub at: DateTime<Utc>,
    pub kind: TraceKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    DnsQuery,
    ConnectionAttempt,
    TlsHandshake,
    HttpHeaders,
    AuxiliaryProbe,
}

/// Device identity used to sign the probe body (spec §4.D step 1).
#[derive(Debug, Clone)]
pub enum DeviceIdentity {
    /// Path to the device certificate/key pair.
    Device(std::path::PathBuf),
    /// Path to the onboarding certificate, used when no device cert has
    /// been issued yet.
    Onboarding(std::path::PathBuf),
    /// No certificate available; probes are sent unsigned (pre-onboarding).
    None,
}

/// The device-identity values carried on every probe request (spec §6
/// "Probe wire format": "the device serial and soft-serial headers").
/// Distinct from [`DeviceIdentity`], which names the cert used for
/// transport/body authentication rather than the identity values sent
/// in the clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSerials {
    /// Hardware serial number, empty before the device has one (e.g.
    /// running on bare QEMU).
    pub serial: String,
    /// Software-derived fallback serial, used when no hardware serial
    /// is available.
    pub soft_serial: String,
}

/// Tunables for a [`crate::tester::ConnectivityTester`] (spec §5
/// "connectivity test timeout is a configurable value, default 15s").
#[derive(Debug, Clone)]
pub struct TesterConfig {
    pub controller_url: String,
    pub timeout: StdDuration,
    pub identity: DeviceIdentity,
    pub required_success_count: usize,
}

impl Default for TesterConfig {
    fn default() -> Self {
        Self {
            controller_url: String::new(),
            timeout: StdDuration::from_secs(15),
            identity: DeviceIdentity::None,
            required_success_count: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok() -> Result<(), PortProbeError> {
        Ok(())
    }

    #[test]
    fn all_not_ready_classifies_as_ports_not_ready() {
        let mut m = PerPortMap::new();
        m.insert(
            "eth0".into(),
            Err(PortProbeError::DnsNotAvail { port: "eth0".into() }),
        );
        m.insert(
            "wlan0".into(),
            Err(PortProbeError::IpAddrNotAvail { port: "wlan0".into() }),
        );
        assert_eq!(
            classify(&m, 1),
            Some(TestError::PortsNotReady {
                ports: vec!["eth0".into(), "wlan0".into()]
            })
        );
    }

    #[test]
    fn all_rtf_classifies_as_remote_temporary_failure() {
        let mut m = PerPortMap::new();
        m.insert(
            "eth0".into(),
            Err(PortProbeError::RemoteTemporaryFailure { port: "eth0".into() }),
        );
        assert_eq!(classify(&m, 1), Some(TestError::RemoteTemporaryFailure));
    }

    #[test]
    fn one_success_is_enough_by_default() {
        let mut m = PerPortMap::new();
        m.insert("eth0".into(), ok());
        m.insert(
            "wlan0".into(),
            Err(PortProbeError::SendError {
                port: "wlan0".into(),
                message: "refused".into(),
            }),
        );
        assert_eq!(classify(&m, 1), None);
    }

    #[test]
    fn mixed_hard_failure_and_not_ready_is_a_hard_failure() {
        let mut m = PerPortMap::new();
        m.insert(
            "eth0".into(),
            Err(PortProbeError::SendError {
                port: "eth0".into(),
                message: "refused".into(),
            }),
        );
        m.insert(
            "wlan0".into(),
            Err(PortProbeError::DnsNotAvail { port: "wlan0".into() }),
        );
        matches!(classify(&m, 1), Some(TestError::Failed { .. }));
    }
}
