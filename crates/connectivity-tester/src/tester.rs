//! Orchestrates one connectivity test pass across a candidate's management
//! ports (spec §4.D "Algorithm").

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use nim_shared_types::dpc::Dpc;

use crate::prober::{ControllerProbe, ProbeOutcome};
use crate::types::{classify, PerPortMap, PortProbeError, TestError, TesterConfig, TraceKind, TracedRequest};

/// `Test(dns, withTrace) -> (perPortMap, tracedRequests, err)` (spec §4.D
/// contract). The candidate's management ports carry both the addressing
/// and DNS state the original contract's `dns` argument names; there is no
/// separate standalone DNS parameter to thread through.
pub struct ConnectivityTester {
    probe: Arc<dyn ControllerProbe>,
    config: TesterConfig,
}

impl ConnectivityTester {
    pub fn new(probe: Arc<dyn ControllerProbe>, config: TesterConfig) -> Self {
        Self { probe, config }
    }

    pub async fn test(&self, candidate: &Dpc, with_trace: bool) -> (PerPortMap, Vec<TracedRequest>, Option<TestError>) {
        let mut per_port = PerPortMap::new();
        let mut traces = Vec::new();

        for port in candidate.management_ports_by_cost() {
            let label = port.logical_label.clone();

            if !port.has_dns() {
                per_port.insert(label.clone(), Err(PortProbeError::DnsNotAvail { port: label }));
                continue;
            }
            if !port.has_ip() {
                per_port.insert(label.clone(), Err(PortProbeError::IpAddrNotAvail { port: label }));
                continue;
            }

            if with_trace {
                traces.push(TracedRequest {
                    port: label.clone(),
                    at: Utc::now(),
                    kind: TraceKind::ConnectionAttempt,
                    detail: format!("probing controller via {label}"),
                });
            }

            match self.probe.probe(port, self.config.timeout).await {
                Ok(ProbeOutcome::Success) => {
                    per_port.insert(label, Ok(()));
                }
                Ok(ProbeOutcome::RemoteTemporaryFailure) => {
                    per_port.insert(label.clone(), Err(PortProbeError::RemoteTemporaryFailure { port: label }));
                }
                Err(message) => {
                    per_port.insert(label.clone(), Err(PortProbeError::SendError { port: label, message }));
                }
            }
        }

        let err = classify(&per_port, self.config.required_success_count);

        // Auxiliary Internet-reachability trace, skipped when the failure
        // is RTF (the controller was clearly reachable) (spec §4.D
        // "Tracing").
        if with_trace {
            if let Some(e) = &err {
                if !matches!(e, TestError::RemoteTemporaryFailure) {
                    for port in candidate.management_ports_by_cost() {
                        traces.push(TracedRequest {
                            port: port.logical_label.clone(),
                            at: Utc::now(),
                            kind: TraceKind::AuxiliaryProbe,
                            detail: "auxiliary probe to www.google.com".into(),
                        });
                    }
                }
            }
        }

        (per_port, traces, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prober::MockControllerProbe;
    use nim_shared_types::dpc::{DhcpMode, DpcKey, Port};

    fn dhcp_port(name: &str, cost: u8) -> Port {
        let mut p = Port::new(name, cost, true);
        p.dhcp_mode = DhcpMode::Client;
        p
    }

    #[tokio::test]
    async fn succeeds_when_one_port_succeeds() {
        let mut mock = MockControllerProbe::new();
        mock.expect_probe().returning(|_, _| Ok(ProbeOutcome::Success));

        let tester = ConnectivityTester::new(Arc::new(mock), TesterConfig::default());
        let dpc = Dpc::new(DpcKey("c".into()), Utc::now(), vec![dhcp_port("eth0", 0)]);
        let (per_port, _traces, err) = tester.test(&dpc, false).await;
        assert!(per_port["eth0"].is_ok());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn port_without_ip_is_not_probed_and_reports_ip_addr_not_avail() {
        let mut mock = MockControllerProbe::new();
        mock.expect_probe().times(0);

        let tester = ConnectivityTester::new(Arc::new(mock), TesterConfig::default());
        let port = Port::new("eth0", 0, true); // DhcpMode::None => no IP
        let dpc = Dpc::new(DpcKey("c".into()), Utc::now(), vec![port]);
        let (per_port, _traces, err) = tester.test(&dpc, false).await;
        assert!(matches!(per_port["eth0"], Err(PortProbeError::IpAddrNotAvail { .. })));
        assert_eq!(err, Some(TestError::PortsNotReady { ports: vec!["eth0".into()] }));
    }

    #[tokio::test]
    async fn generic_send_error_on_one_port_and_success_on_cheaper_one_still_succeeds() {
        let mut mock = MockControllerProbe::new();
        mock.expect_probe().returning(|port: &Port, _| {
            if port.if_name == "eth0" {
                Ok(ProbeOutcome::Success)
            } else {
                Err("connection refused".to_string())
            }
        });

        let tester = ConnectivityTester::new(Arc::new(mock), TesterConfig::default());
        let dpc = Dpc::new(
            DpcKey("c".into()),
            Utc::now(),
            vec![dhcp_port("eth0", 0), dhcp_port("eth1", 1)],
        );
        let (per_port, _traces, err) = tester.test(&dpc, false).await;
        assert!(per_port["eth0"].is_ok());
        assert!(per_port["eth1"].is_err());
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn rtf_on_every_port_is_reported_as_remote_temporary_failure() {
        let mut mock = MockControllerProbe::new();
        mock.expect_probe().returning(|_, _| Ok(ProbeOutcome::RemoteTemporaryFailure));

        let tester = ConnectivityTester::new(Arc::new(mock), TesterConfig::default());
        let dpc = Dpc::new(DpcKey("c".into()), Utc::now(), vec![dhcp_port("eth0", 0)]);
        let (_per_port, _traces, err) = tester.test(&dpc, false).await;
        assert_eq!(err, Some(TestError::RemoteTemporaryFailure));
    }
}
