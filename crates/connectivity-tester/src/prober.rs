//! The collaborator that actually sends a probe on one port (spec §4.D,
//! §6 "Probe wire format").

use std::time::Duration;

use async_trait::async_trait;
use nim_shared_types::dpc::Port;

use crate::types::{DeviceIdentity, DeviceSerials, PortProbeError};

/// Outcome of a successful send: the controller answered, possibly with
/// the "remote temporary failure" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    RemoteTemporaryFailure,
}

/// Sends the controller "ping" on a single port and classifies the
/// response. Split out from [`crate::tester::ConnectivityTester`] so tests
/// can substitute a fake without touching the network.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait ControllerProbe: Send + Sync {
    async fn probe(&self, port: &Port, deadline: Duration) -> Result<ProbeOutcome, String>;
}

/// Header the controller sets on a 2xx/4xx/5xx response to signal
/// "try later" rather than a hard failure (spec §6).
pub const REMOTE_TEMPORARY_FAILURE_HEADER: &str = "X-Controller-Remote-Temporary-Failure";

/// Headers carrying the device-identity values every probe sends in the
/// clear (spec §6 "the device serial and soft-serial headers").
const DEVICE_SERIAL_HEADER: &str = "X-Device-Serial";
const DEVICE_SOFT_SERIAL_HEADER: &str = "X-Device-Soft-Serial";

/// Real HTTPS implementation: POSTs to `<controller>/api/v2/edgeDevice/ping`
/// with the device identity attached (spec §6 "Probe wire format"). Identity
/// is carried via mutual-TLS client auth; request-body signing through the
/// cipher/crypto collaborator is out of scope (see Non-goals).
pub struct HttpsControllerProbe {
    client: reqwest::Client,
    controller_url: String,
    serials: DeviceSerials,
}

impl HttpsControllerProbe {
    pub fn new(
        controller_url: impl Into<String>,
        identity: &DeviceIdentity,
        serials: DeviceSerials,
        timeout: Duration,
    ) -> Result<Self, String> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        builder = match identity {
            DeviceIdentity::Device(path) | DeviceIdentity::Onboarding(path) => {
                let bytes = std::fs::read(path).map_err(|e| format!("reading identity at {}: {e}", path.display()))?;
                let id = reqwest::Identity::from_pem(&bytes).map_err(|e| format!("parsing identity: {e}"))?;
                builder.identity(id)
            }
            DeviceIdentity::None => builder,
        };
        let client = builder.build().map_err(|e| format!("building HTTPS client: {e}"))?;
        Ok(Self {
            client,
            controller_url: controller_url.into(),
            serials,
        })
    }
}

#[async_trait]
impl ControllerProbe for HttpsControllerProbe {
    async fn probe(&self, _port: &Port, deadline: Duration) -> Result<ProbeOutcome, String> {
        let url = format!("{}/api/v2/edgeDevice/ping", self.controller_url);
        let response = tokio::time::timeout(
            deadline,
            self.client
                .post(&url)
                .header(DEVICE_SERIAL_HEADER, &self.serials.serial)
                .header(DEVICE_SOFT_SERIAL_HEADER, &self.serials.soft_serial)
                .send(),
        )
        .await
        .map_err(|_| "probe deadline exceeded".to_string())?
        .map_err(|e| e.to_string())?;

        if response.headers().contains_key(REMOTE_TEMPORARY_FAILURE_HEADER) {
            return Ok(ProbeOutcome::RemoteTemporaryFailure);
        }
        if response.status().is_success() {
            Ok(ProbeOutcome::Success)
        } else {
            Err(format!("controller returned {}", response.status()))
        }
    }
}
