//! Controller reachability probing over management ports (spec §4.D,
//! component D).

pub mod prober;
pub mod tester;
pub mod types;

pub use prober::{ControllerProbe, HttpsControllerProbe, ProbeOutcome};
pub use tester::ConnectivityTester;
pub use types::{classify, DeviceIdentity, DeviceSerials, PerPortMap, PortProbeError, TestError, TesterConfig, TraceKind, TracedRequest};
