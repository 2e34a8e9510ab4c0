pub mod dpc;
pub mod error;
pub mod events;
pub mod network;
pub mod ni;

pub use dpc::{
    epoch_priority, DhcpMode, Dpc, DpcKey, DpcState, L2Kind, LastIpAndDns, Port, ProxyConfig,
    TestResults, WirelessConfig, WirelessSsid,
};
pub use error::{SharedResult, SharedTypeError};
pub use events::{
    AppNetworkStatus, ChangeType, ConfigChange, DeviceNetworkStatus, DevicePortConfigListStatus,
    LedBlinkCount, NetworkInstanceStatus, SystemEvent,
};
pub use network::{
    AddressMethod, BondMode, Interface, InterfaceType, IpAddress, MacAddr, NetworkConfiguration,
};
pub use ni::{
    AclAction, AclMatch, AclProtocol, AclRule, AppNetworkConfig, DhcpRange, IpType,
    NetworkInstanceConfig, NiAndAppConfig, NiType, RateUnit,
};
