//! Persisted device and network-instance configuration.
//!
//! The atomic on-disk layout for the DPC list, controller-bypass
//! override files, and the generated wireless/wwan control files (spec
//! §4.B, §6 "Persisted state layout").

pub mod pmxcfs;

pub use pmxcfs::{PersistedStore, PidFile};
