//! DPC candidate selection, verification, and fallback (spec §4.C,
//! component C).

pub mod last_resort;
pub mod led;
pub mod manager;

pub use last_resort::{is_eligible, synthesize, ObservedInterface, LAST_RESORT_KEY};
pub use led::derive_blink_count;
pub use manager::{DpcManager, DpcManagerConfig};
