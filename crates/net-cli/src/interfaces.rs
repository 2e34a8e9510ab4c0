//! Minimal physical-interface observation for last-resort DPC synthesis
//! and the `IntfWait`/`PciWait` transitions (spec §4.C).
//!
//! The full network monitor (raw netlink event stream, assignable-adapters
//! tracking) is an external collaborator out of this spec's scope; this
//! reads just the handful of `/sys/class/net` attributes
//! [`nim_dpc_manager::ObservedInterface`] needs, polled once per tick
//! rather than subscribed to as a push feed.

use std::path::Path;

use nim_dpc_manager::ObservedInterface;

const SYSFS_NET: &str = "/sys/class/net";

/// Reads `/sys/class/net/*` and reports each interface found there. Guest
/// assignment (`held_by_guest`) is out of scope for this observer (that
/// comes from the AssignableAdapters subscription, a separate external
/// collaborator) and is always reported `false` here.
pub struct SysfsInterfaceObserver {
    root: std::path::PathBuf,
}

impl Default for SysfsInterfaceObserver {
    fn default() -> Self {
        Self { root: Path::new(SYSFS_NET).to_path_buf() }
    }
}

impl SysfsInterfaceObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn observe(&self) -> Vec<ObservedInterface> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        let mut interfaces = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let if_dir = entry.path();

            let is_loopback = read_flag(&if_dir, "flags").map(|f| f & 0x8 != 0).unwrap_or(name == "lo");
            let broadcast_capable = read_flag(&if_dir, "flags").map(|f| f & 0x2 != 0).unwrap_or(true);
            let enslaved = if_dir.join("master").symlink_metadata().is_ok();

            interfaces.push(ObservedInterface {
                name,
                is_loopback,
                broadcast_capable,
                enslaved,
                held_by_guest: false,
            });
        }
        interfaces
    }
}

fn read_flag(if_dir: &Path, attr: &str) -> Option<u64> {
    let raw = std::fs::read_to_string(if_dir.join(attr)).ok()?;
    let raw = raw.trim().trim_start_matches("0x");
    u64::from_str_radix(raw, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_iface(root: &Path, name: &str, flags: &str, enslaved: bool) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        let mut f = std::fs::File::create(dir.join("flags")).unwrap();
        write!(f, "{flags}").unwrap();
        if enslaved {
            std::fs::write(dir.join("master"), b"").unwrap();
        }
    }

    #[test]
    fn reads_loopback_and_broadcast_flags_from_sysfs() {
        let tmp = tempfile::TempDir::new().unwrap();
        // IFF_UP(0x1) | IFF_BROADCAST(0x2) | IFF_RUNNING(0x40)
        write_iface(tmp.path(), "eth0", "0x43", false);
        // IFF_UP | IFF_LOOPBACK(0x8) | IFF_RUNNING
        write_iface(tmp.path(), "lo", "0x49", false);

        let observer = SysfsInterfaceObserver::at(tmp.path());
        let mut observed = observer.observe();
        observed.sort_by(|a, b| a.name.cmp(&b.name));

        let eth0 = observed.iter().find(|i| i.name == "eth0").unwrap();
        assert!(!eth0.is_loopback);
        assert!(eth0.broadcast_capable);

        let lo = observed.iter().find(|i| i.name == "lo").unwrap();
        assert!(lo.is_loopback);
    }

    #[test]
    fn enslaved_interface_is_reported_as_such() {
        let tmp = tempfile::TempDir::new().unwrap();
        write_iface(tmp.path(), "eth1", "0x43", true);
        let observed = SysfsInterfaceObserver::at(tmp.path()).observe();
        assert!(observed.iter().find(|i| i.name == "eth1").unwrap().enslaved);
    }
}
