//! The DPC Manager state machine (spec §4.C).
//!
//! Owns the active candidate's lifecycle: picking it from the store,
//! reacting to reconciler completion and probe results, and falling back
//! or holding per the DPC Manager laws (spec §8).

use chrono::{DateTime, Duration, Utc};
use nim_connectivity_tester::{PerPortMap, TestError};
use nim_dpc_store::DpcStore;
use nim_shared_types::dpc::{DpcKey, DpcState, TestResults};

use crate::last_resort::{self, ObservedInterface};

/// Tunables for the manager (spec §4.C "default 60s" watchdog).
#[derive(Debug, Clone)]
pub struct DpcManagerConfig {
    pub watchdog_timeout: Duration,
}

impl Default for DpcManagerConfig {
    fn default() -> Self {
        Self {
            watchdog_timeout: Duration::seconds(60),
        }
    }
}

/// Drives exactly one active candidate at a time over the store.
pub struct DpcManager {
    store: DpcStore,
    config: DpcManagerConfig,
    started_at: DateTime<Utc>,
    last_success_key: Option<DpcKey>,
    last_resort_injected: bool,
}

impl DpcManager {
    pub fn new(store: DpcStore, config: DpcManagerConfig, now: DateTime<Utc>) -> Self {
        Self {
            store,
            config,
            started_at: now,
            last_success_key: None,
            last_resort_injected: false,
        }
    }

    pub fn store(&self) -> &DpcStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut DpcStore {
        &mut self.store
    }

    /// The candidate currently under attempt, i.e. the store's current
    /// cursor.
    pub fn current_key(&self) -> Option<DpcKey> {
        self.store.list().current().map(|d| d.key.clone())
    }

    /// "The candidate with highest TimePriority whose IsDPCTestable holds
    /// is selected whenever one exists" (spec §8 "DPC Manager laws").
    /// Moves the cursor there and returns it. Returns `None` if nothing is
    /// testable right now.
    pub fn select_highest_priority_testable(&mut self, now: DateTime<Utc>) -> Option<DpcKey> {
        let key = self.store.list().pick(now).map(|(_, d)| d.key.clone())?;
        self.store.list_mut().set_current(Some(key.clone()));
        Some(key)
    }

    /// A new DPC (controller, override-file, or last-resort) was ingested.
    /// If the manager is currently `Success` on a lower-priority candidate
    /// and a strictly higher-priority testable one just arrived, switch
    /// the cursor to attempt it (spec §4.C "Fallback", second sentence).
    /// Otherwise the cursor is left untouched.
    pub fn on_new_candidate(&mut self, now: DateTime<Utc>) {
        let Some(current_key) = self.current_key() else {
            self.select_highest_priority_testable(now);
            return;
        };
        let Some(current_idx) = self.store.list().index_of(&current_key) else {
            return;
        };
        let is_success = self
            .store
            .list()
            .get(current_idx)
            .map(|d| d.state == DpcState::Success)
            .unwrap_or(false);
        if !is_success {
            return;
        }
        if let Some((idx, dpc)) = self.store.list().pick(now) {
            if idx < current_idx {
                let key = dpc.key.clone();
                self.store.list_mut().set_current(Some(key));
            }
        }
    }

    /// The reconciler finished applying this candidate's intended graph;
    /// it is now ready to be probed.
    pub fn on_reconciler_done(&mut self, key: &DpcKey) {
        if let Some(idx) = self.store.list().index_of(key) {
            if let Some(dpc) = self.store.list_mut().get_mut(idx) {
                dpc.state = DpcState::AsyncWait;
            }
        }
    }

    /// A network-monitor event reported whether the candidate's named
    /// interface has appeared and whether it is held by a guest
    /// (assignable-adapters), driving the `IntfWait`/`PciWait` states.
    pub fn on_interface_event(&mut self, key: &DpcKey, interface_present: bool, held_by_guest: bool) {
        let Some(idx) = self.store.list().index_of(key) else {
            return;
        };
        let Some(dpc) = self.store.list_mut().get_mut(idx) else {
            return;
        };
        dpc.state = if held_by_guest {
            DpcState::PciWait
        } else if !interface_present {
            DpcState::IntfWait
        } else {
            DpcState::AsyncWait
        };
    }

    /// A probe pass against `key` completed. Updates per-whole-DPC test
    /// results and transitions state per spec §4.C/§8. Returns the key the
    /// manager should attempt next, if the cursor moved.
    pub fn on_probe_result(
        &mut self,
        key: &DpcKey,
        _per_port: &PerPortMap,
        err: Option<&TestError>,
        now: DateTime<Utc>,
    ) -> Option<DpcKey> {
        let Some(idx) = self.store.list().index_of(key) else {
            return None;
        };

        let mut result = TestResults::default();
        match err {
            None => result.record_success(now),
            Some(_) => result.record_failure(now, err.map(|e| e.to_string()).unwrap_or_default()),
        }
        self.store.list_mut().set_test_result(idx, &result);

        let new_state = match err {
            None => DpcState::Success,
            Some(TestError::PortsNotReady { .. }) => DpcState::IpDnsWait,
            Some(TestError::RemoteTemporaryFailure) => DpcState::RemoteWait,
            Some(TestError::Failed { .. }) => {
                let has_ip_and_dns = self
                    .store
                    .list()
                    .get(idx)
                    .map(|d| d.ports.iter().any(|p| p.has_ip() && p.has_dns()))
                    .unwrap_or(false);
                if has_ip_and_dns {
                    DpcState::FailWithIpAndDns
                } else {
                    DpcState::Fail
                }
            }
        };
        if let Some(dpc) = self.store.list_mut().get_mut(idx) {
            dpc.state = new_state;
        }

        match new_state {
            DpcState::Success => {
                self.last_success_key = Some(key.clone());
                self.store.list_mut().set_current(Some(key.clone()));
                None
            }
            // PortsNotReady ("the cursor does not advance within the retry
            // window") and RemoteTemporaryFailure ("is not demoted") both
            // hold the current candidate (spec §8 "DPC Manager laws").
            DpcState::IpDnsWait | DpcState::RemoteWait => None,
            _ => self.fall_back(now),
        }
    }

    /// Fallback after a hard failure (spec §4.C "Fallback"): prefer
    /// returning to the previously-successful candidate if it is still
    /// testable, else advance to the next highest-priority testable one.
    fn fall_back(&mut self, now: DateTime<Utc>) -> Option<DpcKey> {
        if let Some(last_ok) = self.last_success_key.clone() {
            if let Some(idx) = self.store.list().index_of(&last_ok) {
                if self.store.list().is_testable(idx, now) {
                    self.store.list_mut().set_current(Some(last_ok.clone()));
                    return Some(last_ok);
                }
            }
        }
        let next = self.store.list().pick(now).map(|(_, d)| d.key.clone());
        self.store.list_mut().set_current(next.clone());
        next
    }

    /// Periodic dpc-available watchdog (spec §4.C "(v)", default 60s): if
    /// no candidate has ever been obtained by the deadline, force a
    /// synthesized last-resort DPC into the store. Returns whether it was
    /// just injected.
    pub async fn check_watchdog(
        &mut self,
        now: DateTime<Utc>,
        interfaces: &[ObservedInterface],
    ) -> anyhow::Result<bool> {
        if self.last_resort_injected || !self.store.list().is_empty() {
            return Ok(false);
        }
        if now - self.started_at < self.config.watchdog_timeout {
            return Ok(false);
        }
        let dpc = last_resort::synthesize(interfaces);
        self.store.add_and_persist(dpc).await?;
        self.last_resort_injected = true;
        Ok(true)
    }

    /// Refresh the synthesized last-resort candidate's ports from the
    /// latest interface observations, while it remains in the store (spec
    /// §4.C "Kept in sync with interface events while enabled").
    pub fn resync_last_resort(&mut self, interfaces: &[ObservedInterface]) -> bool {
        if !self.last_resort_injected {
            return false;
        }
        let key = DpcKey(last_resort::LAST_RESORT_KEY.into());
        let ports = last_resort::synthesize(interfaces).ports;
        self.store.list_mut().replace_ports(&key, ports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use nim_shared_types::dpc::{Dpc, Port};
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn manager() -> (DpcManager, TempDir) {
        let tmp = TempDir::new().unwrap();
        let persisted = nim_network_config::pmxcfs::PersistedStore::with_base_path(tmp.path());
        let store = DpcStore::new(persisted);
        (DpcManager::new(store, DpcManagerConfig::default(), t(0)), tmp)
    }

    fn dpc(key: &str, priority: DateTime<Utc>) -> Dpc {
        Dpc::new(key.into(), priority, vec![{
            let mut p = Port::new("eth0", 0, true);
            p.dhcp_mode = nim_shared_types::dpc::DhcpMode::Client;
            p
        }])
    }

    /// Spec §8 scenario 5: two candidates, cheaper/newer one fails with a
    /// generic send error, the older one succeeds.
    #[tokio::test]
    async fn falls_back_from_failed_higher_priority_candidate_to_older_one() {
        let (mut mgr, _tmp) = manager().await;
        mgr.store_mut().add_and_persist(dpc("c2", t(100))).await.unwrap();
        mgr.store_mut().add_and_persist(dpc("c1", t(200))).await.unwrap();

        let picked = mgr.select_highest_priority_testable(t(300)).unwrap();
        assert_eq!(picked, "c1".into());

        let err = TestError::Failed { per_port: Default::default() };
        let next = mgr.on_probe_result(&"c1".into(), &Default::default(), Some(&err), t(300));
        assert_eq!(next, Some("c2".into()));

        let next = mgr.on_probe_result(&"c2".into(), &Default::default(), None, t(301));
        assert_eq!(next, None);
        assert_eq!(mgr.current_key(), Some("c2".into()));
        assert_eq!(mgr.store().list().get(mgr.store().list().index_of(&"c1".into()).unwrap()).unwrap().state, DpcState::Fail);
    }

    #[tokio::test]
    async fn ports_not_ready_does_not_advance_cursor() {
        let (mut mgr, _tmp) = manager().await;
        mgr.store_mut().add_and_persist(dpc("only", t(100))).await.unwrap();
        mgr.select_highest_priority_testable(t(200));

        let err = TestError::PortsNotReady { ports: vec!["eth0".into()] };
        let next = mgr.on_probe_result(&"only".into(), &Default::default(), Some(&err), t(200));
        assert_eq!(next, None);
        assert_eq!(mgr.current_key(), Some("only".into()));
    }

    #[tokio::test]
    async fn remote_temporary_failure_is_not_demoted() {
        let (mut mgr, _tmp) = manager().await;
        mgr.store_mut().add_and_persist(dpc("only", t(100))).await.unwrap();
        mgr.select_highest_priority_testable(t(200));

        let next = mgr.on_probe_result(&"only".into(), &Default::default(), Some(&TestError::RemoteTemporaryFailure), t(200));
        assert_eq!(next, None);
        let idx = mgr.store().list().index_of(&"only".into()).unwrap();
        assert_eq!(mgr.store().list().get(idx).unwrap().state, DpcState::RemoteWait);
    }

    #[tokio::test]
    async fn watchdog_forces_last_resort_after_timeout_with_empty_store() {
        let (mut mgr, _tmp) = manager().await;
        let interfaces = vec![last_resort::ObservedInterface {
            name: "eth0".into(),
            is_loopback: false,
            broadcast_capable: true,
            enslaved: false,
            held_by_guest: false,
        }];
        assert!(!mgr.check_watchdog(t(30), &interfaces).await.unwrap());
        assert!(mgr.check_watchdog(t(61), &interfaces).await.unwrap());
        assert_eq!(mgr.store().list().len(), 1);
    }
}
