//! The control loop described in the system overview: pick the
//! highest-priority testable DPC candidate, project it onto the
//! dependency graph, sync, probe it, update the store, and publish
//! status — repeating on a heartbeat tick.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info, warn};
use uuid::Uuid;

use nim_connectivity_tester::{ConnectivityTester, DeviceIdentity, DeviceSerials, HttpsControllerProbe, TesterConfig};
use nim_dep_graph::Graph;
use nim_dpc_manager::{DpcManager, DpcManagerConfig};
use nim_dpc_store::DpcStore;
use nim_event_bus::EventBus;
use nim_ni_acl::{reconcile_network_instance, AppIdAllocator, RealShellExec, ShellExec, UplinkBinding};
use nim_shared_types::dpc::DpcState;
use nim_shared_types::events::{DeviceNetworkStatus, DevicePortConfigListStatus, SystemEvent};
use nim_shared_types::ni::NiAndAppConfig;
use nim_network_config::pmxcfs::{PersistedStore, PidFile};

use crate::config::NimConfig;
use crate::interfaces::SysfsInterfaceObserver;

/// Everything the main loop needs for one run of the agent. Held for the
/// lifetime of the process; `_pid_file` is never read after construction,
/// its `Drop` impl is what releases the single-instance lock on exit.
pub struct NimAgent {
    config: NimConfig,
    graph: Graph,
    manager: DpcManager,
    tester: ConnectivityTester,
    event_bus: EventBus,
    persisted: PersistedStore,
    exec: Arc<dyn ShellExec>,
    observer: SysfsInterfaceObserver,
    app_ids: AppIdAllocator,
    ni_bridge_nums: HashMap<Uuid, u32>,
    next_bridge_num: u32,
    /// Item names the NI/ACL reconciler last put for each NI, so the next
    /// reconcile can `del_item` whatever dropped out (spec §4.E
    /// "Reconcile"; `reconcile_network_instance`'s own doc comment).
    ni_items: HashMap<Uuid, Vec<String>>,
    _pid_file: PidFile,
}

impl NimAgent {
    /// Fatal-error boundary (spec §7 "pid-file contention ... process
    /// exits"): acquires the single-instance pid file and loads persisted
    /// state, or fails outright.
    pub async fn start(config: NimConfig) -> Result<Self> {
        let pid_file = PidFile::acquire().await.context("acquiring pid file")?;

        let persisted = PersistedStore::new();
        let store = DpcStore::load(persisted.clone()).await.context("loading persisted DPC list")?;

        let mut store = store;
        *store.list_mut() = std::mem::take(store.list_mut()).with_min_time_since_failure(config.min_time_since_failure());

        let now = Utc::now();
        let manager = DpcManager::new(
            store,
            DpcManagerConfig { watchdog_timeout: config.watchdog_timeout() },
            now,
        );

        let mut graph = Graph::new();
        let exec: Arc<dyn ShellExec> = Arc::new(RealShellExec);
        nim_ni_acl::register_configurators(&mut graph, exec.clone(), persisted.clone());
        nim_dpc_apply::register_configurators(&mut graph, exec.clone());

        let serials = DeviceSerials {
            serial: config.device_serial.clone(),
            soft_serial: config.soft_serial.clone(),
        };
        let probe = HttpsControllerProbe::new(
            config.controller_url.clone(),
            &DeviceIdentity::None,
            serials,
            config.connectivity_timeout(),
        )
        .map_err(|e| anyhow::anyhow!("building controller probe: {e}"))?;
        let tester = ConnectivityTester::new(
            Arc::new(probe),
            TesterConfig {
                controller_url: config.controller_url.clone(),
                timeout: config.connectivity_timeout(),
                identity: DeviceIdentity::None,
                required_success_count: 1,
            },
        );

        Ok(Self {
            config,
            graph,
            manager,
            tester,
            event_bus: EventBus::new(),
            persisted,
            exec,
            observer: SysfsInterfaceObserver::new(),
            app_ids: AppIdAllocator::new(),
            ni_bridge_nums: HashMap::new(),
            next_bridge_num: 1,
            ni_items: HashMap::new(),
            _pid_file: pid_file,
        })
    }

    /// Stable NI UUID -> bridge number assignment: `bn<bridgeNum>` names
    /// must not change across ticks or every reconcile would look like a
    /// full bridge recreate (spec §3 "a stable Name").
    fn bridge_num_for(&mut self, ni_uuid: Uuid) -> u32 {
        if let Some(&n) = self.ni_bridge_nums.get(&ni_uuid) {
            return n;
        }
        let n = self.next_bridge_num;
        self.next_bridge_num += 1;
        self.ni_bridge_nums.insert(ni_uuid, n);
        n
    }

    /// Component E's NI/ACL half (spec §4.E): ingest the persisted
    /// `NetworkInstanceConfig`/`AppNetworkConfig` document, reconcile every
    /// NI and its VIFs onto the graph, and retire whatever NI/VIF dropped
    /// out of the document since the last tick.
    async fn reconcile_ni_and_app_config(&mut self) -> Result<()> {
        let config: NiAndAppConfig = self.persisted.read_ni_config().await.context("reading NI/app-network config")?;

        let mut vifs_by_ni: HashMap<Uuid, Vec<_>> = HashMap::new();
        for vif in config.app_networks {
            vifs_by_ni.entry(vif.ni_uuid).or_default().push(vif);
        }

        let uplink = self.current_uplink_binding();
        let seen: HashSet<Uuid> = config.network_instances.iter().map(|ni| ni.uuid).collect();

        for ni in &config.network_instances {
            let bridge_num = self.bridge_num_for(ni.uuid);
            let vifs = vifs_by_ni.remove(&ni.uuid).unwrap_or_default();
            match reconcile_network_instance(&mut self.graph, ni, bridge_num, uplink.as_ref(), &vifs, &mut self.app_ids) {
                Ok(names) => {
                    self.ni_items.insert(ni.uuid, names);
                }
                Err(e) => {
                    // Configuration error (spec §7): recorded and skipped,
                    // the rest of the configuration still reconciles.
                    warn!("NI {} failed to compile: {e}", ni.uuid);
                }
            }
        }

        for gone in self.ni_items.keys().copied().collect::<Vec<_>>() {
            if !seen.contains(&gone) {
                if let Some(names) = self.ni_items.remove(&gone) {
                    for name in names {
                        self.graph.del_item(name);
                    }
                }
                self.ni_bridge_nums.remove(&gone);
            }
        }

        Ok(())
    }

    /// The uplink the NI/ACL reconciler should NAT/bridge through: the
    /// cheapest management port of the currently active DPC (spec §4.E
    /// "an uplink-selection item ... consumed here as 'selected uplink
    /// logical label'"; the uplink prober itself is out of scope).
    fn current_uplink_binding(&self) -> Option<UplinkBinding> {
        let key = self.manager.current_key()?;
        let index = self.manager.store().list().index_of(&key)?;
        let dpc = self.manager.store().list().get(index)?;
        dpc.ports
            .iter()
            .filter(|p| p.is_management)
            .min_by_key(|p| p.cost)
            .map(|p| UplinkBinding { logical_label: p.logical_label.clone(), if_name: p.if_name.clone() })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Run one pass of the control flow (spec §2 "Control flow per
    /// cycle"). Returns once the pass has published whatever status
    /// changed; errors here are Operational/Transient, never Fatal, so
    /// the caller should log and keep ticking rather than exit.
    pub async fn tick(&mut self) -> Result<()> {
        let now = Utc::now();
        let interfaces = self.observer.observe();

        // Step 1: ingest new candidates (controller override files here;
        // the direct controller and AssignableAdapters subscriptions are
        // external collaborators this crate only consumes through the
        // DPC Store/Manager API, not reimplements).
        let ingested = self.manager.store_mut().ingest_override_files().await.context("ingesting override files")?;
        if ingested > 0 {
            info!("ingested {ingested} override DPC(s)");
            self.manager.on_new_candidate(now);
        }

        self.manager.resync_last_resort(&interfaces);
        if self.manager.check_watchdog(now, &interfaces).await.context("dpc watchdog")? {
            warn!("no DPC obtained within watchdog window, injected last-resort candidate");
        }

        if self.manager.current_key().is_none() {
            self.manager.select_highest_priority_testable(now);
        }

        // Step 2/3 (NI/ACL half of component E): reconcile per-NI
        // bridges/VIFs/ACLs onto the graph regardless of whether a DPC
        // candidate is currently testable (spec §4.E builds this from
        // NI/app configuration, not from DPC selection).
        if let Err(e) = self.reconcile_ni_and_app_config().await {
            warn!("NI/ACL reconcile failed: {e:#}");
        }

        let Some(key) = self.manager.current_key() else {
            debug!("no testable DPC candidate this tick");
            let report = self.graph.sync();
            if !report.failures.is_empty() {
                warn!("sync reported {} failure(s): {:?}", report.failures.len(), report.failures);
            }
            self.publish_dpc_list().await?;
            return Ok(());
        };

        let Some(index) = self.manager.store().list().index_of(&key) else {
            return Ok(());
        };
        let Some(dpc) = self.manager.store().list().get(index).cloned() else {
            return Ok(());
        };

        // Step 2/3 (DPC-port half of component E): project the candidate
        // onto the dependency graph and sync (component E hands off to
        // component A).
        nim_dpc_apply::project_dpc(&mut self.graph, &dpc);
        let report = self.graph.sync();
        if !report.failures.is_empty() {
            warn!("sync for {key} reported {} failure(s): {:?}", report.failures.len(), report.failures);
        }
        self.manager.on_reconciler_done(&key);

        // Step 4: verify reachability.
        let (per_port, _traces, err) = self.tester.test(&dpc, false).await;
        if let Some(err) = &err {
            debug!("connectivity test for {key} failed: {err}");
        }
        self.manager.on_probe_result(&key, &per_port, err.as_ref(), now);

        // Step 5: publish updated status.
        self.publish_device_status(&key).await?;
        self.publish_dpc_list().await?;

        Ok(())
    }

    async fn publish_device_status(&self, key: &nim_shared_types::dpc::DpcKey) -> Result<()> {
        let Some(index) = self.manager.store().list().index_of(key) else {
            return Ok(());
        };
        let Some(dpc) = self.manager.store().list().get(index) else {
            return Ok(());
        };

        let usable_address_count = dpc.ports.iter().filter(|p| p.has_ip()).count();
        let led = nim_dpc_manager::derive_blink_count(usable_address_count, dpc.state, false, dpc.state == DpcState::Success);

        let status = DeviceNetworkStatus {
            dpc_key: Some(key.clone()),
            state: dpc.state,
            usable_address_count,
            radio_silence: false,
            led_blink: led,
        };
        if let Err(e) = self.event_bus.publish(SystemEvent::DeviceNetworkStatusChanged { status }).await {
            warn!("publishing device network status: {e}");
        }
        Ok(())
    }

    async fn publish_dpc_list(&self) -> Result<()> {
        let list = self.manager.store().list();
        let status = DevicePortConfigListStatus {
            current_index: self.manager.current_key().and_then(|k| list.index_of(&k)),
            entries: list.iter().cloned().collect(),
        };
        if let Err(e) = self.event_bus.publish(SystemEvent::DevicePortConfigListChanged { status }).await {
            warn!("publishing DPC list status: {e}");
        }
        Ok(())
    }

    pub fn heartbeat(&self) -> std::time::Duration {
        self.config.heartbeat()
    }

    pub fn persisted(&self) -> &PersistedStore {
        &self.persisted
    }

    pub fn exec(&self) -> Arc<dyn ShellExec> {
        self.exec.clone()
    }
}
