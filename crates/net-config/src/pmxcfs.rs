//! Persisted on-disk state for a single edge node.
//!
//! This device has no cluster: there is exactly one NIM agent per node, so
//! the only concurrency concern is against *itself* (a previous instance
//! that failed to exit). [`PidFile`] enforces that single-instance
//! invariant; everything else here is plain atomic file I/O for the
//! persisted DPC list, controller override files, and the generated
//! `wpa_supplicant.conf` / wwan control files.

use anyhow::{bail, Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Directory holding the persisted `DevicePortConfigList`.
pub const DPC_LIST_DIR: &str = "/persist/status/nim/DevicePortConfigList";
/// File name of the persisted DPC list within [`DPC_LIST_DIR`].
pub const DPC_LIST_FILE: &str = "current.json";
/// Directory polled for controller-bypass override DPC files.
pub const OVERRIDE_DIR: &str = "/var/run/nim/override";
/// Generated wpa_supplicant configuration consumed by the wifi driver.
pub const WPA_SUPPLICANT_PATH: &str = "/run/wpa_supplicant/wpa_supplicant.conf";
/// wwan control file exchanged with the modem daemon.
pub const WWAN_CONFIG_PATH: &str = "/run/wwan/config.json";
pub const WWAN_STATUS_PATH: &str = "/run/wwan/status.json";
pub const WWAN_METRICS_PATH: &str = "/run/wwan/metrics.json";
pub const WWAN_LOCATION_PATH: &str = "/run/wwan/location.json";
/// Default pid file path; startup aborts if this is already held.
pub const PID_FILE_PATH: &str = "/var/run/nim.pid";

/// Guards single-instance execution. Dropped (and the file removed) on
/// normal process exit; a stale file left behind by a crash is detected by
/// checking whether its recorded pid is still alive and replaced.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the pid file at the default path, failing if another live
    /// instance already holds it. This is a Fatal condition: the caller
    /// should abort startup rather than retry.
    pub async fn acquire() -> Result<Self> {
        Self::acquire_at(PID_FILE_PATH).await
    }

    pub async fn acquire_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create pid file directory")?;
        }

        if path.exists() {
            if let Ok(existing) = fs::read_to_string(&path).await {
                if let Ok(pid) = existing.trim().parse::<u32>() {
                    if Self::process_alive(pid) {
                        bail!("nim is already running (pid {})", pid);
                    }
                }
            }
            // Stale pid file from a previous crash; safe to reclaim.
            let _ = fs::remove_file(&path).await;
        }

        fs::write(&path, std::process::id().to_string())
            .await
            .context("failed to write pid file")?;

        Ok(Self { path })
    }

    fn process_alive(pid: u32) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let path = self.path.clone();
        // best-effort: process is exiting, nothing to do if this fails
        let _ = std::fs::remove_file(path);
    }
}

/// Persisted-state store for the DPC list, override files, and generated
/// wireless/wwan configuration. All writes go through write-tmp + fsync +
/// rename so a crash mid-write never leaves a half-written file behind.
#[derive(Debug, Clone)]
pub struct PersistedStore {
    dpc_list_dir: PathBuf,
    override_dir: PathBuf,
    ni_config_path: PathBuf,
    ni_dhcp_dir: PathBuf,
    ni_dns_dir: PathBuf,
    wpa_supplicant_path: PathBuf,
    wwan_config_path: PathBuf,
    wwan_status_path: PathBuf,
    wwan_metrics_path: PathBuf,
    wwan_location_path: PathBuf,
}

impl PersistedStore {
    pub fn new() -> Self {
        Self {
            dpc_list_dir: PathBuf::from(DPC_LIST_DIR),
            override_dir: PathBuf::from(OVERRIDE_DIR),
            ni_config_path: PathBuf::from("/persist/status/nim/NetworkInstanceConfig.json"),
            ni_dhcp_dir: PathBuf::from("/run/nim/dhcp"),
            ni_dns_dir: PathBuf::from("/run/nim/dns"),
            wpa_supplicant_path: PathBuf::from(WPA_SUPPLICANT_PATH),
            wwan_config_path: PathBuf::from(WWAN_CONFIG_PATH),
            wwan_status_path: PathBuf::from(WWAN_STATUS_PATH),
            wwan_metrics_path: PathBuf::from(WWAN_METRICS_PATH),
            wwan_location_path: PathBuf::from(WWAN_LOCATION_PATH),
        }
    }

    /// Store rooted at `base`, for tests: `<base>/DevicePortConfigList`,
    /// `<base>/override`, `<base>/wpa_supplicant.conf`, `<base>/wwan/*`.
    pub fn with_base_path<P: AsRef<Path>>(base: P) -> Self {
        let base = base.as_ref();
        Self {
            dpc_list_dir: base.join("DevicePortConfigList"),
            override_dir: base.join("override"),
            ni_config_path: base.join("NetworkInstanceConfig.json"),
            ni_dhcp_dir: base.join("dhcp"),
            ni_dns_dir: base.join("dns"),
            wpa_supplicant_path: base.join("wpa_supplicant.conf"),
            wwan_config_path: base.join("wwan").join("config.json"),
            wwan_status_path: base.join("wwan").join("status.json"),
            wwan_metrics_path: base.join("wwan").join("metrics.json"),
            wwan_location_path: base.join("wwan").join("location.json"),
        }
    }

    /// Store rooted under `/tmp`, for demos and trait default impls that
    /// need a placeholder with no real persisted state behind it.
    pub fn mock() -> Self {
        Self::with_base_path("/tmp/nim-integration-test")
    }

    async fn write_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("failed to create parent directory")?;
        }

        let tmp_path = path.with_extension(format!(
            "{}.tmp.{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("json"),
            std::process::id()
        ));

        let mut file = fs::File::create(&tmp_path)
            .await
            .context("failed to create temp file")?;
        tokio::io::AsyncWriteExt::write_all(&mut file, content.as_bytes())
            .await
            .context("failed to write temp file")?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        file.sync_all().await.context("failed to fsync temp file")?;
        drop(file);

        fs::rename(&tmp_path, path)
            .await
            .context("failed to rename temp file into place")?;

        Ok(())
    }

    /// Persist the DPC list, replacing whatever document is currently on
    /// disk. Superseding a Key is the caller's responsibility; this call
    /// only performs the atomic write.
    pub async fn write_dpc_list<T: Serialize>(&self, list: &T) -> Result<()> {
        let path = self.dpc_list_dir.join(DPC_LIST_FILE);
        let content = serde_json::to_string_pretty(list)?;
        Self::write_atomic(&path, &content).await
    }

    /// Read the persisted DPC list, if one exists yet (absent on a
    /// first-ever boot before any configuration has arrived).
    pub async fn read_dpc_list<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let path = self.dpc_list_dir.join(DPC_LIST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .await
            .context("failed to read DPC list")?;
        Ok(Some(
            serde_json::from_str(&content).context("failed to parse DPC list")?,
        ))
    }

    /// List pending override files by name, each parsed once. The caller
    /// ingests the contained DPC into the list and then calls
    /// [`PersistedStore::delete_override_file`]; on any ingestion failure
    /// the file is left in place and retried on the next poll.
    pub async fn poll_override_files<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>> {
        if !self.override_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.override_dir)
            .await
            .context("failed to read override directory")?;

        let mut found = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let content = fs::read_to_string(entry.path())
                .await
                .with_context(|| format!("failed to read override file {name}"))?;
            match serde_json::from_str(&content) {
                Ok(parsed) => found.push((name, parsed)),
                Err(e) => log::warn!("ignoring malformed override file {name}: {e}"),
            }
        }
        Ok(found)
    }

    /// Delete an override file by name after it has been successfully
    /// ingested into the DPC list.
    pub async fn delete_override_file(&self, name: &str) -> Result<()> {
        let path = self.override_dir.join(name);
        fs::remove_file(&path)
            .await
            .with_context(|| format!("failed to delete override file {name}"))
    }

    /// Persist the combined Network-Instance/App-Network configuration
    /// document (spec §6 "Subscriptions consumed"), replacing whatever
    /// document is currently on disk.
    pub async fn write_ni_config<T: Serialize>(&self, config: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        Self::write_atomic(&self.ni_config_path, &content).await
    }

    /// Read the persisted Network-Instance/App-Network configuration
    /// document, defaulting to an empty one on first-ever boot.
    pub async fn read_ni_config<T: DeserializeOwned + Default>(&self) -> Result<T> {
        if !self.ni_config_path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(&self.ni_config_path)
            .await
            .context("failed to read network-instance configuration")?;
        serde_json::from_str(&content).context("failed to parse network-instance configuration")
    }

    /// Write a Local NI's generated DHCP-server config, keyed by bridge
    /// name (spec §4.E "a DHCP-server config file"). Synchronous: the
    /// NI/ACL reconciler's Configurators run outside the tokio runtime
    /// (spec §4.A "Configurator calls are synchronous").
    pub fn write_ni_dhcp_config_sync(&self, bridge_name: &str, content: &str) -> Result<()> {
        let path = self.ni_dhcp_dir.join(format!("{bridge_name}.conf"));
        Self::write_atomic_sync(&path, content)
    }

    /// Remove a Local NI's DHCP-server config when the NI is torn down.
    pub fn delete_ni_dhcp_config_sync(&self, bridge_name: &str) -> Result<()> {
        let path = self.ni_dhcp_dir.join(format!("{bridge_name}.conf"));
        Self::remove_file_sync(&path)
    }

    /// Write a Local NI's generated DNS-forwarder config, keyed by bridge
    /// name (spec §4.E "a DNS-forwarder config file").
    pub fn write_ni_dns_config_sync(&self, bridge_name: &str, content: &str) -> Result<()> {
        let path = self.ni_dns_dir.join(format!("{bridge_name}.conf"));
        Self::write_atomic_sync(&path, content)
    }

    /// Remove a Local NI's DNS-forwarder config when the NI is torn down.
    pub fn delete_ni_dns_config_sync(&self, bridge_name: &str) -> Result<()> {
        let path = self.ni_dns_dir.join(format!("{bridge_name}.conf"));
        Self::remove_file_sync(&path)
    }

    fn write_atomic_sync(path: &Path, content: &str) -> Result<()> {
        use std::io::Write;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create parent directory")?;
        }

        let tmp_path = path.with_extension(format!(
            "{}.tmp.{}",
            path.extension().and_then(|e| e.to_str()).unwrap_or("conf"),
            std::process::id()
        ));

        let mut file = std::fs::File::create(&tmp_path).context("failed to create temp file")?;
        file.write_all(content.as_bytes()).context("failed to write temp file")?;
        file.sync_all().context("failed to fsync temp file")?;
        drop(file);

        std::fs::rename(&tmp_path, path).context("failed to rename temp file into place")?;
        Ok(())
    }

    fn remove_file_sync(path: &Path) -> Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("failed to delete {}", path.display())),
        }
    }

    /// Write the generated wpa_supplicant configuration.
    pub async fn write_wpa_supplicant_conf(&self, content: &str) -> Result<()> {
        Self::write_atomic(&self.wpa_supplicant_path, content).await
    }

    /// Write the wwan control file consumed by the modem daemon.
    pub async fn write_wwan_config<T: Serialize>(&self, config: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        Self::write_atomic(&self.wwan_config_path, &content).await
    }

    /// Read back wwan status, as last written by the modem daemon.
    pub async fn read_wwan_status<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Self::read_optional(&self.wwan_status_path).await
    }

    /// Read back wwan metrics, as last written by the modem daemon.
    pub async fn read_wwan_metrics<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Self::read_optional(&self.wwan_metrics_path).await
    }

    /// Read back wwan location, as last written by the modem daemon.
    pub async fn read_wwan_location<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Self::read_optional(&self.wwan_location_path).await
    }

    async fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl Default for PersistedStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        key: String,
        priority: u64,
    }

    #[tokio::test]
    async fn test_pid_file_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nim.pid");

        let pid = PidFile::acquire_at(&path).await.unwrap();
        assert!(path.exists());
        drop(pid);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_pid_file_rejects_live_holder() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nim.pid");

        let _pid = PidFile::acquire_at(&path).await.unwrap();
        let second = PidFile::acquire_at(&path).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn test_pid_file_reclaims_stale_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nim.pid");

        tokio::fs::write(&path, "999999999").await.unwrap();
        let pid = PidFile::acquire_at(&path).await;
        assert!(pid.is_ok());
    }

    #[tokio::test]
    async fn test_dpc_list_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistedStore::with_base_path(temp_dir.path());

        assert!(store.read_dpc_list::<Sample>().await.unwrap().is_none());

        let sample = Sample {
            key: "eth0".to_string(),
            priority: 42,
        };
        store.write_dpc_list(&sample).await.unwrap();

        let read_back: Sample = store.read_dpc_list().await.unwrap().unwrap();
        assert_eq!(read_back, sample);
    }

    #[tokio::test]
    async fn test_override_file_ingestion_and_deletion() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistedStore::with_base_path(temp_dir.path());

        let override_dir = temp_dir.path().join("override");
        tokio::fs::create_dir_all(&override_dir).await.unwrap();
        let sample = Sample {
            key: "override-dpc".to_string(),
            priority: 7,
        };
        tokio::fs::write(
            override_dir.join("dpc.json"),
            serde_json::to_string(&sample).unwrap(),
        )
        .await
        .unwrap();

        let found: Vec<(String, Sample)> = store.poll_override_files().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "dpc.json");
        assert_eq!(found[0].1, sample);

        store.delete_override_file("dpc.json").await.unwrap();
        assert!(store
            .poll_override_files::<Sample>()
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_wpa_supplicant_conf_write() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistedStore::with_base_path(temp_dir.path());

        store
            .write_wpa_supplicant_conf("network={\n  ssid=\"test\"\n}\n")
            .await
            .unwrap();

        let content = tokio::fs::read_to_string(temp_dir.path().join("wpa_supplicant.conf"))
            .await
            .unwrap();
        assert!(content.contains("ssid=\"test\""));
    }

    #[tokio::test]
    async fn test_wwan_config_and_status_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = PersistedStore::with_base_path(temp_dir.path());

        let config = Sample {
            key: "wwan0".to_string(),
            priority: 1,
        };
        store.write_wwan_config(&config).await.unwrap();

        assert!(store.read_wwan_status::<Sample>().await.unwrap().is_none());

        tokio::fs::write(
            temp_dir.path().join("wwan").join("status.json"),
            serde_json::to_string(&config).unwrap(),
        )
        .await
        .unwrap();

        let status: Sample = store.read_wwan_status().await.unwrap().unwrap();
        assert_eq!(status, config);
    }
}
