//! Persistence for [`DpcList`] and ingestion of controller-bypass override
//! files (spec §4.B "Persisted across restarts", §6 "Persisted state
//! layout").

use anyhow::Result;
use nim_network_config::pmxcfs::PersistedStore;
use nim_shared_types::dpc::Dpc;

use crate::list::DpcList;

/// Owns a [`DpcList`] and the on-disk state it is persisted to. This is the
/// unit the DPC Manager (component C) holds: every mutation that should
/// survive a restart goes through here rather than directly on the list.
pub struct DpcStore {
    list: DpcList,
    persisted: PersistedStore,
}

impl DpcStore {
    pub fn new(persisted: PersistedStore) -> Self {
        Self {
            list: DpcList::new(),
            persisted,
        }
    }

    /// Load the persisted list, if one exists, restoring ordering and the
    /// current-index cursor (spec §4.B "on load, ordering and CurrentIndex
    /// are restored").
    pub async fn load(persisted: PersistedStore) -> Result<Self> {
        let list = persisted.read_dpc_list::<DpcList>().await?.unwrap_or_default();
        Ok(Self { list, persisted })
    }

    pub fn list(&self) -> &DpcList {
        &self.list
    }

    pub fn list_mut(&mut self) -> &mut DpcList {
        &mut self.list
    }

    async fn persist(&self) -> Result<()> {
        self.persisted.write_dpc_list(&self.list).await
    }

    /// Add `dpc` to the list and persist. If the DPC carries an
    /// `origin_file` annotation, the origin override file is deleted once
    /// the write succeeds (spec §4.B "Dedup and replacement").
    pub async fn add_and_persist(&mut self, dpc: Dpc) -> Result<bool> {
        let origin_file = dpc.origin_file.clone();
        let changed = self.list.add(dpc);
        if changed {
            self.persist().await?;
            if let Some(name) = origin_file {
                self.persisted.delete_override_file(&name).await?;
            }
        }
        Ok(changed)
    }

    pub async fn del_and_persist(&mut self, key: &nim_shared_types::dpc::DpcKey) -> Result<Option<Dpc>> {
        let removed = self.list.del(key);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    pub async fn set_test_result_and_persist(
        &mut self,
        index: usize,
        result: &nim_shared_types::dpc::TestResults,
    ) -> Result<bool> {
        let changed = self.list.set_test_result(index, result);
        if changed {
            self.persist().await?;
        }
        Ok(changed)
    }

    /// Poll the override directory and ingest any new controller-bypass
    /// DPCs, annotating each with its originating file name (spec §6
    /// "Override DPC files").
    pub async fn ingest_override_files(&mut self) -> Result<usize> {
        let found = self.persisted.poll_override_files::<Dpc>().await?;
        let mut ingested = 0;
        for (name, mut dpc) in found {
            dpc.origin_file = Some(name);
            if self.add_and_persist(dpc).await? {
                ingested += 1;
            }
        }
        Ok(ingested)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nim_shared_types::dpc::{DpcKey, Port};
    use tempfile::TempDir;

    fn dpc(key: &str) -> Dpc {
        Dpc::new(DpcKey(key.into()), Utc::now(), vec![Port::new("eth0", 0, true)])
    }

    #[tokio::test]
    async fn add_persists_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let persisted = PersistedStore::with_base_path(tmp.path());
        let mut store = DpcStore::new(persisted.clone());
        store.add_and_persist(dpc("a")).await.unwrap();

        let reloaded = DpcStore::load(persisted).await.unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list().get(0).unwrap().key.0, "a");
    }

    #[tokio::test]
    async fn ingesting_override_file_deletes_it_on_success() {
        let tmp = TempDir::new().unwrap();
        let persisted = PersistedStore::with_base_path(tmp.path());
        let override_dir = tmp.path().join("override");
        tokio::fs::create_dir_all(&override_dir).await.unwrap();
        tokio::fs::write(
            override_dir.join("ctrl.json"),
            serde_json::to_string(&dpc("from-override")).unwrap(),
        )
        .await
        .unwrap();

        let mut store = DpcStore::new(persisted);
        let n = store.ingest_override_files().await.unwrap();
        assert_eq!(n, 1);
        assert_eq!(store.list().len(), 1);
        assert!(!override_dir.join("ctrl.json").exists());
    }
}
