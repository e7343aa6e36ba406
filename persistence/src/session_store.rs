//! Named local saves, kept in a generation-versioned store directory
//! Opening the store upgrades it to the current generation first.

use crate::compression::CompressionLevel;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::storage::CollectionStorage;
use crate::storage::StorageBackend;
use crate::types::SaveIndex;
use crate::types::SavedSessionRecord;
use crate::upgrade::StoreUpgrader;
use crate::upgrade::UpgradePlan;
use crate::upgrade::active_collection;
use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::info;
use tracing::warn;

/// Default store directory, `<data dir>/ic10emu/sessions`.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join("ic10emu/sessions"))
        .unwrap_or_else(|| PathBuf::from(".ic10emu/sessions"))
}

#[derive(Debug, Default)]
struct Collection {
    records: BTreeMap<String, SavedSessionRecord>,
    index: SaveIndex,
}

/// The local save store
///
/// Writes hold the collection lock until the file is replaced, so saves under
/// the same name never interleave.
pub struct LocalStore {
    storage: CollectionStorage,
    generation: u32,
    collection: &'static str,
    state: RwLock<Collection>,
}

impl LocalStore {
    /// Open (creating or upgrading as needed) the store at `base_path`
    pub async fn open(base_path: PathBuf, level: CompressionLevel) -> Result<Self> {
        let storage = CollectionStorage::new(base_path, level)?;

        let upgrader = StoreUpgrader::new(&storage);
        let plan = upgrader.check().await?;
        if plan != UpgradePlan::UpToDate {
            let report = upgrader.upgrade(plan).await?;
            info!(
                "Save store upgraded to generation {} ({} records migrated)",
                report.to_generation, report.records_migrated
            );
        }

        let meta = storage.read_meta().await?.ok_or_else(|| {
            PersistenceError::CorruptData("store catalog missing after upgrade".to_owned())
        })?;
        let collection = active_collection(meta.generation);

        let mut state = Collection::default();
        for value in storage.read_collection(collection).await? {
            match SavedSessionRecord::from_value(value) {
                Ok(record) => {
                    state.index.add_save(&record.name, record.date);
                    state.records.insert(record.name.clone(), record);
                }
                Err(e) => warn!("Skipping unreadable save in {}: {}", collection, e),
            }
        }
        info!(
            "Opened save store at {:?} with {} saves",
            storage.base_path(),
            state.records.len()
        );

        Ok(Self {
            storage,
            generation: meta.generation,
            collection,
            state: RwLock::new(state),
        })
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }

    pub fn base_path(&self) -> &Path {
        self.storage.base_path()
    }

    /// Store a record, replacing any save with the same name
    pub async fn put(&self, record: SavedSessionRecord) -> Result<()> {
        let record = record.into_current()?;
        let mut state = self.state.write().await;

        let mut records = state.records.clone();
        records.insert(record.name.clone(), record.clone());
        self.persist(&records).await?;

        state.index.add_save(&record.name, record.date);
        state.records = records;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<SavedSessionRecord> {
        self.state.read().await.records.get(name).cloned()
    }

    /// Remove a save; `false` when there was none by that name
    pub async fn delete(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if !state.records.contains_key(name) {
            return Ok(false);
        }

        let mut records = state.records.clone();
        records.remove(name);
        self.persist(&records).await?;

        state.index.remove_save(name);
        state.records = records;
        Ok(true)
    }

    /// Every save, most recent first
    pub async fn list_all(&self) -> Vec<SavedSessionRecord> {
        let state = self.state.read().await;
        state
            .index
            .newest_first()
            .filter_map(|name| state.records.get(name).cloned())
            .collect()
    }

    /// Saves whose name contains `query`, ignoring case
    pub async fn search(&self, query: &str) -> Vec<SavedSessionRecord> {
        let state = self.state.read().await;
        state
            .index
            .search(query)
            .into_iter()
            .filter_map(|name| state.records.get(name).cloned())
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, records: &BTreeMap<String, SavedSessionRecord>) -> Result<()> {
        let values = records
            .values()
            .map(SavedSessionRecord::to_value)
            .collect::<Result<Vec<_>>>()?;
        self.storage.write_collection(self.collection, &values).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::snapshot::AnySnapshot;
    use crate::snapshot::SchemaVersion;
    use crate::storage::StoreMeta;
    use crate::tests::sample_v1_record;
    use crate::upgrade::CURRENT_GENERATION;
    use crate::upgrade::SESSIONS_V1;
    use chrono::Duration;
    use chrono::Utc;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> LocalStore {
        LocalStore::open(dir.path().to_path_buf(), CompressionLevel::Fast)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        assert_eq!(store.generation(), CURRENT_GENERATION);
        assert!(store.is_empty().await);
        assert!(temp_dir.path().join("store.meta").exists());
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        store
            .put(SavedSessionRecord::new("Airlock", demo::demo_snapshot(), 1))
            .await
            .unwrap();
        let record = store.get("Airlock").await.unwrap();
        assert_eq!(record.session.active_ic, 1);
        assert!(store.get("Furnace").await.is_none());

        assert!(store.delete("Airlock").await.unwrap());
        assert!(!store.delete("Airlock").await.unwrap());
        assert!(store.get("Airlock").await.is_none());
    }

    #[tokio::test]
    async fn test_same_name_overwrites() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        let mut first = SavedSessionRecord::new("Furnace", demo::demo_snapshot(), 1);
        first.date = Utc::now() - Duration::minutes(10);
        store.put(first.clone()).await.unwrap();
        let second = SavedSessionRecord::new("Furnace", demo::demo_snapshot(), 2);
        store.put(second.clone()).await.unwrap();

        let all = store.list_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].date, second.date);
        assert!(all[0].date > first.date);
        assert_eq!(all[0].session.active_ic, 2);
    }

    #[tokio::test]
    async fn test_list_and_search() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let now = Utc::now();

        for (name, age) in [("Solar Tracker", 3), ("Greenhouse", 1), ("solar backup", 2)] {
            let mut record = SavedSessionRecord::new(name, demo::demo_snapshot(), 1);
            record.date = now - Duration::minutes(age);
            store.put(record).await.unwrap();
        }

        let names: Vec<_> = store.list_all().await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["Greenhouse", "solar backup", "Solar Tracker"]);

        let found: Vec<_> = store.search("Solar").await.into_iter().map(|r| r.name).collect();
        assert_eq!(found, vec!["Solar Tracker", "solar backup"]);
    }

    #[tokio::test]
    async fn test_saves_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        {
            let store = open(&temp_dir).await;
            store
                .put(SavedSessionRecord::new("Airlock", demo::demo_snapshot(), 1))
                .await
                .unwrap();
        }
        let store = open(&temp_dir).await;
        assert_eq!(store.len().await, 1);
        assert!(store.get("Airlock").await.is_some());
    }

    #[tokio::test]
    async fn test_put_migrates_old_records() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        store.put(sample_v1_record("Old")).await.unwrap();
        let record = store.get("Old").await.unwrap();
        assert_eq!(record.schema_version, SchemaVersion::V2);
        assert!(matches!(record.session.vm, AnySnapshot::V2(_)));
    }

    #[tokio::test]
    async fn test_open_upgrades_generation_one_directory() {
        let temp_dir = TempDir::new().unwrap();
        let storage =
            CollectionStorage::new(temp_dir.path().to_path_buf(), CompressionLevel::Fast).unwrap();
        let mut meta = StoreMeta {
            generation: 1,
            ..StoreMeta::default()
        };
        meta.collections
            .insert(SESSIONS_V1.to_owned(), Default::default());
        storage.write_meta(&meta).await.unwrap();
        storage
            .write_collection(
                SESSIONS_V1,
                &[
                    sample_v1_record("Airlock").to_value().unwrap(),
                    sample_v1_record("Furnace").to_value().unwrap(),
                ],
            )
            .await
            .unwrap();

        let store = open(&temp_dir).await;
        assert_eq!(store.generation(), 2);
        assert_eq!(store.len().await, 2);
        let record = store.get("Furnace").await.unwrap();
        let AnySnapshot::V2(vm) = record.session.vm else {
            panic!("record was not migrated");
        };
        assert_eq!(vm.circuit_holders, vec![1]);

        // reopening does not run the step again
        drop(store);
        let store = open(&temp_dir).await;
        assert_eq!(store.generation(), 2);
        assert_eq!(store.len().await, 2);
    }
}
