//! Schema generation upgrades for the local save store
//!
//! Each generation step runs once, in order, and commits by rewriting
//! `store.meta` last. A step that fails leaves the catalog at the last
//! generation that committed.

use crate::error::PersistenceError;
use crate::error::Result;
use crate::snapshot::SchemaVersion;
use crate::storage::CollectionMeta;
use crate::storage::StorageBackend;
use crate::storage::StoreMeta;
use crate::types::SavedSessionRecord;
use tracing::info;
use tracing::warn;

/// Generation this build of the store expects.
pub const CURRENT_GENERATION: u32 = 2;

/// Collection holding generation-1 saves (V1 snapshots).
pub const SESSIONS_V1: &str = "sessions";
/// Collection holding generation-2 saves (V2 snapshots).
pub const SESSIONS_V2: &str = "sessions-v2";

pub const BY_DATE_INDEX: &str = "by-date";
pub const BY_NAME_INDEX: &str = "by-name";

/// The collection saves are read from and written to at a generation.
pub const fn active_collection(generation: u32) -> &'static str {
    if generation >= 2 { SESSIONS_V2 } else { SESSIONS_V1 }
}

/// Upgrade plan describing what needs to be done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradePlan {
    UpToDate,
    Steps { from: u32, to: u32 },
}

/// Report of upgrade results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    pub from_generation: u32,
    pub to_generation: u32,
    pub steps_applied: Vec<u32>,
    pub records_migrated: usize,
}

/// Walks a store from its stored generation to [`CURRENT_GENERATION`]
pub struct StoreUpgrader<'a, B: StorageBackend> {
    backend: &'a B,
}

impl<'a, B: StorageBackend> StoreUpgrader<'a, B> {
    pub const fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Check whether the store needs upgrading
    pub async fn check(&self) -> Result<UpgradePlan> {
        let generation = self.stored_generation().await?;
        if generation > CURRENT_GENERATION {
            return Err(PersistenceError::UnsupportedVersion(
                u16::try_from(generation).unwrap_or(u16::MAX),
                CURRENT_GENERATION as u16,
            ));
        }
        if generation == CURRENT_GENERATION {
            return Ok(UpgradePlan::UpToDate);
        }
        Ok(UpgradePlan::Steps {
            from: generation,
            to: CURRENT_GENERATION,
        })
    }

    /// Run every step of `plan`, never skipping a generation
    pub async fn upgrade(&self, plan: UpgradePlan) -> Result<UpgradeReport> {
        let mut meta = self.backend.read_meta().await?.unwrap_or_default();
        let mut report = UpgradeReport {
            from_generation: meta.generation,
            to_generation: meta.generation,
            ..UpgradeReport::default()
        };
        let UpgradePlan::Steps { from, to } = plan else {
            return Ok(report);
        };

        info!("Upgrading save store from generation {} to {}", from, to);
        for generation in (from + 1)..=to {
            match self.apply_step(&mut meta, generation).await {
                Ok(migrated) => {
                    report.steps_applied.push(generation);
                    report.records_migrated += migrated;
                    report.to_generation = generation;
                }
                Err(e) => {
                    warn!("Save store upgrade to generation {} failed: {}", generation, e);
                    return Err(PersistenceError::UpgradeFailed {
                        generation,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    async fn stored_generation(&self) -> Result<u32> {
        Ok(self
            .backend
            .read_meta()
            .await?
            .map_or(0, |meta| meta.generation))
    }

    /// Applies one generation step and commits it. Returns the number of
    /// records rewritten.
    async fn apply_step(&self, meta: &mut StoreMeta, generation: u32) -> Result<usize> {
        let mut next = meta.clone();
        let migrated = match generation {
            1 => {
                next.collections
                    .insert(SESSIONS_V1.to_owned(), indexed_collection());
                0
            }
            2 => {
                let records = self.backend.read_collection(SESSIONS_V1).await?;
                let mut upgraded = Vec::with_capacity(records.len());
                let mut migrated = 0;
                for value in records {
                    let record = SavedSessionRecord::from_value(value)?;
                    if record.schema_version < SchemaVersion::V2 {
                        migrated += 1;
                    }
                    upgraded.push(record.into_current()?.to_value()?);
                }
                self.backend.write_collection(SESSIONS_V2, &upgraded).await?;

                if let Some(sessions) = next.collections.get_mut(SESSIONS_V1) {
                    sessions.read_only = true;
                }
                next.collections
                    .insert(SESSIONS_V2.to_owned(), indexed_collection());
                migrated
            }
            other => {
                return Err(PersistenceError::CorruptData(format!(
                    "no upgrade step for generation {other}"
                )));
            }
        };
        next.generation = generation;
        self.backend.write_meta(&next).await?;
        *meta = next;
        info!("Save store now at generation {}", generation);
        Ok(migrated)
    }
}

fn indexed_collection() -> CollectionMeta {
    CollectionMeta {
        indexes: vec![BY_DATE_INDEX.to_owned(), BY_NAME_INDEX.to_owned()],
        read_only: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionLevel;
    use crate::snapshot::AnySnapshot;
    use crate::storage::CollectionStorage;
    use crate::tests::sample_v1_record;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> CollectionStorage {
        CollectionStorage::new(dir.path().to_path_buf(), CompressionLevel::Fast).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_store_runs_every_step() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let upgrader = StoreUpgrader::new(&storage);

        let plan = upgrader.check().await.unwrap();
        assert_eq!(plan, UpgradePlan::Steps { from: 0, to: 2 });

        let report = upgrader.upgrade(plan).await.unwrap();
        assert_eq!(report.steps_applied, vec![1, 2]);
        assert_eq!(report.records_migrated, 0);

        let meta = storage.read_meta().await.unwrap().unwrap();
        assert_eq!(meta.generation, 2);
        assert!(meta.collections[SESSIONS_V1].read_only);
        assert!(!meta.collections[SESSIONS_V2].read_only);
        assert_eq!(
            meta.collections[SESSIONS_V2].indexes,
            vec![BY_DATE_INDEX, BY_NAME_INDEX]
        );
        assert_eq!(upgrader.check().await.unwrap(), UpgradePlan::UpToDate);
    }

    #[tokio::test]
    async fn test_generation_one_records_are_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let upgrader = StoreUpgrader::new(&storage);
        upgrader
            .upgrade(UpgradePlan::Steps { from: 0, to: 1 })
            .await
            .unwrap();
        storage
            .write_collection(SESSIONS_V1, &[sample_v1_record("Airlock").to_value().unwrap()])
            .await
            .unwrap();

        let report = upgrader.upgrade(upgrader.check().await.unwrap()).await.unwrap();
        assert_eq!(report.steps_applied, vec![2]);
        assert_eq!(report.records_migrated, 1);

        let stored = storage.read_collection(SESSIONS_V2).await.unwrap();
        let record = SavedSessionRecord::from_value(stored[0].clone()).unwrap();
        assert_eq!(record.schema_version, SchemaVersion::V2);
        assert!(matches!(record.session.vm, AnySnapshot::V2(_)));

        // the superseded collection is left as it was
        assert_eq!(storage.read_collection(SESSIONS_V1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_keeps_last_committed_generation() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        let upgrader = StoreUpgrader::new(&storage);
        upgrader
            .upgrade(UpgradePlan::Steps { from: 0, to: 1 })
            .await
            .unwrap();

        let mut broken = sample_v1_record("Broken");
        if let AnySnapshot::V1(vm) = &mut broken.session.vm {
            vm.ics[0].device = 99;
        }
        storage
            .write_collection(SESSIONS_V1, &[broken.to_value().unwrap()])
            .await
            .unwrap();

        let err = upgrader
            .upgrade(upgrader.check().await.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::UpgradeFailed { generation: 2, .. }
        ));
        assert_eq!(storage.read_meta().await.unwrap().unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_newer_store_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let storage = storage(&temp_dir);
        storage
            .write_meta(&StoreMeta {
                generation: 7,
                ..StoreMeta::default()
            })
            .await
            .unwrap();

        assert!(matches!(
            StoreUpgrader::new(&storage).check().await,
            Err(PersistenceError::UnsupportedVersion(7, 2))
        ));
    }
}
