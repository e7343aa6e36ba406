//! The VM collaborator, seen from the session side.

use crate::error::PersistenceError;
use crate::error::Result;
use crate::snapshot::ObjectId;
use crate::snapshot::SnapshotV2;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// What the session controller needs from a running VM.
#[async_trait]
pub trait VmHost: Send + Sync {
    /// Replace the whole VM state.
    async fn restore_snapshot(&self, snapshot: SnapshotV2) -> Result<()>;

    async fn take_snapshot(&self) -> Result<SnapshotV2>;

    async fn program_sources(&self) -> Result<BTreeMap<ObjectId, String>>;

    /// Set the source of one program holder.
    async fn update_code(&self, id: ObjectId, code: &str) -> Result<()>;
}

/// A headless VM that only holds state. Nothing executes.
#[derive(Debug, Default)]
pub struct MemoryVm {
    snapshot: Mutex<SnapshotV2>,
}

impl MemoryVm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: SnapshotV2) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }
}

#[async_trait]
impl VmHost for MemoryVm {
    async fn restore_snapshot(&self, snapshot: SnapshotV2) -> Result<()> {
        let missing = snapshot
            .circuit_holders
            .iter()
            .chain(&snapshot.program_holders)
            .find(|id| !snapshot.contains(**id));
        if let Some(id) = missing {
            return Err(PersistenceError::Vm(format!(
                "snapshot lists object {id} as a holder but does not contain it"
            )));
        }
        *self.snapshot.lock().await = snapshot;
        Ok(())
    }

    async fn take_snapshot(&self) -> Result<SnapshotV2> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn program_sources(&self) -> Result<BTreeMap<ObjectId, String>> {
        Ok(self.snapshot.lock().await.program_sources())
    }

    async fn update_code(&self, id: ObjectId, code: &str) -> Result<()> {
        self.snapshot.lock().await.set_program(id, code);
        Ok(())
    }
}
