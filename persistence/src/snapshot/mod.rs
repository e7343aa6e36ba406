//! VM snapshot shapes.
//!
//! Two historical layouts exist: [`SnapshotV1`] keeps IC state and device
//! templates in separate lists linked by device id, [`SnapshotV2`] keeps a
//! single object list. Neither carries a version tag, so [`AnySnapshot`]
//! tells them apart by shape.

mod v1;
mod v2;

pub use v1::ConnectionV1;
pub use v1::DeviceV1;
pub use v1::IcV1;
pub use v1::LogicFieldV1;
pub use v1::MemoryAccess;
pub use v1::NetworkV1;
pub use v1::OccupantV1;
pub use v1::SlotV1;
pub use v1::SnapshotV1;
pub use v2::CircuitV2;
pub use v2::ConnectionV2;
pub use v2::NetworkV2;
pub use v2::ObjectV2;
pub use v2::SlotV2;
pub use v2::SnapshotV2;

use crate::ejson;
use crate::ejson::Value;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::migration;
use serde::Deserialize;
use serde::Serialize;

pub type ObjectId = u32;

/// Schema revision of a stored snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchemaVersion {
    V1,
    V2,
}

impl SchemaVersion {
    pub const CURRENT: Self = Self::V2;
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V1 => f.write_str("v1"),
            Self::V2 => f.write_str("v2"),
        }
    }
}

/// Run state of a circuit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum IcState {
    #[default]
    Start,
    Running,
    Yield,
    /// Sleeping until `until` (ms since the epoch) for `seconds`.
    Sleep { until: f64, seconds: f64 },
    HasCaughtFire,
    Error { line: u32, message: String },
}

/// Device reference inside an operand: `db`, `d0`..`d5` or `dr0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceRef {
    Db,
    Numbered(u32),
    Indirect { indirection: u32, target: u32 },
}

/// Value an alias can name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Register { indirection: u32, target: u32 },
    Device {
        device: DeviceRef,
        connection: Option<u32>,
    },
    Number(f64),
    Identifier(String),
}

/// Cable role of a network connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CableConnectionType {
    #[default]
    Power,
    Data,
    PowerAndData,
}

/// A snapshot of either schema.
#[derive(Debug, Clone, PartialEq)]
pub enum AnySnapshot {
    V1(SnapshotV1),
    V2(SnapshotV2),
}

impl AnySnapshot {
    /// Decides the schema from the graph's top-level keys.
    pub fn from_value(value: Value) -> Result<Self> {
        if value.get("objects").is_some() {
            Ok(Self::V2(ejson::from_value(value)?))
        } else if value.get("ics").is_some() {
            Ok(Self::V1(ejson::from_value(value)?))
        } else {
            Err(PersistenceError::UnrecognizedPayload(
                "VM snapshot has neither `objects` nor `ics`".to_owned(),
            ))
        }
    }

    pub const fn schema_version(&self) -> SchemaVersion {
        match self {
            Self::V1(_) => SchemaVersion::V1,
            Self::V2(_) => SchemaVersion::V2,
        }
    }

    /// Returns the snapshot in the current schema; already-current snapshots
    /// come back untouched.
    pub fn into_current(self) -> Result<SnapshotV2> {
        match self {
            Self::V1(snapshot) => Ok(migration::migrate(&snapshot)?),
            Self::V2(snapshot) => Ok(snapshot),
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        match self {
            Self::V1(snapshot) => Ok(ejson::to_value(snapshot)?),
            Self::V2(snapshot) => Ok(ejson::to_value(snapshot)?),
        }
    }
}

impl From<SnapshotV1> for AnySnapshot {
    fn from(snapshot: SnapshotV1) -> Self {
        Self::V1(snapshot)
    }
}

impl From<SnapshotV2> for AnySnapshot {
    fn from(snapshot: SnapshotV2) -> Self {
        Self::V2(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;

    #[test]
    fn test_shape_detection() {
        let v2 = demo::demo_snapshot();
        let value = ejson::to_value(&v2).unwrap();
        let any = AnySnapshot::from_value(value.clone()).unwrap();
        assert_eq!(any.schema_version(), SchemaVersion::V2);
        // channels hold NaN, so compare as value graphs
        let current = any.into_current().unwrap();
        assert_eq!(ejson::to_value(&current).unwrap(), value);

        let v1 = SnapshotV1 {
            default_network: 3,
            ..SnapshotV1::default()
        };
        let any = AnySnapshot::from_value(ejson::to_value(&v1).unwrap()).unwrap();
        assert_eq!(any.schema_version(), SchemaVersion::V1);
    }

    #[test]
    fn test_unknown_shape_rejected() {
        let err = AnySnapshot::from_value(Value::Number(5.0)).unwrap_err();
        assert!(matches!(err, PersistenceError::UnrecognizedPayload(_)));
    }
}
