use super::CableConnectionType;
use super::IcState;
use super::ObjectId;
use super::Operand;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// The original layout: IC state and device templates side by side.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotV1 {
    #[serde(default)]
    pub ics: Vec<IcV1>,
    #[serde(default)]
    pub devices: Vec<DeviceV1>,
    #[serde(default)]
    pub networks: Vec<NetworkV1>,
    pub default_network: ObjectId,
}

/// Interpreter state of one IC. `device` names the housing it sits in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IcV1 {
    pub device: ObjectId,
    pub id: ObjectId,
    pub registers: Vec<f64>,
    /// Instruction pointer
    pub ip: u32,
    /// Instructions executed since the last yield
    pub ic: u16,
    pub stack: Vec<f64>,
    #[serde(default)]
    pub aliases: Vec<(String, Operand)>,
    #[serde(default)]
    pub defines: Vec<(String, f64)>,
    /// Positional device pins `d0`..`d5`
    #[serde(default)]
    pub pins: Vec<Option<ObjectId>>,
    #[serde(default)]
    pub state: IcState,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceV1 {
    pub id: Option<ObjectId>,
    pub name: Option<String>,
    pub prefab_name: Option<String>,
    #[serde(default)]
    pub slots: Vec<SlotV1>,
    #[serde(default)]
    pub connections: Vec<ConnectionV1>,
    #[serde(default)]
    pub fields: BTreeMap<String, LogicFieldV1>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotV1 {
    pub typ: String,
    pub occupant: Option<OccupantV1>,
}

/// An item sitting in a slot. Older saves may omit its id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OccupantV1 {
    pub id: Option<ObjectId>,
    #[serde(default)]
    pub fields: BTreeMap<String, LogicFieldV1>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MemoryAccess {
    #[default]
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogicFieldV1 {
    pub field_type: MemoryAccess,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectionV1 {
    CableNetwork {
        net: Option<ObjectId>,
        typ: CableConnectionType,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkV1 {
    pub id: ObjectId,
    #[serde(default)]
    pub devices: Vec<ObjectId>,
    #[serde(default)]
    pub power_only: Vec<ObjectId>,
    #[serde(default)]
    pub channels: Vec<f64>,
}

impl SnapshotV1 {
    pub fn ic_by_device(&self, device: ObjectId) -> Option<&IcV1> {
        self.ics.iter().find(|ic| ic.device == device)
    }
}
