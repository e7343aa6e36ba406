use super::CableConnectionType;
use super::IcState;
use super::ObjectId;
use super::Operand;
use crate::demo::CIRCUIT_PREFAB;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// The unified layout: one list of objects plus the ids that hold circuits
/// and programs.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotV2 {
    pub objects: Vec<ObjectV2>,
    #[serde(default)]
    pub circuit_holders: Vec<ObjectId>,
    #[serde(default)]
    pub program_holders: Vec<ObjectId>,
    #[serde(default)]
    pub networks: Vec<NetworkV2>,
    pub default_network: ObjectId,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectV2 {
    pub id: ObjectId,
    pub prefab: Option<String>,
    pub name: Option<String>,
    pub source_code: Option<String>,
    pub circuit: Option<CircuitV2>,
    pub slots: Option<Vec<SlotV2>>,
    pub logic_values: Option<BTreeMap<String, f64>>,
    pub connections: Option<Vec<ConnectionV2>>,
    /// Pin index to the device wired to it
    pub device_pins: Option<BTreeMap<u32, ObjectId>>,
    /// The circuit object this housing holds
    pub socketed_ic: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitV2 {
    pub instruction_pointer: u32,
    pub yield_instruction_count: u16,
    pub state: IcState,
    pub registers: Vec<f64>,
    #[serde(default)]
    pub aliases: BTreeMap<String, Operand>,
    #[serde(default)]
    pub defines: BTreeMap<String, f64>,
    #[serde(default)]
    pub memory: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SlotV2 {
    pub typ: String,
    pub occupant: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConnectionV2 {
    pub typ: Option<CableConnectionType>,
    pub network: Option<ObjectId>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkV2 {
    pub id: ObjectId,
    #[serde(default)]
    pub devices: Vec<ObjectId>,
    #[serde(default)]
    pub power_only: Vec<ObjectId>,
    #[serde(default)]
    pub channels: Vec<f64>,
}

impl SnapshotV2 {
    pub fn object(&self, id: ObjectId) -> Option<&ObjectV2> {
        self.objects.iter().find(|object| object.id == id)
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Option<&mut ObjectV2> {
        self.objects.iter_mut().find(|object| object.id == id)
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.object(id).is_some()
    }

    /// Source text of every program holder, by id.
    pub fn program_sources(&self) -> BTreeMap<ObjectId, String> {
        self.program_holders
            .iter()
            .filter_map(|id| {
                self.object(*id)
                    .map(|object| (*id, object.source_code.clone().unwrap_or_default()))
            })
            .collect()
    }

    /// Sets the source of `id`, adding a bare circuit object when none exists.
    pub fn set_program(&mut self, id: ObjectId, code: &str) {
        match self.object_mut(id) {
            Some(object) => object.source_code = Some(code.to_owned()),
            None => self.objects.push(ObjectV2 {
                id,
                prefab: Some(CIRCUIT_PREFAB.to_owned()),
                source_code: Some(code.to_owned()),
                circuit: Some(CircuitV2::default()),
                ..ObjectV2::default()
            }),
        }
        if !self.program_holders.contains(&id) {
            self.program_holders.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_program_adds_missing_holder() {
        let mut snapshot = SnapshotV2::default();
        snapshot.set_program(4, "yield");
        snapshot.set_program(4, "j 0");

        assert_eq!(snapshot.objects.len(), 1);
        assert_eq!(snapshot.program_holders, vec![4]);
        assert_eq!(snapshot.program_sources()[&4], "j 0");
        assert!(snapshot.object(4).and_then(|o| o.circuit.as_ref()).is_some());
    }
}
