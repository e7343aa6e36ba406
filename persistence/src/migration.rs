//! Rebuilds V1 snapshots in the unified V2 object layout

use crate::demo::CIRCUIT_PREFAB;
use crate::snapshot::CircuitV2;
use crate::snapshot::ConnectionV1;
use crate::snapshot::ConnectionV2;
use crate::snapshot::IcV1;
use crate::snapshot::LogicFieldV1;
use crate::snapshot::NetworkV1;
use crate::snapshot::NetworkV2;
use crate::snapshot::ObjectId;
use crate::snapshot::ObjectV2;
use crate::snapshot::OccupantV1;
use crate::snapshot::SlotV2;
use crate::snapshot::SnapshotV1;
use crate::snapshot::SnapshotV2;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

/// A V1 snapshot whose IC and device records do not line up
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MigrationError {
    #[error("IC {ic} sits in device {device}, which the snapshot does not contain")]
    OrphanedCircuit { ic: ObjectId, device: ObjectId },

    #[error("id {0} is used by more than one object")]
    DuplicateId(ObjectId),

    #[error("device {device} houses both IC {first} and IC {second}")]
    SharedHousing {
        device: ObjectId,
        first: ObjectId,
        second: ObjectId,
    },
}

/// Hands out ids above every id already present in the snapshot.
struct IdAllocator {
    next: ObjectId,
}

impl IdAllocator {
    fn for_snapshot(snapshot: &SnapshotV1) -> Self {
        let devices = snapshot.devices.iter().filter_map(|device| device.id);
        let ics = snapshot.ics.iter().map(|ic| ic.id);
        let occupants = snapshot
            .devices
            .iter()
            .flat_map(|device| &device.slots)
            .filter_map(|slot| slot.occupant.as_ref().and_then(|occupant| occupant.id));
        let networks = snapshot.networks.iter().map(|network| network.id);
        let max = devices
            .chain(ics)
            .chain(occupants)
            .chain(networks)
            .max()
            .unwrap_or(0);
        Self { next: max + 1 }
    }

    fn fresh(&mut self) -> ObjectId {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Migrates a V1 snapshot. Pure and deterministic: the same input always
/// yields the same ids in the same order.
pub fn migrate(snapshot: &SnapshotV1) -> Result<SnapshotV2, MigrationError> {
    let mut ids = IdAllocator::for_snapshot(snapshot);

    let mut housings: BTreeMap<ObjectId, &IcV1> = BTreeMap::new();
    for ic in &snapshot.ics {
        if !snapshot
            .devices
            .iter()
            .any(|device| device.id == Some(ic.device))
        {
            return Err(MigrationError::OrphanedCircuit {
                ic: ic.id,
                device: ic.device,
            });
        }
        if let Some(first) = housings.insert(ic.device, ic) {
            return Err(MigrationError::SharedHousing {
                device: ic.device,
                first: first.id,
                second: ic.id,
            });
        }
    }

    let mut objects: Vec<ObjectV2> = snapshot.ics.iter().map(circuit_object).collect();
    let program_holders = snapshot.ics.iter().map(|ic| ic.id).collect();
    let mut circuit_holders = Vec::new();

    for device in &snapshot.devices {
        let id = device.id.unwrap_or_else(|| ids.fresh());

        let mut slots = Vec::with_capacity(device.slots.len());
        for slot in &device.slots {
            let occupant = slot.occupant.as_ref().map(|occupant| {
                let occupant_id = occupant.id.unwrap_or_else(|| ids.fresh());
                match objects
                    .iter_mut()
                    .find(|object| object.id == occupant_id && object.circuit.is_some())
                {
                    // the occupant is an IC we already built; keep its fields on it
                    Some(circuit) => {
                        if !occupant.fields.is_empty() {
                            circuit.logic_values = Some(logic_values(&occupant.fields));
                        }
                    }
                    None => objects.push(occupant_object(occupant_id, occupant)),
                }
                occupant_id
            });
            slots.push(SlotV2 {
                typ: slot.typ.clone(),
                occupant,
            });
        }

        let mut object = ObjectV2 {
            id,
            prefab: device.prefab_name.clone(),
            name: device.name.clone(),
            slots: Some(slots),
            logic_values: Some(logic_values(&device.fields)),
            connections: Some(device.connections.iter().map(retype_connection).collect()),
            ..ObjectV2::default()
        };
        if let Some(ic) = device.id.and_then(|id| housings.get(&id)) {
            object.socketed_ic = Some(ic.id);
            object.device_pins = Some(pins_by_index(&ic.pins));
            circuit_holders.push(id);
        }
        objects.push(object);
    }

    let mut seen = BTreeSet::new();
    for object in &objects {
        if !seen.insert(object.id) {
            return Err(MigrationError::DuplicateId(object.id));
        }
    }

    debug!(
        objects = objects.len(),
        circuits = snapshot.ics.len(),
        "migrated V1 snapshot"
    );

    Ok(SnapshotV2 {
        objects,
        circuit_holders,
        program_holders,
        networks: snapshot.networks.iter().map(retype_network).collect(),
        default_network: snapshot.default_network,
    })
}

fn circuit_object(ic: &IcV1) -> ObjectV2 {
    ObjectV2 {
        id: ic.id,
        prefab: Some(CIRCUIT_PREFAB.to_owned()),
        source_code: Some(ic.code.clone()),
        circuit: Some(CircuitV2 {
            instruction_pointer: ic.ip,
            yield_instruction_count: ic.ic,
            state: ic.state.clone(),
            registers: ic.registers.clone(),
            aliases: ic.aliases.iter().cloned().collect(),
            defines: ic.defines.iter().cloned().collect(),
            memory: ic.stack.clone(),
        }),
        ..ObjectV2::default()
    }
}

fn occupant_object(id: ObjectId, occupant: &OccupantV1) -> ObjectV2 {
    ObjectV2 {
        id,
        logic_values: Some(logic_values(&occupant.fields)),
        ..ObjectV2::default()
    }
}

fn logic_values(fields: &BTreeMap<String, LogicFieldV1>) -> BTreeMap<String, f64> {
    fields
        .iter()
        .map(|(name, field)| (name.clone(), field.value))
        .collect()
}

fn pins_by_index(pins: &[Option<ObjectId>]) -> BTreeMap<u32, ObjectId> {
    (0u32..)
        .zip(pins)
        .filter_map(|(index, pin)| pin.map(|id| (index, id)))
        .collect()
}

fn retype_connection(connection: &ConnectionV1) -> ConnectionV2 {
    match connection {
        ConnectionV1::CableNetwork { net, typ } => ConnectionV2 {
            typ: Some(*typ),
            network: *net,
        },
        ConnectionV1::Other => ConnectionV2::default(),
    }
}

fn retype_network(network: &NetworkV1) -> NetworkV2 {
    NetworkV2 {
        id: network.id,
        devices: network.devices.clone(),
        power_only: network.power_only.clone(),
        channels: network.channels.clone(),
    }
}
