//! The built-in demo session, also used to seed the VM for payloads that
//! carry program text but no VM state.

use crate::DEFAULT_OBJECT_ID;
use crate::snapshot::CableConnectionType;
use crate::snapshot::CircuitV2;
use crate::snapshot::ConnectionV2;
use crate::snapshot::NetworkV2;
use crate::snapshot::ObjectId;
use crate::snapshot::ObjectV2;
use crate::snapshot::SlotV2;
use crate::snapshot::SnapshotV2;
use std::collections::BTreeMap;

pub const CIRCUIT_PREFAB: &str = "ItemIntegratedCircuit10";
pub const HOUSING_PREFAB: &str = "StructureCircuitHousing";

/// Registers `r0`..`r15` plus `sp` and `ra`.
pub const REGISTER_COUNT: usize = 18;
pub const STACK_SIZE: usize = 512;

const HOUSING_ID: ObjectId = 2;
const NETWORK_ID: ObjectId = 3;

/// The editor walkthrough a `#demo` link opens.
pub const DEMO_PROGRAM: &str = r##"# Highlighting Demo
# This is a comment

# Hover a define id anywhere to see it's definition
define a_def 10

# Hover HASH("String")'s to see computed crc32
#     hover here    vvvvvvvvvvvvvvvv
define a_hash HASH("This is a String")

# hover over an alias anywhere in the code
# to see it's definition
alias a_var r0
alias a_device d0

# instructions have Auto Completion,
# numeric logic types are identified on hover
s db 12 0
#    ^^
# hover here

# Enums and their values are Known, Hover them!
#        vvvvvvvvvvvvvvvvvv
move r2 LogicType.Temperature
push r2

# same with constants
#       vvvv
move r3 pinf

# Labels are known
main:
l r1 dr15 RatioWater
move r2 100000.001
push r2

# Hover Hash Strings of Known prefab names
# to get their documentation
#             vvvvvvvvvvvvvvv
move r0 HASH("AccessCardBlack")
push r0
beqzal r1 test

# -2045627372 is the crc32 hash of a SolarPanel,
# hover it to see the documentation!
#        vvvvvvvvvv
move r1 -2045627372
jal test
move r1 $FF
push r1
beqzal 0 test
move r1 %1000
push r1
yield
j main

test:
add r15 r15 1
j ra

"##;

/// One circuit (id 1) seated in a housing (id 2) on a data network (id 3).
pub fn demo_snapshot() -> SnapshotV2 {
    let circuit = ObjectV2 {
        id: DEFAULT_OBJECT_ID,
        prefab: Some(CIRCUIT_PREFAB.to_owned()),
        source_code: Some(DEMO_PROGRAM.to_owned()),
        circuit: Some(CircuitV2 {
            registers: vec![0.0; REGISTER_COUNT],
            memory: vec![0.0; STACK_SIZE],
            ..CircuitV2::default()
        }),
        ..ObjectV2::default()
    };
    let housing = ObjectV2 {
        id: HOUSING_ID,
        prefab: Some(HOUSING_PREFAB.to_owned()),
        name: Some("Circuit Housing".to_owned()),
        slots: Some(vec![SlotV2 {
            typ: "ProgrammableChip".to_owned(),
            occupant: Some(DEFAULT_OBJECT_ID),
        }]),
        logic_values: Some(BTreeMap::from([
            ("On".to_owned(), 1.0),
            ("Setting".to_owned(), 0.0),
        ])),
        connections: Some(vec![
            ConnectionV2 {
                typ: Some(CableConnectionType::Data),
                network: Some(NETWORK_ID),
            },
            ConnectionV2 {
                typ: Some(CableConnectionType::Power),
                network: None,
            },
        ]),
        device_pins: Some(BTreeMap::new()),
        socketed_ic: Some(DEFAULT_OBJECT_ID),
        ..ObjectV2::default()
    };
    SnapshotV2 {
        objects: vec![circuit, housing],
        circuit_holders: vec![HOUSING_ID],
        program_holders: vec![DEFAULT_OBJECT_ID],
        networks: vec![NetworkV2 {
            id: NETWORK_ID,
            devices: vec![HOUSING_ID],
            power_only: Vec::new(),
            channels: vec![f64::NAN; 8],
        }],
        default_network: NETWORK_ID,
    }
}

/// The demo snapshot with `programs` written over it. Ids the demo lacks get
/// a bare circuit object.
pub fn seed_snapshot(programs: &BTreeMap<ObjectId, String>) -> SnapshotV2 {
    let mut snapshot = demo_snapshot();
    for (id, code) in programs {
        snapshot.set_program(*id, code);
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_snapshot_shape() {
        let demo = demo_snapshot();
        assert_eq!(demo.program_sources()[&DEFAULT_OBJECT_ID], DEMO_PROGRAM);
        assert_eq!(demo.object(HOUSING_ID).unwrap().socketed_ic, Some(DEFAULT_OBJECT_ID));
        assert!(demo.networks[0].channels.iter().all(|c| c.is_nan()));
        assert!(DEMO_PROGRAM.starts_with("# Highlighting Demo\n"));
        assert!(DEMO_PROGRAM.contains("move r0 HASH(\"AccessCardBlack\")"));
    }

    #[test]
    fn test_seed_replaces_and_adds_programs() {
        let programs = BTreeMap::from([(1, "j main".to_owned()), (7, "yield".to_owned())]);
        let seeded = seed_snapshot(&programs);
        assert_eq!(seeded.program_sources(), programs);
        assert_eq!(seeded.program_holders, vec![1, 7]);
    }
}
