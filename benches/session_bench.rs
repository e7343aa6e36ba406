//! Benchmarks for local saves and V1 migration.

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::criterion_group;
use criterion::criterion_main;
use ic10_persistence::CompressionLevel;
use ic10_persistence::LocalStore;
use ic10_persistence::SavedSessionRecord;
use ic10_persistence::SnapshotV1;
use ic10_persistence::demo;
use ic10_persistence::migrate;
use ic10_persistence::snapshot::DeviceV1;
use ic10_persistence::snapshot::IcV1;
use ic10_persistence::snapshot::OccupantV1;
use ic10_persistence::snapshot::SlotV1;
use std::hint::black_box;
use tempfile::TempDir;
use tokio::runtime::Runtime;

/// `housings` housings, each with one IC and an anonymous battery.
fn v1_snapshot(housings: u32) -> SnapshotV1 {
    let mut snapshot = SnapshotV1::default();
    for n in 0..housings {
        let device = 2 * n + 1;
        let ic = 2 * n + 2;
        snapshot.ics.push(IcV1 {
            device,
            id: ic,
            registers: vec![0.0; 18],
            stack: vec![0.0; 512],
            code: "yield\nj 0".into(),
            ..IcV1::default()
        });
        snapshot.devices.push(DeviceV1 {
            id: Some(device),
            prefab_name: Some("StructureCircuitHousing".into()),
            slots: vec![
                SlotV1 {
                    typ: "ProgrammableChip".into(),
                    occupant: Some(OccupantV1 {
                        id: Some(ic),
                        ..OccupantV1::default()
                    }),
                },
                SlotV1 {
                    typ: "Battery".into(),
                    occupant: Some(OccupantV1::default()),
                },
            ],
            ..DeviceV1::default()
        });
    }
    snapshot
}

fn bench_migration(c: &mut Criterion) {
    let mut group = c.benchmark_group("migration");
    for housings in [1, 16, 128] {
        let snapshot = v1_snapshot(housings);
        group.bench_function(BenchmarkId::new("v1_to_v2", housings), |b| {
            b.iter(|| migrate(black_box(&snapshot)).unwrap())
        });
    }
    group.finish();
}

fn bench_local_saves(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_saves");
    let rt = Runtime::new().unwrap();

    for existing in [0usize, 10, 100] {
        let temp_dir = TempDir::new().unwrap();
        let store = rt
            .block_on(LocalStore::open(
                temp_dir.path().to_path_buf(),
                CompressionLevel::Fast,
            ))
            .unwrap();
        rt.block_on(async {
            for n in 0..existing {
                store
                    .put(SavedSessionRecord::new(
                        format!("save {n}"),
                        demo::demo_snapshot(),
                        1,
                    ))
                    .await
                    .unwrap();
            }
        });

        group.bench_function(BenchmarkId::new("put", existing), |b| {
            b.iter(|| {
                rt.block_on(store.put(SavedSessionRecord::new(
                    "bench",
                    demo::demo_snapshot(),
                    1,
                )))
                .unwrap()
            })
        });
        group.bench_function(BenchmarkId::new("open", existing), |b| {
            b.iter(|| {
                rt.block_on(LocalStore::open(
                    temp_dir.path().to_path_buf(),
                    CompressionLevel::Fast,
                ))
                .unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_migration, bench_local_saves);
criterion_main!(benches);
