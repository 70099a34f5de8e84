use delta_state::applier::apply_change_set;
use delta_state::change_set::compute_change_set;
use delta_state::instrument::memory::{MemoryReadInstrument, MemoryWriteInstrument};
use delta_state::model::{BincodeCodec, EntityRecord, Snapshot, SharedInstance, SharedInstanceId, ValueCodecRegistry};
use delta_state::recorder::{DeltaStateRecorder, FlushPolicy};
use delta_state::replayer::DeltaStateReplayer;
use ecs_ids::component::ComponentRegistry;
use ecs_ids::entity::EntityAllocator;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Position {
    x: f32,
    y: f32,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Health(i32);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct Material {
    color: [u8; 3],
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
struct MatchClock {
    seconds_remaining: f32,
}

fn build_registry() -> (ComponentRegistry, ValueCodecRegistry) {
    let mut registry = ComponentRegistry::new();
    let mut codecs = ValueCodecRegistry::new();
    let pos = registry.register::<Position>("position");
    codecs.register(Box::new(BincodeCodec::<Position>::new(pos)));
    let hp = registry.register::<Health>("health");
    codecs.register(Box::new(BincodeCodec::<Health>::new(hp)));
    let mat = registry.register::<Material>("material");
    codecs.register(Box::new(BincodeCodec::<Material>::new(mat)));
    let clock = registry.register::<MatchClock>("match_clock");
    codecs.register(Box::new(BincodeCodec::<MatchClock>::new(clock)));
    (registry, codecs)
}

/// Records a short sequence of snapshots with entities entering and leaving,
/// a shared material reused across entities, and a global match clock, then
/// replays the whole thing back and checks every frame matches bit-for-bit
/// (modulo floating point equality, which these fixtures avoid needing).
#[test]
fn full_session_round_trips_through_recorder_and_replayer() {
    let (mut registry, codecs) = build_registry();
    let pos_id = registry.lookup::<Position>().unwrap();
    let hp_id = registry.lookup::<Health>().unwrap();
    let mat_id = registry.lookup::<Material>().unwrap();
    let clock_id = registry.lookup::<MatchClock>().unwrap();

    let mut alloc = EntityAllocator::new();
    let player = alloc.allocate();
    let enemy = alloc.allocate();
    let red_material = SharedInstanceId(0);

    // Frame 0: player and enemy both alive, sharing a material, clock at 60s.
    let mut frame0 = Snapshot::new();
    let mut player_record = EntityRecord::default();
    player_record.unique.insert(pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
    player_record.unique.insert(hp_id, Box::new(Health(100)));
    player_record.shared.insert(mat_id, red_material);
    frame0.entities.insert(player, player_record);

    let mut enemy_record = EntityRecord::default();
    enemy_record.unique.insert(pos_id, Box::new(Position { x: 10.0, y: 0.0 }));
    enemy_record.unique.insert(hp_id, Box::new(Health(50)));
    enemy_record.shared.insert(mat_id, red_material);
    frame0.entities.insert(enemy, enemy_record);

    frame0.shared_instances.insert(
        red_material,
        SharedInstance {
            type_id: mat_id,
            name: Some("red".to_owned()),
            value: Box::new(Material { color: [255, 0, 0] }),
        },
    );
    frame0
        .globals
        .insert(clock_id, Box::new(MatchClock { seconds_remaining: 60.0 }));

    // Frame 1: player moves and takes damage, clock ticks down.
    let mut frame1 = Snapshot::new();
    let mut player_record = EntityRecord::default();
    player_record.unique.insert(pos_id, Box::new(Position { x: 1.0, y: 0.0 }));
    player_record.unique.insert(hp_id, Box::new(Health(90)));
    player_record.shared.insert(mat_id, red_material);
    frame1.entities.insert(player, player_record);

    let mut enemy_record = EntityRecord::default();
    enemy_record.unique.insert(pos_id, Box::new(Position { x: 10.0, y: 0.0 }));
    enemy_record.unique.insert(hp_id, Box::new(Health(50)));
    enemy_record.shared.insert(mat_id, red_material);
    frame1.entities.insert(enemy, enemy_record);

    frame1.shared_instances.insert(
        red_material,
        SharedInstance {
            type_id: mat_id,
            name: Some("red".to_owned()),
            value: Box::new(Material { color: [255, 0, 0] }),
        },
    );
    frame1
        .globals
        .insert(clock_id, Box::new(MatchClock { seconds_remaining: 59.0 }));

    // Frame 2: enemy despawns.
    let mut frame2 = Snapshot::new();
    let mut player_record = EntityRecord::default();
    player_record.unique.insert(pos_id, Box::new(Position { x: 2.0, y: 0.0 }));
    player_record.unique.insert(hp_id, Box::new(Health(90)));
    player_record.shared.insert(mat_id, red_material);
    frame2.entities.insert(player, player_record);
    frame2.shared_instances.insert(
        red_material,
        SharedInstance {
            type_id: mat_id,
            name: Some("red".to_owned()),
            value: Box::new(Material { color: [255, 0, 0] }),
        },
    );
    frame2
        .globals
        .insert(clock_id, Box::new(MatchClock { seconds_remaining: 58.0 }));

    let frames = [frame0, frame1, frame2];

    let mut buffer = MemoryWriteInstrument::new();
    {
        let mut recorder = DeltaStateRecorder::new(&mut buffer, &codecs, &registry, FlushPolicy::Manual, true);
        recorder.arm().unwrap();
        for frame in frames {
            recorder.record_state(frame, 1.0).unwrap();
        }
        recorder.close().unwrap();
    }
    let bytes = buffer.into_inner();

    let mut reader = MemoryReadInstrument::new(&bytes);
    let mut replayer = DeltaStateReplayer::open(&mut reader, &codecs, &registry).unwrap();
    assert_eq!(replayer.state_count(), 3);

    let s0 = replayer.advance_one_state().unwrap();
    assert_eq!(s0.entities.len(), 2);
    let s1 = replayer.advance_one_state().unwrap();
    let player_health = s1.entities[&player].unique.get(&hp_id).unwrap();
    assert_eq!(player_health.downcast_ref::<Health>().unwrap(), &Health(90));

    let s2 = replayer.advance_one_state().unwrap();
    assert_eq!(s2.entities.len(), 1);
    assert!(!s2.entities.contains_key(&enemy));
    let clock = s2.globals.get(&clock_id).unwrap();
    assert_eq!(
        clock.downcast_ref::<MatchClock>().unwrap(),
        &MatchClock { seconds_remaining: 58.0 }
    );
}

/// A recorder configured to flush an entire snapshot every other state
/// should still let the replayer seek directly to any index, including one
/// that requires resuming from a later entire frame than frame zero.
#[test]
fn seeking_resumes_from_the_nearest_entire_frame() {
    let (mut registry, codecs) = build_registry();
    let pos_id = registry.register::<Position>("position");

    let mut alloc = EntityAllocator::new();
    let entity = alloc.allocate();

    let mut buffer = MemoryWriteInstrument::new();
    {
        let mut recorder = DeltaStateRecorder::new(&mut buffer, &codecs, &registry, FlushPolicy::EveryNStates(2), false);
        recorder.arm().unwrap();
        for i in 0..6u32 {
            let mut snapshot = Snapshot::new();
            let mut record = EntityRecord::default();
            record.unique.insert(pos_id, Box::new(Position { x: i as f32, y: 0.0 }));
            snapshot.entities.insert(entity, record);
            recorder.record_state(snapshot, 1.0).unwrap();
        }
        recorder.close().unwrap();
    }
    let bytes = buffer.into_inner();

    let mut reader = MemoryReadInstrument::new(&bytes);
    let mut replayer = DeltaStateReplayer::open(&mut reader, &codecs, &registry).unwrap();
    let snapshot = replayer.seek(5).unwrap();
    let value = snapshot.entities[&entity].unique.get(&pos_id).unwrap();
    assert_eq!(value.downcast_ref::<Position>().unwrap().x, 5.0);
}

/// Computing a change-set between two snapshots and applying it to the
/// first must reproduce the second exactly, independent of the
/// recorder/replayer plumbing.
#[test]
fn change_set_apply_is_inverse_of_diffing() {
    let (mut registry, codecs) = build_registry();
    let pos_id = registry.register::<Position>("position");

    let mut alloc = EntityAllocator::new();
    let a = alloc.allocate();
    let b = alloc.allocate();

    let mut previous = Snapshot::new();
    let mut a_record = EntityRecord::default();
    a_record.unique.insert(pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
    previous.entities.insert(a, a_record);

    let mut current = Snapshot::new();
    let mut a_record = EntityRecord::default();
    a_record.unique.insert(pos_id, Box::new(Position { x: 3.0, y: 4.0 }));
    current.entities.insert(a, a_record);
    current.entities.insert(b, EntityRecord::default());

    let change_set = compute_change_set(&previous, &current, &codecs).unwrap();
    let mut w = MemoryWriteInstrument::new();
    change_set.encode(&mut w, &codecs).unwrap();
    let bytes = w.into_inner();

    let mut r = MemoryReadInstrument::new(&bytes);
    let decoded = delta_state::change_set::decode_change_set(&mut r, &codecs).unwrap();

    let mut reconstructed = previous;
    apply_change_set(&mut reconstructed, decoded).unwrap();

    assert!(reconstructed.contains(b));
    let pos = reconstructed.entities[&a].unique.get(&pos_id).unwrap();
    assert_eq!(pos.downcast_ref::<Position>().unwrap(), &Position { x: 3.0, y: 4.0 });
}

/// A recorder that is armed, flushed, and closed without ever recording a
/// state must still produce a stream a replayer can open, reporting zero
/// recorded states.
#[test]
fn empty_session_opens_with_zero_states() {
    let (registry, codecs) = build_registry();
    let mut buffer = MemoryWriteInstrument::new();
    {
        let mut recorder = DeltaStateRecorder::new(&mut buffer, &codecs, &registry, FlushPolicy::Manual, true);
        recorder.arm().unwrap();
        recorder.close().unwrap();
    }
    let bytes = buffer.into_inner();

    let mut reader = MemoryReadInstrument::new(&bytes);
    let replayer = DeltaStateReplayer::open(&mut reader, &codecs, &registry).unwrap();
    assert_eq!(replayer.state_count(), 0);
    assert!(replayer.current().is_none());
}

/// Destroying an entity's index and recreating it (with a bumped
/// generation) in the very next snapshot must surface as one removal and
/// one addition, never as neither or as a spurious "changed" record --
/// the two generations are distinct identities that happen to share an
/// index.
#[test]
fn destroy_recreate_at_same_index_is_remove_then_add() {
    let (mut registry, codecs) = build_registry();
    let pos_id = registry.register::<Position>("position");

    let mut alloc = EntityAllocator::new();
    let original = alloc.allocate();

    let mut previous = Snapshot::new();
    let mut record = EntityRecord::default();
    record.unique.insert(pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
    previous.entities.insert(original, record);

    alloc.deallocate(original);
    let recreated = alloc.allocate();
    assert_eq!(recreated.index(), original.index());
    assert_ne!(recreated.generation(), original.generation());

    let mut current = Snapshot::new();
    let mut record = EntityRecord::default();
    record.unique.insert(pos_id, Box::new(Position { x: 5.0, y: 5.0 }));
    current.entities.insert(recreated, record);

    let change_set = compute_change_set(&previous, &current, &codecs).unwrap();
    assert_eq!(change_set.entities_removed, vec![original]);
    assert_eq!(change_set.entities_added.len(), 1);
    assert_eq!(change_set.entities_added[0].entity, recreated);
    assert!(change_set.unique_component_changes.is_empty());
}

/// A recorder and a replayer built from two registries that register the
/// same component types in different orders must still exchange correct
/// values -- only the registered names, never the raw ids, are load-bearing
/// across a recorded stream.
#[test]
fn replay_is_correct_across_differently_ordered_registries() {
    let mut writer_registry = ComponentRegistry::new();
    let mut writer_codecs = ValueCodecRegistry::new();
    let writer_pos = writer_registry.register::<Position>("position");
    writer_codecs.register(Box::new(BincodeCodec::<Position>::new(writer_pos)));
    let writer_hp = writer_registry.register::<Health>("health");
    writer_codecs.register(Box::new(BincodeCodec::<Health>::new(writer_hp)));

    let mut alloc = EntityAllocator::new();
    let entity = alloc.allocate();

    let mut buffer = MemoryWriteInstrument::new();
    {
        let mut recorder = DeltaStateRecorder::new(&mut buffer, &writer_codecs, &writer_registry, FlushPolicy::Manual, false);
        recorder.arm().unwrap();
        let mut snapshot = Snapshot::new();
        let mut record = EntityRecord::default();
        record.unique.insert(writer_pos, Box::new(Position { x: 1.0, y: 2.0 }));
        record.unique.insert(writer_hp, Box::new(Health(75)));
        snapshot.entities.insert(entity, record);
        recorder.record_state(snapshot, 0.0).unwrap();
        recorder.close().unwrap();
    }
    let bytes = buffer.into_inner();

    // Reader registers "health" before "position" -- the opposite order --
    // so its raw ids for both names are swapped relative to the writer's.
    let mut reader_registry = ComponentRegistry::new();
    let mut reader_codecs = ValueCodecRegistry::new();
    let reader_hp = reader_registry.register::<Health>("health");
    reader_codecs.register(Box::new(BincodeCodec::<Health>::new(reader_hp)));
    let reader_pos = reader_registry.register::<Position>("position");
    reader_codecs.register(Box::new(BincodeCodec::<Position>::new(reader_pos)));
    assert_ne!(writer_pos.to_raw(), reader_pos.to_raw());
    assert_ne!(writer_hp.to_raw(), reader_hp.to_raw());

    let mut reader = MemoryReadInstrument::new(&bytes);
    let mut replayer = DeltaStateReplayer::open(&mut reader, &reader_codecs, &reader_registry).unwrap();
    let snapshot = replayer.advance_one_state().unwrap();

    let record = &snapshot.entities[&entity];
    let pos = record.unique.get(&reader_pos).unwrap();
    assert_eq!(pos.downcast_ref::<Position>().unwrap(), &Position { x: 1.0, y: 2.0 });
    let hp = record.unique.get(&reader_hp).unwrap();
    assert_eq!(hp.downcast_ref::<Health>().unwrap(), &Health(75));
}
