//! Applies a decoded change-set to a snapshot.
//!
//! Replaying a delta-recorded stream means starting from a materialized
//! snapshot and, for each subsequent delta, decoding its change-set and
//! calling [`apply_change_set`] to advance the snapshot in place. The eight
//! steps run in a fixed order so that later steps can assume earlier ones
//! already happened -- in particular, shared instances are added before
//! any reference to them is applied, and entities are added before any
//! reference to them as the target of a component/ref change (changes to
//! unique components or shared refs only ever target entities that were
//! already present in both the previous and current snapshot, never a
//! freshly-added one, which arrives with its full state already attached).

use crate::change_set::{DecodedChangeSet, OwnedValueChange};
use crate::error::{DeltaStateError, Result};
use crate::model::Snapshot;

/// Apply `change_set` to `snapshot`, advancing it to the next recorded
/// state in place.
pub fn apply_change_set(snapshot: &mut Snapshot, change_set: DecodedChangeSet) -> Result<()> {
    // 1. Remove entities.
    for entity in &change_set.entities_removed {
        snapshot.entities.remove(entity);
    }

    // 2. Add entities (full state, not touched by later steps).
    for (entity, record) in change_set.entities_added {
        snapshot.entities.insert(entity, record);
    }

    // 3. Apply entity_info_changes (storage relocations). Always empty in
    // this crate -- there is no archetype store to relocate within -- but
    // the field is still part of the decoded shape, consumed here so the
    // step ordering matches the wire format.
    let _ = &change_set.entity_info_changes;

    // 4. Remove shared instances.
    for id in &change_set.shared_instances_removed {
        snapshot.shared_instances.remove(id);
    }

    // 5. Add shared instances.
    for (id, instance) in change_set.shared_instances_added {
        snapshot.shared_instances.insert(id, instance);
    }

    // 6. Apply unique component changes to entities present before and after.
    for (entity, component, change) in change_set.unique_component_changes {
        let record = snapshot
            .entities
            .get_mut(&entity)
            .ok_or(DeltaStateError::StaleEntity { entity })?;
        match change {
            OwnedValueChange::Added(value) | OwnedValueChange::Changed(value) => {
                record.unique.insert(component, value);
            }
            OwnedValueChange::Removed => {
                record.unique.remove(&component);
            }
        }
    }

    // 7. Apply shared-reference changes.
    for (entity, component, new_ref) in change_set.shared_ref_changes {
        let record = snapshot
            .entities
            .get_mut(&entity)
            .ok_or(DeltaStateError::StaleEntity { entity })?;
        match new_ref {
            Some(id) => {
                record.shared.insert(component, id);
            }
            None => {
                record.shared.remove(&component);
            }
        }
    }

    // 8. Apply global singleton component changes.
    for (component, change) in change_set.global_changes {
        match change {
            OwnedValueChange::Added(value) | OwnedValueChange::Changed(value) => {
                snapshot.globals.insert(component, value);
            }
            OwnedValueChange::Removed => {
                snapshot.globals.remove(&component);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BincodeCodec, EntityRecord, ValueCodecRegistry};
    use ecs_ids::component::ComponentRegistry;
    use ecs_ids::entity::EntityAllocator;

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Position {
        x: f32,
        y: f32,
    }

    #[test]
    fn apply_reproduces_current_from_previous() {
        use crate::change_set::compute_change_set;
        use crate::instrument::memory::{MemoryReadInstrument, MemoryWriteInstrument};

        let mut registry = ComponentRegistry::new();
        let pos_id = registry.register::<Position>("position");
        let mut codecs = ValueCodecRegistry::new();
        codecs.register(Box::new(BincodeCodec::<Position>::new(pos_id)));

        let mut alloc = EntityAllocator::new();
        let kept = alloc.allocate();
        let removed = alloc.allocate();
        let added = alloc.allocate();

        let mut previous = Snapshot::new();
        let mut kept_prev = EntityRecord::default();
        kept_prev
            .unique
            .insert(pos_id, Box::new(Position { x: 0.0, y: 0.0 }));
        previous.entities.insert(kept, kept_prev);
        previous.entities.insert(removed, EntityRecord::default());

        let mut current = Snapshot::new();
        let mut kept_curr = EntityRecord::default();
        kept_curr
            .unique
            .insert(pos_id, Box::new(Position { x: 5.0, y: 5.0 }));
        current.entities.insert(kept, kept_curr);
        current.entities.insert(added, EntityRecord::default());

        let change_set = compute_change_set(&previous, &current, &codecs).unwrap();
        let mut w = MemoryWriteInstrument::new();
        change_set.encode(&mut w, &codecs).unwrap();
        let bytes = w.into_inner();

        let mut r = MemoryReadInstrument::new(&bytes);
        let decoded = crate::change_set::decode_change_set(&mut r, &codecs).unwrap();

        let mut replayed = previous;
        apply_change_set(&mut replayed, decoded).unwrap();

        assert!(!replayed.contains(removed));
        assert!(replayed.contains(added));
        let kept_record = replayed.entities.get(&kept).unwrap();
        let pos = kept_record.unique.get(&pos_id).unwrap();
        assert_eq!(pos.downcast_ref::<Position>().unwrap(), &Position { x: 5.0, y: 5.0 });
    }

    #[test]
    fn unique_component_change_on_missing_entity_is_stale() {
        let mut snapshot = Snapshot::new();
        let mut alloc = EntityAllocator::new();
        let ghost = alloc.allocate();
        let mut registry = ComponentRegistry::new();
        let pos_id = registry.register::<Position>("position");

        let change_set = DecodedChangeSet {
            unique_component_changes: vec![(
                ghost,
                pos_id,
                OwnedValueChange::Added(Box::new(Position { x: 1.0, y: 1.0 })),
            )],
            ..Default::default()
        };

        assert!(matches!(
            apply_change_set(&mut snapshot, change_set),
            Err(DeltaStateError::StaleEntity { entity }) if entity == ghost
        ));
    }
}
