//! Structural diff between two [`Snapshot`]s.
//!
//! A change-set is computed in four independent passes, each over a
//! different namespace of the snapshot: entity identity, unique per-entity
//! components, shared interned instances (plus the per-entity references
//! to them), and global singleton components. Each pass is a merge over the
//! sorted keys of the previous and current snapshot's maps, so no namespace
//! can see a stale view of another -- an entity that was both added and has
//! unique components, for instance, is reported once by the identity pass
//! and once per component by the unique-component pass, not conflated into
//! a single combined record.
//!
//! A shared instance reference is compared by *name* when both the
//! previous and current instance carry one, and by raw
//! [`SharedInstanceId`] otherwise. Two snapshots rarely agree on numeric
//! ids for semantically-identical interned data (interning order is an
//! implementation detail), but a named shared instance -- a material, a
//! prefab -- is meant to be addressed by that name across recordings, so
//! name identity is the more meaningful comparison when it's available.

use std::any::Any;
use std::collections::BTreeSet;

use ecs_ids::component::ComponentTypeId;
use ecs_ids::entity::EntityId;

use crate::error::{DeltaStateError, Result};
use crate::instrument::{ReadInstrument, WriteInstrument};
use crate::model::{EntityRecord, Snapshot, SharedInstance, SharedInstanceId, ValueCodecRegistry};
use crate::varint;

/// Added, changed, or removed -- the three things that can happen to a
/// single keyed value between two snapshots.
pub enum ValueChange<'a> {
    Added(&'a (dyn Any + Send + Sync)),
    Changed(&'a (dyn Any + Send + Sync)),
    Removed,
}

/// A newly-present entity, carrying the full state it was captured with.
pub struct EntityAdded<'a> {
    pub entity: EntityId,
    pub record: &'a EntityRecord,
}

/// A unique component's change for one entity.
pub struct UniqueComponentChange<'a> {
    pub entity: EntityId,
    pub component: ComponentTypeId,
    pub change: ValueChange<'a>,
}

/// A newly-interned shared instance.
pub struct SharedInstanceAdded<'a> {
    pub id: SharedInstanceId,
    pub type_id: ComponentTypeId,
    pub name: Option<&'a str>,
    pub value: &'a (dyn Any + Send + Sync),
}

/// A change in which shared instance (if any) an entity references for a
/// given component type.
pub struct SharedRefChange {
    pub entity: EntityId,
    pub component: ComponentTypeId,
    pub new_ref: Option<SharedInstanceId>,
}

/// A global singleton component's change.
pub struct GlobalComponentChange<'a> {
    pub component: ComponentTypeId,
    pub change: ValueChange<'a>,
}

/// A change to an entity's storage location (e.g. which archetype it lives
/// in), for embeddings that track that kind of pooled storage. This crate
/// has no archetype storage of its own, so `compute_change_set` never
/// populates this sub-set -- it exists so the wire shape and the type
/// signature match the six defined change-set sub-sets; an embedder with its
/// own archetype store would recompute and populate relocations locally
/// rather than through this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityInfoChange {
    pub entity: EntityId,
}

/// The full structural diff between two snapshots. Borrows from the
/// `current` snapshot passed to [`compute_change_set`]; values are never
/// cloned into the change-set, only referenced.
#[derive(Default)]
pub struct ChangeSet<'a> {
    pub entities_added: Vec<EntityAdded<'a>>,
    pub entities_removed: Vec<EntityId>,
    pub entity_info_changes: Vec<EntityInfoChange>,
    pub unique_component_changes: Vec<UniqueComponentChange<'a>>,
    pub shared_instances_added: Vec<SharedInstanceAdded<'a>>,
    pub shared_instances_removed: Vec<SharedInstanceId>,
    pub shared_ref_changes: Vec<SharedRefChange>,
    pub global_changes: Vec<GlobalComponentChange<'a>>,
}

impl<'a> ChangeSet<'a> {
    /// Whether this change-set carries no changes at all -- the previous
    /// and current snapshots are structurally identical.
    pub fn is_empty(&self) -> bool {
        self.entities_added.is_empty()
            && self.entities_removed.is_empty()
            && self.entity_info_changes.is_empty()
            && self.unique_component_changes.is_empty()
            && self.shared_instances_added.is_empty()
            && self.shared_instances_removed.is_empty()
            && self.shared_ref_changes.is_empty()
            && self.global_changes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------
//
// A change-set is written as eight varint-prefixed sequences, one per field
// of `ChangeSet` / `DecodedChangeSet`, in declaration order. Entity ids are
// written as their raw `u64` (generation and index packed, not worth
// varint-compressing); every other integer identifier goes through the
// unsigned varint codec. Values go through the caller-supplied codec
// registry, keyed by the component type id that precedes them.

const CHANGE_KIND_ADDED: u8 = 0;
const CHANGE_KIND_CHANGED: u8 = 1;
const CHANGE_KIND_REMOVED: u8 = 2;

impl<'a> ChangeSet<'a> {
    /// Write this change-set to `w`.
    pub fn encode(&self, w: &mut dyn WriteInstrument, codecs: &ValueCodecRegistry) -> Result<()> {
        varint::encode_unsigned(self.entities_removed.len() as u64, w)?;
        for entity in &self.entities_removed {
            w.write(&entity.to_raw().to_le_bytes())?;
        }

        varint::encode_unsigned(self.entities_added.len() as u64, w)?;
        for added in &self.entities_added {
            w.write(&added.entity.to_raw().to_le_bytes())?;
            encode_entity_record(added.record, w, codecs)?;
        }

        varint::encode_unsigned(self.entity_info_changes.len() as u64, w)?;
        for change in &self.entity_info_changes {
            w.write(&change.entity.to_raw().to_le_bytes())?;
        }

        varint::encode_unsigned(self.unique_component_changes.len() as u64, w)?;
        for change in &self.unique_component_changes {
            w.write(&change.entity.to_raw().to_le_bytes())?;
            varint::encode_unsigned(change.component.to_raw() as u64, w)?;
            encode_value_change(&change.change, change.component, w, codecs)?;
        }

        varint::encode_unsigned(self.shared_instances_added.len() as u64, w)?;
        for added in &self.shared_instances_added {
            varint::encode_unsigned(added.id.0 as u64, w)?;
            varint::encode_unsigned(added.type_id.to_raw() as u64, w)?;
            encode_optional_name(added.name, w)?;
            let codec = codec_for(codecs, added.type_id)?;
            codec.write(added.value, w)?;
        }

        varint::encode_unsigned(self.shared_instances_removed.len() as u64, w)?;
        for id in &self.shared_instances_removed {
            varint::encode_unsigned(id.0 as u64, w)?;
        }

        varint::encode_unsigned(self.shared_ref_changes.len() as u64, w)?;
        for change in &self.shared_ref_changes {
            w.write(&change.entity.to_raw().to_le_bytes())?;
            varint::encode_unsigned(change.component.to_raw() as u64, w)?;
            match change.new_ref {
                Some(id) => {
                    w.write(&[1])?;
                    varint::encode_unsigned(id.0 as u64, w)?;
                }
                None => w.write(&[0])?,
            }
        }

        varint::encode_unsigned(self.global_changes.len() as u64, w)?;
        for change in &self.global_changes {
            varint::encode_unsigned(change.component.to_raw() as u64, w)?;
            encode_value_change(&change.change, change.component, w, codecs)?;
        }

        Ok(())
    }
}

fn encode_entity_record(
    record: &EntityRecord,
    w: &mut dyn WriteInstrument,
    codecs: &ValueCodecRegistry,
) -> Result<()> {
    varint::encode_unsigned(record.unique.len() as u64, w)?;
    for (component, value) in &record.unique {
        varint::encode_unsigned(component.to_raw() as u64, w)?;
        let codec = codec_for(codecs, *component)?;
        codec.write(value.as_ref(), w)?;
    }
    varint::encode_unsigned(record.shared.len() as u64, w)?;
    for (component, shared_id) in &record.shared {
        varint::encode_unsigned(component.to_raw() as u64, w)?;
        varint::encode_unsigned(shared_id.0 as u64, w)?;
    }
    Ok(())
}

fn encode_value_change(
    change: &ValueChange<'_>,
    component: ComponentTypeId,
    w: &mut dyn WriteInstrument,
    codecs: &ValueCodecRegistry,
) -> Result<()> {
    match change {
        ValueChange::Added(value) => {
            w.write(&[CHANGE_KIND_ADDED])?;
            codec_for(codecs, component)?.write(*value, w)?;
        }
        ValueChange::Changed(value) => {
            w.write(&[CHANGE_KIND_CHANGED])?;
            codec_for(codecs, component)?.write(*value, w)?;
        }
        ValueChange::Removed => {
            w.write(&[CHANGE_KIND_REMOVED])?;
        }
    }
    Ok(())
}

fn encode_optional_name(name: Option<&str>, w: &mut dyn WriteInstrument) -> Result<()> {
    match name {
        Some(name) => {
            w.write(&[1])?;
            varint::encode_unsigned(name.len() as u64, w)?;
            w.write(name.as_bytes())?;
        }
        None => w.write(&[0])?,
    }
    Ok(())
}

fn codec_for(codecs: &ValueCodecRegistry, component: ComponentTypeId) -> Result<&dyn crate::model::ValueCodec> {
    codecs.get(component).ok_or(DeltaStateError::ChangeSetInternal {
        reason: format!("no value codec registered for component {component:?}"),
    })
}

/// A change to one keyed value, carrying an owned value rather than a
/// borrow -- what [`decode_change_set`] produces, since the decoded value
/// doesn't borrow from anything already in memory.
pub enum OwnedValueChange {
    Added(Box<dyn Any + Send + Sync>),
    Changed(Box<dyn Any + Send + Sync>),
    Removed,
}

/// Owned counterpart of [`ChangeSet`], produced by decoding a recorded
/// change-set off the wire. [`crate::applier::apply_change_set`] consumes
/// one of these to advance a [`Snapshot`].
#[derive(Default)]
pub struct DecodedChangeSet {
    pub entities_added: Vec<(EntityId, EntityRecord)>,
    pub entities_removed: Vec<EntityId>,
    pub entity_info_changes: Vec<EntityInfoChange>,
    pub unique_component_changes: Vec<(EntityId, ComponentTypeId, OwnedValueChange)>,
    pub shared_instances_added: Vec<(SharedInstanceId, SharedInstance)>,
    pub shared_instances_removed: Vec<SharedInstanceId>,
    pub shared_ref_changes: Vec<(EntityId, ComponentTypeId, Option<SharedInstanceId>)>,
    pub global_changes: Vec<(ComponentTypeId, OwnedValueChange)>,
}

/// Decode a change-set previously written by [`ChangeSet::encode`].
pub fn decode_change_set(
    r: &mut dyn ReadInstrument,
    codecs: &ValueCodecRegistry,
) -> Result<DecodedChangeSet> {
    let mut decoded = DecodedChangeSet::default();

    let removed_count = varint::decode_unsigned(r)?;
    for _ in 0..removed_count {
        decoded.entities_removed.push(decode_entity_id(r)?);
    }

    let added_count = varint::decode_unsigned(r)?;
    for _ in 0..added_count {
        let entity = decode_entity_id(r)?;
        let record = decode_entity_record(r, codecs)?;
        decoded.entities_added.push((entity, record));
    }

    let entity_info_count = varint::decode_unsigned(r)?;
    for _ in 0..entity_info_count {
        let entity = decode_entity_id(r)?;
        decoded.entity_info_changes.push(EntityInfoChange { entity });
    }

    let unique_changes_count = varint::decode_unsigned(r)?;
    for _ in 0..unique_changes_count {
        let entity = decode_entity_id(r)?;
        let component = decode_component_type_id(r)?;
        let change = decode_value_change(r, component, codecs)?;
        decoded.unique_component_changes.push((entity, component, change));
    }

    let shared_added_count = varint::decode_unsigned(r)?;
    for _ in 0..shared_added_count {
        let id = SharedInstanceId(varint::decode_unsigned(r)? as u32);
        let type_id = decode_component_type_id(r)?;
        let name = decode_optional_name(r)?;
        let value = codec_for(codecs, type_id)?.read(r)?;
        decoded
            .shared_instances_added
            .push((id, SharedInstance { type_id, name, value }));
    }

    let shared_removed_count = varint::decode_unsigned(r)?;
    for _ in 0..shared_removed_count {
        decoded
            .shared_instances_removed
            .push(SharedInstanceId(varint::decode_unsigned(r)? as u32));
    }

    let shared_ref_count = varint::decode_unsigned(r)?;
    for _ in 0..shared_ref_count {
        let entity = decode_entity_id(r)?;
        let component = decode_component_type_id(r)?;
        let has_ref = r.read_bytes::<1>()?[0] != 0;
        let new_ref = if has_ref {
            Some(SharedInstanceId(varint::decode_unsigned(r)? as u32))
        } else {
            None
        };
        decoded.shared_ref_changes.push((entity, component, new_ref));
    }

    let global_changes_count = varint::decode_unsigned(r)?;
    for _ in 0..global_changes_count {
        let component = decode_component_type_id(r)?;
        let change = decode_value_change(r, component, codecs)?;
        decoded.global_changes.push((component, change));
    }

    Ok(decoded)
}

fn decode_entity_id(r: &mut dyn ReadInstrument) -> Result<EntityId> {
    Ok(EntityId::from_raw(u64::from_le_bytes(r.read_bytes::<8>()?)))
}

fn decode_component_type_id(r: &mut dyn ReadInstrument) -> Result<ComponentTypeId> {
    Ok(ComponentTypeId::from_raw(varint::decode_unsigned(r)? as u32))
}

fn decode_entity_record(r: &mut dyn ReadInstrument, codecs: &ValueCodecRegistry) -> Result<EntityRecord> {
    let mut record = EntityRecord::default();
    let unique_count = varint::decode_unsigned(r)?;
    for _ in 0..unique_count {
        let component = decode_component_type_id(r)?;
        let value = codec_for(codecs, component)?.read(r)?;
        record.unique.insert(component, value);
    }
    let shared_count = varint::decode_unsigned(r)?;
    for _ in 0..shared_count {
        let component = decode_component_type_id(r)?;
        let shared_id = SharedInstanceId(varint::decode_unsigned(r)? as u32);
        record.shared.insert(component, shared_id);
    }
    Ok(record)
}

fn decode_value_change(
    r: &mut dyn ReadInstrument,
    component: ComponentTypeId,
    codecs: &ValueCodecRegistry,
) -> Result<OwnedValueChange> {
    let kind = r.read_bytes::<1>()?[0];
    match kind {
        CHANGE_KIND_ADDED => Ok(OwnedValueChange::Added(codec_for(codecs, component)?.read(r)?)),
        CHANGE_KIND_CHANGED => Ok(OwnedValueChange::Changed(codec_for(codecs, component)?.read(r)?)),
        CHANGE_KIND_REMOVED => Ok(OwnedValueChange::Removed),
        other => Err(DeltaStateError::FooterCorrupt {
            reason: format!("unknown change kind byte {other}"),
        }),
    }
}

fn decode_optional_name(r: &mut dyn ReadInstrument) -> Result<Option<String>> {
    let has_name = r.read_bytes::<1>()?[0] != 0;
    if !has_name {
        return Ok(None);
    }
    let len = varint::decode_unsigned(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_always(&mut buf)?;
    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| DeltaStateError::FooterCorrupt {
            reason: "shared instance name is not valid UTF-8".to_owned(),
        })
}

/// Write a full snapshot (not a diff) to `w`. Used by the recorder for
/// "entire" states, which let a reader seek into the stream without
/// replaying every delta from frame zero.
pub fn encode_snapshot(
    snapshot: &Snapshot,
    w: &mut dyn WriteInstrument,
    codecs: &ValueCodecRegistry,
) -> Result<()> {
    varint::encode_unsigned(snapshot.entities.len() as u64, w)?;
    for (entity, record) in &snapshot.entities {
        w.write(&entity.to_raw().to_le_bytes())?;
        encode_entity_record(record, w, codecs)?;
    }

    varint::encode_unsigned(snapshot.shared_instances.len() as u64, w)?;
    for (id, instance) in &snapshot.shared_instances {
        varint::encode_unsigned(id.0 as u64, w)?;
        varint::encode_unsigned(instance.type_id.to_raw() as u64, w)?;
        encode_optional_name(instance.name.as_deref(), w)?;
        codec_for(codecs, instance.type_id)?.write(instance.value.as_ref(), w)?;
    }

    varint::encode_unsigned(snapshot.globals.len() as u64, w)?;
    for (component, value) in &snapshot.globals {
        varint::encode_unsigned(component.to_raw() as u64, w)?;
        codec_for(codecs, *component)?.write(value.as_ref(), w)?;
    }

    Ok(())
}

/// Decode a full snapshot previously written by [`encode_snapshot`].
pub fn decode_snapshot(r: &mut dyn ReadInstrument, codecs: &ValueCodecRegistry) -> Result<Snapshot> {
    let mut snapshot = Snapshot::new();

    let entity_count = varint::decode_unsigned(r)?;
    for _ in 0..entity_count {
        let entity = decode_entity_id(r)?;
        let record = decode_entity_record(r, codecs)?;
        snapshot.entities.insert(entity, record);
    }

    let shared_count = varint::decode_unsigned(r)?;
    for _ in 0..shared_count {
        let id = SharedInstanceId(varint::decode_unsigned(r)? as u32);
        let type_id = decode_component_type_id(r)?;
        let name = decode_optional_name(r)?;
        let value = codec_for(codecs, type_id)?.read(r)?;
        snapshot
            .shared_instances
            .insert(id, SharedInstance { type_id, name, value });
    }

    let global_count = varint::decode_unsigned(r)?;
    for _ in 0..global_count {
        let component = decode_component_type_id(r)?;
        let value = codec_for(codecs, component)?.read(r)?;
        snapshot.globals.insert(component, value);
    }

    Ok(snapshot)
}

/// Compute the structural diff between `previous` and `current`.
///
/// `codecs` supplies [`crate::model::ValueCodec`]s for every component type
/// that appears as a unique component, shared instance, or global in either
/// snapshot; a type with no registered codec is an internal error, since it
/// means the caller captured a component this recorder cannot serialize.
pub fn compute_change_set<'a>(
    previous: &Snapshot,
    current: &'a Snapshot,
    codecs: &ValueCodecRegistry,
) -> Result<ChangeSet<'a>> {
    let mut change_set = ChangeSet::default();

    // Pass 1: entity identity.
    let entity_keys = union_keys(previous.entities.keys(), current.entities.keys());
    for entity in entity_keys {
        match (previous.entities.get(&entity), current.entities.get(&entity)) {
            (None, Some(record)) => {
                change_set.entities_added.push(EntityAdded { entity, record });
            }
            (Some(_), None) => {
                change_set.entities_removed.push(entity);
            }
            (Some(prev_record), Some(curr_record)) => {
                // Pass 2: unique components, only for entities present in both.
                diff_unique_components(entity, prev_record, curr_record, codecs, &mut change_set)?;
                diff_shared_refs(entity, prev_record, curr_record, previous, current, &mut change_set);
            }
            (None, None) => unreachable!("key came from the union of both maps"),
        }
    }

    // Pass 3: shared instance identity (added/removed instances themselves,
    // independent of who references them).
    let shared_keys = union_keys(
        previous.shared_instances.keys(),
        current.shared_instances.keys(),
    );
    for id in shared_keys {
        match (
            previous.shared_instances.get(&id),
            current.shared_instances.get(&id),
        ) {
            (None, Some(instance)) => {
                change_set.shared_instances_added.push(SharedInstanceAdded {
                    id,
                    type_id: instance.type_id,
                    name: instance.name.as_deref(),
                    value: instance.value.as_ref(),
                });
            }
            (Some(_), None) => {
                change_set.shared_instances_removed.push(id);
            }
            _ => {}
        }
    }

    // Pass 4: global singleton components.
    let global_keys = union_keys(previous.globals.keys(), current.globals.keys());
    for component in global_keys {
        let prev_value = previous.globals.get(&component);
        let curr_value = current.globals.get(&component);
        if let Some(change) = diff_value(component, prev_value, curr_value, codecs)? {
            change_set
                .global_changes
                .push(GlobalComponentChange { component, change });
        }
    }

    Ok(change_set)
}

fn diff_unique_components<'a>(
    entity: EntityId,
    previous: &EntityRecord,
    current: &'a EntityRecord,
    codecs: &ValueCodecRegistry,
    change_set: &mut ChangeSet<'a>,
) -> Result<()> {
    let keys = union_keys(previous.unique.keys(), current.unique.keys());
    for component in keys {
        let prev_value = previous.unique.get(&component);
        let curr_value = current.unique.get(&component);
        if let Some(change) = diff_value(component, prev_value, curr_value, codecs)? {
            change_set.unique_component_changes.push(UniqueComponentChange {
                entity,
                component,
                change,
            });
        }
    }
    Ok(())
}

fn diff_value<'a>(
    component: ComponentTypeId,
    prev_value: Option<&Box<dyn Any + Send + Sync>>,
    curr_value: Option<&'a Box<dyn Any + Send + Sync>>,
    codecs: &ValueCodecRegistry,
) -> Result<Option<ValueChange<'a>>> {
    match (prev_value, curr_value) {
        (None, Some(value)) => Ok(Some(ValueChange::Added(value.as_ref()))),
        (Some(_), None) => Ok(Some(ValueChange::Removed)),
        (Some(prev), Some(curr)) => {
            let codec = codecs.get(component).ok_or_else(|| DeltaStateError::ChangeSetInternal {
                reason: format!("no value codec registered for component {component:?}"),
            })?;
            if codec.values_equal(prev.as_ref(), curr.as_ref()) {
                Ok(None)
            } else {
                Ok(Some(ValueChange::Changed(curr.as_ref())))
            }
        }
        (None, None) => Ok(None),
    }
}

fn diff_shared_refs(
    entity: EntityId,
    previous_entity: &EntityRecord,
    current_entity: &EntityRecord,
    previous_snapshot: &Snapshot,
    current_snapshot: &Snapshot,
    change_set: &mut ChangeSet<'_>,
) {
    let keys = union_keys(previous_entity.shared.keys(), current_entity.shared.keys());
    for component in keys {
        let prev_ref = previous_entity.shared.get(&component).copied();
        let curr_ref = current_entity.shared.get(&component).copied();
        if shared_ref_changed(prev_ref, curr_ref, previous_snapshot, current_snapshot) {
            change_set.shared_ref_changes.push(SharedRefChange {
                entity,
                component,
                new_ref: curr_ref,
            });
        }
    }
}

/// Whether an entity's shared-instance reference for one component type
/// changed. Named instances compare by name; anonymous ones by raw id.
fn shared_ref_changed(
    prev_ref: Option<SharedInstanceId>,
    curr_ref: Option<SharedInstanceId>,
    previous_snapshot: &Snapshot,
    current_snapshot: &Snapshot,
) -> bool {
    match (prev_ref, curr_ref) {
        (None, None) => false,
        (Some(_), None) | (None, Some(_)) => true,
        (Some(prev_id), Some(curr_id)) => {
            let prev_name = previous_snapshot
                .shared_instances
                .get(&prev_id)
                .and_then(|i| i.name.as_deref());
            let curr_name = current_snapshot
                .shared_instances
                .get(&curr_id)
                .and_then(|i| i.name.as_deref());
            match (prev_name, curr_name) {
                (Some(p), Some(c)) => p != c,
                _ => prev_id != curr_id,
            }
        }
    }
}

fn union_keys<K: Ord + Copy, I1, I2>(a: I1, b: I2) -> Vec<K>
where
    I1: Iterator<Item = K>,
    I2: Iterator<Item = K>,
{
    let mut set: BTreeSet<K> = a.collect();
    set.extend(b);
    set.into_iter().collect()
}
