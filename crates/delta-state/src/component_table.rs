//! Component name table: cross-process identity remapping.
//!
//! A [`ComponentTypeId`] is only stable within the [`ecs_ids::component::ComponentRegistry`]
//! that assigned it -- two process instances that register the same
//! component types in a different order end up with different raw ids for
//! the same name. Every registered component carries a stable user-assigned
//! name (its registration name), so a recorder writes a `(raw_id, name)`
//! table once per session, in a size-prefixed header ahead of the first
//! recorded state; a replayer reads it back, resolves each name against its
//! *own*, independently-populated registry, and builds a [`ComponentIdRemap`]
//! translating every raw id the stream uses to the id the replaying process
//! actually assigned that name. Every decoded snapshot or change-set is
//! remapped through this table before anything else touches it, so replay is
//! correct even when recorder and replayer never agree on registration order.

use std::collections::BTreeMap;

use ecs_ids::component::{ComponentRegistry, ComponentTypeId};

use crate::change_set::DecodedChangeSet;
use crate::error::{DeltaStateError, Result};
use crate::instrument::{ReadInstrument, WriteInstrument};
use crate::model::{EntityRecord, Snapshot};
use crate::varint;

/// Write every component registered in `registry` as a `(raw_id, name)` pair.
pub fn encode_component_table(registry: &ComponentRegistry, w: &mut dyn WriteInstrument) -> Result<()> {
    varint::encode_unsigned(registry.len() as u64, w)?;
    for raw in 0..registry.len() as u32 {
        let id = ComponentTypeId::from_raw(raw);
        let info = registry
            .get_info(id)
            .expect("raw ids below a registry's len are always registered");
        varint::encode_unsigned(raw as u64, w)?;
        varint::encode_unsigned(info.name.len() as u64, w)?;
        w.write(info.name.as_bytes())?;
    }
    Ok(())
}

/// Translates a raw `ComponentTypeId` as written by a recorder's registry
/// into the id the replaying process's own registry assigned to the same
/// name.
pub struct ComponentIdRemap {
    table: BTreeMap<u32, ComponentTypeId>,
}

impl ComponentIdRemap {
    fn resolve(&self, component: ComponentTypeId) -> Result<ComponentTypeId> {
        self.table
            .get(&component.to_raw())
            .copied()
            .ok_or_else(|| DeltaStateError::FooterCorrupt {
                reason: format!(
                    "recorded component id {} has no matching name in this replayer's component table",
                    component.to_raw()
                ),
            })
    }
}

/// Read a table previously written by [`encode_component_table`], resolving
/// every recorded name against `registry`.
pub fn decode_component_table(registry: &ComponentRegistry, r: &mut dyn ReadInstrument) -> Result<ComponentIdRemap> {
    let count = varint::decode_unsigned(r)?;
    let mut table = BTreeMap::new();
    for _ in 0..count {
        let raw = varint::decode_unsigned(r)? as u32;
        let len = varint::decode_unsigned(r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_always(&mut buf)?;
        let name = String::from_utf8(buf).map_err(|_| DeltaStateError::FooterCorrupt {
            reason: "component table entry is not valid UTF-8".to_owned(),
        })?;
        let local_id = registry.lookup_by_name(&name).ok_or_else(|| DeltaStateError::FooterCorrupt {
            reason: format!("component '{name}' is not registered in this replayer's registry"),
        })?;
        table.insert(raw, local_id);
    }
    Ok(ComponentIdRemap { table })
}

fn remap_component_map<V>(
    map: std::collections::BTreeMap<ComponentTypeId, V>,
    remap: &ComponentIdRemap,
) -> Result<std::collections::BTreeMap<ComponentTypeId, V>> {
    map.into_iter().map(|(k, v)| Ok((remap.resolve(k)?, v))).collect()
}

fn remap_entity_record(record: &mut EntityRecord, remap: &ComponentIdRemap) -> Result<()> {
    record.unique = remap_component_map(std::mem::take(&mut record.unique), remap)?;
    record.shared = remap_component_map(std::mem::take(&mut record.shared), remap)?;
    Ok(())
}

/// Remap every component id embedded in a decoded [`Snapshot`] in place.
pub fn remap_snapshot(snapshot: &mut Snapshot, remap: &ComponentIdRemap) -> Result<()> {
    for record in snapshot.entities.values_mut() {
        remap_entity_record(record, remap)?;
    }
    for instance in snapshot.shared_instances.values_mut() {
        instance.type_id = remap.resolve(instance.type_id)?;
    }
    snapshot.globals = remap_component_map(std::mem::take(&mut snapshot.globals), remap)?;
    Ok(())
}

/// Remap every component id embedded in a decoded [`DecodedChangeSet`] in place.
pub fn remap_decoded_change_set(change_set: &mut DecodedChangeSet, remap: &ComponentIdRemap) -> Result<()> {
    for (_, record) in change_set.entities_added.iter_mut() {
        remap_entity_record(record, remap)?;
    }
    for (_, component, _) in change_set.unique_component_changes.iter_mut() {
        *component = remap.resolve(*component)?;
    }
    for (_, instance) in change_set.shared_instances_added.iter_mut() {
        instance.type_id = remap.resolve(instance.type_id)?;
    }
    for (_, component, _) in change_set.shared_ref_changes.iter_mut() {
        *component = remap.resolve(*component)?;
    }
    for (component, _) in change_set.global_changes.iter_mut() {
        *component = remap.resolve(*component)?;
    }
    Ok(())
}
