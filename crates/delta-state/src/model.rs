//! In-memory representation of an ECS world snapshot.
//!
//! A [`Snapshot`] is everything the change-set computer and applier need to
//! know about one point in time: which entities exist, what unique
//! components each one owns, which shared component instances are interned
//! and which entities reference them, and the global singleton components.
//! It deliberately does not model a live, queryable ECS world -- no
//! archetype storage, no systems, no command buffer. Those belong to the
//! runtime this crate's change-sets get applied to; a `Snapshot` is the
//! "what changed" unit, not the "how it's stored while running" unit.
//!
//! Component values are held as `Box<dyn Any + Send + Sync>` and never
//! inspected directly by this crate. Everything that needs to compare,
//! encode, or decode a value goes through an injected [`ValueCodec`],
//! looked up in a [`ValueCodecRegistry`] by [`ComponentTypeId`]. This
//! stands in for a full reflection system: a real embedding would generate
//! one codec per component type (e.g. via a derive macro), but this crate
//! only needs the capability, not a concrete reflection implementation.

use std::any::Any;
use std::collections::BTreeMap;
use std::marker::PhantomData;

use ecs_ids::component::ComponentTypeId;
use ecs_ids::entity::EntityId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{DeltaStateError, Result};
use crate::instrument::{ReadInstrument, WriteInstrument};
use crate::varint;

/// Identifies one interned shared component instance within a [`Snapshot`].
/// Stable only within the snapshot that produced it; a replayed snapshot
/// may assign different ids for semantically identical instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SharedInstanceId(pub u32);

/// Encodes, decodes, and compares component values of one [`ComponentTypeId`]
/// without this crate knowing the concrete Rust type.
pub trait ValueCodec: Send + Sync {
    /// The component type this codec handles.
    fn type_id(&self) -> ComponentTypeId;

    /// Serialize `value` to `w`. `value` must be an instance of the type
    /// this codec was constructed for.
    fn write(&self, value: &dyn Any, w: &mut dyn WriteInstrument) -> Result<()>;

    /// Deserialize a value of this codec's type from `r`.
    fn read(&self, r: &mut dyn ReadInstrument) -> Result<Box<dyn Any + Send + Sync>>;

    /// Structural equality between two values of this codec's type. Used by
    /// the change-set computer to decide whether a component actually
    /// changed or merely has a new `Box` identity.
    fn values_equal(&self, a: &dyn Any, b: &dyn Any) -> bool;
}

/// A [`ValueCodec`] for any type with a `serde`/`bincode`-compatible
/// representation and value equality.
pub struct BincodeCodec<T> {
    type_id: ComponentTypeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    /// Build a codec bound to `type_id`.
    pub fn new(type_id: ComponentTypeId) -> Self {
        Self {
            type_id,
            _marker: PhantomData,
        }
    }
}

impl<T> ValueCodec for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    fn type_id(&self) -> ComponentTypeId {
        self.type_id
    }

    fn write(&self, value: &dyn Any, w: &mut dyn WriteInstrument) -> Result<()> {
        let value = value.downcast_ref::<T>().ok_or_else(|| {
            DeltaStateError::ChangeSetInternal {
                reason: "value codec invoked with a value of the wrong Rust type".to_owned(),
            }
        })?;
        let bytes = bincode::serialize(value).map_err(|_| DeltaStateError::IoFailure {
            operation: "value codec encode",
        })?;
        varint::encode_unsigned(bytes.len() as u64, w)?;
        w.write(&bytes)
    }

    fn read(&self, r: &mut dyn ReadInstrument) -> Result<Box<dyn Any + Send + Sync>> {
        let len = varint::decode_unsigned(r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_always(&mut buf)?;
        let value: T = bincode::deserialize(&buf).map_err(|_| DeltaStateError::IoFailure {
            operation: "value codec decode",
        })?;
        Ok(Box::new(value))
    }

    fn values_equal(&self, a: &dyn Any, b: &dyn Any) -> bool {
        match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

/// Looks up a [`ValueCodec`] by [`ComponentTypeId`]. Kept separate from
/// [`ecs_ids::component::ComponentRegistry`] because identity registration
/// and codec registration can have different lifetimes (a codec may be
/// swapped out between versions while the type id stays stable).
#[derive(Default)]
pub struct ValueCodecRegistry {
    codecs: BTreeMap<ComponentTypeId, Box<dyn ValueCodec>>,
}

impl ValueCodecRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `codec`, replacing any previous codec for the same type id.
    pub fn register(&mut self, codec: Box<dyn ValueCodec>) {
        self.codecs.insert(codec.type_id(), codec);
    }

    /// Look up the codec for `type_id`.
    pub fn get(&self, type_id: ComponentTypeId) -> Option<&dyn ValueCodec> {
        self.codecs.get(&type_id).map(|c| c.as_ref())
    }
}

/// A single entity's unique (non-shared) component values, keyed by type.
pub type UniqueComponents = BTreeMap<ComponentTypeId, Box<dyn Any + Send + Sync>>;

/// One entity's record within a [`Snapshot`]: its unique components and the
/// shared instances it references.
#[derive(Default)]
pub struct EntityRecord {
    /// Unique (not interned) component values owned by this entity.
    pub unique: UniqueComponents,
    /// Shared component instances this entity references, by component type.
    pub shared: BTreeMap<ComponentTypeId, SharedInstanceId>,
}

/// An interned shared component instance. Multiple entities may reference
/// the same instance id for the same component type.
pub struct SharedInstance {
    /// The component type this instance is an example of.
    pub type_id: ComponentTypeId,
    /// An optional stable name, used when a shared instance must be
    /// addressable across recordings (e.g. a named material or prefab)
    /// rather than only by its snapshot-local id.
    pub name: Option<String>,
    /// The value itself.
    pub value: Box<dyn Any + Send + Sync>,
}

/// A full point-in-time capture of an ECS world, structured the way the
/// change-set computer needs it: entity identity, per-entity unique
/// components, interned shared instances, and global singletons.
#[derive(Default)]
pub struct Snapshot {
    /// Live entities, by id.
    pub entities: BTreeMap<EntityId, EntityRecord>,
    /// Interned shared component instances, by snapshot-local id.
    pub shared_instances: BTreeMap<SharedInstanceId, SharedInstance>,
    /// Global singleton components, one value per registered type.
    pub globals: BTreeMap<ComponentTypeId, Box<dyn Any + Send + Sync>>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `entity` exists in this snapshot.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains_key(&entity)
    }
}
