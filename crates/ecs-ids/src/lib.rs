//! Entity and component identity primitives shared by ECS-adjacent crates.
//!
//! This crate provides the building blocks a delta-state serializer needs to
//! talk about entities and components without depending on a concrete ECS
//! runtime: generational [`entity::EntityId`]s handed out by an
//! [`entity::EntityAllocator`], and a name-stable [`component::ComponentRegistry`]
//! mapping Rust types to small integer [`component::ComponentTypeId`]s.
//!
//! It intentionally does not include archetype storage, queries, or a command
//! buffer -- those belong to a full ECS runtime, not to the identity layer a
//! serializer sits on top of.

pub mod component;
pub mod entity;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by identity-layer operations.
#[derive(Debug, thiserror::Error)]
pub enum EcsError {
    /// The entity does not exist (stale generation or never allocated).
    #[error("entity {entity:?} does not exist (stale or never allocated)")]
    StaleEntity { entity: entity::EntityId },

    /// A component type was referenced that has not been registered.
    #[error("component type '{name}' not registered. Registered components: [{registered}]")]
    UnknownComponent { name: String, registered: String },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{ComponentInfo, ComponentRegistry, ComponentTypeId};
    pub use crate::entity::{EntityAllocator, EntityId};
    pub use crate::EcsError;
}
