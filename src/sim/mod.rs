//! Deterministic simulation: entities, components, capabilities, the
//! per-frame scheduler, and the deferred effect queue.

pub mod capabilities;
pub mod capability;
pub mod component;
pub mod effects;
pub mod entity;
pub mod scheduler;
pub mod world;

pub use capabilities::{MeleeAttackCapability, MovementCapability};
pub use capability::{Capability, CapabilityError, CapabilityRegistry, CapabilityTypeId};
pub use component::{Component, ComponentKind};
pub use effects::{EffectHandlerRegistry, SkillEffectConfig, SkillEffectData, SkillEffectQueue};
pub use entity::{CapabilityState, Entity, EntityId, InstigatorId};
pub use scheduler::{run_frame, step_world};
pub use world::{World, WorldError};
