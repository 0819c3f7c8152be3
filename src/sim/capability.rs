//! Capability Definitions
//!
//! A capability is a stateless, globally shared behavior unit: a stable
//! type id, a priority, a set of tags, and the activation/tick callbacks.
//! Per-entity mutable state lives in `CapabilityState` on the entity, never
//! inside the capability object, which is what keeps capabilities safely
//! shared and the per-entity state serializable for rollback.
//!
//! The registry is an explicit table built once at startup and handed to
//! the scheduler - there is no reflection and no global mutable state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sim::component::ComponentKind;
use crate::sim::entity::EntityId;
use crate::sim::world::World;

/// Stable identifier for a capability type. Must be unique within a
/// registry and identical across peers.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct CapabilityTypeId(pub u16);

/// Fault raised by a capability tick. The scheduler logs it and skips only
/// that (entity, capability) unit for the frame.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// A component the capability requires is not attached.
    #[error("entity {0} is missing component {1:?}")]
    MissingComponent(EntityId, ComponentKind),
    /// Any other per-unit logic fault.
    #[error("{0}")]
    Logic(String),
}

/// A stateless behavior unit evaluated every frame for each entity that
/// owns it.
///
/// Implementations must be deterministic: given the same world state they
/// must make the same decisions on every peer. Mutable per-entity data
/// belongs in components or `CapabilityState`, never in `self`.
pub trait Capability: Send + Sync {
    /// Stable type id, unique within a registry.
    fn type_id(&self) -> CapabilityTypeId;

    /// Name for logging.
    fn name(&self) -> &'static str;

    /// Higher priority runs first. Ties break on type id, ascending.
    fn priority(&self) -> i32 {
        0
    }

    /// Tags this capability belongs to. Disabling any of them on an entity
    /// blocks activation and forces deactivation.
    fn tags(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether the scheduler accumulates active/inactive durations in the
    /// entity's `CapabilityState`.
    fn tracks_duration(&self) -> bool {
        false
    }

    /// Should this capability become active on the entity this frame?
    fn should_activate(&self, world: &World, entity: EntityId) -> bool;

    /// Should this capability stop being active on the entity this frame?
    fn should_deactivate(&self, world: &World, entity: EntityId) -> bool;

    /// Fired on the Inactive -> Active transition.
    fn on_activate(&self, _world: &mut World, _entity: EntityId) {}

    /// Fired on the Active -> Inactive transition.
    fn on_deactivate(&self, _world: &mut World, _entity: EntityId) {}

    /// Runs once per frame while active. An `Err` is logged and isolated;
    /// implementations should validate before mutating so a failed tick
    /// leaves the world unchanged.
    fn tick(&self, world: &mut World, entity: EntityId) -> Result<(), CapabilityError>;
}

/// Error building a capability registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two capabilities claimed the same type id.
    #[error("duplicate capability type id {0:?}")]
    DuplicateTypeId(CapabilityTypeId),
}

/// The fixed, ordered capability table.
///
/// Built once at startup from an explicit list. Iteration order is
/// priority-descending with type-id tie-break, identical on every peer -
/// the scheduler's determinism depends on it.
pub struct CapabilityRegistry {
    ordered: Vec<Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Build the registry. Sorts by priority descending, tie-breaking on
    /// type id ascending; rejects duplicate type ids.
    pub fn new(mut capabilities: Vec<Arc<dyn Capability>>) -> Result<Self, RegistryError> {
        capabilities.sort_by_key(|cap| (-(cap.priority() as i64), cap.type_id()));

        for pair in capabilities.windows(2) {
            if pair[0].type_id() == pair[1].type_id() {
                return Err(RegistryError::DuplicateTypeId(pair[0].type_id()));
            }
        }

        Ok(Self { ordered: capabilities })
    }

    /// Look up a capability by type id.
    pub fn get(&self, type_id: CapabilityTypeId) -> Option<&Arc<dyn Capability>> {
        self.ordered.iter().find(|cap| cap.type_id() == type_id)
    }

    /// Iterate capabilities in scheduling order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Capability>> {
        self.ordered.iter()
    }

    /// Number of registered capabilities.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}
