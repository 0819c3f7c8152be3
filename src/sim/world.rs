//! World Container
//!
//! The World owns every entity, the capability-type index, the hit query
//! engine, the skill effect queue, and the simulation clock. It is the
//! unit of snapshot serialization: everything a late joiner needs to
//! resume bit-identical simulation serializes from here.
//!
//! Only the simulation thread ever mutates a World.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::Fixed;
use crate::core::hash::{StateHash, StateHasher};
use crate::core::quat::FixedQuat;
use crate::core::rng::DeterministicRng;
use crate::core::vec3::FixedVec3;
use crate::sim::capability::{Capability, CapabilityTypeId};
use crate::sim::component::{Component, ComponentKind};
use crate::sim::effects::{EffectHandlerRegistry, SkillEffectQueue};
use crate::sim::entity::{CapabilityState, Entity, EntityId};
use crate::hitquery::engine::HitQueryEngine;
use crate::sync::input::OneFrameInputs;

/// Errors from world structure operations.
#[derive(Debug, Error)]
pub enum WorldError {
    /// No entity with this id was ever created.
    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),
    /// The entity exists but has been destroyed.
    #[error("entity {0} is destroyed")]
    EntityDestroyed(EntityId),
    /// A component of this kind is already attached.
    #[error("entity {0} already has a {1:?} component")]
    DuplicateComponent(EntityId, ComponentKind),
    /// No component of this kind is attached.
    #[error("entity {0} has no {1:?} component")]
    MissingComponent(EntityId, ComponentKind),
    /// The capability type is already attached.
    #[error("entity {0} already has capability {1:?}")]
    DuplicateCapability(EntityId, CapabilityTypeId),
    /// The capability type is not attached.
    #[error("entity {0} has no capability {1:?}")]
    MissingCapability(EntityId, CapabilityTypeId),
}

/// The simulation world.
///
/// Uses BTreeMap throughout for deterministic iteration order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct World {
    /// All entities ever created, including destroyed ones (their record
    /// is kept so ids are never reused).
    entities: BTreeMap<EntityId, Entity>,

    /// Next entity id to allocate. Monotonic.
    next_entity_id: u64,

    /// capability type id -> entities that own it. Derived from the
    /// entities themselves; rebuilt, never trusted, after deserialization.
    #[serde(skip)]
    capability_index: BTreeMap<CapabilityTypeId, BTreeSet<EntityId>>,

    /// Spatial hit-query engine. Proxy shapes and the per-skill dedup sets
    /// are replicated state; proxy transforms are re-synced from entity
    /// transforms after deserialization.
    pub hit_query: HitQueryEngine,

    /// Deferred skill effects, flushed once per frame.
    pub effects: SkillEffectQueue,

    /// Deterministic RNG. Serialized so a restored world resumes the
    /// exact random stream.
    pub rng: DeterministicRng,

    /// The seed the RNG was created from (for verification/replay).
    pub seed: u64,

    /// Fixed timestep per frame (seconds, Q16.16).
    pub delta_time: Fixed,

    /// Accumulated simulation time (seconds, Q16.16).
    pub total_time: Fixed,

    /// The frame about to be simulated.
    pub frame: u32,
}

impl World {
    /// Create an empty world.
    pub fn new(seed: u64, delta_time: Fixed) -> Self {
        Self {
            entities: BTreeMap::new(),
            next_entity_id: 1,
            capability_index: BTreeMap::new(),
            hit_query: HitQueryEngine::new(),
            effects: SkillEffectQueue::new(),
            rng: DeterministicRng::new(seed),
            seed,
            delta_time,
            total_time: 0,
            frame: 0,
        }
    }

    // =========================================================================
    // Entity lifecycle
    // =========================================================================

    /// Create a new entity. Ids are allocated monotonically and never
    /// reused, even after destruction.
    pub fn spawn_entity(&mut self, name: impl Into<String>) -> EntityId {
        let id = EntityId(self.next_entity_id);
        self.next_entity_id += 1;
        self.entities.insert(id, Entity::new(id, name));
        id
    }

    /// Destroy an entity: clears its components and capability state,
    /// removes it from all indices, and marks it destroyed. The record is
    /// retained so the id is never reused.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), WorldError> {
        let (owned_caps, parent, children) = {
            let entity = self.live_entity(id)?;
            (
                entity.capability_states.keys().copied().collect::<Vec<_>>(),
                entity.parent,
                entity.children.clone(),
            )
        };

        for type_id in owned_caps {
            if let Some(set) = self.capability_index.get_mut(&type_id) {
                set.remove(&id);
                if set.is_empty() {
                    self.capability_index.remove(&type_id);
                }
            }
        }

        if let Some(parent_id) = parent {
            if let Some(parent) = self.entities.get_mut(&parent_id) {
                parent.children.remove(&id);
            }
        }
        for child_id in children {
            if let Some(child) = self.entities.get_mut(&child_id) {
                child.parent = None;
            }
        }

        self.hit_query.unregister_entity(id);

        if let Some(entity) = self.entities.get_mut(&id) {
            entity.clear_on_destroy();
        }
        Ok(())
    }

    /// Get an entity (including destroyed records).
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Get an entity mutably.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// Iterate all entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Number of live (non-destroyed) entities.
    pub fn live_entity_count(&self) -> usize {
        self.entities.values().filter(|e| !e.destroyed).count()
    }

    fn live_entity(&self, id: EntityId) -> Result<&Entity, WorldError> {
        let entity = self.entities.get(&id).ok_or(WorldError::UnknownEntity(id))?;
        if entity.destroyed {
            return Err(WorldError::EntityDestroyed(id));
        }
        Ok(entity)
    }

    fn live_entity_mut(&mut self, id: EntityId) -> Result<&mut Entity, WorldError> {
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or(WorldError::UnknownEntity(id))?;
        if entity.destroyed {
            return Err(WorldError::EntityDestroyed(id));
        }
        Ok(entity)
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Attach a component. At most one component per kind: attaching a
    /// second of the same kind is an error (detach first).
    pub fn attach_component(&mut self, id: EntityId, component: Component) -> Result<(), WorldError> {
        let kind = component.kind();
        let entity = self.live_entity_mut(id)?;
        if entity.components.contains_key(&kind) {
            return Err(WorldError::DuplicateComponent(id, kind));
        }
        entity.components.insert(kind, component);
        Ok(())
    }

    /// Detach and return a component.
    pub fn detach_component(
        &mut self,
        id: EntityId,
        kind: ComponentKind,
    ) -> Result<Component, WorldError> {
        let entity = self.live_entity_mut(id)?;
        entity
            .components
            .remove(&kind)
            .ok_or(WorldError::MissingComponent(id, kind))
    }

    // =========================================================================
    // Capabilities
    // =========================================================================

    /// Attach a capability type: creates the per-entity `CapabilityState`
    /// and indexes the entity under the type id.
    pub fn attach_capability(
        &mut self,
        id: EntityId,
        capability: &dyn Capability,
    ) -> Result<(), WorldError> {
        let type_id = capability.type_id();
        let entity = self.live_entity_mut(id)?;
        if entity.capability_states.contains_key(&type_id) {
            return Err(WorldError::DuplicateCapability(id, type_id));
        }
        entity
            .capability_states
            .insert(type_id, CapabilityState::default());
        self.capability_index.entry(type_id).or_default().insert(id);
        Ok(())
    }

    /// Detach a capability type: removes the state entry and the index
    /// entry together, preserving the state-iff-owned invariant.
    pub fn detach_capability(
        &mut self,
        id: EntityId,
        type_id: CapabilityTypeId,
    ) -> Result<(), WorldError> {
        let entity = self.live_entity_mut(id)?;
        if entity.capability_states.remove(&type_id).is_none() {
            return Err(WorldError::MissingCapability(id, type_id));
        }
        if let Some(set) = self.capability_index.get_mut(&type_id) {
            set.remove(&id);
            if set.is_empty() {
                self.capability_index.remove(&type_id);
            }
        }
        Ok(())
    }

    /// Entities currently owning a capability type, in id order.
    pub fn entities_with_capability(&self, type_id: CapabilityTypeId) -> Vec<EntityId> {
        self.capability_index
            .get(&type_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // =========================================================================
    // Parent / child
    // =========================================================================

    /// Set an entity's parent, updating both sides of the relation.
    pub fn set_parent(&mut self, child: EntityId, parent: EntityId) -> Result<(), WorldError> {
        self.live_entity(child)?;
        self.live_entity(parent)?;

        self.clear_parent(child)?;
        if let Some(entity) = self.entities.get_mut(&child) {
            entity.parent = Some(parent);
        }
        if let Some(entity) = self.entities.get_mut(&parent) {
            entity.children.insert(child);
        }
        Ok(())
    }

    /// Clear an entity's parent, if it has one.
    pub fn clear_parent(&mut self, child: EntityId) -> Result<(), WorldError> {
        let old_parent = self.live_entity(child)?.parent;
        if let Some(parent_id) = old_parent {
            if let Some(parent) = self.entities.get_mut(&parent_id) {
                parent.children.remove(&child);
            }
        }
        if let Some(entity) = self.entities.get_mut(&child) {
            entity.parent = None;
        }
        Ok(())
    }

    // =========================================================================
    // Input routing
    // =========================================================================

    /// Route a completed frame's inputs into the matching player-input
    /// components. Called immediately before ticking that frame.
    ///
    /// A player absent from the frame (disconnected) gets an idle input -
    /// their entity keeps simulating with no commands.
    pub fn apply_inputs_to_entities(&mut self, frame_inputs: &OneFrameInputs) {
        let frame = frame_inputs.frame;
        for entity in self.entities.values_mut() {
            if entity.destroyed {
                continue;
            }
            if let Some(component) = entity.components.get_mut(&ComponentKind::PlayerInput) {
                if let Some(input_comp) = component.as_player_input_mut() {
                    input_comp.input = match frame_inputs.get(input_comp.player) {
                        Some(input) => input.clone(),
                        None => crate::sync::input::LSInput::idle(input_comp.player, frame),
                    };
                }
            }
        }
    }

    // =========================================================================
    // Effect flush
    // =========================================================================

    /// Drain the skill effect queue, applying every effect in arrival
    /// order. Effects enqueued by a handler during the flush are applied
    /// in this same flush; the queue is empty when this returns.
    ///
    /// A faulty effect (missing target, unknown config or handler, handler
    /// error) is logged and dropped without aborting the rest.
    pub fn flush_effects(&mut self, registry: &EffectHandlerRegistry) {
        while let Some(effect) = self.effects.pop_front() {
            let Some(config) = registry.config(effect.effect_id) else {
                tracing::warn!(effect_id = effect.effect_id, "dropping effect with unknown config");
                continue;
            };
            let Some(handler) = registry.handler(&config.effect_type) else {
                tracing::warn!(
                    effect_type = %config.effect_type,
                    "dropping effect with unknown handler"
                );
                continue;
            };
            let config = config.clone();
            if let Err(error) = handler(self, &effect, &config) {
                tracing::warn!(
                    caster = %effect.caster,
                    target = %effect.target,
                    %error,
                    "effect failed, dropped"
                );
            }
        }
    }

    // =========================================================================
    // Transforms
    // =========================================================================

    /// Current world transform of an entity, if it has one.
    pub fn transform_of(&self, id: EntityId) -> Option<(FixedVec3, FixedQuat)> {
        self.entities
            .get(&id)
            .and_then(|e| e.component(ComponentKind::Transform))
            .and_then(|c| c.as_transform())
            .map(|t| (t.position, t.rotation))
    }

    // =========================================================================
    // Hashing
    // =========================================================================

    /// Hash the full world state for divergence detection.
    pub fn state_hash(&self) -> StateHash {
        let mut hasher = StateHasher::for_world_state();
        hasher.update_u32(self.frame);
        hasher.update_u64(self.seed);
        hasher.update_fixed(self.delta_time);
        hasher.update_fixed(self.total_time);

        // RNG state is replicated state: two worlds with identical entities
        // but diverged RNG streams are not the same world.
        if let Ok(rng_bytes) = bincode::serialize(&self.rng) {
            hasher.update_bytes(&rng_bytes);
        }

        for entity in self.entities.values() {
            entity.hash_into(&mut hasher);
        }

        self.hit_query.hash_into(&mut hasher);
        hasher.finalize()
    }

    /// Hash a single entity's state.
    pub fn entity_hash(&self, id: EntityId) -> Option<StateHash> {
        self.entities.get(&id).map(|entity| {
            let mut hasher = StateHasher::for_world_state();
            entity.hash_into(&mut hasher);
            hasher.finalize()
        })
    }

    // =========================================================================
    // Derived state
    // =========================================================================

    /// Rebuild derived state after deserializing a snapshot.
    ///
    /// The capability index and the hit proxies' cached transforms are not
    /// trusted across serialization: the index is rebuilt from the entities
    /// and every proxy is re-synced to its entity's current transform.
    pub fn rebuild_derived(&mut self) {
        self.capability_index.clear();
        let mut moved: Vec<(EntityId, FixedVec3, FixedQuat)> = Vec::new();

        for entity in self.entities.values() {
            if entity.destroyed {
                continue;
            }
            for type_id in entity.capability_states.keys() {
                self.capability_index
                    .entry(*type_id)
                    .or_default()
                    .insert(entity.id);
            }
            if let Some(transform) = entity
                .component(ComponentKind::Transform)
                .and_then(|c| c.as_transform())
            {
                moved.push((entity.id, transform.position, transform.rotation));
            }
        }

        for (id, position, rotation) in moved {
            if self.hit_query.is_registered(id) {
                self.hit_query.update_entity_transform(id, position, rotation);
            }
        }
    }
}
