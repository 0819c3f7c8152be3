//! Entity Definitions
//!
//! Entities own their components and per-capability state. They refer to
//! other entities only by id (parent/children), so the entity graph is
//! acyclic by construction and serializes without pointer chasing.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::fixed::Fixed;
use crate::core::hash::StateHasher;
use crate::sim::capability::CapabilityTypeId;
use crate::sim::component::{Component, ComponentKind};

/// Unique entity identifier. Monotonically increasing, never reused.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// Id of whoever disabled a tag (an entity, a skill instance, a system).
/// Tags stay disabled until every instigator clears its disable.
pub type InstigatorId = u64;

/// Per-entity mutable state for one capability type.
///
/// Capabilities themselves are stateless and globally shared; everything
/// that varies per entity lives here so it serializes with the world.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityState {
    /// Whether the capability is currently active on this entity.
    pub is_active: bool,
    /// Accumulated time active (only if the capability tracks duration).
    pub active_duration: Fixed,
    /// Accumulated time inactive (only if the capability tracks duration).
    pub deactive_duration: Fixed,
}

impl CapabilityState {
    /// Reset both duration counters.
    pub fn reset_durations(&mut self) {
        self.active_duration = 0;
        self.deactive_duration = 0;
    }
}

/// A simulation entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique id, assigned by the World.
    pub id: EntityId,
    /// Display name (diagnostics and logging).
    pub name: String,
    /// Inactive entities are skipped by the scheduler.
    pub active: bool,
    /// Set on destruction; the record is kept so the id is never reused.
    pub destroyed: bool,
    /// Owned components, at most one per kind.
    pub(crate) components: BTreeMap<ComponentKind, Component>,
    /// Per-capability mutable state. An entry exists iff the entity
    /// currently owns that capability type.
    pub(crate) capability_states: BTreeMap<CapabilityTypeId, CapabilityState>,
    /// tag -> instigators currently disabling it.
    pub(crate) disabled_tags: BTreeMap<String, BTreeSet<InstigatorId>>,
    /// Parent entity, if any.
    pub parent: Option<EntityId>,
    /// Child entities.
    pub children: BTreeSet<EntityId>,
}

impl Entity {
    /// Create a fresh entity. Use `World::spawn_entity` instead of calling
    /// this directly - the World allocates the id.
    pub(crate) fn new(id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            active: true,
            destroyed: false,
            components: BTreeMap::new(),
            capability_states: BTreeMap::new(),
            disabled_tags: BTreeMap::new(),
            parent: None,
            children: BTreeSet::new(),
        }
    }

    /// Get a component by kind.
    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.get(&kind)
    }

    /// Get a component mutably by kind.
    pub fn component_mut(&mut self, kind: ComponentKind) -> Option<&mut Component> {
        self.components.get_mut(&kind)
    }

    /// Whether a component of this kind is attached.
    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.components.contains_key(&kind)
    }

    /// Iterate components in kind order (deterministic).
    pub fn components(&self) -> impl Iterator<Item = (&ComponentKind, &Component)> {
        self.components.iter()
    }

    /// Whether this entity currently owns a capability type.
    pub fn has_capability(&self, type_id: CapabilityTypeId) -> bool {
        self.capability_states.contains_key(&type_id)
    }

    /// Per-entity state for a capability type.
    pub fn capability_state(&self, type_id: CapabilityTypeId) -> Option<&CapabilityState> {
        self.capability_states.get(&type_id)
    }

    /// Mutable per-entity state for a capability type.
    pub fn capability_state_mut(
        &mut self,
        type_id: CapabilityTypeId,
    ) -> Option<&mut CapabilityState> {
        self.capability_states.get_mut(&type_id)
    }

    /// Disable a tag on behalf of an instigator. Stacks: the tag stays
    /// disabled until every instigator enables it again.
    pub fn disable_tag(&mut self, tag: &str, instigator: InstigatorId) {
        self.disabled_tags
            .entry(tag.to_string())
            .or_default()
            .insert(instigator);
    }

    /// Remove one instigator's disable on a tag. The tag becomes enabled
    /// once the last instigator is removed.
    pub fn enable_tag(&mut self, tag: &str, instigator: InstigatorId) {
        if let Some(instigators) = self.disabled_tags.get_mut(tag) {
            instigators.remove(&instigator);
            if instigators.is_empty() {
                self.disabled_tags.remove(tag);
            }
        }
    }

    /// Whether a tag is currently disabled by anyone.
    pub fn is_tag_disabled(&self, tag: &str) -> bool {
        self.disabled_tags
            .get(tag)
            .is_some_and(|instigators| !instigators.is_empty())
    }

    /// Whether any of the given tags is disabled.
    pub fn any_tag_disabled(&self, tags: &[&str]) -> bool {
        tags.iter().any(|tag| self.is_tag_disabled(tag))
    }

    /// Clear all components and capability state. Called on destruction;
    /// the entity record itself stays so the id is never reused.
    pub(crate) fn clear_on_destroy(&mut self) {
        self.destroyed = true;
        self.active = false;
        self.components.clear();
        self.capability_states.clear();
        self.disabled_tags.clear();
        self.parent = None;
        self.children.clear();
    }

    /// Feed this entity's state into a hasher, field by field, in a fixed
    /// order. BTreeMap iteration keeps the order identical on every peer.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u64(self.id.0);
        hasher.update_str(&self.name);
        hasher.update_bool(self.active);
        hasher.update_bool(self.destroyed);

        hasher.update_u64(self.parent.map(|p| p.0).unwrap_or(u64::MAX));
        hasher.update_u32(self.children.len() as u32);
        for child in &self.children {
            hasher.update_u64(child.0);
        }

        hasher.update_u32(self.components.len() as u32);
        for (kind, component) in &self.components {
            hasher.update_u8(*kind as u8);
            match component {
                Component::Transform(t) => {
                    hasher.update_vec3(t.position);
                    hasher.update_fixed(t.rotation.x);
                    hasher.update_fixed(t.rotation.y);
                    hasher.update_fixed(t.rotation.z);
                    hasher.update_fixed(t.rotation.w);
                }
                Component::Velocity(v) => hasher.update_vec3(v.linear),
                Component::Health(h) => {
                    hasher.update_fixed(h.current);
                    hasher.update_fixed(h.max);
                }
                Component::Movement(m) => hasher.update_fixed(m.speed),
                Component::PlayerInput(p) => {
                    hasher.update_u32(p.player.0);
                    hasher.update_u32(p.input.frame);
                    hasher.update_fixed(p.input.move_vec.x);
                    hasher.update_fixed(p.input.move_vec.y);
                    hasher.update_u32(p.input.flags);
                }
            }
        }

        hasher.update_u32(self.capability_states.len() as u32);
        for (type_id, state) in &self.capability_states {
            hasher.update_u32(type_id.0 as u32);
            hasher.update_bool(state.is_active);
            hasher.update_fixed(state.active_duration);
            hasher.update_fixed(state.deactive_duration);
        }

        hasher.update_u32(self.disabled_tags.len() as u32);
        for (tag, instigators) in &self.disabled_tags {
            hasher.update_str(tag);
            hasher.update_u32(instigators.len() as u32);
            for instigator in instigators {
                hasher.update_u64(*instigator);
            }
        }
    }
}
