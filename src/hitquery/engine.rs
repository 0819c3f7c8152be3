//! Hit Query Engine
//!
//! Spatial overlap queries for skills. Entities register collision proxies
//! (their shapes plus a cached transform); a skill asks "which proxies does
//! this volume overlap right now" and gets entity ids back in id order.
//!
//! The engine also owns the per-skill-instance dedup sets: a multi-frame
//! swing queries every frame but must report each victim exactly once, so
//! each active skill instance keeps the set of entities it has already hit
//! until the skill deactivates and clears it.
//!
//! Proxy shapes and the dedup sets are replicated state and serialize with
//! the world; cached transforms are re-synced from entity transforms after
//! a snapshot is restored.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::hash::StateHasher;
use crate::core::quat::FixedQuat;
use crate::core::vec3::FixedVec3;
use crate::hitquery::shape::{Aabb, CollisionShape};
use crate::sim::entity::EntityId;

/// One entity's registration: its shapes and last-known transform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitProxy {
    /// Collision shapes in entity-local space.
    pub shapes: Vec<CollisionShape>,
    /// Cached world position, updated as the entity moves.
    pub position: FixedVec3,
    /// Cached world rotation.
    pub rotation: FixedQuat,
}

impl HitProxy {
    fn overlaps_aabb(&self, query: &Aabb) -> bool {
        self.shapes
            .iter()
            .any(|shape| shape.world_aabb(self.position, self.rotation).overlaps(query))
    }

    fn overlaps_sphere(&self, center: FixedVec3, radius: crate::core::fixed::Fixed) -> bool {
        self.shapes.iter().any(|shape| {
            let aabb = shape.world_aabb(self.position, self.rotation);
            let closest = aabb.closest_point(center);
            closest.distance_squared(center) <= crate::core::fixed::fixed_mul(radius, radius)
        })
    }
}

/// Controls which candidate entities a query may report, beyond the
/// caster ([`HitQueryEngine::query_hits`] always excludes that one).
///
/// The optional predicate is an extension point for team or faction
/// filtering.
#[derive(Default)]
pub struct HitFilter<'a> {
    /// Entities never reported.
    pub exclude: BTreeSet<EntityId>,
    /// Extra acceptance test; entities it rejects are not reported.
    pub predicate: Option<&'a dyn Fn(EntityId) -> bool>,
}

impl<'a> HitFilter<'a> {
    /// Filter that excludes only the given entities.
    pub fn excluding(entities: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            exclude: entities.into_iter().collect(),
            predicate: None,
        }
    }

    /// Attach an acceptance predicate.
    pub fn with_predicate(mut self, predicate: &'a dyn Fn(EntityId) -> bool) -> Self {
        self.predicate = Some(predicate);
        self
    }

    fn allows(&self, id: EntityId) -> bool {
        if self.exclude.contains(&id) {
            return false;
        }
        match self.predicate {
            Some(predicate) => predicate(id),
            None => true,
        }
    }
}

/// Broad-phase seam: the minimal surface gameplay code needs from a
/// spatial index, so the concrete implementation can be swapped without
/// touching capabilities.
pub trait SpatialIndex {
    /// Insert (or replace) an entity's proxy.
    fn insert(
        &mut self,
        id: EntityId,
        shapes: Vec<CollisionShape>,
        position: FixedVec3,
        rotation: FixedQuat,
    );
    /// Move an entity's proxy.
    fn update(&mut self, id: EntityId, position: FixedVec3, rotation: FixedQuat);
    /// Remove an entity's proxy.
    fn remove(&mut self, id: EntityId);
    /// Raw overlap query: every registered entity the world-placed volume
    /// overlaps, in ascending id order, with no filtering or dedup.
    fn query_overlap(
        &self,
        origin: FixedVec3,
        orientation: FixedQuat,
        shape: &CollisionShape,
    ) -> Vec<EntityId>;
}

/// The spatial query engine.
///
/// Proxies live in a BTreeMap keyed by entity id, so candidate iteration
/// (and therefore hit result order) is deterministic across peers.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HitQueryEngine {
    proxies: BTreeMap<EntityId, HitProxy>,
    /// skill instance key -> entities that instance has already hit.
    already_hit: BTreeMap<u64, BTreeSet<EntityId>>,
}

impl HitQueryEngine {
    /// Empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an entity's collision proxy.
    pub fn register_entity(
        &mut self,
        id: EntityId,
        shapes: Vec<CollisionShape>,
        position: FixedVec3,
        rotation: FixedQuat,
    ) {
        self.proxies.insert(
            id,
            HitProxy {
                shapes,
                position,
                rotation,
            },
        );
    }

    /// Update a registered entity's cached transform. Unregistered ids are
    /// ignored.
    pub fn update_entity_transform(
        &mut self,
        id: EntityId,
        position: FixedVec3,
        rotation: FixedQuat,
    ) {
        if let Some(proxy) = self.proxies.get_mut(&id) {
            proxy.position = position;
            proxy.rotation = rotation;
        }
    }

    /// Remove an entity's proxy and purge it from every dedup set.
    pub fn unregister_entity(&mut self, id: EntityId) {
        self.proxies.remove(&id);
        for hit_set in self.already_hit.values_mut() {
            hit_set.remove(&id);
        }
        self.already_hit.retain(|_, set| !set.is_empty());
    }

    /// Whether an entity has a registered proxy.
    pub fn is_registered(&self, id: EntityId) -> bool {
        self.proxies.contains_key(&id)
    }

    /// Number of registered proxies.
    pub fn proxy_count(&self) -> usize {
        self.proxies.len()
    }

    /// Query which registered entities a volume overlaps.
    ///
    /// The query shape is placed at `origin`/`orientation` (typically the
    /// caster's transform). The caster is never reported, even with a
    /// default filter. Results are entity ids in ascending order, after
    /// the filter and, if `dedup_key` is given, after removing entities
    /// that instance has already hit. New hits are recorded in the
    /// instance's dedup set.
    ///
    /// Capsule query volumes are not supported: logged and no hits.
    pub fn query_hits(
        &mut self,
        caster: EntityId,
        origin: FixedVec3,
        orientation: FixedQuat,
        shape: &CollisionShape,
        filter: &HitFilter<'_>,
        dedup_key: Option<u64>,
    ) -> Vec<EntityId> {
        if let CollisionShape::Capsule { .. } = shape {
            tracing::warn!("capsule query volumes are not supported, reporting no hits");
            return Vec::new();
        }

        let query_aabb = shape.world_aabb(origin, orientation);
        let mut hits = Vec::new();

        for (&id, proxy) in &self.proxies {
            if id == caster || !filter.allows(id) {
                continue;
            }
            if let Some(key) = dedup_key {
                if self
                    .already_hit
                    .get(&key)
                    .is_some_and(|set| set.contains(&id))
                {
                    continue;
                }
            }

            if Self::proxy_overlaps(proxy, origin, orientation, shape, &query_aabb) {
                hits.push(id);
            }
        }

        if let Some(key) = dedup_key {
            if !hits.is_empty() {
                self.already_hit.entry(key).or_default().extend(&hits);
            }
        }
        hits
    }

    fn proxy_overlaps(
        proxy: &HitProxy,
        origin: FixedVec3,
        orientation: FixedQuat,
        shape: &CollisionShape,
        query_aabb: &Aabb,
    ) -> bool {
        match *shape {
            CollisionShape::Sphere { offset, radius, .. } => {
                let center = origin.add(orientation.rotate(offset));
                proxy.overlaps_aabb(query_aabb) && proxy.overlaps_sphere(center, radius)
            }
            CollisionShape::Box { .. } => proxy.overlaps_aabb(query_aabb),
            CollisionShape::Capsule { .. } => false,
        }
    }

    /// Clear a skill instance's dedup set. Called when the skill
    /// deactivates, so its next activation hits everything afresh.
    pub fn clear_skill_instance(&mut self, dedup_key: u64) {
        self.already_hit.remove(&dedup_key);
    }

    /// Feed the replicated parts of the engine into a state hasher.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.proxies.len() as u32);
        for (id, proxy) in &self.proxies {
            hasher.update_u64(id.0);
            hasher.update_vec3(proxy.position);
            hasher.update_fixed(proxy.rotation.x);
            hasher.update_fixed(proxy.rotation.y);
            hasher.update_fixed(proxy.rotation.z);
            hasher.update_fixed(proxy.rotation.w);
            hasher.update_u32(proxy.shapes.len() as u32);
            if let Ok(bytes) = bincode::serialize(&proxy.shapes) {
                hasher.update_bytes(&bytes);
            }
        }

        hasher.update_u32(self.already_hit.len() as u32);
        for (key, hit_set) in &self.already_hit {
            hasher.update_u64(*key);
            hasher.update_u32(hit_set.len() as u32);
            for id in hit_set {
                hasher.update_u64(id.0);
            }
        }
    }
}

impl SpatialIndex for HitQueryEngine {
    fn insert(
        &mut self,
        id: EntityId,
        shapes: Vec<CollisionShape>,
        position: FixedVec3,
        rotation: FixedQuat,
    ) {
        self.register_entity(id, shapes, position, rotation);
    }

    fn update(&mut self, id: EntityId, position: FixedVec3, rotation: FixedQuat) {
        self.update_entity_transform(id, position, rotation);
    }

    fn remove(&mut self, id: EntityId) {
        self.unregister_entity(id);
    }

    fn query_overlap(
        &self,
        origin: FixedVec3,
        orientation: FixedQuat,
        shape: &CollisionShape,
    ) -> Vec<EntityId> {
        if let CollisionShape::Capsule { .. } = shape {
            tracing::warn!("capsule query volumes are not supported, reporting no hits");
            return Vec::new();
        }
        let query_aabb = shape.world_aabb(origin, orientation);
        self.proxies
            .iter()
            .filter(|(_, proxy)| {
                Self::proxy_overlaps(proxy, origin, orientation, shape, &query_aabb)
            })
            .map(|(&id, _)| id)
            .collect()
    }
}
