//! Deferred Skill Effects
//!
//! Capabilities never mutate other entities directly. They enqueue effect
//! records, and the world flushes the queue once per frame after every
//! capability has ticked. That gives a single, ordered place where
//! cross-entity mutation happens, so peers apply effects in an identical
//! order regardless of which capability produced them.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::Fixed;
use crate::sim::component::ComponentKind;
use crate::sim::entity::EntityId;
use crate::sim::world::World;

/// One pending effect: which config, who caused it, who receives it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEffectData {
    /// Key into the effect config table.
    pub effect_id: u32,
    /// The entity that caused the effect.
    pub caster: EntityId,
    /// The entity the effect applies to.
    pub target: EntityId,
}

/// Static tuning for one effect id, loaded at startup and identical on
/// every peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEffectConfig {
    /// Effect id referenced by `SkillEffectData`.
    pub id: u32,
    /// Handler name this config dispatches to ("damage", "heal", ...).
    pub effect_type: String,
    /// Magnitude, interpreted by the handler (health for damage/heal,
    /// impulse for knockback).
    pub amount: Fixed,
}

/// Fault applying one effect. The flush logs it and drops only that
/// effect; the rest of the queue still applies.
#[derive(Debug, Error)]
pub enum EffectError {
    /// The target entity does not exist or is destroyed.
    #[error("effect target {0} is gone")]
    TargetGone(EntityId),
    /// The target lacks a component the handler needs.
    #[error("effect target {0} is missing component {1:?}")]
    MissingComponent(EntityId, ComponentKind),
}

/// An effect handler. Plain function pointers keep the registry trivially
/// shareable and leave all mutable state in the world.
pub type EffectHandler = fn(&mut World, &SkillEffectData, &SkillEffectConfig) -> Result<(), EffectError>;

/// Effect config table plus handler dispatch, built once at startup.
pub struct EffectHandlerRegistry {
    configs: BTreeMap<u32, SkillEffectConfig>,
    handlers: BTreeMap<String, EffectHandler>,
}

impl EffectHandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            configs: BTreeMap::new(),
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with the built-in damage / heal / knockback handlers.
    pub fn with_default_handlers() -> Self {
        let mut registry = Self::new();
        registry.register_handler("damage", apply_damage);
        registry.register_handler("heal", apply_heal);
        registry.register_handler("knockback", apply_knockback);
        registry
    }

    /// Register (or replace) the config for an effect id.
    pub fn register_config(&mut self, config: SkillEffectConfig) {
        self.configs.insert(config.id, config);
    }

    /// Register (or replace) a handler under a type name.
    pub fn register_handler(&mut self, effect_type: &str, handler: EffectHandler) {
        self.handlers.insert(effect_type.to_string(), handler);
    }

    /// Look up the config for an effect id.
    pub fn config(&self, effect_id: u32) -> Option<&SkillEffectConfig> {
        self.configs.get(&effect_id)
    }

    /// Look up a handler by type name.
    pub fn handler(&self, effect_type: &str) -> Option<EffectHandler> {
        self.handlers.get(effect_type).copied()
    }
}

impl Default for EffectHandlerRegistry {
    fn default() -> Self {
        Self::with_default_handlers()
    }
}

/// FIFO of effects awaiting the end-of-frame flush.
///
/// Effects enqueued while the flush is running are processed in the same
/// flush, in arrival order, so a frame always ends with an empty queue.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SkillEffectQueue {
    queue: VecDeque<SkillEffectData>,
}

impl SkillEffectQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an effect.
    pub fn enqueue(&mut self, effect: SkillEffectData) {
        self.queue.push_back(effect);
    }

    /// Dequeue the oldest pending effect.
    pub fn pop_front(&mut self) -> Option<SkillEffectData> {
        self.queue.pop_front()
    }

    /// Pending effect count.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

// =============================================================================
// Built-in handlers
// =============================================================================

fn require_live_target(world: &World, target: EntityId) -> Result<(), EffectError> {
    match world.entity(target) {
        Some(entity) if !entity.destroyed => Ok(()),
        _ => Err(EffectError::TargetGone(target)),
    }
}

/// Subtract `amount` from the target's health, flooring at zero.
fn apply_damage(
    world: &mut World,
    effect: &SkillEffectData,
    config: &SkillEffectConfig,
) -> Result<(), EffectError> {
    require_live_target(world, effect.target)?;
    let health = world
        .entity_mut(effect.target)
        .and_then(|e| e.component_mut(ComponentKind::Health))
        .and_then(|c| c.as_health_mut())
        .ok_or(EffectError::MissingComponent(
            effect.target,
            ComponentKind::Health,
        ))?;
    health.current = (health.current - config.amount).max(0);
    Ok(())
}

/// Add `amount` to the target's health, clamping at max.
fn apply_heal(
    world: &mut World,
    effect: &SkillEffectData,
    config: &SkillEffectConfig,
) -> Result<(), EffectError> {
    require_live_target(world, effect.target)?;
    let health = world
        .entity_mut(effect.target)
        .and_then(|e| e.component_mut(ComponentKind::Health))
        .and_then(|c| c.as_health_mut())
        .ok_or(EffectError::MissingComponent(
            effect.target,
            ComponentKind::Health,
        ))?;
    health.current = (health.current + config.amount).min(health.max);
    Ok(())
}

/// Push the target away from the caster with an impulse of `amount`.
/// Falls back to +X when the two share a position.
fn apply_knockback(
    world: &mut World,
    effect: &SkillEffectData,
    config: &SkillEffectConfig,
) -> Result<(), EffectError> {
    require_live_target(world, effect.target)?;

    let caster_pos = world.transform_of(effect.caster).map(|(p, _)| p);
    let target_pos = world
        .transform_of(effect.target)
        .map(|(p, _)| p)
        .ok_or(EffectError::MissingComponent(
            effect.target,
            ComponentKind::Transform,
        ))?;

    let direction = match caster_pos {
        Some(caster_pos) => {
            let delta = target_pos.sub(caster_pos);
            if delta.length_squared() == 0 {
                crate::core::vec3::FixedVec3::RIGHT
            } else {
                delta.normalize()
            }
        }
        None => crate::core::vec3::FixedVec3::RIGHT,
    };

    let velocity = world
        .entity_mut(effect.target)
        .and_then(|e| e.component_mut(ComponentKind::Velocity))
        .and_then(|c| c.as_velocity_mut())
        .ok_or(EffectError::MissingComponent(
            effect.target,
            ComponentKind::Velocity,
        ))?;
    velocity.linear = velocity.linear.add(direction.scale(config.amount));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::{to_fixed, Fixed};
    use crate::core::vec3::FixedVec3;
    use crate::sim::component::{
        Component, HealthComponent, TransformComponent, VelocityComponent,
    };

    const DT: Fixed = 1092;

    fn config(id: u32, effect_type: &str, amount: Fixed) -> SkillEffectConfig {
        SkillEffectConfig {
            id,
            effect_type: effect_type.to_string(),
            amount,
        }
    }

    fn world_with_target(health: Fixed) -> (World, EntityId) {
        let mut world = World::new(1, DT);
        let id = world.spawn_entity("target");
        world
            .attach_component(id, Component::Health(HealthComponent::full(health)))
            .unwrap();
        (world, id)
    }

    #[test]
    fn test_damage_floors_at_zero() {
        let (mut world, target) = world_with_target(to_fixed(30.0));
        let effect = SkillEffectData {
            effect_id: 1,
            caster: target,
            target,
        };

        apply_damage(&mut world, &effect, &config(1, "damage", to_fixed(50.0))).unwrap();

        let health = world
            .entity(target)
            .unwrap()
            .component(ComponentKind::Health)
            .unwrap()
            .as_health()
            .unwrap();
        assert_eq!(health.current, 0);
    }

    #[test]
    fn test_heal_clamps_at_max() {
        let (mut world, target) = world_with_target(to_fixed(100.0));
        world
            .entity_mut(target)
            .unwrap()
            .component_mut(ComponentKind::Health)
            .unwrap()
            .as_health_mut()
            .unwrap()
            .current = to_fixed(90.0);

        let effect = SkillEffectData {
            effect_id: 2,
            caster: target,
            target,
        };
        apply_heal(&mut world, &effect, &config(2, "heal", to_fixed(25.0))).unwrap();

        let health = world
            .entity(target)
            .unwrap()
            .component(ComponentKind::Health)
            .unwrap()
            .as_health()
            .unwrap();
        assert_eq!(health.current, to_fixed(100.0));
    }

    #[test]
    fn test_knockback_pushes_away_from_caster() {
        let mut world = World::new(1, DT);
        let caster = world.spawn_entity("caster");
        let target = world.spawn_entity("target");
        world
            .attach_component(
                caster,
                Component::Transform(TransformComponent::default()),
            )
            .unwrap();
        world
            .attach_component(
                target,
                Component::Transform(TransformComponent {
                    position: FixedVec3::new(to_fixed(2.0), 0, 0),
                    ..Default::default()
                }),
            )
            .unwrap();
        world
            .attach_component(target, Component::Velocity(VelocityComponent::default()))
            .unwrap();

        let effect = SkillEffectData {
            effect_id: 3,
            caster,
            target,
        };
        apply_knockback(&mut world, &effect, &config(3, "knockback", to_fixed(5.0))).unwrap();

        let velocity = world
            .entity(target)
            .unwrap()
            .component(ComponentKind::Velocity)
            .unwrap()
            .as_velocity()
            .unwrap();
        assert!(velocity.linear.x > 0, "pushed along +X, away from caster");
        assert_eq!(velocity.linear.z, 0);
    }

    #[test]
    fn test_missing_health_reported_not_panicked() {
        let mut world = World::new(1, DT);
        let target = world.spawn_entity("no-health");
        let effect = SkillEffectData {
            effect_id: 1,
            caster: target,
            target,
        };
        let result = apply_damage(&mut world, &effect, &config(1, "damage", to_fixed(5.0)));
        assert!(matches!(result, Err(EffectError::MissingComponent(_, _))));
    }

    #[test]
    fn test_queue_fifo() {
        let mut queue = SkillEffectQueue::new();
        for id in 0..3 {
            queue.enqueue(SkillEffectData {
                effect_id: id,
                caster: EntityId(1),
                target: EntityId(2),
            });
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop_front().unwrap().effect_id, 0);
        assert_eq!(queue.pop_front().unwrap().effect_id, 1);
        assert_eq!(queue.pop_front().unwrap().effect_id, 2);
        assert!(queue.is_empty());
    }
}
