//! Baseline Capabilities
//!
//! The two capabilities every playable entity carries: input-driven
//! movement and a melee swing. They double as the reference for writing
//! new capabilities - read inputs from components, mutate only your own
//! entity, and route everything cross-entity through the effect queue.

use crate::core::vec3::FixedVec3;
use crate::hitquery::engine::HitFilter;
use crate::hitquery::shape::CollisionShape;
use crate::sim::capability::{Capability, CapabilityError, CapabilityTypeId};
use crate::sim::component::ComponentKind;
use crate::sim::effects::SkillEffectData;
use crate::sim::entity::EntityId;
use crate::sim::world::World;

/// Type id of [`MovementCapability`].
pub const MOVEMENT_CAPABILITY: CapabilityTypeId = CapabilityTypeId(1);
/// Type id of [`MeleeAttackCapability`].
pub const MELEE_CAPABILITY: CapabilityTypeId = CapabilityTypeId(2);

/// Moves the entity along its player's move vector.
///
/// Requires PlayerInput, Transform and Movement components. Runs at high
/// priority so attacks this frame see the post-move position.
pub struct MovementCapability;

impl MovementCapability {
    fn move_vec(world: &World, entity: EntityId) -> Option<FixedVec3> {
        world
            .entity(entity)
            .and_then(|e| e.component(ComponentKind::PlayerInput))
            .and_then(|c| c.as_player_input())
            .map(|p| p.input.move_vec.to_ground_plane())
    }
}

impl Capability for MovementCapability {
    fn type_id(&self) -> CapabilityTypeId {
        MOVEMENT_CAPABILITY
    }

    fn name(&self) -> &'static str {
        "movement"
    }

    fn priority(&self) -> i32 {
        100
    }

    fn tags(&self) -> &'static [&'static str] {
        &["movement"]
    }

    fn tracks_duration(&self) -> bool {
        true
    }

    fn should_activate(&self, world: &World, entity: EntityId) -> bool {
        Self::move_vec(world, entity).is_some_and(|v| v.length_squared() != 0)
    }

    fn should_deactivate(&self, world: &World, entity: EntityId) -> bool {
        !self.should_activate(world, entity)
    }

    fn tick(&self, world: &mut World, entity: EntityId) -> Result<(), CapabilityError> {
        let move_vec = Self::move_vec(world, entity).ok_or(CapabilityError::MissingComponent(
            entity,
            ComponentKind::PlayerInput,
        ))?;
        let speed = world
            .entity(entity)
            .and_then(|e| e.component(ComponentKind::Movement))
            .and_then(|c| c.as_movement())
            .map(|m| m.speed)
            .ok_or(CapabilityError::MissingComponent(
                entity,
                ComponentKind::Movement,
            ))?;

        // Clamp over-long input vectors to unit length; shorter vectors
        // give analog speed control.
        let length = move_vec.length();
        let direction = if length > crate::core::fixed::FIXED_ONE {
            move_vec.div_scalar(length)
        } else {
            move_vec
        };
        let velocity = direction.scale(speed);
        let delta_time = world.delta_time;

        let (new_position, rotation) = {
            let transform = world
                .entity_mut(entity)
                .and_then(|e| e.component_mut(ComponentKind::Transform))
                .and_then(|c| c.as_transform_mut())
                .ok_or(CapabilityError::MissingComponent(
                    entity,
                    ComponentKind::Transform,
                ))?;
            transform.position = transform.position.add(velocity.scale(delta_time));
            (transform.position, transform.rotation)
        };

        if let Some(vel) = world
            .entity_mut(entity)
            .and_then(|e| e.component_mut(ComponentKind::Velocity))
            .and_then(|c| c.as_velocity_mut())
        {
            vel.linear = velocity;
        }

        world
            .hit_query
            .update_entity_transform(entity, new_position, rotation);
        Ok(())
    }

    fn on_deactivate(&self, world: &mut World, entity: EntityId) {
        if let Some(vel) = world
            .entity_mut(entity)
            .and_then(|e| e.component_mut(ComponentKind::Velocity))
            .and_then(|c| c.as_velocity_mut())
        {
            vel.linear = FixedVec3::ZERO;
        }
    }
}

/// A melee swing held while the attack flag is down.
///
/// Each activation is one skill instance: the swing volume is queried
/// every active frame, but the dedup set guarantees each victim is hit
/// exactly once per swing. Releasing and pressing attack again starts a
/// fresh instance.
pub struct MeleeAttackCapability {
    swing_shape: CollisionShape,
    effect_id: u32,
}

impl MeleeAttackCapability {
    /// Melee attack with the given swing volume and effect config id.
    pub fn new(swing_shape: CollisionShape, effect_id: u32) -> Self {
        Self {
            swing_shape,
            effect_id,
        }
    }

    fn attack_held(world: &World, entity: EntityId) -> bool {
        world
            .entity(entity)
            .and_then(|e| e.component(ComponentKind::PlayerInput))
            .and_then(|c| c.as_player_input())
            .is_some_and(|p| p.input.attack_pressed())
    }

    /// One dedup key per (caster, swing): the caster id is enough because
    /// a caster has at most one active swing, and the key is cleared when
    /// the swing ends.
    fn dedup_key(entity: EntityId) -> u64 {
        entity.0
    }
}

impl Capability for MeleeAttackCapability {
    fn type_id(&self) -> CapabilityTypeId {
        MELEE_CAPABILITY
    }

    fn name(&self) -> &'static str {
        "melee_attack"
    }

    fn priority(&self) -> i32 {
        50
    }

    fn tags(&self) -> &'static [&'static str] {
        &["combat"]
    }

    fn should_activate(&self, world: &World, entity: EntityId) -> bool {
        Self::attack_held(world, entity)
    }

    fn should_deactivate(&self, world: &World, entity: EntityId) -> bool {
        !Self::attack_held(world, entity)
    }

    fn on_deactivate(&self, world: &mut World, entity: EntityId) {
        world.hit_query.clear_skill_instance(Self::dedup_key(entity));
    }

    fn tick(&self, world: &mut World, entity: EntityId) -> Result<(), CapabilityError> {
        let (position, rotation) =
            world
                .transform_of(entity)
                .ok_or(CapabilityError::MissingComponent(
                    entity,
                    ComponentKind::Transform,
                ))?;

        let hits = world.hit_query.query_hits(
            entity,
            position,
            rotation,
            &self.swing_shape,
            &HitFilter::default(),
            Some(Self::dedup_key(entity)),
        );

        for target in hits {
            world.effects.enqueue(SkillEffectData {
                effect_id: self.effect_id,
                caster: entity,
                target,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::fixed::{to_fixed, Fixed, FIXED_ONE};
    use crate::core::quat::FixedQuat;
    use crate::core::vec3::FixedVec2;
    use crate::sim::capability::CapabilityRegistry;
    use crate::sim::component::{
        Component, HealthComponent, MovementComponent, PlayerInputComponent, TransformComponent,
        VelocityComponent,
    };
    use crate::sim::effects::{EffectHandlerRegistry, SkillEffectConfig};
    use crate::sim::scheduler::step_world;
    use crate::sync::input::{LSInput, OneFrameInputs, PlayerId};

    const DT: Fixed = 1092;

    fn swing_shape() -> CollisionShape {
        CollisionShape::Box {
            offset: FixedVec3::from_ints(0, 0, 1),
            rotation: FixedQuat::IDENTITY,
            half_extents: FixedVec3::from_ints(1, 1, 1),
        }
    }

    fn registries() -> (CapabilityRegistry, EffectHandlerRegistry) {
        let caps: Vec<Arc<dyn Capability>> = vec![
            Arc::new(MovementCapability),
            Arc::new(MeleeAttackCapability::new(swing_shape(), 1)),
        ];
        let registry = CapabilityRegistry::new(caps).unwrap();

        let mut effects = EffectHandlerRegistry::with_default_handlers();
        effects.register_config(SkillEffectConfig {
            id: 1,
            effect_type: "damage".to_string(),
            amount: to_fixed(10.0),
        });
        (registry, effects)
    }

    fn spawn_fighter(world: &mut World, player: PlayerId, position: FixedVec3) -> EntityId {
        let id = world.spawn_entity(format!("fighter-{player}"));
        world
            .attach_component(
                id,
                Component::Transform(TransformComponent {
                    position,
                    rotation: FixedQuat::IDENTITY,
                }),
            )
            .unwrap();
        world
            .attach_component(id, Component::Velocity(VelocityComponent::default()))
            .unwrap();
        world
            .attach_component(id, Component::Health(HealthComponent::full(to_fixed(100.0))))
            .unwrap();
        world
            .attach_component(
                id,
                Component::Movement(MovementComponent {
                    speed: to_fixed(6.0),
                }),
            )
            .unwrap();
        world
            .attach_component(id, Component::PlayerInput(PlayerInputComponent::new(player)))
            .unwrap();
        world.attach_capability(id, &MovementCapability).unwrap();
        world
            .attach_capability(id, &MeleeAttackCapability::new(swing_shape(), 1))
            .unwrap();
        world.hit_query.register_entity(
            id,
            vec![CollisionShape::Sphere {
                offset: FixedVec3::ZERO,
                rotation: FixedQuat::IDENTITY,
                radius: FIXED_ONE / 2,
            }],
            position,
            FixedQuat::IDENTITY,
        );
        id
    }

    fn frame_of(frame: u32, inputs: Vec<LSInput>) -> OneFrameInputs {
        let mut set = OneFrameInputs::new(frame);
        for input in inputs {
            set.insert(input);
        }
        set.force_complete();
        set
    }

    #[test]
    fn test_movement_follows_input() {
        let (registry, effects) = registries();
        let mut world = World::new(1, DT);
        let hero = spawn_fighter(&mut world, PlayerId(1), FixedVec3::ZERO);

        let mut input = LSInput::with_movement(PlayerId(1), 0, FixedVec2::new(0, FIXED_ONE));
        input.timestamp = 1;
        step_world(&mut world, &registry, &effects, &frame_of(0, vec![input]));

        let (position, _) = world.transform_of(hero).unwrap();
        assert_eq!(position.x, 0);
        assert!(position.z > 0, "moved along +Z");

        // Stops (and zeroes velocity) when input goes idle - deactivation
        // happens on the following frame's check.
        let stopped_at = position;
        step_world(
            &mut world,
            &registry,
            &effects,
            &frame_of(1, vec![LSInput::idle(PlayerId(1), 1)]),
        );
        let (position, _) = world.transform_of(hero).unwrap();
        assert_eq!(position, stopped_at);
        let velocity = world
            .entity(hero)
            .unwrap()
            .component(ComponentKind::Velocity)
            .unwrap()
            .as_velocity()
            .unwrap();
        assert_eq!(velocity.linear, FixedVec3::ZERO);
    }

    #[test]
    fn test_movement_syncs_hit_proxy() {
        let (registry, effects) = registries();
        let mut world = World::new(1, DT);
        let hero = spawn_fighter(&mut world, PlayerId(1), FixedVec3::ZERO);

        for frame in 0..60 {
            let input =
                LSInput::with_movement(PlayerId(1), frame, FixedVec2::new(0, FIXED_ONE));
            step_world(&mut world, &registry, &effects, &frame_of(frame, vec![input]));
        }

        // After ~1s at speed 6, a swing from the origin must miss
        let attacker = spawn_fighter(&mut world, PlayerId(2), FixedVec3::ZERO);
        let mut attack = LSInput::idle(PlayerId(2), 60);
        attack.set_flag(LSInput::FLAG_ATTACK, true);
        step_world(
            &mut world,
            &registry,
            &effects,
            &frame_of(60, vec![LSInput::idle(PlayerId(1), 60), attack]),
        );

        let health = world
            .entity(hero)
            .unwrap()
            .component(ComponentKind::Health)
            .unwrap()
            .as_health()
            .unwrap();
        assert_eq!(health.current, to_fixed(100.0), "out of swing range");
        let _ = attacker;
    }

    #[test]
    fn test_melee_hits_once_per_swing() {
        let (registry, effects) = registries();
        let mut world = World::new(1, DT);
        let attacker = spawn_fighter(&mut world, PlayerId(1), FixedVec3::ZERO);
        let victim = spawn_fighter(&mut world, PlayerId(2), FixedVec3::from_ints(0, 0, 1));

        // Hold the attack for 5 frames
        for frame in 0..5 {
            let mut attack = LSInput::idle(PlayerId(1), frame);
            attack.set_flag(LSInput::FLAG_ATTACK, true);
            step_world(
                &mut world,
                &registry,
                &effects,
                &frame_of(frame, vec![attack, LSInput::idle(PlayerId(2), frame)]),
            );
        }

        let health = world
            .entity(victim)
            .unwrap()
            .component(ComponentKind::Health)
            .unwrap()
            .as_health()
            .unwrap();
        assert_eq!(
            health.current,
            to_fixed(90.0),
            "one hit despite five active frames"
        );
        let _ = attacker;
    }

    #[test]
    fn test_new_swing_hits_again() {
        let (registry, effects) = registries();
        let mut world = World::new(1, DT);
        let _attacker = spawn_fighter(&mut world, PlayerId(1), FixedVec3::ZERO);
        let victim = spawn_fighter(&mut world, PlayerId(2), FixedVec3::from_ints(0, 0, 1));

        let mut frame = 0u32;
        let mut run = |world: &mut World, attacking: bool| {
            let mut input = LSInput::idle(PlayerId(1), frame);
            input.set_flag(LSInput::FLAG_ATTACK, attacking);
            step_world(
                world,
                &registry,
                &effects,
                &frame_of(frame, vec![input, LSInput::idle(PlayerId(2), frame)]),
            );
            frame += 1;
        };

        run(&mut world, true); // first swing hits
        run(&mut world, false); // release: swing ends, dedup cleared
        run(&mut world, true); // second swing hits again

        let health = world
            .entity(victim)
            .unwrap()
            .component(ComponentKind::Health)
            .unwrap()
            .as_health()
            .unwrap();
        assert_eq!(health.current, to_fixed(80.0));
    }

    #[test]
    fn test_disabled_movement_tag_freezes_entity() {
        let (registry, effects) = registries();
        let mut world = World::new(1, DT);
        let hero = spawn_fighter(&mut world, PlayerId(1), FixedVec3::ZERO);

        world.entity_mut(hero).unwrap().disable_tag("movement", 99);

        let input = LSInput::with_movement(PlayerId(1), 0, FixedVec2::new(FIXED_ONE, 0));
        step_world(&mut world, &registry, &effects, &frame_of(0, vec![input]));

        let (position, _) = world.transform_of(hero).unwrap();
        assert_eq!(position, FixedVec3::ZERO, "movement blocked by tag");
    }
}
