//! Component Definitions
//!
//! Components are plain serializable data attached to exactly one entity.
//! They never hold references to other entities - relationships are entity
//! ids, which keeps the whole model snapshot-serializable and free of
//! ownership cycles.

use serde::{Deserialize, Serialize};

use crate::core::fixed::Fixed;
use crate::core::quat::FixedQuat;
use crate::core::vec3::FixedVec3;
use crate::sync::input::{LSInput, PlayerId};

/// Discriminant for component storage. At most one component of each kind
/// may be attached to an entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ComponentKind {
    /// World-space position and rotation.
    Transform = 0,
    /// Linear velocity.
    Velocity = 1,
    /// Current and maximum health.
    Health = 2,
    /// Movement tuning parameters.
    Movement = 3,
    /// Per-player frame input, written by `World::apply_inputs_to_entities`.
    PlayerInput = 4,
}

/// Position and rotation in world space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformComponent {
    /// World-space position.
    pub position: FixedVec3,
    /// World-space rotation.
    pub rotation: FixedQuat,
}

/// Linear velocity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityComponent {
    /// Units per second, fixed-point.
    pub linear: FixedVec3,
}

/// Health pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthComponent {
    /// Current health.
    pub current: Fixed,
    /// Maximum health.
    pub max: Fixed,
}

impl HealthComponent {
    /// Create a health pool at full health.
    pub const fn full(max: Fixed) -> Self {
        Self { current: max, max }
    }

    /// True if health has reached zero.
    #[inline]
    pub fn is_depleted(&self) -> bool {
        self.current <= 0
    }
}

/// Movement tuning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementComponent {
    /// Movement speed in units per second.
    pub speed: Fixed,
}

/// The input routed to this entity for the current frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInputComponent {
    /// The player this entity belongs to.
    pub player: PlayerId,
    /// Input applied for the frame currently being simulated.
    pub input: LSInput,
}

impl PlayerInputComponent {
    /// Create with an idle input for frame 0.
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            input: LSInput::idle(player, 0),
        }
    }
}

/// A component value. The enum keeps the set closed and serializable;
/// `kind()` is the storage key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Component {
    /// World-space transform.
    Transform(TransformComponent),
    /// Linear velocity.
    Velocity(VelocityComponent),
    /// Health pool.
    Health(HealthComponent),
    /// Movement tuning.
    Movement(MovementComponent),
    /// Per-player input.
    PlayerInput(PlayerInputComponent),
}

impl Component {
    /// The kind this component is stored under.
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::Transform(_) => ComponentKind::Transform,
            Component::Velocity(_) => ComponentKind::Velocity,
            Component::Health(_) => ComponentKind::Health,
            Component::Movement(_) => ComponentKind::Movement,
            Component::PlayerInput(_) => ComponentKind::PlayerInput,
        }
    }

    /// View as a transform, if that is what this is.
    pub fn as_transform(&self) -> Option<&TransformComponent> {
        match self {
            Component::Transform(t) => Some(t),
            _ => None,
        }
    }

    /// Mutable view as a transform.
    pub fn as_transform_mut(&mut self) -> Option<&mut TransformComponent> {
        match self {
            Component::Transform(t) => Some(t),
            _ => None,
        }
    }

    /// View as a velocity.
    pub fn as_velocity(&self) -> Option<&VelocityComponent> {
        match self {
            Component::Velocity(v) => Some(v),
            _ => None,
        }
    }

    /// Mutable view as a velocity.
    pub fn as_velocity_mut(&mut self) -> Option<&mut VelocityComponent> {
        match self {
            Component::Velocity(v) => Some(v),
            _ => None,
        }
    }

    /// View as health.
    pub fn as_health(&self) -> Option<&HealthComponent> {
        match self {
            Component::Health(h) => Some(h),
            _ => None,
        }
    }

    /// Mutable view as health.
    pub fn as_health_mut(&mut self) -> Option<&mut HealthComponent> {
        match self {
            Component::Health(h) => Some(h),
            _ => None,
        }
    }

    /// View as movement tuning.
    pub fn as_movement(&self) -> Option<&MovementComponent> {
        match self {
            Component::Movement(m) => Some(m),
            _ => None,
        }
    }

    /// View as player input.
    pub fn as_player_input(&self) -> Option<&PlayerInputComponent> {
        match self {
            Component::PlayerInput(p) => Some(p),
            _ => None,
        }
    }

    /// Mutable view as player input.
    pub fn as_player_input_mut(&mut self) -> Option<&mut PlayerInputComponent> {
        match self {
            Component::PlayerInput(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_component_kind_mapping() {
        assert_eq!(
            Component::Transform(TransformComponent::default()).kind(),
            ComponentKind::Transform
        );
        assert_eq!(
            Component::Velocity(VelocityComponent::default()).kind(),
            ComponentKind::Velocity
        );
        assert_eq!(
            Component::Health(HealthComponent::full(to_fixed(100.0))).kind(),
            ComponentKind::Health
        );
        assert_eq!(
            Component::Movement(MovementComponent::default()).kind(),
            ComponentKind::Movement
        );
        assert_eq!(
            Component::PlayerInput(PlayerInputComponent::new(PlayerId(1))).kind(),
            ComponentKind::PlayerInput
        );
    }

    #[test]
    fn test_health_depletion() {
        let mut health = HealthComponent::full(to_fixed(100.0));
        assert!(!health.is_depleted());

        health.current = 0;
        assert!(health.is_depleted());
    }

    #[test]
    fn test_typed_accessors() {
        let mut comp = Component::Health(HealthComponent::full(to_fixed(50.0)));
        assert!(comp.as_health().is_some());
        assert!(comp.as_transform().is_none());

        comp.as_health_mut().unwrap().current = to_fixed(25.0);
        assert_eq!(comp.as_health().unwrap().current, to_fixed(25.0));
    }
}
