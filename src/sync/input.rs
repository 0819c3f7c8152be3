//! Per-Frame Player Input
//!
//! `LSInput` is one player's input for one frame. Once an input is part of
//! a completed frame it is immutable; the buffer and protocol always store
//! inputs by value (cloned), never by shared reference, so no live handle
//! can mutate a finalized frame.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::vec3::FixedVec2;

/// Unique player identifier within a room.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PlayerId(pub u32);

impl std::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// One player's input for one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LSInput {
    /// The player this input belongs to.
    pub player: PlayerId,
    /// The frame this input targets.
    pub frame: u32,
    /// 2D movement vector, components in [-1.0, 1.0] fixed-point.
    pub move_vec: FixedVec2,
    /// Discrete action flags (attack / skills), packed bits.
    pub flags: u32,
    /// Client capture timestamp (milliseconds). Diagnostic only - never
    /// used in simulation logic.
    pub timestamp: u64,
}

impl LSInput {
    /// Attack pressed this frame.
    pub const FLAG_ATTACK: u32 = 1 << 0;
    /// Skill slot 1 activated.
    pub const FLAG_SKILL_1: u32 = 1 << 1;
    /// Skill slot 2 activated.
    pub const FLAG_SKILL_2: u32 = 1 << 2;
    /// Skill slot 3 activated.
    pub const FLAG_SKILL_3: u32 = 1 << 3;

    /// Create an idle (no movement, no actions) input.
    pub fn idle(player: PlayerId, frame: u32) -> Self {
        Self {
            player,
            frame,
            move_vec: FixedVec2::ZERO,
            flags: 0,
            timestamp: 0,
        }
    }

    /// Create an input with a movement vector.
    pub fn with_movement(player: PlayerId, frame: u32, move_vec: FixedVec2) -> Self {
        Self {
            player,
            frame,
            move_vec,
            flags: 0,
            timestamp: 0,
        }
    }

    /// Check a flag bit.
    #[inline]
    pub fn flag(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }

    /// Attack pressed this frame.
    #[inline]
    pub fn attack_pressed(&self) -> bool {
        self.flag(Self::FLAG_ATTACK)
    }

    /// Set a flag bit.
    #[inline]
    pub fn set_flag(&mut self, bit: u32, pressed: bool) {
        if pressed {
            self.flags |= bit;
        } else {
            self.flags &= !bit;
        }
    }

    /// True if this input carries no movement and no actions.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.move_vec.is_zero() && self.flags == 0
    }

    /// Copy of this input re-targeted at another frame. Used by the
    /// authority when substituting a missing player's last-seen input.
    pub fn retargeted(&self, frame: u32) -> Self {
        let mut input = self.clone();
        input.frame = frame;
        input
    }
}

/// All players' inputs for a single frame.
///
/// Completeness is monotonic: once the frame is marked complete it can
/// never be mutated again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneFrameInputs {
    /// The frame these inputs belong to.
    pub frame: u32,
    inputs: BTreeMap<PlayerId, LSInput>,
    complete: bool,
}

impl OneFrameInputs {
    /// Create an empty, incomplete frame.
    pub fn new(frame: u32) -> Self {
        Self {
            frame,
            inputs: BTreeMap::new(),
            complete: false,
        }
    }

    /// Store a player's input. The input is stored by value; later edits to
    /// the caller's copy cannot touch it.
    ///
    /// Returns false (and leaves the frame untouched) if the frame is
    /// already complete or the input targets a different frame.
    pub fn insert(&mut self, input: LSInput) -> bool {
        if self.complete || input.frame != self.frame {
            return false;
        }
        self.inputs.insert(input.player, input);
        true
    }

    /// Get a player's input for this frame.
    pub fn get(&self, player: PlayerId) -> Option<&LSInput> {
        self.inputs.get(&player)
    }

    /// Iterate inputs in player-id order (deterministic).
    pub fn iter(&self) -> impl Iterator<Item = (&PlayerId, &LSInput)> {
        self.inputs.iter()
    }

    /// Number of players with an input stored.
    pub fn player_count(&self) -> usize {
        self.inputs.len()
    }

    /// Whether the frame has been finalized.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Mark complete if inputs cover at least `expected` players.
    /// Returns the resulting completeness.
    pub fn mark_complete_if(&mut self, expected: usize) -> bool {
        if self.inputs.len() >= expected {
            self.complete = true;
        }
        self.complete
    }

    /// Force completion regardless of player count. Used by the authority
    /// after substituting inputs at a collection deadline.
    pub fn force_complete(&mut self) {
        self.complete = true;
    }
}
