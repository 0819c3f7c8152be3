//! Replay Timeline
//!
//! Seekable playback over a [`BattleReplayFile`]. A seek restores the
//! nearest checkpoint at or before the target frame (binary search over
//! the ascending snapshot list) and re-simulates the recorded inputs from
//! there, which reproduces the live match bit-for-bit.

use crate::sim::capability::CapabilityRegistry;
use crate::sim::effects::EffectHandlerRegistry;
use crate::sim::scheduler::step_world;
use crate::sim::world::World;
use crate::sync::input::OneFrameInputs;
use crate::sync::snapshot::{decode_world, decompress_world};

use super::file::{BattleReplayFile, ReplayError, ReplaySnapshot};

/// Seekable view over a validated replay.
pub struct ReplayTimeline {
    file: BattleReplayFile,
}

impl ReplayTimeline {
    /// Wrap a replay file, validating its ordering invariants.
    pub fn load(file: BattleReplayFile) -> Result<Self, ReplayError> {
        file.validate()?;
        Ok(Self { file })
    }

    /// The underlying file.
    pub fn file(&self) -> &BattleReplayFile {
        &self.file
    }

    /// Number of recorded frames.
    pub fn total_frames(&self) -> u32 {
        self.file.total_frames
    }

    /// The latest checkpoint at or before `frame`, if any.
    pub fn nearest_snapshot(&self, frame: u32) -> Option<&ReplaySnapshot> {
        // First index with snapshot.frame > frame; the checkpoint we want
        // is the one just before it.
        let index = self
            .file
            .snapshots
            .partition_point(|snapshot| snapshot.frame <= frame);
        index.checked_sub(1).map(|i| &self.file.snapshots[i])
    }

    /// The recorded input set for one frame.
    pub fn frame_inputs(&self, frame: u32) -> Option<&OneFrameInputs> {
        let index = self.file.frames.partition_point(|f| f.frame < frame);
        self.file
            .frames
            .get(index)
            .filter(|inputs| inputs.frame == frame)
    }

    /// Raw serialized world bytes for a checkpoint recorded exactly at
    /// `frame`. Returns `None` when no checkpoint lands on that frame;
    /// the caller must then [`seek`](Self::seek) from the nearest one.
    pub fn snapshot_world_data(&self, frame: u32) -> Result<Option<Vec<u8>>, ReplayError> {
        match self.nearest_snapshot(frame) {
            Some(snapshot) if snapshot.frame == frame => {
                Ok(Some(decompress_world(&snapshot.world_bytes)?))
            }
            _ => Ok(None),
        }
    }

    /// Restore the world exactly as it was at the start of `frame`.
    ///
    /// Decodes the nearest checkpoint and re-simulates forward with the
    /// recorded inputs. Fails if no checkpoint precedes the frame or an
    /// input record inside the gap is missing.
    pub fn seek(
        &self,
        frame: u32,
        capabilities: &CapabilityRegistry,
        effects: &EffectHandlerRegistry,
    ) -> Result<World, ReplayError> {
        let snapshot = self
            .nearest_snapshot(frame)
            .ok_or(ReplayError::NoSnapshotBefore(frame))?;
        let mut world = decode_world(&snapshot.world_bytes)?;

        while world.frame < frame {
            let current = world.frame;
            let inputs = self
                .frame_inputs(current)
                .ok_or(ReplayError::MissingFrame(current))?;
            step_world(&mut world, capabilities, effects, inputs);
        }
        Ok(world)
    }
}
