//! Replay File Format
//!
//! A replay is everything needed to re-simulate a match bit-for-bit: the
//! start parameters, every completed input frame, and periodic compressed
//! world snapshots so seeking does not have to replay from frame 0.
//!
//! The container is bincode; the embedded snapshots are already
//! zstd-compressed world blobs (the same encoding late-join uses).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::Fixed;
use crate::sim::world::World;
use crate::sync::input::OneFrameInputs;
use crate::sync::protocol::{PlayerSeat, RoomId};
use crate::sync::snapshot::{encode_world, SnapshotError};

/// Bumped whenever the file layout changes incompatibly.
pub const REPLAY_FORMAT_VERSION: u32 = 1;

/// Replay read/write failure.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// Container (de)serialization failed.
    #[error("replay codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Embedded snapshot encode/decode failed.
    #[error("replay snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
    /// The file was written by an incompatible version.
    #[error("replay format version mismatch: expected {expected}, got {got}")]
    VersionMismatch {
        /// Version this build reads.
        expected: u32,
        /// Version found in the file.
        got: u32,
    },
    /// Frame records are not strictly ascending.
    #[error("replay frames out of order near frame {0}")]
    UnorderedFrames(u32),
    /// Snapshot records are not strictly ascending.
    #[error("replay snapshots out of order near frame {0}")]
    UnorderedSnapshots(u32),
    /// A recorded frame was not complete.
    #[error("frame {0} recorded before completion")]
    IncompleteFrame(u32),
    /// No snapshot exists at or before the requested frame.
    #[error("no snapshot at or before frame {0}")]
    NoSnapshotBefore(u32),
    /// The input record for a frame inside the replay range is missing.
    #[error("missing input record for frame {0}")]
    MissingFrame(u32),
}

/// A compressed world checkpoint at one frame boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    /// Frame the world was captured at (before simulating that frame).
    pub frame: u32,
    /// zstd-compressed bincode world.
    pub world_bytes: Vec<u8>,
}

/// One complete match recording.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleReplayFile {
    /// Format version, checked on load.
    pub version: u32,
    /// The recorded room.
    pub room_id: RoomId,
    /// Simulation rate, frames per second.
    pub tick_rate: u32,
    /// Fixed timestep in Q16.16 seconds.
    pub frame_interval: Fixed,
    /// World RNG seed.
    pub seed: u64,
    /// Unix timestamp (seconds) when recording started. Metadata only.
    pub started_at: i64,
    /// Number of completed frames recorded.
    pub total_frames: u32,
    /// Every seat in the match.
    pub roster: Vec<PlayerSeat>,
    /// Checkpoints, strictly ascending by frame.
    pub snapshots: Vec<ReplaySnapshot>,
    /// Completed input frames, strictly ascending by frame.
    pub frames: Vec<OneFrameInputs>,
}

impl BattleReplayFile {
    /// Serialize the replay.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayError> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize and validate a replay.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplayError> {
        let file: Self = bincode::deserialize(bytes)?;
        file.validate()?;
        Ok(file)
    }

    /// Check version and record ordering.
    pub fn validate(&self) -> Result<(), ReplayError> {
        if self.version != REPLAY_FORMAT_VERSION {
            return Err(ReplayError::VersionMismatch {
                expected: REPLAY_FORMAT_VERSION,
                got: self.version,
            });
        }
        for pair in self.snapshots.windows(2) {
            if pair[1].frame <= pair[0].frame {
                return Err(ReplayError::UnorderedSnapshots(pair[1].frame));
            }
        }
        for pair in self.frames.windows(2) {
            if pair[1].frame <= pair[0].frame {
                return Err(ReplayError::UnorderedFrames(pair[1].frame));
            }
        }
        Ok(())
    }
}

/// Records a match as it runs. Owned by whoever sees the authoritative
/// frame stream (the server, or a client that wants a local recording).
#[derive(Debug)]
pub struct ReplayRecorder {
    file: BattleReplayFile,
}

impl ReplayRecorder {
    /// Start recording a match.
    pub fn new(
        room_id: RoomId,
        tick_rate: u32,
        frame_interval: Fixed,
        seed: u64,
        roster: Vec<PlayerSeat>,
    ) -> Self {
        Self {
            file: BattleReplayFile {
                version: REPLAY_FORMAT_VERSION,
                room_id,
                tick_rate,
                frame_interval,
                seed,
                started_at: Utc::now().timestamp(),
                total_frames: 0,
                roster,
                snapshots: Vec::new(),
                frames: Vec::new(),
            },
        }
    }

    /// Record one completed frame. Frames must arrive in ascending order
    /// and must be complete.
    pub fn record_frame(&mut self, inputs: OneFrameInputs) -> Result<(), ReplayError> {
        if !inputs.is_complete() {
            return Err(ReplayError::IncompleteFrame(inputs.frame));
        }
        if let Some(last) = self.file.frames.last() {
            if inputs.frame <= last.frame {
                return Err(ReplayError::UnorderedFrames(inputs.frame));
            }
        }
        self.file.total_frames = inputs.frame + 1;
        self.file.frames.push(inputs);
        Ok(())
    }

    /// Checkpoint the world. Call at frame boundaries (before simulating
    /// `world.frame`); checkpoints must be recorded in ascending order.
    pub fn record_snapshot(&mut self, world: &World) -> Result<(), ReplayError> {
        if let Some(last) = self.file.snapshots.last() {
            if world.frame <= last.frame {
                return Err(ReplayError::UnorderedSnapshots(world.frame));
            }
        }
        let world_bytes = encode_world(world)?;
        self.file.snapshots.push(ReplaySnapshot {
            frame: world.frame,
            world_bytes,
        });
        Ok(())
    }

    /// Frames recorded so far.
    pub fn frame_count(&self) -> usize {
        self.file.frames.len()
    }

    /// Finish recording and take the file.
    pub fn finish(self) -> BattleReplayFile {
        self.file
    }
}
