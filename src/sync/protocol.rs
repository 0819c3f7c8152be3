//! Sync Protocol Messages
//!
//! The message vocabulary between clients and the frame authority. The
//! binary encoding (bincode) is the wire format; JSON helpers exist for
//! logging and debug tooling only.
//!
//! Nothing here performs IO: transports deliver opaque byte buffers and
//! call into these types at the edges.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::fixed::Fixed;
use crate::core::hash::StateHash;
use crate::sim::entity::EntityId;
use crate::sync::input::{LSInput, OneFrameInputs, PlayerId};

/// Identifies one match room.
pub type RoomId = Uuid;

/// Encode/decode failure at the protocol edge.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Binary encode/decode failed.
    #[error("binary codec error: {0}")]
    Binary(#[from] bincode::Error),
    /// JSON encode/decode failed.
    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One player's seat in a room: identity plus the entity they control.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSeat {
    /// The player.
    pub player: PlayerId,
    /// The entity this player controls.
    pub entity: EntityId,
    /// Display name for rosters and logs.
    pub display_name: String,
}

/// A completed, authoritative frame broadcast to every client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSyncData {
    /// The room this frame belongs to.
    pub room_id: RoomId,
    /// The frame number these inputs drive.
    pub authority_frame: u32,
    /// The completed input set. Immutable from here on.
    pub inputs: OneFrameInputs,
    /// Server wall-clock milliseconds when the frame completed.
    /// Diagnostic only.
    pub timestamp: u64,
    /// Authority's world hash after simulating this frame, when the
    /// authority runs the simulation. Clients compare for divergence.
    pub state_hash: Option<StateHash>,
}

/// Parameters every client needs before the first simulated frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSyncStartData {
    /// The room being started.
    pub room_id: RoomId,
    /// Simulation rate in frames per second.
    pub tick_rate: u32,
    /// Fixed timestep, seconds in Q16.16. Must equal 1/tick_rate on every
    /// peer.
    pub frame_interval: Fixed,
    /// First frame to simulate.
    pub start_frame: u32,
    /// Server wall-clock milliseconds at start. Diagnostic only.
    pub start_time: u64,
    /// World RNG seed.
    pub seed: u64,
    /// Every seat in the room, in player order.
    pub roster: Vec<PlayerSeat>,
}

/// Messages a client sends to the authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Upload this player's input for a future frame.
    InputUpload {
        /// Target room.
        room_id: RoomId,
        /// The input. Its frame must be at or ahead of the authority
        /// frame or it is discarded.
        input: LSInput,
    },
    /// Ask for completed frames `[from_frame, to_frame]` to be re-sent
    /// after a gap.
    SyncRequest {
        /// Target room.
        room_id: RoomId,
        /// First missing frame.
        from_frame: u32,
        /// Last missing frame.
        to_frame: u32,
    },
    /// Liveness probe; echoed back as `Pong`.
    Ping {
        /// Sender wall-clock milliseconds.
        timestamp: u64,
    },
    /// Leave the room.
    Leave {
        /// Target room.
        room_id: RoomId,
        /// The departing player.
        player: PlayerId,
    },
}

/// Messages the authority sends to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Match parameters; sent once before the first `FrameSync`.
    FrameSyncStart(FrameSyncStartData),
    /// One completed frame.
    FrameSync(FrameSyncData),
    /// The match is over; no further frames will be produced.
    FrameSyncEnd {
        /// The room being ended.
        room_id: RoomId,
        /// Last frame that was completed.
        final_frame: u32,
        /// Server wall-clock milliseconds at end. Diagnostic only.
        end_time: u64,
        /// Human-readable end reason.
        reason: String,
    },
    /// A late-join snapshot follows, split into `chunk_count` chunks.
    SnapshotStart {
        /// The room the snapshot belongs to.
        room_id: RoomId,
        /// Frame the snapshot was taken at.
        snapshot_frame: u32,
        /// Number of chunks that follow.
        chunk_count: u32,
        /// Total compressed size, for validation.
        total_bytes: u64,
    },
    /// One snapshot chunk.
    SnapshotChunk {
        /// The room the snapshot belongs to.
        room_id: RoomId,
        /// Chunk position, `0..chunk_count`.
        index: u32,
        /// Compressed snapshot bytes.
        data: Vec<u8>,
    },
    /// Echo of a `Ping`.
    Pong {
        /// Timestamp copied from the ping.
        timestamp: u64,
    },
}

/// Encode a message for the wire.
pub fn to_bytes<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(bincode::serialize(message)?)
}

/// Decode a message from the wire.
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, ProtocolError> {
    Ok(bincode::deserialize(bytes)?)
}

/// Encode a message as JSON for logs and debug tooling.
pub fn to_json<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a message from JSON.
pub fn from_json<T: for<'de> Deserialize<'de>>(json: &str) -> Result<T, ProtocolError> {
    Ok(serde_json::from_str(json)?)
}
