//! Frame synchronization: input types, the frame buffer, the wire
//! protocol, the server-side frame authority, late-join snapshots, and
//! the client session pump.

pub mod authority;
pub mod buffer;
pub mod input;
pub mod protocol;
pub mod session;
pub mod snapshot;

pub use authority::{FrameAuthority, FRAME_RETENTION};
pub use buffer::FrameBuffer;
pub use input::{LSInput, OneFrameInputs, PlayerId};
pub use protocol::{
    ClientMessage, FrameSyncData, FrameSyncStartData, PlayerSeat, ProtocolError, RoomId,
    ServerMessage,
};
pub use session::{SessionState, SimSession, MAX_CATCHUP_PER_PUMP};
pub use snapshot::{
    chunk_snapshot, decode_world, decompress_world, encode_world, SnapshotAssembler, SnapshotError,
    SNAPSHOT_CHUNK_SIZE, SNAPSHOT_COMPRESSION_LEVEL,
};
