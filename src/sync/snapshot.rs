//! Late-Join Snapshots
//!
//! A snapshot is the bincode-serialized world compressed with zstd, split
//! into fixed-size chunks for transport. The joiner reassembles the
//! chunks, restores the world, rebuilds derived state, then replays the
//! buffered frames between the snapshot frame and the live frame.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::sim::world::World;
use crate::sync::protocol::{RoomId, ServerMessage};

/// zstd level for snapshot compression. Level 3 is the speed/size balance
/// point for payloads this size.
pub const SNAPSHOT_COMPRESSION_LEVEL: i32 = 3;

/// Default transport chunk size.
pub const SNAPSHOT_CHUNK_SIZE: usize = 32 * 1024;

/// Snapshot encode/decode/transfer failure.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// World (de)serialization failed.
    #[error("world codec error: {0}")]
    Codec(#[from] bincode::Error),
    /// Compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),
    /// A chunk arrived before `SnapshotStart`.
    #[error("chunk {0} arrived before snapshot start")]
    NotStarted(u32),
    /// Chunk index at or beyond the announced count.
    #[error("chunk index {index} out of range (count {count})")]
    ChunkOutOfRange {
        /// Offending index.
        index: u32,
        /// Announced chunk count.
        count: u32,
    },
    /// The same chunk index arrived twice.
    #[error("duplicate chunk {0}")]
    DuplicateChunk(u32),
    /// Reassembled size differs from the announced total.
    #[error("snapshot size mismatch: announced {announced}, got {got}")]
    SizeMismatch {
        /// Size from `SnapshotStart`.
        announced: u64,
        /// Reassembled size.
        got: u64,
    },
}

/// Serialize and compress a world.
pub fn encode_world(world: &World) -> Result<Vec<u8>, SnapshotError> {
    let raw = bincode::serialize(world)?;
    let compressed = zstd::encode_all(raw.as_slice(), SNAPSHOT_COMPRESSION_LEVEL)?;
    tracing::debug!(
        raw_bytes = raw.len(),
        compressed_bytes = compressed.len(),
        frame = world.frame,
        "encoded world snapshot"
    );
    Ok(compressed)
}

/// Decompress an encoded snapshot back to the raw serialized world bytes.
pub fn decompress_world(bytes: &[u8]) -> Result<Vec<u8>, SnapshotError> {
    Ok(zstd::decode_all(bytes)?)
}

/// Decompress and deserialize a world, rebuilding its derived state.
pub fn decode_world(bytes: &[u8]) -> Result<World, SnapshotError> {
    let raw = decompress_world(bytes)?;
    let mut world: World = bincode::deserialize(&raw)?;
    world.rebuild_derived();
    Ok(world)
}

/// Split an encoded snapshot into the `SnapshotStart` + `SnapshotChunk`
/// message sequence.
pub fn chunk_snapshot(
    room_id: RoomId,
    snapshot_frame: u32,
    bytes: &[u8],
    chunk_size: usize,
) -> Vec<ServerMessage> {
    let chunk_size = chunk_size.max(1);
    let chunks: Vec<&[u8]> = bytes.chunks(chunk_size).collect();

    let mut messages = Vec::with_capacity(chunks.len() + 1);
    messages.push(ServerMessage::SnapshotStart {
        room_id,
        snapshot_frame,
        chunk_count: chunks.len() as u32,
        total_bytes: bytes.len() as u64,
    });
    for (index, chunk) in chunks.into_iter().enumerate() {
        messages.push(ServerMessage::SnapshotChunk {
            room_id,
            index: index as u32,
            data: chunk.to_vec(),
        });
    }
    messages
}

/// Client-side reassembly of an in-flight snapshot.
///
/// Chunks may arrive in any order; the snapshot is complete once every
/// announced index is present and the total size matches.
#[derive(Debug, Default)]
pub struct SnapshotAssembler {
    announced: Option<(u32, u32, u64)>, // (snapshot_frame, chunk_count, total_bytes)
    chunks: BTreeMap<u32, Vec<u8>>,
}

impl SnapshotAssembler {
    /// Empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin (or restart) reassembly from a `SnapshotStart`. Any chunks
    /// from a previous attempt are discarded.
    pub fn accept_start(&mut self, snapshot_frame: u32, chunk_count: u32, total_bytes: u64) {
        self.announced = Some((snapshot_frame, chunk_count, total_bytes));
        self.chunks.clear();
    }

    /// Accept one chunk. Returns the reassembled snapshot bytes once the
    /// final chunk lands.
    pub fn accept_chunk(
        &mut self,
        index: u32,
        data: Vec<u8>,
    ) -> Result<Option<Vec<u8>>, SnapshotError> {
        let (_, chunk_count, total_bytes) = self.announced.ok_or(SnapshotError::NotStarted(index))?;
        if index >= chunk_count {
            return Err(SnapshotError::ChunkOutOfRange {
                index,
                count: chunk_count,
            });
        }
        if self.chunks.contains_key(&index) {
            return Err(SnapshotError::DuplicateChunk(index));
        }
        self.chunks.insert(index, data);

        if self.chunks.len() < chunk_count as usize {
            return Ok(None);
        }

        let mut assembled = Vec::with_capacity(total_bytes as usize);
        for chunk in self.chunks.values() {
            assembled.extend_from_slice(chunk);
        }
        if assembled.len() as u64 != total_bytes {
            return Err(SnapshotError::SizeMismatch {
                announced: total_bytes,
                got: assembled.len() as u64,
            });
        }
        Ok(Some(assembled))
    }

    /// Frame of the snapshot being assembled.
    pub fn snapshot_frame(&self) -> Option<u32> {
        self.announced.map(|(frame, _, _)| frame)
    }

    /// Chunks received so far.
    pub fn received(&self) -> usize {
        self.chunks.len()
    }
}
