//! State Hashing for Divergence Detection
//!
//! Deterministic hashing of world state. Every peer can hash its world
//! after each frame and compare against the authority's hash; a mismatch
//! means silent divergence, the worst failure mode of a lockstep
//! simulation.

use sha2::{Digest, Sha256};

use super::fixed::Fixed;
use super::vec3::FixedVec3;

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for simulation state.
///
/// Wraps SHA-256 with helpers for fixed-point types.
/// Order of updates is critical for determinism.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for world state.
    pub fn for_world_state() -> Self {
        Self::new(b"LOCKSTEP_ARENA_WORLD_V1")
    }

    /// Update with raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a u64 value (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a Fixed value.
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.update_i32(value);
    }

    /// Update with a FixedVec3.
    #[inline]
    pub fn update_vec3(&mut self, value: FixedVec3) {
        self.update_fixed(value.x);
        self.update_fixed(value.y);
        self.update_fixed(value.z);
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with a string (length-prefixed to avoid ambiguity).
    #[inline]
    pub fn update_str(&mut self, value: &str) {
        self.update_u32(value.len() as u32);
        self.hasher.update(value.as_bytes());
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Compute a simple hash of arbitrary data.
pub fn hash_bytes(data: &[u8]) -> StateHash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}
