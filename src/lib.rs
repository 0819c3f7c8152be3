//! # Lockstep Arena
//!
//! Deterministic lockstep simulation core for multiplayer action games.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     LOCKSTEP ARENA                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Deterministic primitives                 │
//! │  ├── fixed.rs     - Q16.16 fixed-point arithmetic            │
//! │  ├── vec3.rs      - Fixed-point 2D/3D vectors                │
//! │  ├── quat.rs      - Fixed-point quaternions                  │
//! │  ├── rng.rs       - Deterministic Xorshift128+ PRNG          │
//! │  └── hash.rs      - State hashing for divergence detection   │
//! │                                                              │
//! │  sim/             - Simulation model (deterministic)         │
//! │  ├── entity.rs    - Entities, capability state, tag disables │
//! │  ├── component.rs - Serializable component data              │
//! │  ├── capability.rs- Capability trait and registry            │
//! │  ├── scheduler.rs - Per-frame capability scheduling          │
//! │  ├── effects.rs   - Deferred skill effect queue              │
//! │  ├── capabilities - Movement and melee attack                │
//! │  └── world.rs     - World container and snapshots            │
//! │                                                              │
//! │  hitquery/        - Spatial hit queries (deterministic)      │
//! │  ├── shape.rs     - Collision shapes and shape text format   │
//! │  └── engine.rs    - Overlap queries with per-skill dedup     │
//! │                                                              │
//! │  sync/            - Frame synchronization                    │
//! │  ├── input.rs     - Per-frame inputs                         │
//! │  ├── buffer.rs    - Frame input buffer                       │
//! │  ├── protocol.rs  - Wire messages                            │
//! │  ├── authority.rs - Server-side frame collection             │
//! │  ├── snapshot.rs  - Chunked late-join snapshots              │
//! │  └── session.rs   - Non-blocking client session pump         │
//! │                                                              │
//! │  replay/          - Recording and seekable playback          │
//! │  ├── file.rs      - Replay file format and recorder          │
//! │  └── timeline.rs  - Checkpoint seek + re-simulation          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/`, `sim/` and `hitquery/` modules are **100% deterministic**:
//! - No floating-point arithmetic in simulation logic
//! - No HashMap (BTreeMap/BTreeSet for sorted iteration)
//! - No system time dependencies (timestamps are diagnostic only)
//! - All randomness from the seeded, serialized Xorshift128+ stream
//!
//! Given the same seed and the same per-frame input sets, every peer
//! produces **bit-identical worlds** on any platform. The SHA-256 state
//! hash makes silent divergence loud.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod hitquery;
pub mod replay;
pub mod sim;
pub mod sync;

// Re-export commonly used types
pub use crate::core::fixed::{to_fixed, Fixed, FIXED_HALF, FIXED_ONE, FIXED_SCALE};
pub use crate::core::hash::{StateHash, StateHasher};
pub use crate::core::quat::FixedQuat;
pub use crate::core::rng::DeterministicRng;
pub use crate::core::vec3::{FixedVec2, FixedVec3};
pub use crate::hitquery::{CollisionShape, HitFilter, HitQueryEngine, SpatialIndex};
pub use crate::replay::{BattleReplayFile, ReplayRecorder, ReplayTimeline};
pub use crate::sim::{
    Capability, CapabilityRegistry, CapabilityTypeId, Component, ComponentKind,
    EffectHandlerRegistry, EntityId, SkillEffectConfig, SkillEffectData, World,
};
pub use crate::sync::{
    FrameAuthority, FrameBuffer, FrameSyncData, LSInput, OneFrameInputs, PlayerId, PlayerSeat,
    RoomId, SimSession,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;

/// Fixed timestep in Q16.16 seconds (1/60, truncated). Every peer must
/// use this exact value - computing it locally from floats would risk
/// divergence.
pub const FRAME_INTERVAL: Fixed = (FIXED_ONE as i64 / TICK_RATE as i64) as Fixed;
