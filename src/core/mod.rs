//! Deterministic primitives.
//!
//! Everything the simulation computes with: Q16.16 fixed-point scalars,
//! fixed-point vectors and quaternions, a seeded PRNG, and state hashing.
//! Nothing in this module may touch floating point on a simulation path.

pub mod fixed;
pub mod hash;
pub mod quat;
pub mod rng;
pub mod vec3;
