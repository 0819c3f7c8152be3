//! Fixed-Point Quaternion
//!
//! Minimal quaternion support for rotating collision shapes into world
//! space. Uses the same Q16.16 arithmetic as the rest of the core, so
//! rotation results are bit-identical on every peer.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::fixed::{fixed_div, fixed_mul, fixed_sqrt, Fixed, FIXED_ONE};
use super::vec3::FixedVec3;

/// Quaternion with fixed-point components (x, y, z, w).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FixedQuat {
    /// X component (Q16.16)
    pub x: Fixed,
    /// Y component (Q16.16)
    pub y: Fixed,
    /// Z component (Q16.16)
    pub z: Fixed,
    /// W (scalar) component (Q16.16)
    pub w: Fixed,
}

impl Default for FixedQuat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl FixedQuat {
    /// Identity rotation.
    pub const IDENTITY: Self = Self { x: 0, y: 0, z: 0, w: FIXED_ONE };

    /// Create from raw fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed, w: Fixed) -> Self {
        Self { x, y, z, w }
    }

    /// True if this is (close enough to) the identity rotation.
    #[inline]
    pub fn is_identity(self) -> bool {
        self.x == 0 && self.y == 0 && self.z == 0
    }

    /// Squared norm of the quaternion.
    #[inline]
    pub fn norm_squared(self) -> Fixed {
        fixed_mul(self.x, self.x)
            .wrapping_add(fixed_mul(self.y, self.y))
            .wrapping_add(fixed_mul(self.z, self.z))
            .wrapping_add(fixed_mul(self.w, self.w))
    }

    /// Normalize to unit length. Returns identity if the norm is zero.
    pub fn normalize(self) -> Self {
        let norm = fixed_sqrt(self.norm_squared());
        if norm == 0 {
            return Self::IDENTITY;
        }
        Self {
            x: fixed_div(self.x, norm),
            y: fixed_div(self.y, norm),
            z: fixed_div(self.z, norm),
            w: fixed_div(self.w, norm),
        }
    }

    /// Conjugate (inverse for unit quaternions).
    #[inline]
    pub fn conjugate(self) -> Self {
        Self {
            x: self.x.wrapping_neg(),
            y: self.y.wrapping_neg(),
            z: self.z.wrapping_neg(),
            w: self.w,
        }
    }

    /// Hamilton product with another quaternion.
    pub fn mul(self, o: Self) -> Self {
        Self {
            x: fixed_mul(self.w, o.x)
                .wrapping_add(fixed_mul(self.x, o.w))
                .wrapping_add(fixed_mul(self.y, o.z))
                .wrapping_sub(fixed_mul(self.z, o.y)),
            y: fixed_mul(self.w, o.y)
                .wrapping_sub(fixed_mul(self.x, o.z))
                .wrapping_add(fixed_mul(self.y, o.w))
                .wrapping_add(fixed_mul(self.z, o.x)),
            z: fixed_mul(self.w, o.z)
                .wrapping_add(fixed_mul(self.x, o.y))
                .wrapping_sub(fixed_mul(self.y, o.x))
                .wrapping_add(fixed_mul(self.z, o.w)),
            w: fixed_mul(self.w, o.w)
                .wrapping_sub(fixed_mul(self.x, o.x))
                .wrapping_sub(fixed_mul(self.y, o.y))
                .wrapping_sub(fixed_mul(self.z, o.z)),
        }
    }

    /// Rotate a vector by this quaternion.
    ///
    /// Uses the expanded v' = v + 2*cross(q.xyz, cross(q.xyz, v) + w*v)
    /// form, which needs fewer multiplies than q*v*q'.
    pub fn rotate(self, v: FixedVec3) -> FixedVec3 {
        if self.is_identity() {
            return v;
        }

        let qv = FixedVec3::new(self.x, self.y, self.z);
        let t = qv.cross(v).add(v.scale(self.w));
        let t2 = qv.cross(t);
        v.add(t2).add(t2)
    }
}

impl fmt::Debug for FixedQuat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Quat({:.3}, {:.3}, {:.3}, {:.3})",
            self.x as f32 / FIXED_ONE as f32,
            self.y as f32 / FIXED_ONE as f32,
            self.z as f32 / FIXED_ONE as f32,
            self.w as f32 / FIXED_ONE as f32,
        )
    }
}
