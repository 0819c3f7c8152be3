//! Fixed-Point 3D Vector
//!
//! Deterministic 3D vector operations for transforms and hit queries.
//! All operations use fixed-point arithmetic.

use std::fmt;
use std::ops::{Add, Neg, Sub};

use serde::{Deserialize, Serialize};

use super::fixed::{fixed_clamp, fixed_div, fixed_mul, fixed_sqrt, Fixed, FIXED_ONE, FIXED_SCALE};

/// 3D vector with fixed-point components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec3 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
    /// Z component (Q16.16 fixed-point)
    pub z: Fixed,
}

impl FixedVec3 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    /// Unit vector pointing along +X
    pub const RIGHT: Self = Self { x: FIXED_ONE, y: 0, z: 0 };

    /// Unit vector pointing along +Y
    pub const UP: Self = Self { x: 0, y: FIXED_ONE, z: 0 };

    /// Unit vector pointing along +Z
    pub const FORWARD: Self = Self { x: 0, y: 0, z: FIXED_ONE };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed, z: Fixed) -> Self {
        Self { x, y, z }
    }

    /// Create a vector from integer components.
    #[inline]
    pub const fn from_ints(x: i32, y: i32, z: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
            z: z << FIXED_SCALE,
        }
    }

    /// Add another vector.
    #[inline]
    pub fn add(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_add(other.x),
            y: self.y.wrapping_add(other.y),
            z: self.z.wrapping_add(other.z),
        }
    }

    /// Subtract another vector.
    #[inline]
    pub fn sub(self, other: Self) -> Self {
        Self {
            x: self.x.wrapping_sub(other.x),
            y: self.y.wrapping_sub(other.y),
            z: self.z.wrapping_sub(other.z),
        }
    }

    /// Scale by a fixed-point scalar.
    #[inline]
    pub fn scale(self, scalar: Fixed) -> Self {
        Self {
            x: fixed_mul(self.x, scalar),
            y: fixed_mul(self.y, scalar),
            z: fixed_mul(self.z, scalar),
        }
    }

    /// Divide by a fixed-point scalar.
    #[inline]
    pub fn div_scalar(self, scalar: Fixed) -> Self {
        Self {
            x: fixed_div(self.x, scalar),
            y: fixed_div(self.y, scalar),
            z: fixed_div(self.z, scalar),
        }
    }

    /// Squared length (avoids sqrt - prefer this for comparisons).
    #[inline]
    pub fn length_squared(self) -> Fixed {
        fixed_mul(self.x, self.x)
            .wrapping_add(fixed_mul(self.y, self.y))
            .wrapping_add(fixed_mul(self.z, self.z))
    }

    /// Length (magnitude). Prefer `length_squared` when possible.
    #[inline]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.length_squared())
    }

    /// Squared distance to another point.
    #[inline]
    pub fn distance_squared(self, other: Self) -> Fixed {
        self.sub(other).length_squared()
    }

    /// Distance to another point. Prefer `distance_squared` when possible.
    #[inline]
    pub fn distance(self, other: Self) -> Fixed {
        fixed_sqrt(self.distance_squared(other))
    }

    /// Normalize to unit length.
    /// Returns ZERO if length is zero.
    #[inline]
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len == 0 {
            return Self::ZERO;
        }
        self.div_scalar(len)
    }

    /// Dot product with another vector.
    #[inline]
    pub fn dot(self, other: Self) -> Fixed {
        fixed_mul(self.x, other.x)
            .wrapping_add(fixed_mul(self.y, other.y))
            .wrapping_add(fixed_mul(self.z, other.z))
    }

    /// Cross product with another vector.
    #[inline]
    pub fn cross(self, other: Self) -> Self {
        Self {
            x: fixed_mul(self.y, other.z).wrapping_sub(fixed_mul(self.z, other.y)),
            y: fixed_mul(self.z, other.x).wrapping_sub(fixed_mul(self.x, other.z)),
            z: fixed_mul(self.x, other.y).wrapping_sub(fixed_mul(self.y, other.x)),
        }
    }

    /// Clamp all components to a range.
    #[inline]
    pub fn clamp(self, min: Fixed, max: Fixed) -> Self {
        Self {
            x: fixed_clamp(self.x, min, max),
            y: fixed_clamp(self.y, min, max),
            z: fixed_clamp(self.z, min, max),
        }
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self {
            x: self.x.min(other.x),
            y: self.y.min(other.y),
            z: self.z.min(other.z),
        }
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self {
            x: self.x.max(other.x),
            y: self.y.max(other.y),
            z: self.z.max(other.z),
        }
    }

    /// Component-wise absolute value.
    #[inline]
    pub fn abs(self) -> Self {
        Self {
            x: super::fixed::fixed_abs(self.x),
            y: super::fixed::fixed_abs(self.y),
            z: super::fixed::fixed_abs(self.z),
        }
    }

    /// Linear interpolation between two vectors.
    /// t = 0 returns self, t = FIXED_ONE returns other.
    #[inline]
    pub fn lerp(self, other: Self, t: Fixed) -> Self {
        Self {
            x: self.x.wrapping_add(fixed_mul(other.x.wrapping_sub(self.x), t)),
            y: self.y.wrapping_add(fixed_mul(other.y.wrapping_sub(self.y), t)),
            z: self.z.wrapping_add(fixed_mul(other.z.wrapping_sub(self.z), t)),
        }
    }

    /// Negate all components.
    #[inline]
    pub fn negate(self) -> Self {
        Self {
            x: self.x.wrapping_neg(),
            y: self.y.wrapping_neg(),
            z: self.z.wrapping_neg(),
        }
    }

    /// Convert to float tuple for logging/rendering.
    #[inline]
    pub fn to_floats(self) -> (f32, f32, f32) {
        (
            self.x as f32 / FIXED_ONE as f32,
            self.y as f32 / FIXED_ONE as f32,
            self.z as f32 / FIXED_ONE as f32,
        )
    }
}

impl Add for FixedVec3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        self.add(rhs)
    }
}

impl Sub for FixedVec3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self.sub(rhs)
    }
}

impl Neg for FixedVec3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        self.negate()
    }
}

impl fmt::Debug for FixedVec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy, fz) = self.to_floats();
        write!(f, "Vec3({:.3}, {:.3}, {:.3})", fx, fy, fz)
    }
}

impl fmt::Display for FixedVec3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fx, fy, fz) = self.to_floats();
        write!(f, "({:.3}, {:.3}, {:.3})", fx, fy, fz)
    }
}

/// 2D vector with fixed-point components, used for player move input.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Debug, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Squared length.
    #[inline]
    pub fn length_squared(self) -> Fixed {
        fixed_mul(self.x, self.x).wrapping_add(fixed_mul(self.y, self.y))
    }

    /// Length (magnitude).
    #[inline]
    pub fn length(self) -> Fixed {
        fixed_sqrt(self.length_squared())
    }

    /// True if both components are zero.
    #[inline]
    pub fn is_zero(self) -> bool {
        self.x == 0 && self.y == 0
    }

    /// Lift to a 3D vector on the ground plane (y = 0).
    #[inline]
    pub fn to_ground_plane(self) -> FixedVec3 {
        FixedVec3::new(self.x, 0, self.y)
    }
}
