//! Q16.16 Fixed-Point Arithmetic
//!
//! Deterministic fixed-point math for the simulation. All positional and
//! velocity arithmetic in this crate goes through these functions - no
//! floats ever touch game state.
//!
//! ## Format: Q16.16
//!
//! 32-bit signed integer, 16 integer bits, 16 fractional bits.
//! Range roughly -32768.0 to +32767.99998, precision 1/65536.
//!
//! ## Determinism
//!
//! Every operation uses wrapping integer arithmetic with truncation toward
//! zero, so two machines executing the same sequence produce bit-identical
//! results on any platform.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE;

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1;

/// Maximum positive value
pub const FIXED_MAX: Fixed = i32::MAX;

/// Minimum negative value
pub const FIXED_MIN: Fixed = i32::MIN;

/// Convert a compile-time float to fixed-point.
///
/// # Warning
/// Only use at compile-time or initialization. NEVER in the tick loop.
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to float for display/logging.
///
/// # Warning
/// Only use for output. NEVER feed the result back into simulation state.
#[inline]
pub fn to_float(f: Fixed) -> f32 {
    f as f32 / FIXED_ONE as f32
}

/// Multiply two fixed-point numbers.
///
/// Uses an i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Divide two fixed-point numbers.
///
/// Pre-shifts the numerator to maintain precision.
/// Returns 0 on divide-by-zero (deterministic, never panics).
#[inline]
pub fn fixed_div(a: Fixed, b: Fixed) -> Fixed {
    if b == 0 {
        return 0;
    }
    let wide = (a as i64) << FIXED_SCALE;
    (wide / b as i64) as Fixed
}

/// Square root using Newton-Raphson iteration.
///
/// Returns 0 for non-positive inputs. Uses exactly 6 iterations so every
/// peer converges to the same value.
///
/// Prefer squared distances where possible to avoid the sqrt entirely.
#[inline]
pub fn fixed_sqrt(x: Fixed) -> Fixed {
    if x <= 0 {
        return 0;
    }

    let mut guess = (x >> 1).max(1);

    for _ in 0..6 {
        let div = fixed_div(x, guess);
        guess = (guess.wrapping_add(div)) >> 1;

        if guess == 0 {
            guess = 1;
        }
    }

    guess
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 {
        x.wrapping_neg()
    } else {
        x
    }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b {
        a
    } else {
        b
    }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b {
        a
    } else {
        b
    }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Linear interpolation: a + (b - a) * t
/// where t is in fixed-point (0.0 = 0, 1.0 = FIXED_ONE)
#[inline]
pub fn fixed_lerp(a: Fixed, b: Fixed, t: Fixed) -> Fixed {
    let diff = b.wrapping_sub(a);
    a.wrapping_add(fixed_mul(diff, t))
}

/// Ergonomic wrapper around fixed-point with operator overloading.
///
/// Use this for cleaner code when performance isn't critical.
/// For hot paths, use raw `Fixed` with the `fixed_*` functions.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FixedNum(pub Fixed);

impl FixedNum {
    /// Zero constant
    pub const ZERO: Self = Self(0);

    /// One constant
    pub const ONE: Self = Self(FIXED_ONE);

    /// Create from raw fixed-point value
    #[inline]
    pub const fn from_raw(raw: Fixed) -> Self {
        Self(raw)
    }

    /// Create from integer
    #[inline]
    pub const fn from_int(i: i32) -> Self {
        Self(i << FIXED_SCALE)
    }

    /// Get raw fixed-point value
    #[inline]
    pub const fn raw(self) -> Fixed {
        self.0
    }

    /// Convert to float for display
    #[inline]
    pub fn to_float(self) -> f32 {
        to_float(self.0)
    }

    /// Absolute value
    #[inline]
    pub fn abs(self) -> Self {
        Self(fixed_abs(self.0))
    }

    /// Square root
    #[inline]
    pub fn sqrt(self) -> Self {
        Self(fixed_sqrt(self.0))
    }
}

impl Add for FixedNum {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self(self.0.wrapping_add(rhs.0))
    }
}

impl Sub for FixedNum {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self(self.0.wrapping_sub(rhs.0))
    }
}

impl Mul for FixedNum {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self(fixed_mul(self.0, rhs.0))
    }
}

impl Div for FixedNum {
    type Output = Self;
    #[inline]
    fn div(self, rhs: Self) -> Self {
        Self(fixed_div(self.0, rhs.0))
    }
}

impl Neg for FixedNum {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self(self.0.wrapping_neg())
    }
}

impl fmt::Debug for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fixed({:.4})", self.to_float())
    }
}

impl fmt::Display for FixedNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.to_float())
    }
}
