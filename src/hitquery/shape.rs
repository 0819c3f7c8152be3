//! Collision Shapes
//!
//! Shape definitions for hit queries, plus the text format they are loaded
//! from. Shape text comes from designer-authored config: parsing is
//! defensive (a malformed entry is logged and skipped, never fatal) and
//! happens once at load time, so the float-to-fixed conversion it does
//! never runs inside the simulation loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::fixed::{to_fixed, Fixed};
use crate::core::quat::FixedQuat;
use crate::core::vec3::FixedVec3;

/// A collision shape in entity-local space.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Oriented box.
    Box {
        /// Center offset from the entity origin.
        offset: FixedVec3,
        /// Local rotation relative to the entity.
        rotation: FixedQuat,
        /// Half extents along the box's local axes.
        half_extents: FixedVec3,
    },
    /// Sphere. The rotation is carried for format uniformity but does not
    /// affect the volume.
    Sphere {
        /// Center offset from the entity origin.
        offset: FixedVec3,
        /// Local rotation relative to the entity.
        rotation: FixedQuat,
        /// Sphere radius.
        radius: Fixed,
    },
    /// Capsule along the local Y axis. Accepted by the parser; queries
    /// against it are not implemented yet and return no hits.
    Capsule {
        /// Center offset from the entity origin.
        offset: FixedVec3,
        /// Local rotation relative to the entity.
        rotation: FixedQuat,
        /// Capsule radius.
        radius: Fixed,
        /// Distance between the two hemisphere centers.
        height: Fixed,
    },
}

impl CollisionShape {
    /// Axis-aligned bounds of this shape placed at a world transform.
    ///
    /// For rotated boxes this is the conservative enclosing AABB (projected
    /// half extents), so it may admit near-misses but never rejects a true
    /// overlap.
    pub fn world_aabb(&self, entity_pos: FixedVec3, entity_rot: FixedQuat) -> Aabb {
        match *self {
            CollisionShape::Box {
                offset,
                rotation,
                half_extents,
            } => {
                let center = entity_pos.add(entity_rot.rotate(offset));
                let world_rot = entity_rot.mul(rotation);
                // |R*ex|*hx + |R*ey|*hy + |R*ez|*hz, component-wise
                let ex = world_rot.rotate(FixedVec3::RIGHT).abs().scale(half_extents.x);
                let ey = world_rot.rotate(FixedVec3::UP).abs().scale(half_extents.y);
                let ez = world_rot
                    .rotate(FixedVec3::FORWARD)
                    .abs()
                    .scale(half_extents.z);
                let half = ex.add(ey).add(ez);
                Aabb::from_center_half(center, half)
            }
            CollisionShape::Sphere { offset, radius, .. } => {
                let center = entity_pos.add(entity_rot.rotate(offset));
                Aabb::from_center_half(center, FixedVec3::new(radius, radius, radius))
            }
            CollisionShape::Capsule {
                offset,
                rotation,
                radius,
                height,
            } => {
                let center = entity_pos.add(entity_rot.rotate(offset));
                let world_rot = entity_rot.mul(rotation);
                // Treat as a box of half extents (r, h/2 + r, r) and bound
                // it conservatively like a rotated box.
                let half_local = FixedVec3::new(radius, (height >> 1) + radius, radius);
                let ex = world_rot.rotate(FixedVec3::RIGHT).abs().scale(half_local.x);
                let ey = world_rot.rotate(FixedVec3::UP).abs().scale(half_local.y);
                let ez = world_rot
                    .rotate(FixedVec3::FORWARD)
                    .abs()
                    .scale(half_local.z);
                Aabb::from_center_half(center, ex.add(ey).add(ez))
            }
        }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub min: FixedVec3,
    /// Maximum corner.
    pub max: FixedVec3,
}

impl Aabb {
    /// Build from a center and half extents.
    pub fn from_center_half(center: FixedVec3, half: FixedVec3) -> Self {
        Self {
            min: center.sub(half),
            max: center.add(half),
        }
    }

    /// Whether two boxes overlap (touching counts).
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// The point inside this box closest to `point`. max/min chaining
    /// instead of `clamp` so a degenerate box cannot panic.
    #[inline]
    pub fn closest_point(&self, point: FixedVec3) -> FixedVec3 {
        FixedVec3::new(
            point.x.max(self.min.x).min(self.max.x),
            point.y.max(self.min.y).min(self.max.y),
            point.z.max(self.min.z).min(self.max.z),
        )
    }
}

// =============================================================================
// Shape text format
// =============================================================================

/// Error describing why one shape entry failed to parse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShapeParseError {
    /// Unrecognized shape name.
    #[error("unknown shape kind {0:?}")]
    UnknownKind(String),
    /// Wrong number of `:`-separated fields for the kind.
    #[error("{kind} expects {expected} fields, got {got}")]
    FieldCount {
        /// Shape kind being parsed.
        kind: &'static str,
        /// Fields the kind requires.
        expected: usize,
        /// Fields present in the entry.
        got: usize,
    },
    /// A numeric field failed to parse.
    #[error("bad number {0:?}")]
    BadNumber(String),
    /// A vector field had the wrong component count.
    #[error("expected {expected} comma-separated components, got {got}")]
    ComponentCount {
        /// Components required.
        expected: usize,
        /// Components present.
        got: usize,
    },
}

fn parse_number(text: &str) -> Result<Fixed, ShapeParseError> {
    text.trim()
        .parse::<f64>()
        .map(to_fixed)
        .map_err(|_| ShapeParseError::BadNumber(text.to_string()))
}

fn parse_components(text: &str, expected: usize) -> Result<Vec<Fixed>, ShapeParseError> {
    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != expected {
        return Err(ShapeParseError::ComponentCount {
            expected,
            got: parts.len(),
        });
    }
    parts.iter().map(|p| parse_number(p)).collect()
}

fn parse_vec3(text: &str) -> Result<FixedVec3, ShapeParseError> {
    let c = parse_components(text, 3)?;
    Ok(FixedVec3::new(c[0], c[1], c[2]))
}

fn parse_quat(text: &str) -> Result<FixedQuat, ShapeParseError> {
    let c = parse_components(text, 4)?;
    Ok(FixedQuat::new(c[0], c[1], c[2], c[3]).normalize())
}

/// Parse one shape entry.
///
/// Format (fields separated by `:`, vector components by `,`):
///
/// ```text
/// Box:ox,oy,oz:rx,ry,rz,rw:hx,hy,hz
/// Sphere:ox,oy,oz:rx,ry,rz,rw:radius
/// Capsule:ox,oy,oz:rx,ry,rz,rw:radius:height
/// ```
pub fn parse_shape(entry: &str) -> Result<CollisionShape, ShapeParseError> {
    let fields: Vec<&str> = entry.trim().split(':').collect();
    let kind = fields.first().copied().unwrap_or("");
    match kind {
        "Box" => {
            if fields.len() != 4 {
                return Err(ShapeParseError::FieldCount {
                    kind: "Box",
                    expected: 4,
                    got: fields.len(),
                });
            }
            Ok(CollisionShape::Box {
                offset: parse_vec3(fields[1])?,
                rotation: parse_quat(fields[2])?,
                half_extents: parse_vec3(fields[3])?,
            })
        }
        "Sphere" => {
            if fields.len() != 4 {
                return Err(ShapeParseError::FieldCount {
                    kind: "Sphere",
                    expected: 4,
                    got: fields.len(),
                });
            }
            Ok(CollisionShape::Sphere {
                offset: parse_vec3(fields[1])?,
                rotation: parse_quat(fields[2])?,
                radius: parse_number(fields[3])?,
            })
        }
        "Capsule" => {
            if fields.len() != 5 {
                return Err(ShapeParseError::FieldCount {
                    kind: "Capsule",
                    expected: 5,
                    got: fields.len(),
                });
            }
            Ok(CollisionShape::Capsule {
                offset: parse_vec3(fields[1])?,
                rotation: parse_quat(fields[2])?,
                radius: parse_number(fields[3])?,
                height: parse_number(fields[4])?,
            })
        }
        other => Err(ShapeParseError::UnknownKind(other.to_string())),
    }
}

/// Parse a `|`-separated list of shape entries. Malformed entries are
/// logged and skipped; the valid ones are returned.
pub fn parse_shape_list(text: &str) -> Vec<CollisionShape> {
    text.split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| match parse_shape(entry) {
            Ok(shape) => Some(shape),
            Err(error) => {
                tracing::warn!(entry, %error, "skipping malformed shape entry");
                None
            }
        })
        .collect()
}
