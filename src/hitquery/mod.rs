//! Spatial hit queries: collision shapes, the shape text format, and the
//! overlap/dedup engine skills query against.

pub mod engine;
pub mod shape;

pub use engine::{HitFilter, HitProxy, HitQueryEngine, SpatialIndex};
pub use shape::{parse_shape, parse_shape_list, Aabb, CollisionShape, ShapeParseError};
