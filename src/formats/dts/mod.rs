//! Packed triangle-shape (`.dts`) decoding.
//!
//! Shapes store most of their data in a single memory buffer split into
//! 32-, 16- and 8-bit tiers ([`alloc::TsAlloc`]), with guard values
//! between sections.  [`shape::TsShape::decode`] drives the whole
//! assembly; [`mesh::TsMesh`] holds the per-mesh geometry.

mod alloc;
mod mesh;
mod shape;

pub use mesh::{DrawPrimitive, MeshSlot, PrimitiveKind, SkinData, TsMesh};
pub use shape::{
    sequence_flags, IntegerSet, Quat16, ShapeDetail, ShapeMaterial, ShapeNode, ShapeObject,
    ShapeSequence, TsShape, MIN_VERSION,
};
