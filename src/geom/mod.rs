//! Geometry generators: splines to meshes, heightfields to grids,
//! decals to clipped patches, instances to batches.

pub mod bvh;
pub mod decal;
pub mod instances;
pub mod mesh_road;
pub mod river;
pub mod road;
pub mod spline;
pub mod terrain;
