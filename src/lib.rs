//! Core modules for decoding BeamNG.drive level assets and generating
//! host-ready geometry from them.
//!
//! The crate exposes the individual stages as building blocks: a relaxed
//! JSON decoder, a legacy object-script parser, binary format decoders,
//! a priority-ordered virtual file system over the install and mod
//! folders, and spline/heightfield/decal geometry generators.  Rendering
//! and host integration are intentionally kept outside of the crate so
//! that the code remains testable and easy to embed in headless tools.

pub mod formats;
pub mod geom;
pub mod level;
pub mod mesh;
pub mod progress;
pub mod records;
pub mod sjson;
pub mod tscript;
pub mod vfs;

pub use level::{build_level, list_levels, LevelInfo, LevelScene, NamedMesh};
pub use mesh::{Face, MeshBuffer};
pub use progress::Progress;
pub use vfs::{scan, FileIndex, ScanOptions};
