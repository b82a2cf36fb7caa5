//! Chunkstream - voxel chunk streaming core
//!
//! Sparse octree chunks serialized as pointer-free byte arrays, a first-fit
//! allocator packing them into one shared buffer, and a per-frame world
//! that keeps the chunks around the camera resident.

pub mod core;
pub mod math;
pub mod voxel;
pub mod streaming;
pub mod terrain;
