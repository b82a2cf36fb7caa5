//! Voxel data structures

pub mod chunk;
pub mod svo;

pub use chunk::{Chunk, ChunkCoord, CHUNK_LEVELS, CHUNK_SIZE};
pub use svo::Octree;
