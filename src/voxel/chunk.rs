//! Chunk system for managing cubic regions of voxel space

use crate::core::types::Vec3;
use crate::voxel::svo::Octree;

/// Octree levels per chunk
pub const CHUNK_LEVELS: usize = 5;

/// Voxels per chunk side (`2^CHUNK_LEVELS`), also the chunk size in world units
pub const CHUNK_SIZE: u32 = Chunk::SIZE as u32;

/// Voxel contents of one chunk
///
/// Built once per generation call and dropped after its bytes are copied into
/// the shared chunk buffer.
pub type Chunk = Octree<CHUNK_LEVELS>;

/// Integer coordinate identifying a chunk column on the horizontal grid
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    /// Create a new chunk coordinate
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Convert a world position to the coordinate of the chunk containing it
    pub fn from_world_pos(pos: Vec3) -> Self {
        Self {
            x: (pos.x / CHUNK_SIZE as f32).floor() as i32,
            z: (pos.z / CHUNK_SIZE as f32).floor() as i32,
        }
    }

    /// World-space origin (minimum corner, y = 0) of this chunk
    pub fn world_origin(&self) -> Vec3 {
        Vec3::new(
            self.x as f32 * CHUNK_SIZE as f32,
            0.0,
            self.z as f32 * CHUNK_SIZE as f32,
        )
    }

    /// Coordinate shifted by `(dx, dz)` chunks, saturating at the `i32` edge
    pub const fn offset(&self, dx: i32, dz: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            z: self.z.saturating_add(dz),
        }
    }
}
