//! Camera state owned by the streaming world

use crate::core::types::Vec3;
use crate::voxel::chunk::ChunkCoord;

/// Camera data
///
/// Only `position` drives streaming. Rotation and field of view are carried
/// for the renderer, which reads them through `World::camera`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// World position
    pub position: Vec3,
    /// Euler angles in degrees (pitch, yaw, roll)
    pub rotation: Vec3,
    /// Vertical field of view in degrees
    pub fov_y_degrees: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, fov_y_degrees: f32) -> Self {
        Self {
            position,
            rotation: Vec3::new(-20.0, 70.0, 0.0),
            fov_y_degrees,
        }
    }

    /// Coordinate of the chunk column the camera is standing in
    pub fn chunk_coord(&self) -> ChunkCoord {
        ChunkCoord::from_world_pos(self.position)
    }

    /// Vertical field of view in radians
    pub fn fov_y(&self) -> f32 {
        self.fov_y_degrees.to_radians()
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, 64.0, 0.0), 70.0)
    }
}
