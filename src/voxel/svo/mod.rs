//! Sparse voxel octree codec

pub mod octree;

pub use octree::Octree;
