//! Chunk residency: buffer allocation and camera-driven loading

pub mod allocator;
pub mod world;

pub use allocator::{AllocatorGuard, ChunkAllocator, ChunkTableEntry, MemoryBlock};
pub use world::{StreamingStats, World, WorldSettings};
