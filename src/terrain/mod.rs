//! Procedural chunk generation

pub mod generator;

pub use generator::{ChunkGenerator, StaircaseGenerator, TerrainGenerator, TerrainParams};
