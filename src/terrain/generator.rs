//! Noise-based procedural terrain generation

use noise::{Fbm, MultiFractal, NoiseFn, OpenSimplex};
use serde::{Deserialize, Serialize};

use crate::voxel::chunk::{Chunk, ChunkCoord};

/// Produces the voxel contents of a chunk
///
/// Called from background generation jobs, so implementations must be
/// shareable across threads. Any state (noise tables, seeds) belongs to the
/// implementing value.
pub trait ChunkGenerator: Send + Sync {
    /// Build the chunk at `coord`
    fn generate(&self, coord: ChunkCoord) -> Chunk;
}

impl<F> ChunkGenerator for F
where
    F: Fn(ChunkCoord) -> Chunk + Send + Sync,
{
    fn generate(&self, coord: ChunkCoord) -> Chunk {
        self(coord)
    }
}

/// Parameters controlling terrain generation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    pub seed: u32,
    pub frequency: f64,   // Base noise frequency (smaller = smoother)
    pub octaves: usize,   // FBM octaves (detail levels)
    pub gain: f64,        // FBM persistence (0.5 typical)
    pub lacunarity: f64,  // FBM lacunarity (2.0 typical)
    pub material: u8,     // Material id written below the surface
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            seed: 12345,
            frequency: 0.01,
            octaves: 8,
            gain: 0.5,
            lacunarity: 2.0,
            material: 1,
        }
    }
}

/// Heightmap terrain generator using fractal Brownian motion over OpenSimplex
pub struct TerrainGenerator {
    params: TerrainParams,
    noise: Fbm<OpenSimplex>,
}

impl TerrainGenerator {
    /// Create a new terrain generator with the given parameters
    pub fn new(params: TerrainParams) -> Self {
        let noise = Fbm::<OpenSimplex>::new(params.seed)
            .set_octaves(params.octaves)
            .set_persistence(params.gain)
            .set_lacunarity(params.lacunarity)
            .set_frequency(params.frequency);

        Self { params, noise }
    }

    /// Get terrain parameters
    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    /// Highest solid voxel of the column at local `(x, z)` in chunk `coord`
    ///
    /// Sampled at half resolution; always within `0..Chunk::SIZE`.
    pub fn column_height(&self, coord: ChunkCoord, x: usize, z: usize) -> usize {
        let size = Chunk::SIZE as f64;
        let px = (x as f64 + coord.x as f64 * size) / 2.0;
        let pz = (z as f64 + coord.z as f64 * size) / 2.0;

        // Noise in [-1, 1] mapped to [0, size]
        let normalized = ((self.noise.get([px, pz]) + 1.0) / 2.0).clamp(0.0, 1.0);
        ((normalized * size) as usize).min(Chunk::SIZE - 1)
    }
}

impl ChunkGenerator for TerrainGenerator {
    fn generate(&self, coord: ChunkCoord) -> Chunk {
        let mut chunk = Chunk::new();
        if self.params.material == 0 {
            return chunk;
        }

        for z in 0..Chunk::SIZE {
            for x in 0..Chunk::SIZE {
                let height = self.column_height(coord, x, z);
                for y in 0..=height {
                    chunk.set(x, y, z, self.params.material);
                }
            }
        }

        chunk
    }
}

/// Diagnostic pattern: every voxel with `x >= y` is solid, in every chunk
#[derive(Clone, Copy, Debug)]
pub struct StaircaseGenerator {
    pub material: u8,
}

impl Default for StaircaseGenerator {
    fn default() -> Self {
        Self { material: 1 }
    }
}

impl ChunkGenerator for StaircaseGenerator {
    fn generate(&self, _coord: ChunkCoord) -> Chunk {
        let mut chunk = Chunk::new();
        for y in 0..Chunk::SIZE {
            for z in 0..Chunk::SIZE {
                for x in y..Chunk::SIZE {
                    chunk.set(x, y, z, self.material);
                }
            }
        }
        chunk
    }
}
