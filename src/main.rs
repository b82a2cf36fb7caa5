//! Chunkstream - headless streaming driver
//!
//! Flies the camera along +X over generated terrain and logs what the
//! streaming world does. A renderer would upload `chunk_table()` and the
//! buffer where this loop only inspects them.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chunkstream::core::{logging, EngineConfig, Result};
use chunkstream::streaming::{ChunkAllocator, World};
use chunkstream::terrain::TerrainGenerator;
use chunkstream::voxel::CHUNK_SIZE;

/// Frames to simulate
const FRAME_COUNT: u32 = 600;
/// Target frame time
const FRAME_TIME: Duration = Duration::from_millis(16);
/// Camera speed in voxels per frame
const CAMERA_SPEED: f32 = 2.0;
/// Frames between stats lines
const STATS_INTERVAL: u32 = 60;

fn main() {
    if let Err(e) = run() {
        log::error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    let config = EngineConfig::load_or_create(&config_path)?;
    logging::init(&config.log_filter);
    log::info!("Loaded config from {}", config_path.display());

    let mut buffer = vec![0u8; config.buffer.size_bytes()];
    let allocator = ChunkAllocator::new(&mut buffer)?;
    let generator = TerrainGenerator::new(config.terrain.clone());

    std::thread::scope(|scope| {
        let mut world = World::new(
            config.world.clone(),
            config.camera.to_camera(),
            &allocator,
            &generator,
            scope,
        );

        for frame in 0..FRAME_COUNT {
            let frame_start = Instant::now();

            world.camera_mut().position.x += CAMERA_SPEED;
            world.update();

            // Stand-in for the renderer's read side
            let (table_len, used_bytes) = {
                let guard = allocator.lock();
                let table = guard.chunk_table();
                let used: u64 = table.iter().map(|entry| u64::from(entry.size)).sum();
                (table.len(), used)
            };

            if frame % STATS_INTERVAL == 0 {
                let stats = world.stats();
                log::info!(
                    "frame {:4} camera chunk {:?}: {} resident ({} in table, {}KB), {} queued, {} in flight, {} evicted, {} stale, {} buffer misses",
                    frame,
                    world.camera().chunk_coord(),
                    stats.resident_chunks,
                    table_len,
                    used_bytes / 1024,
                    stats.needed_chunks,
                    stats.jobs_in_flight,
                    stats.chunks_evicted,
                    stats.stale_loads_freed,
                    stats.allocation_failures,
                );
            }

            if let Some(remaining) = FRAME_TIME.checked_sub(frame_start.elapsed()) {
                std::thread::sleep(remaining);
            }
        }

        log::info!(
            "Done after {} frames, {} chunks resident, {}KB free, travelled {} chunks",
            FRAME_COUNT,
            world.loaded().len(),
            allocator.free_bytes() / 1024,
            (FRAME_COUNT as f32 * CAMERA_SPEED / CHUNK_SIZE as f32) as u32,
        );
    });

    Ok(())
}
