//! Per-frame chunk streaming around the camera
//!
//! Every tick the world works out which chunk columns fall inside the load
//! window around the camera, queues the missing ones, starts at most one
//! background generation job, evicts columns that left the window and
//! collects jobs that have finished.
//!
//! Jobs run on threads of a [`std::thread::Scope`] supplied by the caller.
//! The scope cannot end before every job has been joined, so no job can
//! write into the chunk buffer after its owner released it. Dropping the
//! world also joins everything still running; there is no cancellation.

use std::collections::{HashSet, VecDeque};
use std::thread::{Builder, Scope, ScopedJoinHandle};

use serde::{Deserialize, Serialize};

use crate::core::camera::Camera;
use crate::core::config::MAX_LOAD_DISTANCE;
use crate::streaming::allocator::ChunkAllocator;
use crate::terrain::ChunkGenerator;
use crate::voxel::chunk::ChunkCoord;

/// Settings related to a world
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Number of chunks visible from the camera in one direction
    pub load_distance: u8,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self { load_distance: 8 }
    }
}

/// Counters for the last tick
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StreamingStats {
    /// Coordinates added to the needed queue
    pub chunks_enqueued: u32,
    /// Generation jobs started (0 or 1)
    pub jobs_admitted: u32,
    /// Finished jobs whose chunk became resident
    pub chunks_loaded: u32,
    /// Resident chunks freed because they left the window
    pub chunks_evicted: u32,
    /// Finished jobs freed at once because the camera moved away while they
    /// ran; never resident, so not counted in `chunks_evicted`
    pub stale_loads_freed: u32,
    /// Finished jobs whose chunk did not fit in the buffer
    pub allocation_failures: u32,
    /// Resident chunks after the tick
    pub resident_chunks: usize,
    /// Queue length after the tick
    pub needed_chunks: usize,
    /// Jobs still running after the tick
    pub jobs_in_flight: usize,
}

/// What a generation job did with its chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LoadOutcome {
    /// Chunk copied into the buffer
    Loaded { bytes: usize },
    /// No free block large enough
    Exhausted { bytes: usize },
}

struct LoadJob<'scope> {
    coord: ChunkCoord,
    handle: ScopedJoinHandle<'scope, LoadOutcome>,
}

/// Streams chunks around the camera into a [`ChunkAllocator`]
///
/// Per coordinate the lifecycle is: unseen, needed (queued), in flight,
/// loaded, evicted. A coordinate is only queued when it is neither loaded
/// nor in flight, so it is never generated twice at the same time, and
/// eviction only touches loaded coordinates, so `free` never races the
/// `allocate` of a job for the same coordinate.
pub struct World<'scope, 'env, 'buf, G: ChunkGenerator> {
    settings: WorldSettings,
    camera: Camera,
    allocator: &'env ChunkAllocator<'buf>,
    generator: &'env G,
    scope: &'scope Scope<'scope, 'env>,
    /// FIFO of coordinates waiting for a job
    needed: VecDeque<ChunkCoord>,
    /// Mirror of `needed` for duplicate checks
    queued: HashSet<ChunkCoord>,
    /// Coordinates resident in the allocator
    loaded: HashSet<ChunkCoord>,
    /// Coordinates with a running job
    in_flight: HashSet<ChunkCoord>,
    jobs: Vec<LoadJob<'scope>>,
    stats: StreamingStats,
}

impl<'scope, 'env, 'buf, G: ChunkGenerator> World<'scope, 'env, 'buf, G> {
    /// Create a world streaming into `allocator`
    ///
    /// # Arguments
    /// * `settings` - Load distance and friends
    /// * `camera` - Initial camera; move it through [`World::camera_mut`]
    /// * `allocator` - Allocator over the shared chunk buffer
    /// * `generator` - Builds chunk contents on the job threads
    /// * `scope` - Thread scope the generation jobs are spawned on
    pub fn new(
        settings: WorldSettings,
        camera: Camera,
        allocator: &'env ChunkAllocator<'buf>,
        generator: &'env G,
        scope: &'scope Scope<'scope, 'env>,
    ) -> Self {
        log::info!(
            "World streaming with load distance {} into {}KB",
            settings.load_distance,
            allocator.capacity() / 1024
        );

        Self {
            settings,
            camera,
            allocator,
            generator,
            scope,
            needed: VecDeque::new(),
            queued: HashSet::new(),
            loaded: HashSet::new(),
            in_flight: HashSet::new(),
            jobs: Vec::new(),
            stats: StreamingStats::default(),
        }
    }

    /// Update the loaded chunks. Call once per frame.
    pub fn update(&mut self) {
        self.stats = StreamingStats::default();

        let window = self.visible_window();
        let visible: HashSet<ChunkCoord> = window.iter().copied().collect();

        for coord in window {
            if !self.loaded.contains(&coord)
                && !self.in_flight.contains(&coord)
                && self.queued.insert(coord)
            {
                self.needed.push_back(coord);
                self.stats.chunks_enqueued += 1;
            }
        }

        // Launch one job per frame. Entries that scrolled out of the window
        // while waiting are dropped on the way.
        while let Some(coord) = self.needed.pop_front() {
            self.queued.remove(&coord);
            if visible.contains(&coord) {
                self.spawn_load(coord);
                break;
            }
        }

        let allocator = self.allocator;
        let mut evicted = 0;
        self.loaded.retain(|coord| {
            if visible.contains(coord) {
                return true;
            }
            allocator.free(*coord);
            evicted += 1;
            false
        });
        self.stats.chunks_evicted += evicted;
        if evicted > 0 {
            log::debug!("Evicted {} chunks", evicted);
        }

        self.reap_finished(&visible);

        self.stats.resident_chunks = self.loaded.len();
        self.stats.needed_chunks = self.needed.len();
        self.stats.jobs_in_flight = self.jobs.len();
    }

    /// Block until every running job has finished and record the results
    pub fn finish_jobs(&mut self) {
        let visible: HashSet<ChunkCoord> = self.visible_window().into_iter().collect();
        for job in std::mem::take(&mut self.jobs) {
            self.complete(job, &visible);
        }
        self.stats.resident_chunks = self.loaded.len();
        self.stats.jobs_in_flight = 0;
    }

    /// Coordinates inside the load window: the box `[-R, R) x [-R, R)`
    /// around the camera's chunk, row by row
    pub fn visible_window(&self) -> Vec<ChunkCoord> {
        let center = self.camera.chunk_coord();
        let r = i32::from(self.settings.load_distance);

        let mut window = Vec::with_capacity((2 * r * 2 * r) as usize);
        for x in -r..r {
            for z in -r..r {
                window.push(center.offset(x, z));
            }
        }
        window
    }

    /// Retrieve the world's camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Retrieve the world's camera for moving it between ticks
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    /// Current settings
    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Change the load distance; takes effect on the next tick
    ///
    /// Clamped to `1..=MAX_LOAD_DISTANCE`, the range accepted from config.
    pub fn set_load_distance(&mut self, load_distance: u8) {
        let load_distance = load_distance.clamp(1, MAX_LOAD_DISTANCE);
        if load_distance != self.settings.load_distance {
            log::debug!("Load distance {} -> {}", self.settings.load_distance, load_distance);
            self.settings.load_distance = load_distance;
        }
    }

    /// Coordinates currently resident
    pub fn loaded(&self) -> &HashSet<ChunkCoord> {
        &self.loaded
    }

    /// Check if a coordinate is resident
    pub fn is_loaded(&self, coord: ChunkCoord) -> bool {
        self.loaded.contains(&coord)
    }

    /// Coordinates waiting for a job
    pub fn needed_count(&self) -> usize {
        self.needed.len()
    }

    /// Jobs not yet reaped
    pub fn jobs_in_flight(&self) -> usize {
        self.jobs.len()
    }

    /// Counters of the last tick
    pub fn stats(&self) -> StreamingStats {
        self.stats
    }

    fn spawn_load(&mut self, coord: ChunkCoord) {
        let allocator = self.allocator;
        let generator = self.generator;

        let spawned = Builder::new()
            .name(format!("chunk-gen {},{}", coord.x, coord.z))
            .spawn_scoped(self.scope, move || {
                let chunk = generator.generate(coord);
                let bytes = chunk.data();
                if allocator.allocate(coord, bytes) {
                    LoadOutcome::Loaded { bytes: bytes.len() }
                } else {
                    LoadOutcome::Exhausted { bytes: bytes.len() }
                }
            });

        match spawned {
            Ok(handle) => {
                log::debug!("Generating chunk {:?}", coord);
                self.in_flight.insert(coord);
                self.jobs.push(LoadJob { coord, handle });
                self.stats.jobs_admitted += 1;
            }
            Err(e) => {
                // Retried from the front of the queue next tick
                log::error!("Failed to spawn generation job for {:?}: {}", coord, e);
                self.queued.insert(coord);
                self.needed.push_front(coord);
            }
        }
    }

    /// Remove finished jobs; running ones are left alone
    fn reap_finished(&mut self, visible: &HashSet<ChunkCoord>) {
        let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| job.handle.is_finished());
        self.jobs = running;

        for job in finished {
            self.complete(job, visible);
        }
    }

    fn complete(&mut self, job: LoadJob<'scope>, visible: &HashSet<ChunkCoord>) {
        let coord = job.coord;
        self.in_flight.remove(&coord);

        match job.handle.join() {
            Ok(LoadOutcome::Loaded { bytes }) => {
                if visible.contains(&coord) {
                    log::debug!("Loaded chunk {:?} ({} bytes)", coord, bytes);
                    self.loaded.insert(coord);
                    self.stats.chunks_loaded += 1;
                } else {
                    // Camera moved on while the job ran
                    log::debug!("Chunk {:?} left the window while loading", coord);
                    self.allocator.free(coord);
                    self.stats.stale_loads_freed += 1;
                }
            }
            Ok(LoadOutcome::Exhausted { bytes }) => {
                log::debug!("Chunk buffer full, dropping {:?} ({} bytes) until next pass", coord, bytes);
                self.stats.allocation_failures += 1;
            }
            Err(_) => {
                log::error!("Generation job for chunk {:?} panicked", coord);
            }
        }
    }
}

impl<G: ChunkGenerator> Drop for World<'_, '_, '_, G> {
    fn drop(&mut self) {
        if !self.jobs.is_empty() {
            log::debug!("Waiting for {} generation jobs", self.jobs.len());
        }
        self.finish_jobs();
    }
}
