//! Free-list allocator packing serialized chunks into one shared buffer
//!
//! The buffer itself is owned by the caller (normally whoever owns the GPU
//! upload staging memory) and only borrowed here. Space is handed out
//! first-fit and returned with immediate coalescing of adjacent free blocks.
//! There is no compaction: a fragmented buffer can refuse a chunk even when
//! the total free space would fit it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytemuck::{Pod, Zeroable};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::voxel::chunk::ChunkCoord;

/// Memory block descriptor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MemoryBlock {
    /// First byte of the block
    pub offset: usize,
    /// Length of the block in bytes
    pub size: usize,
}

impl MemoryBlock {
    /// Create a new block descriptor
    pub const fn new(offset: usize, size: usize) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the block
    pub const fn end(&self) -> usize {
        self.offset + self.size
    }
}

/// Per-chunk record of the table handed to the renderer (16 bytes)
///
/// Tells the GPU-side traversal where each resident chunk's node array
/// starts in the shared buffer and how long it is.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkTableEntry {
    /// Chunk x coordinate
    pub x: i32,
    /// Chunk z coordinate
    pub z: i32,
    /// Byte offset of the chunk's node array
    pub offset: u32,
    /// Byte length of the chunk's node array
    pub size: u32,
}

struct AllocatorState<'buf> {
    data: &'buf mut [u8],
    free_blocks: Vec<MemoryBlock>,
    allocated: HashMap<ChunkCoord, MemoryBlock>,
}

/// Wraps an already allocated buffer to manage it
///
/// All state sits behind one mutex. `allocate` and `free` hold it for their
/// whole duration; consumers that walk the resident chunks hold it through
/// [`ChunkAllocator::lock`].
pub struct ChunkAllocator<'buf> {
    state: Mutex<AllocatorState<'buf>>,
    capacity: usize,
}

impl<'buf> ChunkAllocator<'buf> {
    /// Wrap a buffer
    ///
    /// # Errors
    /// `Error::InvalidBuffer` if the buffer is empty or too large for the
    /// 32-bit offsets of [`ChunkTableEntry`].
    pub fn new(data: &'buf mut [u8]) -> Result<Self> {
        let capacity = data.len();
        if capacity == 0 {
            return Err(Error::InvalidBuffer("chunk buffer is empty".into()));
        }
        if u32::try_from(capacity).is_err() {
            return Err(Error::InvalidBuffer(format!(
                "chunk buffer of {} bytes exceeds 32-bit addressing",
                capacity
            )));
        }

        log::info!("Chunk allocator managing {}KB", capacity / 1024);

        Ok(Self {
            state: Mutex::new(AllocatorState {
                data,
                free_blocks: vec![MemoryBlock::new(0, capacity)],
                allocated: HashMap::new(),
            }),
            capacity,
        })
    }

    /// Copy a chunk's serialized bytes into the buffer
    ///
    /// # Arguments
    /// * `coord` - Chunk coordinate the space is recorded under
    /// * `bytes` - Serialized chunk (see `Octree::data`)
    ///
    /// # Returns
    /// `true` if the chunk is resident afterwards. Allocating an already
    /// resident coordinate is a no-op that returns `true`. `false` means no
    /// free block was large enough; nothing changed.
    ///
    /// An empty payload always succeeds, even with a full buffer. It is
    /// recorded as a zero-sized block at offset 0 rather than carved out of
    /// the first free block.
    pub fn allocate(&self, coord: ChunkCoord, bytes: &[u8]) -> bool {
        let mut state = self.state();

        if state.allocated.contains_key(&coord) {
            return true;
        }

        // An all-air chunk serializes to nothing and claims no space.
        if bytes.is_empty() {
            state.allocated.insert(coord, MemoryBlock::new(0, 0));
            return true;
        }

        let Some(index) = state.free_blocks.iter().position(|block| block.size >= bytes.len()) else {
            log::trace!("No free block for chunk {:?} ({} bytes)", coord, bytes.len());
            return false;
        };

        let free = state.free_blocks[index];
        let block = MemoryBlock::new(free.offset, bytes.len());

        if free.size == bytes.len() {
            state.free_blocks.remove(index);
        } else {
            let remainder = &mut state.free_blocks[index];
            remainder.offset += bytes.len();
            remainder.size -= bytes.len();
        }

        state.data[block.offset..block.end()].copy_from_slice(bytes);
        state.allocated.insert(coord, block);

        log::trace!("Allocated chunk {:?} at {}..{}", coord, block.offset, block.end());
        true
    }

    /// Release the space of a chunk
    ///
    /// Unknown coordinates are ignored. The freed block is merged with any
    /// free neighbour so no two free blocks ever touch.
    pub fn free(&self, coord: ChunkCoord) {
        let mut state = self.state();

        let Some(block) = state.allocated.remove(&coord) else {
            return;
        };
        if block.size == 0 {
            return;
        }

        let before = state.free_blocks.iter().position(|free| free.end() == block.offset);
        let after = state.free_blocks.iter().position(|free| free.offset == block.end());

        match (before, after) {
            (Some(before), Some(after)) => {
                let absorbed = state.free_blocks[after].size;
                state.free_blocks[before].size += block.size + absorbed;
                state.free_blocks.remove(after);
            }
            (Some(before), None) => {
                state.free_blocks[before].size += block.size;
            }
            (None, Some(after)) => {
                let free = &mut state.free_blocks[after];
                free.offset -= block.size;
                free.size += block.size;
            }
            (None, None) => {
                state.free_blocks.push(block);
            }
        }

        log::trace!("Freed chunk {:?} at {}..{}", coord, block.offset, block.end());
    }

    /// Lock the allocator for a consistent view of the resident chunks
    ///
    /// `allocate` and `free` from other threads block until the guard drops.
    pub fn lock(&self) -> AllocatorGuard<'_, 'buf> {
        AllocatorGuard { state: self.state() }
    }

    /// Size of the managed buffer in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Check whether a chunk is resident
    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.state().allocated.contains_key(&coord)
    }

    /// Block holding a resident chunk
    pub fn block(&self, coord: ChunkCoord) -> Option<MemoryBlock> {
        self.state().allocated.get(&coord).copied()
    }

    /// Number of resident chunks
    pub fn allocated_count(&self) -> usize {
        self.state().allocated.len()
    }

    /// Total bytes not claimed by any chunk
    pub fn free_bytes(&self) -> usize {
        self.state().free_blocks.iter().map(|block| block.size).sum()
    }

    /// Snapshot of the free list in its current order
    pub fn free_blocks(&self) -> Vec<MemoryBlock> {
        self.state().free_blocks.clone()
    }

    fn state(&self) -> MutexGuard<'_, AllocatorState<'buf>> {
        // Every mutation leaves the lists consistent before anything can
        // panic, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Locked view of a [`ChunkAllocator`]
pub struct AllocatorGuard<'a, 'buf> {
    state: MutexGuard<'a, AllocatorState<'buf>>,
}

impl AllocatorGuard<'_, '_> {
    /// Iterate resident chunks and their blocks (unordered)
    pub fn iter(&self) -> impl Iterator<Item = (ChunkCoord, MemoryBlock)> + '_ {
        self.state.allocated.iter().map(|(coord, block)| (*coord, *block))
    }

    /// Number of resident chunks
    pub fn len(&self) -> usize {
        self.state.allocated.len()
    }

    /// True if no chunk is resident
    pub fn is_empty(&self) -> bool {
        self.state.allocated.is_empty()
    }

    /// Block holding a resident chunk
    pub fn block(&self, coord: ChunkCoord) -> Option<MemoryBlock> {
        self.state.allocated.get(&coord).copied()
    }

    /// Serialized bytes of a resident chunk
    pub fn chunk_bytes(&self, coord: ChunkCoord) -> Option<&[u8]> {
        let block = self.state.allocated.get(&coord)?;
        Some(&self.state.data[block.offset..block.end()])
    }

    /// Free list in its current order
    pub fn free_blocks(&self) -> &[MemoryBlock] {
        &self.state.free_blocks
    }

    /// Build the chunk table for the renderer, sorted by offset
    pub fn chunk_table(&self) -> Vec<ChunkTableEntry> {
        let mut table: Vec<ChunkTableEntry> = self
            .iter()
            .map(|(coord, block)| ChunkTableEntry {
                x: coord.x,
                z: coord.z,
                // Capacity is checked to fit in u32 at construction.
                offset: block.offset as u32,
                size: block.size as u32,
            })
            .collect();
        table.sort_by_key(|entry| entry.offset);
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord(x: i32, z: i32) -> ChunkCoord {
        ChunkCoord::new(x, z)
    }

    /// Free and allocated blocks tile the buffer exactly, and no two free
    /// blocks touch.
    fn assert_invariants(allocator: &ChunkAllocator) {
        let guard = allocator.lock();

        let mut blocks: Vec<(MemoryBlock, bool)> = guard
            .free_blocks()
            .iter()
            .map(|block| (*block, true))
            .chain(guard.iter().map(|(_, block)| (block, false)))
            .filter(|(block, _)| block.size > 0)
            .collect();
        blocks.sort_by_key(|(block, _)| block.offset);

        let mut cursor = 0;
        for (block, _) in &blocks {
            assert_eq!(block.offset, cursor, "gap or overlap at {}", cursor);
            cursor = block.end();
        }
        assert_eq!(cursor, allocator.capacity());

        for pair in blocks.windows(2) {
            assert!(!(pair[0].1 && pair[1].1), "adjacent free blocks {:?} and {:?}", pair[0].0, pair[1].0);
        }

        let free: usize = guard.free_blocks().iter().map(|block| block.size).sum();
        let used: usize = guard.iter().map(|(_, block)| block.size).sum();
        assert_eq!(free + used, allocator.capacity());
    }

    #[test]
    fn test_empty_buffer_rejected() {
        let mut buffer: Vec<u8> = Vec::new();
        assert!(matches!(ChunkAllocator::new(&mut buffer), Err(Error::InvalidBuffer(_))));
    }

    #[test]
    fn test_new_allocator_is_one_free_block() {
        let mut buffer = vec![0u8; 256];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();

        assert_eq!(allocator.capacity(), 256);
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(0, 256)]);
        assert_eq!(allocator.allocated_count(), 0);
        assert_invariants(&allocator);
    }

    #[test]
    fn test_fill_free_and_reuse() {
        let mut buffer = vec![0u8; 128];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();

        assert!(allocator.allocate(coord(0, 0), &[1; 64]));
        assert_eq!(allocator.block(coord(0, 0)), Some(MemoryBlock::new(0, 64)));

        assert!(allocator.allocate(coord(1, 0), &[2; 64]));
        assert_eq!(allocator.block(coord(1, 0)), Some(MemoryBlock::new(64, 64)));

        assert!(!allocator.allocate(coord(2, 0), &[3; 1]));
        assert!(!allocator.contains(coord(2, 0)));

        allocator.free(coord(0, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(0, 64)]);

        assert!(allocator.allocate(coord(2, 0), &[3; 64]));
        assert_eq!(allocator.block(coord(2, 0)), Some(MemoryBlock::new(0, 64)));
        assert!(allocator.free_blocks().is_empty());
        assert_invariants(&allocator);
    }

    #[test]
    fn test_bytes_are_copied() {
        let mut buffer = vec![0u8; 32];
        {
            let allocator = ChunkAllocator::new(&mut buffer).unwrap();
            allocator.allocate(coord(0, 0), &[1, 2, 3]);
            allocator.allocate(coord(5, -5), &[9, 8]);

            let guard = allocator.lock();
            assert_eq!(guard.chunk_bytes(coord(0, 0)), Some(&[1u8, 2, 3][..]));
            assert_eq!(guard.chunk_bytes(coord(5, -5)), Some(&[9u8, 8][..]));
            assert_eq!(guard.chunk_bytes(coord(1, 1)), None);
        }
        assert_eq!(&buffer[..5], &[1, 2, 3, 9, 8]);
    }

    #[test]
    fn test_duplicate_allocate_is_noop() {
        let mut buffer = vec![0u8; 64];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();

        assert!(allocator.allocate(coord(3, 4), &[7; 10]));
        let free_before = allocator.free_blocks();
        let block_before = allocator.block(coord(3, 4));

        // Different payload: still not re-copied
        assert!(allocator.allocate(coord(3, 4), &[1; 20]));
        assert_eq!(allocator.free_blocks(), free_before);
        assert_eq!(allocator.block(coord(3, 4)), block_before);
        assert_eq!(allocator.allocated_count(), 1);
        assert_eq!(allocator.lock().chunk_bytes(coord(3, 4)), Some(&[7u8; 10][..]));
    }

    #[test]
    fn test_empty_payload_claims_no_space() {
        let mut buffer = vec![0u8; 16];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        allocator.allocate(coord(0, 0), &[1; 16]);

        // Buffer is full, but an empty chunk still becomes resident
        assert!(allocator.allocate(coord(1, 0), &[]));
        assert_eq!(allocator.block(coord(1, 0)), Some(MemoryBlock::new(0, 0)));

        allocator.free(coord(1, 0));
        assert!(!allocator.contains(coord(1, 0)));
        assert!(allocator.free_blocks().is_empty());
        assert_invariants(&allocator);
    }

    #[test]
    fn test_free_unknown_is_noop() {
        let mut buffer = vec![0u8; 64];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        allocator.allocate(coord(0, 0), &[1; 8]);

        allocator.free(coord(9, 9));
        assert_eq!(allocator.allocated_count(), 1);
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(8, 56)]);

        // Double free
        allocator.free(coord(0, 0));
        allocator.free(coord(0, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(0, 64)]);
    }

    #[test]
    fn test_free_without_neighbours_adds_block() {
        let mut buffer = vec![0u8; 30];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        for x in 0..3 {
            assert!(allocator.allocate(coord(x, 0), &[0; 10]));
        }

        allocator.free(coord(1, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(10, 10)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn test_free_merges_with_block_before() {
        let mut buffer = vec![0u8; 30];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        for x in 0..3 {
            allocator.allocate(coord(x, 0), &[0; 10]);
        }

        allocator.free(coord(0, 0));
        allocator.free(coord(1, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(0, 20)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn test_free_merges_with_block_after() {
        let mut buffer = vec![0u8; 30];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        for x in 0..3 {
            allocator.allocate(coord(x, 0), &[0; 10]);
        }

        allocator.free(coord(2, 0));
        allocator.free(coord(1, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(10, 20)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn test_free_merges_both_neighbours() {
        let mut buffer = vec![0u8; 40];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        for x in 0..4 {
            allocator.allocate(coord(x, 0), &[0; 10]);
        }

        allocator.free(coord(0, 0));
        allocator.free(coord(2, 0));
        assert_eq!(allocator.free_blocks().len(), 2);

        allocator.free(coord(1, 0));
        assert_eq!(allocator.free_blocks(), vec![MemoryBlock::new(0, 30)]);
        assert_invariants(&allocator);
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let mut buffer = vec![0u8; 100];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        allocator.allocate(coord(0, 0), &[0; 40]);
        allocator.allocate(coord(1, 0), &[0; 10]);
        allocator.allocate(coord(2, 0), &[0; 20]);
        allocator.allocate(coord(3, 0), &[0; 30]);

        // Free list order: [0..40], [50..70]
        allocator.free(coord(0, 0));
        allocator.free(coord(2, 0));

        // 15 bytes fit best in the 20-byte hole, but first fit takes the 40-byte one
        assert!(allocator.allocate(coord(4, 0), &[0; 15]));
        assert_eq!(allocator.block(coord(4, 0)), Some(MemoryBlock::new(0, 15)));
        assert_invariants(&allocator);
    }

    #[test]
    fn test_fragmentation_can_refuse_despite_free_space() {
        let mut buffer = vec![0u8; 30];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        for x in 0..3 {
            allocator.allocate(coord(x, 0), &[0; 10]);
        }
        allocator.free(coord(0, 0));
        allocator.free(coord(2, 0));

        assert_eq!(allocator.free_bytes(), 20);
        assert!(!allocator.allocate(coord(9, 0), &[0; 15]));
        assert_invariants(&allocator);
    }

    #[test]
    fn test_random_sequence_keeps_invariants() {
        let mut buffer = vec![0u8; 4096];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();

        let mut seed: u64 = 0xdead_beef;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        for _ in 0..2000 {
            let c = coord((next() % 12) as i32, (next() % 12) as i32);
            if next() % 3 == 0 {
                allocator.free(c);
            } else {
                let len = 1 + next() % 200;
                let payload = vec![(len % 251) as u8; len];
                let resident_before = allocator.contains(c);
                let ok = allocator.allocate(c, &payload);
                assert!(!resident_before || ok);
                assert_eq!(allocator.contains(c), ok);
            }
            assert_invariants(&allocator);
        }
    }

    #[test]
    fn test_chunk_table_sorted_and_pod() {
        let mut buffer = vec![0u8; 64];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();
        allocator.allocate(coord(1, 2), &[0; 8]);
        allocator.allocate(coord(-3, 4), &[0; 16]);

        let table = allocator.lock().chunk_table();
        assert_eq!(
            table,
            vec![
                ChunkTableEntry { x: 1, z: 2, offset: 0, size: 8 },
                ChunkTableEntry { x: -3, z: 4, offset: 8, size: 16 },
            ]
        );

        let bytes: &[u8] = bytemuck::cast_slice(&table);
        assert_eq!(bytes.len(), 2 * std::mem::size_of::<ChunkTableEntry>());
        assert_eq!(std::mem::size_of::<ChunkTableEntry>(), 16);
    }

    #[test]
    fn test_concurrent_allocate_and_free() {
        let mut buffer = vec![0u8; 64 * 1024];
        let allocator = ChunkAllocator::new(&mut buffer).unwrap();

        std::thread::scope(|scope| {
            for worker in 0..4 {
                let allocator = &allocator;
                scope.spawn(move || {
                    for round in 0..200 {
                        let c = coord(worker, round % 16);
                        let payload = vec![worker as u8 + 1; 16 + (round as usize % 48)];
                        allocator.allocate(c, &payload);
                        if round % 2 == 1 {
                            allocator.free(c);
                        }
                    }
                });
            }
        });

        assert_invariants(&allocator);

        // Every resident chunk still holds its owner's bytes
        let guard = allocator.lock();
        for (c, _) in guard.iter() {
            let bytes = guard.chunk_bytes(c).unwrap();
            assert!(bytes.iter().all(|&b| b == c.x as u8 + 1));
        }
    }
}
