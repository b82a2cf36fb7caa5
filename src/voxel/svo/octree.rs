//! Pointer-free sparse voxel octree stored as a flat byte array
//!
//! Layout of the node array (this is the wire format copied into the shared
//! chunk buffer, so the byte order must not change):
//! - Byte 0 is the root. Bytes above the last level are occupancy masks, bit
//!   `i` set meaning child octant `i` exists. Bytes on the last level are
//!   material ids.
//! - Nodes are stored level by level. Within a level, the children of an
//!   earlier node come before the children of a later one, and siblings are
//!   ordered by octant index.
//! - Empty subtrees are not stored at all.
//!
//! No child offsets are stored. The position of a child is recovered from
//! population counts over the masks between the parent and the current node
//! (see [`Octree::child_position`]).
//!
//! Octant index: bit 0 is `x >= half`, bit 1 is `y >= half`, bit 2 is
//! `z >= half`.

use crate::math::bits::{pop_count_bits, pop_count_slice};

/// Sentinel octant index for the root, which has no parent mask
const NO_PARENT: u32 = 8;

/// Sparse octree of bytes with `L` levels (edge length `2^L`)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Octree<const L: usize> {
    nodes: Vec<u8>,
}

impl<const L: usize> Octree<L> {
    /// Number of subdivisions between the root and a voxel
    pub const LEVELS: usize = L;

    /// Edge length in voxels (`2^L`)
    pub const SIZE: usize = 1 << L;

    const HALF: usize = Self::SIZE / 2;

    /// Create an empty octree
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Wrap a node array previously produced by [`Octree::data`] with the
    /// same `L`, e.g. bytes read back from the shared chunk buffer.
    ///
    /// Lookups on bytes produced with a different level count may panic.
    pub fn from_data(nodes: Vec<u8>) -> Self {
        Self { nodes }
    }

    /// Read the voxel at `(x, y, z)`
    ///
    /// Returns 0 for voxels that were never set and for coordinates outside
    /// the volume.
    pub fn get(&self, x: usize, y: usize, z: usize) -> u8 {
        if self.nodes.is_empty() || !Self::in_bounds(x, y, z) {
            return 0;
        }

        let (mut x, mut y, mut z) = (x, y, z);
        let mut head = 0;
        let mut parent = 0;
        let mut child_in_parent = NO_PARENT;

        let mut half = Self::HALF;
        while half >= 1 {
            let child = octant(&mut x, &mut y, &mut z, half);

            if self.nodes[head] & (1 << child) == 0 {
                return 0;
            }

            let next = self.child_position(parent, child_in_parent, head, child);
            child_in_parent = child;
            parent = head;
            head = next;

            half /= 2;
        }

        self.nodes[head]
    }

    /// Write `value` at `(x, y, z)`
    ///
    /// A value of 0 is ignored: voxels cannot be cleared once set. Every
    /// missing node on the way down is inserted into the array, which shifts
    /// all bytes after it, so fill a whole chunk before handing out
    /// [`Octree::data`].
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: u8) {
        if value == 0 {
            return;
        }

        debug_assert!(
            Self::in_bounds(x, y, z),
            "voxel ({x}, {y}, {z}) outside octree of size {}",
            Self::SIZE
        );
        if !Self::in_bounds(x, y, z) {
            return;
        }

        if self.nodes.is_empty() {
            self.nodes.push(0);
        }

        let (mut x, mut y, mut z) = (x, y, z);
        let mut head = 0;
        let mut parent = 0;
        let mut child_in_parent = NO_PARENT;

        let mut half = Self::HALF;
        while half >= 1 {
            let child = octant(&mut x, &mut y, &mut z, half);
            let child_mask = 1u8 << child;

            let next = self.child_position(parent, child_in_parent, head, child);
            child_in_parent = child;
            parent = head;
            head = next;

            if self.nodes[parent] & child_mask == 0 {
                self.nodes[parent] |= child_mask;
                self.nodes.insert(head, 0);
            }

            half /= 2;
        }

        self.nodes[head] = value;
    }

    /// Raw node array in wire order
    pub fn data(&self) -> &[u8] {
        &self.nodes
    }

    /// Number of stored nodes (the serialized size in bytes)
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// True if no voxel has been set
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of non-empty voxels
    pub fn solid_count(&self) -> usize {
        if self.nodes.is_empty() {
            return 0;
        }

        // Level k + 1 holds one node per set bit in level k.
        let mut start = 0;
        let mut count = 1;
        for _ in 0..L {
            let level = &self.nodes[start..start + count];
            start += count;
            count = pop_count_slice(level);
        }
        count
    }

    fn in_bounds(x: usize, y: usize, z: usize) -> bool {
        x < Self::SIZE && y < Self::SIZE && z < Self::SIZE
    }

    /// Array position of octant `child` of the node at `head`.
    ///
    /// `parent` is the node above `head`, and `child_in_parent` is the octant
    /// `head` occupies in it (`NO_PARENT` for the root). The child lies past:
    /// - the siblings of `head` that follow it,
    /// - the children of every node stored strictly between `parent` and
    ///   `head`,
    /// - the children of `head` in lower octants,
    /// - `head` itself.
    fn child_position(&self, parent: usize, child_in_parent: u32, head: usize, child: u32) -> usize {
        let siblings_after = pop_count_bits(self.nodes[parent], child_in_parent + 1, 8);
        let between = if head > parent + 1 {
            pop_count_slice(&self.nodes[parent + 1..head])
        } else {
            0
        };
        let earlier_children = pop_count_bits(self.nodes[head], 0, child);

        head + siblings_after + between + earlier_children + 1
    }
}

/// Select the octant of `(x, y, z)` at this level and move the coordinates
/// into that octant's local frame.
#[inline]
fn octant(x: &mut usize, y: &mut usize, z: &mut usize, half: usize) -> u32 {
    let mut index = 0;
    if *x >= half {
        index |= 1;
        *x -= half;
    }
    if *y >= half {
        index |= 2;
        *y -= half;
    }
    if *z >= half {
        index |= 4;
        *z -= half;
    }
    index
}
